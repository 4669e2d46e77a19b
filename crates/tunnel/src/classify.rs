//! Line classification for tunnel subprocess output.

use std::sync::OnceLock;

use regex::Regex;

/// Hosts that appear in tunnel output but are never the preview's public
/// URL (terms/marketing pages printed alongside the real endpoint).
const IGNORABLE_HOSTS: &[&str] = &["one.one.one.one", "developers.cloudflare.com", "cloudflare.com/tos"];

const FATAL_PATTERN: &str = r"(?i)panic|fatal|unable to initialize|exited unexpectedly";
const URL_PATTERN: &str = r"https?://[A-Za-z0-9._~%-]+(?:\.[A-Za-z]{2,})(?::\d+)?(?:/[^\s]*)?";

fn fatal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(FATAL_PATTERN).expect("static fatal pattern is valid"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(URL_PATTERN).expect("static url pattern is valid"))
}

/// Result of classifying one line of tunnel stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClassification {
    /// A public URL was found and should be adopted.
    Url(String),
    /// A fatal pattern matched; the tunnel should be aborted.
    Fatal(String),
    /// Informational only; log and continue.
    Informational,
}

/// Classify one line of tunnel process output.
#[must_use]
pub fn classify_line(line: &str) -> LineClassification {
    if let Some(m) = url_regex().find(line) {
        let url = m.as_str();
        if !IGNORABLE_HOSTS.iter().any(|host| url.contains(host)) {
            return LineClassification::Url(url.to_string());
        }
    }

    if fatal_regex().is_match(line) {
        return LineClassification::Fatal(line.trim().to_string());
    }

    LineClassification::Informational
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adopts_a_plain_public_url() {
        let line = "Your tunnel is live at https://cuddly-otter.trycloudflare.com";
        match classify_line(line) {
            LineClassification::Url(url) => assert_eq!(url, "https://cuddly-otter.trycloudflare.com"),
            other => panic!("expected Url, got {other:?}"),
        }
    }

    #[test]
    fn ignores_marketing_domains() {
        let line = "Learn more at https://developers.cloudflare.com/tunnel";
        assert_eq!(classify_line(line), LineClassification::Informational);
    }

    #[test]
    fn detects_fatal_patterns_case_insensitively() {
        let line = "thread 'main' PANIC: unable to initialize quic transport";
        assert!(matches!(classify_line(line), LineClassification::Fatal(_)));
    }

    #[test]
    fn udp_buffer_warning_is_informational_not_fatal() {
        let line = "Warning: failed to sufficiently increase UDP buffer size";
        assert_eq!(classify_line(line), LineClassification::Informational);
    }

    #[test]
    fn plain_log_line_is_informational() {
        assert_eq!(classify_line("Connection registered"), LineClassification::Informational);
    }
}
