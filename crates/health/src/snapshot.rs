//! Health snapshot computation.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use previewctl_store::{DeploymentRecord, DeploymentStatus};
use serde::Serialize;

/// Top-level health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Counts of deployment records by status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub building: usize,
    pub running: usize,
    pub destroying: usize,
    pub failed: usize,
    pub stopped: usize,
}

impl StatusCounts {
    #[must_use]
    pub fn from_records(records: &[DeploymentRecord]) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.status {
                DeploymentStatus::Queued => counts.queued += 1,
                DeploymentStatus::Building => counts.building += 1,
                DeploymentStatus::Running => counts.running += 1,
                DeploymentStatus::Destroying => counts.destroying += 1,
                DeploymentStatus::Failed => counts.failed += 1,
                DeploymentStatus::Stopped => counts.stopped += 1,
            }
        }
        counts
    }
}

/// Full health snapshot, returned by `GET /health`.
///
/// The `uptime_secs`, `resident_memory_bytes`, `dead_letter_depth`, and
/// `tunnels_unhealthy` fields are additive observability; they never
/// influence `status`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: Status,
    pub engine_reachable: bool,
    pub counts: StatusCounts,
    pub uptime_secs: u64,
    pub resident_memory_bytes: Option<u64>,
    pub memory_usage_ratio: Option<f64>,
    pub dead_letter_depth: usize,
    pub tunnels_unhealthy: usize,
    pub checked_at_unix: u64,
}

/// Tracks process start time so uptime can be computed without depending on
/// a global.
#[derive(Clone, Copy)]
pub struct ProcessClock {
    started_at: Instant,
}

impl Default for ProcessClock {
    fn default() -> Self {
        Self { started_at: Instant::now() }
    }
}

impl ProcessClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Compute the snapshot from its raw ingredients. Split out from any I/O so
/// the `healthy`/`degraded`/`unhealthy` rule is unit-testable without a real
/// engine or store.
#[must_use]
pub fn compute_snapshot(
    engine_reachable: bool,
    records: &[DeploymentRecord],
    uptime_secs: u64,
    resident_memory_bytes: Option<u64>,
    total_memory_bytes: Option<u64>,
    dead_letter_depth: usize,
    tunnels_unhealthy: usize,
) -> HealthSnapshot {
    let counts = StatusCounts::from_records(records);

    let memory_usage_ratio = match (resident_memory_bytes, total_memory_bytes) {
        (Some(used), Some(total)) if total > 0 => Some(used as f64 / total as f64),
        _ => None,
    };

    let status = if counts.failed > counts.running {
        Status::Unhealthy
    } else if !engine_reachable || memory_usage_ratio.is_some_and(|ratio| ratio > 0.9) {
        Status::Degraded
    } else {
        Status::Healthy
    };

    HealthSnapshot {
        status,
        engine_reachable,
        counts,
        uptime_secs,
        resident_memory_bytes,
        memory_usage_ratio,
        dead_letter_depth,
        tunnels_unhealthy,
        checked_at_unix: SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default(),
    }
}

/// Best-effort resident memory via `/proc/self/status` (Linux only; `None`
/// elsewhere).
#[must_use]
pub fn read_resident_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/self/status").ok()?;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kb * 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Best-effort total system memory via `/proc/meminfo` (Linux only; `None`
/// elsewhere). Paired with [`read_resident_memory_bytes`] to compute
/// `memory_usage_ratio`.
#[must_use]
pub fn read_total_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kb * 1024);
            }
        }
        None
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: DeploymentStatus) -> DeploymentRecord {
        let mut r = DeploymentRecord::new_queued(1, "b".into(), "c".into(), "t".into(), "a".into(), "u/r".into(), "url".into());
        r.status = status;
        r
    }

    #[test]
    fn healthy_when_engine_up_and_no_excess_failures() {
        let records = vec![record(DeploymentStatus::Running), record(DeploymentStatus::Running)];
        let snap = compute_snapshot(true, &records, 10, None, None, 0, 0);
        assert_eq!(snap.status, Status::Healthy);
    }

    #[test]
    fn degraded_when_engine_unreachable() {
        let snap = compute_snapshot(false, &[], 10, None, None, 0, 0);
        assert_eq!(snap.status, Status::Degraded);
    }

    #[test]
    fn degraded_when_memory_over_90_percent() {
        let snap = compute_snapshot(true, &[], 10, Some(950), Some(1000), 0, 0);
        assert_eq!(snap.status, Status::Degraded);
    }

    #[test]
    fn unhealthy_when_failed_exceeds_running() {
        let records = vec![record(DeploymentStatus::Failed), record(DeploymentStatus::Failed), record(DeploymentStatus::Running)];
        let snap = compute_snapshot(true, &records, 10, None, None, 0, 0);
        assert_eq!(snap.status, Status::Unhealthy);
    }

    #[test]
    fn unhealthy_takes_priority_over_degraded() {
        let records = vec![record(DeploymentStatus::Failed), record(DeploymentStatus::Failed)];
        let snap = compute_snapshot(false, &records, 10, None, None, 0, 0);
        assert_eq!(snap.status, Status::Unhealthy);
    }

    #[test]
    fn unhealthy_tunnels_are_surfaced_without_affecting_status() {
        let snap = compute_snapshot(true, &[], 10, None, None, 0, 2);
        assert_eq!(snap.tunnels_unhealthy, 2);
        assert_eq!(snap.status, Status::Healthy);
    }
}
