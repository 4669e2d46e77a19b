//! `TunnelSupervisor`: one background task per live tunnel, owning the
//! child process and exposing message-passing operations.

use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::classify::{classify_line, LineClassification};
use crate::error::TunnelError;

/// Arguments needed to spawn the tunnel binary for one PR.
#[derive(Debug, Clone)]
pub struct TunnelSpawnRequest {
    pub pr_number: u64,
    pub host_port: u16,
    pub protocol: String,
    pub binary: String,
    pub name: Option<String>,
    pub credentials_path: Option<String>,
    pub startup_timeout: Duration,
}

enum Command_ {
    Stop(oneshot::Sender<()>),
    HealthCheck(oneshot::Sender<bool>),
    RecordProbe(bool),
}

/// A handle to a live tunnel. Cloning shares the same background task.
#[derive(Clone)]
pub struct TunnelHandle {
    pub pr_number: u64,
    pub public_url: String,
    pub started_at: DateTime<Utc>,
    cmd_tx: mpsc::Sender<Command_>,
}

impl TunnelHandle {
    /// `SIGTERM` the tunnel process, wait up to 5 s, then `SIGKILL`.
    pub async fn stop(&self) -> Result<(), TunnelError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command_::Stop(tx)).await.map_err(|_| TunnelError::SupervisorGone)?;
        rx.await.map_err(|_| TunnelError::SupervisorGone)
    }

    /// Ask the background task to report whether the last health probe
    /// succeeded (updated by the optional background monitor via
    /// [`Self::record_probe`]).
    pub async fn is_healthy(&self) -> Result<bool, TunnelError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command_::HealthCheck(tx)).await.map_err(|_| TunnelError::SupervisorGone)?;
        rx.await.map_err(|_| TunnelError::SupervisorGone)
    }

    /// Record the outcome of an out-of-band probe (e.g. the periodic
    /// `HEAD`-check monitor), consulted by later [`Self::is_healthy`] calls.
    /// Best-effort: a gone supervisor is silently ignored.
    pub async fn record_probe(&self, ok: bool) {
        let _ = self.cmd_tx.send(Command_::RecordProbe(ok)).await;
    }
}

/// Spawns and supervises tunnel processes.
pub struct TunnelSupervisor;

impl TunnelSupervisor {
    /// Spawn the tunnel binary, classify its output until a public URL is
    /// adopted or startup fails, then hand off to a background task that
    /// owns the child for the rest of its life.
    pub async fn start(req: TunnelSpawnRequest) -> Result<TunnelHandle, TunnelError> {
        let mut args = vec!["tunnel".to_string(), "--url".to_string(), format!("http://127.0.0.1:{}", req.host_port)];
        args.push("--protocol".to_string());
        args.push(req.protocol.clone());
        if let Some(name) = &req.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        if let Some(creds) = &req.credentials_path {
            args.push("--credentials-file".to_string());
            args.push(creds.clone());
        }

        let mut child = Command::new(&req.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TunnelError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take().ok_or_else(|| TunnelError::Spawn("no stdout handle".into()))?;
        let stderr = child.stderr.take().ok_or_else(|| TunnelError::Spawn("no stderr handle".into()))?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        // A manual deadline (rather than wrapping the loop in `timeout()`)
        // so a timeout that lands after a "connection registered" signal
        // can still resolve successfully, per spec.
        let deadline = tokio::time::Instant::now() + req.startup_timeout;
        let mut connection_registered = false;
        let mut presumed_url = format!("http://127.0.0.1:{}", req.host_port);

        let detected = loop {
            tokio::select! {
                biased;
                () = tokio::time::sleep_until(deadline) => {
                    break if connection_registered { Ok(presumed_url.clone()) } else { Err(TunnelError::StartupTimeout) };
                }
                line = stdout_lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            debug!(pr_number = req.pr_number, stream = "stdout", %line, "tunnel output");
                            if line.contains("Connection registered") {
                                connection_registered = true;
                            }
                            match classify_line(&line) {
                                LineClassification::Url(url) => {
                                    presumed_url = url.clone();
                                    break Ok(url);
                                }
                                LineClassification::Fatal(reason) => break Err(TunnelError::Fatal(reason)),
                                LineClassification::Informational => {}
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(pr_number = req.pr_number, error = %e, "failed reading tunnel stdout"),
                    }
                }
                line = stderr_lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            debug!(pr_number = req.pr_number, stream = "stderr", %line, "tunnel output");
                            if line.contains("Connection registered") {
                                connection_registered = true;
                            }
                            match classify_line(&line) {
                                LineClassification::Url(url) => {
                                    presumed_url = url.clone();
                                    break Ok(url);
                                }
                                LineClassification::Fatal(reason) => break Err(TunnelError::Fatal(reason)),
                                LineClassification::Informational => {}
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(pr_number = req.pr_number, error = %e, "failed reading tunnel stderr"),
                    }
                }
            }
        };

        let public_url = match detected {
            Ok(url) => url,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };

        info!(pr_number = req.pr_number, url = %public_url, "tunnel public url adopted");

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        spawn_lifecycle_task(req.pr_number, child, stdout_lines, stderr_lines, cmd_rx);

        Ok(TunnelHandle { pr_number: req.pr_number, public_url, started_at: Utc::now(), cmd_tx })
    }
}

fn spawn_lifecycle_task(
    pr_number: u64,
    mut child: Child,
    mut stdout_lines: tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
    mut stderr_lines: tokio::io::Lines<BufReader<tokio::process::ChildStderr>>,
    mut cmd_rx: mpsc::Receiver<Command_>,
) {
    tokio::spawn(async move {
        let mut last_health_ok = true;
        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    if let Ok(Some(line)) = line {
                        if let LineClassification::Fatal(reason) = classify_line(&line) {
                            warn!(pr_number, %reason, "tunnel reported a fatal condition after startup");
                        }
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Ok(Some(line)) = line {
                        if let LineClassification::Fatal(reason) = classify_line(&line) {
                            warn!(pr_number, %reason, "tunnel reported a fatal condition after startup");
                        }
                    }
                }
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command_::Stop(done)) => {
                            stop_child(pr_number, &mut child).await;
                            let _ = done.send(());
                            return;
                        }
                        Some(Command_::HealthCheck(reply)) => {
                            let _ = reply.send(last_health_ok);
                        }
                        Some(Command_::RecordProbe(ok)) => {
                            last_health_ok = ok;
                        }
                        None => return,
                    }
                }
                status = child.wait() => {
                    if let Ok(status) = status {
                        info!(pr_number, %status, "tunnel process exited");
                        last_health_ok = false;
                    }
                    return;
                }
            }
        }
    });
}

async fn stop_child(pr_number: u64, child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: `pid` is the live child's own pid.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    let graceful = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
    if graceful.is_err() {
        warn!(pr_number, "tunnel did not exit after SIGTERM, sending SIGKILL");
        let _ = child.start_kill();
        let _ = child.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_on_a_plain_process_completes() {
        let mut child = Command::new("sleep").arg("30").stdout(Stdio::null()).stderr(Stdio::null()).spawn().unwrap();
        stop_child(1, &mut child).await;
        assert!(child.try_wait().unwrap().is_some());
    }
}
