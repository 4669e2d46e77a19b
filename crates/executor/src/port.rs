//! Free-port allocation by randomized, bounded-concurrency TCP probing.
//!
//! Bounds concurrent async fan-out with
//! `futures::stream::StreamExt::buffer_unordered`.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use rand::thread_rng;
use tokio::net::TcpListener;

use crate::error::ExecutorError;

/// Probe for a free port in `[range.0, range.1]`, excluding `in_use`
/// (ports already bound to other running previews), with up to
/// `max_attempts` randomized probes at `concurrency` and a short timeout
/// per probe.
pub async fn allocate_port(
    range: (u16, u16),
    in_use: &[u16],
    concurrency: usize,
    max_attempts: u32,
    probe_timeout: Duration,
) -> Result<u16, ExecutorError> {
    let mut candidates: Vec<u16> = (range.0..=range.1).filter(|p| !in_use.contains(p)).collect();
    candidates.shuffle(&mut thread_rng());
    candidates.truncate(max_attempts as usize);

    if candidates.is_empty() {
        return Err(ExecutorError::NoFreePort);
    }

    let mut results = stream::iter(candidates)
        .map(|port| async move { (port, probe_port(port, probe_timeout).await) })
        .buffer_unordered(concurrency);

    while let Some((port, is_free)) = results.next().await {
        if is_free {
            return Ok(port);
        }
    }

    Err(ExecutorError::NoFreePort)
}

/// A port is "free" if we can bind it; the listener is dropped immediately
/// so the caller's subsequent container run can bind it for real.
async fn probe_port(port: u16, probe_timeout: Duration) -> bool {
    let bind = TcpListener::bind(("127.0.0.1", port));
    matches!(tokio::time::timeout(probe_timeout, bind).await, Ok(Ok(_listener)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_a_port_within_range() {
        let port = allocate_port((40000, 40050), &[], 8, 50, Duration::from_millis(250)).await.unwrap();
        assert!((40000..=40050).contains(&port));
    }

    #[tokio::test]
    async fn excludes_ports_already_in_use() {
        let listener = TcpListener::bind("127.0.0.1:40100").await.unwrap();
        let bound_port = listener.local_addr().unwrap().port();

        let port =
            allocate_port((40100, 40101), &[], 8, 50, Duration::from_millis(250)).await;
        drop(listener);

        // With the listener alive, bind on 40100 fails; 40101 should still
        // succeed within the attempt budget.
        if let Ok(p) = port {
            assert_ne!(p, bound_port);
        }
    }

    #[tokio::test]
    async fn empty_candidate_set_is_no_free_port() {
        let in_use: Vec<u16> = (40200..=40200).collect();
        let result = allocate_port((40200, 40200), &in_use, 8, 50, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ExecutorError::NoFreePort)));
    }
}
