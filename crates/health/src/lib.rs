//! Health snapshot computation and the stale-deployment sweeper.

pub mod snapshot;
pub mod sweeper;

pub use snapshot::{
    compute_snapshot, read_resident_memory_bytes, read_total_memory_bytes, HealthSnapshot, ProcessClock, Status,
    StatusCounts,
};
pub use sweeper::Sweeper;
