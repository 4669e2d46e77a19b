//! Durable job queue: priorities, retries with backoff, dead-letter,
//! stall detection.

pub mod error;
pub mod memory;
pub mod model;
pub mod redis_queue;
pub mod trait_def;

pub use error::QueueError;
pub use memory::MemoryQueue;
pub use model::{
    is_non_retryable, BuildJobPayload, CleanupStalePayload, DestroyJobPayload, Job, JobKind, JobStatus, Priority,
};
pub use redis_queue::RedisQueue;
pub use trait_def::{JobQueue, QueueStats};
