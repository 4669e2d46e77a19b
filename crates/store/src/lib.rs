//! Deployment record persistence and the deployment lifecycle state
//! machine.

pub mod error;
pub mod memory;
pub mod model;
pub mod redis_store;
pub mod state_machine;
pub mod trait_def;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use model::{DeploymentRecord, DeploymentStatus};
pub use redis_store::RedisStore;
pub use state_machine::{is_deletable_on_success, is_legal_transition};
pub use trait_def::DeploymentStore;
