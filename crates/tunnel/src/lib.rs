//! Tunnel process supervision: spawn the tunnel binary, classify its
//! output, adopt a public URL, and tear it down on destroy.

pub mod classify;
pub mod error;
pub mod health;
pub mod registry;
pub mod supervisor;

pub use classify::{classify_line, LineClassification};
pub use error::TunnelError;
pub use registry::TunnelRegistry;
pub use supervisor::{TunnelHandle, TunnelSpawnRequest, TunnelSupervisor};
