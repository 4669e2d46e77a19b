//! Build and Destroy executors: clone, image build/run, port allocation,
//! readiness/tunnel probing, and teardown.

pub mod build;
pub mod clone;
pub mod destroy;
pub mod engine;
pub mod error;
pub mod port;
pub mod probe;
pub mod progress;

pub use build::{BuildExecutor, BuildInput, BuildOutcome};
pub use destroy::{DestroyExecutor, DestroyInput, DestroyReport};
pub use engine::ContainerEngine;
pub use error::ExecutorError;
pub use progress::{NoopProgress, ProgressReporter};
