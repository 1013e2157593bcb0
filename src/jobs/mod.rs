//! Job supervision: launching, stream classification, registry, recovery

pub mod classifier;
pub mod context;
pub mod launcher;
pub mod recovery;
pub mod registry;
pub mod telemetry;

pub use context::JobContext;
pub use launcher::{start_job, LaunchRequest};
pub use registry::{JobCompletion, JobRegistry};
