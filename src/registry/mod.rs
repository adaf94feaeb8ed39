//! Worker registry: records, specs, and the pool orchestrator.

pub mod registry;
pub mod spec;
pub mod state;

pub use registry::{
    CompletedWorker, RegistryEvent, RegistrySummary, WaitReport, WorkerRegistry,
};
pub use spec::{WorkerOptions, WorkerSpec};
pub use state::{WorkerRecord, WorkerState};
