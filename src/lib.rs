//! Agent Pool — async pool manager for CLI agent subprocess workers.

pub mod config;
pub mod error;
pub mod permission;
pub mod registry;
pub mod runner;
pub mod sink;

pub use config::PoolConfig;
pub use error::{Error, Result};
pub use registry::{
    CompletedWorker, WaitReport, WorkerOptions, WorkerRegistry, WorkerSpec, WorkerState,
};
pub use runner::{WorkerOutcome, WorkerRunner};
