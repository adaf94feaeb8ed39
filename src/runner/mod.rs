//! Process runner — invokes the external agent CLI and maps raw process
//! output into structured outcomes.

pub mod command;
pub mod outcome;
pub mod process;

pub use command::CommandPlan;
pub use outcome::{CostMetrics, WorkerOutcome};
pub use process::{CliRunner, WorkerRunner};
