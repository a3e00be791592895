//! Batch command execution: the executor seam and the bounded-concurrency
//! scheduler.

pub mod executor;
pub mod scheduler;

pub use executor::CommandExecutor;
pub use scheduler::CommandScheduler;
