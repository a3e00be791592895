//! Subprocess transport: launching, framing, and supervising agent
//! processes.
//!
//! Submodules:
//! - `codec`: capped NDJSON line framing for stdout.
//! - `launch`: launch-spec construction from request options.
//! - `supervisor`: process lifecycle ownership and resource release.

pub mod codec;
pub mod launch;
pub mod supervisor;

pub use launch::LaunchSpec;
pub use supervisor::{LineStream, ProcessHandle, ProcessState, ProcessSupervisor};
