#![forbid(unsafe_code)]

//! `agent-conduit` — typed streaming transport for an AI coding assistant
//! CLI.
//!
//! The crate mediates between a typed request/response API and a long-lived
//! external CLI process: it launches and supervises the process, turns its
//! newline-delimited JSON output into typed streaming events while output
//! is still being produced, and executes batches of logical commands with
//! ordering and bounded-concurrency guarantees.

pub mod batch;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod session;
pub mod stream;
pub mod transport;

pub use client::Client;
pub use config::ConduitConfig;
pub use errors::{ConduitError, Result};
