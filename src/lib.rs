//! Portfolio Agent
//!
//! A tool-calling assistant that answers questions about an investment
//! portfolio using only tool-sourced figures:
//! - Runs read-only portfolio tools on the model's behalf
//! - Verifies numeric accuracy and claim grounding before answering
//! - Retries a bounded number of times, then answers with caveats
//! - Computes FIFO realized gains deterministically
//! - Caps daily model spend
//!
//! TURN LOOP:
//! ATTEMPT(n) → VERIFY → RETRY? → FINALIZE

pub mod agent;
pub mod api;
pub mod budget;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod state;
pub mod tax;
pub mod tools;
pub mod verification;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use config::AgentConfig;
pub use error::{AgentError, ErrorKind};
pub use models::*;
