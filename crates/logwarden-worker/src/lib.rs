//! Analysis worker for logwarden
//!
//! Pops log events, asks the LLM for an analysis with bounded retries, falls
//! back to local heuristics, persists the result and broadcasts it.

mod breaker;
mod error;
mod retry;
mod worker;

pub use breaker::CircuitBreaker;
pub use error::WorkerError;
pub use retry::{RetryPolicy, analyze_with_retry};
pub use worker::AnalysisWorker;
