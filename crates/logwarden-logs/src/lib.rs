//! Log ingestion for logwarden
//!
//! This crate tails log files, filters error-bearing lines onto the work queue,
//! and provides the local classifier and heuristic analyzer used when the LLM
//! is unavailable.

mod classify;
mod fallback;
mod filter;
mod tailer;

pub use classify::{MODULES, classify_module, normalize_module};
pub use fallback::FallbackAnalyzer;
pub use filter::{DEFAULT_ERROR_KEYWORDS, KeywordFilter};
pub use tailer::{TailState, TailedFile, Tailer, qualifying_lines};

// Re-export types used in our public API
pub use logwarden_types::LogEvent;
