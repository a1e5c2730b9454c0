//! Backends for logwarden
//!
//! This crate holds the collaborators the pipeline talks to: the durable work
//! queue, analysis storage, the LLM client and outbound mail. Each sits behind
//! a trait so the pipeline crates can be tested against fakes.

mod db;
mod error;
mod llm;
mod mail;
mod queue;
mod store;

pub use db::Database;
pub use error::{BackendError, Result};
pub use llm::{
    AnalysisError, Analyzer, ChatCompletionsAnalyzer, DEFAULT_BASE_URL, DEFAULT_MODEL,
    parse_analysis, parse_retry_after,
};
pub use mail::{Attachment, MailMessage, MailTransport, SendmailTransport, SpoolTransport, render_mime};
pub use queue::{SqliteQueue, WorkQueue};
pub use store::{AnalysisStore, SqliteStore};

// Re-export types used in our public API
pub use logwarden_types::{
    AnalysisId, AnalysisRecord, LlmAnalysis, ModuleCount, NewAnalysis, ReportSchedule, TimeWindow,
};
