//! Scheduled error reports for logwarden
//!
//! Groups stored analyses by module over a frequency-dependent window, renders
//! them as HTML and mails them on a schedule. A durable send ledger guarantees
//! at most one send per frequency inside its refractory window, even with the
//! cron timer and the watchdog racing each other.

mod error;
mod ledger;
mod render;
mod report;
mod schedule;
mod scheduler;

pub use error::{ReportError, Result};
pub use ledger::{LedgerGuard, SendLedger};
pub use render::{period_description, render_html, subject};
pub use report::{ModuleSection, Report, ReportGenerator, report_window};
pub use schedule::{MATCH_TOLERANCE_MINUTES, is_due, next_fire_after};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerState, SendOutcome};
