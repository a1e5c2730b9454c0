//! Shared types for logwarden
//!
//! This crate contains data structures used across multiple logwarden crates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Ingestion Types
// ============================================================================

/// A single error-bearing line observed in a tailed file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    /// File the line was read from
    pub source_path: String,

    /// The line as read, without the trailing newline
    pub raw_line: String,

    /// When the tailer saw the line
    pub observed_at: DateTime<Utc>,
}

impl LogEvent {
    pub fn new(source_path: impl Into<String>, raw_line: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            raw_line: raw_line.into(),
            observed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Analysis Types
// ============================================================================

/// Store-assigned handle of a persisted analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnalysisId(pub i64);

impl fmt::Display for AnalysisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key components extracted from a log line
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakdown {
    pub timestamp: String,
    pub timezone: String,
    pub module: String,
    #[serde(alias = "pci_device", alias = "pciDevice")]
    pub device: String,
    #[serde(alias = "error_message")]
    pub error_message: String,
}

/// The analysis body, as produced by the LLM or by the fallback heuristics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmAnalysis {
    pub breakdown: Breakdown,
    #[serde(alias = "possible_cause")]
    pub possible_cause: String,
    #[serde(alias = "actionable_steps", default)]
    pub actionable_steps: Vec<String>,
}

/// Which path produced an analysis
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisOrigin {
    Llm,
    Fallback,
}

impl AnalysisOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Fallback => "fallback",
        }
    }
}

impl FromStr for AnalysisOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "fallback" => Ok(Self::Fallback),
            other => Err(format!("unknown analysis origin '{}'", other)),
        }
    }
}

/// An analysis that has not been persisted yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAnalysis {
    pub log_message: String,
    pub source_path: String,
    pub module: String,
    pub analysis: LlmAnalysis,
    pub origin: AnalysisOrigin,
}

/// A persisted analysis. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: AnalysisId,
    pub log_message: String,
    pub source_path: String,
    pub module: String,
    pub breakdown: Breakdown,
    pub possible_cause: String,
    pub actionable_steps: Vec<String>,
    pub origin: AnalysisOrigin,
    pub created_at: DateTime<Utc>,
}

impl AnalysisRecord {
    /// Build the record the store hands back after an insert
    pub fn from_new(id: AnalysisId, created_at: DateTime<Utc>, new: NewAnalysis) -> Self {
        Self {
            id,
            log_message: new.log_message,
            source_path: new.source_path,
            module: new.module,
            breakdown: new.analysis.breakdown,
            possible_cause: new.analysis.possible_cause,
            actionable_steps: new.analysis.actionable_steps,
            origin: new.origin,
            created_at,
        }
    }

    /// The compact payload pushed to real-time clients
    pub fn live_update(&self) -> LiveUpdate {
        LiveUpdate {
            event_id: self.id,
            log_message: self.log_message.clone(),
            created_at: self.created_at,
        }
    }
}

/// What real-time clients receive for each completed analysis
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveUpdate {
    pub event_id: AnalysisId,
    pub log_message: String,
    pub created_at: DateTime<Utc>,
}

/// Count of analyses for one module inside a window
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleCount {
    pub module: String,
    pub count: u64,
}

/// Half-open on neither side: `start <= t <= end`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

// ============================================================================
// Report Schedule Types
// ============================================================================

/// Report cadence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub const ALL: [Frequency; 4] = [Self::Hourly, Self::Daily, Self::Weekly, Self::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// Minimum time between two sends of this class. Always shorter than the
    /// nominal period so a legitimate send is never skipped.
    pub fn refractory_window(&self) -> Duration {
        match self {
            Self::Hourly => Duration::minutes(30),
            Self::Daily => Duration::hours(12),
            Self::Weekly => Duration::days(3),
            Self::Monthly => Duration::days(10),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unknown report frequency '{}'", other)),
        }
    }
}

/// Wall-clock time of day in `HH:MM` form
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    pub hour: u32,
    pub minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Minutes since midnight
    pub fn minute_of_day(&self) -> u32 {
        self.hour * 60 + self.minute
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self { hour: 9, minute: 0 }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("time '{}' is not in HH:MM form", s))?;
        let hour = h.parse().map_err(|_| format!("invalid hour in '{}'", s))?;
        let minute = m.parse().map_err(|_| format!("invalid minute in '{}'", s))?;
        Self::new(hour, minute).ok_or_else(|| format!("time '{}' is out of range", s))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Singleton report configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSchedule {
    pub email: String,
    pub frequency: Frequency,
    pub time_of_day: TimeOfDay,
    pub samples_per_module: u32,
}

impl ReportSchedule {
    /// A schedule with no recipient never sends
    pub fn has_recipient(&self) -> bool {
        !self.email.trim().is_empty()
    }
}

impl Default for ReportSchedule {
    fn default() -> Self {
        Self {
            email: String::new(),
            frequency: Frequency::Daily,
            time_of_day: TimeOfDay::default(),
            samples_per_module: 3,
        }
    }
}

/// Last successful send of one frequency class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRecord {
    pub frequency: Frequency,
    pub last_sent_at: DateTime<Utc>,
}

impl SendRecord {
    /// Whether another send of this class would fall inside the refractory window
    pub fn blocks_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_sent_at) < self.frequency.refractory_window()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day_parse() {
        let t: TimeOfDay = "07:05".parse().unwrap();
        assert_eq!(t, TimeOfDay { hour: 7, minute: 5 });
        assert_eq!(t.to_string(), "07:05");
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("9".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn test_refractory_shorter_than_period() {
        let periods = [
            (Frequency::Hourly, Duration::hours(1)),
            (Frequency::Daily, Duration::days(1)),
            (Frequency::Weekly, Duration::weeks(1)),
            (Frequency::Monthly, Duration::days(28)),
        ];
        for (frequency, period) in periods {
            assert!(frequency.refractory_window() < period, "{}", frequency);
        }
    }

    #[test]
    fn test_send_record_blocks() {
        let now = Utc::now();
        let record = SendRecord {
            frequency: Frequency::Daily,
            last_sent_at: now - Duration::hours(2),
        };
        assert!(record.blocks_at(now));
        assert!(!record.blocks_at(now + Duration::hours(11)));
    }

    #[test]
    fn test_log_event_json_shape() {
        let event = LogEvent::new("/var/log/syslog", "kernel: ERROR disk failure");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sourcePath"], "/var/log/syslog");
        assert_eq!(json["rawLine"], "kernel: ERROR disk failure");
        assert!(json.get("observedAt").is_some());
    }

    #[test]
    fn test_breakdown_accepts_snake_case() {
        let json = r#"{"timestamp":"t","timezone":"UTC","module":"kernel","pci_device":"00:1f.2","error_message":"boom"}"#;
        let breakdown: Breakdown = serde_json::from_str(json).unwrap();
        assert_eq!(breakdown.device, "00:1f.2");
        assert_eq!(breakdown.error_message, "boom");
    }
}
