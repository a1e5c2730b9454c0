use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{OptionalExtension, Row, params};

use logwarden_types::{
    AnalysisId, AnalysisRecord, Breakdown, ModuleCount, NewAnalysis, ReportSchedule, TimeWindow,
};

use crate::db::Database;
use crate::error::{BackendError, Result};

/// Persistence for analyses and the report schedule
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persist a new analysis, returning its id and creation time
    async fn create_analysis(&self, analysis: NewAnalysis) -> Result<(AnalysisId, DateTime<Utc>)>;

    async fn find_analysis_by_id(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>>;

    /// Per-module counts inside the window, largest first
    async fn group_analyses_by_module(&self, window: TimeWindow) -> Result<Vec<ModuleCount>>;

    /// Most recent analyses of one module inside the window
    async fn list_analyses_for_module(
        &self,
        module: &str,
        window: TimeWindow,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>>;

    async fn get_schedule(&self) -> Result<Option<ReportSchedule>>;

    async fn upsert_schedule(&self, schedule: ReportSchedule) -> Result<()>;
}

const RECORD_COLUMNS: &str = "id, log_message, source_path, module, breakdown, possible_cause, \
                              actionable_steps, origin, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn count_analyses(&self) -> Result<u64> {
        self.db
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
    }

    /// Newest analyses first, optionally restricted to modules containing `module`
    pub async fn list_recent(
        &self,
        module: Option<String>,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>> {
        self.db
            .call(move |conn| {
                let pattern = module.map(|m| format!("%{}%", m));
                let sql = format!(
                    "SELECT {} FROM analyses WHERE (?1 IS NULL OR module LIKE ?1) \
                     ORDER BY created_at DESC, id DESC LIMIT ?2",
                    RECORD_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![pattern, limit], raw_record)?;
                collect_records(rows)
            })
            .await
    }
}

#[async_trait]
impl AnalysisStore for SqliteStore {
    async fn create_analysis(&self, analysis: NewAnalysis) -> Result<(AnalysisId, DateTime<Utc>)> {
        let breakdown = serde_json::to_string(&analysis.analysis.breakdown)?;
        let steps = serde_json::to_string(&analysis.analysis.actionable_steps)?;
        self.db
            .call(move |conn| {
                let created_at = Utc::now();
                conn.execute(
                    "INSERT INTO analyses (log_message, source_path, module, breakdown, \
                     possible_cause, actionable_steps, origin, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        analysis.log_message,
                        analysis.source_path,
                        analysis.module,
                        breakdown,
                        analysis.analysis.possible_cause,
                        steps,
                        analysis.origin.as_str(),
                        created_at.timestamp_millis(),
                    ],
                )?;
                Ok((AnalysisId(conn.last_insert_rowid()), millis_to_utc(created_at.timestamp_millis())))
            })
            .await
    }

    async fn find_analysis_by_id(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>> {
        self.db
            .call(move |conn| {
                let sql = format!("SELECT {} FROM analyses WHERE id = ?1", RECORD_COLUMNS);
                let raw = conn
                    .query_row(&sql, params![id.0], raw_record)
                    .optional()?;
                raw.map(RawRecord::into_record).transpose()
            })
            .await
    }

    async fn group_analyses_by_module(&self, window: TimeWindow) -> Result<Vec<ModuleCount>> {
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT module, COUNT(*) AS n FROM analyses \
                     WHERE created_at >= ?1 AND created_at <= ?2 \
                     GROUP BY module ORDER BY n DESC, module ASC",
                )?;
                let rows = stmt.query_map(
                    params![window.start.timestamp_millis(), window.end.timestamp_millis()],
                    |row| {
                        Ok(ModuleCount {
                            module: row.get(0)?,
                            count: row.get::<_, i64>(1)? as u64,
                        })
                    },
                )?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    async fn list_analyses_for_module(
        &self,
        module: &str,
        window: TimeWindow,
        limit: u32,
    ) -> Result<Vec<AnalysisRecord>> {
        let module = module.to_string();
        self.db
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM analyses WHERE module = ?1 \
                     AND created_at >= ?2 AND created_at <= ?3 \
                     ORDER BY created_at DESC, id DESC LIMIT ?4",
                    RECORD_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    params![
                        module,
                        window.start.timestamp_millis(),
                        window.end.timestamp_millis(),
                        limit
                    ],
                    raw_record,
                )?;
                collect_records(rows)
            })
            .await
    }

    async fn get_schedule(&self) -> Result<Option<ReportSchedule>> {
        self.db
            .call(|conn| {
                let row: Option<(String, String, String, i64)> = conn
                    .query_row(
                        "SELECT email, frequency, time_of_day, samples_per_module \
                         FROM report_schedule WHERE id = 1",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                    )
                    .optional()?;
                let Some((email, frequency, time_of_day, samples)) = row else {
                    return Ok(None);
                };
                Ok(Some(ReportSchedule {
                    email,
                    frequency: frequency.parse().map_err(BackendError::Corrupt)?,
                    time_of_day: time_of_day.parse().map_err(BackendError::Corrupt)?,
                    samples_per_module: samples.max(0) as u32,
                }))
            })
            .await
    }

    async fn upsert_schedule(&self, schedule: ReportSchedule) -> Result<()> {
        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO report_schedule (id, email, frequency, time_of_day, samples_per_module) \
                     VALUES (1, ?1, ?2, ?3, ?4) \
                     ON CONFLICT(id) DO UPDATE SET email = excluded.email, \
                     frequency = excluded.frequency, time_of_day = excluded.time_of_day, \
                     samples_per_module = excluded.samples_per_module",
                    params![
                        schedule.email,
                        schedule.frequency.as_str(),
                        schedule.time_of_day.to_string(),
                        schedule.samples_per_module,
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

/// Row as stored, before the JSON columns are decoded
struct RawRecord {
    id: i64,
    log_message: String,
    source_path: String,
    module: String,
    breakdown: String,
    possible_cause: String,
    actionable_steps: String,
    origin: String,
    created_at: i64,
}

impl RawRecord {
    fn into_record(self) -> Result<AnalysisRecord> {
        let breakdown: Breakdown = serde_json::from_str(&self.breakdown)?;
        let actionable_steps: Vec<String> = serde_json::from_str(&self.actionable_steps)?;
        Ok(AnalysisRecord {
            id: AnalysisId(self.id),
            log_message: self.log_message,
            source_path: self.source_path,
            module: self.module,
            breakdown,
            possible_cause: self.possible_cause,
            actionable_steps,
            origin: self.origin.parse().map_err(BackendError::Corrupt)?,
            created_at: millis_to_utc(self.created_at),
        })
    }
}

fn raw_record(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        log_message: row.get(1)?,
        source_path: row.get(2)?,
        module: row.get(3)?,
        breakdown: row.get(4)?,
        possible_cause: row.get(5)?,
        actionable_steps: row.get(6)?,
        origin: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawRecord>>,
) -> Result<Vec<AnalysisRecord>> {
    rows.map(|raw| raw.map_err(BackendError::from).and_then(RawRecord::into_record))
        .collect()
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}
