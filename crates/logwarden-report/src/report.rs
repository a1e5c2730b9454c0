use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use tracing::debug;

use logwarden_backends::AnalysisStore;
use logwarden_types::{AnalysisRecord, Frequency, TimeWindow};

use crate::error::Result;

/// One module's slice of a report
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleSection {
    pub module: String,
    pub count: u64,
    /// Most recent records first
    pub samples: Vec<AnalysisRecord>,
}

/// Grouped analyses for one reporting window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub frequency: Frequency,
    pub window: TimeWindow,
    pub samples_per_module: u32,
    /// Ordered by descending count
    pub modules: Vec<ModuleSection>,
}

impl Report {
    pub fn total(&self) -> u64 {
        self.modules.iter().map(|m| m.count).sum()
    }

    /// No analyses in the window
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// The window a report of this frequency covers, ending at `now`: the last
/// hour, or since local midnight, the start of the week (Sunday) or the first
/// of the month.
pub fn report_window<Tz: TimeZone>(frequency: Frequency, now: &DateTime<Tz>) -> TimeWindow {
    let end = now.with_timezone(&Utc);
    let today = now.date_naive();

    let start_date = match frequency {
        Frequency::Hourly => return TimeWindow::new(end - Duration::hours(1), end),
        Frequency::Daily => today,
        Frequency::Weekly => today - Duration::days(i64::from(today.weekday().num_days_from_sunday())),
        Frequency::Monthly => today.with_day(1).unwrap_or(today),
    };

    TimeWindow::new(local_midnight(&now.timezone(), start_date).min(end), end)
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Builds reports from the analysis store
#[derive(Clone)]
pub struct ReportGenerator {
    store: Arc<dyn AnalysisStore>,
}

impl ReportGenerator {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    pub async fn generate<Tz: TimeZone>(
        &self,
        frequency: Frequency,
        samples_per_module: u32,
        now: &DateTime<Tz>,
    ) -> Result<Report> {
        let window = report_window(frequency, now);
        let counts = self.store.group_analyses_by_module(window).await?;
        debug!(%frequency, modules = counts.len(), start = %window.start, "generating report");

        let mut modules = Vec::with_capacity(counts.len());
        for count in counts {
            let samples = self
                .store
                .list_analyses_for_module(&count.module, window, samples_per_module)
                .await?;
            modules.push(ModuleSection {
                module: count.module,
                count: count.count,
                samples,
            });
        }

        Ok(Report {
            frequency,
            window,
            samples_per_module,
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_backends::{Database, SqliteStore};
    use logwarden_types::{AnalysisOrigin, LlmAnalysis, NewAnalysis};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_windows() {
        // Wednesday
        let now = at(2024, 3, 13, 15, 30);
        assert_eq!(report_window(Frequency::Hourly, &now).start, at(2024, 3, 13, 14, 30));
        assert_eq!(report_window(Frequency::Daily, &now).start, at(2024, 3, 13, 0, 0));
        assert_eq!(report_window(Frequency::Weekly, &now).start, at(2024, 3, 10, 0, 0));
        assert_eq!(report_window(Frequency::Monthly, &now).start, at(2024, 3, 1, 0, 0));
        assert_eq!(report_window(Frequency::Monthly, &now).end, now);
    }

    #[test]
    fn test_weekly_window_on_sunday_starts_today() {
        let now = at(2024, 3, 10, 8, 0);
        assert_eq!(report_window(Frequency::Weekly, &now).start, at(2024, 3, 10, 0, 0));
    }

    async fn insert(store: &SqliteStore, module: &str, line: &str) {
        store
            .create_analysis(NewAnalysis {
                log_message: line.to_string(),
                source_path: "/var/log/syslog".to_string(),
                module: module.to_string(),
                analysis: LlmAnalysis::default(),
                origin: AnalysisOrigin::Fallback,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_groups_and_samples() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        for i in 0..4 {
            insert(&store, "wifi", &format!("wlan0: error {}", i)).await;
        }
        insert(&store, "kernel", "kernel: ERROR disk failure").await;

        let generator = ReportGenerator::new(Arc::new(store));
        let report = generator
            .generate(Frequency::Hourly, 2, &Utc::now())
            .await
            .unwrap();

        assert_eq!(report.total(), 5);
        assert_eq!(report.modules[0].module, "wifi");
        assert_eq!(report.modules[0].count, 4);
        assert_eq!(report.modules[0].samples.len(), 2);
        assert_eq!(report.modules[0].samples[0].log_message, "wlan0: error 3");
        assert_eq!(report.modules[1].module, "kernel");
    }

    #[tokio::test]
    async fn test_empty_report() {
        let store = SqliteStore::new(Database::open_in_memory().unwrap());
        let generator = ReportGenerator::new(Arc::new(store));
        let report = generator
            .generate(Frequency::Daily, 3, &Utc::now())
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(report.total(), 0);
    }
}
