//! Daemon wiring: builds the backends from configuration and runs the
//! pipeline until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use logwarden_backends::{
    ChatCompletionsAnalyzer, Database, MailTransport, SendmailTransport, SpoolTransport,
    SqliteQueue, SqliteStore,
};
use logwarden_live::{Broadcaster, LiveServer};
use logwarden_logs::{KeywordFilter, Tailer};
use logwarden_report::{Scheduler, SchedulerConfig, SendLedger};
use logwarden_worker::{AnalysisWorker, RetryPolicy};

use crate::config::{Config, MailTransportKind};

pub fn open_database(config: &Config) -> Result<Database> {
    let path = &config.storage.path;
    Database::open(path).with_context(|| format!("opening database {}", path.display()))
}

pub fn build_analyzer(config: &Config) -> ChatCompletionsAnalyzer {
    let api_key = std::env::var(&config.llm.api_key_env).ok();
    ChatCompletionsAnalyzer::new(&config.llm.base_url, &config.llm.model, api_key)
        .with_temperature(config.llm.temperature)
}

pub fn build_transport(config: &Config) -> Arc<dyn MailTransport> {
    match config.mail.transport {
        MailTransportKind::Sendmail => Arc::new(SendmailTransport::new(&config.mail.sendmail_path)),
        MailTransportKind::Spool => Arc::new(SpoolTransport::new(&config.mail.spool_dir)),
    }
}

pub fn build_scheduler(config: &Config, store: Arc<SqliteStore>) -> Scheduler {
    let ledger = Arc::new(SendLedger::new(config.reports.ledger_path()));
    Scheduler::new(
        store,
        build_transport(config),
        ledger,
        SchedulerConfig {
            from: config.mail.from.clone(),
            reports_dir: config.reports.dir.clone(),
            watchdog_interval: Duration::from_secs(config.reports.watchdog_secs.max(1)),
        },
    )
}

/// Run tailer, worker, live server and scheduler until Ctrl-C
pub async fn run_daemon(config: Config) -> Result<()> {
    let db = open_database(&config)?;
    let queue = Arc::new(SqliteQueue::new(db.clone()));
    let store = Arc::new(SqliteStore::new(db));
    let cancel = CancellationToken::new();

    let analyzer = build_analyzer(&config);
    if !analyzer.has_api_key() {
        warn!(
            env = %config.llm.api_key_env,
            "no LLM API key set; every analysis will use the local heuristics"
        );
    }

    let broadcaster = Broadcaster::new();
    let server = LiveServer::bind(config.live.bind, broadcaster.clone())
        .await
        .with_context(|| format!("binding live updates to {}", config.live.bind))?;
    let server_task = tokio::spawn(server.run(cancel.clone()));

    let retry = RetryPolicy {
        max_retries: config.worker.max_retries,
        initial_backoff: Duration::from_millis(config.worker.initial_backoff_ms),
        call_timeout: Duration::from_secs(config.llm.timeout_secs),
    };
    let worker = AnalysisWorker::new(
        queue.clone(),
        &config.queue.name,
        Arc::new(analyzer),
        store.clone(),
        broadcaster,
    )
    .with_retry_policy(retry);
    let worker_task = tokio::spawn(worker.run(cancel.clone()));

    let mut tailer = Tailer::new();
    let watched = tailer
        .start(
            &config.tail.sources,
            KeywordFilter::new(config.tail.keywords.iter()),
            queue,
            &config.queue.name,
        )
        .await;
    if watched == 0 {
        warn!("none of the configured log sources exist; nothing is being tailed");
    }

    let scheduler = build_scheduler(&config, store);
    scheduler.start().await.context("starting report scheduler")?;

    info!(sources = watched, "logwarden running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");

    cancel.cancel();
    tailer.stop();
    scheduler.stop().await;
    let _ = worker_task.await;
    let _ = server_task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_backends::AnalysisStore;
    use logwarden_types::{Frequency, ReportSchedule};

    #[tokio::test]
    async fn test_schedule_survives_separate_opens() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("state").join("logwarden.db");

        let schedule = ReportSchedule {
            email: "ops@example.com".to_string(),
            frequency: Frequency::Hourly,
            ..ReportSchedule::default()
        };
        let writer = SqliteStore::new(open_database(&config).unwrap());
        writer.upsert_schedule(schedule.clone()).await.unwrap();
        drop(writer);

        let reader = SqliteStore::new(open_database(&config).unwrap());
        assert_eq!(reader.get_schedule().await.unwrap(), Some(schedule));
    }
}
