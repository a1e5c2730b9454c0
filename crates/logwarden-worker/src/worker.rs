use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logwarden_backends::{AnalysisStore, Analyzer, WorkQueue};
use logwarden_live::Broadcaster;
use logwarden_logs::{FallbackAnalyzer, classify_module, normalize_module};
use logwarden_types::{AnalysisOrigin, AnalysisRecord, LogEvent, NewAnalysis};

use crate::breaker::CircuitBreaker;
use crate::error::WorkerError;
use crate::retry::{RetryPolicy, analyze_with_retry};

/// Single consumer of the log queue: analyse, persist, broadcast
pub struct AnalysisWorker {
    queue: Arc<dyn WorkQueue>,
    queue_name: String,
    analyzer: Arc<dyn Analyzer>,
    store: Arc<dyn AnalysisStore>,
    broadcaster: Broadcaster,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl AnalysisWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        queue_name: impl Into<String>,
        analyzer: Arc<dyn Analyzer>,
        store: Arc<dyn AnalysisStore>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            analyzer,
            store,
            broadcaster,
            retry: RetryPolicy::default(),
            breaker: CircuitBreaker::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pop and process events until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(queue = %self.queue_name, "analysis worker started");

        loop {
            let popped = tokio::select! {
                _ = cancel.cancelled() => break,
                popped = self.queue.blocking_pop(&self.queue_name) => popped,
            };

            let result = match popped {
                Ok(None) => continue,
                Ok(Some(payload)) => self.process(payload).await,
                Err(e) => Err(WorkerError::Queue(e)),
            };

            match result {
                Ok(_) => self.breaker.record_success(),
                Err(e) => {
                    let pause = self.breaker.record_failure();
                    warn!(
                        error = %e,
                        consecutive_failures = self.breaker.consecutive_failures(),
                        pause_secs = pause.as_secs(),
                        "analysis cycle failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(pause) => {}
                    }
                }
            }
        }

        info!("analysis worker stopped");
    }

    /// One cycle for a popped payload. A persistence failure abandons the
    /// event; it is not re-queued.
    pub async fn process(&self, payload: Value) -> Result<AnalysisRecord, WorkerError> {
        let event: LogEvent = serde_json::from_value(payload)?;
        let line = event.raw_line;

        let (analysis, origin) =
            match analyze_with_retry(self.analyzer.as_ref(), &line, &self.retry).await {
                Ok(analysis) => (analysis, AnalysisOrigin::Llm),
                Err(e) => {
                    warn!(error = %e, "LLM analysis unavailable; using heuristics");
                    (FallbackAnalyzer::analyze(&line), AnalysisOrigin::Fallback)
                }
            };

        let module = normalize_module(&analysis.breakdown.module)
            .unwrap_or_else(|| classify_module(&line))
            .to_string();

        let new = NewAnalysis {
            log_message: line,
            source_path: event.source_path,
            module,
            analysis,
            origin,
        };
        let (id, created_at) = self
            .store
            .create_analysis(new.clone())
            .await
            .map_err(WorkerError::Persist)?;
        let record = AnalysisRecord::from_new(id, created_at, new);

        let delivered = self.broadcaster.broadcast(&record.live_update());
        debug!(id = %record.id, module = %record.module, origin = record.origin.as_str(), delivered, "analysis stored");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use logwarden_backends::{AnalysisError, Database, SqliteQueue, SqliteStore};
    use logwarden_types::{Breakdown, LiveUpdate, LlmAnalysis};
    use std::time::Duration;

    struct AlwaysRateLimited;

    #[async_trait]
    impl Analyzer for AlwaysRateLimited {
        async fn analyze(&self, _log_line: &str) -> Result<LlmAnalysis, AnalysisError> {
            Err(AnalysisError::RateLimited { retry_after: None })
        }
    }

    struct Answers(&'static str);

    #[async_trait]
    impl Analyzer for Answers {
        async fn analyze(&self, _log_line: &str) -> Result<LlmAnalysis, AnalysisError> {
            Ok(LlmAnalysis {
                breakdown: Breakdown {
                    module: self.0.to_string(),
                    error_message: "timeout".to_string(),
                    ..Breakdown::default()
                },
                possible_cause: "access point out of range".to_string(),
                actionable_steps: vec!["move closer".to_string()],
            })
        }
    }

    fn worker(analyzer: Arc<dyn Analyzer>) -> (AnalysisWorker, Arc<SqliteQueue>, SqliteStore, Broadcaster) {
        let db = Database::open_in_memory().unwrap();
        let queue = Arc::new(SqliteQueue::new(db.clone()));
        let store = SqliteStore::new(db);
        let broadcaster = Broadcaster::new();
        let worker = AnalysisWorker::new(
            queue.clone(),
            "logs",
            analyzer,
            Arc::new(store.clone()),
            broadcaster.clone(),
        );
        (worker, queue, store, broadcaster)
    }

    fn payload(line: &str) -> Value {
        serde_json::to_value(LogEvent::new("/var/log/syslog", line)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_when_llm_unreachable() {
        let (worker, _, store, _) = worker(Arc::new(AlwaysRateLimited));

        let record = worker
            .process(payload("bluetooth: Failed to pair device"))
            .await
            .unwrap();

        assert_eq!(record.origin, AnalysisOrigin::Fallback);
        assert_eq!(record.breakdown.module, "bluetooth");
        assert!(record.breakdown.error_message.contains("Failed to pair device"));

        let stored = store.find_analysis_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn test_llm_module_is_normalized_and_broadcast() {
        let (worker, _, _, broadcaster) = worker(Arc::new(Answers("wpa_supplicant wifi")));
        let (_, mut rx) = broadcaster.connect();

        let record = worker.process(payload("wlan0: error: auth timeout")).await.unwrap();
        assert_eq!(record.origin, AnalysisOrigin::Llm);
        assert_eq!(record.module, "wifi");

        let update: LiveUpdate = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(update.event_id, record.id);
        assert_eq!(update.log_message, "wlan0: error: auth timeout");
    }

    #[tokio::test]
    async fn test_unknown_llm_module_uses_classifier() {
        let (worker, _, _, _) = worker(Arc::new(Answers("systemd")));
        let record = worker.process(payload("dbus-daemon: error: fail")).await.unwrap();
        assert_eq!(record.module, "ipc-bus");
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_an_error() {
        let (worker, _, _, _) = worker(Arc::new(Answers("kernel")));
        let result = worker.process(serde_json::json!("not an event")).await;
        assert!(matches!(result, Err(WorkerError::Decode(_))));
    }

    #[tokio::test]
    async fn test_run_consumes_queue_until_cancelled() {
        let (worker, queue, store, broadcaster) = worker(Arc::new(Answers("kernel")));
        let (_, mut rx) = broadcaster.connect();
        queue.push("logs", payload("kernel: ERROR disk failure")).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        let update = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(update.contains("kernel: ERROR disk failure"));

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(store.count_analyses().await.unwrap(), 1);
        assert_eq!(queue.len("logs").await.unwrap(), 0);
    }
}
