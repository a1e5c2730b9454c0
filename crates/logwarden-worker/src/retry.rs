use std::time::Duration;

use tracing::warn;

use logwarden_backends::{AnalysisError, Analyzer};
use logwarden_types::LlmAnalysis;

/// Bounds for the analysis call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// First backoff delay; doubles after every retry
    pub initial_backoff: Duration,

    /// Limit on a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Run the analysis with bounded retries.
///
/// Rate limits wait for the server's hint when there is one, otherwise for the
/// current backoff. Timeouts wait for the backoff. Any other error is returned
/// straight away.
pub async fn analyze_with_retry(
    analyzer: &dyn Analyzer,
    log_line: &str,
    policy: &RetryPolicy,
) -> Result<LlmAnalysis, AnalysisError> {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        let result = tokio::time::timeout(policy.call_timeout, analyzer.analyze(log_line))
            .await
            .unwrap_or(Err(AnalysisError::Timeout));

        let err = match result {
            Ok(analysis) => return Ok(analysis),
            Err(err) if !err.is_retryable() || attempt >= policy.max_retries => return Err(err),
            Err(err) => err,
        };

        let wait = match &err {
            AnalysisError::RateLimited {
                retry_after: Some(hint),
            } => *hint,
            _ => backoff,
        };
        attempt += 1;
        warn!(
            attempt,
            max_retries = policy.max_retries,
            wait_ms = wait.as_millis() as u64,
            error = %err,
            "analysis call failed; retrying"
        );
        tokio::time::sleep(wait).await;
        backoff = backoff.saturating_mul(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;

    /// Plays back scripted results, then succeeds
    struct Scripted {
        results: Mutex<VecDeque<Result<LlmAnalysis, AnalysisError>>>,
        calls: Mutex<u32>,
        hang: Option<Duration>,
    }

    impl Scripted {
        fn new(results: Vec<Result<LlmAnalysis, AnalysisError>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(0),
                hang: None,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Analyzer for Scripted {
        async fn analyze(&self, _log_line: &str) -> Result<LlmAnalysis, AnalysisError> {
            *self.calls.lock() += 1;
            if let Some(hang) = self.hang {
                tokio::time::sleep(hang).await;
            }
            let next = self.results.lock().pop_front();
            next.unwrap_or_else(|| Ok(LlmAnalysis::default()))
        }
    }

    fn rate_limited(secs: u64) -> Result<LlmAnalysis, AnalysisError> {
        Err(AnalysisError::RateLimited {
            retry_after: Some(Duration::from_secs(secs)),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_honours_retry_after_then_succeeds() {
        let analyzer = Scripted::new(vec![rate_limited(2), rate_limited(2)]);
        let started = Instant::now();

        let result = analyze_with_retry(&analyzer, "kernel: error", &RetryPolicy::default()).await;

        assert!(result.is_ok());
        assert_eq!(analyzer.calls(), 3);
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let analyzer = Scripted::new(vec![
            Err(AnalysisError::RateLimited { retry_after: None }),
            Err(AnalysisError::RateLimited { retry_after: None }),
            Err(AnalysisError::RateLimited { retry_after: None }),
            Err(AnalysisError::RateLimited { retry_after: None }),
        ]);
        let started = Instant::now();

        let result = analyze_with_retry(&analyzer, "x", &RetryPolicy::default()).await;

        assert!(matches!(result, Err(AnalysisError::RateLimited { .. })));
        assert_eq!(analyzer.calls(), 4);
        // 1s + 2s + 4s of backoff
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_are_not_retried() {
        let analyzer = Scripted::new(vec![Err(AnalysisError::Other("HTTP 500".into()))]);

        let result = analyze_with_retry(&analyzer, "x", &RetryPolicy::default()).await;

        assert_eq!(result, Err(AnalysisError::Other("HTTP 500".into())));
        assert_eq!(analyzer.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let mut analyzer = Scripted::new(vec![]);
        analyzer.hang = Some(Duration::from_secs(120));
        let policy = RetryPolicy {
            max_retries: 1,
            call_timeout: Duration::from_secs(10),
            ..RetryPolicy::default()
        };

        let result = analyze_with_retry(&analyzer, "x", &policy).await;

        assert_eq!(result, Err(AnalysisError::Timeout));
        assert_eq!(analyzer.calls(), 2);
    }
}
