//! Bounded retry with exponential backoff for uploads.

use crate::sink::{Sink, SinkError};
use resultsync_bundle_schema::UploadReport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Retry settings for transient upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Result of delivering one upload, with the number of attempts made.
#[derive(Debug)]
pub struct Delivery {
    pub attempts: u32,
    pub result: Result<(), SinkError>,
}

/// Upload with a per-attempt timeout, retrying transient failures only.
pub async fn upload_with_retry(
    sink: &dyn Sink,
    report: &UploadReport,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Delivery {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(timeout, sink.upload(report)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(timeout)),
        };

        match result {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    identifier = report.identifier().unwrap_or("?"),
                    attempt,
                    "Transient upload failure, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            result => {
                return Delivery {
                    attempts: attempt,
                    result,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use resultsync_bundle_schema::IdentifierSnapshot;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Sink that replays a scripted list of results.
    struct ScriptedSink {
        script: Mutex<Vec<Result<(), SinkError>>>,
        calls: AtomicU32,
    }

    impl ScriptedSink {
        fn new(mut script: Vec<Result<(), SinkError>>) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Sink for ScriptedSink {
        fn describe(&self) -> String {
            "scripted".into()
        }

        async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError> {
            Ok(IdentifierSnapshot::new())
        }

        async fn upload(&self, _report: &UploadReport) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().unwrap_or(Ok(()))
        }
    }

    fn report() -> UploadReport {
        UploadReport {
            test_report: json!({"Identifier": "retry_client000000"}),
            pcap_dump: String::new(),
            keylog: String::new(),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(64), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let sink = ScriptedSink::new(vec![
            Err(SinkError::Transport("connection reset".into())),
            Err(SinkError::Unavailable {
                status: 503,
                body: String::new(),
            }),
            Ok(()),
        ]);

        let delivery =
            upload_with_retry(&sink, &report(), &fast_policy(3), Duration::from_secs(5)).await;
        assert!(delivery.result.is_ok());
        assert_eq!(delivery.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let sink = ScriptedSink::new(vec![Err(SinkError::Duplicate(
            "retry_client000000".into(),
        ))]);

        let delivery =
            upload_with_retry(&sink, &report(), &fast_policy(5), Duration::from_secs(5)).await;
        assert!(matches!(delivery.result, Err(SinkError::Duplicate(_))));
        assert_eq!(delivery.attempts, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let sink = ScriptedSink::new(vec![
            Err(SinkError::Transport("down".into())),
            Err(SinkError::Transport("down".into())),
            Err(SinkError::Transport("down".into())),
        ]);

        let delivery =
            upload_with_retry(&sink, &report(), &fast_policy(2), Duration::from_secs(5)).await;
        assert!(matches!(delivery.result, Err(SinkError::Transport(_))));
        assert_eq!(delivery.attempts, 2);
    }

    struct SlowSink;

    #[async_trait]
    impl Sink for SlowSink {
        fn describe(&self) -> String {
            "slow".into()
        }

        async fn list_identifiers(&self) -> Result<IdentifierSnapshot, SinkError> {
            Ok(IdentifierSnapshot::new())
        }

        async fn upload(&self, _report: &UploadReport) -> Result<(), SinkError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let delivery = upload_with_retry(
            &SlowSink,
            &report(),
            &RetryPolicy::none(),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(delivery.result, Err(SinkError::Timeout(_))));
        assert_eq!(delivery.attempts, 1);
    }
}
