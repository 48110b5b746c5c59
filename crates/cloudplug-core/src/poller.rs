//! Bounded polling of asynchronous provider operations
//!
//! Every "wait until the VM is running / the disk is ready / the job is
//! done" loop in the drivers goes through [`Poller`]. A poll either reaches
//! a terminal status or gives up after `max_attempts` fetches with a
//! [`CloudError::Timeout`], which callers can tell apart from a
//! provider-reported failure.

use crate::cancel::CancellationToken;
use crate::error::{CloudError, Result};
use crate::identity::ResourceKind;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Consecutive provider errors tolerated while polling before the last one
/// is returned.
pub const MAX_PROVIDER_ERRORS: u32 = 3;

/// Attempt bound and fixed interval between fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl PollConfig {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound on time spent sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(120, Duration::from_secs(1))
    }
}

/// Classification of one observed status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    InProgress,
    Success,
    Failure,
}

/// A resource being waited on and the statuses that end the wait.
///
/// Status matching ignores ASCII case. A pattern ending in `*` matches by
/// prefix. Anything that is neither a success nor a failure status is
/// treated as still in progress.
#[derive(Debug, Clone)]
pub struct PollableOperation {
    pub kind: ResourceKind,
    pub target: String,
    pub config: PollConfig,
    success: Vec<String>,
    failure: Vec<String>,
}

impl PollableOperation {
    pub fn new(kind: ResourceKind, target: impl Into<String>, config: PollConfig) -> Self {
        Self {
            kind,
            target: target.into(),
            config,
            success: Vec::new(),
            failure: Vec::new(),
        }
    }

    pub fn succeeds_on(mut self, statuses: &[&str]) -> Self {
        self.success.extend(statuses.iter().map(|s| s.to_string()));
        self
    }

    pub fn fails_on(mut self, statuses: &[&str]) -> Self {
        self.failure.extend(statuses.iter().map(|s| s.to_string()));
        self
    }

    pub fn classify(&self, status: &str) -> Phase {
        if self.success.iter().any(|p| status_matches(p, status)) {
            Phase::Success
        } else if self.failure.iter().any(|p| status_matches(p, status)) {
            Phase::Failure
        } else {
            Phase::InProgress
        }
    }
}

fn status_matches(pattern: &str, status: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => status
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix)),
        None => pattern.eq_ignore_ascii_case(status),
    }
}

#[derive(Debug, Clone, Default)]
pub struct Poller {
    cancel: Option<CancellationToken>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
        }
    }

    /// Polls until `fetch` reports a terminal status.
    ///
    /// `fetch` returns the raw status string together with whatever value
    /// the caller wants back on success. A `NotFound` from `fetch` counts as
    /// an in-progress attempt. `Provider` errors are retried up to
    /// [`MAX_PROVIDER_ERRORS`] times in a row, then returned. Other errors
    /// abort at once.
    pub async fn poll<T, F, Fut>(&self, op: &PollableOperation, mut fetch: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(String, T)>>,
    {
        let max_attempts = op.config.max_attempts.max(1);
        let started = Instant::now();
        let mut last_status: Option<String> = None;
        let mut provider_errors = 0;

        for attempt in 1..=max_attempts {
            self.check_cancelled(op)?;

            let fetched = fetch().await;
            if !matches!(fetched, Err(CloudError::Provider { .. })) {
                provider_errors = 0;
            }
            match fetched {
                Ok((status, value)) => match op.classify(&status) {
                    Phase::Success => {
                        tracing::debug!(
                            kind = %op.kind,
                            target = %op.target,
                            status = %status,
                            attempt,
                            "poll reached success state"
                        );
                        return Ok(value);
                    }
                    Phase::Failure => {
                        return Err(CloudError::OperationFailed {
                            kind: op.kind,
                            target: op.target.clone(),
                            status,
                        });
                    }
                    Phase::InProgress => {
                        tracing::trace!(kind = %op.kind, target = %op.target, status = %status, attempt, "still in progress");
                        last_status = Some(status);
                    }
                },
                Err(e @ CloudError::Provider { .. }) if provider_errors + 1 >= MAX_PROVIDER_ERRORS => {
                    tracing::warn!(kind = %op.kind, target = %op.target, attempt, error = %e, "status fetch keeps failing");
                    return Err(e);
                }
                Err(e @ (CloudError::NotFound { .. } | CloudError::Provider { .. })) => {
                    if e.is_provider() {
                        provider_errors += 1;
                    }
                    tracing::warn!(
                        kind = %op.kind,
                        target = %op.target,
                        attempt,
                        error = %e,
                        "status fetch failed, retrying"
                    );
                    last_status = Some(format!("error: {}", e));
                }
                Err(e) => return Err(e),
            }

            if attempt < max_attempts {
                self.pause(op).await?;
            }
        }

        Err(CloudError::Timeout {
            kind: op.kind,
            target: op.target.clone(),
            attempts: max_attempts,
            waited: started.elapsed(),
            last_status,
        })
    }

    /// Polls a plain status string and returns the terminal one.
    pub async fn wait_for_status<F, Fut>(&self, op: &PollableOperation, mut fetch: F) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.poll(op, || {
            let next = fetch();
            async move {
                let status = next.await?;
                Ok::<_, CloudError>((status.clone(), status))
            }
        })
        .await
    }

    fn check_cancelled(&self, op: &PollableOperation) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(CloudError::Cancelled(format!(
                "waiting for {} '{}'",
                op.kind, op.target
            ))),
            _ => Ok(()),
        }
    }

    async fn pause(&self, op: &PollableOperation) -> Result<()> {
        match &self.cancel {
            None => {
                sleep(op.config.interval).await;
                Ok(())
            }
            Some(token) => {
                tokio::select! {
                    _ = sleep(op.config.interval) => Ok(()),
                    _ = token.cancelled() => Err(CloudError::Cancelled(format!(
                        "waiting for {} '{}'",
                        op.kind, op.target
                    ))),
                }
            }
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn disk_op() -> PollableOperation {
        PollableOperation::new(
            ResourceKind::Disk,
            "vol-1",
            PollConfig::new(500, Duration::from_secs(2)),
        )
        .succeeds_on(&["Allocated", "Ready"])
        .fails_on(&["error*"])
    }

    #[test]
    fn test_classify() {
        let op = disk_op();
        assert_eq!(op.classify("allocated"), Phase::Success);
        assert_eq!(op.classify("Error_Creating"), Phase::Failure);
        assert_eq!(op.classify("pending"), Phase::InProgress);
        assert_eq!(op.classify("something-new"), Phase::InProgress);
        assert_eq!(op.classify(""), Phase::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_exact_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = Poller::new()
            .wait_for_status(&disk_op(), || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("pending".to_string())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 500);
        match err {
            CloudError::Timeout {
                attempts,
                waited,
                last_status,
                ..
            } => {
                assert_eq!(attempts, 500);
                assert_eq!(waited, Duration::from_secs(998));
                assert_eq!(last_status.as_deref(), Some("pending"));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transitions() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = Poller::new()
            .poll(&disk_op(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let status = match n {
                        0 | 1 => "creating",
                        _ => "Allocated",
                    };
                    Ok((status.to_string(), n))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_timeout() {
        let err = Poller::new()
            .wait_for_status(&disk_op(), || async { Ok("error_attach".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::OperationFailed { .. }));
        assert!(!err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = PollableOperation::new(
            ResourceKind::Vm,
            "web-1",
            PollConfig::new(10, Duration::from_secs(3)),
        )
        .succeeds_on(&["Running"]);

        let status = Poller::new()
            .wait_for_status(&op, || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(CloudError::not_found(ResourceKind::Vm, "web-1"))
                    } else {
                        Ok("Running".to_string())
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(status, "Running");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_provider_error_is_returned() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = Poller::new()
            .wait_for_status(&disk_op(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CloudError::provider(ResourceKind::Disk, "vol-1", "listVolumes", "401 unauthorized"))
                }
            })
            .await
            .unwrap_err();

        assert!(!err.is_timeout());
        assert!(matches!(err, CloudError::Provider { ref message, .. } if message == "401 unauthorized"));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_PROVIDER_ERRORS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_streak_resets_on_status() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        // two errors, a status, two errors, success
        let status = Poller::new()
            .wait_for_status(&disk_op(), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 | 1 | 3 | 4 => Err(CloudError::provider(ResourceKind::Disk, "vol-1", "listVolumes", "503")),
                        2 => Ok("creating".to_string()),
                        _ => Ok("Ready".to_string()),
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(status, "Ready");
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_aborts() {
        let err = Poller::new()
            .wait_for_status(&disk_op(), || async {
                Err(CloudError::validation(ResourceKind::Disk, "bad id"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Validation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let token = CancellationToken::new();
        let poller = Poller::with_cancellation(token.clone());
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let err = poller
            .wait_for_status(&disk_op(), || async { Ok("pending".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Cancelled(_)));
    }

    #[test]
    fn test_max_wait() {
        assert_eq!(
            PollConfig::new(500, Duration::from_secs(2)).max_wait(),
            Duration::from_secs(998)
        );
    }
}
