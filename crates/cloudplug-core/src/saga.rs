//! Provisioning saga with compensating rollback
//!
//! A saga runs named steps in order. A step that creates something may
//! register a compensation (delete/detach). When a later step fails, or the
//! saga is cancelled, the registered compensations run in reverse order,
//! each exactly once. A compensation that fails is recorded as a
//! [`RollbackWarning`] and unwinding carries on with the earlier steps.

use crate::cancel::CancellationToken;
use crate::error::{CloudError, Result, RollbackWarning};
use futures_util::future::BoxFuture;
use std::future::Future;

/// Deferred undo action. Futures are lazy, so nothing runs until rollback.
pub type Compensation = BoxFuture<'static, Result<()>>;

struct CompletedStep {
    name: String,
    undo: Option<Compensation>,
}

pub struct Saga {
    name: String,
    completed: Vec<CompletedStep>,
    cancel: Option<CancellationToken>,
}

impl Saga {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            completed: Vec::new(),
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the steps that have completed so far.
    pub fn completed_steps(&self) -> Vec<&str> {
        self.completed.iter().map(|s| s.name.as_str()).collect()
    }

    /// Runs a step that leaves nothing behind to undo.
    pub async fn execute<T, Fut>(&mut self, step: &str, action: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.run(step, action, |_| None).await
    }

    /// Runs a step and, if it succeeds, registers `undo` built from its output.
    pub async fn execute_with_undo<T, Fut, U>(&mut self, step: &str, action: Fut, undo: U) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        U: FnOnce(&T) -> Compensation,
    {
        self.run(step, action, |value| Some(undo(value))).await
    }

    async fn run<T, Fut, U>(&mut self, step: &str, action: Fut, undo: U) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
        U: FnOnce(&T) -> Option<Compensation>,
    {
        if let Some(token) = &self.cancel
            && token.is_cancelled()
        {
            let cause = CloudError::Cancelled(format!("{} cancelled before '{}'", self.name, step));
            return Err(self.unwind(step, cause).await);
        }

        tracing::info!(saga = %self.name, step, "running step");
        match action.await {
            Ok(value) => {
                let undo = undo(&value);
                self.completed.push(CompletedStep {
                    name: step.to_string(),
                    undo,
                });
                Ok(value)
            }
            Err(e) => Err(self.unwind(step, e).await),
        }
    }

    /// Consumes the saga after full success and discards the compensations.
    pub fn commit(mut self) -> Vec<String> {
        tracing::debug!(saga = %self.name, steps = self.completed.len(), "saga committed");
        std::mem::take(&mut self.completed)
            .into_iter()
            .map(|s| s.name)
            .collect()
    }

    /// Rolls back after a failure in a step that ran outside the saga.
    pub async fn abort(mut self, step: &str, cause: CloudError) -> CloudError {
        self.unwind(step, cause).await
    }

    async fn unwind(&mut self, failed_step: &str, cause: CloudError) -> CloudError {
        tracing::warn!(
            saga = %self.name,
            step = failed_step,
            error = %cause,
            "step failed, rolling back {} completed step(s)",
            self.completed.len()
        );

        let mut rolled_back = Vec::new();
        let mut warnings = Vec::new();

        while let Some(done) = self.completed.pop() {
            let Some(undo) = done.undo else {
                continue;
            };
            match undo.await {
                Ok(()) => {
                    tracing::info!(saga = %self.name, step = %done.name, "compensated");
                    rolled_back.push(done.name);
                }
                Err(e) => {
                    tracing::warn!(saga = %self.name, step = %done.name, error = %e, "compensation failed");
                    warnings.push(RollbackWarning {
                        step: done.name,
                        message: e.to_string(),
                    });
                }
            }
        }

        CloudError::SagaFailed {
            saga: self.name.clone(),
            step: failed_step.to_string(),
            source: Box::new(cause),
            rolled_back,
            warnings,
        }
    }
}

impl Drop for Saga {
    fn drop(&mut self) {
        let pending = self.completed.iter().filter(|s| s.undo.is_some()).count();
        if pending > 0 {
            tracing::warn!(
                saga = %self.name,
                pending,
                "saga dropped without commit or rollback; compensations discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ResourceKind;
    use futures_util::FutureExt;
    use std::sync::{Arc, Mutex};

    type Journal = Arc<Mutex<Vec<String>>>;

    fn undo(journal: &Journal, label: &str, fail: bool) -> Compensation {
        let journal = journal.clone();
        let label = label.to_string();
        async move {
            journal.lock().unwrap().push(label.clone());
            if fail {
                Err(CloudError::provider(ResourceKind::PublicIp, &label, "disassociate", "busy"))
            } else {
                Ok(())
            }
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_rollback_runs_in_reverse_exactly_once() {
        let journal: Journal = Arc::default();
        let mut saga = Saga::new("start-vm");

        saga.execute_with_undo("deploy-vm", async { Ok("vm-1") }, |_| undo(&journal, "destroy-vm", false))
            .await
            .unwrap();
        saga.execute("wait-running", async { Ok(()) }).await.unwrap();
        saga.execute_with_undo("associate-ip", async { Ok(7) }, |_| undo(&journal, "release-ip", false))
            .await
            .unwrap();

        let err = saga
            .execute::<(), _>("create-firewall-rule", async {
                Err(CloudError::provider(ResourceKind::FirewallRule, "vm-1", "createFirewallRule", "denied"))
            })
            .await
            .unwrap_err();

        assert_eq!(*journal.lock().unwrap(), vec!["release-ip", "destroy-vm"]);
        match &err {
            CloudError::SagaFailed {
                step,
                rolled_back,
                warnings,
                ..
            } => {
                assert_eq!(step, "create-firewall-rule");
                assert_eq!(rolled_back, &vec!["associate-ip".to_string(), "deploy-vm".to_string()]);
                assert!(warnings.is_empty());
            }
            other => panic!("expected SagaFailed, got {other:?}"),
        }
        assert!(matches!(err.root_cause(), CloudError::Provider { .. }));

        // nothing left to compensate
        drop(saga);
        assert_eq!(journal.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_compensation_failure_becomes_warning() {
        let journal: Journal = Arc::default();
        let mut saga = Saga::new("start-vm");

        saga.execute_with_undo("deploy-vm", async { Ok(()) }, |_| undo(&journal, "destroy-vm", false))
            .await
            .unwrap();
        saga.execute_with_undo("associate-ip", async { Ok(()) }, |_| undo(&journal, "release-ip", true))
            .await
            .unwrap();

        let err = saga
            .execute::<(), _>("tag-vm", async {
                Err(CloudError::provider(ResourceKind::Tag, "vm-1", "createTags", "boom"))
            })
            .await
            .unwrap_err();

        // the failing compensation did not stop the earlier one
        assert_eq!(*journal.lock().unwrap(), vec!["release-ip", "destroy-vm"]);
        let warnings = err.rollback_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, "associate-ip");
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_commit_discards_compensations() {
        let journal: Journal = Arc::default();
        let mut saga = Saga::new("create-disk");
        saga.execute_with_undo("create-volume", async { Ok(()) }, |_| undo(&journal, "delete-volume", false))
            .await
            .unwrap();

        assert_eq!(saga.commit(), vec!["create-volume".to_string()]);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_saga_unwinds_before_next_step() {
        let journal: Journal = Arc::default();
        let token = CancellationToken::new();
        let mut saga = Saga::new("start-vm").with_cancellation(Some(token.clone()));

        saga.execute_with_undo("deploy-vm", async { Ok(()) }, |_| undo(&journal, "destroy-vm", false))
            .await
            .unwrap();
        token.cancel();

        let ran = Arc::new(Mutex::new(false));
        let flag = ran.clone();
        let err = saga
            .execute("associate-ip", async move {
                *flag.lock().unwrap() = true;
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(!*ran.lock().unwrap());
        assert!(matches!(err.root_cause(), CloudError::Cancelled(_)));
        assert_eq!(*journal.lock().unwrap(), vec!["destroy-vm"]);
    }

    #[tokio::test]
    async fn test_abort_rolls_back_external_failure() {
        let journal: Journal = Arc::default();
        let mut saga = Saga::new("create-security-group");
        saga.execute_with_undo("create-group", async { Ok(()) }, |_| undo(&journal, "delete-group", false))
            .await
            .unwrap();

        let err = saga
            .abort("fetch-group", CloudError::not_found(ResourceKind::SecurityGroup, "sg-1"))
            .await;
        assert!(err.root_cause().is_not_found());
        assert_eq!(*journal.lock().unwrap(), vec!["delete-group"]);
    }
}
