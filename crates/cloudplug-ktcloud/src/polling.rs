//! Wait presets and async job polling

use crate::api::{AsyncJob, JOB_FAILED, JOB_SUCCEEDED, JobHandle};
use crate::context::KtContext;
use cloudplug_core::{PollConfig, PollableOperation, Poller, ResourceKind, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const VM_BOOT: PollConfig = PollConfig::new(500, Duration::from_secs(3));
pub const ASYNC_JOB: PollConfig = PollConfig::new(100, Duration::from_secs(3));
pub const DISK_CREATE: PollConfig = PollConfig::new(500, Duration::from_secs(2));
pub const DISK_ATTACH: PollConfig = PollConfig::new(300, Duration::from_secs(2));
/// Stop, start and reboot settling
pub const VM_POWER: PollConfig = PollConfig::new(30, Duration::from_secs(2));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KtPollPresets {
    pub vm_boot: PollConfig,
    pub async_job: PollConfig,
    pub disk_create: PollConfig,
    pub disk_attach: PollConfig,
    #[serde(default = "default_vm_power")]
    pub vm_power: PollConfig,
}

fn default_vm_power() -> PollConfig {
    VM_POWER
}

impl Default for KtPollPresets {
    fn default() -> Self {
        Self {
            vm_boot: VM_BOOT,
            async_job: ASYNC_JOB,
            disk_create: DISK_CREATE,
            disk_attach: DISK_ATTACH,
            vm_power: VM_POWER,
        }
    }
}

fn job_status(job: &AsyncJob) -> String {
    match job.jobstatus {
        Some(JOB_SUCCEEDED) => "succeeded".to_string(),
        Some(JOB_FAILED) => format!(
            "failed: {}",
            job.errortext.as_deref().unwrap_or("no error text")
        ),
        _ => "pending".to_string(),
    }
}

/// Waits for the job behind `handle`. A handle without a job id is a
/// synchronous answer and returns at once.
pub async fn wait_for_job(
    ctx: &KtContext,
    kind: ResourceKind,
    target: &str,
    handle: &JobHandle,
    config: PollConfig,
) -> Result<()> {
    wait_on(&ctx.poller(), ctx, kind, target, handle, config).await
}

/// [`wait_for_job`] for deletes and releases. Not cut short by cancellation,
/// so rollback sees the real outcome of the job it started.
pub async fn wait_for_cleanup_job(
    ctx: &KtContext,
    kind: ResourceKind,
    target: &str,
    handle: &JobHandle,
    config: PollConfig,
) -> Result<()> {
    wait_on(&ctx.cleanup_poller(), ctx, kind, target, handle, config).await
}

async fn wait_on(
    poller: &Poller,
    ctx: &KtContext,
    kind: ResourceKind,
    target: &str,
    handle: &JobHandle,
    config: PollConfig,
) -> Result<()> {
    let Some(job_id) = handle.jobid.as_deref().filter(|j| !j.is_empty()) else {
        return Ok(());
    };

    let op = PollableOperation::new(kind, target, config)
        .succeeds_on(&["succeeded"])
        .fails_on(&["failed*"]);

    poller
        .wait_for_status(&op, || async move {
            let job = ctx
                .call(ResourceKind::AsyncJob, job_id, "queryAsyncJobResult", ctx.api.query_async_job_result(job_id))
                .await?;
            Ok(job_status(&job))
        })
        .await?;

    tracing::debug!(job_id, kind = %kind, target, "async job finished");
    Ok(())
}
