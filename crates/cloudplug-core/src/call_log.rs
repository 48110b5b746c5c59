//! Vendor API call logging
//!
//! Each handler receives a [`CallLogger`] at construction time and reports
//! one [`CallRecord`] per vendor call it makes.

use crate::identity::ResourceKind;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// One vendor API call
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Driver name, e.g. `ktcloud`
    pub cloud: String,
    pub region_zone: String,
    pub resource_kind: ResourceKind,
    pub resource_name: String,
    /// Handler operation, e.g. `StartVM`
    pub api: String,
    pub elapsed: Duration,
    pub error: Option<String>,
}

pub trait CallLogger: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Emits call records as `tracing` events on the `cloudplug::call` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCallLogger;

impl CallLogger for TracingCallLogger {
    fn record(&self, record: CallRecord) {
        match &record.error {
            None => tracing::info!(
                target: "cloudplug::call",
                cloud = %record.cloud,
                region_zone = %record.region_zone,
                resource_kind = %record.resource_kind,
                resource_name = %record.resource_name,
                api = %record.api,
                elapsed_ms = record.elapsed.as_millis() as u64,
                "call succeeded"
            ),
            Some(error) => tracing::error!(
                target: "cloudplug::call",
                cloud = %record.cloud,
                region_zone = %record.region_zone,
                resource_kind = %record.resource_kind,
                resource_name = %record.resource_name,
                api = %record.api,
                elapsed_ms = record.elapsed.as_millis() as u64,
                error = %error,
                "call failed"
            ),
        }
    }
}

/// Keeps every record in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryCallLogger {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl MemoryCallLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<CallRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.error.is_some())
            .collect()
    }
}

impl CallLogger for MemoryCallLogger {
    fn record(&self, record: CallRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

/// Identity of the driver connection, shared by every call a handler logs
#[derive(Clone)]
pub struct CallContext {
    cloud: String,
    region_zone: String,
    logger: Arc<dyn CallLogger>,
}

impl CallContext {
    pub fn new(
        cloud: impl Into<String>,
        region_zone: impl Into<String>,
        logger: Arc<dyn CallLogger>,
    ) -> Self {
        Self {
            cloud: cloud.into(),
            region_zone: region_zone.into(),
            logger,
        }
    }

    /// Starts timing a call.
    pub fn start(
        &self,
        kind: ResourceKind,
        resource_name: impl Into<String>,
        api: &str,
    ) -> CallTimer<'_> {
        CallTimer {
            ctx: self,
            kind,
            resource_name: resource_name.into(),
            api: api.to_string(),
            started: Instant::now(),
        }
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("cloud", &self.cloud)
            .field("region_zone", &self.region_zone)
            .finish_non_exhaustive()
    }
}

pub struct CallTimer<'a> {
    ctx: &'a CallContext,
    kind: ResourceKind,
    resource_name: String,
    api: String,
    started: Instant,
}

impl CallTimer<'_> {
    /// Records the outcome and hands the result back unchanged.
    pub fn finish<T, E: std::fmt::Display>(self, result: Result<T, E>) -> Result<T, E> {
        let error = result.as_ref().err().map(|e| e.to_string());
        self.ctx.logger.record(CallRecord {
            cloud: self.ctx.cloud.clone(),
            region_zone: self.ctx.region_zone.clone(),
            resource_kind: self.kind,
            resource_name: self.resource_name,
            api: self.api,
            elapsed: self.started.elapsed(),
            error,
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_success_and_failure() {
        let logger = MemoryCallLogger::new();
        let ctx = CallContext::new("ktcloud", "kr/kr-0", Arc::new(logger.clone()));

        let ok: Result<u32, String> = ctx.start(ResourceKind::Vm, "web-1", "GetVM").finish(Ok(1));
        assert_eq!(ok, Ok(1));

        let err: Result<u32, String> = ctx
            .start(ResourceKind::Disk, "data-1", "CreateDisk")
            .finish(Err("quota".to_string()));
        assert!(err.is_err());

        let records = logger.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].api, "GetVM");
        assert_eq!(records[0].region_zone, "kr/kr-0");
        assert_eq!(logger.failures()[0].error.as_deref(), Some("quota"));
    }
}
