//! Periodic timeout scanning.
//!
//! Each scan walks every active timeout of every active workflow. A timeout
//! whose watermark is not older than the scan time is skipped; otherwise
//! every IN_PROGRESS instance of the workflow is handed to
//! [`WorkflowEngine::apply_timeout`], which decides whether the step is due.
//! The watermark is advanced once the timeout has been processed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use approvalflow_config::MonitorConfig;
use approvalflow_core::WorkflowEngine;
use approvalflow_protocols::{
    DefinitionStore, EngineResult, InstanceStatus, InstanceStore, TimeoutDefinition,
    WorkflowDefinition,
};

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Timeouts evaluated against instances.
    pub checked: usize,
    /// Timeouts skipped because their watermark was current.
    pub current: usize,
    /// Timeout actions that fired.
    pub fired: usize,
    /// Definitions or instances whose processing failed.
    pub errors: usize,
}

/// Applies step timeouts on a fixed period.
pub struct TimeoutMonitor {
    engine: Arc<WorkflowEngine>,
    definitions: Arc<dyn DefinitionStore>,
    instances: Arc<dyn InstanceStore>,
    // timeout id -> last scan that processed it
    watermarks: RwLock<HashMap<String, DateTime<Utc>>>,
    running: AtomicBool,
}

impl TimeoutMonitor {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        definitions: Arc<dyn DefinitionStore>,
        instances: Arc<dyn InstanceStore>,
    ) -> Self {
        Self {
            engine,
            definitions,
            instances,
            watermarks: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Last time the timeout was processed.
    pub fn watermark(&self, timeout_id: &str) -> Option<DateTime<Utc>> {
        self.watermarks.read().get(timeout_id).copied()
    }

    /// Run one scan at `now`.
    pub async fn scan_at(&self, now: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();

        let workflows = match self.definitions.list_workflows().await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!("Timeout scan could not list workflows: {}", e);
                report.errors += 1;
                return report;
            }
        };

        for definition in workflows.iter().filter(|w| w.active) {
            if let Err(e) = self.scan_definition(definition, now, &mut report).await {
                error!("Timeout scan failed for workflow '{}': {}", definition.name, e);
                report.errors += 1;
            }
        }

        if report.fired > 0 || report.errors > 0 {
            info!(
                "Timeout scan: {} checked, {} fired, {} errors",
                report.checked, report.fired, report.errors
            );
        } else {
            debug!("Timeout scan: {} checked, nothing due", report.checked);
        }
        report
    }

    async fn scan_definition(
        &self,
        definition: &WorkflowDefinition,
        now: DateTime<Utc>,
        report: &mut ScanReport,
    ) -> EngineResult<()> {
        let timeouts: Vec<TimeoutDefinition> = definition
            .steps_ordered()
            .iter()
            .flat_map(|step| definition.active_timeouts(step.order))
            .collect();
        if timeouts.is_empty() {
            return Ok(());
        }

        let instances = self
            .instances
            .list_instances(Some(definition.id.as_str()), Some(InstanceStatus::InProgress))
            .await?;

        for timeout in &timeouts {
            let watermark = self.watermark(&timeout.id).or(timeout.last_checked);
            if watermark.is_some_and(|checked| checked >= now) {
                report.current += 1;
                continue;
            }
            report.checked += 1;

            for instance in instances.iter().filter(|i| i.current_step_order == timeout.step) {
                match self.engine.apply_timeout(instance.id, timeout, now).await {
                    Ok(outcome) if outcome.fired() => {
                        report.fired += 1;
                        debug!("Timeout {} fired for instance {}: {:?}", timeout.id, instance.id, outcome);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Timeout {} failed for instance {}: {}", timeout.id, instance.id, e);
                        report.errors += 1;
                    }
                }
            }

            self.watermarks.write().insert(timeout.id.clone(), now);
        }
        Ok(())
    }

    /// Start scanning every `interval` in a background task.
    pub fn start(self: &Arc<Self>, interval: Duration) {
        self.running.store(true, Ordering::SeqCst);
        let this = self.clone();

        tokio::spawn(async move {
            info!("TimeoutMonitor started (interval={}s)", interval.as_secs());

            while this.running.load(Ordering::SeqCst) {
                this.scan_at(Utc::now()).await;
                tokio::time::sleep(interval).await;
            }

            info!("TimeoutMonitor stopped");
        });
    }

    /// Start with the configured interval, unless disabled.
    pub fn start_with(self: &Arc<Self>, config: &MonitorConfig) {
        if !config.enabled {
            info!("TimeoutMonitor disabled by configuration");
            return;
        }
        self.start(Duration::from_secs(config.scan_interval_secs.max(1)));
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
