//! Processing manager.
//!
//! Owns the live `ProcessingConfig`, picks the back end for each call,
//! bounds it with the configured timeout, and runs the fallback chain.
//! Every call executes against the config snapshot taken at its own start;
//! an update that lands mid-call affects later calls only.

use std::time::Instant;

use parking_lot::RwLock;
use tokio::time::{timeout, Duration};

use crate::analysis::local_nlp::LocalNlpBackend;
use crate::analysis::remote_llm::RemoteLlmBackend;
use crate::analysis::rule_based::RuleBasedBackend;
use crate::analysis::{AnalysisBackend, AnalysisRun};
use crate::config::{ConfigUpdate, ProcessingConfig};
use crate::error::AnalysisError;
use crate::metrics::{MetricsRecorder, MetricsSnapshot};
use crate::types::{AnalysisMode, CommunicationRecord, Insights};

pub struct ProcessingManager {
    config: RwLock<ProcessingConfig>,
    rule_based: Box<dyn AnalysisBackend>,
    local_nlp: Box<dyn AnalysisBackend>,
    remote_llm: Box<dyn AnalysisBackend>,
    metrics: MetricsRecorder,
}

impl ProcessingManager {
    pub fn new(config: ProcessingConfig) -> Self {
        Self::with_backends(
            config,
            Box::new(RuleBasedBackend::new()),
            Box::new(LocalNlpBackend::new()),
            Box::new(RemoteLlmBackend::new()),
        )
    }

    /// Swap in alternative back-end implementations for any slot.
    pub fn with_backends(
        config: ProcessingConfig,
        rule_based: Box<dyn AnalysisBackend>,
        local_nlp: Box<dyn AnalysisBackend>,
        remote_llm: Box<dyn AnalysisBackend>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            rule_based,
            local_nlp,
            remote_llm,
            metrics: MetricsRecorder::new(),
        }
    }

    fn backend_for(&self, mode: AnalysisMode) -> &dyn AnalysisBackend {
        match mode {
            AnalysisMode::RuleBased => self.rule_based.as_ref(),
            AnalysisMode::LocalNlp => self.local_nlp.as_ref(),
            AnalysisMode::RemoteLlm => self.remote_llm.as_ref(),
        }
    }

    /// Analyze one client's communications with the configured back end.
    ///
    /// `mode_override` applies to this call only; the stored config is never
    /// changed by it.
    pub async fn process_client_communications(
        &self,
        client_id: &str,
        records: &[CommunicationRecord],
        mode_override: Option<AnalysisMode>,
    ) -> Result<Insights, AnalysisError> {
        let mut snapshot = self.config.read().clone();
        if let Some(mode) = mode_override {
            snapshot.mode = mode;
        }
        let mode = snapshot.mode;
        snapshot.validate_for(mode)?;

        let valid = filter_records(client_id, records);
        let run = AnalysisRun::from(&snapshot);
        let started = Instant::now();

        let attempt = self.dispatch(mode, client_id, &valid, &run, snapshot.timeout_ms).await;
        match attempt {
            Ok(mut insights) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                insights.processing_metrics.method = mode;
                insights.processing_metrics.processing_time_ms = elapsed_ms;
                self.metrics.record_success(mode, elapsed_ms);
                Ok(insights)
            }
            Err(err) => {
                self.metrics.record_failure(mode);
                if snapshot.fallback_to_rule_based && mode != AnalysisMode::RuleBased {
                    log::warn!(
                        "Manager: {} analysis failed for {} ({}), falling back to rule-based",
                        mode.as_str(),
                        client_id,
                        err
                    );
                    let mut insights =
                        self.rule_based.analyze(client_id, &valid, &run).await?;
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    insights.processing_metrics.method = AnalysisMode::RuleBased;
                    insights.processing_metrics.processing_time_ms = elapsed_ms;
                    self.metrics.record_fallback(mode);
                    self.metrics
                        .record_success(AnalysisMode::RuleBased, elapsed_ms);
                    Ok(insights)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn dispatch(
        &self,
        mode: AnalysisMode,
        client_id: &str,
        records: &[CommunicationRecord],
        run: &AnalysisRun,
        timeout_ms: u64,
    ) -> Result<Insights, AnalysisError> {
        let backend = self.backend_for(mode);
        match timeout(
            Duration::from_millis(timeout_ms),
            backend.analyze(client_id, records, run),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AnalysisError::Timeout { timeout_ms }),
        }
    }

    /// Merge a partial update onto the live config. The merged result is
    /// validated before it replaces anything; a rejected update leaves the
    /// live config untouched.
    pub fn update_config(&self, update: &ConfigUpdate) -> Result<ProcessingConfig, AnalysisError> {
        let merged = self.config.read().merged(update);
        merged.validate_for(merged.mode)?;
        *self.config.write() = merged.clone();
        log::info!("Manager: config updated (mode {})", merged.mode.as_str());
        Ok(merged)
    }

    pub fn current_config(&self) -> ProcessingConfig {
        self.config.read().clone()
    }

    pub fn metrics_rollups(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Drop records the back ends must never see: empty ids and timestamps that
/// do not parse as RFC 3339.
fn filter_records(client_id: &str, records: &[CommunicationRecord]) -> Vec<CommunicationRecord> {
    let mut valid = Vec::with_capacity(records.len());
    let mut dropped = 0usize;
    for record in records {
        if record.id.trim().is_empty() || record.parsed_timestamp().is_none() {
            dropped += 1;
            continue;
        }
        valid.push(record.clone());
    }
    if dropped > 0 {
        log::warn!(
            "Manager: dropped {} malformed record(s) for {} ({} kept)",
            dropped,
            client_id,
            valid.len()
        );
    }
    valid
}
