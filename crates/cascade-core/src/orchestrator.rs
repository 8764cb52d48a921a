//! Orchestrator
//!
//! Runs the four stages in order over one shared [`ChainState`] per invoice.
//! In strict mode the first halting stage stops the pipeline; otherwise every
//! stage runs and degraded confidence flows downstream. An orchestrator is
//! cheap to clone and safe to share across concurrent runs: each run owns its
//! own chain state and only the judge is shared.

use crate::chain::ChainState;
use crate::classifier::CascadeClassifier;
use crate::config::CascadeConfig;
use crate::error::CascadeError;
use crate::judge::ExternalJudge;
use crate::report::CascadeReport;
use crate::stage::Stage;
use crate::types::{Invoice, RunId, StageName, StageResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives invoices through the stage pipeline
#[derive(Clone)]
pub struct Orchestrator {
    judge: Arc<dyn ExternalJudge>,
    stages: Arc<[Stage; 4]>,
    config: Arc<CascadeConfig>,
    classifier: CascadeClassifier,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("strict", &self.config.strict)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create a new orchestrator
    ///
    /// # Errors
    /// Returns [`CascadeError::Config`] if the configuration is invalid.
    pub fn new(config: CascadeConfig, judge: Arc<dyn ExternalJudge>) -> Result<Self, CascadeError> {
        config.validate()?;
        let stages = Stage::pipeline(&config)?;
        Ok(Self {
            judge,
            stages: Arc::new(stages),
            classifier: CascadeClassifier::new(config.thresholds),
            config: Arc::new(config),
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Whether stages after a halt are skipped
    #[inline]
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.config.strict
    }

    /// Run only the validator stage
    ///
    /// Checks an invoice's input without consulting downstream stages or
    /// classifying anything.
    pub async fn run_validator(&self, invoice: &Invoice) -> StageResult {
        let chain = ChainState::new(RunId::new(), self.config.strict);
        let timeout = Duration::from_secs(self.config.judge_timeout_secs);
        let validator = &self.stages[StageName::Validator.index()];

        let result = validator
            .execute(invoice, &chain, self.judge.as_ref(), timeout)
            .await;
        tracing::info!(
            "Validator-only run {} for invoice {}: success: {}, confidence: {:.3}",
            chain.run_id,
            invoice.invoice_number,
            result.success,
            result.confidence
        );
        result
    }

    /// Run one invoice through the pipeline
    ///
    /// # Errors
    /// Returns [`CascadeError::InvariantViolation`] if the chain state rejects
    /// a result. Judge failures never surface here; they become halted
    /// stage results.
    pub async fn run(&self, invoice: &Invoice) -> Result<CascadeReport, CascadeError> {
        self.run_with_cancellation(invoice, &CancellationToken::new())
            .await
    }

    /// Run one invoice, stopping at the next suspension point once `cancel`
    /// fires
    ///
    /// A stage interrupted mid-call records nothing. The returned report
    /// covers the partial chain with `cancelled` set.
    ///
    /// # Errors
    /// See [`run`](Self::run).
    pub async fn run_with_cancellation(
        &self,
        invoice: &Invoice,
        cancel: &CancellationToken,
    ) -> Result<CascadeReport, CascadeError> {
        let started_at = Utc::now();
        let mut chain = ChainState::new(RunId::new(), self.config.strict);
        let timeout = Duration::from_secs(self.config.judge_timeout_secs);

        tracing::info!(
            "Run {} started for invoice {} (strict: {})",
            chain.run_id,
            invoice.invoice_number,
            chain.strict
        );

        for stage in self.stages.iter() {
            if cancel.is_cancelled() {
                chain.cancelled = true;
                break;
            }
            if chain.strict && chain.terminated_early {
                tracing::debug!("[{}] skipped after halt", stage.name());
                chain.skip(stage.name());
                continue;
            }

            let execute = stage.execute(invoice, &chain, self.judge.as_ref(), timeout);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = execute => Some(result),
            };
            let Some(result) = outcome else {
                tracing::info!("Run {} cancelled during {}", chain.run_id, stage.name());
                chain.cancelled = true;
                break;
            };

            tracing::debug!(
                "[{}] success: {}, confidence: {:.3}, errors: {}",
                result.stage_name,
                result.success,
                result.confidence,
                result.errors.len()
            );
            if result.halted_chain {
                tracing::info!("[{}] halted the chain", result.stage_name);
            }

            chain.record(result)?;
        }

        let report = self.report(chain, started_at);
        tracing::info!(
            "Run {} finished: {:?}/{:?}, cumulative confidence {:.3}",
            report.run_id,
            report.cascade_type,
            report.severity,
            report.analysis.final_confidence
        );
        Ok(report)
    }

    /// Classify a finished chain into a report
    #[must_use]
    pub fn report(&self, chain: ChainState, started_at: chrono::DateTime<Utc>) -> CascadeReport {
        let classification = self.classifier.classify_detailed(&chain);
        CascadeReport::new(chain, classification, started_at, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{CascadeType, Severity};
    use crate::error::JudgeError;
    use crate::judge::{JudgeRequest, RawJudgment};
    use crate::report::FinalDecision;
    use std::collections::HashMap;

    /// Replies per stage; stages without a reply pass at 0.9
    #[derive(Default)]
    struct PerStage(HashMap<StageName, Result<RawJudgment, JudgeError>>);

    impl PerStage {
        fn with(mut self, stage: StageName, reply: Result<RawJudgment, JudgeError>) -> Self {
            self.0.insert(stage, reply);
            self
        }
    }

    #[async_trait::async_trait]
    impl ExternalJudge for PerStage {
        async fn judge(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError> {
            self.0
                .get(&request.stage)
                .cloned()
                .unwrap_or_else(|| Ok(RawJudgment::pass(0.9, "ok")))
        }
    }

    struct Hang;

    #[async_trait::async_trait]
    impl ExternalJudge for Hang {
        async fn judge(&self, _request: &JudgeRequest) -> Result<RawJudgment, JudgeError> {
            std::future::pending().await
        }
    }

    fn invoice() -> Invoice {
        Invoice::new("INV-1", "vendor-1", 500.0, "Standard equipment rental for 3 days")
    }

    fn orchestrator(strict: bool, judge: impl ExternalJudge + 'static) -> Orchestrator {
        Orchestrator::new(CascadeConfig::default().with_strict(strict), Arc::new(judge)).unwrap()
    }

    #[tokio::test]
    async fn clean_run_reaches_end() {
        let report = orchestrator(false, PerStage::default())
            .run(&invoice())
            .await
            .unwrap();

        assert!(report.reached_end);
        assert_eq!(report.chain_state.results.len(), 4);
        assert!((report.chain_state.cumulative_confidence - 0.9_f64.powi(4)).abs() < 1e-12);
        assert_eq!(report.cascade_type, CascadeType::None);
        assert_eq!(report.final_decision, FinalDecision::Approved);
        assert!(report.payment_processed);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn strict_mode_stops_at_first_halt() {
        let judge = PerStage::default().with(
            StageName::RiskAnalyzer,
            Ok(RawJudgment::fail(0.4, "critical risk", ["CRITICAL_RISK"])),
        );
        let report = orchestrator(true, judge).run(&invoice()).await.unwrap();

        assert_eq!(report.chain_state.results.len(), 2);
        assert_eq!(
            report.chain_state.skipped,
            vec![StageName::Approval, StageName::PaymentProcessor]
        );
        assert_eq!(report.cascade_type, CascadeType::HalfCascade);
        assert_eq!(report.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn non_strict_mode_runs_every_stage() {
        let judge = PerStage::default().with(
            StageName::Approval,
            Ok(RawJudgment::fail(0.5, "rejected", ["REJECTED"])),
        );
        let report = orchestrator(false, judge).run(&invoice()).await.unwrap();

        assert_eq!(report.chain_state.results.len(), 4);
        assert!(report.chain_state.terminated_early);
        assert!(report.chain_state.skipped.is_empty());
        assert_eq!(report.cascade_type, CascadeType::MidchainCascade);
        assert_eq!(report.severity, Severity::High);
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = CascadeConfig::default().with_payment_floor(2.0);
        let result = Orchestrator::new(config, Arc::new(PerStage::default()));
        assert!(matches!(result, Err(CascadeError::Config(_))));
    }

    #[tokio::test]
    async fn cancelled_before_start_records_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = orchestrator(false, PerStage::default())
            .run_with_cancellation(&invoice(), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.chain_state.results.is_empty());
        assert!(!report.reached_end);
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_judge() {
        let orchestrator = orchestrator(false, Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = orchestrator
            .run_with_cancellation(&invoice(), &cancel)
            .await
            .unwrap();
        assert!(report.cancelled);
        assert!(report.chain_state.results.is_empty());
    }

    #[tokio::test]
    async fn validator_only_run_skips_downstream() {
        let judge = PerStage::default().with(
            StageName::RiskAnalyzer,
            Err(JudgeError::Transport("must not be called".into())),
        );
        let orchestrator = orchestrator(true, judge);
        assert!(orchestrator.is_strict());

        let result = orchestrator.run_validator(&invoice()).await;
        assert_eq!(result.stage_name, StageName::Validator);
        assert!(result.success);
        assert_eq!(result.confidence, 0.9);
    }

    #[tokio::test]
    async fn validator_only_run_applies_input_rules() {
        let dirty = Invoice::new("INV-2", "vendor-1", -5.0, "Bad");
        let result = orchestrator(false, PerStage::default())
            .run_validator(&dirty)
            .await;

        assert!(!result.success);
        assert!(result.has_dirty_data());
        assert!(result.halted_chain);
    }
}
