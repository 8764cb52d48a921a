//! Run reports

use crate::chain::ChainState;
use crate::classifier::{CascadeType, Classification, ClassificationRule, Severity};
use crate::types::{ErrorClass, RunId, StageName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Confidence and error summary of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeAnalysis {
    /// Confidence of the first recorded stage, 1.0 if none ran
    pub initial_confidence: f64,
    /// Cumulative confidence after the last recorded stage
    pub final_confidence: f64,
    /// `initial_confidence - final_confidence`
    pub confidence_degradation: f64,
    /// Number of errors across all stages
    pub total_errors: usize,
    /// Number of stages that reported `success == false`
    pub failed_stages: usize,
    /// Whether at least one stage ran after the chain was halted
    pub propagated_past_halt: bool,
    /// Any stage failed or ran after a halt
    pub cascade_detected: bool,
}

impl CascadeAnalysis {
    /// Summarise a chain
    #[must_use]
    pub fn from_chain(chain: &ChainState) -> Self {
        let initial_confidence = chain.results.first().map_or(1.0, |r| r.confidence);
        let final_confidence = chain.cumulative_confidence;
        let failed_stages = chain.results.iter().filter(|r| !r.success).count();
        let propagated_past_halt = chain
            .first_halt()
            .is_some_and(|i| i + 1 < chain.results.len());
        Self {
            initial_confidence,
            final_confidence,
            confidence_degradation: initial_confidence - final_confidence,
            total_errors: chain.cumulative_errors.len(),
            failed_stages,
            propagated_past_halt,
            cascade_detected: failed_stages > 0 || propagated_past_halt,
        }
    }
}

/// What happened to the invoice itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    /// Approved and paid
    Approved,
    /// Approval ran and turned the invoice down
    Rejected,
    /// Left for a human: review requested, payment blocked, or no decision
    /// was reached
    PendingReview,
}

impl FinalDecision {
    /// Derive the decision from the approval and payment results
    #[must_use]
    pub fn from_chain(chain: &ChainState) -> Self {
        let Some(approval) = chain.result_for(StageName::Approval) else {
            return FinalDecision::PendingReview;
        };
        let paid = chain
            .result_for(StageName::PaymentProcessor)
            .is_some_and(|r| r.success);

        if approval.success {
            if paid {
                FinalDecision::Approved
            } else {
                FinalDecision::PendingReview
            }
        } else if approval
            .errors
            .iter()
            .any(|e| e.requests_review() || e.class == ErrorClass::ExternalCall)
        {
            FinalDecision::PendingReview
        } else {
            FinalDecision::Rejected
        }
    }

    /// Short name used in rendered reports
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FinalDecision::Approved => "approved",
            FinalDecision::Rejected => "rejected",
            FinalDecision::PendingReview => "pending_review",
        }
    }
}

/// Outcome of one orchestrated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeReport {
    /// Run identifier
    pub run_id: RunId,
    /// Final chain state
    pub chain_state: ChainState,
    /// All four stages ran and payment succeeded
    pub reached_end: bool,
    /// Index of the first failing stage
    pub first_failing_stage: Option<usize>,
    /// Classified cascade type
    pub cascade_type: CascadeType,
    /// Classified severity
    pub severity: Severity,
    /// Decision table row that produced the classification
    pub rule: ClassificationRule,
    /// Confidence and error summary
    pub analysis: CascadeAnalysis,
    /// Decision on the invoice
    pub final_decision: FinalDecision,
    /// Whether the payment stage released funds
    pub payment_processed: bool,
    /// The run was cancelled before every stage had a chance to run
    pub cancelled: bool,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Run end
    pub finished_at: DateTime<Utc>,
}

impl CascadeReport {
    /// Assemble a report from a finished chain and its classification
    #[must_use]
    pub fn new(
        chain_state: ChainState,
        classification: Classification,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: chain_state.run_id,
            cancelled: chain_state.cancelled,
            reached_end: chain_state.reached_end(),
            first_failing_stage: chain_state.first_failing_stage(),
            cascade_type: classification.cascade_type,
            severity: classification.severity,
            rule: classification.rule,
            analysis: CascadeAnalysis::from_chain(&chain_state),
            final_decision: FinalDecision::from_chain(&chain_state),
            payment_processed: chain_state
                .result_for(StageName::PaymentProcessor)
                .is_some_and(|r| r.success),
            chain_state,
            started_at,
            finished_at,
        }
    }

    /// Name of the first failing stage
    #[must_use]
    pub fn first_failing_stage_name(&self) -> Option<StageName> {
        self.first_failing_stage
            .and_then(|i| self.chain_state.results.get(i))
            .map(|r| r.stage_name)
    }

    /// Wall time of the run in milliseconds
    #[inline]
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Human-readable summary
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let chain = &self.chain_state;

        let _ = writeln!(out, "Run {} ({} ms)", chain.run_id, self.duration_ms());
        for result in &chain.results {
            let mark = if result.success { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "  [{mark}] {:<18} confidence {:.3}{}",
                result.stage_name.as_str(),
                result.confidence,
                if result.halted_chain { "  (halted)" } else { "" }
            );
            for error in &result.errors {
                let _ = writeln!(out, "         - {error}");
            }
        }
        for stage in &chain.skipped {
            let _ = writeln!(out, "  [SKIP] {}", stage.as_str());
        }
        if chain.cancelled {
            let _ = writeln!(out, "  run cancelled");
        }

        let _ = writeln!(
            out,
            "Cumulative confidence {:.3} (degradation {:.3})",
            self.analysis.final_confidence, self.analysis.confidence_degradation
        );
        let _ = writeln!(
            out,
            "Reached end: {}, first failing stage: {}",
            self.reached_end,
            self.first_failing_stage_name()
                .map_or_else(|| "none".to_string(), |s| s.to_string())
        );
        let _ = writeln!(
            out,
            "Decision: {}, payment processed: {}",
            self.final_decision.as_str(),
            self.payment_processed
        );
        let _ = write!(
            out,
            "Cascade: {:?} / severity {:?} ({:?})",
            self.cascade_type, self.severity, self.rule
        );
        out
    }
}
