//! Accumulating chain state
//!
//! One [`ChainState`] exists per invoice run. It is owned by the
//! orchestrator, mutated only through [`ChainState::record`], and never
//! shared between runs.

use crate::error::InvariantViolation;
use crate::types::{RunId, StageError, StageName, StageResult};
use serde::{Deserialize, Serialize};

/// Record threaded through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    /// Run this state belongs to
    pub run_id: RunId,
    /// Results in execution order, append-only
    pub results: Vec<StageResult>,
    /// Product of every recorded confidence, starts at 1.0
    pub cumulative_confidence: f64,
    /// Every error raised so far, in order
    pub cumulative_errors: Vec<StageError>,
    /// Set once any stage halts the chain
    pub terminated_early: bool,
    /// Stages skipped after a halt in strict mode
    pub skipped: Vec<StageName>,
    /// Set when the caller cancelled the run mid-chain
    pub cancelled: bool,
    /// Whether stages after a halt are skipped
    pub strict: bool,
}

impl ChainState {
    /// Fresh state for a new run
    #[must_use]
    pub fn new(run_id: RunId, strict: bool) -> Self {
        Self {
            run_id,
            results: Vec::with_capacity(StageName::ORDER.len()),
            cumulative_confidence: 1.0,
            cumulative_errors: Vec::new(),
            terminated_early: false,
            skipped: Vec::new(),
            cancelled: false,
            strict,
        }
    }

    /// Next stage due to run, if any
    #[inline]
    #[must_use]
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::ORDER
            .get(self.results.len() + self.skipped.len())
            .copied()
    }

    /// Append a stage result and fold it into the running totals
    ///
    /// # Errors
    /// Returns [`InvariantViolation`] if the chain is full, the stage is out
    /// of order, the chain was terminated in strict mode, or the confidence
    /// lies outside [0, 1].
    pub fn record(&mut self, result: StageResult) -> Result<(), InvariantViolation> {
        let Some(expected) = self.next_stage() else {
            return Err(InvariantViolation::ChainFull(self.results.len()));
        };
        if result.stage_name != expected {
            return Err(InvariantViolation::OutOfOrder {
                expected,
                actual: result.stage_name,
            });
        }
        if self.strict && self.terminated_early {
            return Err(InvariantViolation::RecordedAfterTermination(result.stage_name));
        }
        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(InvariantViolation::ConfidenceOutOfRange {
                stage: result.stage_name,
                confidence: result.confidence,
            });
        }

        self.cumulative_confidence *= result.confidence;
        self.cumulative_errors.extend(result.errors.iter().cloned());
        if result.halted_chain {
            self.terminated_early = true;
        }
        self.results.push(result);
        Ok(())
    }

    /// Mark a stage as skipped (strict mode only)
    pub(crate) fn skip(&mut self, stage: StageName) {
        self.skipped.push(stage);
    }

    /// Result recorded for a stage
    #[inline]
    #[must_use]
    pub fn result_for(&self, stage: StageName) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage_name == stage)
    }

    /// Index of the first result with `success == false`
    #[inline]
    #[must_use]
    pub fn first_failing_stage(&self) -> Option<usize> {
        self.results.iter().position(|r| !r.success)
    }

    /// Index of the first result that halted the chain
    #[inline]
    #[must_use]
    pub fn first_halt(&self) -> Option<usize> {
        self.results.iter().position(|r| r.halted_chain)
    }

    /// Whether all four stages ran and the last one succeeded
    #[inline]
    #[must_use]
    pub fn reached_end(&self) -> bool {
        self.results.len() == StageName::ORDER.len()
            && self.results.last().is_some_and(|r| r.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(stage: StageName, success: bool, confidence: f64) -> StageResult {
        let errors = if success {
            vec![]
        } else {
            vec![StageError::judgment("FAILED")]
        };
        StageResult::new(stage, success, confidence, "", errors)
    }

    #[test]
    fn fresh_state() {
        let state = ChainState::new(RunId::new(), false);
        assert_eq!(state.cumulative_confidence, 1.0);
        assert!(state.results.is_empty());
        assert!(!state.terminated_early);
        assert_eq!(state.next_stage(), Some(StageName::Validator));
    }

    #[test]
    fn record_folds_confidence_and_errors() {
        let mut state = ChainState::new(RunId::new(), false);
        state.record(result(StageName::Validator, true, 0.8)).unwrap();
        state.record(result(StageName::RiskAnalyzer, false, 0.5)).unwrap();

        assert!((state.cumulative_confidence - 0.4).abs() < 1e-12);
        assert_eq!(state.cumulative_errors.len(), 1);
        assert!(state.terminated_early);
        assert_eq!(state.first_failing_stage(), Some(1));
        assert_eq!(state.next_stage(), Some(StageName::Approval));
    }

    #[test]
    fn record_rejects_out_of_order() {
        let mut state = ChainState::new(RunId::new(), false);
        let err = state
            .record(result(StageName::Approval, true, 1.0))
            .unwrap_err();
        assert_eq!(
            err,
            InvariantViolation::OutOfOrder {
                expected: StageName::Validator,
                actual: StageName::Approval,
            }
        );
    }

    #[test]
    fn record_rejects_fifth_result() {
        let mut state = ChainState::new(RunId::new(), false);
        for stage in StageName::ORDER {
            state.record(result(stage, true, 1.0)).unwrap();
        }
        assert!(matches!(
            state.record(result(StageName::Validator, true, 1.0)),
            Err(InvariantViolation::ChainFull(4))
        ));
    }

    #[test]
    fn strict_chain_refuses_after_halt() {
        let mut state = ChainState::new(RunId::new(), true);
        state.record(result(StageName::Validator, false, 0.3)).unwrap();
        assert!(matches!(
            state.record(result(StageName::RiskAnalyzer, true, 1.0)),
            Err(InvariantViolation::RecordedAfterTermination(StageName::RiskAnalyzer))
        ));
    }

    #[test]
    fn reached_end_requires_successful_payment() {
        let mut state = ChainState::new(RunId::new(), false);
        for stage in StageName::ORDER {
            let ok = stage != StageName::PaymentProcessor;
            state.record(result(stage, ok, 1.0)).unwrap();
        }
        assert!(!state.reached_end());
    }
}
