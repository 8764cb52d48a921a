//! Cascade classification
//!
//! Post-hoc, pure analysis of a finished chain. The decision table is
//! evaluated top to bottom and the first matching rule wins:
//!
//! | Rule | Condition | Type | Severity |
//! |---|---|---|---|
//! | dirty data | validator failed with a dirty-data error and halted | `DirtyData` | `Low` |
//! | half cascade | first failure at stage 0 or 1, end not reached | `HalfCascade` | `Medium` |
//! | midchain | first failure at stage 2, end reached | `MidchainCascade` | `High` |
//! | full cascade | first failure at stage 0 (not dirty data), end reached | `FullCascade` | `Critical` |
//! | soft full cascade | no failure, validator below the misjudgment threshold, end reached, final confidence below the floor | `FullCascade` | `Critical` |
//! | no failure | no stage failed | `None` | `None` |
//! | ambiguous | anything else | `None` | `None` |

use crate::chain::ChainState;
use crate::config::ClassifierThresholds;
use crate::types::StageName;
use serde::{Deserialize, Serialize};

/// Failure pattern of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CascadeType {
    /// Bad input caught and halted by the validator
    DirtyData,
    /// Cascade interrupted before the final stage
    HalfCascade,
    /// Cascade originating mid-chain that reached the final stage
    MidchainCascade,
    /// Cascade originating at the first stage that reached the final stage
    FullCascade,
    /// No cascade, or none that matches a known pattern
    None,
}

/// Severity of a classified run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Nothing to report
    None,
    /// Contained failure
    Low,
    /// Interrupted cascade
    Medium,
    /// Cascade that reached payment
    High,
    /// Cascade from the first stage that reached payment
    Critical,
}

/// Which row of the decision table matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    /// Validator rejected dirty input
    DirtyData,
    /// Early failure, end not reached
    HalfCascade,
    /// Approval failure that still reached the end
    Midchain,
    /// Hard validator failure that still reached the end
    FullCascade,
    /// Validator misjudgment carried silently to the end
    SoftFullCascade,
    /// Clean run
    NoFailure,
    /// No rule matched; inspect the raw chain state
    Ambiguous,
}

/// Classifier output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    /// Cascade type
    pub cascade_type: CascadeType,
    /// Severity
    pub severity: Severity,
    /// Matching rule
    pub rule: ClassificationRule,
}

impl Classification {
    fn new(cascade_type: CascadeType, severity: Severity, rule: ClassificationRule) -> Self {
        Self {
            cascade_type,
            severity,
            rule,
        }
    }

    /// Whether the run needs manual inspection
    #[inline]
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.rule == ClassificationRule::Ambiguous
    }
}

/// Pure classifier over finished chains
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CascadeClassifier {
    thresholds: ClassifierThresholds,
}

impl CascadeClassifier {
    /// Create classifier with thresholds
    #[inline]
    #[must_use]
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self { thresholds }
    }

    /// Cascade type and severity of a chain
    #[inline]
    #[must_use]
    pub fn classify(&self, chain: &ChainState) -> (CascadeType, Severity) {
        let c = self.classify_detailed(chain);
        (c.cascade_type, c.severity)
    }

    /// Full classification including the matching rule
    #[must_use]
    pub fn classify_detailed(&self, chain: &ChainState) -> Classification {
        let reached_end = chain.reached_end();
        let first_failing = chain.first_failing_stage();
        let validator = chain.result_for(StageName::Validator);

        if let Some(v) = validator {
            if !v.success && v.has_dirty_data() && v.halted_chain {
                return Classification::new(
                    CascadeType::DirtyData,
                    Severity::Low,
                    ClassificationRule::DirtyData,
                );
            }
        }

        match first_failing {
            Some(0 | 1) if !reached_end => Classification::new(
                CascadeType::HalfCascade,
                Severity::Medium,
                ClassificationRule::HalfCascade,
            ),
            Some(2) if reached_end => Classification::new(
                CascadeType::MidchainCascade,
                Severity::High,
                ClassificationRule::Midchain,
            ),
            Some(0) if reached_end && validator.is_some_and(|v| !v.has_dirty_data()) => {
                Classification::new(
                    CascadeType::FullCascade,
                    Severity::Critical,
                    ClassificationRule::FullCascade,
                )
            }
            None if reached_end && self.is_soft_full_cascade(chain) => Classification::new(
                CascadeType::FullCascade,
                Severity::Critical,
                ClassificationRule::SoftFullCascade,
            ),
            None => Classification::new(
                CascadeType::None,
                Severity::None,
                ClassificationRule::NoFailure,
            ),
            Some(_) => Classification::new(
                CascadeType::None,
                Severity::None,
                ClassificationRule::Ambiguous,
            ),
        }
    }

    fn is_soft_full_cascade(&self, chain: &ChainState) -> bool {
        chain
            .result_for(StageName::Validator)
            .is_some_and(|v| v.confidence < self.thresholds.subtle_misjudgment_confidence)
            && chain.cumulative_confidence < self.thresholds.full_cascade_confidence_floor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunId, StageError, StageResult};

    fn chain(strict: bool, steps: &[(bool, f64, Option<StageError>)]) -> ChainState {
        let mut chain = ChainState::new(RunId::new(), strict);
        for (stage, (success, confidence, error)) in StageName::ORDER.iter().zip(steps) {
            let errors = error.iter().cloned().collect();
            chain
                .record(StageResult::new(*stage, *success, *confidence, "", errors))
                .unwrap();
        }
        chain
    }

    fn classify(chain: &ChainState) -> (CascadeType, Severity) {
        CascadeClassifier::default().classify(chain)
    }

    #[test]
    fn dirty_data() {
        let c = chain(
            true,
            &[(false, 0.35, Some(StageError::invalid_input("INVALID_AMOUNT")))],
        );
        assert_eq!(classify(&c), (CascadeType::DirtyData, Severity::Low));
    }

    #[test]
    fn dirty_data_wins_even_if_later_stages_ran() {
        let c = chain(
            false,
            &[
                (false, 0.35, Some(StageError::invalid_input("INVALID_AMOUNT"))),
                (true, 0.9, None),
                (true, 0.9, None),
                (true, 0.9, None),
            ],
        );
        assert_eq!(classify(&c), (CascadeType::DirtyData, Severity::Low));
    }

    #[test]
    fn half_cascade() {
        let c = chain(
            true,
            &[
                (true, 0.9, None),
                (false, 0.4, Some(StageError::judgment("CRITICAL_RISK"))),
            ],
        );
        assert_eq!(classify(&c), (CascadeType::HalfCascade, Severity::Medium));
    }

    #[test]
    fn midchain_cascade() {
        let c = chain(
            false,
            &[
                (true, 0.9, None),
                (true, 0.9, None),
                (false, 0.5, Some(StageError::judgment("REJECTED"))),
                (true, 0.9, None),
            ],
        );
        assert_eq!(classify(&c), (CascadeType::MidchainCascade, Severity::High));
    }

    #[test]
    fn full_cascade_from_hard_validator_failure() {
        let c = chain(
            false,
            &[
                (false, 0.6, Some(StageError::judgment("UNCLEAR_TERMS"))),
                (true, 0.9, None),
                (true, 0.9, None),
                (true, 0.9, None),
            ],
        );
        assert_eq!(classify(&c), (CascadeType::FullCascade, Severity::Critical));
    }

    #[test]
    fn full_cascade_from_subtle_misjudgment() {
        let c = chain(
            false,
            &[
                (true, 0.6, None),
                (true, 0.9, None),
                (true, 0.9, None),
                (true, 0.9, None),
            ],
        );
        let detailed = CascadeClassifier::default().classify_detailed(&c);
        assert_eq!(detailed.cascade_type, CascadeType::FullCascade);
        assert_eq!(detailed.severity, Severity::Critical);
        assert_eq!(detailed.rule, ClassificationRule::SoftFullCascade);
    }

    #[test]
    fn subtle_misjudgment_above_floor_is_clean() {
        let c = chain(
            false,
            &[
                (true, 0.6, None),
                (true, 1.0, None),
                (true, 1.0, None),
                (true, 1.0, None),
            ],
        );
        assert_eq!(classify(&c), (CascadeType::None, Severity::None));
    }

    #[test]
    fn thresholds_are_configurable() {
        let c = chain(
            false,
            &[
                (true, 0.6, None),
                (true, 1.0, None),
                (true, 1.0, None),
                (true, 1.0, None),
            ],
        );
        let classifier = CascadeClassifier::new(ClassifierThresholds {
            subtle_misjudgment_confidence: 0.7,
            full_cascade_confidence_floor: 0.65,
        });
        assert_eq!(
            classifier.classify(&c),
            (CascadeType::FullCascade, Severity::Critical)
        );
    }

    #[test]
    fn clean_run() {
        let c = chain(
            false,
            &[
                (true, 0.95, None),
                (true, 0.9, None),
                (true, 0.9, None),
                (true, 0.95, None),
            ],
        );
        let detailed = CascadeClassifier::default().classify_detailed(&c);
        assert_eq!(detailed.cascade_type, CascadeType::None);
        assert_eq!(detailed.rule, ClassificationRule::NoFailure);
    }

    #[test]
    fn approval_failure_blocking_payment_is_ambiguous() {
        let c = chain(
            false,
            &[
                (true, 0.9, None),
                (true, 0.9, None),
                (false, 0.7, Some(StageError::judgment("REQUIRES_HUMAN_REVIEW"))),
                (false, 0.3, Some(StageError::judgment("NOT_APPROVED"))),
            ],
        );
        let detailed = CascadeClassifier::default().classify_detailed(&c);
        assert_eq!(detailed.cascade_type, CascadeType::None);
        assert!(detailed.is_ambiguous());
    }

    #[test]
    fn classification_is_idempotent() {
        let c = chain(
            false,
            &[
                (true, 0.6, None),
                (true, 0.9, None),
                (true, 0.9, None),
                (true, 0.9, None),
            ],
        );
        let classifier = CascadeClassifier::default();
        let first = classifier.classify_detailed(&c);
        for _ in 0..10 {
            assert_eq!(classifier.classify_detailed(&c), first);
        }
    }
}
