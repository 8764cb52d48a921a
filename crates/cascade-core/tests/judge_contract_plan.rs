//! Functional tests for the contract between stages and the external judge.
//!
//! Each stage may only show the judge the upstream view it is entitled to,
//! stages are consulted strictly in order, and strict mode never consults
//! the judge for skipped stages.

use async_trait::async_trait;
use cascade_core::{
    CascadeConfig, ExternalJudge, JudgeError, JudgeRequest, Orchestrator, RawJudgment, StageName,
};
use cascade_test_utils::{clean_invoice, dirty_invoice};
use mockall::{mock, predicate::function, Sequence};
use std::sync::Arc;

mock! {
    pub Judge {}

    #[async_trait]
    impl ExternalJudge for Judge {
        async fn judge(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError>;
    }
}

fn context_keys(request: &JudgeRequest) -> Vec<String> {
    request
        .context
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default()
}

fn build(strict: bool, judge: MockJudge) -> Orchestrator {
    Orchestrator::new(CascadeConfig::default().with_strict(strict), Arc::new(judge)).unwrap()
}

/// Tenet: stages are consulted in pipeline order, once each.
#[tokio::test]
async fn stages_consult_judge_in_order() {
    let mut judge = MockJudge::new();
    let mut seq = Sequence::new();

    for stage in StageName::ORDER {
        judge
            .expect_judge()
            .with(function(move |r: &JudgeRequest| r.stage == stage))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(RawJudgment::pass(0.9, "ok")));
    }

    let report = build(false, judge).run(&clean_invoice()).await.unwrap();
    assert!(report.reached_end);
}

/// Tenet: each stage sees exactly its entitled upstream view, and payment
/// never sees the raw invoice.
#[tokio::test]
async fn stages_see_only_their_upstream_view() {
    let mut judge = MockJudge::new();

    judge
        .expect_judge()
        .withf(|r| r.stage == StageName::Validator)
        .times(1)
        .returning(|r| {
            assert_eq!(context_keys(r), vec!["invoice"]);
            Ok(RawJudgment::pass(0.9, "valid"))
        });
    judge
        .expect_judge()
        .withf(|r| r.stage == StageName::RiskAnalyzer)
        .times(1)
        .returning(|r| {
            assert_eq!(context_keys(r), vec!["invoice", "validator"]);
            assert_eq!(r.context["validator"]["reasoning"], "valid");
            Ok(RawJudgment::pass(0.8, "low risk"))
        });
    judge
        .expect_judge()
        .withf(|r| r.stage == StageName::Approval)
        .times(1)
        .returning(|r| {
            assert_eq!(
                context_keys(r),
                vec!["invoice", "policy", "risk_analyzer", "validator"]
            );
            Ok(RawJudgment::pass(0.9, "approved"))
        });
    judge
        .expect_judge()
        .withf(|r| r.stage == StageName::PaymentProcessor)
        .times(1)
        .returning(|r| {
            let keys = context_keys(r);
            assert!(!keys.contains(&"invoice".to_string()));
            assert_eq!(
                keys,
                vec![
                    "approval",
                    "cumulative_confidence",
                    "risk_analyzer",
                    "validator"
                ]
            );
            Ok(RawJudgment::pass(0.95, "released"))
        });

    let report = build(false, judge).run(&clean_invoice()).await.unwrap();
    assert!(report.reached_end);
}

/// Tenet: strict mode never consults the judge after a halt.
#[tokio::test]
async fn strict_mode_stops_consulting_judge() {
    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .withf(|r| r.stage == StageName::Validator)
        .times(1)
        .returning(|_| Ok(RawJudgment::pass(0.9, "looks fine")));
    judge
        .expect_judge()
        .withf(|r| r.stage != StageName::Validator)
        .never();

    let report = build(true, judge).run(&dirty_invoice()).await.unwrap();
    assert_eq!(report.chain_state.results.len(), 1);
}

/// Tenet: every system prompt is fixed and non-empty.
#[tokio::test]
async fn every_stage_sends_a_system_prompt() {
    let mut judge = MockJudge::new();
    judge
        .expect_judge()
        .times(4)
        .returning(|r| {
            assert!(!r.system_prompt.is_empty());
            Ok(RawJudgment::pass(0.9, "ok"))
        });

    build(false, judge).run(&clean_invoice()).await.unwrap();
}
