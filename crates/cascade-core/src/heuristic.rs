//! Deterministic offline judge
//!
//! Stands in for the language-model service when none is configured, and
//! serves as the fallback when it is unreachable. It reads the same JSON
//! context a remote judge would see and applies fixed scoring rules.

use crate::config::ApprovalPolicy;
use crate::error::JudgeError;
use crate::judge::{ExternalJudge, JudgeRequest, RawJudgment};
use crate::types::{StageError, StageName};
use serde_json::Value;

/// Words that suggest urgency or authority manipulation
const SUSPICIOUS_KEYWORDS: [&str; 9] = [
    "urgent",
    "ceo",
    "approved",
    "critical",
    "immediate",
    "pre-approved",
    "director",
    "emergency",
    "bypass",
];

/// Words that make a description ambiguous without making it invalid
const VAGUE_MARKERS: [&str; 4] = ["unclear", "incomplete", "discrepanc", "somewhat"];

/// Risk bands produced by the risk stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    /// Score below 0.3
    Low,
    /// Score in [0.3, 0.5)
    Medium,
    /// Score in [0.5, 0.7)
    High,
    /// Score of 0.7 or more
    Critical,
}

impl RiskLevel {
    /// Band for a score in [0, 1]
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::Critical
        } else if score >= 0.5 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Recover the band from a risk stage's reasoning text
    fn parse(reasoning: &str) -> Option<Self> {
        [
            RiskLevel::Critical,
            RiskLevel::High,
            RiskLevel::Medium,
            RiskLevel::Low,
        ]
        .into_iter()
        .find(|level| reasoning.contains(&format!("{} risk", level.as_str())))
    }
}

/// Approval outcome before it is rendered as a judgment
enum Decision {
    Approve,
    Reject(&'static str),
    /// Human review, with an optional extra reason code
    Review(Option<&'static str>),
}

/// Approval certainty, half of which rests on the upstream stages
fn approval_confidence(base: f64, upstream: f64) -> f64 {
    round((base * (0.5 + 0.5 * upstream)).max(0.1))
}

/// Rule-based judge
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicJudge;

impl HeuristicJudge {
    /// Create new heuristic judge
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn validate(context: &Value) -> Result<RawJudgment, JudgeError> {
        let invoice = field(context, "invoice")?;
        let amount = number(invoice, "amount")?;
        let description = text(invoice, "description")?;
        let trust = invoice.get("vendor_trust").and_then(Value::as_str).unwrap_or("standard");

        let mut issues: Vec<&str> = Vec::new();
        let mut confidence: f64 = 0.85;

        if amount <= 0.0 {
            issues.push("INVALID_AMOUNT");
            confidence -= 0.3;
        } else if amount > 100_000.0 {
            issues.push("UNUSUALLY_HIGH_AMOUNT");
            confidence -= 0.1;
        }

        let len = description.trim().chars().count();
        if len < 10 {
            issues.push("DESCRIPTION_TOO_SHORT");
            confidence -= 0.2;
        } else if len > 1000 {
            issues.push("DESCRIPTION_TOO_LONG");
            confidence -= 0.1;
        }

        if trust == "low" {
            issues.push("LOW_TRUST_VENDOR");
            confidence -= 0.15;
        }

        // Vague wording lowers certainty but is not reported as an issue.
        let lower = description.to_lowercase();
        if VAGUE_MARKERS.iter().any(|m| lower.contains(m)) {
            confidence -= 0.25;
        }

        let success = issues.iter().all(|i| *i == "LOW_TRUST_VENDOR");
        let reasoning = format!(
            "Heuristic validation completed. Issues: {}",
            if issues.is_empty() {
                "None".to_string()
            } else {
                issues.join(", ")
            }
        );

        Ok(RawJudgment {
            success: Some(success),
            confidence: Some(round(confidence.max(0.1))),
            reasoning: Some(reasoning),
            errors: Some(issues.into_iter().map(String::from).collect()),
        })
    }

    fn analyze_risk(context: &Value) -> Result<RawJudgment, JudgeError> {
        let invoice = field(context, "invoice")?;
        let validator = field(context, "validator")?;

        if !validator.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(RawJudgment::fail(
                0.1,
                "Cannot analyze - validator failed",
                ["VALIDATOR_FAILED"],
            ));
        }

        let validator_confidence = number(validator, "confidence")?;
        let amount = number(invoice, "amount")?;
        let description = text(invoice, "description")?.to_lowercase();
        let trust = invoice.get("vendor_trust").and_then(Value::as_str).unwrap_or("standard");

        let mut score: f64 = 0.3;
        let mut indicators: Vec<&str> = Vec::new();

        if validator_confidence < 0.5 {
            score += 0.2;
            indicators.push("LOW_VALIDATOR_CONFIDENCE");
        }

        if amount > 50_000.0 {
            score += 0.4;
            indicators.push("VERY_HIGH_AMOUNT");
        } else if amount > 10_000.0 {
            score += 0.2;
            indicators.push("HIGH_AMOUNT");
        }

        let found = SUSPICIOUS_KEYWORDS
            .iter()
            .filter(|kw| description.contains(*kw))
            .count();
        if found >= 3 {
            score += 0.3;
            indicators.push("MULTIPLE_URGENCY_KEYWORDS");
        } else if found >= 1 {
            score += 0.1;
            indicators.push("SUSPICIOUS_KEYWORDS");
        }

        if trust == "low" {
            score += 0.2;
            indicators.push("UNVERIFIED_VENDOR");
        }

        let score = score.min(1.0);
        let level = RiskLevel::from_score(score);
        let reasoning = format!(
            "Heuristic risk analysis: {} risk (score: {:.2}), indicators: {}",
            level.as_str(),
            score,
            if indicators.is_empty() {
                "none".to_string()
            } else {
                indicators.join(", ")
            }
        );
        let reported: Vec<String> = if level >= RiskLevel::High {
            indicators.into_iter().map(String::from).collect()
        } else {
            Vec::new()
        };

        Ok(RawJudgment {
            success: Some(level != RiskLevel::Critical),
            confidence: Some(round(1.0 - score * 0.3)),
            reasoning: Some(reasoning),
            errors: Some(reported),
        })
    }

    fn decide(context: &Value) -> Result<RawJudgment, JudgeError> {
        let invoice = field(context, "invoice")?;
        let validator = field(context, "validator")?;
        let risk = field(context, "risk_analyzer")?;
        let policy: ApprovalPolicy = context
            .get("policy")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JudgeError::Malformed(e.to_string()))?
            .unwrap_or_default();

        if !risk.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(RawJudgment::fail(
                0.2,
                "Cannot approve - risk analysis failed",
                ["RISK_ANALYSIS_FAILED"],
            ));
        }

        let amount = number(invoice, "amount")?;
        let upstream = number(validator, "confidence")? * number(risk, "confidence")?;
        let accumulated = error_count(validator) + error_count(risk);
        let level = RiskLevel::parse(text(risk, "reasoning")?).unwrap_or(RiskLevel::Medium);
        let acceptable = level <= RiskLevel::Medium;

        let (decision, confidence, reasoning) = if accumulated >= 5 {
            (
                Decision::Reject("TOO_MANY_ERRORS"),
                0.8,
                format!("Too many errors accumulated ({accumulated})"),
            )
        } else if upstream < 0.3 {
            (
                Decision::Review(Some("LOW_UPSTREAM_CONFIDENCE")),
                0.5,
                format!("Low cumulative confidence: {upstream:.2}"),
            )
        } else if level == RiskLevel::Critical {
            (
                Decision::Reject("CRITICAL_RISK"),
                0.9,
                "Critical risk level detected".to_string(),
            )
        } else if level == RiskLevel::High && !policy.speed_priority {
            (
                Decision::Review(None),
                0.7,
                "High risk level requires review".to_string(),
            )
        } else if amount > policy.manual_review_threshold {
            if level == RiskLevel::Low && upstream > 0.6 {
                (
                    Decision::Approve,
                    0.8,
                    format!("Amount {amount} above threshold but low risk"),
                )
            } else {
                (
                    Decision::Review(None),
                    0.7,
                    format!("Amount {amount} exceeds manual review threshold"),
                )
            }
        } else if amount < policy.auto_approve_threshold {
            if acceptable && upstream > 0.5 {
                (
                    Decision::Approve,
                    0.9,
                    format!("Low amount ({amount}) with acceptable risk"),
                )
            } else {
                (
                    Decision::Review(None),
                    0.6,
                    "Low amount but confidence/risk concerns".to_string(),
                )
            }
        } else if acceptable && upstream > 0.5 {
            (
                Decision::Approve,
                0.75,
                format!("Mid-range amount with {} risk", level.as_str()),
            )
        } else {
            (
                Decision::Review(None),
                0.6,
                "Standard review process for mid-range amount".to_string(),
            )
        };

        Ok(match decision {
            Decision::Approve => RawJudgment::pass(
                approval_confidence(confidence, upstream),
                format!("{reasoning} (upstream confidence {upstream:.2})"),
            ),
            Decision::Reject(code) => RawJudgment::fail(confidence, reasoning, [code]),
            Decision::Review(reason) => RawJudgment::fail(
                confidence,
                reasoning,
                std::iter::once(StageError::REQUIRES_HUMAN_REVIEW).chain(reason),
            ),
        })
    }

    fn process_payment(context: &Value) -> Result<RawJudgment, JudgeError> {
        let approval = field(context, "approval")?;
        if approval.get("success").and_then(Value::as_bool).unwrap_or(false) {
            Ok(RawJudgment::pass(0.95, "Payment released"))
        } else {
            let confidence = approval
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            Ok(RawJudgment::fail(
                confidence,
                "Payment not processed - invoice was not approved",
                ["NOT_APPROVED"],
            ))
        }
    }
}

#[async_trait::async_trait]
impl ExternalJudge for HeuristicJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError> {
        let context = &request.context;
        match request.stage {
            StageName::Validator => Self::validate(context),
            StageName::RiskAnalyzer => Self::analyze_risk(context),
            StageName::Approval => Self::decide(context),
            StageName::PaymentProcessor => Self::process_payment(context),
        }
    }
}

fn field<'a>(value: &'a Value, key: &'static str) -> Result<&'a Value, JudgeError> {
    match value.get(key) {
        Some(Value::Null) | None => Err(JudgeError::Malformed(format!("context missing `{key}`"))),
        Some(v) => Ok(v),
    }
}

fn number(value: &Value, key: &'static str) -> Result<f64, JudgeError> {
    field(value, key)?
        .as_f64()
        .ok_or_else(|| JudgeError::Malformed(format!("`{key}` is not a number")))
}

fn text<'a>(value: &'a Value, key: &'static str) -> Result<&'a str, JudgeError> {
    field(value, key)?
        .as_str()
        .ok_or_else(|| JudgeError::Malformed(format!("`{key}` is not a string")))
}

fn error_count(value: &Value) -> usize {
    value.get("errors").and_then(Value::as_array).map_or(0, Vec::len)
}

fn round(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(stage: StageName, context: Value) -> JudgeRequest {
        JudgeRequest {
            stage,
            system_prompt: "",
            context,
        }
    }

    #[tokio::test]
    async fn clean_invoice_validates() {
        let raw = HeuristicJudge
            .judge(&request(
                StageName::Validator,
                json!({"invoice": {"amount": 500.0, "description": "Standard equipment rental"}}),
            ))
            .await
            .unwrap();
        assert_eq!(raw.success, Some(true));
        assert_eq!(raw.confidence, Some(0.85));
    }

    #[tokio::test]
    async fn low_trust_vendor_alone_still_passes() {
        let raw = HeuristicJudge
            .judge(&request(
                StageName::Validator,
                json!({"invoice": {
                    "amount": 500.0,
                    "description": "Standard equipment rental",
                    "vendor_trust": "low"
                }}),
            ))
            .await
            .unwrap();
        assert_eq!(raw.success, Some(true));
        assert_eq!(raw.confidence, Some(0.7));
    }

    #[tokio::test]
    async fn vague_description_lowers_confidence() {
        let raw = HeuristicJudge
            .judge(&request(
                StageName::Validator,
                json!({"invoice": {
                    "amount": 4500.0,
                    "description": "Equipment rental with somewhat unclear specifications"
                }}),
            ))
            .await
            .unwrap();
        assert_eq!(raw.success, Some(true));
        assert_eq!(raw.confidence, Some(0.6));
    }

    #[tokio::test]
    async fn risk_fails_when_validator_failed() {
        let raw = HeuristicJudge
            .judge(&request(
                StageName::RiskAnalyzer,
                json!({
                    "invoice": {"amount": 10.0, "description": "x"},
                    "validator": {"success": false, "confidence": 0.35}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(raw.success, Some(false));
        assert_eq!(raw.errors, Some(vec!["VALIDATOR_FAILED".to_string()]));
    }

    #[tokio::test]
    async fn critical_risk_fails() {
        let raw = HeuristicJudge
            .judge(&request(
                StageName::RiskAnalyzer,
                json!({
                    "invoice": {
                        "amount": 75_000.0,
                        "description": "URGENT emergency payment approved by the CEO",
                        "vendor_trust": "low"
                    },
                    "validator": {"success": true, "confidence": 0.7}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(raw.success, Some(false));
        assert!(raw.reasoning.unwrap().contains("critical risk"));
    }

    #[tokio::test]
    async fn missing_context_is_malformed() {
        let err = HeuristicJudge
            .judge(&request(StageName::Approval, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeError::Malformed(_)));
    }

    #[test]
    fn risk_level_parse() {
        assert_eq!(
            RiskLevel::parse("Heuristic risk analysis: high risk (score: 0.60)"),
            Some(RiskLevel::High)
        );
        assert_eq!(RiskLevel::parse("no band here"), None);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
    }

    #[tokio::test]
    async fn payment_follows_approval() {
        let raw = HeuristicJudge
            .judge(&request(
                StageName::PaymentProcessor,
                json!({"approval": {"success": false, "confidence": 0.6}}),
            ))
            .await
            .unwrap();
        assert_eq!(raw.success, Some(false));
        assert_eq!(raw.confidence, Some(0.6));
    }

    fn approval_context(validator: f64, risk: f64) -> Value {
        json!({
            "invoice": {"amount": 500.0, "description": "Standard equipment rental"},
            "validator": {"success": true, "confidence": validator, "errors": []},
            "risk_analyzer": {
                "success": true,
                "confidence": risk,
                "reasoning": "Heuristic risk analysis: low risk (score: 0.20)",
                "errors": []
            }
        })
    }

    #[tokio::test]
    async fn approval_confidence_follows_upstream() {
        let trusted = HeuristicJudge
            .judge(&request(StageName::Approval, approval_context(0.99, 0.99)))
            .await
            .unwrap();
        let shaky = HeuristicJudge
            .judge(&request(StageName::Approval, approval_context(0.72, 0.72)))
            .await
            .unwrap();

        assert_eq!(trusted.success, Some(true));
        assert_eq!(shaky.success, Some(true));
        assert_eq!(trusted.confidence, Some(0.891));
        assert_eq!(shaky.confidence, Some(0.683));
    }

    #[tokio::test]
    async fn low_upstream_confidence_requests_review() {
        let raw = HeuristicJudge
            .judge(&request(StageName::Approval, approval_context(0.5, 0.5)))
            .await
            .unwrap();

        assert_eq!(raw.success, Some(false));
        assert_eq!(
            raw.errors,
            Some(vec![
                StageError::REQUIRES_HUMAN_REVIEW.to_string(),
                "LOW_UPSTREAM_CONFIDENCE".to_string(),
            ])
        );
    }
}
