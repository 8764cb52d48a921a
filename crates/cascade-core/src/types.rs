//! Core types for the cascade engine
//!
//! Defines the fundamental types shared by every stage:
//! - Run identifiers
//! - Invoice input records
//! - Stage names and their fixed order
//! - Error descriptors and their classes
//! - Per-stage results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;

/// Unique run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor trust level as known at submission time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// New or flagged vendor
    Low,
    /// Regular vendor
    #[default]
    Standard,
    /// Long-standing vendor
    High,
}

impl TrustLevel {
    /// Whether the vendor counts as verified
    #[inline]
    #[must_use]
    pub fn is_verified(self) -> bool {
        !matches!(self, TrustLevel::Low)
    }
}

/// Invoice record submitted to the chain
///
/// Opaque to the engine beyond being serialized into judge contexts and
/// checked by the validator's input rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Vendor-assigned invoice number
    pub invoice_number: String,
    /// Vendor identifier
    pub vendor_id: String,
    /// Amount billed
    pub amount: f64,
    /// Free-text description
    pub description: String,
    /// Trust level of the vendor
    #[serde(default)]
    pub vendor_trust: TrustLevel,
    /// Days until payment is due
    #[serde(default)]
    pub due_in_days: Option<i64>,
    /// Additional free-form fields
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Invoice {
    /// Create new invoice
    #[inline]
    #[must_use]
    pub fn new(
        invoice_number: impl Into<String>,
        vendor_id: impl Into<String>,
        amount: f64,
        description: impl Into<String>,
    ) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            vendor_id: vendor_id.into(),
            amount,
            description: description.into(),
            vendor_trust: TrustLevel::Standard,
            due_in_days: None,
            fields: BTreeMap::new(),
        }
    }

    /// With vendor trust level
    #[inline]
    #[must_use]
    pub fn with_trust(mut self, trust: TrustLevel) -> Self {
        self.vendor_trust = trust;
        self
    }

    /// With due date offset
    #[inline]
    #[must_use]
    pub fn due_in(mut self, days: i64) -> Self {
        self.due_in_days = Some(days);
        self
    }

    /// With extra field
    #[inline]
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// The four pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageName {
    /// Stage 1: input validation
    Validator,
    /// Stage 2: risk analysis
    RiskAnalyzer,
    /// Stage 3: approval decision
    Approval,
    /// Stage 4: payment release
    PaymentProcessor,
}

impl StageName {
    /// Fixed execution order
    pub const ORDER: [StageName; 4] = [
        StageName::Validator,
        StageName::RiskAnalyzer,
        StageName::Approval,
        StageName::PaymentProcessor,
    ];

    /// Zero-based position in the chain
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            StageName::Validator => 0,
            StageName::RiskAnalyzer => 1,
            StageName::Approval => 2,
            StageName::PaymentProcessor => 3,
        }
    }

    /// Stable name used in logs and reports
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Validator => "validator",
            StageName::RiskAnalyzer => "risk_analyzer",
            StageName::Approval => "approval",
            StageName::PaymentProcessor => "payment_processor",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error class carried on every descriptor
///
/// The class is assigned by the stage that raises the error. The classifier
/// relies on it and never re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed or malicious input (dirty data), raised by the validator
    InvalidInput,
    /// A stage's own well-formed negative conclusion
    Judgment,
    /// The external judge failed; always halts the chain
    ExternalCall,
}

impl ErrorClass {
    /// Short name used in the rendered descriptor
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::InvalidInput => "invalid_input",
            ErrorClass::Judgment => "judgment",
            ErrorClass::ExternalCall => "external_call",
        }
    }
}

/// Error descriptor raised by a stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageError {
    /// Error class
    pub class: ErrorClass,
    /// Machine-readable code, e.g. `INVALID_AMOUNT`
    pub code: String,
    /// Optional human-readable detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StageError {
    /// Code an approval raises when the invoice needs a human decision
    pub const REQUIRES_HUMAN_REVIEW: &'static str = "REQUIRES_HUMAN_REVIEW";

    /// Create new descriptor
    #[inline]
    #[must_use]
    pub fn new(class: ErrorClass, code: impl Into<String>) -> Self {
        Self {
            class,
            code: code.into(),
            detail: None,
        }
    }

    /// Dirty-data descriptor
    #[inline]
    #[must_use]
    pub fn invalid_input(code: impl Into<String>) -> Self {
        Self::new(ErrorClass::InvalidInput, code)
    }

    /// Judgment descriptor
    #[inline]
    #[must_use]
    pub fn judgment(code: impl Into<String>) -> Self {
        Self::new(ErrorClass::Judgment, code)
    }

    /// External-call descriptor
    #[inline]
    #[must_use]
    pub fn external_call(code: impl Into<String>) -> Self {
        Self::new(ErrorClass::ExternalCall, code)
    }

    /// With detail
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether this descriptor asks for human review
    #[inline]
    #[must_use]
    pub fn requests_review(&self) -> bool {
        self.code == Self::REQUIRES_HUMAN_REVIEW
    }

    /// Whether this is a dirty-data descriptor
    #[inline]
    #[must_use]
    pub fn is_dirty_data(&self) -> bool {
        self.class == ErrorClass::InvalidInput
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.class.as_str(), self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

/// Immutable record produced by one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Which stage produced this result
    pub stage_name: StageName,
    /// Whether the stage's own check passed
    pub success: bool,
    /// Recorded confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Free-text rationale, carried for audit
    pub reasoning: String,
    /// Errors raised directly by this stage
    pub errors: Vec<StageError>,
    /// Whether this stage determined processing must not continue
    pub halted_chain: bool,
    /// When the result was produced
    pub recorded_at: DateTime<Utc>,
}

impl StageResult {
    /// Build a result; a failed stage always halts the chain
    #[must_use]
    pub fn new(
        stage_name: StageName,
        success: bool,
        confidence: f64,
        reasoning: impl Into<String>,
        errors: Vec<StageError>,
    ) -> Self {
        Self {
            stage_name,
            success,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            errors,
            halted_chain: !success,
            recorded_at: Utc::now(),
        }
    }

    /// Whether any own error carries the dirty-data tag
    #[inline]
    #[must_use]
    pub fn has_dirty_data(&self) -> bool {
        self.errors.iter().any(StageError::is_dirty_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_generation() {
        let id1 = RunId::new();
        let id2 = RunId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn stage_order_matches_index() {
        for (i, stage) in StageName::ORDER.iter().enumerate() {
            assert_eq!(stage.index(), i);
        }
    }

    #[test]
    fn stage_error_display() {
        let err = StageError::invalid_input("INVALID_AMOUNT").with_detail("amount -100");
        assert_eq!(err.to_string(), "invalid_input:INVALID_AMOUNT: amount -100");
        assert!(err.is_dirty_data());

        let err = StageError::judgment("HIGH_RISK");
        assert_eq!(err.to_string(), "judgment:HIGH_RISK");
        assert!(!err.is_dirty_data());
    }

    #[test]
    fn failed_result_halts() {
        let result = StageResult::new(StageName::Approval, false, 0.4, "rejected", vec![]);
        assert!(result.halted_chain);

        let result = StageResult::new(StageName::Approval, true, 0.4, "approved", vec![]);
        assert!(!result.halted_chain);
    }

    #[test]
    fn result_confidence_is_clamped() {
        let result = StageResult::new(StageName::Validator, true, 1.7, "", vec![]);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn invoice_serde() {
        let invoice = Invoice::new("INV-1", "vendor-7", 500.0, "Standard equipment rental")
            .with_trust(TrustLevel::High)
            .due_in(30);
        let json = serde_json::to_string(&invoice).unwrap();
        let back: Invoice = serde_json::from_str(&json).unwrap();
        assert_eq!(back, invoice);

        let minimal: Invoice = serde_json::from_str(
            r#"{"invoice_number":"A","vendor_id":"v","amount":1.0,"description":"d"}"#,
        )
        .unwrap();
        assert_eq!(minimal.vendor_trust, TrustLevel::Standard);
    }
}
