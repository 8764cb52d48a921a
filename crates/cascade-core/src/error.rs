//! Error types for Cascade Core
//!
//! Stage-level failures are data, not errors: they are recorded as
//! [`StageResult`](crate::types::StageResult)s. The types here cover what
//! may legitimately cross the orchestrator boundary:
//! - Chain invariant violations (programming defects)
//! - Configuration problems
//! - External judge failures, before a stage converts them

use crate::types::StageName;

/// Main cascade error type
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// A chain invariant was violated while recording a result
    #[error("chain invariant violated: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Chain invariants the orchestrator refuses to break
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    /// More than four results would be recorded
    #[error("chain already holds {0} results")]
    ChainFull(usize),

    /// A stage ran out of the fixed order
    #[error("expected stage {expected}, got {actual}")]
    OutOfOrder {
        /// Stage the chain expected next
        expected: StageName,
        /// Stage that was actually recorded
        actual: StageName,
    },

    /// A stage was recorded after the chain was terminated in strict mode
    #[error("stage {0} recorded after strict termination")]
    RecordedAfterTermination(StageName),

    /// Recorded confidence outside [0, 1]
    #[error("stage {stage} recorded confidence {confidence}")]
    ConfidenceOutOfRange {
        /// Offending stage
        stage: StageName,
        /// Offending value
        confidence: f64,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A threshold lies outside [0, 1]
    #[error("{name} must lie in [0, 1], got {value}")]
    ThresholdOutOfRange {
        /// Threshold name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Inconsistent limits
    #[error("invalid limits: {0}")]
    InvalidLimits(String),

    /// An injection pattern does not compile
    #[error("invalid injection pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern
        pattern: String,
        /// Underlying regex error
        #[source]
        source: regex::Error,
    },
}

/// External judge failures
///
/// Never escapes a stage: each variant is converted into a halted
/// [`StageResult`](crate::types::StageResult) with an external-call error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JudgeError {
    /// The call did not complete in time
    #[error("judge timed out after {duration_secs}s")]
    Timeout {
        /// Configured timeout
        duration_secs: u64,
    },

    /// Network or transport failure
    #[error("judge transport failed: {0}")]
    Transport(String),

    /// Remote endpoint answered with a non-success status
    #[error("judge returned status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// Response could not be parsed
    #[error("malformed judgment: {0}")]
    Malformed(String),

    /// A required field was absent
    #[error("judgment missing field `{0}`")]
    MissingField(&'static str),

    /// Confidence outside [0, 1] or not finite
    #[error("judgment confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

impl JudgeError {
    /// Error code recorded on the stage result
    #[inline]
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "JUDGE_TIMEOUT",
            Self::Transport(_) | Self::Status { .. } => "JUDGE_TRANSPORT",
            Self::Malformed(_) => "JUDGE_MALFORMED",
            Self::MissingField(_) => "JUDGE_MISSING_FIELD",
            Self::ConfidenceOutOfRange(_) => "JUDGE_CONFIDENCE_OUT_OF_RANGE",
        }
    }

    /// Check if a retry could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport(_) | Self::Status { .. }
        )
    }
}
