//! External judge abstraction
//!
//! Every stage obtains its raw judgment from an [`ExternalJudge`]. The engine
//! treats the judge as opaque: it sends a system prompt plus a JSON context
//! and gets back a [`RawJudgment`], which is validated into a [`Judgment`]
//! before any stage logic sees it.

use crate::error::JudgeError;
use crate::types::StageName;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Request sent to the judge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeRequest {
    /// Stage asking for the judgment
    pub stage: StageName,
    /// Fixed per-stage system prompt
    pub system_prompt: &'static str,
    /// Upstream view the stage is entitled to
    pub context: serde_json::Value,
}

impl JudgeRequest {
    /// Render the context as the user message
    #[must_use]
    pub fn user_message(&self) -> String {
        serde_json::to_string_pretty(&self.context).unwrap_or_else(|_| self.context.to_string())
    }
}

/// Judgment as received, every field optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawJudgment {
    /// Whether the stage's check passed
    #[serde(default)]
    pub success: Option<bool>,
    /// Self-reported certainty
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Rationale
    #[serde(default)]
    pub reasoning: Option<String>,
    /// Issues found
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

impl RawJudgment {
    /// Complete passing judgment
    #[must_use]
    pub fn pass(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            success: Some(true),
            confidence: Some(confidence),
            reasoning: Some(reasoning.into()),
            errors: Some(Vec::new()),
        }
    }

    /// Complete failing judgment
    #[must_use]
    pub fn fail(
        confidence: f64,
        reasoning: impl Into<String>,
        errors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            success: Some(false),
            confidence: Some(confidence),
            reasoning: Some(reasoning.into()),
            errors: Some(errors.into_iter().map(Into::into).collect()),
        }
    }
}

/// Validated judgment
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    /// Whether the stage's check passed
    pub success: bool,
    /// Certainty in [0, 1]
    pub confidence: f64,
    /// Rationale
    pub reasoning: String,
    /// Issues found
    pub errors: Vec<String>,
}

impl TryFrom<RawJudgment> for Judgment {
    type Error = JudgeError;

    fn try_from(raw: RawJudgment) -> Result<Self, Self::Error> {
        let success = raw.success.ok_or(JudgeError::MissingField("success"))?;
        let confidence = raw.confidence.ok_or(JudgeError::MissingField("confidence"))?;
        let reasoning = raw.reasoning.ok_or(JudgeError::MissingField("reasoning"))?;
        let errors = raw.errors.ok_or(JudgeError::MissingField("errors"))?;

        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(JudgeError::ConfidenceOutOfRange(confidence));
        }

        Ok(Self {
            success,
            confidence,
            reasoning,
            errors,
        })
    }
}

/// The external collaborator every stage consults
///
/// Implementations must be reentrant: one judge serves many concurrent runs.
#[async_trait::async_trait]
pub trait ExternalJudge: Send + Sync {
    /// Produce a raw judgment for a request
    async fn judge(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError>;
}

/// Judge that consults a fallback when the primary fails
///
/// The primary's answer is validated before it is accepted, so a malformed
/// primary judgment also falls through. A primary that does not answer
/// within its own timeout counts as failed, which leaves the fallback room
/// to answer inside the stage's judge timeout.
pub struct FallbackJudge {
    primary: Arc<dyn ExternalJudge>,
    fallback: Arc<dyn ExternalJudge>,
    primary_timeout: Option<Duration>,
}

impl FallbackJudge {
    /// Create new fallback chain with an unbounded primary
    #[must_use]
    pub fn new(primary: Arc<dyn ExternalJudge>, fallback: Arc<dyn ExternalJudge>) -> Self {
        Self {
            primary,
            fallback,
            primary_timeout: None,
        }
    }

    /// With a bound on the primary call
    #[inline]
    #[must_use]
    pub fn with_primary_timeout(mut self, timeout: Duration) -> Self {
        self.primary_timeout = Some(timeout);
        self
    }

    /// Bound the primary to three quarters of a stage's judge timeout
    #[inline]
    #[must_use]
    pub fn within(self, judge_timeout: Duration) -> Self {
        self.with_primary_timeout(judge_timeout * 3 / 4)
    }

    /// Bound on the primary call, if any
    #[inline]
    #[must_use]
    pub fn primary_timeout(&self) -> Option<Duration> {
        self.primary_timeout
    }

    async fn ask_primary(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError> {
        let Some(limit) = self.primary_timeout else {
            return self.primary.judge(request).await;
        };
        tokio::time::timeout(limit, self.primary.judge(request))
            .await
            .unwrap_or(Err(JudgeError::Timeout {
                duration_secs: limit.as_secs(),
            }))
    }
}

impl std::fmt::Debug for FallbackJudge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackJudge")
            .field("primary_timeout", &self.primary_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ExternalJudge for FallbackJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<RawJudgment, JudgeError> {
        let primary = self
            .ask_primary(request)
            .await
            .and_then(|raw| Judgment::try_from(raw.clone()).map(|_| raw));

        match primary {
            Ok(raw) => Ok(raw),
            Err(e) => {
                tracing::warn!(
                    "[{}] primary judge failed: {}, switching to fallback",
                    request.stage,
                    e
                );
                self.fallback.judge(request).await
            }
        }
    }
}
