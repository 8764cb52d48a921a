//! Cascade Core - Agent-chain orchestration with cascade-failure classification
//!
//! Invoices flow through four stages that each consult an external judge:
//! - Validator checks input and flags dirty data
//! - Risk analyzer scores fraud and urgency indicators
//! - Approval decides against the approval policy
//! - Payment processor releases funds if upstream trust suffices
//!
//! Each stage's confidence is multiplied into a cumulative confidence, and
//! once a stage halts the chain its successors either stop (strict mode) or
//! run on degraded trust. After the run, a pure classifier labels the failure
//! pattern.
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(CascadeConfig::new(), Arc::new(HeuristicJudge::new()))?;
//!
//! let invoice = Invoice::new("INV-001", "vendor-7", 500.0, "Standard equipment rental");
//! let report = orchestrator.run(&invoice).await?;
//!
//! println!("{:?} / {:?}", report.cascade_type, report.severity);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod chain;
pub mod classifier;
pub mod config;
pub mod error;
pub mod heuristic;
pub mod judge;
pub mod orchestrator;
pub mod report;
pub mod stage;
pub mod types;

pub use chain::ChainState;
pub use classifier::{CascadeClassifier, CascadeType, Classification, ClassificationRule, Severity};
pub use config::{ApprovalPolicy, CascadeConfig, ClassifierThresholds, ValidatorRules};
pub use error::{CascadeError, ConfigError, InvariantViolation, JudgeError};
pub use heuristic::{HeuristicJudge, RiskLevel};
pub use judge::{ExternalJudge, FallbackJudge, JudgeRequest, Judgment, RawJudgment};
pub use orchestrator::Orchestrator;
pub use report::{CascadeAnalysis, CascadeReport, FinalDecision};
pub use stage::Stage;
pub use types::{ErrorClass, Invoice, RunId, StageError, StageName, StageResult, TrustLevel};

/// Re-exported so callers can cancel runs without a direct dependency
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running invoices through the pipeline
    pub use crate::{
        CancellationToken, CascadeConfig, CascadeReport, CascadeType, ExternalJudge,
        FinalDecision, HeuristicJudge, Invoice, Orchestrator, Severity, StageName, StageResult,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
