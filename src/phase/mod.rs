//! Phase identity and the executor contract
//!
//! A request moves through a fixed sequence of phases. Five of them form the
//! "execute" portion of the lifecycle; `RENDER_RESPONSE` is driven through a
//! dedicated entry point because it can be resumed mid-phase and must run
//! even when the execute portion short-circuited.

use async_trait::async_trait;
use strum_macros::{Display, EnumIter};

use crate::context::RequestContext;
use crate::error::{BoxError, LifecycleError};

pub mod executors;

/// Identifies one step of the fixed request-processing sequence.
///
/// Ordinal order defines execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseId {
    RestoreView,
    ApplyRequestValues,
    ProcessValidations,
    UpdateModelValues,
    InvokeApplication,
    RenderResponse,
}

impl PhaseId {
    /// Position of this phase in the fixed sequence
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    /// Stable name for logs and diagnostics
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RestoreView => "RESTORE_VIEW",
            Self::ApplyRequestValues => "APPLY_REQUEST_VALUES",
            Self::ProcessValidations => "PROCESS_VALIDATIONS",
            Self::UpdateModelValues => "UPDATE_MODEL_VALUES",
            Self::InvokeApplication => "INVOKE_APPLICATION",
            Self::RenderResponse => "RENDER_RESPONSE",
        }
    }
}

/// The execute-portion phases in execution order.
///
/// `RENDER_RESPONSE` is deliberately absent: rendering is reached only
/// through [`crate::lifecycle::Lifecycle::render`].
pub const EXECUTE_PHASES: [PhaseId; 5] = [
    PhaseId::RestoreView,
    PhaseId::ApplyRequestValues,
    PhaseId::ProcessValidations,
    PhaseId::UpdateModelValues,
    PhaseId::InvokeApplication,
];

/// What the driver should do after a phase body returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Proceed to the next phase (subject to the short-circuit flags)
    Continue,
    /// Stop the whole lifecycle now. A normal control-flow stop, not an
    /// error: the restore-view redirect uses this.
    Stop,
}

/// One phase's core operation on the view tree.
///
/// Executors are stateless strategy objects; the same instance serves every
/// concurrent request. All per-request state lives on the
/// [`RequestContext`].
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    /// The phase this executor implements
    fn phase(&self) -> PhaseId;

    /// Phase-specific setup run before the listeners are informed.
    ///
    /// Failures are published to the exception queue by the driver.
    async fn pre_phase(&self, _ctx: &RequestContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Run the phase body
    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError>;
}
