use thiserror::Error;

use crate::lifecycle::RenderStep;
use crate::phase::PhaseId;

/// A type-erased error produced by external collaborators (view roots,
/// view handlers, listeners, flash scopes).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while driving a phase
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A phase that requires a view root found none. Fatal for the request;
    /// the remaining execute-phases are not attempted.
    #[error("No view root available for {phase} phase")]
    ViewNotFound {
        /// The phase that required the view root
        phase: PhaseId,
    },

    /// A flash scope pre-phase hook failed
    #[error("Flash scope hook failed during {phase}: {source}")]
    Flash {
        /// The phase whose flash hook failed
        phase: PhaseId,
        /// Underlying collaborator error
        source: BoxError,
    },

    /// A phase executor's pre-phase setup hook failed
    #[error("Pre-phase setup failed for {phase}: {source}")]
    PrePhase {
        /// The phase being set up
        phase: PhaseId,
        /// Underlying collaborator error
        source: BoxError,
    },

    /// The phase body itself failed
    #[error("{phase} phase failed: {source}")]
    Execution {
        /// The failing phase
        phase: PhaseId,
        /// Underlying collaborator error
        source: BoxError,
    },

    /// A render sub-step failed
    #[error("Render step {step} failed: {source}")]
    Render {
        /// The render sub-step that failed
        step: RenderStep,
        /// Underlying collaborator error
        source: BoxError,
    },

    /// The lifecycle was built with an incomplete configuration
    #[error("Lifecycle configuration error: {0}")]
    Configuration(String),
}

impl LifecycleError {
    /// Create an execution error for a phase body failure
    pub fn execution(phase: PhaseId, source: BoxError) -> Self {
        Self::Execution { phase, source }
    }

    /// Create a render sub-step error
    pub fn render(step: RenderStep, source: BoxError) -> Self {
        Self::Render { step, source }
    }

    /// Whether this is the fatal missing-view-root case
    pub fn is_view_not_found(&self) -> bool {
        matches!(self, Self::ViewNotFound { .. })
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
