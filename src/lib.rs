//! # Viewstra
//!
//! A six-phase request-processing lifecycle for component-based server-side
//! views, in the spirit of the Jakarta Faces lifecycle.
//!
//! Every request passes through a fixed sequence of phases:
//!
//! 1. `RESTORE_VIEW` builds or restores the component tree
//! 2. `APPLY_REQUEST_VALUES` decodes submitted values into the tree
//! 3. `PROCESS_VALIDATIONS` runs conversion and validation
//! 4. `UPDATE_MODEL_VALUES` pushes validated values into the model
//! 5. `INVOKE_APPLICATION` runs application actions
//! 6. `RENDER_RESPONSE` encodes the tree into the response
//!
//! The [`lifecycle::Lifecycle`] driver owns the sequence; applications plug
//! in a [`view::ViewHandler`] for the tree-shaped work, register
//! [`listener::PhaseListener`]s to observe or veto phases, and read failures
//! out of the per-request exception queue on the
//! [`context::RequestContext`].
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use viewstra::prelude::*;
//!
//! let lifecycle = Lifecycle::builder()
//!     .view_handler(Arc::new(MyViewHandler::new()))
//!     .build()?;
//!
//! let ctx = RequestContext::new("/orders/");
//! lifecycle.execute(&ctx).await;
//! lifecycle.render(&ctx).await;
//! ```

pub mod context;
pub mod error;
pub mod exception;
pub mod flash;
pub mod lifecycle;
pub mod listener;
pub mod phase;
pub mod view;

/// Commonly used types, re-exported for convenience
pub mod prelude {
    pub use crate::context::RequestContext;
    pub use crate::error::{BoxError, LifecycleError};
    pub use crate::exception::{ExceptionEvent, ExceptionHandler, LoggingExceptionHandler};
    pub use crate::flash::{Flash, FlashScope};
    pub use crate::lifecycle::{Lifecycle, LifecycleBuilder, RenderStep};
    pub use crate::listener::{
        ListenerResult, PhaseEvent, PhaseInterest, PhaseListener,
    };
    pub use crate::phase::{PhaseExecutor, PhaseId, PhaseOutcome, EXECUTE_PHASES};
    pub use crate::view::{ViewHandler, ViewResolution, ViewRoot};
}
