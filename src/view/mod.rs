//! Contracts to the view technology
//!
//! The lifecycle never parses or mutates a view itself. It only invokes the
//! tree-walk hooks a [`ViewRoot`] exposes and delegates view construction,
//! restoration, and rendering to a [`ViewHandler`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::BoxError;
use crate::listener::{ListenerResult, PhaseEvent};

/// Outcome of mapping a request path to a view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewResolution {
    /// The path maps to this view identifier
    View(String),
    /// The path needs a redirect first (e.g. a missing trailing slash).
    /// Handled as a normal control-flow stop, never as an error.
    Redirect(String),
}

/// The in-memory representation of the current page for one request.
///
/// Implementations own the component tree; the lifecycle only calls the
/// phase hooks on it, in phase order. All hooks must be idempotent: a
/// resumed or re-entered render may call them again.
#[async_trait]
pub trait ViewRoot: Send + Sync {
    /// Identifier of this view (e.g. `/orders/list.xhtml`)
    fn view_id(&self) -> String;

    /// APPLY_REQUEST_VALUES: decode submitted values into the tree
    async fn process_decodes(&self, ctx: &RequestContext) -> std::result::Result<(), BoxError>;

    /// PROCESS_VALIDATIONS: run validators across the tree
    async fn process_validators(&self, ctx: &RequestContext) -> std::result::Result<(), BoxError>;

    /// UPDATE_MODEL_VALUES: push converted values into the model
    async fn process_updates(&self, ctx: &RequestContext) -> std::result::Result<(), BoxError>;

    /// INVOKE_APPLICATION: broadcast queued application events
    async fn process_application(&self, ctx: &RequestContext)
    -> std::result::Result<(), BoxError>;

    /// RENDER_RESPONSE: write the markup for this tree
    async fn encode(&self, ctx: &RequestContext) -> std::result::Result<(), BoxError>;

    /// View-bound before-phase hook, the expression-listener variant.
    ///
    /// Invoked after the registered listeners, from APPLY_REQUEST_VALUES
    /// onward (never during RESTORE_VIEW, where the view does not exist yet).
    async fn before_phase(&self, _event: &PhaseEvent<'_>) -> ListenerResult {
        Ok(())
    }

    /// View-bound after-phase hook. Fires only if the paired
    /// [`ViewRoot::before_phase`] call succeeded.
    async fn after_phase(&self, _event: &PhaseEvent<'_>) -> ListenerResult {
        Ok(())
    }
}

/// Creates, restores, and renders views.
///
/// One handler instance serves every concurrent request.
#[async_trait]
pub trait ViewHandler: Send + Sync {
    /// Map a request path to a view identifier or a redirect
    fn derive_view_id(&self, request_path: &str) -> ViewResolution;

    /// Restore the view a previous request rendered, if its state was
    /// submitted back. `None` means nothing restorable exists.
    async fn restore_view(
        &self,
        ctx: &RequestContext,
        view_id: &str,
    ) -> std::result::Result<Option<Arc<dyn ViewRoot>>, BoxError>;

    /// Create a fresh view for the identifier
    async fn create_view(
        &self,
        ctx: &RequestContext,
        view_id: &str,
    ) -> std::result::Result<Arc<dyn ViewRoot>, BoxError>;

    /// Produce the response for the view
    async fn render_view(
        &self,
        ctx: &RequestContext,
        root: Arc<dyn ViewRoot>,
    ) -> std::result::Result<(), BoxError>;

    /// Populate the view tree before rendering. Called once per build-view
    /// cycle; re-entered while the pre-render publication keeps replacing
    /// the view.
    async fn build_view(&self, _ctx: &RequestContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Publish the pre-render event to whoever subscribed. Subscribers may
    /// navigate, which swaps the view root on the context; the driver
    /// detects that and rebuilds.
    async fn publish_pre_render(&self, _ctx: &RequestContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Issue the redirect a [`ViewResolution::Redirect`] asked for
    async fn redirect(
        &self,
        _ctx: &RequestContext,
        _target: &str,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}
