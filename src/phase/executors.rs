//! The six phase executor variants
//!
//! Each executor wraps a single view-tree operation. They are constructed
//! once by the lifecycle builder and shared across requests.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::RequestContext;
use crate::error::LifecycleError;
use crate::lifecycle::RenderStep;
use crate::phase::{PhaseExecutor, PhaseId, PhaseOutcome};
use crate::view::{ViewHandler, ViewResolution, ViewRoot};

fn require_view_root(
    ctx: &RequestContext,
    phase: PhaseId,
) -> Result<Arc<dyn ViewRoot>, LifecycleError> {
    ctx.view_root()
        .ok_or(LifecycleError::ViewNotFound { phase })
}

/// RESTORE_VIEW: locate or create the view root for this request
pub struct RestoreViewExecutor {
    view_handler: Arc<dyn ViewHandler>,
}

impl RestoreViewExecutor {
    pub fn new(view_handler: Arc<dyn ViewHandler>) -> Self {
        Self { view_handler }
    }
}

#[async_trait]
impl PhaseExecutor for RestoreViewExecutor {
    fn phase(&self) -> PhaseId {
        PhaseId::RestoreView
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError> {
        let phase = PhaseId::RestoreView;

        if let Some(root) = ctx.view_root() {
            debug!(
                request_id = %ctx.request_id(),
                view_id = %root.view_id(),
                "view root already present, skipping restore"
            );
            return Ok(PhaseOutcome::Continue);
        }

        let view_id = match self.view_handler.derive_view_id(ctx.request_path()) {
            ViewResolution::View(id) => id,
            ViewResolution::Redirect(target) => {
                info!(
                    request_id = %ctx.request_id(),
                    path = ctx.request_path(),
                    %target,
                    "request path needs a redirect, completing response"
                );
                self.view_handler
                    .redirect(ctx, &target)
                    .await
                    .map_err(|source| LifecycleError::execution(phase, source))?;
                ctx.set_redirect(target);
                ctx.complete_response();
                return Ok(PhaseOutcome::Stop);
            }
        };

        let restored = if ctx.is_postback() {
            self.view_handler
                .restore_view(ctx, &view_id)
                .await
                .map_err(|source| LifecycleError::execution(phase, source))?
        } else {
            None
        };

        let root = match restored {
            Some(root) => root,
            None => {
                // No submitted view state: build a fresh view and go
                // straight to rendering it.
                let root = self
                    .view_handler
                    .create_view(ctx, &view_id)
                    .await
                    .map_err(|source| LifecycleError::execution(phase, source))?;
                ctx.render_response();
                root
            }
        };

        debug!(
            request_id = %ctx.request_id(),
            view_id = %root.view_id(),
            postback = ctx.is_postback(),
            "view root installed"
        );
        ctx.set_view_root(root);
        Ok(PhaseOutcome::Continue)
    }
}

/// APPLY_REQUEST_VALUES: decode submitted values into the tree
pub struct ApplyRequestValuesExecutor;

#[async_trait]
impl PhaseExecutor for ApplyRequestValuesExecutor {
    fn phase(&self) -> PhaseId {
        PhaseId::ApplyRequestValues
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError> {
        let phase = PhaseId::ApplyRequestValues;
        let root = require_view_root(ctx, phase)?;
        root.process_decodes(ctx)
            .await
            .map_err(|source| LifecycleError::execution(phase, source))?;
        Ok(PhaseOutcome::Continue)
    }
}

/// PROCESS_VALIDATIONS: run validators across the tree
pub struct ProcessValidationsExecutor;

#[async_trait]
impl PhaseExecutor for ProcessValidationsExecutor {
    fn phase(&self) -> PhaseId {
        PhaseId::ProcessValidations
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError> {
        let phase = PhaseId::ProcessValidations;
        let root = require_view_root(ctx, phase)?;
        root.process_validators(ctx)
            .await
            .map_err(|source| LifecycleError::execution(phase, source))?;
        Ok(PhaseOutcome::Continue)
    }
}

/// UPDATE_MODEL_VALUES: push converted values into the model
pub struct UpdateModelValuesExecutor;

#[async_trait]
impl PhaseExecutor for UpdateModelValuesExecutor {
    fn phase(&self) -> PhaseId {
        PhaseId::UpdateModelValues
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError> {
        let phase = PhaseId::UpdateModelValues;
        let root = require_view_root(ctx, phase)?;
        root.process_updates(ctx)
            .await
            .map_err(|source| LifecycleError::execution(phase, source))?;
        Ok(PhaseOutcome::Continue)
    }
}

/// INVOKE_APPLICATION: broadcast queued application events
pub struct InvokeApplicationExecutor;

#[async_trait]
impl PhaseExecutor for InvokeApplicationExecutor {
    fn phase(&self) -> PhaseId {
        PhaseId::InvokeApplication
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError> {
        let phase = PhaseId::InvokeApplication;
        let root = require_view_root(ctx, phase)?;
        root.process_application(ctx)
            .await
            .map_err(|source| LifecycleError::execution(phase, source))?;
        Ok(PhaseOutcome::Continue)
    }
}

/// RENDER_RESPONSE: rebuild the view until it settles, then render it.
///
/// The driver owns the surrounding sub-step machine (listeners, flash,
/// resumption); this executor provides the two body pieces.
pub struct RenderResponseExecutor {
    view_handler: Arc<dyn ViewHandler>,
    max_build_view_cycles: usize,
}

impl RenderResponseExecutor {
    pub fn new(view_handler: Arc<dyn ViewHandler>, max_build_view_cycles: usize) -> Self {
        Self {
            view_handler,
            max_build_view_cycles,
        }
    }

    /// Build the view and publish the pre-render event, repeating while the
    /// publication keeps changing the view identifier or swapping the view
    /// root. Bounded: hitting the limit logs a warning and renders the view
    /// as it stands.
    pub(crate) async fn build_view_cycle(
        &self,
        ctx: &RequestContext,
    ) -> Result<(), LifecycleError> {
        let mut cycles = 0;
        loop {
            let root_before = ctx.view_root();
            let id_before = root_before.as_ref().map(|r| r.view_id());

            self.view_handler
                .build_view(ctx)
                .await
                .map_err(|source| LifecycleError::render(RenderStep::BuildView, source))?;
            self.view_handler
                .publish_pre_render(ctx)
                .await
                .map_err(|source| LifecycleError::render(RenderStep::BuildView, source))?;

            let root_after = ctx.view_root();
            let id_after = root_after.as_ref().map(|r| r.view_id());
            let identity_changed = match (&root_before, &root_after) {
                (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
                (None, None) => false,
                _ => true,
            };

            if id_after == id_before && !identity_changed {
                return Ok(());
            }

            cycles += 1;
            if cycles >= self.max_build_view_cycles {
                warn!(
                    request_id = %ctx.request_id(),
                    cycles,
                    view_id = ?id_after,
                    "view kept changing during pre-render publication, rendering it as-is"
                );
                return Ok(());
            }
        }
    }

    /// Hand the settled view to the view handler for rendering
    pub(crate) async fn render_view(&self, ctx: &RequestContext) -> Result<(), LifecycleError> {
        let root = require_view_root(ctx, PhaseId::RenderResponse)?;
        self.view_handler
            .render_view(ctx, root)
            .await
            .map_err(|source| LifecycleError::render(RenderStep::HandlerRender, source))
    }
}

#[async_trait]
impl PhaseExecutor for RenderResponseExecutor {
    fn phase(&self) -> PhaseId {
        PhaseId::RenderResponse
    }

    async fn execute(&self, ctx: &RequestContext) -> Result<PhaseOutcome, LifecycleError> {
        self.build_view_cycle(ctx).await?;
        if !ctx.is_response_complete() {
            self.render_view(ctx).await?;
        }
        Ok(PhaseOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use std::sync::Mutex;

    struct StubRoot {
        id: String,
    }

    #[async_trait]
    impl ViewRoot for StubRoot {
        fn view_id(&self) -> String {
            self.id.clone()
        }

        async fn process_decodes(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            Ok(())
        }

        async fn process_validators(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            Ok(())
        }

        async fn process_updates(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            Ok(())
        }

        async fn process_application(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            Ok(())
        }

        async fn encode(&self, _ctx: &RequestContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubHandler {
        restorable: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl ViewHandler for StubHandler {
        fn derive_view_id(&self, request_path: &str) -> ViewResolution {
            if request_path.ends_with('/') {
                ViewResolution::View(format!("{request_path}index.xhtml"))
            } else {
                ViewResolution::Redirect(format!("{request_path}/"))
            }
        }

        async fn restore_view(
            &self,
            _ctx: &RequestContext,
            view_id: &str,
        ) -> Result<Option<Arc<dyn ViewRoot>>, BoxError> {
            self.calls.lock().unwrap().push("restore");
            if self.restorable {
                Ok(Some(Arc::new(StubRoot {
                    id: view_id.to_string(),
                })))
            } else {
                Ok(None)
            }
        }

        async fn create_view(
            &self,
            _ctx: &RequestContext,
            view_id: &str,
        ) -> Result<Arc<dyn ViewRoot>, BoxError> {
            self.calls.lock().unwrap().push("create");
            Ok(Arc::new(StubRoot {
                id: view_id.to_string(),
            }))
        }

        async fn render_view(
            &self,
            _ctx: &RequestContext,
            _root: Arc<dyn ViewRoot>,
        ) -> Result<(), BoxError> {
            self.calls.lock().unwrap().push("render");
            Ok(())
        }
    }

    #[tokio::test]
    async fn restore_view_creates_and_marks_render_for_initial_requests() {
        let handler = Arc::new(StubHandler::default());
        let executor = RestoreViewExecutor::new(handler.clone());
        let ctx = RequestContext::new("/orders/");

        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Continue);
        assert!(ctx.is_render_response());
        assert_eq!(ctx.view_root().unwrap().view_id(), "/orders/index.xhtml");
        assert_eq!(*handler.calls.lock().unwrap(), vec!["create"]);
    }

    #[tokio::test]
    async fn restore_view_restores_postbacks_without_marking_render() {
        let handler = Arc::new(StubHandler {
            restorable: true,
            ..Default::default()
        });
        let executor = RestoreViewExecutor::new(handler.clone());
        let ctx = RequestContext::for_postback("/orders/");

        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Continue);
        assert!(!ctx.is_render_response());
        assert_eq!(*handler.calls.lock().unwrap(), vec!["restore"]);
    }

    #[tokio::test]
    async fn restore_view_redirect_is_a_normal_stop() {
        let handler = Arc::new(StubHandler::default());
        let executor = RestoreViewExecutor::new(handler);
        let ctx = RequestContext::new("/orders");

        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Stop);
        assert!(ctx.is_response_complete());
        assert_eq!(ctx.redirect().as_deref(), Some("/orders/"));
        assert!(ctx.view_root().is_none());
    }

    #[tokio::test]
    async fn later_phases_require_a_view_root() {
        let ctx = RequestContext::for_postback("/orders/");
        let err = ApplyRequestValuesExecutor.execute(&ctx).await.unwrap_err();
        assert!(err.is_view_not_found());
    }

    #[tokio::test]
    async fn render_executor_renders_once_the_view_settles() {
        let handler = Arc::new(StubHandler::default());
        let executor = RenderResponseExecutor::new(handler.clone(), 4);
        let ctx = RequestContext::new("/orders/");
        ctx.set_view_root(Arc::new(StubRoot {
            id: "/orders/index.xhtml".to_string(),
        }));

        let outcome = executor.execute(&ctx).await.unwrap();
        assert_eq!(outcome, PhaseOutcome::Continue);
        assert_eq!(*handler.calls.lock().unwrap(), vec!["render"]);
    }
}
