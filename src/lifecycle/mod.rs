//! The lifecycle driver
//!
//! One [`Lifecycle`] instance is shared across every concurrent request.
//! It is immutable after construction except for listener registration, so
//! request threads never contend on it.
//!
//! # Request processing
//!
//! ```text
//! execute():  RESTORE_VIEW
//!               ↓
//!             APPLY_REQUEST_VALUES
//!               ↓
//!             PROCESS_VALIDATIONS
//!               ↓
//!             UPDATE_MODEL_VALUES
//!               ↓
//!             INVOKE_APPLICATION
//!
//! render():   RENDER_RESPONSE (before-listeners → build-view cycle
//!                              → handler render → after-listeners)
//! ```
//!
//! Two flags short-circuit the sequence: response-complete abandons
//! processing immediately, render-response skips the remaining
//! execute-phases but still renders. Every phase is bracketed by flash
//! pre/post hooks and by the registered phase listeners; failures anywhere
//! in the body are published to the exception queue, never re-thrown, and
//! the bracketing cleanup always runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use strum_macros::Display;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{LifecycleError, Result};
use crate::exception::{ExceptionHandler, LoggingExceptionHandler};
use crate::flash::{Flash, FlashScope};
use crate::listener::{ListenerPass, ListenerRegistry, PhaseListener, PhaseListenerManager};
use crate::phase::executors::{
    ApplyRequestValuesExecutor, InvokeApplicationExecutor, ProcessValidationsExecutor,
    RenderResponseExecutor, RestoreViewExecutor, UpdateModelValuesExecutor,
};
use crate::phase::{PhaseExecutor, PhaseId, PhaseOutcome};
use crate::view::ViewHandler;

/// Default bound for the pre-render build-view cycle
pub const DEFAULT_MAX_BUILD_VIEW_CYCLES: usize = 20;

/// The four resumable sub-steps of the render phase, in order.
///
/// The context records the last completed step so a suspended request can
/// resume mid-render (partial/ajax flows, test harnesses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RenderStep {
    BeforeListeners,
    BuildView,
    HandlerRender,
    AfterListeners,
}

/// The six-phase request lifecycle driver
pub struct Lifecycle {
    executors: Vec<Arc<dyn PhaseExecutor>>,
    render_executor: RenderResponseExecutor,
    listeners: ListenerRegistry,
    flash: Arc<dyn Flash>,
    exception_handler: Arc<dyn ExceptionHandler>,
    first_request_done: AtomicBool,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("executors", &self.executors.len())
            .field("first_request_done", &self.first_request_done)
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    /// Start building a lifecycle
    pub fn builder() -> LifecycleBuilder {
        LifecycleBuilder::new()
    }

    /// Register a phase listener. Safe while requests are in flight:
    /// running requests keep the snapshot they pinned.
    pub fn add_phase_listener(&self, listener: Arc<dyn PhaseListener>) {
        self.listeners.add(listener);
    }

    /// Remove a previously registered listener (by identity)
    pub fn remove_phase_listener(&self, listener: &Arc<dyn PhaseListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Whether any request has completed a render since this lifecycle was
    /// built. Flips false→true exactly once and never reverts; consumers
    /// use it to forbid late configuration mutations.
    pub fn has_processed_first_request(&self) -> bool {
        self.first_request_done.load(Ordering::Acquire)
    }

    /// Run the execute portion of the lifecycle: RESTORE_VIEW through
    /// INVOKE_APPLICATION, honoring the short-circuit flags between phases.
    ///
    /// Always returns normally. Failures are observable through the
    /// context's exception queue and flags, not through a return value.
    pub async fn execute(&self, ctx: &RequestContext) {
        debug!(
            request_id = %ctx.request_id(),
            path = ctx.request_path(),
            postback = ctx.is_postback(),
            "starting execute portion of the lifecycle"
        );
        for executor in &self.executors {
            if self.run_phase(ctx, executor.as_ref()).await {
                debug!(
                    request_id = %ctx.request_id(),
                    phase = %executor.phase(),
                    "execute portion short-circuited"
                );
                break;
            }
        }
    }

    /// Run a single named phase. `RENDER_RESPONSE` dispatches to
    /// [`Lifecycle::render`]. This is the seam test harnesses drive phases
    /// through one at a time.
    pub async fn execute_phase(&self, ctx: &RequestContext, phase: PhaseId) {
        if phase == PhaseId::RenderResponse {
            self.render(ctx).await;
            return;
        }
        if let Some(executor) = self.executors.iter().find(|e| e.phase() == phase) {
            self.run_phase(ctx, executor.as_ref()).await;
        }
    }

    /// Drive one phase to completion. Returns whether the execute loop
    /// should stop.
    async fn run_phase(&self, ctx: &RequestContext, executor: &dyn PhaseExecutor) -> bool {
        let phase = executor.phase();
        // Setting the marker is the first action of the phase; listeners
        // and collaborators rely on it.
        ctx.set_current_phase(phase);
        debug!(request_id = %ctx.request_id(), %phase, "entering phase");

        let manager = PhaseListenerManager::new(&self.listeners);
        let mut pass: Option<ListenerPass> = None;

        let body = self.run_phase_body(ctx, executor, &manager, &mut pass).await;

        // Cleanup always runs, even when the body failed or short-circuited.
        if let Some(pass) = pass {
            manager.inform_after(ctx, pass).await;
        }
        if let Err(error) = self.flash.do_post_phase_actions(ctx).await {
            warn!(
                request_id = %ctx.request_id(),
                %phase,
                %error,
                "flash post-phase hook failed"
            );
        }

        let mut stop = false;
        match body {
            Ok(PhaseOutcome::Continue) => {}
            Ok(PhaseOutcome::Stop) => stop = true,
            Err(error) => {
                // A missing view is unrecoverable for the remaining phases;
                // everything else leaves the decision to the handler via
                // the flags it may set while draining.
                if error.is_view_not_found() {
                    stop = true;
                }
                ctx.queue_exception(Box::new(error));
            }
        }

        self.exception_handler.handle(ctx).await;

        stop || ctx.is_response_complete() || ctx.is_render_response()
    }

    async fn run_phase_body(
        &self,
        ctx: &RequestContext,
        executor: &dyn PhaseExecutor,
        manager: &PhaseListenerManager<'_>,
        pass: &mut Option<ListenerPass>,
    ) -> Result<PhaseOutcome> {
        let phase = executor.phase();

        self.flash
            .do_pre_phase_actions(ctx)
            .await
            .map_err(|source| LifecycleError::Flash { phase, source })?;
        executor
            .pre_phase(ctx)
            .await
            .map_err(|source| LifecycleError::PrePhase { phase, source })?;

        *pass = Some(manager.inform_before(phase, ctx).await);

        if ctx.is_response_complete() {
            // The response is already fully produced; skip the body but let
            // the caller run this phase's cleanup.
            return Ok(PhaseOutcome::Stop);
        }
        // A render-response request set by a before-listener still lets this
        // phase's body finish; the loop exits afterwards.

        executor.execute(ctx).await
    }

    /// Run the render phase.
    ///
    /// Skipped entirely when the response is already complete. Otherwise
    /// drives the four resumable sub-steps, publishing failures to the
    /// exception queue like the execute phases do, and finally records that
    /// a first request has been processed. Always returns normally.
    pub async fn render(&self, ctx: &RequestContext) {
        if ctx.is_response_complete() {
            debug!(
                request_id = %ctx.request_id(),
                "response already complete, skipping render"
            );
            return;
        }
        let phase = PhaseId::RenderResponse;
        ctx.set_current_phase(phase);
        debug!(request_id = %ctx.request_id(), %phase, "entering phase");

        let manager = PhaseListenerManager::new(&self.listeners);
        let body = self.run_render_body(ctx, &manager).await;

        if !render_step_done(ctx, RenderStep::AfterListeners) {
            if let Some(pass) = ctx.take_render_pass() {
                manager.inform_after(ctx, pass).await;
            }
            ctx.set_last_render_step(RenderStep::AfterListeners);
        }
        if let Err(error) = self.flash.do_post_phase_actions(ctx).await {
            warn!(
                request_id = %ctx.request_id(),
                %phase,
                %error,
                "flash post-phase hook failed"
            );
        }

        if let Err(error) = body {
            ctx.queue_exception(Box::new(error));
        }
        self.exception_handler.handle(ctx).await;

        if !self.first_request_done.load(Ordering::Relaxed) {
            self.first_request_done.store(true, Ordering::Release);
        }
        debug!(request_id = %ctx.request_id(), "render phase finished");
    }

    async fn run_render_body(
        &self,
        ctx: &RequestContext,
        manager: &PhaseListenerManager<'_>,
    ) -> Result<()> {
        let phase = PhaseId::RenderResponse;

        self.flash
            .do_pre_phase_actions(ctx)
            .await
            .map_err(|source| LifecycleError::Flash { phase, source })?;
        self.render_executor
            .pre_phase(ctx)
            .await
            .map_err(|source| LifecycleError::PrePhase { phase, source })?;

        if !render_step_done(ctx, RenderStep::BeforeListeners) {
            let pass = manager.inform_before(phase, ctx).await;
            ctx.stash_render_pass(pass);
            ctx.set_last_render_step(RenderStep::BeforeListeners);
        }
        if ctx.is_response_complete() {
            return Ok(());
        }

        if !render_step_done(ctx, RenderStep::BuildView) {
            self.render_executor.build_view_cycle(ctx).await?;
            ctx.set_last_render_step(RenderStep::BuildView);
        }

        if !render_step_done(ctx, RenderStep::HandlerRender) {
            if !ctx.is_response_complete() {
                self.render_executor.render_view(ctx).await?;
            }
            ctx.set_last_render_step(RenderStep::HandlerRender);
        }

        Ok(())
    }
}

fn render_step_done(ctx: &RequestContext, step: RenderStep) -> bool {
    ctx.last_render_step() >= Some(step)
}

/// Fluent construction for [`Lifecycle`]
///
/// # Example
///
/// ```rust,ignore
/// use viewstra::prelude::*;
///
/// let lifecycle = Lifecycle::builder()
///     .view_handler(FaceletsViewHandler::new(templates))
///     .max_build_view_cycles(10)
///     .build()?;
///
/// let ctx = RequestContext::for_postback("/orders/");
/// lifecycle.execute(&ctx).await;
/// lifecycle.render(&ctx).await;
/// ```
pub struct LifecycleBuilder {
    view_handler: Option<Arc<dyn ViewHandler>>,
    flash: Option<Arc<dyn Flash>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    max_build_view_cycles: usize,
}

impl Default for LifecycleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleBuilder {
    pub fn new() -> Self {
        Self {
            view_handler: None,
            flash: None,
            exception_handler: None,
            max_build_view_cycles: DEFAULT_MAX_BUILD_VIEW_CYCLES,
        }
    }

    /// Set the view handler (required)
    pub fn view_handler(mut self, handler: Arc<dyn ViewHandler>) -> Self {
        self.view_handler = Some(handler);
        self
    }

    /// Replace the default in-memory [`FlashScope`]
    pub fn flash(mut self, flash: Arc<dyn Flash>) -> Self {
        self.flash = Some(flash);
        self
    }

    /// Replace the default [`LoggingExceptionHandler`]
    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exception_handler = Some(handler);
        self
    }

    /// Bound for the pre-render build-view cycle
    pub fn max_build_view_cycles(mut self, max: usize) -> Self {
        self.max_build_view_cycles = max.max(1);
        self
    }

    /// Build the lifecycle
    ///
    /// # Errors
    /// Returns [`LifecycleError::Configuration`] when no view handler was
    /// provided.
    pub fn build(self) -> Result<Lifecycle> {
        let view_handler = self.view_handler.ok_or_else(|| {
            LifecycleError::Configuration("a view handler is required".to_string())
        })?;

        let executors: Vec<Arc<dyn PhaseExecutor>> = vec![
            Arc::new(RestoreViewExecutor::new(view_handler.clone())),
            Arc::new(ApplyRequestValuesExecutor),
            Arc::new(ProcessValidationsExecutor),
            Arc::new(UpdateModelValuesExecutor),
            Arc::new(InvokeApplicationExecutor),
        ];

        Ok(Lifecycle {
            executors,
            render_executor: RenderResponseExecutor::new(
                view_handler,
                self.max_build_view_cycles,
            ),
            listeners: ListenerRegistry::new(),
            flash: self
                .flash
                .unwrap_or_else(|| Arc::new(FlashScope::new())),
            exception_handler: self
                .exception_handler
                .unwrap_or_else(|| Arc::new(LoggingExceptionHandler)),
            first_request_done: AtomicBool::new(false),
        })
    }
}
