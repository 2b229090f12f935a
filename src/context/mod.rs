//! Per-request mutable state
//!
//! A [`RequestContext`] is created when a request arrives and dropped when
//! its response has been produced. It is owned by exactly one in-flight
//! request and never shared across requests; interior mutability exists so
//! that listeners and executors holding a shared reference can flip the
//! short-circuit flags mid-phase. None of the locks are held across an
//! await point.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::BoxError;
use crate::exception::ExceptionEvent;
use crate::lifecycle::RenderStep;
use crate::listener::ListenerPass;
use crate::phase::PhaseId;
use crate::view::ViewRoot;

/// Mutable state carried through one request's lifecycle run
pub struct RequestContext {
    request_id: Uuid,
    request_path: String,
    postback: bool,

    response_complete: AtomicBool,
    render_response: AtomicBool,
    current_phase: Mutex<Option<PhaseId>>,

    view_root: RwLock<Option<Arc<dyn ViewRoot>>>,
    redirect: Mutex<Option<String>>,
    exceptions: Mutex<VecDeque<ExceptionEvent>>,
    attributes: DashMap<String, String>,

    last_render_step: Mutex<Option<RenderStep>>,
    render_pass: Mutex<Option<ListenerPass>>,
}

impl RequestContext {
    /// Context for an initial (non-postback) request
    pub fn new(request_path: impl Into<String>) -> Self {
        Self::build(request_path.into(), false)
    }

    /// Context for a postback: the request carries submitted view state
    pub fn for_postback(request_path: impl Into<String>) -> Self {
        Self::build(request_path.into(), true)
    }

    fn build(request_path: String, postback: bool) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request_path,
            postback,
            response_complete: AtomicBool::new(false),
            render_response: AtomicBool::new(false),
            current_phase: Mutex::new(None),
            view_root: RwLock::new(None),
            redirect: Mutex::new(None),
            exceptions: Mutex::new(VecDeque::new()),
            attributes: DashMap::new(),
            last_render_step: Mutex::new(None),
            render_pass: Mutex::new(None),
        }
    }

    /// Unique id of this request, carried into every log line
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Path info the request arrived with
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// Whether the request carries submitted view state
    pub fn is_postback(&self) -> bool {
        self.postback
    }

    /// Mark the response as fully produced. All further phase processing
    /// stops at the next check point. The flag never reverts.
    pub fn complete_response(&self) {
        self.response_complete.store(true, Ordering::Release);
    }

    /// Whether the response has been fully produced
    pub fn is_response_complete(&self) -> bool {
        self.response_complete.load(Ordering::Acquire)
    }

    /// Skip the remaining execute-phases and jump to rendering.
    /// The flag never reverts.
    pub fn render_response(&self) {
        self.render_response.store(true, Ordering::Release);
    }

    /// Whether a jump to rendering was requested
    pub fn is_render_response(&self) -> bool {
        self.render_response.load(Ordering::Acquire)
    }

    /// The phase currently being processed, if any.
    ///
    /// Setting this marker is the first action of every phase; collaborators
    /// rely on it being accurate during their callbacks.
    pub fn current_phase(&self) -> Option<PhaseId> {
        *self.current_phase.lock().expect("request context lock poisoned")
    }

    pub(crate) fn set_current_phase(&self, phase: PhaseId) {
        *self.current_phase.lock().expect("request context lock poisoned") = Some(phase);
    }

    /// The active view root, once RESTORE_VIEW produced one
    pub fn view_root(&self) -> Option<Arc<dyn ViewRoot>> {
        self.view_root
            .read()
            .expect("request context lock poisoned")
            .clone()
    }

    /// Install or replace the active view root. Pre-render subscribers use
    /// this to navigate mid-render.
    pub fn set_view_root(&self, root: Arc<dyn ViewRoot>) {
        *self.view_root.write().expect("request context lock poisoned") = Some(root);
    }

    /// Where a restore-view redirect pointed, if one was issued
    pub fn redirect(&self) -> Option<String> {
        self.redirect.lock().expect("request context lock poisoned").clone()
    }

    pub(crate) fn set_redirect(&self, target: String) {
        *self.redirect.lock().expect("request context lock poisoned") = Some(target);
    }

    /// Publish an exception event against the current phase.
    ///
    /// The queue is only ever inspected by the installed
    /// [`crate::exception::ExceptionHandler`], which the driver triggers at
    /// the end of every phase.
    pub fn queue_exception(&self, error: BoxError) {
        let event = ExceptionEvent {
            phase: self.current_phase(),
            error,
        };
        self.exceptions
            .lock()
            .expect("request context lock poisoned")
            .push_back(event);
    }

    /// Pop the oldest queued exception event
    pub fn pop_exception(&self) -> Option<ExceptionEvent> {
        self.exceptions
            .lock()
            .expect("request context lock poisoned")
            .pop_front()
    }

    /// Whether any exception events are waiting to be drained
    pub fn has_exceptions(&self) -> bool {
        !self
            .exceptions
            .lock()
            .expect("request context lock poisoned")
            .is_empty()
    }

    /// Read a request-scoped attribute
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).map(|v| v.clone())
    }

    /// Store a request-scoped attribute
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// The last render sub-step that completed, for mid-render resumption
    pub fn last_render_step(&self) -> Option<RenderStep> {
        *self
            .last_render_step
            .lock()
            .expect("request context lock poisoned")
    }

    pub(crate) fn set_last_render_step(&self, step: RenderStep) {
        *self
            .last_render_step
            .lock()
            .expect("request context lock poisoned") = Some(step);
    }

    pub(crate) fn stash_render_pass(&self, pass: ListenerPass) {
        *self.render_pass.lock().expect("request context lock poisoned") = Some(pass);
    }

    pub(crate) fn take_render_pass(&self) -> Option<ListenerPass> {
        self.render_pass
            .lock()
            .expect("request context lock poisoned")
            .take()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("request_path", &self.request_path)
            .field("postback", &self.postback)
            .field("response_complete", &self.is_response_complete())
            .field("render_response", &self.is_render_response())
            .field("current_phase", &self.current_phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear_and_only_flip_on() {
        let ctx = RequestContext::new("/orders");
        assert!(!ctx.is_response_complete());
        assert!(!ctx.is_render_response());

        ctx.render_response();
        ctx.complete_response();
        assert!(ctx.is_response_complete());
        assert!(ctx.is_render_response());
    }

    #[test]
    fn exceptions_drain_in_fifo_order() {
        let ctx = RequestContext::new("/orders");
        ctx.set_current_phase(PhaseId::ApplyRequestValues);
        ctx.queue_exception("first".into());
        ctx.set_current_phase(PhaseId::ProcessValidations);
        ctx.queue_exception("second".into());

        let first = ctx.pop_exception().expect("queued event");
        assert_eq!(first.phase, Some(PhaseId::ApplyRequestValues));
        assert_eq!(first.error.to_string(), "first");

        let second = ctx.pop_exception().expect("queued event");
        assert_eq!(second.phase, Some(PhaseId::ProcessValidations));
        assert!(ctx.pop_exception().is_none());
        assert!(!ctx.has_exceptions());
    }

    #[test]
    fn attributes_round_trip() {
        let ctx = RequestContext::for_postback("/cart");
        assert!(ctx.is_postback());
        ctx.set_attribute("window-id", "w-7");
        assert_eq!(ctx.attribute("window-id").as_deref(), Some("w-7"));
        assert!(ctx.attribute("missing").is_none());
    }
}
