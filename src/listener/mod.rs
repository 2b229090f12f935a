//! Phase listeners and the before/after bracketing rules
//!
//! Listeners observe phases: `before_phase` runs ahead of the phase body in
//! registration order, `after_phase` runs behind it in reverse registration
//! order so that cross-cutting listeners bracket like a stack unwind (the
//! last one registered wraps innermost).
//!
//! Registration is process-lifetime state on the lifecycle instance and
//! follows a copy-on-write discipline: request threads iterate a pinned
//! snapshot while add/remove swap in a fresh list, so registration can race
//! with execution without locking the readers out.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::context::RequestContext;
use crate::error::BoxError;
use crate::phase::PhaseId;

/// What a [`PhaseListener`]'s hooks return. Failures are logged and
/// contained by the manager, never propagated to the driver.
pub type ListenerResult = std::result::Result<(), BoxError>;

/// Which phases a listener wants to observe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseInterest {
    /// Exactly one phase
    Phase(PhaseId),
    /// Every phase
    Any,
}

impl PhaseInterest {
    /// Whether a phase falls under this interest
    pub fn matches(self, phase: PhaseId) -> bool {
        match self {
            Self::Phase(p) => p == phase,
            Self::Any => true,
        }
    }
}

/// The event handed to listener hooks
#[derive(Clone, Copy)]
pub struct PhaseEvent<'a> {
    phase: PhaseId,
    context: &'a RequestContext,
}

impl<'a> PhaseEvent<'a> {
    pub(crate) fn new(phase: PhaseId, context: &'a RequestContext) -> Self {
        Self { phase, context }
    }

    /// The phase being bracketed
    pub fn phase(&self) -> PhaseId {
        self.phase
    }

    /// The active request context. Listeners flip the short-circuit flags
    /// through this.
    pub fn context(&self) -> &'a RequestContext {
        self.context
    }
}

/// An observer invoked before and after a phase, filtered by phase-interest.
///
/// One listener instance serves every concurrent request and is invoked once
/// per matching phase per request, so implementations must tolerate repeated
/// calls.
#[async_trait]
pub trait PhaseListener: Send + Sync {
    /// Which phases this listener observes
    fn phase_interest(&self) -> PhaseInterest {
        PhaseInterest::Any
    }

    /// Runs before the phase body, in registration order
    async fn before_phase(&self, _event: &PhaseEvent<'_>) -> ListenerResult {
        Ok(())
    }

    /// Runs after the phase body, in reverse registration order. Fires only
    /// if the paired [`PhaseListener::before_phase`] call succeeded.
    async fn after_phase(&self, _event: &PhaseEvent<'_>) -> ListenerResult {
        Ok(())
    }
}

type ListenerList = Arc<Vec<Arc<dyn PhaseListener>>>;

/// Process-lifetime listener registration with copy-on-write reads
#[derive(Default)]
pub struct ListenerRegistry {
    inner: RwLock<ListenerList>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Requests already iterating keep their snapshot.
    pub fn add(&self, listener: Arc<dyn PhaseListener>) {
        let mut guard = self.inner.write().expect("listener registry lock poisoned");
        let mut next: Vec<Arc<dyn PhaseListener>> = guard.iter().cloned().collect();
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Remove a previously added listener (by identity). Returns whether it
    /// was registered.
    pub fn remove(&self, listener: &Arc<dyn PhaseListener>) -> bool {
        let mut guard = self.inner.write().expect("listener registry lock poisoned");
        let before = guard.len();
        let next: Vec<Arc<dyn PhaseListener>> = guard
            .iter()
            .filter(|l| !Arc::ptr_eq(l, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        if removed {
            *guard = Arc::new(next);
        }
        removed
    }

    /// Pin the current listener list for lock-free iteration
    pub fn snapshot(&self) -> ListenerList {
        self.inner
            .read()
            .expect("listener registry lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .expect("listener registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one phase's before pass, pairing each after-hook with its
/// before-hook. Created fresh per phase and discarded once the after pass
/// ran.
pub struct ListenerPass {
    phase: PhaseId,
    listeners: ListenerList,
    succeeded: Vec<bool>,
    view_root_before_ok: bool,
}

impl ListenerPass {
    /// The phase this pass bracketed
    pub fn phase(&self) -> PhaseId {
        self.phase
    }
}

/// Per-request dispatcher for the before/after passes
pub struct PhaseListenerManager<'a> {
    registry: &'a ListenerRegistry,
}

impl<'a> PhaseListenerManager<'a> {
    pub fn new(registry: &'a ListenerRegistry) -> Self {
        Self { registry }
    }

    /// Inform the before-listeners for a phase.
    ///
    /// Iterates the pinned snapshot in registration order, invoking only
    /// listeners whose interest matches. The first failure is logged and
    /// cancels the remaining before-listeners for this phase; their success
    /// bits stay unset, which suppresses their after-hooks too. The
    /// view-bound before hook runs after the general listeners and only
    /// from APPLY_REQUEST_VALUES onward.
    pub async fn inform_before(&self, phase: PhaseId, ctx: &RequestContext) -> ListenerPass {
        let listeners = self.registry.snapshot();
        let mut succeeded = vec![false; listeners.len()];
        let event = PhaseEvent::new(phase, ctx);

        for (idx, listener) in listeners.iter().enumerate() {
            if !listener.phase_interest().matches(phase) {
                continue;
            }
            match listener.before_phase(&event).await {
                Ok(()) => succeeded[idx] = true,
                Err(error) => {
                    warn!(
                        request_id = %ctx.request_id(),
                        %phase,
                        listener = idx,
                        %error,
                        "before-phase listener failed; skipping remaining before-listeners for this phase"
                    );
                    break;
                }
            }
        }

        let mut view_root_before_ok = false;
        if phase != PhaseId::RestoreView {
            if let Some(root) = ctx.view_root() {
                match root.before_phase(&event).await {
                    Ok(()) => view_root_before_ok = true,
                    Err(error) => {
                        warn!(
                            request_id = %ctx.request_id(),
                            %phase,
                            %error,
                            "view-bound before-phase hook failed"
                        );
                    }
                }
            }
        }

        ListenerPass {
            phase,
            listeners,
            succeeded,
            view_root_before_ok,
        }
    }

    /// Inform the after-listeners for the pass's phase.
    ///
    /// The view-bound after hook unwinds first (it ran last in the before
    /// pass), then the general listeners in reverse registration order.
    /// Only listeners whose before-hook succeeded fire; failures here are
    /// logged per-listener and never stop the rest.
    pub async fn inform_after(&self, ctx: &RequestContext, pass: ListenerPass) {
        let event = PhaseEvent::new(pass.phase, ctx);

        if pass.view_root_before_ok {
            if let Some(root) = ctx.view_root() {
                if let Err(error) = root.after_phase(&event).await {
                    warn!(
                        request_id = %ctx.request_id(),
                        phase = %pass.phase,
                        %error,
                        "view-bound after-phase hook failed"
                    );
                }
            }
        }

        for (idx, listener) in pass.listeners.iter().enumerate().rev() {
            if !pass.succeeded[idx] {
                continue;
            }
            if let Err(error) = listener.after_phase(&event).await {
                warn!(
                    request_id = %ctx.request_id(),
                    phase = %pass.phase,
                    listener = idx,
                    %error,
                    "after-phase listener failed; continuing with remaining after-listeners"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        name: &'static str,
        interest: PhaseInterest,
        fail_before: bool,
        fail_after: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                interest: PhaseInterest::Any,
                fail_before: false,
                fail_after: false,
                log,
            }
        }
    }

    #[async_trait]
    impl PhaseListener for Recorder {
        fn phase_interest(&self) -> PhaseInterest {
            self.interest
        }

        async fn before_phase(&self, event: &PhaseEvent<'_>) -> ListenerResult {
            self.log
                .lock()
                .unwrap()
                .push(format!("before:{}:{}", self.name, event.phase()));
            if self.fail_before {
                return Err("before failed".into());
            }
            Ok(())
        }

        async fn after_phase(&self, event: &PhaseEvent<'_>) -> ListenerResult {
            self.log
                .lock()
                .unwrap()
                .push(format!("after:{}:{}", self.name, event.phase()));
            if self.fail_after {
                return Err("after failed".into());
            }
            Ok(())
        }
    }

    fn registry_with(listeners: Vec<Arc<dyn PhaseListener>>) -> ListenerRegistry {
        let registry = ListenerRegistry::new();
        for l in listeners {
            registry.add(l);
        }
        registry
    }

    #[test]
    fn snapshot_is_stable_across_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(vec![Arc::new(Recorder::new("a", log.clone()))]);

        let snapshot = registry.snapshot();
        registry.add(Arc::new(Recorder::new("b", log)));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn remove_is_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let kept: Arc<dyn PhaseListener> = Arc::new(Recorder::new("kept", log.clone()));
        let dropped: Arc<dyn PhaseListener> = Arc::new(Recorder::new("dropped", log));

        let registry = ListenerRegistry::new();
        registry.add(kept.clone());
        registry.add(dropped.clone());

        assert!(registry.remove(&dropped));
        assert!(!registry.remove(&dropped));
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.snapshot()[0], &kept));
    }

    #[tokio::test]
    async fn before_failure_cancels_remaining_before_listeners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut second = Recorder::new("l2", log.clone());
        second.fail_before = true;

        let registry = registry_with(vec![
            Arc::new(Recorder::new("l1", log.clone())),
            Arc::new(second),
            Arc::new(Recorder::new("l3", log.clone())),
        ]);

        let ctx = RequestContext::new("/");
        let manager = PhaseListenerManager::new(&registry);
        let pass = manager
            .inform_before(PhaseId::ProcessValidations, &ctx)
            .await;
        manager.inform_after(&ctx, pass).await;

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "before:l1:PROCESS_VALIDATIONS",
                "before:l2:PROCESS_VALIDATIONS",
                "after:l1:PROCESS_VALIDATIONS",
            ]
        );
    }

    #[tokio::test]
    async fn after_listeners_unwind_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(vec![
            Arc::new(Recorder::new("l1", log.clone())),
            Arc::new(Recorder::new("l2", log.clone())),
            Arc::new(Recorder::new("l3", log.clone())),
        ]);

        let ctx = RequestContext::new("/");
        let manager = PhaseListenerManager::new(&registry);
        let pass = manager.inform_before(PhaseId::UpdateModelValues, &ctx).await;
        manager.inform_after(&ctx, pass).await;

        let after: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("after:"))
            .cloned()
            .collect();
        assert_eq!(
            after,
            vec![
                "after:l3:UPDATE_MODEL_VALUES",
                "after:l2:UPDATE_MODEL_VALUES",
                "after:l1:UPDATE_MODEL_VALUES",
            ]
        );
    }

    #[tokio::test]
    async fn after_failure_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut last = Recorder::new("l3", log.clone());
        last.fail_after = true;

        let registry = registry_with(vec![
            Arc::new(Recorder::new("l1", log.clone())),
            Arc::new(Recorder::new("l2", log.clone())),
            Arc::new(last),
        ]);

        let ctx = RequestContext::new("/");
        let manager = PhaseListenerManager::new(&registry);
        let pass = manager.inform_before(PhaseId::InvokeApplication, &ctx).await;
        manager.inform_after(&ctx, pass).await;

        let after_count = log
            .lock()
            .unwrap()
            .iter()
            .filter(|line| line.starts_with("after:"))
            .count();
        assert_eq!(after_count, 3);
    }

    #[tokio::test]
    async fn interest_filters_phases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut only_validations = Recorder::new("v", log.clone());
        only_validations.interest = PhaseInterest::Phase(PhaseId::ProcessValidations);

        let registry = registry_with(vec![
            Arc::new(only_validations),
            Arc::new(Recorder::new("any", log.clone())),
        ]);

        let ctx = RequestContext::new("/");
        let manager = PhaseListenerManager::new(&registry);
        let pass = manager.inform_before(PhaseId::UpdateModelValues, &ctx).await;
        manager.inform_after(&ctx, pass).await;

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                "before:any:UPDATE_MODEL_VALUES",
                "after:any:UPDATE_MODEL_VALUES",
            ]
        );
    }
}
