//! Flash scope
//!
//! Short-lived request-spanning storage with pre/post hooks the driver
//! calls unconditionally around every phase, render included. Values put
//! during one request become readable in the next one and are dropped when
//! that next request finishes rendering.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::BoxError;
use crate::phase::PhaseId;

/// Pre/post phase hooks the driver invokes around every phase
#[async_trait]
pub trait Flash: Send + Sync {
    /// Runs before the phase's listeners and body. Failures are published
    /// to the exception queue by the driver.
    async fn do_pre_phase_actions(&self, ctx: &RequestContext)
    -> std::result::Result<(), BoxError>;

    /// Runs after the phase's after-listeners, even when the body failed.
    /// Failures here are logged by the driver, never propagated.
    async fn do_post_phase_actions(
        &self,
        ctx: &RequestContext,
    ) -> std::result::Result<(), BoxError>;
}

type FlashValue = Arc<dyn Any + Send + Sync>;

/// In-memory two-generation flash store.
///
/// `put` writes into the next generation; reads see the current one. The
/// generations rotate in the post-phase hook of a completed render, which
/// is the boundary between "this request" and "the next".
#[derive(Default)]
pub struct FlashScope {
    current: DashMap<String, FlashValue>,
    next: DashMap<String, FlashValue>,
}

impl FlashScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value for the next request
    pub fn put<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.next.insert(key.into(), Arc::new(value));
    }

    /// Read a value the previous request left behind
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.current
            .get(key)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Carry a current-generation value over to the next request as well
    pub fn keep(&self, key: &str) -> bool {
        match self.current.get(key) {
            Some(entry) => {
                self.next.insert(key.to_string(), entry.value().clone());
                true
            }
            None => false,
        }
    }

    fn rotate(&self) {
        self.current.clear();
        let keys: Vec<String> = self.next.iter().map(|entry| entry.key().clone()).collect();
        for key in keys {
            if let Some((key, value)) = self.next.remove(&key) {
                self.current.insert(key, value);
            }
        }
    }
}

#[async_trait]
impl Flash for FlashScope {
    async fn do_pre_phase_actions(
        &self,
        _ctx: &RequestContext,
    ) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    async fn do_post_phase_actions(
        &self,
        ctx: &RequestContext,
    ) -> std::result::Result<(), BoxError> {
        // The render post-hook marks the end of this request's lifecycle.
        if ctx.current_phase() == Some(PhaseId::RenderResponse) {
            self.rotate();
            debug!(request_id = %ctx.request_id(), "flash scope rotated");
        }
        Ok(())
    }
}
