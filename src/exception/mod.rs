//! Exception publication
//!
//! The driver is the single point that converts phase failures into queued
//! [`ExceptionEvent`]s; it never re-throws. A pluggable
//! [`ExceptionHandler`] drains the queue at the end of every phase and
//! decides what the failure means for the rest of the request, typically
//! by logging, or by completing the response through the context flags.

use async_trait::async_trait;
use tracing::error;

use crate::context::RequestContext;
use crate::error::BoxError;
use crate::phase::PhaseId;

/// One published failure, tagged with the phase it happened in
#[derive(Debug)]
pub struct ExceptionEvent {
    /// The phase active when the failure was published
    pub phase: Option<PhaseId>,
    /// The failure itself
    pub error: BoxError,
}

/// Drains the request's exception queue.
///
/// The lifecycle only triggers the drain; it never inspects queue contents.
/// Whether processing continues after a failure depends entirely on whether
/// the handler sets the context's short-circuit flags while draining.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext);
}

/// Default handler: log every queued event and leave the flags alone
#[derive(Debug, Default)]
pub struct LoggingExceptionHandler;

#[async_trait]
impl ExceptionHandler for LoggingExceptionHandler {
    async fn handle(&self, ctx: &RequestContext) {
        while let Some(event) = ctx.pop_exception() {
            error!(
                request_id = %ctx.request_id(),
                phase = ?event.phase,
                error = %event.error,
                "unhandled exception published during request processing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_handler_empties_the_queue() {
        let ctx = RequestContext::new("/");
        ctx.queue_exception("boom".into());
        ctx.queue_exception("bang".into());
        assert!(ctx.has_exceptions());

        LoggingExceptionHandler.handle(&ctx).await;
        assert!(!ctx.has_exceptions());
        assert!(!ctx.is_response_complete());
    }
}
