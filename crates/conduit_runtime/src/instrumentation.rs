//! Diagnostic events raised by the subscription pipeline.

use crate::request::RequestContext;
use conduit_core::{DiagnosticScope, ErrorKind, GraphqlError};
use tracing::{debug, debug_span, error, info, info_span, warn};

/// Receives diagnostic events.
///
/// Scopes returned by the `execute_*`/`on_*` methods close when dropped.
pub trait DiagnosticEvents: Send + Sync {
    /// A subscription is being set up. The scope stays open until the
    /// subscription is disposed, or closes right away if setup fails.
    fn execute_subscription(&self, request: &RequestContext, subscription_id: u64)
        -> DiagnosticScope;

    /// An event of a subscription is being processed.
    fn on_subscription_event(
        &self,
        request: &RequestContext,
        subscription_id: u64,
    ) -> DiagnosticScope;

    /// Errors were caught while executing a request.
    fn execution_error(&self, request: &RequestContext, kind: ErrorKind, errors: &[GraphqlError]);
}

/// Logs diagnostic events with `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnosticEvents;

impl DiagnosticEvents for TracingDiagnosticEvents {
    fn execute_subscription(
        &self,
        request: &RequestContext,
        subscription_id: u64,
    ) -> DiagnosticScope {
        let span = info_span!(
            "subscription",
            request_id = %request.id(),
            operation = %request.operation().display_name(),
            subscription_id,
        );
        span.in_scope(|| info!("subscription opened"));

        let closing = span.clone();
        DiagnosticScope::new(span).on_close(move || {
            closing.in_scope(|| info!("subscription closed"));
        })
    }

    fn on_subscription_event(
        &self,
        request: &RequestContext,
        subscription_id: u64,
    ) -> DiagnosticScope {
        let span = debug_span!(
            "subscription_event",
            request_id = %request.id(),
            subscription_id,
        );
        span.in_scope(|| debug!("processing subscription event"));
        DiagnosticScope::new(span)
    }

    fn execution_error(&self, request: &RequestContext, kind: ErrorKind, errors: &[GraphqlError]) {
        for e in errors {
            match kind {
                ErrorKind::FieldError => warn!(
                    request_id = %request.id(),
                    kind = %kind,
                    code = e.code.as_deref().unwrap_or_default(),
                    path = %e.path.clone().unwrap_or_default(),
                    "{}",
                    e.message
                ),
                _ => error!(
                    request_id = %request.id(),
                    kind = %kind,
                    code = e.code.as_deref().unwrap_or_default(),
                    "{}",
                    e.message
                ),
            }
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnosticEvents;

impl DiagnosticEvents for NoopDiagnosticEvents {
    fn execute_subscription(&self, _: &RequestContext, _: u64) -> DiagnosticScope {
        DiagnosticScope::noop()
    }

    fn on_subscription_event(&self, _: &RequestContext, _: u64) -> DiagnosticScope {
        DiagnosticScope::noop()
    }

    fn execution_error(&self, _: &RequestContext, _: ErrorKind, _: &[GraphqlError]) {}
}
