use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::CallbackFailure;
use crate::window::RoutingError;

/// Receives failures the core contains instead of propagating.
pub trait ErrorSink: Send + Sync {
    fn callback_failed(&self, session: &str, failure: &CallbackFailure);
    fn routing_failed(&self, session: &str, error: &RoutingError);
}

/// Default sink: structured log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn callback_failed(&self, session: &str, failure: &CallbackFailure) {
        tracing::error!(
            session = %session,
            cbid = %failure.cbid,
            error = %failure.error,
            "callback handler failed"
        );
    }

    fn routing_failed(&self, session: &str, error: &RoutingError) {
        tracing::warn!(session = %session, %error, "could not route inbound message");
    }
}

/// A failure captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reported {
    Callback { session: String, failure: CallbackFailure },
    Routing { session: String, error: RoutingError },
}

/// Keeps every reported failure in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<Reported>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Reported> {
        self.reports.lock().clone()
    }
}

impl ErrorSink for MemorySink {
    fn callback_failed(&self, session: &str, failure: &CallbackFailure) {
        self.reports.lock().push(Reported::Callback {
            session: session.to_string(),
            failure: failure.clone(),
        });
    }

    fn routing_failed(&self, session: &str, error: &RoutingError) {
        self.reports.lock().push(Reported::Routing {
            session: session.to_string(),
            error: error.clone(),
        });
    }
}
