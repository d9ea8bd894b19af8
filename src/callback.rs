//! Callback correlation table.
//!
//! The frontend never sees backend closures, only opaque [`CallbackId`]s.
//! It later invokes one by id with JSON arguments, and the table runs the
//! registered handler against the owning context `C`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::protocol::CallbackId;
use crate::sink::ErrorSink;

pub type Handler<C> = Arc<dyn Fn(&mut C, &[Value]) -> anyhow::Result<()> + Send + Sync>;

struct Registration<C> {
    handler: Handler<C>,
    persistent: bool,
}

/// One invocation as recorded in the audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackLogEntry {
    pub cbid: CallbackId,
    pub args: Vec<Value>,
    /// Set on the extra entry written when the handler failed.
    pub error: Option<String>,
}

/// A handler error or panic, contained by [`CallbackTable::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackFailure {
    pub cbid: CallbackId,
    pub args: Vec<Value>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// No such id, e.g. a one-shot that already ran. Not an error.
    Unknown,
    Completed,
    Failed(CallbackFailure),
}

/// A context that owns a callback table for itself.
pub trait CallbackHost: Sized {
    fn callbacks(&mut self) -> &mut CallbackTable<Self>;
}

pub struct CallbackTable<C> {
    session: String,
    members: HashMap<CallbackId, Registration<C>>,
    log: AuditLog<CallbackLogEntry>,
    sink: Arc<dyn ErrorSink>,
}

impl<C> CallbackTable<C> {
    pub fn new(session: impl Into<String>, sink: Arc<dyn ErrorSink>, log_capacity: usize) -> Self {
        Self {
            session: session.into(),
            members: HashMap::new(),
            log: AuditLog::new(log_capacity),
            sink,
        }
    }

    /// Register `handler` under a fresh random id.
    ///
    /// A one-shot registration (`persistent == false`) is dropped before its
    /// handler first runs.
    pub fn register<F>(&mut self, handler: F, persistent: bool) -> CallbackId
    where
        F: Fn(&mut C, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let cbid = Uuid::new_v4().to_string();
        self.members.insert(
            cbid.clone(),
            Registration {
                handler: Arc::new(handler),
                persistent,
            },
        );
        cbid
    }

    /// Remove a registration. Unknown ids are ignored.
    pub fn unregister(&mut self, cbid: &str) -> bool {
        self.members.remove(cbid).is_some()
    }

    pub fn contains(&self, cbid: &str) -> bool {
        self.members.contains_key(cbid)
    }

    pub fn is_persistent(&self, cbid: &str) -> Option<bool> {
        self.members.get(cbid).map(|r| r.persistent)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn log(&self) -> &AuditLog<CallbackLogEntry> {
        &self.log
    }

    fn checkout(&mut self, cbid: &str, args: &[Value]) -> Option<Handler<C>> {
        self.log.push(CallbackLogEntry {
            cbid: cbid.to_string(),
            args: args.to_vec(),
            error: None,
        });
        let persistent = self.members.get(cbid)?.persistent;
        if persistent {
            self.members.get(cbid).map(|r| Arc::clone(&r.handler))
        } else {
            self.members.remove(cbid).map(|r| r.handler)
        }
    }

    fn record_failure(&mut self, failure: &CallbackFailure) {
        self.log.push(CallbackLogEntry {
            cbid: failure.cbid.clone(),
            args: failure.args.clone(),
            error: Some(failure.error.clone()),
        });
        self.sink.callback_failed(&self.session, failure);
    }
}

impl<C: CallbackHost> CallbackTable<C> {
    /// Run the handler registered as `cbid` against `host`.
    ///
    /// Never fails: unknown ids are ignored, and handler errors or panics
    /// are logged, forwarded to the sink and returned as
    /// [`Invocation::Failed`].
    pub fn invoke(host: &mut C, cbid: &str, args: Vec<Value>) -> Invocation {
        let Some(handler) = host.callbacks().checkout(cbid, &args) else {
            tracing::debug!(cbid = %cbid, "ignoring invocation of unknown callback");
            return Invocation::Unknown;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| handler(host, &args)));
        let error = match outcome {
            Ok(Ok(())) => return Invocation::Completed,
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => panic_message(panic.as_ref()),
        };

        let failure = CallbackFailure {
            cbid: cbid.to_string(),
            args,
            error,
        };
        host.callbacks().record_failure(&failure);
        Invocation::Failed(failure)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

impl<C> std::fmt::Debug for CallbackTable<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTable")
            .field("session", &self.session)
            .field("registered", &self.members.len())
            .field("logged", &self.log.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemorySink, Reported};
    use serde_json::json;

    struct Host {
        table: CallbackTable<Host>,
        seen: Vec<Value>,
    }

    impl CallbackHost for Host {
        fn callbacks(&mut self) -> &mut CallbackTable<Self> {
            &mut self.table
        }
    }

    fn host() -> (Host, MemorySink) {
        let sink = MemorySink::new();
        let host = Host {
            table: CallbackTable::new("w", Arc::new(sink.clone()), 1000),
            seen: Vec::new(),
        };
        (host, sink)
    }

    fn record(host: &mut Host, args: &[Value]) -> anyhow::Result<()> {
        host.seen.extend(args.iter().cloned());
        Ok(())
    }

    #[test]
    fn one_shot_runs_exactly_once() {
        let (mut host, _) = host();
        let id = host.table.register(record, false);

        assert_eq!(CallbackTable::invoke(&mut host, &id, vec![json!(1)]), Invocation::Completed);
        assert_eq!(CallbackTable::invoke(&mut host, &id, vec![json!(2)]), Invocation::Unknown);
        assert_eq!(host.seen, vec![json!(1)]);
        assert!(!host.table.contains(&id));
    }

    #[test]
    fn persistent_runs_every_time_in_order() {
        let (mut host, _) = host();
        let id = host.table.register(record, true);
        for i in 0..5 {
            CallbackTable::invoke(&mut host, &id, vec![json!(i)]);
        }
        assert_eq!(host.seen, (0..5).map(|i| json!(i)).collect::<Vec<_>>());
        assert!(host.table.contains(&id));
    }

    #[test]
    fn one_shot_is_removed_before_handler_runs() {
        let (mut host, _) = host();
        let id = host.table.register(
            |h: &mut Host, _args: &[Value]| {
                h.seen.push(json!(h.table.len()));
                Ok(())
            },
            false,
        );
        CallbackTable::invoke(&mut host, &id, vec![]);
        assert_eq!(host.seen, vec![json!(0)]);
    }

    #[test]
    fn unknown_id_is_silently_ignored_but_logged() {
        let (mut host, sink) = host();
        assert_eq!(
            CallbackTable::invoke(&mut host, "stale", vec![json!("x")]),
            Invocation::Unknown
        );
        assert_eq!(host.table.log().len(), 1);
        assert!(sink.reports().is_empty());
    }

    #[test]
    fn failing_handler_is_contained_and_reported() {
        let (mut host, sink) = host();
        let bad = host
            .table
            .register(|_: &mut Host, _: &[Value]| anyhow::bail!("boom"), true);
        let good = host.table.register(record, true);

        let outcome = CallbackTable::invoke(&mut host, &bad, vec![json!(7)]);
        assert!(matches!(outcome, Invocation::Failed(ref f) if f.error.contains("boom")));
        assert_eq!(
            CallbackTable::invoke(&mut host, &good, vec![json!(8)]),
            Invocation::Completed
        );
        assert_eq!(host.seen, vec![json!(8)]);

        let failed_entry = host
            .table
            .log()
            .iter()
            .find(|e| e.error.is_some())
            .expect("failure should be logged");
        assert_eq!(failed_entry.cbid, bad);
        assert_eq!(failed_entry.args, vec![json!(7)]);

        assert!(matches!(
            sink.reports().as_slice(),
            [Reported::Callback { session, failure }] if session == "w" && failure.cbid == bad
        ));
    }

    #[test]
    fn panicking_handler_is_contained() {
        let (mut host, sink) = host();
        let id = host
            .table
            .register(|_: &mut Host, _: &[Value]| panic!("handler exploded"), false);
        let outcome = CallbackTable::invoke(&mut host, &id, vec![]);
        assert!(matches!(outcome, Invocation::Failed(ref f) if f.error.contains("exploded")));
        assert_eq!(sink.reports().len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let (mut host, _) = host();
        let id = host.table.register(record, true);
        assert!(host.table.unregister(&id));
        assert!(!host.table.unregister(&id));
        assert_eq!(CallbackTable::invoke(&mut host, &id, vec![]), Invocation::Unknown);
    }

    #[test]
    fn ids_are_unique() {
        let (mut host, _) = host();
        let ids: std::collections::HashSet<_> =
            (0..100).map(|_| host.table.register(record, false)).collect();
        assert_eq!(ids.len(), 100);
    }
}
