use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::audit::DEFAULT_LOG_CAPACITY;
use crate::protocol::Message;
use crate::sink::{ErrorSink, TracingSink};
use crate::transport::Transport;
use crate::window::{Window, WindowError, WindowInfo};

pub type SessionId = String;

/// Shared handle to one window.
///
/// Every operation locks the window for its whole duration, so operations
/// on one session are serialized while different sessions never contend.
/// Callback handlers and hook listeners already run under that lock and
/// receive `&mut Window`; they must not go back through a `Session` handle
/// for the same window.
///
/// Closing runs while the window lock is held and then takes the registry
/// write lock. A `Close` hook listener must therefore not call
/// [`SessionRegistry::close_session`] or `registry.get(id)?.with(..)` for
/// its own window; both would deadlock.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    window: Arc<Mutex<Window>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lock the window for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Window) -> R) -> R {
        f(&mut self.window.lock())
    }

    /// Route one inbound frontend message.
    pub fn route(&self, message: Message) -> Result<(), WindowError> {
        self.with(|w| w.route(message))
    }

    pub fn jump_to(&self, ra: f64, dec: f64, fov: f64) -> Result<(), WindowError> {
        self.with(|w| w.jump_to(ra, dec, fov))
    }

    pub fn set_title(&self, title: impl Into<String>) -> Result<(), WindowError> {
        let title = title.into();
        self.with(|w| w.set_title(title))
    }

    pub fn close(&self) -> Result<(), WindowError> {
        self.with(Window::close)
    }

    pub fn connect(&self) -> Result<usize, WindowError> {
        self.with(Window::connect)
    }

    pub fn disconnect(&self) {
        self.with(Window::disconnect)
    }

    pub fn is_open(&self) -> bool {
        self.with(|w| w.is_open())
    }

    pub fn info(&self) -> WindowInfo {
        self.with(|w| w.info())
    }
}

/// Server-level session lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Created { id: SessionId },
    Closed { id: SessionId },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("maximum number of sessions reached")]
    MaxSessionsReached,
    #[error("could not close session {id}: {source}")]
    CloseFailed {
        id: String,
        #[source]
        source: WindowError,
    },
}

struct RegistryInner {
    sessions: HashMap<SessionId, Session>,
    max_sessions: Option<usize>,
}

/// Process-wide map of open sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    events_tx: broadcast::Sender<SessionEvent>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ErrorSink>,
    log_capacity: usize,
}

impl SessionRegistry {
    /// Default maximum number of sessions when no explicit limit is set.
    pub const DEFAULT_MAX_SESSIONS: usize = 256;

    /// Create an empty registry whose windows deliver through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                sessions: HashMap::new(),
                max_sessions: Some(Self::DEFAULT_MAX_SESSIONS),
            })),
            events_tx,
            transport,
            sink: Arc::new(TracingSink),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }

    pub fn with_max_sessions(self, max_sessions: Option<usize>) -> Self {
        self.inner.write().max_sessions = max_sessions;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Capacity of every window's channel and callback logs.
    pub fn with_log_capacity(mut self, log_capacity: usize) -> Self {
        self.log_capacity = log_capacity;
        self
    }

    /// Open a new window and register it under a fresh id.
    ///
    /// The window starts disconnected: everything it sends is queued until a
    /// frontend connects.
    pub fn create_session(&self, title: impl Into<String>) -> Result<Session, RegistryError> {
        let mut inner = self.inner.write();
        if let Some(max) = inner.max_sessions {
            if inner.sessions.len() >= max {
                return Err(RegistryError::MaxSessionsReached);
            }
        }

        let id = Uuid::new_v4().to_string();
        let mut window = Window::new(
            id.clone(),
            title,
            Arc::clone(&self.transport),
            Arc::clone(&self.sink),
            self.log_capacity,
        );
        window.set_on_dispose(self.disposer());

        let session = Session {
            id: id.clone(),
            window: Arc::new(Mutex::new(window)),
        };
        inner.sessions.insert(id.clone(), session.clone());
        drop(inner);

        tracing::info!(session = %id, "session created");
        let _ = self.events_tx.send(SessionEvent::Created { id });
        Ok(session)
    }

    /// Runs under the closing window's lock. Takes the registry lock after
    /// it, never the other way around.
    fn disposer(&self) -> Box<dyn FnOnce(&str) + Send> {
        let inner: Weak<RwLock<RegistryInner>> = Arc::downgrade(&self.inner);
        let events_tx = self.events_tx.clone();
        Box::new(move |id: &str| {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.write().sessions.remove(id).is_some() {
                let _ = events_tx.send(SessionEvent::Closed { id: id.to_string() });
            }
        })
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> Result<Session, RegistryError> {
        self.inner
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Close a session from the backend side.
    pub fn close_session(&self, id: &str) -> Result<(), RegistryError> {
        let session = self.get(id)?;
        session.close().map_err(|e| match e {
            // Lost a race with another close.
            WindowError::Closed(id) => RegistryError::NotFound(id),
            source => {
                tracing::warn!(session = %id, error = %source, "unexpected error while closing");
                RegistryError::CloseFailed {
                    id: id.to_string(),
                    source,
                }
            }
        })
    }

    /// Return all session ids.
    pub fn list(&self) -> Vec<SessionId> {
        self.inner.read().sessions.keys().cloned().collect()
    }

    /// Return the number of sessions.
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::HookEvent;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> (SessionRegistry, MemoryTransport) {
        let transport = MemoryTransport::new();
        (SessionRegistry::new(Arc::new(transport.clone())), transport)
    }

    #[test]
    fn create_and_get() {
        let (registry, _) = registry();
        let session = registry.create_session("HSC Map").unwrap();
        let found = registry.get(session.id()).unwrap();
        assert_eq!(found.id(), session.id());
        assert_eq!(found.info().title, "HSC Map");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_id_is_not_found() {
        let (registry, _) = registry();
        assert!(matches!(registry.get("nope"), Err(RegistryError::NotFound(_))));
        assert!(matches!(registry.close_session("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn max_sessions_is_enforced() {
        let (registry, _) = registry();
        let registry = registry.with_max_sessions(Some(2));
        registry.create_session("a").unwrap();
        registry.create_session("b").unwrap();
        assert!(matches!(
            registry.create_session("c"),
            Err(RegistryError::MaxSessionsReached)
        ));
    }

    #[test]
    fn close_session_removes_and_fires_close_hook_once() {
        let (registry, transport) = registry();
        let session = registry.create_session("t").unwrap();
        session.connect().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let still_registered = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&still_registered);
        let observer = registry.clone();
        session.with(|w| {
            let id = w.id().to_string();
            w.hook().on(HookEvent::Close, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                if observer.get(&id).is_ok() {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            });
        });

        registry.close_session(session.id()).unwrap();
        assert!(registry.is_empty());
        assert!(!session.is_open());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // The registry entry is gone before the hook runs.
        assert_eq!(still_registered.load(Ordering::SeqCst), 0);
        assert_eq!(transport.kinds(), vec!["close"]);

        assert!(matches!(
            registry.close_session(session.id()),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn inbound_close_unregisters_session() {
        let (registry, _) = registry();
        let session = registry.create_session("t").unwrap();
        session.route(Message::Close).unwrap();
        assert!(registry.get(session.id()).is_err());
    }

    #[tokio::test]
    async fn lifecycle_events_are_broadcast() {
        let (registry, _) = registry();
        let mut events = registry.subscribe_events();
        let session = registry.create_session("t").unwrap();
        registry.close_session(session.id()).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Created {
                id: session.id().to_string()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::Closed {
                id: session.id().to_string()
            }
        );
    }

    #[test]
    fn concurrent_creates_do_not_collide() {
        let (registry, _) = registry();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .map(|_| registry.create_session("t").unwrap().id().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let ids: std::collections::HashSet<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 80);
        assert_eq!(registry.len(), 80);
    }
}
