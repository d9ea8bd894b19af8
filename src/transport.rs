//! Delivery primitives that carry channel messages to a frontend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::protocol::Message;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("no frontend attached to session {0}")]
    Detached(String),
    #[error("frontend connection for session {0} has gone away")]
    Disconnected(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Sends one message to the frontend of one session.
///
/// Implementations must not block: the caller holds the session lock.
pub trait Transport: Send + Sync {
    fn deliver(&self, session: &str, message: &Message) -> Result<(), TransportError>;
}

/// Routes messages to whichever frontend connection is attached to a session.
///
/// The HTTP layer attaches a connection when a frontend opens its socket and
/// pumps the returned receiver into that socket.
#[derive(Clone, Default)]
pub struct FrontendHub {
    attached: Arc<RwLock<HashMap<String, (u64, mpsc::UnboundedSender<Message>)>>>,
    next_token: Arc<AtomicU64>,
}

/// One frontend connection's end of the hub.
pub struct Attachment {
    token: u64,
    pub rx: mpsc::UnboundedReceiver<Message>,
}

impl FrontendHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a frontend to `session`, replacing any previous attachment.
    /// The replaced connection's receiver yields `None` from then on.
    pub fn attach(&self, session: &str) -> Attachment {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if self
            .attached
            .write()
            .insert(session.to_string(), (token, tx))
            .is_some()
        {
            tracing::debug!(session = %session, "replaced existing frontend attachment");
        }
        Attachment { token, rx }
    }

    /// Detach `attachment` if it is still the current one for `session`.
    pub fn detach(&self, session: &str, attachment: &Attachment) -> bool {
        let mut attached = self.attached.write();
        match attached.get(session) {
            Some((token, _)) if *token == attachment.token => {
                attached.remove(session);
                true
            }
            _ => false,
        }
    }

    pub fn is_attached(&self, session: &str) -> bool {
        self.attached
            .read()
            .get(session)
            .is_some_and(|(_, tx)| !tx.is_closed())
    }
}

impl Transport for FrontendHub {
    fn deliver(&self, session: &str, message: &Message) -> Result<(), TransportError> {
        let attached = self.attached.read();
        let (_, tx) = attached
            .get(session)
            .ok_or_else(|| TransportError::Detached(session.to_string()))?;
        tx.send(message.clone())
            .map_err(|_| TransportError::Disconnected(session.to_string()))
    }
}

/// Records every delivered message in memory. Can be switched to reject
/// deliveries to exercise failure paths.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    delivered: Arc<Mutex<Vec<(String, Message)>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// All delivered messages, in delivery order.
    pub fn messages(&self) -> Vec<Message> {
        self.delivered.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    /// Delivered messages for one session, in delivery order.
    pub fn messages_for(&self, session: &str) -> Vec<Message> {
        self.delivered
            .lock()
            .iter()
            .filter(|(s, _)| s == session)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Wire tags of everything delivered so far.
    pub fn kinds(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|(_, m)| m.kind().to_string())
            .collect()
    }

    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

impl Transport for MemoryTransport {
    fn deliver(&self, session: &str, message: &Message) -> Result<(), TransportError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(TransportError::Rejected(format!(
                "{} to {session}",
                message.kind()
            )));
        }
        self.delivered
            .lock()
            .push((session.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hub_delivers_to_attached_frontend() {
        let hub = FrontendHub::new();
        let mut attachment = hub.attach("w1");
        hub.deliver("w1", &Message::Close).unwrap();
        assert_eq!(attachment.rx.recv().await, Some(Message::Close));
    }

    #[test]
    fn hub_rejects_unattached_session() {
        let hub = FrontendHub::new();
        assert_eq!(
            hub.deliver("nobody", &Message::Close),
            Err(TransportError::Detached("nobody".into()))
        );
    }

    #[test]
    fn hub_reports_dropped_receiver() {
        let hub = FrontendHub::new();
        let attachment = hub.attach("w1");
        drop(attachment);
        assert!(!hub.is_attached("w1"));
        assert_eq!(
            hub.deliver("w1", &Message::Close),
            Err(TransportError::Disconnected("w1".into()))
        );
    }

    #[tokio::test]
    async fn stale_attachment_cannot_detach_its_replacement() {
        let hub = FrontendHub::new();
        let mut old = hub.attach("w1");
        let mut new = hub.attach("w1");
        assert_eq!(old.rx.recv().await, None);

        assert!(!hub.detach("w1", &old));
        hub.deliver("w1", &Message::Close).unwrap();
        assert_eq!(new.rx.recv().await, Some(Message::Close));

        assert!(hub.detach("w1", &new));
        assert!(!hub.is_attached("w1"));
    }

    #[test]
    fn memory_transport_can_fail() {
        let transport = MemoryTransport::new();
        transport.deliver("a", &Message::Close).unwrap();
        transport.set_failing(true);
        assert!(transport.deliver("a", &Message::Close).is_err());
        assert_eq!(transport.kinds(), vec!["close"]);
    }
}
