//! Ordered message channel to one session's frontend.
//!
//! A channel starts `Pending`: nothing is delivered and every message is
//! queued. [`Channel::mark_ready`] flushes the queue in order. A `Closed`
//! channel never becomes ready again; a reconnect gets a [`Channel::fresh`]
//! one instead.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use crate::audit::AuditLog;
use crate::protocol::Message;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Never connected. Messages queue until the first connect.
    Pending,
    Ready,
    /// Disconnected. Terminal for this channel.
    Closed,
}

pub struct Channel {
    session: String,
    state: ChannelState,
    queue: VecDeque<Message>,
    log: AuditLog<Message>,
    transport: Arc<dyn Transport>,
}

impl Channel {
    pub fn new(session: impl Into<String>, transport: Arc<dyn Transport>, log_capacity: usize) -> Self {
        Self {
            session: session.into(),
            state: ChannelState::Pending,
            queue: VecDeque::new(),
            log: AuditLog::new(log_capacity),
            transport,
        }
    }

    /// A new `Pending` channel for the same session and transport.
    pub fn fresh(&self) -> Self {
        Self::new(
            self.session.clone(),
            Arc::clone(&self.transport),
            self.log.capacity(),
        )
    }

    /// A new `Pending` channel whose queue starts with this channel's
    /// undelivered messages that satisfy `keep`, in their original order.
    pub fn fresh_keeping(&self, keep: impl Fn(&Message) -> bool) -> Self {
        let mut fresh = self.fresh();
        fresh.queue = self.queue.iter().filter(|m| keep(m)).cloned().collect();
        fresh
    }

    /// Log `message`, then deliver it if the channel is ready or queue it if not.
    ///
    /// Delivery always drains the queue head first, so a message sent after a
    /// failed delivery waits behind the failed one. On failure the message
    /// stays queued and a later [`Channel::flush`] retries it.
    pub fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.log.push(message.clone());
        self.queue.push_back(message);
        if self.is_ready() {
            self.flush()?;
        }
        Ok(())
    }

    /// Deliver queued messages in FIFO order, stopping at the first failure.
    ///
    /// Returns how many messages were delivered. Does nothing unless ready.
    pub fn flush(&mut self) -> Result<usize, TransportError> {
        if !self.is_ready() {
            return Ok(0);
        }
        let mut delivered = 0;
        while let Some(message) = self.queue.front() {
            if let Err(e) = self.transport.deliver(&self.session, message) {
                tracing::warn!(
                    session = %self.session,
                    kind = message.kind(),
                    pending = self.queue.len(),
                    error = %e,
                    "delivery failed, message stays queued"
                );
                return Err(e);
            }
            self.queue.pop_front();
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Transition `Pending` → `Ready` and flush. A closed channel stays closed.
    pub fn mark_ready(&mut self) -> Result<usize, TransportError> {
        match self.state {
            ChannelState::Closed => {
                tracing::debug!(session = %self.session, "closed channel cannot become ready");
                Ok(0)
            }
            ChannelState::Pending | ChannelState::Ready => {
                self.state = ChannelState::Ready;
                self.flush()
            }
        }
    }

    pub fn close(&mut self) {
        self.state = ChannelState::Closed;
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ChannelState::Ready
    }

    /// Messages waiting for delivery, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &Message> {
        self.queue.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// The most recent sent messages, oldest first.
    pub fn log(&self) -> &AuditLog<Message> {
        &self.log
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("session", &self.session)
            .field("state", &self.state)
            .field("pending", &self.queue.len())
            .field("logged", &self.log.len())
            .finish_non_exhaustive()
    }
}
