//! The window: per-session aggregate root.
//!
//! A [`Window`] owns the session's channel, callback table, lifecycle hook,
//! synchronization state and entity managers. It is not internally
//! synchronized; the session layer keeps it behind one mutex so every
//! operation on a window is serialized.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::callback::{CallbackHost, CallbackTable, Invocation};
use crate::catalog::Catalog;
use crate::channel::{Channel, ChannelState};
use crate::entity::{self, Members};
use crate::hook::{Hook, HookEvent};
use crate::polygon::Polygon;
use crate::protocol::{
    Alert, CallbackId, CallbackInvocation, EntityId, JumpTo, Message, SetTitle, SyncState,
};
use crate::raster::RasterOverlay;
use crate::selection::Selection;
use crate::sink::ErrorSink;
use crate::transport::{Transport, TransportError};
use crate::validate::{check_finite, ValidationError};

/// Sync key holding the current camera as `{a, d, fovy}` in radians.
pub const VIEW_KEY: &str = "view";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    Open,
    /// Terminal.
    Closed,
}

/// An inbound message the window could not dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoutingError {
    #[error("unrecognized message type {kind:?}")]
    Unrecognized { kind: String },
    #[error("malformed {kind} message: {reason}")]
    Malformed { kind: String, reason: String },
    #[error("{kind} is not accepted from the frontend")]
    Unexpected { kind: String },
}

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("no {kind} with id {id}")]
    UnknownEntity { kind: &'static str, id: String },
    #[error("window {0} is closed")]
    Closed(String),
}

type Dispose = Box<dyn FnOnce(&str) + Send>;

pub struct Window {
    id: String,
    title: String,
    state: WindowState,
    sync: SyncState,
    channel: Channel,
    callbacks: CallbackTable<Window>,
    hook: Hook<Window>,
    sink: Arc<dyn ErrorSink>,
    on_dispose: Option<Dispose>,
    pub(crate) catalogs: Members<Catalog>,
    pub(crate) rasters: Members<RasterOverlay>,
    pub(crate) polygons: Members<Polygon>,
    pub(crate) selections: HashMap<EntityId, Selection>,
}

impl Window {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ErrorSink>,
        log_capacity: usize,
    ) -> Self {
        let id = id.into();
        let mut hook = Hook::new();
        hook.on(HookEvent::Restore, entity::restore_all::<Catalog>);
        hook.on(HookEvent::Restore, entity::restore_all::<RasterOverlay>);
        hook.on(HookEvent::Restore, entity::restore_all::<Polygon>);

        Self {
            channel: Channel::new(id.clone(), transport, log_capacity),
            callbacks: CallbackTable::new(id.clone(), Arc::clone(&sink), log_capacity),
            id,
            title: title.into(),
            state: WindowState::Open,
            sync: SyncState::new(),
            hook,
            sink,
            on_dispose: None,
            catalogs: Members::new(),
            rasters: Members::new(),
            polygons: Members::new(),
            selections: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == WindowState::Open
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn callback_table(&self) -> &CallbackTable<Window> {
        &self.callbacks
    }

    /// Lifecycle hook. `Close` fires once when the window closes, `Restore`
    /// after every reconnect.
    pub fn hook(&mut self) -> &mut Hook<Window> {
        &mut self.hook
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn sync_value(&self, key: &str) -> Option<&Value> {
        self.sync.get(key)
    }

    /// Install the action run when the window closes, before the `Close`
    /// hook fires. Used by the registry to drop its entry.
    pub(crate) fn set_on_dispose(&mut self, dispose: Dispose) {
        self.on_dispose = Some(dispose);
    }

    pub(crate) fn ensure_open(&self) -> Result<(), WindowError> {
        match self.state {
            WindowState::Open => Ok(()),
            WindowState::Closed => Err(WindowError::Closed(self.id.clone())),
        }
    }

    pub(crate) fn send(&mut self, message: Message) -> Result<(), TransportError> {
        self.channel.send(message)
    }

    /// Store `value` under `key` and mirror it to the frontend.
    pub(crate) fn broadcast(&mut self, key: &str, value: Value) -> Result<(), WindowError> {
        self.sync.insert(key.to_string(), value.clone());
        self.send(Message::sync_from_kernel(key, value))?;
        Ok(())
    }

    /// Drop `key` locally and tell the frontend it is now `null`.
    pub(crate) fn broadcast_clear(&mut self, key: &str) -> Result<(), WindowError> {
        self.sync.remove(key);
        self.send(Message::sync_from_kernel(key, Value::Null))?;
        Ok(())
    }

    /// Register a handler the frontend can invoke by id.
    pub fn register_callback<F>(&mut self, handler: F, persistent: bool) -> CallbackId
    where
        F: Fn(&mut Window, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(handler, persistent)
    }

    pub fn unregister_callback(&mut self, cbid: &str) -> bool {
        self.callbacks.unregister(cbid)
    }

    /// Dispatch one inbound frontend message.
    ///
    /// Unknown or malformed messages are reported to the error sink and
    /// returned as [`WindowError::Routing`]; the window stays open.
    pub fn route(&mut self, message: Message) -> Result<(), WindowError> {
        self.ensure_open()?;
        match message {
            Message::Close => {
                tracing::debug!(session = %self.id, "frontend requested close");
                self.enter_closed();
                Ok(())
            }
            Message::Callback(CallbackInvocation { cbid, args }) => {
                self.invoke_callback(&cbid, args);
                Ok(())
            }
            Message::SyncFromFrontend(update) => {
                self.merge_sync(update);
                Ok(())
            }
            Message::Unrecognized { kind, .. } => {
                Err(self.routing_failed(RoutingError::Unrecognized { kind }))
            }
            Message::Malformed { kind, reason, .. } => {
                Err(self.routing_failed(RoutingError::Malformed { kind, reason }))
            }
            other => Err(self.routing_failed(RoutingError::Unexpected {
                kind: other.kind().to_string(),
            })),
        }
    }

    fn routing_failed(&self, error: RoutingError) -> WindowError {
        self.sink.routing_failed(&self.id, &error);
        WindowError::Routing(error)
    }

    /// Run a registered callback. A failing handler produces an `alert`
    /// message to the frontend in addition to the sink report.
    pub fn invoke_callback(&mut self, cbid: &str, args: Vec<Value>) -> Invocation {
        let outcome = CallbackTable::invoke(self, cbid, args);
        if let Invocation::Failed(failure) = &outcome {
            let alert = Message::Alert(Alert {
                message: failure.error.clone(),
            });
            if let Err(e) = self.send(alert) {
                tracing::warn!(session = %self.id, error = %e, "could not deliver alert");
            }
        }
        outcome
    }

    fn merge_sync(&mut self, update: SyncState) {
        for (key, value) in update {
            self.sync.insert(key, value);
        }
    }

    /// Point the camera at (`ra`, `dec`) with a vertical field of view of
    /// `fov`, all in degrees.
    pub fn jump_to(&mut self, ra: f64, dec: f64, fov: f64) -> Result<(), WindowError> {
        self.ensure_open()?;
        check_finite("jump_to", &[ra, dec, fov])?;
        let view = serde_json::json!({
            "a": ra.to_radians(),
            "d": dec.to_radians(),
            "fovy": fov.to_radians(),
        });
        self.sync.insert(VIEW_KEY.to_string(), view.clone());
        // Both messages are queued before a delivery error is reported.
        let jumped = self.send(Message::JumpTo(JumpTo { ra, dec, fov }));
        let broadcast = self.send(Message::sync_from_kernel(VIEW_KEY, view));
        jumped.and(broadcast)?;
        Ok(())
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), WindowError> {
        self.ensure_open()?;
        self.title = title.into();
        self.send(Message::SetTitle(SetTitle {
            title: self.title.clone(),
        }))?;
        Ok(())
    }

    /// Ask the frontend to close, then close this side.
    pub fn close(&mut self) -> Result<(), WindowError> {
        self.ensure_open()?;
        if let Err(e) = self.send(Message::Close) {
            tracing::warn!(session = %self.id, error = %e, "close message not delivered");
        }
        self.enter_closed();
        Ok(())
    }

    fn enter_closed(&mut self) {
        if self.state == WindowState::Closed {
            return;
        }
        self.state = WindowState::Closed;
        self.channel.close();
        if let Some(dispose) = self.on_dispose.take() {
            dispose(&self.id);
        }
        tracing::info!(session = %self.id, "window closed");
        self.fire(HookEvent::Close);
    }

    /// A frontend attached. The first connect flushes everything queued so
    /// far. Any later connect starts a fresh channel that keeps the old
    /// channel's undelivered non-entity messages, restores every live entity
    /// into it and then flushes.
    ///
    /// Returns the number of messages delivered.
    pub fn connect(&mut self) -> Result<usize, WindowError> {
        self.ensure_open()?;
        if self.channel.state() != ChannelState::Pending {
            // Entity messages are superseded by the restore below.
            self.channel = self.channel.fresh_keeping(|m| !m.is_entity_message());
            self.restore();
            tracing::info!(session = %self.id, queued = self.channel.pending_len(), "window restored");
        }
        Ok(self.channel.mark_ready()?)
    }

    /// The frontend went away. The window stays open and queues until the
    /// next [`Window::connect`].
    pub fn disconnect(&mut self) {
        if self.channel.state() != ChannelState::Closed {
            tracing::debug!(session = %self.id, "frontend disconnected");
            self.channel.close();
        }
    }

    /// Fire the `Restore` hook: every live entity re-sends its add message.
    pub fn restore(&mut self) {
        self.fire(HookEvent::Restore);
    }

    /// Retry delivery of queued messages.
    pub fn flush(&mut self) -> Result<usize, WindowError> {
        Ok(self.channel.flush()?)
    }

    fn fire(&mut self, event: HookEvent) {
        for listener in self.hook.snapshot(event) {
            listener(self);
        }
    }

    pub fn info(&self) -> WindowInfo {
        WindowInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            state: self.state,
            channel: self.channel.state(),
            pending: self.channel.pending_len(),
            catalogs: self.catalogs.len(),
            rasters: self.rasters.len(),
            polygons: self.polygons.len(),
            sync: self.sync.clone(),
        }
    }
}

impl CallbackHost for Window {
    fn callbacks(&mut self) -> &mut CallbackTable<Self> {
        &mut self.callbacks
    }
}

impl std::fmt::Debug for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("state", &self.state)
            .field("channel", &self.channel)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

/// Point-in-time summary of a window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowInfo {
    pub id: String,
    pub title: String,
    pub state: WindowState,
    pub channel: ChannelState,
    pub pending: usize,
    pub catalogs: usize,
    pub rasters: usize,
    pub polygons: usize,
    pub sync: SyncState,
}
