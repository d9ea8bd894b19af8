//! Shared machinery for mirrored entities (catalogs, raster overlays,
//! polygons).
//!
//! Each kind lives in a [`Members`] table owned by the window. Entities are
//! addressed by id; nothing outside the window holds a reference to one.

use std::collections::HashMap;

use serde_json::Value;

use crate::hook::{Hook, HookEvent, Listener, Subscription};
use crate::protocol::{CallbackId, EntityId, Message};
use crate::window::{Window, WindowError};

/// A frontend-visible object owned by a window.
pub trait Entity: Sized + Send + 'static {
    /// Noun used in logs and errors.
    const KIND: &'static str;
    /// Prefix of generated default names, e.g. `catalog-3`.
    const NAME_PREFIX: &'static str;

    fn id(&self) -> &EntityId;

    /// The full `add_<kind>` message describing current state.
    fn add_message(&self) -> Message;

    fn remove_message(&self) -> Message;

    /// Callbacks registered on behalf of this entity.
    fn callback_ids(&self) -> Vec<CallbackId>;

    fn hook(&mut self) -> &mut Hook<Window>;

    /// Apply attributes pushed by the frontend. Nothing is sent back.
    fn apply_change(&mut self, attrs: &Value) -> anyhow::Result<()>;

    fn members(window: &Window) -> &Members<Self>;

    fn members_mut(window: &mut Window) -> &mut Members<Self>;
}

/// Live entities of one kind, keyed by id.
pub struct Members<E> {
    entries: HashMap<EntityId, E>,
}

impl<E> Members<E> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.entries.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut E> {
        self.entries.get_mut(id)
    }

    /// Members in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.entries.values()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.keys().cloned().collect()
    }
}

impl<E> Default for Members<E> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn default_name<E: Entity>(window: &Window) -> String {
    format!("{}-{}", E::NAME_PREFIX, E::members(window).len() + 1)
}

pub(crate) fn unknown<E: Entity>(id: &str) -> WindowError {
    WindowError::UnknownEntity {
        kind: E::KIND,
        id: id.to_string(),
    }
}

/// Register `entity` with its manager and mirror it to the frontend.
///
/// The entity's own `Remove` hook evicts it from the manager. If the add
/// message cannot be delivered the entity stays registered and the message
/// stays queued.
pub(crate) fn insert<E: Entity>(window: &mut Window, mut entity: E) -> Result<EntityId, WindowError> {
    let id = entity.id().clone();
    let evict = id.clone();
    entity.hook().on(HookEvent::Remove, move |w: &mut Window| {
        E::members_mut(w).entries.remove(&evict);
    });

    let add = entity.add_message();
    E::members_mut(window).entries.insert(id.clone(), entity);
    tracing::debug!(session = %window.id(), kind = E::KIND, id = %id, "entity added");
    window.send(add)?;
    Ok(id)
}

/// Remove an entity: drop its callbacks, tell the frontend, then fire its
/// `Remove` hook. Returns `false` for unknown ids.
pub(crate) fn remove<E: Entity>(window: &mut Window, id: &str) -> Result<bool, WindowError> {
    window.ensure_open()?;
    let Some(entity) = E::members_mut(window).get_mut(id) else {
        return Ok(false);
    };
    let callbacks = entity.callback_ids();
    let message = entity.remove_message();
    let listeners: Vec<Listener<Window>> = entity.hook().snapshot(HookEvent::Remove);

    for cbid in &callbacks {
        window.unregister_callback(cbid);
    }
    let sent = window.send(message);
    for listener in listeners {
        listener(window);
    }
    tracing::debug!(session = %window.id(), kind = E::KIND, id = %id, "entity removed");
    sent?;
    Ok(true)
}

/// Remove every current member. Returns how many were removed.
///
/// Every member is removed even when delivery fails; the first delivery
/// error is returned afterwards and the remove messages stay queued.
pub(crate) fn clear<E: Entity>(window: &mut Window) -> Result<usize, WindowError> {
    window.ensure_open()?;
    let mut removed = 0;
    let mut first_error = None;
    for id in E::members(window).ids() {
        match remove::<E>(window, &id) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(WindowError::Transport(e)) => {
                removed += 1;
                first_error.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(removed),
    }
}

/// `Restore` listener: re-send every live member's add message.
pub(crate) fn restore_all<E: Entity>(window: &mut Window) {
    let messages: Vec<Message> = E::members(window).iter().map(E::add_message).collect();
    let count = messages.len();
    for message in messages {
        if let Err(e) = window.send(message) {
            tracing::warn!(session = %window.id(), kind = E::KIND, error = %e, "restore message not delivered");
        }
    }
    if count > 0 {
        tracing::debug!(session = %window.id(), kind = E::KIND, count, "entities restored");
    }
}

/// Persistent `on_change` handler for entity `id`.
///
/// The frontend invokes it with one attribute object. Changes to an entity
/// that has since been removed are ignored.
pub(crate) fn on_change<E: Entity>(
    id: EntityId,
) -> impl Fn(&mut Window, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static {
    move |window: &mut Window, args: &[Value]| {
        let attrs = args
            .first()
            .ok_or_else(|| anyhow::anyhow!("{} change carried no attributes", E::KIND))?;
        match E::members_mut(window).get_mut(&id) {
            Some(entity) => entity.apply_change(attrs),
            None => Ok(()),
        }
    }
}

/// Subscribe to the `Remove` hook of one entity.
pub(crate) fn on_remove<E: Entity, F>(window: &mut Window, id: &str, listener: F) -> Result<Subscription, WindowError>
where
    F: Fn(&mut Window) + Send + Sync + 'static,
{
    let entity = E::members_mut(window)
        .get_mut(id)
        .ok_or_else(|| unknown::<E>(id))?;
    Ok(entity.hook().on(HookEvent::Remove, listener))
}
