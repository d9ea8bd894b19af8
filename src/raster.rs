//! Raster image overlays.
//!
//! The image is an opaque, already encoded buffer (decoding uploaded files
//! is done elsewhere). It crosses the wire base64-encoded in `add_fits`.

use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::entity::{self, Entity, Members};
use crate::hook::{Hook, Subscription};
use crate::protocol::{CallbackId, EntityId, EntityRef, Message, RasterPayload, RasterUpdate};
use crate::validate::ValidationError;
use crate::window::{Window, WindowError};

pub struct RasterOverlay {
    id: EntityId,
    name: String,
    buf: Bytes,
    tone: Option<Value>,
    tone_window: bool,
    on_change_cb: CallbackId,
    hook: Hook<Window>,
}

impl RasterOverlay {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buf(&self) -> &Bytes {
        &self.buf
    }

    /// Tone curve as last reported by the frontend.
    pub fn tone(&self) -> Option<&Value> {
        self.tone.as_ref()
    }

    pub fn tone_window(&self) -> bool {
        self.tone_window
    }
}

impl std::fmt::Debug for RasterOverlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterOverlay")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bytes", &self.buf.len())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct RasterChange {
    name: Option<String>,
    #[serde(default)]
    tone: Option<Value>,
    tone_window: Option<bool>,
}

impl Entity for RasterOverlay {
    const KIND: &'static str = "raster";
    const NAME_PREFIX: &'static str = "image";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn add_message(&self) -> Message {
        Message::AddRaster(RasterPayload {
            id: self.id.clone(),
            buf: base64::engine::general_purpose::STANDARD.encode(&self.buf),
            name: self.name.clone(),
            tone: self.tone.clone(),
            tone_window: self.tone_window,
            on_change: (&self.on_change_cb).into(),
        })
    }

    fn remove_message(&self) -> Message {
        Message::RemoveRaster(EntityRef {
            id: self.id.clone(),
        })
    }

    fn callback_ids(&self) -> Vec<CallbackId> {
        vec![self.on_change_cb.clone()]
    }

    fn hook(&mut self) -> &mut Hook<Window> {
        &mut self.hook
    }

    fn apply_change(&mut self, attrs: &Value) -> anyhow::Result<()> {
        let change = RasterChange::deserialize(attrs)?;
        if let Some(name) = change.name {
            self.name = name;
        }
        if change.tone.is_some() {
            self.tone = change.tone;
        }
        if let Some(tone_window) = change.tone_window {
            self.tone_window = tone_window;
        }
        Ok(())
    }

    fn members(window: &Window) -> &Members<Self> {
        &window.rasters
    }

    fn members_mut(window: &mut Window) -> &mut Members<Self> {
        &mut window.rasters
    }
}

/// Raster overlay manager of one window.
pub struct Rasters<'a> {
    window: &'a mut Window,
}

impl Window {
    pub fn rasters(&mut self) -> Rasters<'_> {
        Rasters { window: self }
    }

    pub fn raster(&self, id: &str) -> Option<&RasterOverlay> {
        self.rasters.get(id)
    }
}

impl Rasters<'_> {
    /// Overlay an encoded image. `name` defaults to `image-<n>`.
    pub fn new(&mut self, buf: Bytes, name: Option<String>) -> Result<EntityId, WindowError> {
        self.window.ensure_open()?;
        if buf.is_empty() {
            return Err(ValidationError::Invalid {
                field: "buf",
                reason: "image buffer is empty".into(),
            }
            .into());
        }
        let name = name.unwrap_or_else(|| entity::default_name::<RasterOverlay>(self.window));
        let id = Uuid::new_v4().to_string();
        let on_change_cb = self
            .window
            .register_callback(entity::on_change::<RasterOverlay>(id.clone()), true);

        let raster = RasterOverlay {
            id,
            name,
            buf,
            tone: None,
            tone_window: false,
            on_change_cb,
            hook: Hook::new(),
        };
        entity::insert(self.window, raster)
    }

    pub fn get(&self, id: &str) -> Option<&RasterOverlay> {
        self.window.rasters.get(id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.window.rasters.ids()
    }

    pub fn len(&self) -> usize {
        self.window.rasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.rasters.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool, WindowError> {
        entity::remove::<RasterOverlay>(self.window, id)
    }

    pub fn clear(&mut self) -> Result<usize, WindowError> {
        entity::clear::<RasterOverlay>(self.window)
    }

    pub fn on_remove<F>(&mut self, id: &str, listener: F) -> Result<Subscription, WindowError>
    where
        F: Fn(&mut Window) + Send + Sync + 'static,
    {
        entity::on_remove::<RasterOverlay, F>(self.window, id, listener)
    }

    pub fn set_name(&mut self, id: &str, name: impl Into<String>) -> Result<(), WindowError> {
        let name = name.into();
        self.raster_mut(id)?.name = name.clone();
        self.update(RasterUpdate {
            id: id.to_string(),
            name: Some(name),
            ..Default::default()
        })
    }

    pub fn set_tone(&mut self, id: &str, tone: Value) -> Result<(), WindowError> {
        self.raster_mut(id)?.tone = Some(tone.clone());
        self.update(RasterUpdate {
            id: id.to_string(),
            tone: Some(tone),
            ..Default::default()
        })
    }

    /// Show or hide the frontend's tone adjustment window for this image.
    pub fn set_tone_window(&mut self, id: &str, shown: bool) -> Result<(), WindowError> {
        self.raster_mut(id)?.tone_window = shown;
        self.update(RasterUpdate {
            id: id.to_string(),
            tone_window: Some(shown),
            ..Default::default()
        })
    }

    fn raster_mut(&mut self, id: &str) -> Result<&mut RasterOverlay, WindowError> {
        self.window.ensure_open()?;
        self.window
            .rasters
            .get_mut(id)
            .ok_or_else(|| entity::unknown::<RasterOverlay>(id))
    }

    fn update(&mut self, update: RasterUpdate) -> Result<(), WindowError> {
        self.window.send(Message::UpdateRaster(update))?;
        Ok(())
    }
}
