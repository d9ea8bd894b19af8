//! Frontend message protocol.
//!
//! Wire format is a JSON object `{"type": <string>, "args": <value>}`.
//! Every known `type` maps to one [`Message`] variant. Unknown types decode
//! to [`Message::Unrecognized`] and known types with unusable `args` decode to
//! [`Message::Malformed`], so decoding a well-formed JSON object never fails
//! and the router can report both cases uniformly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::validate::Rgba;

/// Opaque identifier handed to the frontend in place of a backend closure.
pub type CallbackId = String;

/// Identifier of a catalog, raster overlay or polygon.
pub type EntityId = String;

/// Key/value synchronization state shared with the frontend.
pub type SyncState = Map<String, Value>;

/// How a callback is referenced inside outbound payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRef {
    pub cbid: CallbackId,
}

impl From<&CallbackId> for CallbackRef {
    fn from(cbid: &CallbackId) -> Self {
        Self { cbid: cbid.clone() }
    }
}

/// Frontend → backend: invoke a registered callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackInvocation {
    pub cbid: CallbackId,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JumpTo {
    pub ra: f64,
    pub dec: f64,
    pub fov: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetTitle {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub callback: CallbackRef,
    pub size: Option<[u32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: EntityId,
}

/// A named catalog column, encoded as `[name, [values...]]`.
pub type Column = (String, Vec<Value>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogPayload {
    pub id: EntityId,
    pub ra: Vec<f64>,
    pub dec: Vec<f64>,
    pub name: String,
    pub columns: Vec<Column>,
    pub color: Rgba,
    pub on_click: CallbackRef,
    pub on_change: CallbackRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogUpdate {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Rgba>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ra: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dec: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<Column>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterPayload {
    pub id: EntityId,
    /// Base64-encoded image buffer.
    pub buf: String,
    pub name: String,
    pub tone: Option<Value>,
    pub tone_window: bool,
    pub on_change: CallbackRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RasterUpdate {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone_window: Option<bool>,
}

/// A vertex of a polygon path, as a unit vector on the celestial sphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub position: [f64; 3],
    pub color: Rgba,
    #[serde(default)]
    pub size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub points: Vec<PathPoint>,
    #[serde(default)]
    pub close: bool,
    #[serde(default)]
    pub joint: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonPayload {
    pub id: EntityId,
    pub name: String,
    pub paths: Vec<Path>,
    pub min_width: f64,
    pub on_change: CallbackRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolygonUpdate {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<Path>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_width: Option<f64>,
}

/// A message exchanged with the frontend, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Close,
    Callback(CallbackInvocation),
    SyncFromFrontend(SyncState),
    SyncFromKernel(SyncState),
    JumpTo(JumpTo),
    SetTitle(SetTitle),
    Alert(Alert),
    Snapshot(SnapshotRequest),
    AddCatalog(CatalogPayload),
    UpdateCatalog(CatalogUpdate),
    RemoveCatalog(EntityRef),
    AddRaster(RasterPayload),
    UpdateRaster(RasterUpdate),
    RemoveRaster(EntityRef),
    AddPolygon(PolygonPayload),
    UpdatePolygon(PolygonUpdate),
    RemovePolygon(EntityRef),
    /// A `type` this protocol does not know.
    Unrecognized { kind: String, args: Value },
    /// A known `type` whose `args` did not match its payload shape.
    Malformed {
        kind: String,
        args: Value,
        reason: String,
    },
}

/// The raw `{type, args}` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    args: Value,
}

impl Message {
    /// The wire `type` tag of this message.
    pub fn kind(&self) -> &str {
        match self {
            Message::Close => "close",
            Message::Callback(_) => "callback",
            Message::SyncFromFrontend(_) => "sync_from_frontend",
            Message::SyncFromKernel(_) => "sync_from_kernel",
            Message::JumpTo(_) => "jump_to",
            Message::SetTitle(_) => "set_title",
            Message::Alert(_) => "alert",
            Message::Snapshot(_) => "snapshot",
            Message::AddCatalog(_) => "add_catalog",
            Message::UpdateCatalog(_) => "update_catalog",
            Message::RemoveCatalog(_) => "remove_catalog",
            Message::AddRaster(_) => "add_fits",
            Message::UpdateRaster(_) => "update_fits",
            Message::RemoveRaster(_) => "remove_fits",
            Message::AddPolygon(_) => "add_polygon",
            Message::UpdatePolygon(_) => "update_polygon",
            Message::RemovePolygon(_) => "remove_polygon",
            Message::Unrecognized { kind, .. } | Message::Malformed { kind, .. } => kind,
        }
    }

    /// Whether this adds, updates or removes a catalog, raster or polygon.
    pub fn is_entity_message(&self) -> bool {
        matches!(
            self,
            Message::AddCatalog(_)
                | Message::UpdateCatalog(_)
                | Message::RemoveCatalog(_)
                | Message::AddRaster(_)
                | Message::UpdateRaster(_)
                | Message::RemoveRaster(_)
                | Message::AddPolygon(_)
                | Message::UpdatePolygon(_)
                | Message::RemovePolygon(_)
        )
    }

    /// Build a single-key `sync_from_kernel` broadcast.
    pub fn sync_from_kernel(key: &str, value: Value) -> Self {
        let mut state = SyncState::new();
        state.insert(key.to_string(), value);
        Message::SyncFromKernel(state)
    }

    fn args(&self) -> Result<Value, serde_json::Error> {
        match self {
            Message::Close => Ok(Value::Null),
            Message::Callback(p) => serde_json::to_value(p),
            Message::SyncFromFrontend(s) | Message::SyncFromKernel(s) => {
                Ok(Value::Object(s.clone()))
            }
            Message::JumpTo(p) => serde_json::to_value(p),
            Message::SetTitle(p) => serde_json::to_value(p),
            Message::Alert(p) => serde_json::to_value(p),
            Message::Snapshot(p) => serde_json::to_value(p),
            Message::AddCatalog(p) => serde_json::to_value(p),
            Message::UpdateCatalog(p) => serde_json::to_value(p),
            Message::AddRaster(p) => serde_json::to_value(p),
            Message::UpdateRaster(p) => serde_json::to_value(p),
            Message::AddPolygon(p) => serde_json::to_value(p),
            Message::UpdatePolygon(p) => serde_json::to_value(p),
            Message::RemoveCatalog(p) | Message::RemoveRaster(p) | Message::RemovePolygon(p) => {
                serde_json::to_value(p)
            }
            Message::Unrecognized { args, .. } | Message::Malformed { args, .. } => {
                Ok(args.clone())
            }
        }
    }

    fn from_wire(wire: WireMessage) -> Self {
        let WireMessage { kind, args } = wire;
        let decoded = match kind.as_str() {
            "close" => Ok(Message::Close),
            "callback" => parse(&args).map(Message::Callback),
            "sync_from_frontend" => parse(&args).map(Message::SyncFromFrontend),
            "sync_from_kernel" => parse(&args).map(Message::SyncFromKernel),
            "jump_to" => parse(&args).map(Message::JumpTo),
            "set_title" => parse(&args).map(Message::SetTitle),
            "alert" => parse(&args).map(Message::Alert),
            "snapshot" => parse(&args).map(Message::Snapshot),
            "add_catalog" => parse(&args).map(Message::AddCatalog),
            "update_catalog" => parse(&args).map(Message::UpdateCatalog),
            "remove_catalog" => parse(&args).map(Message::RemoveCatalog),
            "add_fits" => parse(&args).map(Message::AddRaster),
            "update_fits" => parse(&args).map(Message::UpdateRaster),
            "remove_fits" => parse(&args).map(Message::RemoveRaster),
            "add_polygon" => parse(&args).map(Message::AddPolygon),
            "update_polygon" => parse(&args).map(Message::UpdatePolygon),
            "remove_polygon" => parse(&args).map(Message::RemovePolygon),
            _ => {
                return Message::Unrecognized {
                    kind: kind.clone(),
                    args,
                }
            }
        };
        decoded.unwrap_or_else(|e| Message::Malformed {
            kind,
            args,
            reason: e.to_string(),
        })
    }
}

fn parse<T: DeserializeOwned>(args: &Value) -> Result<T, serde_json::Error> {
    // Absent args decode as an empty object so all-optional payloads still parse.
    match args {
        Value::Null => serde_json::from_value(Value::Object(Map::new())),
        other => T::deserialize(other),
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let args = self.args().map_err(serde::ser::Error::custom)?;
        WireMessage {
            kind: self.kind().to_string(),
            args,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        WireMessage::deserialize(deserializer).map(Message::from_wire)
    }
}
