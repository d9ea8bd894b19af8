//! Typed views over well-known synchronization keys.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::validate::ValidationError;
use crate::window::{Window, WindowError, VIEW_KEY};

pub const SSP_PARAMS_KEY: &str = "sspParams";
pub const RECT_SELECTION_KEY: &str = "rectSelection";

/// Color composition modes the frontend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorParamsType {
    SimpleRgb,
    SdssTrueColor,
}

impl ColorParamsType {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorParamsType::SimpleRgb => "SIMPLE_RGB",
            ColorParamsType::SdssTrueColor => "SDSS_TRUE_COLOR",
        }
    }
}

impl fmt::Display for ColorParamsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorParamsType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SIMPLE_RGB" => Ok(ColorParamsType::SimpleRgb),
            "SDSS_TRUE_COLOR" => Ok(ColorParamsType::SdssTrueColor),
            other => Err(ValidationError::UnknownColorType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SelectionError {
    #[error("no rectangular selection")]
    Empty,
    #[error("rectangular selection is malformed: {0}")]
    Malformed(String),
}

/// `sspParams`: color composition settings.
pub struct ColorParams<'a> {
    window: &'a mut Window,
}

/// `rectSelection`: the rectangle the user dragged, as two corners.
pub struct RectSelection<'a> {
    window: &'a mut Window,
}

/// Cone-search view of the current camera.
pub struct FieldOfView<'a> {
    window: &'a Window,
}

impl Window {
    pub fn color_params(&mut self) -> ColorParams<'_> {
        ColorParams { window: self }
    }

    pub fn rect_selection(&mut self) -> RectSelection<'_> {
        RectSelection { window: self }
    }

    pub fn field_of_view(&self) -> FieldOfView<'_> {
        FieldOfView { window: self }
    }
}

impl ColorParams<'_> {
    /// The frontend's `sspParams.type`, `SIMPLE_RGB` when unset.
    pub fn kind(&self) -> &str {
        self.window
            .sync_value(SSP_PARAMS_KEY)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .unwrap_or(ColorParamsType::SimpleRgb.as_str())
    }

    /// Set `sspParams.type` and re-broadcast the whole `sspParams` object.
    pub fn set_kind(&mut self, kind: ColorParamsType) -> Result<(), WindowError> {
        self.window.ensure_open()?;
        let mut params = match self.window.sync_value(SSP_PARAMS_KEY) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        params.insert("type".into(), Value::String(kind.as_str().into()));
        self.window.broadcast(SSP_PARAMS_KEY, Value::Object(params))
    }
}

impl RectSelection<'_> {
    pub fn area(&self) -> Option<&Value> {
        self.window
            .sync_value(RECT_SELECTION_KEY)
            .filter(|v| !v.is_null())
    }

    /// Forget the selection here and on the frontend.
    pub fn clear(&mut self) -> Result<(), WindowError> {
        self.window.ensure_open()?;
        self.window.broadcast_clear(RECT_SELECTION_KEY)
    }

    /// A `boxSearch` predicate covering the selection, corners in degrees.
    pub fn to_search_predicate(&self) -> Result<String, SelectionError> {
        let area = self.area().ok_or(SelectionError::Empty)?;
        let corners = area
            .as_array()
            .filter(|c| c.len() == 2)
            .ok_or_else(|| SelectionError::Malformed("expected two corners".into()))?;
        let (a0, d0) = corner(&corners[0])?;
        let (a1, d1) = corner(&corners[1])?;
        Ok(format!(
            "boxSearch(coord, {}, {}, {}, {})",
            degrees(a0),
            degrees(a1),
            degrees(d0),
            degrees(d1)
        ))
    }
}

fn corner(value: &Value) -> Result<(f64, f64), SelectionError> {
    let field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| SelectionError::Malformed(format!("corner is missing numeric {key:?}")))
    };
    Ok((field("a")?, field("d")?))
}

fn degrees(radians: f64) -> f64 {
    radians * 180.0 / std::f64::consts::PI
}

impl FieldOfView<'_> {
    /// A `coneSearch` predicate for the current view. Radius is the vertical
    /// field of view in arcseconds. Missing view fields count as zero.
    pub fn to_cone_search_predicate(&self) -> String {
        let view = self.window.sync_value(VIEW_KEY);
        let field = |key: &str| view.and_then(|v| v.get(key)).and_then(Value::as_f64).unwrap_or(0.0);
        format!(
            "coneSearch(coord, {}, {}, {})",
            degrees(field("a")),
            degrees(field("d")),
            degrees(field("fovy")) * 3600.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use crate::sink::MemorySink;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;

    fn window() -> (Window, MemoryTransport) {
        let transport = MemoryTransport::new();
        let mut w = Window::new(
            "w",
            "t",
            Arc::new(transport.clone()),
            Arc::new(MemorySink::new()),
            1000,
        );
        w.connect().unwrap();
        (w, transport)
    }

    fn sync(w: &mut Window, value: Value) {
        let Value::Object(map) = value else {
            panic!("sync payload must be an object")
        };
        w.route(Message::SyncFromFrontend(map)).unwrap();
    }

    #[test]
    fn color_type_defaults_to_simple_rgb() {
        let (mut w, _) = window();
        assert_eq!(w.color_params().kind(), "SIMPLE_RGB");
    }

    #[test]
    fn setting_color_type_rebroadcasts_full_params() {
        let (mut w, transport) = window();
        sync(&mut w, json!({"sspParams": {"type": "SIMPLE_RGB", "gamma": 2.2}}));
        w.color_params().set_kind(ColorParamsType::SdssTrueColor).unwrap();

        assert_eq!(w.color_params().kind(), "SDSS_TRUE_COLOR");
        assert_eq!(
            transport.messages(),
            vec![Message::sync_from_kernel(
                SSP_PARAMS_KEY,
                json!({"type": "SDSS_TRUE_COLOR", "gamma": 2.2})
            )]
        );
    }

    #[test]
    fn unknown_color_type_is_rejected() {
        assert_eq!(
            "HSV".parse::<ColorParamsType>(),
            Err(ValidationError::UnknownColorType("HSV".into()))
        );
        assert_eq!("SDSS_TRUE_COLOR".parse(), Ok(ColorParamsType::SdssTrueColor));
    }

    #[test]
    fn rect_selection_predicate_requires_selection() {
        let (mut w, _) = window();
        assert_eq!(w.rect_selection().to_search_predicate(), Err(SelectionError::Empty));

        let pi = std::f64::consts::PI;
        sync(
            &mut w,
            json!({"rectSelection": [{"a": pi / 2.0, "d": 0.0}, {"a": pi, "d": pi / 4.0}]}),
        );
        assert_eq!(
            w.rect_selection().to_search_predicate().unwrap(),
            "boxSearch(coord, 90, 180, 0, 45)"
        );
    }

    #[test]
    fn malformed_rect_selection_is_reported() {
        let (mut w, _) = window();
        sync(&mut w, json!({"rectSelection": [{"a": 1.0}]}));
        assert!(matches!(
            w.rect_selection().to_search_predicate(),
            Err(SelectionError::Malformed(_))
        ));
    }

    #[test]
    fn clearing_rect_selection_broadcasts_null() {
        let (mut w, transport) = window();
        sync(&mut w, json!({"rectSelection": [{"a": 0.0, "d": 0.0}, {"a": 0.1, "d": 0.1}]}));
        w.rect_selection().clear().unwrap();
        assert!(w.rect_selection().area().is_none());
        assert_eq!(
            transport.messages(),
            vec![Message::sync_from_kernel(RECT_SELECTION_KEY, Value::Null)]
        );
    }

    #[test]
    fn cone_search_defaults_to_zero() {
        let (w, _) = window();
        assert_eq!(
            w.field_of_view().to_cone_search_predicate(),
            "coneSearch(coord, 0, 0, 0)"
        );
    }

    #[test]
    fn cone_search_follows_jump_to() {
        let (mut w, _) = window();
        w.jump_to(180.0, 0.0, 1.0).unwrap();
        let predicate = w.field_of_view().to_cone_search_predicate();
        assert!(predicate.starts_with("coneSearch(coord, 180, 0, "), "{predicate}");
    }
}
