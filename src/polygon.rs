//! Vector polygons (contours, outlines) drawn as paths on the sphere.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::entity::{self, Entity, Members};
use crate::hook::{Hook, Subscription};
use crate::protocol::{
    CallbackId, EntityId, EntityRef, Message, Path, PathPoint, PolygonPayload, PolygonUpdate,
};
use crate::validate::{check_finite, Rgba, ValidationError};
use crate::window::{Window, WindowError};

/// Line width floor used when none is given.
pub const DEFAULT_MIN_WIDTH: f64 = 3.0;

pub struct Polygon {
    id: EntityId,
    name: String,
    paths: Vec<Path>,
    min_width: f64,
    on_change_cb: CallbackId,
    hook: Hook<Window>,
}

impl Polygon {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn min_width(&self) -> f64 {
        self.min_width
    }
}

impl std::fmt::Debug for Polygon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Polygon")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("paths", &self.paths.len())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct PolygonChange {
    name: Option<String>,
    min_width: Option<f64>,
}

impl Entity for Polygon {
    const KIND: &'static str = "polygon";
    const NAME_PREFIX: &'static str = "polygon";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn add_message(&self) -> Message {
        Message::AddPolygon(PolygonPayload {
            id: self.id.clone(),
            name: self.name.clone(),
            paths: self.paths.clone(),
            min_width: self.min_width,
            on_change: (&self.on_change_cb).into(),
        })
    }

    fn remove_message(&self) -> Message {
        Message::RemovePolygon(EntityRef {
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
        let change = PolygonChange::deserialize(attrs)?;
        if let Some(min_width) = change.min_width {
            check_min_width(min_width)?;
            self.min_width = min_width;
        }
        if let Some(name) = change.name {
            self.name = name;
        }
        Ok(())
    }

    fn members(window: &Window) -> &Members<Self> {
        &window.polygons
    }

    fn members_mut(window: &mut Window) -> &mut Members<Self> {
        &mut window.polygons
    }
}

fn check_min_width(min_width: f64) -> Result<(), ValidationError> {
    if !min_width.is_finite() || min_width < 0.0 {
        return Err(ValidationError::Invalid {
            field: "min_width",
            reason: format!("must be a finite non-negative number, got {min_width}"),
        });
    }
    Ok(())
}

fn check_paths(paths: &[Path]) -> Result<(), ValidationError> {
    for path in paths {
        for point in &path.points {
            check_finite("position", &point.position)?;
            check_finite("color", &point.color.0)?;
            check_finite("size", &[point.size])?;
        }
    }
    Ok(())
}

/// Build an open path through (ra, dec) vertices given in degrees.
///
/// Each vertex becomes a unit vector on the celestial sphere.
pub fn sky_path(coords: &[(f64, f64)], color: Rgba) -> Result<Path, ValidationError> {
    check_finite("color", &color.0)?;
    let mut points = Vec::with_capacity(coords.len());
    for (index, &(ra, dec)) in coords.iter().enumerate() {
        if !ra.is_finite() || !dec.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "coords",
                index,
            });
        }
        let (a, d) = (ra.to_radians(), dec.to_radians());
        points.push(PathPoint {
            position: [a.cos() * d.cos(), a.sin() * d.cos(), d.sin()],
            color,
            size: 0.0,
        });
    }
    Ok(Path {
        points,
        close: false,
        joint: 0,
    })
}

/// Parameters for a new polygon.
#[derive(Debug, Clone)]
pub struct NewPolygon {
    pub paths: Vec<Path>,
    /// Defaults to `polygon-<n>`.
    pub name: Option<String>,
    pub min_width: f64,
}

impl NewPolygon {
    pub fn new(paths: Vec<Path>) -> Self {
        Self {
            paths,
            name: None,
            min_width: DEFAULT_MIN_WIDTH,
        }
    }
}

/// Polygon manager of one window.
pub struct Polygons<'a> {
    window: &'a mut Window,
}

impl Window {
    pub fn polygons(&mut self) -> Polygons<'_> {
        Polygons { window: self }
    }

    pub fn polygon(&self, id: &str) -> Option<&Polygon> {
        self.polygons.get(id)
    }
}

impl Polygons<'_> {
    pub fn new(&mut self, spec: NewPolygon) -> Result<EntityId, WindowError> {
        self.window.ensure_open()?;
        check_paths(&spec.paths)?;
        check_min_width(spec.min_width)?;

        let name = spec
            .name
            .unwrap_or_else(|| entity::default_name::<Polygon>(self.window));
        let id = Uuid::new_v4().to_string();
        let on_change_cb = self
            .window
            .register_callback(entity::on_change::<Polygon>(id.clone()), true);

        let polygon = Polygon {
            id,
            name,
            paths: spec.paths,
            min_width: spec.min_width,
            on_change_cb,
            hook: Hook::new(),
        };
        entity::insert(self.window, polygon)
    }

    pub fn get(&self, id: &str) -> Option<&Polygon> {
        self.window.polygons.get(id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.window.polygons.ids()
    }

    pub fn len(&self) -> usize {
        self.window.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.polygons.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool, WindowError> {
        entity::remove::<Polygon>(self.window, id)
    }

    pub fn clear(&mut self) -> Result<usize, WindowError> {
        entity::clear::<Polygon>(self.window)
    }

    pub fn on_remove<F>(&mut self, id: &str, listener: F) -> Result<Subscription, WindowError>
    where
        F: Fn(&mut Window) + Send + Sync + 'static,
    {
        entity::on_remove::<Polygon, F>(self.window, id, listener)
    }

    pub fn set_name(&mut self, id: &str, name: impl Into<String>) -> Result<(), WindowError> {
        let name = name.into();
        self.polygon_mut(id)?.name = name.clone();
        self.update(PolygonUpdate {
            id: id.to_string(),
            name: Some(name),
            ..Default::default()
        })
    }

    pub fn set_paths(&mut self, id: &str, paths: Vec<Path>) -> Result<(), WindowError> {
        check_paths(&paths)?;
        self.polygon_mut(id)?.paths = paths.clone();
        self.update(PolygonUpdate {
            id: id.to_string(),
            paths: Some(paths),
            ..Default::default()
        })
    }

    pub fn set_min_width(&mut self, id: &str, min_width: f64) -> Result<(), WindowError> {
        check_min_width(min_width)?;
        self.polygon_mut(id)?.min_width = min_width;
        self.update(PolygonUpdate {
            id: id.to_string(),
            min_width: Some(min_width),
            ..Default::default()
        })
    }

    fn polygon_mut(&mut self, id: &str) -> Result<&mut Polygon, WindowError> {
        self.window.ensure_open()?;
        self.window
            .polygons
            .get_mut(id)
            .ok_or_else(|| entity::unknown::<Polygon>(id))
    }

    fn update(&mut self, update: PolygonUpdate) -> Result<(), WindowError> {
        self.window.send(Message::UpdatePolygon(update))?;
        Ok(())
    }
}
