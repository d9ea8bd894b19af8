//! Point catalogs plotted as markers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::entity::{self, Entity, Members};
use crate::hook::{Hook, Subscription};
use crate::protocol::{
    CallbackId, CatalogPayload, CatalogUpdate, Column, EntityId, EntityRef, Message,
};
use crate::validate::{check_coords, check_finite, check_len, Rgba, ValidationError};
use crate::window::{Window, WindowError};

/// User handler for a click on object `index` of a catalog.
pub type ClickHandler = Arc<dyn Fn(&mut Window, &EntityId, usize) -> anyhow::Result<()> + Send + Sync>;

pub struct Catalog {
    id: EntityId,
    name: String,
    ra: Vec<f64>,
    dec: Vec<f64>,
    columns: Vec<Column>,
    color: Rgba,
    on_click_cb: CallbackId,
    on_change_cb: CallbackId,
    on_click: Option<ClickHandler>,
    hook: Hook<Window>,
}

impl Catalog {
    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Rgba {
        self.color
    }

    /// Right ascensions in degrees.
    pub fn ra(&self) -> &[f64] {
        &self.ra
    }

    /// Declinations in degrees.
    pub fn dec(&self) -> &[f64] {
        &self.dec
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.ra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ra.is_empty()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("len", &self.ra.len())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct CatalogChange {
    name: Option<String>,
    color: Option<Rgba>,
}

impl Entity for Catalog {
    const KIND: &'static str = "catalog";
    const NAME_PREFIX: &'static str = "catalog";

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn add_message(&self) -> Message {
        Message::AddCatalog(CatalogPayload {
            id: self.id.clone(),
            ra: self.ra.clone(),
            dec: self.dec.clone(),
            name: self.name.clone(),
            columns: self.columns.clone(),
            color: self.color,
            on_click: (&self.on_click_cb).into(),
            on_change: (&self.on_change_cb).into(),
        })
    }

    fn remove_message(&self) -> Message {
        Message::RemoveCatalog(EntityRef {
            id: self.id.clone(),
        })
    }

    fn callback_ids(&self) -> Vec<CallbackId> {
        vec![self.on_click_cb.clone(), self.on_change_cb.clone()]
    }

    fn hook(&mut self) -> &mut Hook<Window> {
        &mut self.hook
    }

    fn apply_change(&mut self, attrs: &Value) -> anyhow::Result<()> {
        let change = CatalogChange::deserialize(attrs)?;
        if let Some(color) = change.color {
            check_finite("color", &color.0)?;
            self.color = color;
        }
        if let Some(name) = change.name {
            self.name = name;
        }
        Ok(())
    }

    fn members(window: &Window) -> &Members<Self> {
        &window.catalogs
    }

    fn members_mut(window: &mut Window) -> &mut Members<Self> {
        &mut window.catalogs
    }
}

/// Parameters for a new catalog.
#[derive(Debug, Clone, Default)]
pub struct NewCatalog {
    pub ra: Vec<f64>,
    pub dec: Vec<f64>,
    /// Defaults to `catalog-<n>`.
    pub name: Option<String>,
    pub columns: Vec<Column>,
    /// Defaults to [`Rgba::DEFAULT_CATALOG`].
    pub color: Option<Rgba>,
}

impl NewCatalog {
    pub fn new(ra: Vec<f64>, dec: Vec<f64>) -> Self {
        Self {
            ra,
            dec,
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn color(mut self, color: Rgba) -> Self {
        self.color = Some(color);
        self
    }

    pub fn column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.push((name.into(), values));
        self
    }
}

fn check_geometry(ra: &[f64], dec: &[f64], columns: &[Column]) -> Result<(), ValidationError> {
    check_coords(ra, dec)?;
    for (name, values) in columns {
        check_len(&format!("column {name}"), ra.len(), values.len())?;
    }
    Ok(())
}

fn click_index(args: &[Value]) -> anyhow::Result<usize> {
    args.first()
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| anyhow::anyhow!("catalog click needs an object index, got {args:?}"))
}

fn click_callback(id: EntityId) -> impl Fn(&mut Window, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static {
    move |window: &mut Window, args: &[Value]| {
        let index = click_index(args)?;
        let handler = window.catalogs.get(&id).and_then(|c| c.on_click.clone());
        match handler {
            Some(handler) => handler(window, &id, index),
            None => Ok(()),
        }
    }
}

/// Catalog manager of one window.
pub struct Catalogs<'a> {
    window: &'a mut Window,
}

impl Window {
    pub fn catalogs(&mut self) -> Catalogs<'_> {
        Catalogs { window: self }
    }

    pub fn catalog(&self, id: &str) -> Option<&Catalog> {
        self.catalogs.get(id)
    }
}

impl Catalogs<'_> {
    /// Create a catalog and mirror it to the frontend.
    ///
    /// Input is validated before anything is registered: `ra` and `dec` must
    /// be finite and of equal length, and every column must match them.
    pub fn new(&mut self, spec: NewCatalog) -> Result<EntityId, WindowError> {
        self.window.ensure_open()?;
        check_geometry(&spec.ra, &spec.dec, &spec.columns)?;
        let color = spec.color.unwrap_or(Rgba::DEFAULT_CATALOG);
        check_finite("color", &color.0)?;

        let name = spec
            .name
            .unwrap_or_else(|| entity::default_name::<Catalog>(self.window));
        let id = Uuid::new_v4().to_string();
        let on_click_cb = self
            .window
            .register_callback(click_callback(id.clone()), true);
        let on_change_cb = self
            .window
            .register_callback(entity::on_change::<Catalog>(id.clone()), true);

        let catalog = Catalog {
            id,
            name,
            ra: spec.ra,
            dec: spec.dec,
            columns: spec.columns,
            color,
            on_click_cb,
            on_change_cb,
            on_click: None,
            hook: Hook::new(),
        };
        entity::insert(self.window, catalog)
    }

    pub fn get(&self, id: &str) -> Option<&Catalog> {
        self.window.catalogs.get(id)
    }

    pub fn members(&self) -> impl Iterator<Item = &Catalog> {
        self.window.catalogs.iter()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.window.catalogs.ids()
    }

    pub fn len(&self) -> usize {
        self.window.catalogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.catalogs.is_empty()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool, WindowError> {
        entity::remove::<Catalog>(self.window, id)
    }

    pub fn clear(&mut self) -> Result<usize, WindowError> {
        entity::clear::<Catalog>(self.window)
    }

    pub fn on_remove<F>(&mut self, id: &str, listener: F) -> Result<Subscription, WindowError>
    where
        F: Fn(&mut Window) + Send + Sync + 'static,
    {
        entity::on_remove::<Catalog, F>(self.window, id, listener)
    }

    /// Install the handler run when the frontend reports a click.
    pub fn set_on_click<F>(&mut self, id: &str, handler: F) -> Result<(), WindowError>
    where
        F: Fn(&mut Window, &EntityId, usize) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let catalog = self.catalog_mut(id)?;
        catalog.on_click = Some(Arc::new(handler));
        Ok(())
    }

    pub fn set_name(&mut self, id: &str, name: impl Into<String>) -> Result<(), WindowError> {
        let name = name.into();
        let catalog = self.catalog_mut(id)?;
        catalog.name = name.clone();
        self.update(CatalogUpdate {
            id: id.to_string(),
            name: Some(name),
            ..Default::default()
        })
    }

    pub fn set_color(&mut self, id: &str, color: Rgba) -> Result<(), WindowError> {
        check_finite("color", &color.0)?;
        let catalog = self.catalog_mut(id)?;
        catalog.color = color;
        self.update(CatalogUpdate {
            id: id.to_string(),
            color: Some(color),
            ..Default::default()
        })
    }

    /// Replace the catalog's objects.
    pub fn set_coords(
        &mut self,
        id: &str,
        ra: Vec<f64>,
        dec: Vec<f64>,
        columns: Vec<Column>,
    ) -> Result<(), WindowError> {
        check_geometry(&ra, &dec, &columns)?;
        let catalog = self.catalog_mut(id)?;
        catalog.ra = ra.clone();
        catalog.dec = dec.clone();
        catalog.columns = columns.clone();
        self.update(CatalogUpdate {
            id: id.to_string(),
            ra: Some(ra),
            dec: Some(dec),
            columns: Some(columns),
            ..Default::default()
        })
    }

    fn catalog_mut(&mut self, id: &str) -> Result<&mut Catalog, WindowError> {
        self.window.ensure_open()?;
        self.window
            .catalogs
            .get_mut(id)
            .ok_or_else(|| entity::unknown::<Catalog>(id))
    }

    fn update(&mut self, update: CatalogUpdate) -> Result<(), WindowError> {
        self.window.send(Message::UpdateCatalog(update))?;
        Ok(())
    }
}
