//! Click-to-select catalogs.
//!
//! A selectable catalog is a pair of catalogs: the base one the user clicks
//! and a `$marker` catalog that highlights the current selection. Clicking
//! object `i` of the base toggles `i` and re-sends the marker coordinates.

use std::sync::Arc;

use crate::catalog::NewCatalog;
use crate::protocol::EntityId;
use crate::validate::Rgba;
use crate::window::{Window, WindowError};

/// Name given to every marker catalog.
pub const MARKER_NAME: &str = "$marker";

pub type SelectionHandler = Arc<dyn Fn(&mut Window, &[usize]) -> anyhow::Result<()> + Send + Sync>;

/// Selection state, keyed by the base catalog id inside the window.
pub struct Selection {
    marker: EntityId,
    indices: Vec<usize>,
    on_change: Option<SelectionHandler>,
}

/// Ids of the two catalogs that make up a selectable catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableCatalog {
    pub base: EntityId,
    pub marker: EntityId,
}

pub struct Selectables<'a> {
    window: &'a mut Window,
}

impl Window {
    pub fn selectables(&mut self) -> Selectables<'_> {
        Selectables { window: self }
    }

    /// Selected object indices of the selectable catalog `base`, in click order.
    pub fn selection(&self, base: &str) -> Option<&[usize]> {
        self.selections.get(base).map(|s| s.indices.as_slice())
    }
}

impl Selectables<'_> {
    /// Create the base and marker catalogs. The marker defaults to
    /// [`Rgba::DEFAULT_MARKER`].
    pub fn new(&mut self, spec: NewCatalog, marker_color: Option<Rgba>) -> Result<SelectableCatalog, WindowError> {
        let base = self.window.catalogs().new(spec)?;
        let marker_spec = NewCatalog::new(Vec::new(), Vec::new())
            .name(MARKER_NAME)
            .color(marker_color.unwrap_or(Rgba::DEFAULT_MARKER));
        let marker = match self.window.catalogs().new(marker_spec) {
            Ok(marker) => marker,
            Err(e) => {
                self.window.catalogs().remove(&base)?;
                return Err(e);
            }
        };

        self.window.selections.insert(
            base.clone(),
            Selection {
                marker: marker.clone(),
                indices: Vec::new(),
                on_change: None,
            },
        );
        self.window.catalogs().set_on_click(&base, toggle)?;

        let (base_id, marker_id) = (base.clone(), marker.clone());
        self.window.catalogs().on_remove(&base, move |w: &mut Window| {
            w.selections.remove(&base_id);
            if let Err(e) = w.catalogs().remove(&marker_id) {
                tracing::warn!(session = %w.id(), marker = %marker_id, error = %e, "could not remove selection marker");
            }
        })?;

        Ok(SelectableCatalog { base, marker })
    }

    /// Install the handler run after every selection change.
    pub fn set_on_change<F>(&mut self, base: &str, handler: F) -> Result<(), WindowError>
    where
        F: Fn(&mut Window, &[usize]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let selection = self
            .window
            .selections
            .get_mut(base)
            .ok_or_else(|| WindowError::UnknownEntity {
                kind: "selectable catalog",
                id: base.to_string(),
            })?;
        selection.on_change = Some(Arc::new(handler));
        Ok(())
    }

    /// Remove the base catalog together with its marker.
    pub fn remove(&mut self, base: &str) -> Result<bool, WindowError> {
        self.window.catalogs().remove(base)
    }
}

fn toggle(window: &mut Window, base: &EntityId, index: usize) -> anyhow::Result<()> {
    let len = window.catalog(base).map_or(0, |c| c.len());
    anyhow::ensure!(index < len, "index {index} is out of range for a catalog of {len} objects");

    let Some(selection) = window.selections.get_mut(base) else {
        return Ok(());
    };
    // The base may have shrunk since the last click.
    selection.indices.retain(|&i| i < len);
    match selection.indices.iter().position(|&i| i == index) {
        Some(pos) => {
            selection.indices.remove(pos);
        }
        None => selection.indices.push(index),
    }
    let indices = selection.indices.clone();
    let marker = selection.marker.clone();
    let handler = selection.on_change.clone();

    let Some(catalog) = window.catalog(base) else {
        return Ok(());
    };
    let (ra, dec): (Vec<f64>, Vec<f64>) = indices
        .iter()
        .filter_map(|&i| Some((*catalog.ra().get(i)?, *catalog.dec().get(i)?)))
        .unzip();
    window.catalogs().set_coords(&marker, ra, dec, Vec::new())?;

    if let Some(handler) = handler {
        handler(window, &indices)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CallbackInvocation, CatalogUpdate, Message};
    use crate::sink::MemorySink;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    fn click(w: &mut Window, transport: &MemoryTransport, base: &str, index: usize) {
        let cbid = transport
            .messages()
            .iter()
            .find_map(|m| match m {
                Message::AddCatalog(p) if p.id == base => Some(p.on_click.cbid.clone()),
                _ => None,
            })
            .unwrap();
        w.route(Message::Callback(CallbackInvocation {
            cbid,
            args: vec![json!(index)],
        }))
        .unwrap();
    }

    #[test]
    fn creates_base_and_marker() {
        let (mut w, _) = window();
        let pair = w
            .selectables()
            .new(NewCatalog::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]), None)
            .unwrap();
        let marker = w.catalog(&pair.marker).unwrap();
        assert_eq!(marker.name(), MARKER_NAME);
        assert_eq!(marker.color(), Rgba::DEFAULT_MARKER);
        assert!(marker.is_empty());
        assert_eq!(w.selection(&pair.base), Some(&[][..]));
    }

    #[test]
    fn clicks_toggle_selection_and_move_marker() {
        let (mut w, transport) = window();
        let pair = w
            .selectables()
            .new(NewCatalog::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]), None)
            .unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);
        w.selectables()
            .set_on_change(&pair.base, move |_: &mut Window, _: &[usize]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        click(&mut w, &transport, &pair.base, 2);
        click(&mut w, &transport, &pair.base, 0);
        assert_eq!(w.selection(&pair.base), Some(&[2, 0][..]));
        assert_eq!(w.catalog(&pair.marker).unwrap().ra(), &[3.0, 1.0]);

        click(&mut w, &transport, &pair.base, 2);
        assert_eq!(w.selection(&pair.base), Some(&[0][..]));
        assert_eq!(changes.load(Ordering::SeqCst), 3);

        assert_eq!(
            transport.messages().last().cloned(),
            Some(Message::UpdateCatalog(CatalogUpdate {
                id: pair.marker.clone(),
                ra: Some(vec![1.0]),
                dec: Some(vec![4.0]),
                columns: Some(vec![]),
                ..Default::default()
            }))
        );
    }

    #[test]
    fn out_of_range_click_alerts() {
        let (mut w, transport) = window();
        let pair = w
            .selectables()
            .new(NewCatalog::new(vec![1.0], vec![1.0]), None)
            .unwrap();
        click(&mut w, &transport, &pair.base, 5);
        assert_eq!(transport.kinds().last().map(String::as_str), Some("alert"));
        assert_eq!(w.selection(&pair.base), Some(&[][..]));
    }

    #[test]
    fn click_after_base_shrinks_drops_stale_indices() {
        let (mut w, transport) = window();
        let pair = w
            .selectables()
            .new(NewCatalog::new(vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]), None)
            .unwrap();
        click(&mut w, &transport, &pair.base, 2);
        w.catalogs()
            .set_coords(&pair.base, vec![7.0], vec![8.0], Vec::new())
            .unwrap();

        click(&mut w, &transport, &pair.base, 0);
        assert_eq!(w.selection(&pair.base), Some(&[0][..]));
        assert_eq!(w.catalog(&pair.marker).unwrap().ra(), &[7.0]);
        assert_eq!(w.catalog(&pair.marker).unwrap().dec(), &[8.0]);
        assert_ne!(transport.kinds().last().map(String::as_str), Some("alert"));
    }

    #[test]
    fn removing_base_removes_marker() {
        let (mut w, _) = window();
        let pair = w
            .selectables()
            .new(NewCatalog::new(vec![1.0], vec![1.0]), None)
            .unwrap();
        assert!(w.selectables().remove(&pair.base).unwrap());
        assert!(w.catalog(&pair.marker).is_none());
        assert!(w.selection(&pair.base).is_none());
        assert_eq!(w.catalogs().len(), 0);
    }
}
