//! mapwin - backend sessions for a remote sky-map frontend.
//!
//! A [`window::Window`] mirrors catalogs, raster overlays and polygons onto
//! one frontend over an ordered, reconnect-safe [`channel::Channel`], and
//! lets the frontend call back into the backend by callback id.

pub mod api;
pub mod audit;
pub mod callback;
pub mod catalog;
pub mod channel;
pub mod config;
pub mod entity;
pub mod hook;
pub mod polygon;
pub mod protocol;
pub mod raster;
pub mod selection;
pub mod session;
pub mod sink;
pub mod snapshot;
pub mod transport;
pub mod validate;
pub mod view;
pub mod window;
