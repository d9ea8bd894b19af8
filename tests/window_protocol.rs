//! Protocol-level tests against the public library API: queueing order,
//! callback correlation, state merging, validation and restore.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mapwin::catalog::NewCatalog;
use mapwin::polygon::{sky_path, NewPolygon};
use mapwin::protocol::{CallbackInvocation, Message};
use mapwin::session::{Session, SessionRegistry};
use mapwin::sink::{MemorySink, Reported};
use mapwin::transport::MemoryTransport;
use mapwin::validate::{Rgba, ValidationError};
use mapwin::view::SelectionError;
use mapwin::window::{Window, WindowError, VIEW_KEY};
use bytes::Bytes;
use serde_json::{json, Value};

fn setup() -> (SessionRegistry, MemoryTransport, MemorySink) {
    let transport = MemoryTransport::new();
    let sink = MemorySink::new();
    let registry =
        SessionRegistry::new(Arc::new(transport.clone())).with_sink(Arc::new(sink.clone()));
    (registry, transport, sink)
}

fn invoke(session: &Session, cbid: &str, args: Vec<Value>) {
    session
        .route(Message::Callback(CallbackInvocation {
            cbid: cbid.to_string(),
            args,
        }))
        .unwrap();
}

fn sync(session: &Session, value: Value) {
    let Value::Object(map) = value else {
        panic!("sync payload must be an object")
    };
    session.route(Message::SyncFromFrontend(map)).unwrap();
}

#[test]
fn messages_sent_before_connect_arrive_in_order() {
    let (registry, transport, _) = setup();
    let session = registry.create_session("t").unwrap();

    session.set_title("one").unwrap();
    session.jump_to(10.0, 20.0, 1.0).unwrap();
    session.set_title("two").unwrap();
    assert!(transport.messages().is_empty());
    assert_eq!(session.info().pending, 4);

    assert_eq!(session.connect().unwrap(), 4);
    assert_eq!(
        transport.kinds(),
        vec!["set_title", "jump_to", "sync_from_kernel", "set_title"]
    );
    assert_eq!(session.info().pending, 0);
}

#[test]
fn one_shot_callback_runs_once() {
    let (registry, _, _) = setup();
    let session = registry.create_session("t").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cbid = session.with(|w| {
        w.register_callback(
            move |_: &mut Window, _: &[Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            false,
        )
    });

    invoke(&session, &cbid, vec![]);
    invoke(&session, &cbid, vec![]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn persistent_callback_runs_every_time_in_order() {
    let (registry, _, _) = setup();
    let session = registry.create_session("t").unwrap();
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let cbid = session.with(|w| {
        w.register_callback(
            move |_: &mut Window, args: &[Value]| {
                log.lock().push(args[0].clone());
                Ok(())
            },
            true,
        )
    });

    for i in 0..5 {
        invoke(&session, &cbid, vec![json!(i)]);
    }
    assert_eq!(*seen.lock(), (0..5).map(|i| json!(i)).collect::<Vec<_>>());
}

#[test]
fn failing_handler_is_contained_and_logged() {
    let (registry, transport, sink) = setup();
    let session = registry.create_session("t").unwrap();
    session.connect().unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let (bad, good) = session.with(|w| {
        let bad = w.register_callback(
            |_: &mut Window, _: &[Value]| anyhow::bail!("catalog query timed out"),
            true,
        );
        let good = w.register_callback(
            move |_: &mut Window, _: &[Value]| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            true,
        );
        (bad, good)
    });

    invoke(&session, &bad, vec![json!("q-17")]);
    invoke(&session, &good, vec![]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(session.is_open());

    let failure = session.with(|w| {
        w.callback_table()
            .log()
            .iter()
            .find(|e| e.error.is_some())
            .cloned()
            .unwrap()
    });
    assert_eq!(failure.cbid, bad);
    assert_eq!(failure.args, vec![json!("q-17")]);
    assert!(failure.error.unwrap().contains("catalog query timed out"));

    assert!(matches!(
        sink.reports().as_slice(),
        [Reported::Callback { failure, .. }] if failure.cbid == bad
    ));
    assert_eq!(transport.kinds(), vec!["alert"]);
}

#[test]
fn frontend_sync_merges_keys() {
    let (registry, _, _) = setup();
    let session = registry.create_session("t").unwrap();

    sync(&session, json!({"a": 1}));
    sync(&session, json!({"b": 2}));
    assert_eq!(Value::Object(session.info().sync), json!({"a": 1, "b": 2}));
    sync(&session, json!({"a": 3}));
    assert_eq!(Value::Object(session.info().sync), json!({"a": 3, "b": 2}));
}

#[test]
fn invalid_catalogs_are_rejected_without_side_effects() {
    let (registry, transport, _) = setup();
    let session = registry.create_session("t").unwrap();
    session.connect().unwrap();

    let err = session
        .with(|w| w.catalogs().new(NewCatalog::new(vec![1.0, 2.0], vec![1.0])))
        .unwrap_err();
    assert!(matches!(
        err,
        WindowError::Validation(ValidationError::LengthMismatch { .. })
    ));

    let err = session
        .with(|w| w.catalogs().new(NewCatalog::new(vec![f64::NAN], vec![1.0])))
        .unwrap_err();
    assert!(matches!(
        err,
        WindowError::Validation(ValidationError::NonFinite { field: "ra", index: 0 })
    ));

    assert_eq!(session.info().catalogs, 0);
    assert!(transport.messages().is_empty());
}

#[test]
fn reconnect_restores_only_live_entities() {
    let (registry, transport, _) = setup();
    let session = registry.create_session("t").unwrap();
    session.connect().unwrap();

    let (kept_catalog, kept_raster, kept_polygon) = session.with(|w| {
        let kept = w
            .catalogs()
            .new(NewCatalog::new(vec![1.0], vec![2.0]).color(Rgba::DEFAULT_MARKER))
            .unwrap();
        let dropped = w.catalogs().new(NewCatalog::new(vec![3.0], vec![4.0])).unwrap();
        w.catalogs().set_name(&kept, "renamed").unwrap();
        w.catalogs().remove(&dropped).unwrap();

        let raster = w
            .rasters()
            .new(Bytes::from_static(b"SIMPLE  ="), Some("deep".into()))
            .unwrap();
        let dropped_raster = w.rasters().new(Bytes::from_static(b"x"), None).unwrap();
        w.rasters().remove(&dropped_raster).unwrap();

        let path = sky_path(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], Rgba::DEFAULT_MARKER).unwrap();
        let polygon = w.polygons().new(NewPolygon::new(vec![path])).unwrap();
        (kept, raster, polygon)
    });

    session.disconnect();
    transport.clear();
    session.connect().unwrap();

    let messages = transport.messages();
    assert_eq!(messages.len(), 3);
    let mut restored = HashSet::new();
    for message in messages {
        match message {
            Message::AddCatalog(p) => {
                assert_eq!(p.id, kept_catalog);
                assert_eq!(p.name, "renamed");
                assert_eq!(p.color, Rgba::DEFAULT_MARKER);
                restored.insert("catalog");
            }
            Message::AddRaster(p) => {
                assert_eq!(p.id, kept_raster);
                assert_eq!(p.name, "deep");
                restored.insert("raster");
            }
            Message::AddPolygon(p) => {
                assert_eq!(p.id, kept_polygon);
                restored.insert("polygon");
            }
            other => panic!("unexpected restore message {other:?}"),
        }
    }
    assert_eq!(restored.len(), 3);
}

#[test]
fn jump_to_stores_view_and_broadcasts_it() {
    let (registry, transport, _) = setup();
    let session = registry.create_session("t").unwrap();
    session.connect().unwrap();
    session.jump_to(150.0, 2.0, 1.0).unwrap();

    let view = json!({
        "a": 150f64.to_radians(),
        "d": 2f64.to_radians(),
        "fovy": 1f64.to_radians(),
    });
    assert_eq!(session.info().sync.get(VIEW_KEY), Some(&view));

    let messages = transport.messages();
    assert_eq!(messages[0].kind(), "jump_to");
    assert_eq!(messages[1], Message::sync_from_kernel(VIEW_KEY, view));
}

#[test]
fn rect_selection_predicate_needs_a_selection() {
    let (registry, _, _) = setup();
    let session = registry.create_session("t").unwrap();

    let err = session
        .with(|w| w.rect_selection().to_search_predicate())
        .unwrap_err();
    assert_eq!(err, SelectionError::Empty);
    assert_eq!(err.to_string(), "no rectangular selection");

    sync(
        &session,
        json!({"rectSelection": [{"a": 0.0, "d": 0.0}, {"a": std::f64::consts::FRAC_PI_2, "d": 0.0}]}),
    );
    assert_eq!(
        session.with(|w| w.rect_selection().to_search_predicate()),
        Ok("boxSearch(coord, 0, 90, 0, 0)".to_string())
    );
}

#[test]
fn closed_session_rejects_operations() {
    let (registry, _, _) = setup();
    let session = registry.create_session("t").unwrap();
    registry.close_session(session.id()).unwrap();

    assert!(matches!(session.set_title("x"), Err(WindowError::Closed(_))));
    assert!(matches!(session.jump_to(0.0, 0.0, 1.0), Err(WindowError::Closed(_))));
    assert!(matches!(session.connect(), Err(WindowError::Closed(_))));
    assert!(matches!(
        session.with(|w| w.catalogs().new(NewCatalog::new(vec![], vec![]))),
        Err(WindowError::Closed(_))
    ));
}
