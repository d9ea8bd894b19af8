use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::callback::Invocation;
use crate::catalog::NewCatalog;
use crate::polygon::{NewPolygon, DEFAULT_MIN_WIDTH};
use crate::protocol::{Column, EntityId, Message, Path as PolygonPath};
use crate::session::Session;
use crate::validate::Rgba;
use crate::window::WindowInfo;

use super::{error::ApiError, AppState};

/// Parse an optional JSON body; an empty body yields the default.
fn json_or_default<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::InvalidRequest(e.to_string()))
}

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    windows: usize,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        windows: state.registry.len(),
    })
}

#[derive(Deserialize, Default)]
pub(super) struct NewWindowRequest {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Serialize)]
pub(super) struct WindowCreated {
    id: String,
}

pub(super) async fn window_new(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<WindowCreated>), ApiError> {
    let req: NewWindowRequest = json_or_default(&body)?;
    let title = req
        .title
        .unwrap_or_else(|| state.config.default_title.clone());
    let session = state.registry.create_session(title)?;
    Ok((
        StatusCode::CREATED,
        Json(WindowCreated {
            id: session.id().to_string(),
        }),
    ))
}

pub(super) async fn window_list(State(state): State<AppState>) -> Json<Vec<WindowInfo>> {
    let infos = state
        .registry
        .list()
        .into_iter()
        .filter_map(|id| state.registry.get(&id).ok())
        .map(|s| s.info())
        .collect();
    Json(infos)
}

pub(super) async fn window_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WindowInfo>, ApiError> {
    let session = state.registry.get(&id)?;
    Ok(Json(session.info()))
}

pub(super) async fn window_close(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.close_session(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct JumpToRequest {
    ra: f64,
    dec: f64,
    fov: f64,
}

pub(super) async fn window_jump_to(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JumpToRequest>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get(&id)?;
    session.jump_to(req.ra, req.dec, req.fov)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub(super) struct TitleRequest {
    title: String,
}

pub(super) async fn window_title(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TitleRequest>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get(&id)?;
    session.set_title(req.title)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub(super) struct EntityCreated {
    id: EntityId,
}

fn created(id: EntityId) -> (StatusCode, Json<EntityCreated>) {
    (StatusCode::CREATED, Json(EntityCreated { id }))
}

#[derive(Deserialize)]
pub(super) struct NewCatalogRequest {
    ra: Vec<f64>,
    dec: Vec<f64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    color: Option<Vec<f64>>,
}

pub(super) async fn catalog_new(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewCatalogRequest>,
) -> Result<(StatusCode, Json<EntityCreated>), ApiError> {
    let session = state.registry.get(&id)?;
    let mut spec = NewCatalog::new(req.ra, req.dec);
    spec.name = req.name;
    spec.columns = req.columns;
    if let Some(color) = req.color {
        spec.color = Some(Rgba::try_from(color).map_err(|e| ApiError::InvalidArgument(e.to_string()))?);
    }
    let cid = session.with(|w| w.catalogs().new(spec))?;
    Ok(created(cid))
}

pub(super) async fn catalog_delete(
    State(state): State<AppState>,
    Path((id, cid)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get(&id)?;
    if session.with(|w| w.catalogs().remove(&cid))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::EntityNotFound { kind: "catalog", id: cid })
    }
}

#[derive(Deserialize)]
pub(super) struct RasterQuery {
    #[serde(default)]
    name: Option<String>,
}

/// The body is the raw image file; decoding happens on the frontend.
pub(super) async fn fits_new(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RasterQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<EntityCreated>), ApiError> {
    let session = state.registry.get(&id)?;
    let rid = session.with(|w| w.rasters().new(body, query.name))?;
    Ok(created(rid))
}

pub(super) async fn fits_delete(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get(&id)?;
    if session.with(|w| w.rasters().remove(&rid))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::EntityNotFound { kind: "raster", id: rid })
    }
}

#[derive(Deserialize)]
pub(super) struct NewPolygonRequest {
    paths: Vec<PolygonPath>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    min_width: Option<f64>,
}

pub(super) async fn polygon_new(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<NewPolygonRequest>,
) -> Result<(StatusCode, Json<EntityCreated>), ApiError> {
    let session = state.registry.get(&id)?;
    let mut spec = NewPolygon::new(req.paths);
    spec.name = req.name;
    spec.min_width = req.min_width.unwrap_or(DEFAULT_MIN_WIDTH);
    let pid = session.with(|w| w.polygons().new(spec))?;
    Ok(created(pid))
}

pub(super) async fn polygon_delete(
    State(state): State<AppState>,
    Path((id, pid)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get(&id)?;
    if session.with(|w| w.polygons().remove(&pid))? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::EntityNotFound { kind: "polygon", id: pid })
    }
}

#[derive(Serialize)]
pub(super) struct CallbackResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Invoke a callback by id. The body is the JSON argument array; an empty
/// body means no arguments.
pub(super) async fn callback_invoke(
    State(state): State<AppState>,
    Path((id, cbid)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<CallbackResponse>, ApiError> {
    let session = state.registry.get(&id)?;
    let args: Vec<Value> = json_or_default(&body)?;
    let outcome = session.with(|w| {
        w.ensure_open()?;
        Ok::<_, ApiError>(w.invoke_callback(&cbid, args))
    })?;
    let response = match outcome {
        Invocation::Unknown => CallbackResponse {
            outcome: "unknown",
            error: None,
        },
        Invocation::Completed => CallbackResponse {
            outcome: "completed",
            error: None,
        },
        Invocation::Failed(failure) => CallbackResponse {
            outcome: "failed",
            error: Some(failure.error),
        },
    };
    Ok(Json(response))
}

/// Accept one frontend message over plain HTTP, for frontends without a
/// socket.
pub(super) async fn window_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(message): Json<Message>,
) -> Result<StatusCode, ApiError> {
    let session = state.registry.get(&id)?;
    session.route(message)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub(super) struct PredicatesResponse {
    cone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rect: Option<String>,
}

pub(super) async fn window_predicates(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PredicatesResponse>, ApiError> {
    let session = state.registry.get(&id)?;
    let response = session.with(|w| PredicatesResponse {
        cone: w.field_of_view().to_cone_search_predicate(),
        rect: w.rect_selection().to_search_predicate().ok(),
    });
    Ok(Json(response))
}

pub(super) async fn window_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.registry.get(&id)?;
    Ok(ws.on_upgrade(move |socket| handle_window_ws(socket, state, session)))
}

/// Drive one frontend connection: attach it to the hub, connect the window
/// (flushing or restoring), then pump outbound messages into the socket and
/// route inbound frames until either side goes away.
async fn handle_window_ws(socket: WebSocket, state: AppState, session: Session) {
    let id = session.id().to_string();
    let mut attachment = state.hub.attach(&id);
    match session.connect() {
        Ok(delivered) => tracing::info!(session = %id, delivered, "frontend connected"),
        Err(e) => {
            tracing::warn!(session = %id, error = %e, "frontend connect failed");
            state.hub.detach(&id, &attachment);
            return;
        }
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    loop {
        tokio::select! {
            outbound = attachment.rx.recv() => {
                let Some(message) = outbound else {
                    // Replaced by a newer connection.
                    break;
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(session = %id, kind = message.kind(), error = %e, "failed to encode message");
                        continue;
                    }
                };
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
                if matches!(message, Message::Close) {
                    let _ = ws_tx.close().await;
                    break;
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<Message>(text.as_str()) {
                            Ok(message) => {
                                if let Err(e) = session.route(message) {
                                    tracing::debug!(session = %id, error = %e, "inbound message rejected");
                                }
                            }
                            Err(e) => {
                                tracing::warn!(session = %id, error = %e, "inbound frame is not a message envelope");
                            }
                        }
                        if !session.is_open() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    if state.hub.detach(&id, &attachment) {
        session.disconnect();
        tracing::info!(session = %id, "frontend detached");
    }
}
