use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::WebSocketUpgrade,
        Extension, Path, Query,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parlor_core::{CreateMessageRequest, ListMessagesQuery, ListMessagesResponse, Message, UpdateMessageRequest};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    mutations, relay, AppState,
};

/// Handler per GET /messages: se la richiesta è un upgrade WebSocket apre una sessione relay,
/// altrimenti restituisce la pagina di messaggi (snapshot).
pub async fn messages_get(
    Extension(state): Extension<Arc<AppState>>,
    ws: Option<WebSocketUpgrade>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> Response {
    if let Some(ws) = ws {
        return ws_handler(state, ws);
    }
    list(state, query).await.into_response()
}

async fn list(
    state: Arc<AppState>,
    query: Result<Query<ListMessagesQuery>, QueryRejection>,
) -> AppResult<Json<ListMessagesResponse>> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let page = mutations::list(&state, query.offset, state.page_limit).await?;
    Ok(Json(page))
}

// Una sessione per client; il task è registrato nel tracker così lo shutdown può aspettarlo
fn ws_handler(state: Arc<AppState>, ws: WebSocketUpgrade) -> Response {
    let bus = state.bus.clone();
    let shutdown = state.shutdown.clone();
    let sessions = state.sessions.clone();
    ws.on_failed_upgrade(|e| tracing::warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| sessions.track_future(relay::serve(socket, bus, shutdown)))
}

/// Handler per GET /messages/{id}
pub async fn get_message(
    Extension(state): Extension<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Message>> {
    let Path(id) = id.map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(Json(mutations::get(&state, id).await?))
}

/// Handler per POST /messages
pub async fn create_message(
    Extension(state): Extension<Arc<AppState>>,
    req: Result<Json<CreateMessageRequest>, JsonRejection>,
) -> AppResult<Json<Message>> {
    let Json(req) = req.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let message = mutations::create(&state, req).await?;
    tracing::info!(message_id = %message.id, "message created");
    Ok(Json(message))
}

/// Handler per PATCH /messages/{id}
pub async fn update_message(
    Extension(state): Extension<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
    req: Result<Json<UpdateMessageRequest>, JsonRejection>,
) -> AppResult<Json<Message>> {
    let Path(id) = id.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let Json(req) = req.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let message = mutations::update(&state, id, req.body).await?;
    tracing::info!(message_id = %message.id, "message updated");
    Ok(Json(message))
}

/// Handler per DELETE /messages/{id}
pub async fn delete_message(
    Extension(state): Extension<Arc<AppState>>,
    id: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Message>> {
    let Path(id) = id.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let message = mutations::delete(&state, id).await?;
    tracing::info!(message_id = %message.id, "message deleted");
    Ok(Json(message))
}

/// Handler per GET /health
pub async fn health(Extension(state): Extension<Arc<AppState>>) -> StatusCode {
    crate::health(&state).await
}
