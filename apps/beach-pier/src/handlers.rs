use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::registry::RoomSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_rooms: usize,
    pub active_connections: usize,
    pub rooms: Vec<RoomSnapshot>,
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let rooms = state.registry.snapshot();
    Json(StatsResponse {
        active_rooms: rooms.len(),
        active_connections: rooms.iter().map(|room| room.occupants.len()).sum(),
        rooms,
    })
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
