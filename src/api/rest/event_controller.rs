use crate::api::rest::{ApiResult, AppState};
use crate::db::models::Event;
use crate::services::{EventPayload, FramePayload};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub status: &'static str,
    pub event_id: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecentEventsResponse {
    pub events: Vec<Event>,
}

/// POST /event
pub async fn receive_event(
    State(state): State<AppState>,
    payload: Result<Json<EventPayload>, JsonRejection>,
) -> ApiResult<Json<EventResponse>> {
    let Json(payload) = payload?;
    let event_id = state.gateway.ingest_event(payload).await?;

    Ok(Json(EventResponse {
        status: "ok",
        event_id,
    }))
}

/// POST /frame
pub async fn receive_frame(
    State(state): State<AppState>,
    payload: Result<Json<FramePayload>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(payload) = payload?;
    state.gateway.ingest_frame(payload).await?;

    Ok(Json(StatusResponse { status: "ok" }))
}

/// GET /events/recent?limit=N
pub async fn recent_events(
    State(state): State<AppState>,
    params: Result<Query<RecentParams>, QueryRejection>,
) -> ApiResult<Json<RecentEventsResponse>> {
    let Query(params) = params?;
    let events = state.gateway.list_recent(params.limit).await?;

    Ok(Json(RecentEventsResponse { events }))
}
