use crate::config::ApiConfig;
use crate::db::DatabaseService;
use crate::error::Error;
use crate::services::{ChatRelay, EventGateway, FrameBuffer, StreamPublisher};
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

mod chat_controller;
mod event_controller;
mod stream_controller;
#[cfg(test)]
mod tests;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseService>,
    pub gateway: EventGateway,
    pub frames: FrameBuffer,
    pub publisher: StreamPublisher,
    pub chat: ChatRelay,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = match err {
            Error::Validation(_) | Error::Decode(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::AlertDelivery(_) | Error::ChatProvider(_) => StatusCode::BAD_GATEWAY,
            Error::Database(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        ApiError {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return (*err).clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        // body limit hits surface as a buffering failure inside the rejection
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError {
                message: rejection.body_text(),
                status: StatusCode::PAYLOAD_TOO_LARGE.as_u16(),
            };
        }
        Error::Validation(rejection.body_text()).into()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Error::Validation(rejection.body_text()).into()
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed ({}): {}", status, self.message);
        }
        let body = Json(self);
        (status, body).into_response()
    }
}

/// Routes served by the relay, CORS open to any origin
pub fn router(state: AppState, config: &ApiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/event", post(event_controller::receive_event))
        .route("/events/recent", get(event_controller::recent_events))
        .route(
            "/frame",
            post(event_controller::receive_frame)
                .layer(DefaultBodyLimit::max(config.max_frame_bytes)),
        )
        .route("/frame/latest", get(stream_controller::latest_frame))
        .route("/video", get(stream_controller::video_feed))
        .route("/chat", post(chat_controller::chat))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Self {
        Self {
            config: config.clone(),
            state,
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = router(self.state, &self.config);

        // Build the server address
        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        let listener = TcpListener::bind(addr).await?;
        info!("API server listening on {}", addr);

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = state.db.health_check().await;
    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "has_frame": state.frames.current().is_some(),
        "viewers": state.frames.viewer_count(),
    }))
}
