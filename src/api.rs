use std::{future::Future, sync::Arc};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{ApiCredentials, verify_authorization},
    clients::{device::DeviceDirectory, health::HealthChecker, redis::NotificationHistory},
    config::ChannelQueues,
    dispatch::QueuePublisher,
    error::AppError,
    models::{
        channel::Channel,
        health::HealthStatus,
        message::{NotificationMessage, QueuedNotification},
        response::{
            ApiResponse, CallbackRequest, CallbackResponse, SendNotificationResponse,
        },
        validation::{FieldError, validate_notification},
    },
};

pub const SEND_PATH: &str = "/notification/send";
pub const CALLBACK_PATH: &str = "/callback";

pub struct AppState {
    pub credentials: ApiCredentials,
    pub publisher: Arc<dyn QueuePublisher>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub history: Arc<dyn NotificationHistory>,
    pub queues: ChannelQueues,
    pub history_limit: usize,
    pub health_checker: HealthChecker,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route(SEND_PATH, post(send_notification))
        .route(CALLBACK_PATH, post(callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Ingestion API started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn root() -> impl IntoResponse {
    Json(ApiResponse::success(
        (),
        "Notification dispatcher is running".to_string(),
    ))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    path: &str,
    body: &[u8],
) -> Result<(), AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if verify_authorization(&state.credentials, header, "POST", path, body) {
        Ok(())
    } else {
        Err(AppError::Authentication)
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(body).map_err(|e| AppError::invalid_payload("body", e.to_string()))
}

/// `type` is checked before typed decoding so an unknown value is reported
/// against its field instead of as a generic body error.
fn parse_notification(body: &[u8]) -> Result<NotificationMessage, AppError> {
    let value: serde_json::Value = parse_body(body)?;

    if let Some(kind) = value.get("type").filter(|kind| !kind.is_null()) {
        if !matches!(kind.as_str(), Some("otp") | Some("alert")) {
            return Err(AppError::invalid_payload("type", "must be one of otp, alert"));
        }
    }

    serde_json::from_value(value).map_err(|e| AppError::invalid_payload("body", e.to_string()))
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SendNotificationResponse>, AppError> {
    authenticate(&state, &headers, SEND_PATH, &body)?;

    let notification = parse_notification(&body)?;
    validate_notification(&notification).map_err(AppError::Validation)?;

    let msg_id = Uuid::new_v4().to_string();

    let device = state
        .directory
        .find_device(&notification.merchant_id, &notification.terminal_id)
        .await
        .map_err(|e| AppError::Lookup(e.to_string()))?;

    let Some(device) = device else {
        warn!(
            merchant_id = %notification.merchant_id,
            terminal_id = %notification.terminal_id,
            msg_id = %msg_id,
            "No device registered for terminal, nothing to dispatch"
        );
        return Ok(Json(SendNotificationResponse::accepted(
            notification.mobile_number,
            msg_id,
            Vec::new(),
        )));
    };

    let targets: Vec<Channel> = device
        .enabled_channels()
        .into_iter()
        .filter(|channel| *channel != Channel::Email || notification.email().is_some())
        .collect();

    let queued = QueuedNotification::new(notification, Some(device.machine_identifier));
    let payload = serde_json::to_vec(&queued).map_err(|e| AppError::Internal(e.to_string()))?;

    let mut published = Vec::with_capacity(targets.len());
    let mut last_error = None;

    for channel in &targets {
        let queue = state.queues.name(*channel);
        match state.publisher.publish(queue, &payload, &msg_id).await {
            Ok(()) => published.push(*channel),
            Err(e) => {
                warn!(channel = %channel, queue, msg_id = %msg_id, error = %e, "Publish failed");
                last_error = Some(e);
            }
        }
    }

    let notification = queued.notification;

    if let Some(e) = last_error {
        if published.is_empty() {
            return Err(AppError::Publish(e.to_string()));
        }
        warn!(
            msg_id = %msg_id,
            published = ?published,
            requested = ?targets,
            "Partial fan-out, some channels were not published"
        );
    }

    if let Err(e) = state
        .history
        .record(&notification, state.history_limit)
        .await
    {
        warn!(msg_id = %msg_id, error = %e, "Failed to record notification history");
    }

    info!(
        msg_id = %msg_id,
        merchant_id = %notification.merchant_id,
        terminal_id = %notification.terminal_id,
        channels = ?published,
        "Notification accepted"
    );

    Ok(Json(SendNotificationResponse::accepted(
        notification.mobile_number,
        msg_id,
        published,
    )))
}

async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResponse>, AppError> {
    authenticate(&state, &headers, CALLBACK_PATH, &body)?;

    let request: CallbackRequest = parse_body(&body)?;

    let mut errors = Vec::new();
    if request.merchant_id.trim().is_empty() {
        errors.push(FieldError::new("merchantId", "must not be empty"));
    }
    if request.terminal_id.trim().is_empty() {
        errors.push(FieldError::new("terminalId", "must not be empty"));
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let details = state
        .history
        .recent(&request.merchant_id, &request.terminal_id, state.history_limit)
        .await
        .map_err(|e| AppError::Lookup(e.to_string()))?;

    Ok(Json(CallbackResponse {
        transaction_notification_details: details,
    }))
}
