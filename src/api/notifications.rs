//! Push notification routes: subscriptions, queue, dispatch, update checks.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::error::{AppError, AppResult};
use crate::api::state::AppState;
use crate::dispatch::{self, BroadcastReport, DispatchReport};
use crate::model::{NewQueueEntry, PushMessage};
use crate::tracker::{self, CheckReport};
use crate::{db, push, queue};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/notifications/subscriptions",
            post(subscribe).get(list_subscriptions),
        )
        .route("/api/notifications/queue", post(enqueue))
        .route("/api/notifications/pending", get(pending))
        .route("/api/notifications/dispatch", post(dispatch_due))
        .route("/api/notifications/send", post(send_now))
        .route("/api/notifications/check-updates", post(check_updates))
}

/// Successful responses carry `success: true` next to the payload fields.
#[derive(Debug, Serialize)]
struct Success<T> {
    success: bool,
    #[serde(flatten)]
    data: T,
}

fn success<T>(data: T) -> Json<Success<T>> {
    Json(Success {
        success: true,
        data,
    })
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| AppError::Validation(rejection.body_text()))
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    subscription: Value,
}

#[derive(Debug, Serialize)]
struct Subscribed {
    subscription_id: i64,
}

/// POST /api/notifications/subscriptions
async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> AppResult<Json<Success<Subscribed>>> {
    let request = body(payload)?;
    let raw = serde_json::to_string(&request.subscription)
        .map_err(|err| AppError::Validation(err.to_string()))?;
    push::parse_subscription(&raw).map_err(|err| AppError::Validation(format!("{:#}", err)))?;

    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let subscription_id = db::insert_subscription(&state.pool, &raw, user_agent).await?;
    Ok(success(Subscribed { subscription_id }))
}

#[derive(Debug, Serialize)]
struct SubscriptionView {
    id: i64,
    subscription: Value,
}

/// GET /api/notifications/subscriptions: active subscriptions only.
async fn list_subscriptions(State(state): State<AppState>) -> AppResult<Json<Vec<SubscriptionView>>> {
    let subscriptions = db::list_active_subscriptions(&state.pool).await?;
    let views = subscriptions
        .into_iter()
        .map(|s| SubscriptionView {
            id: s.id,
            subscription: serde_json::from_str(&s.payload).unwrap_or(Value::String(s.payload)),
        })
        .collect();
    Ok(Json(views))
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Queued {
    queue_id: i64,
    scheduled_at: DateTime<FixedOffset>,
}

/// POST /api/notifications/queue
async fn enqueue(
    State(state): State<AppState>,
    payload: Result<Json<NewQueueEntry>, JsonRejection>,
) -> AppResult<Json<Success<Queued>>> {
    let entry = body(payload)?.normalized();
    let icon = state.config.push.icon.as_deref();
    queue::validate(&entry, icon)?;

    let enqueued = queue::enqueue(&state.pool, &state.slot_policy(), &entry, icon, Utc::now()).await?;
    Ok(success(Queued {
        queue_id: enqueued.queue_id,
        scheduled_at: enqueued.scheduled_at,
    }))
}

#[derive(Debug, Serialize)]
struct PendingView {
    id: i64,
    content_type: String,
    title: String,
    body: String,
    url: String,
    scheduled_at: DateTime<FixedOffset>,
}

/// GET /api/notifications/pending: due entries, oldest first.
async fn pending(State(state): State<AppState>) -> AppResult<Json<Vec<PendingView>>> {
    let offset = state.slot_policy().offset;
    let limit = i64::from(state.config.dispatch.batch_size);
    let entries = queue::pending(&state.pool, Utc::now(), limit).await?;
    let views = entries
        .into_iter()
        .map(|e| PendingView {
            id: e.id,
            content_type: e.content_type,
            title: e.title,
            body: e.body,
            url: e.url,
            scheduled_at: e.scheduled_at.with_timezone(&offset),
        })
        .collect();
    Ok(Json(views))
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// POST /api/notifications/dispatch: one dispatcher run.
async fn dispatch_due(State(state): State<AppState>) -> AppResult<Json<Success<DispatchReport>>> {
    let push = state.push()?;
    let report = dispatch::run(&state.pool, push.as_ref(), &state.dispatch_options(), Utc::now()).await?;
    Ok(success(report))
}

#[derive(Debug, Default, Deserialize)]
struct SendRequest {
    title: Option<String>,
    body: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct Sent {
    sent: u32,
    failed: u32,
}

/// POST /api/notifications/send: immediate broadcast, bypassing the queue.
async fn send_now(
    State(state): State<AppState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> AppResult<Json<Success<Sent>>> {
    let request = body(payload)?;
    let push = state.push()?;

    let message = PushMessage::new(
        request.title.unwrap_or_else(|| "Новое событие".to_string()),
        request.body.unwrap_or_default(),
        request.url.unwrap_or_else(|| "/".to_string()),
    )
    .with_icon(state.config.push.icon.clone());

    let size = push::payload_size(&message);
    if size > push::MAX_PAYLOAD_BYTES {
        return Err(AppError::Validation(format!(
            "notification payload is {} bytes; at most {} fit in a push message",
            size,
            push::MAX_PAYLOAD_BYTES
        )));
    }

    let BroadcastReport { sent, failed, .. } =
        dispatch::broadcast(&state.pool, push.as_ref(), &message).await?;
    Ok(success(Sent { sent, failed }))
}

/// POST /api/notifications/check-updates: one delta tracker run.
async fn check_updates(State(state): State<AppState>) -> AppResult<Json<Success<CheckReport>>> {
    let push = state.push()?;
    let report = tracker::check_updates(&state.pool, push.as_ref(), Utc::now()).await?;
    Ok(success(report))
}
