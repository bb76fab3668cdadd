//! Routes for notification rules and the event notification job.

use axum::{
    Router,
    extract::{Query, State},
    response::Json as ResponseJson,
    routing::{get, post},
};
use chrono::{NaiveDate, Utc};
use db::models::notification_rule::{CreateNotificationRule, NotificationRule};
use serde::Deserialize;
use services::services::event_notifications::{
    EventNotificationRunSummary, EventNotificationService,
};
use ts_rs::TS;

use crate::{AppState, error::ApiError, response::ApiResponse};

#[derive(Debug, Deserialize, TS)]
pub struct RunJobParams {
    /// Run as if today were this date; defaults to the current date
    pub date: Option<NaiveDate>,
}

pub async fn list_rules(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<NotificationRule>>>, ApiError> {
    let rules = NotificationRule::find_all(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(rules)))
}

pub async fn create_rule(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CreateNotificationRule>,
) -> Result<ResponseJson<ApiResponse<NotificationRule>>, ApiError> {
    let rule = NotificationRule::create(&state.db.pool, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(rule)))
}

/// Manually trigger the event notification job. The scheduler runs the same
/// job nightly; this exists for admins and for exercising a specific date.
pub async fn run_event_notifications(
    State(state): State<AppState>,
    Query(params): Query<RunJobParams>,
) -> Result<ResponseJson<ApiResponse<EventNotificationRunSummary>>, ApiError> {
    let today = params.date.unwrap_or_else(|| Utc::now().date_naive());

    let service = EventNotificationService::new(
        state.db.clone(),
        state.writer.clone(),
        state.dispatcher.clone(),
        state.graph.clone(),
    );
    let summary = service.run_once(today).await?;

    Ok(ResponseJson(ApiResponse::success(summary)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notification-rules", get(list_rules).post(create_rule))
        .route("/notifications/run", post(run_event_notifications))
}
