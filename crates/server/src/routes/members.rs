//! Routes for the member directory.

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::member::{CreateMember, Member};

use crate::{AppState, error::ApiError, response::ApiResponse};

pub async fn list_members(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Member>>>, ApiError> {
    let members = Member::find_all(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(members)))
}

pub async fn create_member(
    State(state): State<AppState>,
    axum::Json(payload): axum::Json<CreateMember>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = Member::create(&state.db.pool, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub async fn get_member(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<ResponseJson<ApiResponse<Member>>, ApiError> {
    let member = Member::find_by_phone(&state.db.pool, &phone)
        .await?
        .ok_or(ApiError::MemberNotFound(phone))?;
    Ok(ResponseJson(ApiResponse::success(member)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/members", get(list_members).post(create_member))
        .route("/members/{phone}", get(get_member))
}
