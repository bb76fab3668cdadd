//! Route for a member's tree growth and milestone progress.

use axum::{
    Router,
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
};
use db::models::member::Member;
use services::services::tree_growth::{
    TreeMilestoneInfo, UserActivity, calculate_tree_height, tree_milestone_info,
};

use crate::{AppState, error::ApiError, response::ApiResponse};

/// Recomputed from the member's activity on every request; heights are not
/// cached, so two reads may differ within the randomization band.
pub async fn get_tree_progress(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> Result<ResponseJson<ApiResponse<TreeMilestoneInfo>>, ApiError> {
    let member = Member::find_by_phone(&state.db.pool, &phone)
        .await?
        .ok_or(ApiError::MemberNotFound(phone))?;

    let activity = UserActivity::from(&member);
    activity.validate()?;

    let height = calculate_tree_height(&activity);
    Ok(ResponseJson(ApiResponse::success(tree_milestone_info(
        height,
    ))))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/members/{phone}/tree", get(get_tree_progress))
}
