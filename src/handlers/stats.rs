use axum::{extract::State, Json};

use crate::error::ApiResponse;
use crate::models::FileRecord;
use crate::services::StatsService;
use crate::AppState;

/// Usage statistics for every stored file
/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<ApiResponse<Vec<FileRecord>>> {
    let records = StatsService::report(&state.table).await;
    Json(ApiResponse::success(records))
}
