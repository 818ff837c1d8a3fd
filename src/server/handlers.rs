use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::models::{GenerateRequest, GenerationOutcome, Job};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenProfileRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileResponse {
    pub id: String,
    pub credits: u32,
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mode = if state.orchestrator.is_demo_mode() {
        "demo"
    } else {
        "live"
    };
    Json(serde_json::json!({ "status": "ok", "mode": mode }))
}

/// `POST /api/generate`
///
/// Runs the orchestration on its own task so a client disconnect cannot
/// abandon a dispatched job.
pub async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Json<GenerationOutcome>> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let orchestrator = Arc::clone(&state.orchestrator);
    let task = tokio::spawn(async move { orchestrator.generate(request).await });

    let outcome = task.await.map_err(|e| {
        error!("Generation task aborted: {}", e);
        ApiError::internal(format!("Generation task aborted: {}", e))
    })??;

    Ok(Json(outcome))
}

/// `GET /api/generate?id=<uuid>`
pub async fn generation_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<Job>> {
    let raw_id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Generation ID required"))?;
    let job_id = Uuid::parse_str(raw_id.trim())
        .map_err(|_| ApiError::bad_request(format!("Invalid generation ID '{}'", raw_id)))?;

    Ok(Json(state.status.get(job_id).await?))
}

/// `GET /api/generations?userId=<id>`
pub async fn list_generations(
    State(state): State<AppState>,
    Query(query): Query<GenerationsQuery>,
) -> ApiResult<Json<Vec<Job>>> {
    let user_id = query
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("User ID required"))?;

    Ok(Json(state.status.list_for_user(&user_id).await?))
}

/// `POST /api/profiles`
pub async fn open_profile(
    State(state): State<AppState>,
    payload: Result<Json<OpenProfileRequest>, JsonRejection>,
) -> ApiResult<Json<ProfileResponse>> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let user_id = request.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("User ID required"));
    }

    let credits = state
        .ledger
        .open_account(&user_id, state.starting_credits)
        .await?;
    info!("Profile {} has {} credits", user_id, credits);

    Ok(Json(ProfileResponse {
        id: user_id,
        credits,
    }))
}

/// `GET /api/profiles/{id}`
pub async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<ProfileResponse>> {
    let credits = state.ledger.balance(&user_id).await?;
    Ok(Json(ProfileResponse {
        id: user_id,
        credits,
    }))
}
