use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::models::submission::ExamSubmission;
use crate::models::ChoiceLabel;
use crate::services::exam_service::{ExamResponse, ExamService, ExamServiceError};
use crate::services::navigation_service::FinalizeAck;
use crate::services::AppState;

#[derive(Debug, Deserialize)]
pub struct GoToRequest {
    pub index: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(equal = 1))]
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct SkipChoiceRequest {
    pub index: usize,
    #[serde(default)]
    pub ack: FinalizeAck,
}

#[derive(Debug, Default, Deserialize)]
pub struct EndRequest {
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    NotFound(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }
}

impl From<ExamServiceError> for ApiError {
    fn from(err: ExamServiceError) -> Self {
        match err {
            ExamServiceError::NoActiveSession => ApiError::NotFound(err.to_string()),
            ExamServiceError::Unavailable(_) => ApiError::NotFound(err.to_string()),
            ExamServiceError::ExamInProgress => ApiError::Conflict(err.to_string()),
            ExamServiceError::Policy(e) => ApiError::Conflict(e.notification().message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };
        (status, Json(message)).into_response()
    }
}

pub async fn get_exam(State(state): State<Arc<AppState>>) -> Result<Json<ExamResponse>, ApiError> {
    let response = ExamService::new(state).snapshot().await?;
    Ok(Json(response))
}

pub async fn start_exam(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExamResponse>, ApiError> {
    tracing::info!("Start exam requested");
    let response = ExamService::new(state).start().await?;
    Ok(Json(response))
}

pub async fn go_to_question(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GoToRequest>,
) -> Result<Json<ExamResponse>, ApiError> {
    tracing::debug!("Navigate to question {}", req.index);
    let response = ExamService::new(state).go_to(req.index).await?;
    Ok(Json(response))
}

pub async fn next_question(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExamResponse>, ApiError> {
    let response = ExamService::new(state).next().await?;
    Ok(Json(response))
}

pub async fn answer_question(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<ExamResponse>, ApiError> {
    req.validate()
        .map_err(|e| ApiError::bad_request(format!("Validation error: {}", e)))?;
    let label = ChoiceLabel::parse(&req.label)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid choice '{}'", req.label)))?;

    let response = ExamService::new(state).answer(label).await?;
    Ok(Json(response))
}

pub async fn toggle_skip(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExamResponse>, ApiError> {
    let response = ExamService::new(state).toggle_skip().await?;
    Ok(Json(response))
}

pub async fn finalize_block(
    State(state): State<Arc<AppState>>,
    Json(ack): Json<FinalizeAck>,
) -> Result<Json<ExamResponse>, ApiError> {
    tracing::info!("Finalize block requested: {:?}", ack);
    let response = ExamService::new(state).finalize_block(ack).await?;
    Ok(Json(response))
}

pub async fn choose_skip(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SkipChoiceRequest>,
) -> Result<Json<ExamResponse>, ApiError> {
    let response = ExamService::new(state)
        .choose_skip(req.index, req.ack)
        .await?;
    Ok(Json(response))
}

pub async fn cancel_skip_choice(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExamResponse>, ApiError> {
    let response = ExamService::new(state).cancel_skip_choice().await?;
    Ok(Json(response))
}

pub async fn end_exam(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EndRequest>,
) -> Result<Json<ExamResponse>, ApiError> {
    tracing::info!("End exam requested (confirmed={})", req.confirmed);
    let response = ExamService::new(state).end_exam(req.confirmed).await?;
    Ok(Json(response))
}

pub async fn get_result(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExamSubmission>, ApiError> {
    ExamService::new(state)
        .last_submission()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No submitted exam".to_string()))
}

pub async fn reload_exam(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ExamResponse>, ApiError> {
    tracing::info!("Reloading current simulado");
    let response = ExamService::new(state).reload().await?;
    Ok(Json(response))
}
