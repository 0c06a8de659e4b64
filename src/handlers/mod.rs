mod ws;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::PollError;
use crate::models::PollView;
use crate::service::PollService;

pub fn router(service: Arc<PollService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/polls", get(list_polls).post(create_poll))
        .route("/api/polls/:id", get(get_poll))
        .route("/api/polls/:id/vote", post(cast_vote))
        .route("/api/polls/:id/voted", get(has_voted))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl IntoResponse for PollError {
    fn into_response(self) -> Response {
        let status = match &self {
            PollError::Validation(_) | PollError::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            PollError::NotFound(_) => StatusCode::NOT_FOUND,
            PollError::DuplicateVote(_) => StatusCode::CONFLICT,
            PollError::Storage(_) | PollError::Interrupted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            PollError::DuplicateVote(_) => "You have already voted on this poll".to_string(),
            PollError::Storage(_) | PollError::Interrupted(_) => {
                "Poll storage is unavailable".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub option_index: i64,
    #[serde(default)]
    pub voter_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotedQuery {
    pub voter_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotedResponse {
    pub poll_id: String,
    pub has_voted: bool,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_polls(
    State(service): State<Arc<PollService>>,
) -> Result<Json<Vec<PollView>>, PollError> {
    let polls = service.list_polls().await?;
    info!("Listing {} polls", polls.len());
    Ok(Json(polls.iter().map(PollView::from).collect()))
}

async fn get_poll(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
) -> Result<Json<PollView>, PollError> {
    let poll = service.get_poll(&poll_id).await?;
    Ok(Json(poll.view()))
}

async fn create_poll(
    State(service): State<Arc<PollService>>,
    Json(request): Json<CreatePollRequest>,
) -> Result<(StatusCode, Json<PollView>), PollError> {
    let poll = service
        .create_poll(
            &request.question,
            &request.options,
            request.created_by.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(poll.view())))
}

async fn cast_vote(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<PollView>, PollError> {
    if request.voter_id.trim().is_empty() {
        return Err(PollError::Validation("voter id is required".to_string()));
    }
    let poll = service
        .cast_vote(&poll_id, request.option_index, &request.voter_id)
        .await?;
    Ok(Json(poll.view()))
}

async fn has_voted(
    State(service): State<Arc<PollService>>,
    Path(poll_id): Path<String>,
    Query(query): Query<VotedQuery>,
) -> Result<Json<VotedResponse>, PollError> {
    let has_voted = service.has_voted(&poll_id, &query.voter_id).await?;
    Ok(Json(VotedResponse { poll_id, has_voted }))
}
