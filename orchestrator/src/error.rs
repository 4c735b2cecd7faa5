use std::any::Any;

use thiserror::Error;
use warp::{reject::Reject, Reply, Rejection};

/// Errors raised by the orchestration substrate and its collaborators.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Run already active: {0}")]
    RunAlreadyActive(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Failure returned by a skill or an action handler. Its display text is what
/// ends up in `ResponseMessage::error` and `AgentResponse::message`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkillError {
    #[error("{0}")]
    Failed(String),

    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("{0}")]
    Llm(#[from] LlmError),
}

impl SkillError {
    pub fn msg(message: impl Into<String>) -> Self {
        SkillError::Failed(message.into())
    }
}

/// Failure of the text-completion collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response had no content")]
    EmptyResponse,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl Reject for ApiError {}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::RunAlreadyActive(id) => ApiError::Conflict(id),
            OrchestratorError::AgentNotFound(name) => ApiError::NotFound(name),
            OrchestratorError::InvalidMessage(msg) => ApiError::BadRequest(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Rejection> {
    if let Some(api_err) = err.find::<ApiError>() {
        let code = match api_err {
            ApiError::NotFound(_) => warp::http::StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => warp::http::StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => warp::http::StatusCode::CONFLICT,
            ApiError::InternalError(_) => warp::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        let json = warp::reply::json(&serde_json::json!({
            "success": false,
            "error": api_err.to_string(),
        }));

        Ok(warp::reply::with_status(json, code))
    } else {
        Err(err)
    }
}
