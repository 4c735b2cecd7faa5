use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use crate::error::ApiError;
use crate::models::{PlanAccepted, PlanRequest};
use crate::workflow::{RunStatus, WorkflowManager};

pub async fn handle_create_plan(
    request: PlanRequest,
    manager: Arc<WorkflowManager>,
) -> Result<impl Reply, Rejection> {
    let travel_request = request.travel_request;
    travel_request
        .validate()
        .map_err(|e| warp::reject::custom(ApiError::BadRequest(e)))?;

    let trip_plan_id = request
        .trip_plan_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut input = serde_json::to_value(&travel_request)
        .map_err(|e| warp::reject::custom(ApiError::InternalError(e.to_string())))?;
    if let Value::Object(fields) = &mut input {
        fields.insert("duration".into(), json!(travel_request.days()));
    }

    manager
        .start(&trip_plan_id, input)
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?;
    info!(trip_plan_id = %trip_plan_id, destination = %travel_request.destination, "Plan accepted");

    Ok(warp::reply::with_status(
        warp::reply::json(&PlanAccepted {
            trip_plan_id,
            status: RunStatus::Processing,
        }),
        StatusCode::ACCEPTED,
    ))
}
