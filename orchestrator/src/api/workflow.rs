use std::sync::Arc;

use serde_json::json;
use warp::{Rejection, Reply};

use crate::error::ApiError;
use crate::workflow::WorkflowManager;

pub async fn handle_get_status(
    trip_plan_id: String,
    manager: Arc<WorkflowManager>,
) -> Result<impl Reply, Rejection> {
    let status = manager
        .get_status(&trip_plan_id)
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?
        .ok_or_else(|| warp::reject::custom(ApiError::NotFound(format!("trip plan {trip_plan_id}"))))?;

    Ok(warp::reply::json(&json!({
        "success": true,
        "data": status,
    })))
}

pub async fn handle_cancel(
    trip_plan_id: String,
    manager: Arc<WorkflowManager>,
) -> Result<impl Reply, Rejection> {
    let cancelled = manager
        .cancel(&trip_plan_id)
        .await
        .map_err(|e| warp::reject::custom(ApiError::from(e)))?;
    if !cancelled {
        return Err(warp::reject::custom(ApiError::NotFound(format!(
            "no active run for trip plan {trip_plan_id}"
        ))));
    }

    Ok(warp::reply::json(&json!({
        "success": true,
        "message": "workflow cancelled",
        "trip_plan_id": trip_plan_id,
    })))
}

pub async fn handle_list_active(manager: Arc<WorkflowManager>) -> Result<impl Reply, Rejection> {
    let runs = manager.list_active();
    Ok(warp::reply::json(&json!({
        "success": true,
        "active_count": runs.len(),
        "workflows": runs,
    })))
}

pub async fn handle_visualization(manager: Arc<WorkflowManager>) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&json!({
        "success": true,
        "visualization": manager.visualize(),
        "stages": manager.executor().stages(),
    })))
}
