use std::sync::Arc;

use serde_json::json;
use tracing::info;
use warp::{Rejection, Reply};

use crate::agents::IntentRouter;
use crate::error::ApiError;
use crate::models::QueryRequest;

pub async fn handle_query(
    request: QueryRequest,
    router: Arc<IntentRouter>,
) -> Result<impl Reply, Rejection> {
    if request.query.trim().is_empty() {
        return Err(warp::reject::custom(ApiError::BadRequest("query must not be empty".into())));
    }
    info!(query = %request.query, "Routing free-text query");

    let response = router.route(&request.query, request.context.as_deref()).await;
    Ok(warp::reply::json(&response))
}

pub async fn handle_list_agents(router: Arc<IntentRouter>) -> Result<impl Reply, Rejection> {
    let agents = router.agent_status();
    Ok(warp::reply::json(&json!({
        "count": agents.len(),
        "agents": agents,
    })))
}
