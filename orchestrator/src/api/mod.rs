use std::sync::Arc;

use warp::{Filter, Rejection, Reply};

use crate::agents::IntentRouter;
use crate::error::handle_rejection;
use crate::workflow::WorkflowManager;

mod plans;
mod query;
mod workflow;

pub fn routes(
    manager: Arc<WorkflowManager>,
    router: Arc<IntentRouter>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));
    let workflow_api = api.and(warp::path("workflow"));

    let plan_route = api
        .and(warp::path("plans"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(64 * 1024))
        .and(warp::body::json())
        .and(with_manager(manager.clone()))
        .and_then(plans::handle_create_plan);

    let status_route = workflow_api
        .and(warp::path("status"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(workflow::handle_get_status);

    let cancel_route = workflow_api
        .and(warp::path("cancel"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::post())
        .and(with_manager(manager.clone()))
        .and_then(workflow::handle_cancel);

    let active_route = workflow_api
        .and(warp::path("active"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_manager(manager.clone()))
        .and_then(workflow::handle_list_active);

    let visualization_route = workflow_api
        .and(warp::path("visualization"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_manager(manager))
        .and_then(workflow::handle_visualization);

    let query_route = api
        .and(warp::path("query"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(16 * 1024))
        .and(warp::body::json())
        .and(with_router(router.clone()))
        .and_then(query::handle_query);

    let agents_route = api
        .and(warp::path("agents"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_router(router))
        .and_then(query::handle_list_agents);

    plan_route
        .or(status_route)
        .or(cancel_route)
        .or(active_route)
        .or(visualization_route)
        .or(query_route)
        .or(agents_route)
        .recover(handle_rejection)
}

fn with_manager(
    manager: Arc<WorkflowManager>,
) -> impl Filter<Extract = (Arc<WorkflowManager>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

fn with_router(
    router: Arc<IntentRouter>,
) -> impl Filter<Extract = (Arc<IntentRouter>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || router.clone())
}
