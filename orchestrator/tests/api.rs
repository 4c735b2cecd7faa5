mod common;

use std::sync::Arc;

use serde_json::{json, Value};
use warp::http::StatusCode;

use common::{fixed, stages, ScriptedCompletion};
use trip_orchestrator::agents::IntentRouter;
use trip_orchestrator::api;
use trip_orchestrator::protocol::Broker;
use trip_orchestrator::store::MemoryPlanStore;
use trip_orchestrator::workflow::{PipelineExecutor, WorkflowManager};

fn app() -> impl warp::Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let broker = Broker::new_shared(None);
    fixed(&broker, "route", json!({"route_result": "G318"}));
    fixed(&broker, "lodging", json!({"lodging_result": "Guesthouse"}));

    let executor = PipelineExecutor::new(
        broker.clone(),
        stages(&["route", "lodging"]),
        ScriptedCompletion::replying("plan"),
    );
    let manager = WorkflowManager::new(Arc::new(executor), Arc::new(MemoryPlanStore::new()));
    let router = IntentRouter::new(broker, "route")
        .with_agent("route", "routes", &["route", "drive"])
        .with_agent("lodging", "hotels", &["hotel", "stay"]);

    api::routes(Arc::new(manager), Arc::new(router))
}

fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

#[tokio::test]
async fn test_create_plan_is_accepted_and_trackable() {
    let app = app();

    let response = warp::test::request()
        .method("POST")
        .path("/api/v1/plans")
        .json(&json!({
            "trip_plan_id": "plan-42",
            "travel_request": {
                "starting_location": "Chengdu",
                "destination": "Lhasa",
                "travel_dates_start": "2026-05-01",
                "travel_dates_end": "2026-05-03"
            }
        }))
        .reply(&app)
        .await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body(&response)["trip_plan_id"], "plan-42");
    assert_eq!(body(&response)["status"], "processing");

    let status = warp::test::request()
        .method("GET")
        .path("/api/v1/workflow/status/plan-42")
        .reply(&app)
        .await;
    assert_eq!(status.status(), StatusCode::OK);
    assert_eq!(body(&status)["data"]["run_id"], "plan-42");
}

#[tokio::test]
async fn test_invalid_plan_is_rejected() {
    let response = warp::test::request()
        .method("POST")
        .path("/api/v1/plans")
        .json(&json!({
            "travel_request": {
                "starting_location": "Chengdu",
                "destination": "Lhasa",
                "travel_dates_start": "2026-05-03",
                "travel_dates_end": "2026-05-01"
            }
        }))
        .reply(&app())
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body(&response)["success"], false);
}

#[tokio::test]
async fn test_unknown_run_status_and_cancel_are_not_found() {
    let app = app();

    let status = warp::test::request()
        .method("GET")
        .path("/api/v1/workflow/status/nope")
        .reply(&app)
        .await;
    assert_eq!(status.status(), StatusCode::NOT_FOUND);

    let cancel = warp::test::request()
        .method("POST")
        .path("/api/v1/workflow/cancel/nope")
        .reply(&app)
        .await;
    assert_eq!(cancel.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_query_routes_to_one_agent() {
    let response = warp::test::request()
        .method("POST")
        .path("/api/v1/query")
        .json(&json!({"query": "Where should we stay in Dali? A hotel near the lake."}))
        .reply(&app())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let answer = body(&response);
    assert_eq!(answer["success"], true);
    assert_eq!(answer["agent_name"], "lodging");
    assert_eq!(answer["metadata"]["intent_source"], "keyword");
}

#[tokio::test]
async fn test_introspection_endpoints() {
    let app = app();

    let agents = warp::test::request().method("GET").path("/api/v1/agents").reply(&app).await;
    assert_eq!(body(&agents)["count"], 2);

    let active = warp::test::request()
        .method("GET")
        .path("/api/v1/workflow/active")
        .reply(&app)
        .await;
    assert_eq!(body(&active)["active_count"], 0);

    let visualization = warp::test::request()
        .method("GET")
        .path("/api/v1/workflow/visualization")
        .reply(&app)
        .await;
    assert_eq!(
        body(&visualization)["visualization"],
        "1. route -> 2. lodging -> 3. finalize"
    );
}
