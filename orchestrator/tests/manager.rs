mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{fixed, raising, sleepy, stages, ScriptedCompletion};
use trip_orchestrator::protocol::Broker;
use trip_orchestrator::store::{MemoryPlanStore, PlanStore};
use trip_orchestrator::workflow::{PipelineExecutor, RunStatus, WorkflowManager};

fn manager_with(broker: Arc<Broker>, names: &[&str], llm: Arc<ScriptedCompletion>) -> (Arc<WorkflowManager>, Arc<MemoryPlanStore>) {
    let store = Arc::new(MemoryPlanStore::new());
    let executor = PipelineExecutor::new(broker, stages(names), llm);
    let manager = WorkflowManager::new(Arc::new(executor), store.clone());
    (Arc::new(manager), store)
}

#[tokio::test]
async fn test_completed_run_persists_status_and_output() {
    let broker = Broker::new_shared(None);
    fixed(&broker, "route", json!({"route_result": "G318"}));
    let (manager, store) = manager_with(broker, &["route"], ScriptedCompletion::replying("# Ten days to Lhasa\nDay 1"));

    store.write_output("plan-1", "stale plan", "stale").await.unwrap();
    let state = manager.run("plan-1", json!({"destination": "Lhasa"})).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    let record = store.get_status("plan-1").await.unwrap().unwrap();
    assert_eq!(record.status, "completed");
    assert!(record.completed_at.is_some());

    let outputs = store.outputs("plan-1").await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].itinerary, "# Ten days to Lhasa\nDay 1");
    assert_eq!(outputs[0].summary, "Ten days to Lhasa");

    let status = manager.get_status("plan-1").await.unwrap().unwrap();
    assert_eq!(status.status, RunStatus::Completed);
    assert!(manager.list_active().is_empty());
}

#[tokio::test]
async fn test_failed_synthesis_is_persisted_with_reason() {
    let broker = Broker::new_shared(None);
    raising(&broker, "route", "no roads");
    let (manager, store) = manager_with(broker, &["route"], ScriptedCompletion::failing("model offline"));

    let state = manager.run("plan-2", json!({})).await.unwrap();

    assert_eq!(state.status, RunStatus::Failed);
    let record = store.get_status("plan-2").await.unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert!(record.error.unwrap().contains("model offline"));
    assert!(store.outputs("plan-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_background_run_can_be_cancelled() {
    let broker = Broker::new_shared(None);
    sleepy(&broker, "route", Duration::from_secs(30));
    let llm = ScriptedCompletion::replying("never written");
    let (manager, store) = manager_with(broker, &["route"], llm.clone());

    manager.start("plan-3", json!({})).await.unwrap();
    assert!(manager.start("plan-3", json!({})).await.is_err());

    let active = manager.list_active();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].run_id, "plan-3");

    // Let the run reach its first stage.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get_status("plan-3").await.unwrap().unwrap().current_step, "route");

    assert!(manager.cancel("plan-3").await.unwrap());
    assert!(!manager.cancel("plan-3").await.unwrap());

    let status = manager.get_status("plan-3").await.unwrap().unwrap();
    assert_eq!(status.status, RunStatus::Cancelled);
    assert!(manager.list_active().is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.get_status("plan-3").await.unwrap().unwrap().status, "cancelled");
    assert!(store.outputs("plan-3").await.unwrap().is_empty());
    assert!(llm.prompts.lock().is_empty());
}

#[tokio::test]
async fn test_cancel_right_after_start_persists_cancelled() {
    let broker = Broker::new_shared(None);
    sleepy(&broker, "route", Duration::from_secs(30));
    let (manager, store) = manager_with(broker, &["route"], ScriptedCompletion::replying("never written"));

    manager.start("plan-4", json!({})).await.unwrap();
    assert!(manager.cancel("plan-4").await.unwrap());

    // Give the spawned task a chance to run after the abort.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let record = store.get_status("plan-4").await.unwrap().unwrap();
    assert_eq!(record.status, "cancelled");
    assert_eq!(record.current_step.as_deref(), Some("cancelled"));
    assert!(record.completed_at.is_some());
    assert_eq!(manager.get_status("plan-4").await.unwrap().unwrap().status, RunStatus::Cancelled);
    assert!(manager.list_active().is_empty());
}

#[tokio::test]
async fn test_visualization_lists_declared_order() {
    let broker = Broker::new_shared(None);
    let (manager, _store) = manager_with(broker, &["route", "weather", "budget"], ScriptedCompletion::replying(""));
    assert_eq!(manager.visualize(), "1. route -> 2. weather -> 3. budget -> 4. finalize");
}
