// Workflow manager: the run / status / cancel surface over the executor.
//
// Active runs are tracked in memory with a live status channel and an abort
// handle. Status is mirrored to the plan store (and Redis, when configured)
// as the run moves, and the terminal outcome is persisted exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::executor::PipelineExecutor;
use super::executor::RunObserver;
use super::state::{PipelineState, RunStatus, StatusSnapshot};
use crate::error::{OrchestratorError, Result};
use crate::metrics;
use crate::redis_client::{status_key, RedisClient, PROGRESS_CHANNEL};
use crate::store::{PlanStore, StatusUpdate};

const SUMMARY_MAX_CHARS: usize = 200;

struct ActiveRun {
    status: watch::Receiver<StatusSnapshot>,
    abort: AbortHandle,
}

pub struct WorkflowManager {
    executor: Arc<PipelineExecutor>,
    store: Arc<dyn PlanStore>,
    mirror: Option<RedisClient>,
    status_ttl_secs: u64,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl WorkflowManager {
    pub fn new(executor: Arc<PipelineExecutor>, store: Arc<dyn PlanStore>) -> Self {
        Self {
            executor,
            store,
            mirror: None,
            status_ttl_secs: 3600,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_mirror(mut self, mirror: Option<RedisClient>, status_ttl_secs: u64) -> Self {
        self.mirror = mirror;
        self.status_ttl_secs = status_ttl_secs;
        self
    }

    pub fn executor(&self) -> &Arc<PipelineExecutor> {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    /// Run to completion on the caller's task.
    pub async fn run(&self, run_id: &str, request: Value) -> Result<PipelineState> {
        let registration = self.open(run_id, &request).await?;
        Ok(self.drive(run_id, request, registration).await)
    }

    /// Start a run in the background. The status row exists and the run is
    /// visible to `get_status` and cancellable as soon as this returns.
    pub async fn start(self: &Arc<Self>, run_id: &str, request: Value) -> Result<()> {
        let registration = self.open(run_id, &request).await?;
        let manager = Arc::clone(self);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            manager.drive(&run_id, request, registration).await;
        });
        Ok(())
    }

    /// Writes the status row, then registers the run. A run can only be
    /// cancelled once its row exists.
    async fn open(&self, run_id: &str, request: &Value) -> Result<RunRegistration> {
        if self.active.lock().contains_key(run_id) {
            return Err(OrchestratorError::RunAlreadyActive(run_id.to_string()));
        }
        let initial = PipelineState::new(run_id, request.clone());
        self.store.create_status(run_id, initial.start_time).await?;
        self.begin(initial)
    }

    fn begin(&self, initial: PipelineState) -> Result<RunRegistration> {
        let mut active = self.active.lock();
        let run_id = initial.run_id.clone();
        if active.contains_key(&run_id) {
            return Err(OrchestratorError::RunAlreadyActive(run_id));
        }

        let (tx, rx) = watch::channel(initial.snapshot());
        let (abort, registration) = AbortHandle::new_pair();
        active.insert(run_id.clone(), ActiveRun { status: rx, abort });
        info!(run_id = %run_id, "Run registered");

        Ok(RunRegistration {
            initial,
            status: tx,
            abort: registration,
        })
    }

    async fn drive(&self, run_id: &str, request: Value, registration: RunRegistration) -> PipelineState {
        let RunRegistration {
            initial,
            status,
            abort,
        } = registration;

        let tracker = RunTracker {
            status,
            last: Mutex::new(initial),
            store: self.store.clone(),
            mirror: self.mirror.clone(),
            status_ttl_secs: self.status_ttl_secs,
        };

        let outcome = Abortable::new(self.executor.run_with(run_id, request, &tracker), abort).await;
        let still_active = self.active.lock().remove(run_id).is_some();

        match outcome {
            Ok(state) if still_active => {
                self.persist_outcome(&state).await;
                tracker.mirror_snapshot(&state.snapshot()).await;
                state
            }
            // Cancelled: `cancel` already persisted the terminal status.
            Ok(mut state) => {
                state.finish(RunStatus::Cancelled, None);
                state
            }
            Err(_aborted) => {
                let mut state = tracker.last.lock().clone();
                state.finish(RunStatus::Cancelled, None);
                state
            }
        }
    }

    async fn persist_outcome(&self, state: &PipelineState) {
        let run_id = state.run_id.as_str();
        match state.status {
            RunStatus::Completed => {
                let itinerary = state.final_output.as_deref().unwrap_or_default();
                let summary = summarize(itinerary);
                let result = async {
                    self.store.delete_outputs(run_id).await?;
                    self.store.write_output(run_id, itinerary, &summary).await?;
                    self.store
                        .update_status(run_id, StatusUpdate::terminal(RunStatus::Completed, "plan saved", None))
                        .await
                }
                .await;
                match result {
                    Ok(_) => info!(run_id = %run_id, "Plan saved"),
                    Err(e) => error!(run_id = %run_id, error = %e, "Failed to save completed plan"),
                }
            }
            status => {
                let error = state.error.clone().or_else(|| Some("unknown error".to_string()));
                if let Err(e) = self
                    .store
                    .update_status(run_id, StatusUpdate::terminal(status, state.current_step.clone(), error))
                    .await
                {
                    error!(run_id = %run_id, error = %e, "Failed to record plan failure");
                }
            }
        }
    }

    /// Live status for active runs, then the Redis mirror, then the store.
    pub async fn get_status(&self, run_id: &str) -> Result<Option<StatusSnapshot>> {
        if let Some(run) = self.active.lock().get(run_id) {
            return Ok(Some(run.status.borrow().clone()));
        }

        if let Some(mirror) = &self.mirror {
            match mirror.get::<StatusSnapshot>(&status_key(run_id)).await {
                Ok(Some(snapshot)) => return Ok(Some(snapshot)),
                Ok(None) => {}
                Err(e) => warn!(run_id = %run_id, error = %e, "Status mirror read failed"),
            }
        }

        Ok(self.store.get_status(run_id).await?.map(|record| record.to_snapshot()))
    }

    /// Abort an active run. Returns false if the run is not active.
    pub async fn cancel(&self, run_id: &str) -> Result<bool> {
        let Some(run) = self.active.lock().remove(run_id) else {
            return Ok(false);
        };
        run.abort.abort();

        let mut snapshot = run.status.borrow().clone();
        let update = StatusUpdate::terminal(RunStatus::Cancelled, "cancelled", None);
        snapshot.status = RunStatus::Cancelled;
        snapshot.current_step = "cancelled".to_string();
        snapshot.completed_at = update.completed_at;

        if !self.store.update_status(run_id, update.clone()).await? {
            self.store
                .create_status(run_id, snapshot.started_at.unwrap_or_else(Utc::now))
                .await?;
            self.store.update_status(run_id, update).await?;
        }
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror
                .set_with_expiry(&status_key(run_id), &snapshot, self.status_ttl_secs)
                .await
            {
                warn!(run_id = %run_id, error = %e, "Status mirror write failed");
            }
        }

        metrics::record_run(RunStatus::Cancelled.as_str());
        info!(run_id = %run_id, "Run cancelled");
        Ok(true)
    }

    pub fn list_active(&self) -> Vec<StatusSnapshot> {
        let mut runs: Vec<StatusSnapshot> = self
            .active
            .lock()
            .values()
            .map(|run| run.status.borrow().clone())
            .collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_id.cmp(&b.run_id)));
        runs
    }

    pub fn visualize(&self) -> String {
        self.executor.visualize()
    }
}

struct RunRegistration {
    initial: PipelineState,
    status: watch::Sender<StatusSnapshot>,
    abort: AbortRegistration,
}

/// Publishes each step of one run.
struct RunTracker {
    status: watch::Sender<StatusSnapshot>,
    last: Mutex<PipelineState>,
    store: Arc<dyn PlanStore>,
    mirror: Option<RedisClient>,
    status_ttl_secs: u64,
}

impl RunTracker {
    async fn mirror_snapshot(&self, snapshot: &StatusSnapshot) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if let Err(e) = mirror
            .set_with_expiry(&status_key(&snapshot.run_id), snapshot, self.status_ttl_secs)
            .await
        {
            warn!(run_id = %snapshot.run_id, error = %e, "Status mirror write failed");
        }
        if let Ok(message) = serde_json::to_string(snapshot) {
            if let Err(e) = mirror.publish(PROGRESS_CHANNEL, &message).await {
                warn!(run_id = %snapshot.run_id, error = %e, "Progress publish failed");
            }
        }
    }
}

#[async_trait]
impl RunObserver for RunTracker {
    async fn on_step(&self, state: &PipelineState) {
        let snapshot = state.snapshot();
        *self.last.lock() = state.clone();
        self.status.send_replace(snapshot.clone());

        // The terminal status is persisted by the manager.
        if !state.status.is_terminal() {
            if let Err(e) = self
                .store
                .update_status(&state.run_id, StatusUpdate::step(state.current_step.clone()))
                .await
            {
                warn!(run_id = %state.run_id, error = %e, "Failed to record current step");
            }
        }
        self.mirror_snapshot(&snapshot).await;
    }
}

/// First non-empty line of the plan, cut to a readable length.
fn summarize(itinerary: &str) -> String {
    let line = itinerary
        .lines()
        .map(|l| l.trim().trim_start_matches('#').trim())
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    if line.chars().count() > SUMMARY_MAX_CHARS {
        let cut: String = line.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}
