// Pipeline executor.
//
// Runs the declared stages strictly in order against one `PipelineState`. A
// failing stage is recorded and skipped over; only the finalization step can
// fail the run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::state::{PipelineState, RunStatus};
use crate::agents::AgentResponse;
use crate::error::panic_message;
use crate::llm::{ChatMessage, TextCompletion};
use crate::metrics;
use crate::protocol::{Broker, Payload};

pub const FINALIZE_STEP: &str = "finalize";
pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";

const SYNTHESIS_INSTRUCTIONS: &str = "You are a senior travel planner. Merge the specialists' \
    findings into one complete, coherent and practical trip plan with: an executive summary, \
    logistics, a day-by-day itinerary, lodging, highlights, a full budget and essential tips. \
    Where a specialist is missing, say what the traveller still needs to check.";

/// Sees the state each time the run moves to a new step.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn on_step(&self, state: &PipelineState);
}

#[async_trait]
impl RunObserver for () {
    async fn on_step(&self, _state: &PipelineState) {}
}

pub struct PipelineExecutor {
    broker: Arc<Broker>,
    stages: Vec<String>,
    synthesizer: Arc<dyn TextCompletion>,
    deadline: Option<Duration>,
}

impl PipelineExecutor {
    pub fn new(broker: Arc<Broker>, stages: Vec<String>, synthesizer: Arc<dyn TextCompletion>) -> Self {
        Self {
            broker,
            stages,
            synthesizer,
            deadline: None,
        }
    }

    /// Bound the skill stages. Stages not finished in time count as failed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub async fn run(&self, run_id: &str, request: Value) -> PipelineState {
        self.run_with(run_id, request, &()).await
    }

    pub async fn run_with(&self, run_id: &str, request: Value, observer: &dyn RunObserver) -> PipelineState {
        let mut state = PipelineState::new(run_id, request);
        let deadline_at = self.deadline.map(|d| Instant::now() + d);
        info!(run_id = %run_id, stages = self.stages.len(), "Pipeline started");

        for stage in &self.stages {
            state.current_step = stage.clone();
            observer.on_step(&state).await;

            if deadline_at.is_some_and(|at| Instant::now() >= at) {
                warn!(run_id = %run_id, stage = %stage, "Stage skipped, pipeline deadline exceeded");
                metrics::record_stage(stage, "deadline");
                state.record_failure(stage, DEADLINE_EXCEEDED);
                continue;
            }

            let outcome = match deadline_at {
                Some(at) => tokio::time::timeout_at(at, self.run_stage(stage, &state))
                    .await
                    .unwrap_or_else(|_| Err(DEADLINE_EXCEEDED.to_string())),
                None => self.run_stage(stage, &state).await,
            };

            match outcome {
                Ok(response) => {
                    info!(run_id = %run_id, stage = %stage, "Stage completed");
                    metrics::record_stage(stage, "completed");
                    state.record_success(stage, response);
                }
                Err(reason) => {
                    warn!(run_id = %run_id, stage = %stage, reason = %reason, "Stage failed");
                    metrics::record_stage(stage, "failed");
                    state.record_failure(stage, reason);
                }
            }
        }

        state.current_step = FINALIZE_STEP.to_string();
        observer.on_step(&state).await;
        self.finalize(&mut state).await;
        observer.on_step(&state).await;

        metrics::record_run(state.status.as_str());
        info!(
            run_id = %run_id,
            status = state.status.as_str(),
            completed = state.completed_steps.len(),
            failed = state.failed_steps.len(),
            "Pipeline finished"
        );
        state
    }

    /// One stage against the current state. Every failure, including a
    /// missing agent or a panic that got past the agent, becomes `Err(reason)`.
    async fn run_stage(&self, stage: &str, state: &PipelineState) -> Result<AgentResponse, String> {
        let agent = self
            .broker
            .registry()
            .agent(stage)
            .ok_or_else(|| format!("agent not found: {stage}"))?;

        let mut input = Payload::new();
        input.insert("request".into(), state.request.clone());
        input.insert("context".into(), Value::Object(state.context.clone()));
        input.insert("completed_steps".into(), json!(state.completed_steps));

        let response = AssertUnwindSafe(agent.execute(input))
            .catch_unwind()
            .await
            .map_err(|panic| panic_message(panic.as_ref()))?;

        if response.success {
            Ok(response)
        } else {
            Err(response.message)
        }
    }

    async fn finalize(&self, state: &mut PipelineState) {
        let messages = [
            ChatMessage::system(SYNTHESIS_INSTRUCTIONS),
            ChatMessage::user(self.synthesis_prompt(state)),
        ];

        match self.synthesizer.complete(&messages).await {
            Ok(plan) => {
                state.final_output = Some(plan);
                state.finish(RunStatus::Completed, None);
            }
            Err(e) => {
                error!(run_id = %state.run_id, error = %e, "Finalization failed");
                state.finish(RunStatus::Failed, Some(format!("finalization failed: {e}")));
            }
        }
    }

    fn synthesis_prompt(&self, state: &PipelineState) -> String {
        let request = serde_json::to_string_pretty(&state.request).unwrap_or_else(|_| state.request.to_string());
        let mut prompt = format!("Trip request:\n{request}\n\nSpecialist findings:\n");

        for stage in &self.stages {
            let Some(result) = state.result(stage) else {
                continue;
            };
            prompt.push_str(&format!("\n[{stage}]\n{}\n", render_data(&result.data)));
        }
        if !state.failed_steps.is_empty() {
            prompt.push_str(&format!(
                "\nNo findings from: {}\n",
                state.failed_steps.join(", ")
            ));
        }
        prompt
    }

    /// Stage order as the run walks it.
    pub fn visualize(&self) -> String {
        self.stages
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(FINALIZE_STEP))
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

fn render_data(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}: {text}"),
                other => format!("{key}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}
