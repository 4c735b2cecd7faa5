use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agents::AgentResponse;
use crate::protocol::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "processing" => Some(RunStatus::Processing),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Processing)
    }
}

/// State of one pipeline run. Owned by that run alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    /// The caller's input, untouched.
    pub request: Value,
    pub current_step: String,
    pub completed_steps: Vec<String>,
    pub failed_steps: Vec<String>,
    /// Successful stage responses, keyed by stage name.
    pub results: BTreeMap<String, AgentResponse>,
    /// Why each failed stage failed.
    pub stage_errors: BTreeMap<String, String>,
    /// Key/value pairs merged from every successful stage's data.
    pub context: Payload,
    pub final_output: Option<String>,
    pub status: RunStatus,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds, set once the run reaches a terminal status.
    pub total_execution_time: Option<f64>,
}

impl PipelineState {
    pub const INITIAL_STEP: &'static str = "start";

    pub fn new(run_id: impl Into<String>, request: Value) -> Self {
        Self {
            run_id: run_id.into(),
            request,
            current_step: Self::INITIAL_STEP.to_string(),
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            results: BTreeMap::new(),
            stage_errors: BTreeMap::new(),
            context: Payload::new(),
            final_output: None,
            status: RunStatus::Processing,
            error: None,
            start_time: Utc::now(),
            end_time: None,
            total_execution_time: None,
        }
    }

    pub fn result(&self, stage: &str) -> Option<&AgentResponse> {
        self.results.get(stage)
    }

    pub fn record_success(&mut self, stage: &str, response: AgentResponse) {
        match &response.data {
            Value::Object(data) => {
                for (key, value) in data {
                    self.context.insert(key.clone(), value.clone());
                }
            }
            Value::Null => {}
            other => {
                self.context.insert(stage.to_string(), other.clone());
            }
        }
        self.completed_steps.push(stage.to_string());
        self.results.insert(stage.to_string(), response);
    }

    pub fn record_failure(&mut self, stage: &str, reason: impl Into<String>) {
        self.failed_steps.push(stage.to_string());
        self.stage_errors.insert(stage.to_string(), reason.into());
    }

    /// Move to a terminal status and stamp the end time.
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        let end = Utc::now();
        self.status = status;
        self.error = error;
        self.end_time = Some(end);
        self.total_execution_time =
            Some((end - self.start_time).num_microseconds().unwrap_or_default() as f64 / 1e6);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.run_id.clone(),
            status: self.status,
            current_step: self.current_step.clone(),
            completed_steps: self.completed_steps.clone(),
            failed_steps: self.failed_steps.clone(),
            error: self.error.clone(),
            started_at: Some(self.start_time),
            completed_at: self.end_time,
        }
    }
}

/// What `get_status` and `list_active` report for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub current_step: String,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub failed_steps: Vec<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
