use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{RunStatus, StatusSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlanStatusRecord {
    pub trip_plan_id: String,
    pub status: String,
    pub current_step: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl PlanStatusRecord {
    pub fn to_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            run_id: self.trip_plan_id.clone(),
            status: RunStatus::parse(&self.status).unwrap_or(RunStatus::Failed),
            current_step: self.current_step.clone().unwrap_or_default(),
            completed_steps: Vec::new(),
            failed_steps: Vec::new(),
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PlanOutputRecord {
    pub id: Uuid,
    pub trip_plan_id: String,
    pub itinerary: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

// API Request/Response models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub starting_location: String,
    pub destination: String,
    pub travel_dates_start: NaiveDate,
    pub travel_dates_end: NaiveDate,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default = "default_travellers")]
    pub travellers: u32,
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default = "default_currency")]
    pub budget_currency: String,
    #[serde(default)]
    pub travel_style: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_travellers() -> u32 {
    1
}

fn default_currency() -> String {
    "CNY".to_string()
}

impl TravelRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.starting_location.trim().is_empty() {
            return Err("starting_location must not be empty".to_string());
        }
        if self.destination.trim().is_empty() {
            return Err("destination must not be empty".to_string());
        }
        if self.travel_dates_end < self.travel_dates_start {
            return Err("travel_dates_end is before travel_dates_start".to_string());
        }
        if self.travellers == 0 {
            return Err("travellers must be at least 1".to_string());
        }
        Ok(())
    }

    /// Trip length in days, counting both ends, unless given explicitly.
    pub fn days(&self) -> u32 {
        self.duration.unwrap_or_else(|| {
            let span = (self.travel_dates_end - self.travel_dates_start).num_days();
            u32::try_from(span + 1).unwrap_or(1)
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    /// Reuses the caller's plan identifier when given.
    #[serde(default)]
    pub trip_plan_id: Option<String>,
    pub travel_request: TravelRequest,
}

#[derive(Debug, Serialize)]
pub struct PlanAccepted {
    pub trip_plan_id: String,
    pub status: RunStatus,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub context: Option<String>,
}
