// Plan persistence: one status row per plan plus its final output.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::Result;
use crate::models::{PlanOutputRecord, PlanStatusRecord};
use crate::workflow::RunStatus;

/// Fields to change on a status row; `None` leaves a column as it is.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: Option<RunStatus>,
    pub current_step: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn step(current_step: impl Into<String>) -> Self {
        Self {
            current_step: Some(current_step.into()),
            ..Self::default()
        }
    }

    pub fn terminal(status: RunStatus, current_step: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: Some(status),
            current_step: Some(current_step.into()),
            error,
            started_at: None,
            completed_at: Some(Utc::now()),
        }
    }
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Create the status row, or reset it when the plan is run again.
    async fn create_status(&self, trip_plan_id: &str, started_at: DateTime<Utc>) -> Result<()>;

    /// Returns false when no row exists for the plan.
    async fn update_status(&self, trip_plan_id: &str, update: StatusUpdate) -> Result<bool>;

    async fn get_status(&self, trip_plan_id: &str) -> Result<Option<PlanStatusRecord>>;

    async fn write_output(&self, trip_plan_id: &str, itinerary: &str, summary: &str) -> Result<PlanOutputRecord>;

    async fn delete_outputs(&self, trip_plan_id: &str) -> Result<u64>;

    async fn outputs(&self, trip_plan_id: &str) -> Result<Vec<PlanOutputRecord>>;
}

pub struct PgPlanStore {
    pool: DbPool,
}

impl PgPlanStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn create_status(&self, trip_plan_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO trip_plan_status (trip_plan_id, status, current_step, error, started_at, completed_at, updated_at)
             VALUES ($1, $2, $3, NULL, $4, NULL, NOW())
             ON CONFLICT (trip_plan_id) DO UPDATE
             SET status = EXCLUDED.status, current_step = EXCLUDED.current_step, error = NULL,
                 started_at = EXCLUDED.started_at, completed_at = NULL, updated_at = NOW()"
        )
        .bind(trip_plan_id)
        .bind(RunStatus::Processing.as_str())
        .bind("start")
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(&self, trip_plan_id: &str, update: StatusUpdate) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE trip_plan_status
             SET status = COALESCE($2, status),
                 current_step = COALESCE($3, current_step),
                 error = COALESCE($4, error),
                 started_at = COALESCE($5, started_at),
                 completed_at = COALESCE($6, completed_at),
                 updated_at = NOW()
             WHERE trip_plan_id = $1"
        )
        .bind(trip_plan_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.current_step)
        .bind(update.error)
        .bind(update.started_at)
        .bind(update.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_status(&self, trip_plan_id: &str) -> Result<Option<PlanStatusRecord>> {
        let record = sqlx::query_as::<_, PlanStatusRecord>(
            "SELECT trip_plan_id, status, current_step, error, started_at, completed_at, updated_at
             FROM trip_plan_status WHERE trip_plan_id = $1"
        )
        .bind(trip_plan_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn write_output(&self, trip_plan_id: &str, itinerary: &str, summary: &str) -> Result<PlanOutputRecord> {
        let record = sqlx::query_as::<_, PlanOutputRecord>(
            "INSERT INTO trip_plan_outputs (id, trip_plan_id, itinerary, summary, created_at)
             VALUES ($1, $2, $3, $4, NOW())
             RETURNING id, trip_plan_id, itinerary, summary, created_at"
        )
        .bind(Uuid::new_v4())
        .bind(trip_plan_id)
        .bind(itinerary)
        .bind(summary)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn delete_outputs(&self, trip_plan_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM trip_plan_outputs WHERE trip_plan_id = $1")
            .bind(trip_plan_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn outputs(&self, trip_plan_id: &str) -> Result<Vec<PlanOutputRecord>> {
        let records = sqlx::query_as::<_, PlanOutputRecord>(
            "SELECT id, trip_plan_id, itinerary, summary, created_at
             FROM trip_plan_outputs WHERE trip_plan_id = $1 ORDER BY created_at"
        )
        .bind(trip_plan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

/// In-process store for local runs and tests.
#[derive(Default)]
pub struct MemoryPlanStore {
    statuses: Mutex<HashMap<String, PlanStatusRecord>>,
    outputs: Mutex<Vec<PlanOutputRecord>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn create_status(&self, trip_plan_id: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.statuses.lock().insert(
            trip_plan_id.to_string(),
            PlanStatusRecord {
                trip_plan_id: trip_plan_id.to_string(),
                status: RunStatus::Processing.as_str().to_string(),
                current_step: Some("start".to_string()),
                error: None,
                started_at: Some(started_at),
                completed_at: None,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update_status(&self, trip_plan_id: &str, update: StatusUpdate) -> Result<bool> {
        let mut statuses = self.statuses.lock();
        let Some(record) = statuses.get_mut(trip_plan_id) else {
            return Ok(false);
        };
        if let Some(status) = update.status {
            record.status = status.as_str().to_string();
        }
        if update.current_step.is_some() {
            record.current_step = update.current_step;
        }
        if update.error.is_some() {
            record.error = update.error;
        }
        if update.started_at.is_some() {
            record.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            record.completed_at = update.completed_at;
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_status(&self, trip_plan_id: &str) -> Result<Option<PlanStatusRecord>> {
        Ok(self.statuses.lock().get(trip_plan_id).cloned())
    }

    async fn write_output(&self, trip_plan_id: &str, itinerary: &str, summary: &str) -> Result<PlanOutputRecord> {
        let record = PlanOutputRecord {
            id: Uuid::new_v4(),
            trip_plan_id: trip_plan_id.to_string(),
            itinerary: itinerary.to_string(),
            summary: summary.to_string(),
            created_at: Utc::now(),
        };
        self.outputs.lock().push(record.clone());
        Ok(record)
    }

    async fn delete_outputs(&self, trip_plan_id: &str) -> Result<u64> {
        let mut outputs = self.outputs.lock();
        let before = outputs.len();
        outputs.retain(|o| o.trip_plan_id != trip_plan_id);
        Ok((before - outputs.len()) as u64)
    }

    async fn outputs(&self, trip_plan_id: &str) -> Result<Vec<PlanOutputRecord>> {
        Ok(self
            .outputs
            .lock()
            .iter()
            .filter(|o| o.trip_plan_id == trip_plan_id)
            .cloned()
            .collect())
    }
}
