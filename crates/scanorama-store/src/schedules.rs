//! Scheduled-job persistence.
//!
//! Cron expressions are validated by the scheduler before they reach this
//! module; the store treats them as opaque text.

use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use scanorama_core::types::{ScheduledJob, ScheduledJobType};

use crate::client::{Store, StoreError};

fn scheduled_job_from_row(row: &PgRow) -> Result<ScheduledJob, StoreError> {
    let job_type: String = row.try_get("job_type")?;
    Ok(ScheduledJob {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        job_type: job_type
            .parse()
            .map_err(|e: String| StoreError::invalid("scheduled_jobs.job_type", e))?,
        cron_expression: row.try_get("cron_expression")?,
        configuration: row.try_get("configuration")?,
        is_active: row.try_get("is_active")?,
        last_run: row.try_get("last_run")?,
        run_count: row.try_get("run_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SCHEDULE_COLS: &str = "id, name, job_type, cron_expression, configuration, is_active, \
     last_run, run_count, created_at, updated_at";

impl Store {
    pub async fn create_scheduled_job(
        &self,
        name: &str,
        job_type: ScheduledJobType,
        cron_expression: &str,
        configuration: serde_json::Value,
    ) -> Result<ScheduledJob, StoreError> {
        let sql = format!(
            "INSERT INTO scheduled_jobs (id, name, job_type, cron_expression, configuration)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {SCHEDULE_COLS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(job_type.as_str())
            .bind(cron_expression)
            .bind(configuration)
            .fetch_one(self.pool())
            .await?;
        scheduled_job_from_row(&row)
    }

    pub async fn get_scheduled_job(&self, name: &str) -> Result<ScheduledJob, StoreError> {
        let sql = format!("SELECT {SCHEDULE_COLS} FROM scheduled_jobs WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("scheduled job", name))?;
        scheduled_job_from_row(&row)
    }

    pub async fn list_scheduled_jobs(
        &self,
        active_only: bool,
    ) -> Result<Vec<ScheduledJob>, StoreError> {
        let sql = format!(
            "SELECT {SCHEDULE_COLS} FROM scheduled_jobs
             WHERE ($1 = FALSE OR is_active)
             ORDER BY name"
        );
        let rows = sqlx::query(&sql)
            .bind(active_only)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(scheduled_job_from_row).collect()
    }

    pub async fn remove_scheduled_job(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE name = $1")
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("scheduled job", name));
        }
        Ok(())
    }

    pub async fn set_scheduled_job_active(
        &self,
        name: &str,
        active: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE scheduled_jobs SET is_active = $2, updated_at = now() WHERE name = $1",
        )
        .bind(name)
        .bind(active)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("scheduled job", name));
        }
        Ok(())
    }

    /// Bump `run_count` and stamp `last_run` after a successful dispatch.
    pub async fn record_scheduled_run(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scheduled_jobs SET run_count = run_count + 1, last_run = now(),
               updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
