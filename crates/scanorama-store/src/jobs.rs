//! Discovery and scan job rows and their status transitions.

use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use scanorama_core::types::{
    DiscoveryJob, DiscoveryMethod, JobStatus, ScanJob, ScanType, TargetSelector,
};

use crate::client::{Store, StoreError};

fn discovery_job_from_row(row: &PgRow) -> Result<DiscoveryJob, StoreError> {
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;
    Ok(DiscoveryJob {
        id: row.try_get("id")?,
        network: row.try_get("network")?,
        method: method
            .parse()
            .map_err(|e: String| StoreError::invalid("discovery_jobs.method", e))?,
        status: status
            .parse()
            .map_err(|e: String| StoreError::invalid("discovery_jobs.status", e))?,
        hosts_discovered: row.try_get("hosts_discovered")?,
        hosts_responsive: row.try_get("hosts_responsive")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn scan_job_from_row(row: &PgRow) -> Result<ScanJob, StoreError> {
    let selector: serde_json::Value = row.try_get("target_selector")?;
    let scan_type: String = row.try_get("scan_type")?;
    let status: String = row.try_get("status")?;
    Ok(ScanJob {
        id: row.try_get("id")?,
        target_selector: serde_json::from_value(selector)
            .map_err(|e| StoreError::invalid("scan_jobs.target_selector", e.to_string()))?,
        scan_type: scan_type
            .parse()
            .map_err(|e: String| StoreError::invalid("scan_jobs.scan_type", e))?,
        profile: row.try_get("profile")?,
        ports: row.try_get("ports")?,
        status: status
            .parse()
            .map_err(|e: String| StoreError::invalid("scan_jobs.status", e))?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

const DISCOVERY_COLS: &str = "id, network, method, status, hosts_discovered, hosts_responsive, \
     started_at, completed_at, error, created_at";

const SCAN_COLS: &str = "id, target_selector, scan_type, profile, ports, status, \
     started_at, completed_at, error, created_at";

impl Store {
    // ── Discovery jobs ───────────────────────────────────────────

    pub async fn create_discovery_job(
        &self,
        network: &str,
        method: DiscoveryMethod,
    ) -> Result<DiscoveryJob, StoreError> {
        let sql = format!(
            "INSERT INTO discovery_jobs (id, network, method)
             VALUES ($1, $2, $3)
             RETURNING {DISCOVERY_COLS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(network)
            .bind(method.as_str())
            .fetch_one(self.pool())
            .await?;
        discovery_job_from_row(&row)
    }

    pub async fn mark_discovery_running(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE discovery_jobs SET status = 'running', started_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn complete_discovery_job(
        &self,
        id: Uuid,
        hosts_discovered: i64,
        hosts_responsive: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE discovery_jobs SET status = 'completed', completed_at = now(),
               hosts_discovered = $2, hosts_responsive = $3
             WHERE id = $1",
        )
        .bind(id)
        .bind(hosts_discovered)
        .bind(hosts_responsive)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_discovery_job(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE discovery_jobs SET status = 'failed', completed_at = now(), error = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_discovery_job(&self, id: Uuid) -> Result<DiscoveryJob, StoreError> {
        let sql = format!("SELECT {DISCOVERY_COLS} FROM discovery_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("discovery job", id.to_string()))?;
        discovery_job_from_row(&row)
    }

    pub async fn list_discovery_jobs(&self, limit: i64) -> Result<Vec<DiscoveryJob>, StoreError> {
        let sql = format!(
            "SELECT {DISCOVERY_COLS} FROM discovery_jobs ORDER BY created_at DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.pool()).await?;
        rows.iter().map(discovery_job_from_row).collect()
    }

    // ── Scan jobs ────────────────────────────────────────────────

    pub async fn create_scan_job(
        &self,
        selector: &TargetSelector,
        scan_type: ScanType,
        profile: Option<&str>,
        ports: &str,
    ) -> Result<ScanJob, StoreError> {
        let sql = format!(
            "INSERT INTO scan_jobs (id, target_selector, scan_type, profile, ports)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {SCAN_COLS}"
        );
        let selector_json = serde_json::to_value(selector)
            .map_err(|e| StoreError::invalid("scan_jobs.target_selector", e.to_string()))?;
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(selector_json)
            .bind(scan_type.as_str())
            .bind(profile)
            .bind(ports)
            .fetch_one(self.pool())
            .await?;
        scan_job_from_row(&row)
    }

    pub async fn mark_scan_running(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE scan_jobs SET status = 'running', started_at = now() WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn complete_scan_job(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scan_jobs SET status = 'completed', completed_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn fail_scan_job(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE scan_jobs SET status = 'failed', completed_at = now(), error = $2
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_scan_job(&self, id: Uuid) -> Result<ScanJob, StoreError> {
        let sql = format!("SELECT {SCAN_COLS} FROM scan_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("scan job", id.to_string()))?;
        scan_job_from_row(&row)
    }

    pub async fn list_scan_jobs(&self, limit: i64) -> Result<Vec<ScanJob>, StoreError> {
        let sql = format!("SELECT {SCAN_COLS} FROM scan_jobs ORDER BY created_at DESC LIMIT $1");
        let rows = sqlx::query(&sql).bind(limit).fetch_all(self.pool()).await?;
        rows.iter().map(scan_job_from_row).collect()
    }

    /// True when any discovery or scan job is mid-flight.
    pub async fn has_running_jobs(&self) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT
               (SELECT count(*) FROM discovery_jobs WHERE status = 'running') +
               (SELECT count(*) FROM scan_jobs WHERE status = 'running') AS running",
        )
        .fetch_one(self.pool())
        .await?;
        let running: i64 = row.try_get("running")?;
        Ok(running > 0)
    }

    /// Counts per status for the API status endpoint.
    pub async fn job_counts(&self, status: JobStatus) -> Result<(i64, i64), StoreError> {
        let row = sqlx::query(
            "SELECT
               (SELECT count(*) FROM discovery_jobs WHERE status = $1) AS discovery,
               (SELECT count(*) FROM scan_jobs WHERE status = $1) AS scan",
        )
        .bind(status.as_str())
        .fetch_one(self.pool())
        .await?;
        Ok((row.try_get("discovery")?, row.try_get("scan")?))
    }
}
