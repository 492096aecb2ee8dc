//! Scan-profile persistence and built-in profile seeding.

use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use scanorama_core::types::{ScanProfile, ScanType};

use crate::client::{Store, StoreError};

fn profile_from_row(row: &PgRow) -> Result<ScanProfile, StoreError> {
    let scan_type: String = row.try_get("scan_type")?;
    let scripts: serde_json::Value = row.try_get("custom_scripts")?;
    Ok(ScanProfile {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        os_family: row.try_get("os_family")?,
        scan_type: scan_type
            .parse()
            .map_err(|e: String| StoreError::invalid("scan_profiles.scan_type", e))?,
        ports: row.try_get("ports")?,
        timing_level: row.try_get("timing_level")?,
        is_active: row.try_get("is_active")?,
        custom_scripts: serde_json::from_value(scripts)
            .map_err(|e| StoreError::invalid("scan_profiles.custom_scripts", e.to_string()))?,
    })
}

const PROFILE_COLS: &str =
    "id, name, os_family, scan_type, ports, timing_level, is_active, custom_scripts";

/// Built-in profiles inserted when the table is empty.
fn default_profiles() -> Vec<(&'static str, Option<&'static str>, ScanType, &'static str, i16)> {
    vec![
        ("default-connect", None, ScanType::Connect, "T:1000", 3),
        ("default-version", None, ScanType::Version, "T:1000", 3),
        ("linux-server", Some("linux"), ScanType::Version, "22,80,443,3306,5432,6379,8080", 4),
        ("windows-server", Some("windows"), ScanType::Version, "135,139,445,1433,3389", 3),
        ("full-audit", None, ScanType::Comprehensive, "1-65535", 2),
    ]
}

impl Store {
    pub async fn get_profile(&self, name: &str) -> Result<ScanProfile, StoreError> {
        let sql = format!("SELECT {PROFILE_COLS} FROM scan_profiles WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("scan profile", name))?;
        profile_from_row(&row)
    }

    pub async fn list_profiles(&self, active_only: bool) -> Result<Vec<ScanProfile>, StoreError> {
        let sql = format!(
            "SELECT {PROFILE_COLS} FROM scan_profiles
             WHERE ($1 = FALSE OR is_active)
             ORDER BY name"
        );
        let rows = sqlx::query(&sql)
            .bind(active_only)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(profile_from_row).collect()
    }

    /// Insert the built-in profiles if none exist yet. Idempotent.
    pub async fn seed_default_profiles(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT count(*) AS n FROM scan_profiles")
            .fetch_one(self.pool())
            .await?;
        let existing: i64 = row.try_get("n")?;
        if existing > 0 {
            return Ok(0);
        }

        let profiles = default_profiles();
        let mut tx = self.pool().begin().await?;
        for (name, os_family, scan_type, ports, timing) in &profiles {
            sqlx::query(
                "INSERT INTO scan_profiles (id, name, os_family, scan_type, ports, timing_level)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(*os_family)
            .bind(scan_type.as_str())
            .bind(ports)
            .bind(timing)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(count = profiles.len(), "Seeded default scan profiles");
        Ok(profiles.len())
    }
}
