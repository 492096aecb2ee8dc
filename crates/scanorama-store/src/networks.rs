//! Network and exclusion persistence, plus atomic config seeding.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use scanorama_core::types::{DiscoveryMethod, Network, NetworkExclusion};

use crate::client::{Store, StoreError};

/// A validated network stanza ready for seeding. CIDRs have already been
/// normalized by the caller; invalid exclusion entries were dropped there.
#[derive(Debug, Clone)]
pub struct SeedNetwork {
    pub name: String,
    pub cidr: String,
    pub description: Option<String>,
    pub method: DiscoveryMethod,
    pub enabled: bool,
    pub exclusions: Vec<String>,
}

/// What a seeding pass changed.
#[derive(Debug, Default, Clone)]
pub struct SeedReport {
    pub networks_upserted: usize,
    pub global_exclusions: usize,
    pub network_exclusions: usize,
}

pub(crate) fn network_from_row(row: &PgRow) -> Result<Network, StoreError> {
    let method: String = row.try_get("discovery_method")?;
    Ok(Network {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        cidr: row.try_get("cidr")?,
        description: row.try_get("description")?,
        discovery_method: method
            .parse()
            .map_err(|e: String| StoreError::invalid("networks.discovery_method", e))?,
        is_active: row.try_get("is_active")?,
        scan_enabled: row.try_get("scan_enabled")?,
        last_discovery: row.try_get("last_discovery")?,
        last_scan: row.try_get("last_scan")?,
        host_count: row.try_get("host_count")?,
        active_host_count: row.try_get("active_host_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn exclusion_from_row(row: &PgRow) -> Result<NetworkExclusion, StoreError> {
    Ok(NetworkExclusion {
        id: row.try_get("id")?,
        network_id: row.try_get("network_id")?,
        excluded_cidr: row.try_get("excluded_cidr")?,
        reason: row.try_get("reason")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

const NETWORK_COLS: &str = "id, name, cidr, description, discovery_method, is_active, \
     scan_enabled, last_discovery, last_scan, host_count, active_host_count, \
     created_at, updated_at";

impl Store {
    // ── Networks ─────────────────────────────────────────────────

    /// Insert a network, or update cidr/description/method when the name
    /// already exists.
    pub async fn upsert_network(
        &self,
        name: &str,
        cidr: &str,
        description: Option<&str>,
        method: DiscoveryMethod,
        enabled: bool,
    ) -> Result<Network, StoreError> {
        let sql = format!(
            "INSERT INTO networks (id, name, cidr, description, discovery_method, is_active)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (name) DO UPDATE SET
               cidr = EXCLUDED.cidr,
               description = EXCLUDED.description,
               discovery_method = EXCLUDED.discovery_method,
               is_active = EXCLUDED.is_active,
               updated_at = now()
             RETURNING {NETWORK_COLS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(cidr)
            .bind(description)
            .bind(method.as_str())
            .bind(enabled)
            .fetch_one(self.pool())
            .await?;
        network_from_row(&row)
    }

    pub async fn get_network(&self, id: Uuid) -> Result<Network, StoreError> {
        let sql = format!("SELECT {NETWORK_COLS} FROM networks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("network", id.to_string()))?;
        network_from_row(&row)
    }

    pub async fn get_network_by_name(&self, name: &str) -> Result<Network, StoreError> {
        let sql = format!("SELECT {NETWORK_COLS} FROM networks WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("network", name))?;
        network_from_row(&row)
    }

    pub async fn list_networks(&self) -> Result<Vec<Network>, StoreError> {
        let sql = format!("SELECT {NETWORK_COLS} FROM networks ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;
        rows.iter().map(network_from_row).collect()
    }

    /// Delete a network; its exclusions cascade.
    pub async fn delete_network(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM networks WHERE name = $1")
            .bind(name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("network", name));
        }
        Ok(())
    }

    pub async fn set_network_active(&self, name: &str, active: bool) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE networks SET is_active = $2, updated_at = now() WHERE name = $1")
                .bind(name)
                .bind(active)
                .execute(self.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("network", name));
        }
        Ok(())
    }

    pub async fn rename_network(&self, name: &str, new_name: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE networks SET name = $2, updated_at = now() WHERE name = $1")
                .bind(name)
                .bind(new_name)
                .execute(self.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("network", name));
        }
        Ok(())
    }

    /// Record a completed discovery run against the owning network.
    pub async fn record_network_discovery(
        &self,
        id: Uuid,
        host_count: i64,
        active_host_count: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE networks SET last_discovery = $2, host_count = $3,
               active_host_count = $4, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(host_count)
        .bind(active_host_count)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record a completed scan run against the owning network.
    pub async fn record_network_scan(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE networks SET last_scan = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    // ── Exclusions ───────────────────────────────────────────────

    /// Enabled exclusions applying to a network: its own plus globals.
    pub async fn applicable_exclusions(
        &self,
        network_id: Uuid,
    ) -> Result<Vec<NetworkExclusion>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, network_id, excluded_cidr, reason, enabled, created_at
             FROM network_exclusions
             WHERE enabled AND (network_id IS NULL OR network_id = $1)
             ORDER BY excluded_cidr",
        )
        .bind(network_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(exclusion_from_row).collect()
    }

    /// List exclusions: global ones when `network_id` is `None`, one
    /// network's own otherwise.
    pub async fn list_exclusions(
        &self,
        network_id: Option<Uuid>,
    ) -> Result<Vec<NetworkExclusion>, StoreError> {
        let rows = match network_id {
            Some(id) => {
                sqlx::query(
                    "SELECT id, network_id, excluded_cidr, reason, enabled, created_at
                     FROM network_exclusions WHERE network_id = $1 ORDER BY excluded_cidr",
                )
                .bind(id)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, network_id, excluded_cidr, reason, enabled, created_at
                     FROM network_exclusions WHERE network_id IS NULL ORDER BY excluded_cidr",
                )
                .fetch_all(self.pool())
                .await?
            }
        };
        rows.iter().map(exclusion_from_row).collect()
    }

    pub async fn add_exclusion(
        &self,
        network_id: Option<Uuid>,
        cidr: &str,
        reason: Option<&str>,
    ) -> Result<NetworkExclusion, StoreError> {
        let row = sqlx::query(
            "INSERT INTO network_exclusions (id, network_id, excluded_cidr, reason)
             VALUES ($1, $2, $3, $4)
             RETURNING id, network_id, excluded_cidr, reason, enabled, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(network_id)
        .bind(cidr)
        .bind(reason)
        .fetch_one(self.pool())
        .await?;
        exclusion_from_row(&row)
    }

    pub async fn remove_exclusion(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM network_exclusions WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("exclusion", id.to_string()));
        }
        Ok(())
    }

    // ── Config seeding ───────────────────────────────────────────

    /// Seed networks and exclusions from configuration in one transaction.
    ///
    /// Networks are upserted by unique name. Global exclusions are replaced
    /// wholesale, as are the per-network exclusions of every seeded network.
    /// Applying the same configuration twice yields the same state as once.
    pub async fn seed_from_config(
        &self,
        networks: &[SeedNetwork],
        global_exclusions: &[String],
    ) -> Result<SeedReport, StoreError> {
        let mut tx = self.pool().begin().await?;
        let mut report = SeedReport::default();

        sqlx::query("DELETE FROM network_exclusions WHERE network_id IS NULL")
            .execute(&mut *tx)
            .await?;
        for cidr in global_exclusions {
            sqlx::query(
                "INSERT INTO network_exclusions (id, network_id, excluded_cidr, reason)
                 VALUES ($1, NULL, $2, 'configured')",
            )
            .bind(Uuid::new_v4())
            .bind(cidr)
            .execute(&mut *tx)
            .await?;
            report.global_exclusions += 1;
        }

        for net in networks {
            let sql = format!(
                "INSERT INTO networks (id, name, cidr, description, discovery_method, is_active)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (name) DO UPDATE SET
                   cidr = EXCLUDED.cidr,
                   description = EXCLUDED.description,
                   discovery_method = EXCLUDED.discovery_method,
                   is_active = EXCLUDED.is_active,
                   updated_at = now()
                 RETURNING {NETWORK_COLS}"
            );
            let row = sqlx::query(&sql)
                .bind(Uuid::new_v4())
                .bind(&net.name)
                .bind(&net.cidr)
                .bind(net.description.as_deref())
                .bind(net.method.as_str())
                .bind(net.enabled)
                .fetch_one(&mut *tx)
                .await?;
            let stored = network_from_row(&row)?;
            report.networks_upserted += 1;

            sqlx::query("DELETE FROM network_exclusions WHERE network_id = $1")
                .bind(stored.id)
                .execute(&mut *tx)
                .await?;
            for cidr in &net.exclusions {
                sqlx::query(
                    "INSERT INTO network_exclusions (id, network_id, excluded_cidr, reason)
                     VALUES ($1, $2, $3, 'configured')",
                )
                .bind(Uuid::new_v4())
                .bind(stored.id)
                .bind(cidr)
                .execute(&mut *tx)
                .await?;
                report.network_exclusions += 1;
            }
        }

        tx.commit().await?;
        tracing::info!(
            networks = report.networks_upserted,
            global_exclusions = report.global_exclusions,
            network_exclusions = report.network_exclusions,
            "Seeded networks from configuration"
        );
        Ok(report)
    }
}
