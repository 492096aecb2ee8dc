//! Host and port-observation persistence.
//!
//! Host upserts are keyed by IP address: `first_seen` and `ignore_scanning`
//! survive every re-observation, `last_seen` always advances.

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use scanorama_core::types::{DiscoveryMethod, Host, HostStatus, PortObservation, Protocol};

use crate::client::{Store, StoreError};

/// Filters for host listings.
#[derive(Debug, Default, Clone)]
pub struct HostFilter {
    pub status: Option<HostStatus>,
    pub os_family: Option<String>,
    /// Only hosts seen within this window.
    pub last_seen_within: Option<Duration>,
    /// Include hosts flagged `ignore_scanning`.
    pub show_ignored: bool,
}

fn host_from_row(row: &PgRow) -> Result<Host, StoreError> {
    let status: String = row.try_get("status")?;
    let method: String = row.try_get("discovery_method")?;
    Ok(Host {
        id: row.try_get("id")?,
        ip_address: row.try_get("ip_address")?,
        status: status
            .parse()
            .map_err(|e: String| StoreError::invalid("hosts.status", e))?,
        os_family: row.try_get("os_family")?,
        os_name: row.try_get("os_name")?,
        discovery_method: method
            .parse()
            .map_err(|e: String| StoreError::invalid("hosts.discovery_method", e))?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
        ignore_scanning: row.try_get("ignore_scanning")?,
    })
}

fn observation_from_row(row: &PgRow) -> Result<PortObservation, StoreError> {
    let protocol: String = row.try_get("protocol")?;
    let state: String = row.try_get("state")?;
    let port: i32 = row.try_get("port")?;
    Ok(PortObservation {
        id: row.try_get("id")?,
        host_id: row.try_get("host_id")?,
        scan_job_id: row.try_get("scan_job_id")?,
        port: u16::try_from(port)
            .map_err(|_| StoreError::invalid("port_observations.port", port.to_string()))?,
        protocol: protocol
            .parse()
            .map_err(|e: String| StoreError::invalid("port_observations.protocol", e))?,
        state: state
            .parse()
            .map_err(|e: String| StoreError::invalid("port_observations.state", e))?,
        service: row.try_get("service")?,
        version: row.try_get("version")?,
        observed_at: row.try_get("observed_at")?,
    })
}

const HOST_COLS: &str = "id, ip_address, status, os_family, os_name, discovery_method, \
     first_seen, last_seen, ignore_scanning";

impl Store {
    /// Upsert a host observation keyed by IP.
    ///
    /// On conflict the row keeps `first_seen` and `ignore_scanning`; status,
    /// method, and `last_seen` are refreshed, and OS details only overwrite
    /// when the new observation actually carries them.
    pub async fn upsert_host(
        &self,
        ip_address: &str,
        status: HostStatus,
        method: DiscoveryMethod,
        os_family: Option<&str>,
        os_name: Option<&str>,
        seen_at: DateTime<Utc>,
    ) -> Result<Host, StoreError> {
        let sql = format!(
            "INSERT INTO hosts
               (id, ip_address, status, os_family, os_name, discovery_method, first_seen, last_seen)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             ON CONFLICT (ip_address) DO UPDATE SET
               status = EXCLUDED.status,
               discovery_method = EXCLUDED.discovery_method,
               os_family = COALESCE(EXCLUDED.os_family, hosts.os_family),
               os_name = COALESCE(EXCLUDED.os_name, hosts.os_name),
               last_seen = EXCLUDED.last_seen
             RETURNING {HOST_COLS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(ip_address)
            .bind(status.as_str())
            .bind(os_family)
            .bind(os_name)
            .bind(method.as_str())
            .bind(seen_at)
            .fetch_one(self.pool())
            .await?;
        host_from_row(&row)
    }

    pub async fn get_host_by_ip(&self, ip_address: &str) -> Result<Host, StoreError> {
        let sql = format!("SELECT {HOST_COLS} FROM hosts WHERE ip_address = $1");
        let row = sqlx::query(&sql)
            .bind(ip_address)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("host", ip_address))?;
        host_from_row(&row)
    }

    /// List hosts matching a filter, most recently seen first.
    pub async fn list_hosts(&self, filter: &HostFilter) -> Result<Vec<Host>, StoreError> {
        let mut sql = format!("SELECT {HOST_COLS} FROM hosts WHERE TRUE");
        if !filter.show_ignored {
            sql.push_str(" AND NOT ignore_scanning");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = $1");
        } else {
            sql.push_str(" AND ($1::text IS NULL)");
        }
        if filter.os_family.is_some() {
            sql.push_str(" AND os_family = $2");
        } else {
            sql.push_str(" AND ($2::text IS NULL)");
        }
        if filter.last_seen_within.is_some() {
            sql.push_str(" AND last_seen >= $3");
        } else {
            sql.push_str(" AND ($3::timestamptz IS NULL)");
        }
        sql.push_str(" ORDER BY last_seen DESC");

        let cutoff = filter.last_seen_within.map(|w| Utc::now() - w);
        let rows = sqlx::query(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.os_family.as_deref())
            .bind(cutoff)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(host_from_row).collect()
    }

    /// Hosts eligible for automatic scanning: up, not ignored, optionally
    /// restricted to one OS family.
    pub async fn live_hosts(&self, os_family: Option<&str>) -> Result<Vec<Host>, StoreError> {
        let sql = format!(
            "SELECT {HOST_COLS} FROM hosts
             WHERE status = 'up' AND NOT ignore_scanning
               AND ($1::text IS NULL OR os_family = $1)
             ORDER BY ip_address"
        );
        let rows = sqlx::query(&sql)
            .bind(os_family)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(host_from_row).collect()
    }

    /// Flag or unflag a host as excluded from automatic scans. The host
    /// stays visible in listings either way.
    pub async fn set_ignore_scanning(
        &self,
        ip_address: &str,
        ignore: bool,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE hosts SET ignore_scanning = $2 WHERE ip_address = $1")
            .bind(ip_address)
            .bind(ignore)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("host", ip_address));
        }
        Ok(())
    }

    // ── Port observations ────────────────────────────────────────

    /// Insert one scan's observations for a host in a single transaction.
    pub async fn insert_port_observations(
        &self,
        host_id: Uuid,
        scan_job_id: Option<Uuid>,
        observations: &[(u16, Protocol, scanorama_core::types::PortState, Option<String>, Option<String>)],
        observed_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool().begin().await?;
        for (port, protocol, state, service, version) in observations {
            sqlx::query(
                "INSERT INTO port_observations
                   (id, host_id, scan_job_id, port, protocol, state, service, version, observed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(host_id)
            .bind(scan_job_id)
            .bind(i32::from(*port))
            .bind(protocol.as_str())
            .bind(state.as_str())
            .bind(service.as_deref())
            .bind(version.as_deref())
            .bind(observed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(observations.len())
    }

    /// Latest observations for one host, newest first.
    pub async fn observations_for_host(
        &self,
        host_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PortObservation>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, host_id, scan_job_id, port, protocol, state, service, version, observed_at
             FROM port_observations
             WHERE host_id = $1
             ORDER BY observed_at DESC, port
             LIMIT $2",
        )
        .bind(host_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(observation_from_row).collect()
    }

    /// Host/port aggregates for `networks stats`: counts of hosts seen up
    /// and distinct open ports observed.
    pub async fn host_counts(&self) -> Result<(i64, i64), StoreError> {
        let row = sqlx::query(
            "SELECT
               (SELECT count(*) FROM hosts) AS total,
               (SELECT count(*) FROM hosts WHERE status = 'up') AS up",
        )
        .fetch_one(self.pool())
        .await?;
        Ok((row.try_get("total")?, row.try_get("up")?))
    }
}
