//! API key issuance, lookup, and validation.
//!
//! Keys are opaque `sk_`-prefixed tokens. Only the SHA-256 hash and a short
//! display prefix are stored; the clear key is returned exactly once at
//! creation and never logged. Lookup narrows candidates through the indexed
//! prefix, then compares hashes in constant time.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use scanorama_core::types::{ApiKey, IssuedKey};

use crate::client::{Store, StoreError};

/// Characters of random material after the `sk_` prefix.
const KEY_RANDOM_LEN: usize = 40;

/// Stored/display prefix length, including `sk_`.
pub const KEY_PREFIX_LEN: usize = 8;

/// Generate a fresh clear-text key.
fn generate_key() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(KEY_RANDOM_LEN)
        .map(char::from)
        .collect();
    format!("sk_{random}")
}

/// Hex SHA-256 of the full clear key.
fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Constant-time equality over the hex digests. Both inputs are
/// fixed-length hashes, so length never leaks key material.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn key_from_row(row: &PgRow) -> Result<ApiKey, StoreError> {
    Ok(ApiKey {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        key_prefix: row.try_get("key_prefix")?,
        key_hash: row.try_get("key_hash")?,
        is_active: row.try_get("is_active")?,
        expires_at: row.try_get("expires_at")?,
        last_used_at: row.try_get("last_used_at")?,
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}

const KEY_COLS: &str =
    "id, name, key_prefix, key_hash, is_active, expires_at, last_used_at, notes, created_at";

impl Store {
    /// Issue a new key. The returned [`IssuedKey`] is the only place the
    /// clear key ever exists.
    pub async fn create_api_key(
        &self,
        name: &str,
        expires_at: Option<DateTime<Utc>>,
        notes: Option<&str>,
    ) -> Result<IssuedKey, StoreError> {
        let key = generate_key();
        let prefix = &key[..KEY_PREFIX_LEN];
        let hash = hash_key(&key);

        let sql = format!(
            "INSERT INTO api_keys (id, name, key_prefix, key_hash, expires_at, notes)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {KEY_COLS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(prefix)
            .bind(&hash)
            .bind(expires_at)
            .bind(notes)
            .fetch_one(self.pool())
            .await?;
        let metadata = key_from_row(&row)?;

        tracing::info!(name = %name, prefix = %metadata.key_prefix, "Issued API key");
        Ok(IssuedKey { key, metadata })
    }

    /// Validate a presented key.
    ///
    /// Candidates are narrowed by prefix, every candidate's hash is compared
    /// in constant time, and the first active non-expired match wins with a
    /// `last_used_at` update. A hash match on a disabled or expired row
    /// yields `Forbidden`; no match at all yields `Unauthorized`.
    pub async fn authenticate_api_key(&self, presented: &str) -> Result<ApiKey, StoreError> {
        if presented.len() < KEY_PREFIX_LEN {
            return Err(StoreError::Unauthorized);
        }
        let prefix = &presented[..KEY_PREFIX_LEN];
        let hash = hash_key(presented);

        let sql = format!("SELECT {KEY_COLS} FROM api_keys WHERE key_prefix = $1");
        let rows = sqlx::query(&sql)
            .bind(prefix)
            .fetch_all(self.pool())
            .await?;

        let now = Utc::now();
        let mut recognized_but_unusable = false;
        for row in &rows {
            let candidate = key_from_row(row)?;
            if !constant_time_eq(&hash, &candidate.key_hash) {
                continue;
            }
            if candidate.is_usable(now) {
                sqlx::query("UPDATE api_keys SET last_used_at = now() WHERE id = $1")
                    .bind(candidate.id)
                    .execute(self.pool())
                    .await?;
                return Ok(candidate);
            }
            recognized_but_unusable = true;
        }

        if recognized_but_unusable {
            Err(StoreError::Forbidden)
        } else {
            Err(StoreError::Unauthorized)
        }
    }

    /// Metadata listing; never exposes hashes or clear keys.
    pub async fn list_api_keys(
        &self,
        show_expired: bool,
        show_inactive: bool,
    ) -> Result<Vec<ApiKey>, StoreError> {
        let sql = format!(
            "SELECT {KEY_COLS} FROM api_keys
             WHERE ($1 OR expires_at IS NULL OR expires_at > now())
               AND ($2 OR is_active)
             ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(show_expired)
            .bind(show_inactive)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(key_from_row).collect()
    }

    /// Look a key up by UUID or by display prefix.
    pub async fn find_api_key(&self, identifier: &str) -> Result<ApiKey, StoreError> {
        let row = if let Ok(id) = identifier.parse::<Uuid>() {
            let sql = format!("SELECT {KEY_COLS} FROM api_keys WHERE id = $1");
            sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?
        } else {
            let sql = format!(
                "SELECT {KEY_COLS} FROM api_keys WHERE key_prefix = $1
                 ORDER BY created_at DESC LIMIT 1"
            );
            sqlx::query(&sql)
                .bind(identifier)
                .fetch_optional(self.pool())
                .await?
        };
        let row = row.ok_or_else(|| StoreError::not_found("api key", identifier))?;
        key_from_row(&row)
    }

    /// Update mutable key metadata.
    pub async fn update_api_key(
        &self,
        id: Uuid,
        name: Option<&str>,
        notes: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ApiKey, StoreError> {
        let sql = format!(
            "UPDATE api_keys SET
               name = COALESCE($2, name),
               notes = COALESCE($3, notes),
               expires_at = COALESCE($4, expires_at)
             WHERE id = $1
             RETURNING {KEY_COLS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(name)
            .bind(notes)
            .bind(expires_at)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| StoreError::not_found("api key", id.to_string()))?;
        key_from_row(&row)
    }

    /// Revocation is irreversible: the row stays for audit but can never
    /// authenticate again.
    pub async fn revoke_api_key(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE api_keys SET is_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("api key", id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_shape() {
        let key = generate_key();
        assert!(key.starts_with("sk_"));
        assert_eq!(key.len(), 3 + KEY_RANDOM_LEN);

        let other = generate_key();
        assert_ne!(key, other);
    }

    #[test]
    fn prefix_is_stable_under_hashing() {
        let key = generate_key();
        let prefix = &key[..KEY_PREFIX_LEN];
        assert!(prefix.starts_with("sk_"));
        // Hashing must not depend on the prefix split.
        assert_eq!(hash_key(&key), hash_key(&key.clone()));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = hash_key("sk_test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, hash_key("sk_Test"));
    }

    #[test]
    fn constant_time_eq_behaviour() {
        let a = hash_key("sk_one");
        let b = hash_key("sk_two");
        assert!(constant_time_eq(&a, &a));
        assert!(!constant_time_eq(&a, &b));
        assert!(!constant_time_eq(&a, &a[..32]));
    }
}
