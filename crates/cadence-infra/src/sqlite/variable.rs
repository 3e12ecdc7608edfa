//! SQLite variable store with encrypted values.
//!
//! Implements `VariableStore` from `cadence-core`. Values are encrypted
//! with AES-256-GCM before hitting disk and decrypted on read; the database
//! never sees plaintext.

use cadence_core::store::VariableStore;
use cadence_types::error::RepositoryError;
use cadence_types::variable::Variable;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use crate::crypto::ValueCipher;

/// SQLite-backed, encrypted-at-rest implementation of `VariableStore`.
pub struct SqliteVariableStore {
    pool: DatabasePool,
    cipher: ValueCipher,
}

impl SqliteVariableStore {
    /// Create a new variable store backed by the given pool and cipher.
    pub fn new(pool: DatabasePool, cipher: ValueCipher) -> Self {
        Self { pool, cipher }
    }

    fn decrypt_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Variable, RepositoryError> {
        let q = |e: sqlx::Error| RepositoryError::Query(e.to_string());

        let user_id: String = row.try_get("user_id").map_err(q)?;
        let key: String = row.try_get("key").map_err(q)?;
        let value: String = row.try_get("value").map_err(q)?;
        let description: Option<String> = row.try_get("description").map_err(q)?;
        let created_at: String = row.try_get("created_at").map_err(q)?;
        let updated_at: String = row.try_get("updated_at").map_err(q)?;

        Ok(Variable {
            user_id: Uuid::parse_str(&user_id)
                .map_err(|e| RepositoryError::Query(format!("invalid user_id: {e}")))?,
            key,
            value: self
                .cipher
                .decrypt(&value)
                .map_err(|e| RepositoryError::Query(format!("value decryption failed: {e}")))?,
            description,
            created_at: parse_datetime(&created_at)?,
            updated_at: parse_datetime(&updated_at)?,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

impl VariableStore for SqliteVariableStore {
    async fn get(
        &self,
        user_id: &Uuid,
        key: &str,
    ) -> Result<Option<Variable>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM variables WHERE user_id = ? AND key = ?")
            .bind(user_id.to_string())
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(|r| self.decrypt_row(r)).transpose()
    }

    async fn set(
        &self,
        user_id: &Uuid,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let encrypted = self
            .cipher
            .encrypt(value)
            .map_err(|e| RepositoryError::Query(format!("value encryption failed: {e}")))?;

        sqlx::query(
            r#"INSERT INTO variables (user_id, key, value, description, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (user_id, key) DO UPDATE SET
                   value = excluded.value,
                   description = COALESCE(excluded.description, description),
                   updated_at = excluded.updated_at"#,
        )
        .bind(user_id.to_string())
        .bind(key)
        .bind(&encrypted)
        .bind(description)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, user_id: &Uuid, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM variables WHERE user_id = ? AND key = ?")
            .bind(user_id.to_string())
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn list(&self, user_id: &Uuid) -> Result<Vec<Variable>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM variables WHERE user_id = ? ORDER BY key")
            .bind(user_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(|r| self.decrypt_row(r)).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
