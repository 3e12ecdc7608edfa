//! User variable types.
//!
//! A `Variable` is a per-user (user_id, key) -> value pair usable from
//! inside running steps. Values are encrypted at rest by the storage
//! implementation; in memory they are plaintext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted per-user key/value pair.
///
/// Unique per (user_id, key); `set` upserts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub user_id: Uuid,
    pub key: String,
    /// Decrypted value. Never logged.
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
