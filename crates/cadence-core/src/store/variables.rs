//! Variable store port.
//!
//! Variables are per-user (user_id, key) -> value pairs, set from inside
//! running steps and read by any step owned by the same user. Values are
//! encrypted at rest by the implementation; the engine only ever sees
//! plaintext.

use cadence_types::error::RepositoryError;
use cadence_types::variable::Variable;
use std::collections::HashMap;
use uuid::Uuid;

/// Trait for per-user variable persistence.
///
/// Uses RPITIT (native async fn in traits, Rust 2024 edition).
/// Implementations live in cadence-infra.
pub trait VariableStore: Send + Sync {
    /// Get a variable by key. Returns None if it does not exist.
    fn get(
        &self,
        user_id: &Uuid,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Variable>, RepositoryError>> + Send;

    /// Set a variable (upsert on the unique (user_id, key) pair).
    fn set(
        &self,
        user_id: &Uuid,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a variable. No-op if it does not exist.
    fn delete(
        &self,
        user_id: &Uuid,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List all variables for a user.
    fn list(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<Variable>, RepositoryError>> + Send;

    /// All of a user's variables as a key -> value map, for environment
    /// resolution during payload building.
    fn resolve_map(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<HashMap<String, String>, RepositoryError>> + Send
    {
        async move {
            let variables = self.list(user_id).await?;
            Ok(variables.into_iter().map(|v| (v.key, v.value)).collect())
        }
    }
}
