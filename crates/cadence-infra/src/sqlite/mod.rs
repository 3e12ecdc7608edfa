//! SQLite persistence implementations.

pub mod engine;
pub mod pool;
pub mod variable;

pub use engine::SqliteEngineRepository;
pub use pool::{DatabasePool, default_database_url};
pub use variable::SqliteVariableStore;
