//! Persistence port for detected patterns.
//!
//! The detection core never calls a repository inside its evolution loop; a
//! driver persists patterns after completion or at drain points. The sqlite
//! implementation here is the reference: one `seed_pattern` row per pattern
//! with the block list embedded as JSON.

pub mod sqlite;

use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{PatternInstance, PatternStatus};

pub use sqlite::SqliteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] refinery::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt row for '{id}': {message}")]
    Corrupt { id: String, message: String },
}

/// Pattern store port. Implementations must be safe to share across ticker
/// workers; writes happen outside the detection loop.
pub trait PatternRepository: Send + Sync {
    fn save(&self, pattern: &PatternInstance) -> Result<(), RepositoryError>;

    fn save_all(&self, patterns: &[PatternInstance]) -> Result<usize, RepositoryError>;

    fn find_by_id(&self, pattern_id: &str) -> Result<Option<PatternInstance>, RepositoryError>;

    fn find_by_ticker(
        &self,
        ticker: &str,
        status: Option<PatternStatus>,
    ) -> Result<Vec<PatternInstance>, RepositoryError>;

    /// Patterns whose root block started inside `[from, to]`, inclusive.
    fn find_by_date_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PatternInstance>, RepositoryError>;

    fn exists(&self, pattern_id: &str) -> Result<bool, RepositoryError>;

    fn delete(&self, pattern_id: &str) -> Result<bool, RepositoryError>;
}
