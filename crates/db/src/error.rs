//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A unique-constraint violation on the terminal-event idempotency key
    /// (`run_id`, `node_id`, `retry_count`, `event_type`) or any other
    /// unique index. Callers treat this as "duplicate delivery, drop silently"
    /// rather than a hard failure.
    #[error("duplicate insert")]
    Duplicate,
}

impl DbError {
    /// Best-effort classification of a raw sqlx error as a unique-constraint
    /// violation, so callers can distinguish "this was already recorded"
    /// from a genuine I/O failure without string-matching at every call site.
    pub fn from_insert(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return DbError::Duplicate;
            }
        }
        DbError::Sqlx(err)
    }
}
