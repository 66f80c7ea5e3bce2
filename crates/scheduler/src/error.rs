//! Scheduler-level error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
}
