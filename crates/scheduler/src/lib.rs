//! `scheduler` crate — the tick loop that promotes time-based work the
//! Orchestrator can't react to on its own: delay wakeups, cron fires,
//! webhook-wait timeouts, map-batch timeouts, and stale-run reaping
//! (§4.5, §6).

pub mod cron;
pub mod error;
pub mod tick;

pub use error::SchedulerError;
pub use tick::{run_tick, TickConfig};
