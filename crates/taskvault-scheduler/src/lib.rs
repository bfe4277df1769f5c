//! # TaskVault Scheduler
//!
//! The task state machine and the Vault that drives it.
//!
//! ## Architecture
//! ```text
//! submit(payload) ─→ KindRegistry ─→ Task ─→ Vault
//!                                            ├── queued   (waiting for start_at / dependencies)
//!                                            ├── ready    (due, waiting for weight budget)
//!                                            ├── running  (one tokio task per run)
//!                                            └── done     (terminal, trimmed to retention)
//!
//! Task ─ repeat: false | true | N | "every 5m" | "after 1h" | "*/10 * * * *"
//!      └─ kinds: command, script, sleep, message, poll, watch_folder
//! ```

pub mod cron;
pub mod kinds;
pub mod registry;
pub mod repeat;
pub mod runnable;
pub mod task;
pub mod vault;

pub use cron::CronSchedule;
pub use registry::{KindRegistry, TaskPayload};
pub use repeat::Repeat;
pub use runnable::{Runnable, TaskContext};
pub use task::{QueueKind, Task, TaskId, TaskRecord, TaskSnapshot, TaskStatus};
pub use vault::{QueueCounts, TickReport, Vault};
