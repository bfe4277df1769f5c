//! # TaskVault Runtime
//!
//! Composes the long-lived components into one process and keeps them alive.
//!
//! ```text
//!            ┌──────────── Sentry (restarts dead components) ───────────┐
//!            ▼                         ▼                                ▼
//!   MessageBus ◀──drain── Vault ◀──submit── RecipeLoader (*.toml/*.json)
//!                           ▲
//!                           └──── ApiServer (axum, /api/v1/...)
//! ```

pub mod api;
pub mod health;
pub mod recipes;
pub mod sentry;
pub mod server;

pub use api::{ApiServer, AppState, build_router};
pub use health::{Health, HealthProbe};
pub use recipes::{RecipeLoader, ScanReport};
pub use sentry::{Sentry, SentryReport};
pub use server::Runtime;
