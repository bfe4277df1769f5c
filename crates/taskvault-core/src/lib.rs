//! # TaskVault Core
//!
//! Shared building blocks for every TaskVault crate:
//! configuration, the error type, structured events with their bounded
//! per-source queues, and the `Component` contract the supervisor relies on.

pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod service;

pub use component::{Component, ComponentStatus, EventSource};
pub use config::TaskVaultConfig;
pub use error::{Result, VaultError};
pub use event::{Event, EventQueue, Severity};
pub use service::ServiceLoop;
