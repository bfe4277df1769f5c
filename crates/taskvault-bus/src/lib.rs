//! # TaskVault Bus
//!
//! In-process message bus. Tasks and components emit into bounded event
//! queues; the bus drains them and routes each event to the handlers whose
//! severity floor and alert conditions it passes.
//!
//! ```text
//! Vault / Sentry / RecipeLoader ──drain──→ MessageBus ──→ log (tracing)
//!                     bus.push(event) ───↗             ├→ file (JSON lines)
//!                                                       └→ webhook (HTTP POST)
//! ```

pub mod bus;
pub mod condition;
pub mod handlers;

pub use bus::{BusStats, MessageBus};
pub use condition::Condition;
pub use handlers::{Handler, HandlerTarget};
