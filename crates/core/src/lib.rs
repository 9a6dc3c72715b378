//! Reactive collection synchronization for the school operations dashboard.
//!
//! - [`sync`]: filtered live views over remote collections, the change-event
//!   normalizer and mirror store behind them, and the CRUD write facade.
//! - [`sessions`]: the session status lifecycle and its workflow service.

pub mod config;
pub mod entity;
pub mod errors;
pub mod sessions;
pub mod sync;

pub use config::SyncConfig;
pub use entity::{Entity, Record};
pub use errors::{Error, RemoteFailure, Result, RetryClass};
