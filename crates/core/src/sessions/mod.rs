//! Scheduled teaching sessions: status lifecycle, guard predicates and the
//! workflow service that drives them through the sync layer.

mod session_lifecycle;
mod session_model;
mod session_service;

pub use session_lifecycle::*;
pub use session_model::*;
pub use session_service::*;
