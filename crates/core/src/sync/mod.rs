//! Reactive collection synchronization: filtered views kept current from a
//! change feed, and the write facade whose results reach views via that feed.

mod change;
mod crud;
mod filter;
mod memory;
mod mirror;
mod reconnect;
mod remote;
mod view;

pub use change::*;
pub use crud::*;
pub use filter::*;
pub use memory::*;
pub use mirror::*;
pub use reconnect::*;
pub use remote::*;
pub use view::*;
