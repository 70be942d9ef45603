//! Shared domain types.

mod common;
mod definition;
mod event;
mod instance;
mod task;

pub use common::*;
pub use definition::*;
pub use event::*;
pub use instance::*;
pub use task::*;
