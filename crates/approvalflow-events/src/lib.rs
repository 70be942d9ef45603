//! # ApprovalFlow Events
//!
//! In-process event bus with at-least-once delivery.
//!
//! ## Features
//!
//! - Topic routing (`workflow-events`, `task-events`, `approval-events`)
//! - Redelivery with a fixed delay and a dead-letter list
//! - Cascade handler that feeds task terminal events back into the engine

pub mod bus;
pub mod error;
pub mod handler;
pub mod subscriber;

pub use bus::{Delivery, EventBus, Subscription};
pub use error::BusError;
pub use handler::{CascadeHandler, EventHandler};
pub use subscriber::{EventSubscriber, SubscriberStats};
