//! Event model and bus

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use types::{Event, EventType};
