//! 生命周期事件与事件总线

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventHandler, WILDCARD};
pub use event::{EventEnvelope, HiveEvent};
