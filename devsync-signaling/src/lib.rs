//! # devsync signaling
//!
//! The cross-tab coordinator contract: messages exchanged between a tab's
//! device sessions and the singleton background controller, the bus they
//! travel on, and the shared key-value store sessions publish into.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod protocol;
pub mod store;

// Re-export main types
pub use bus::{CoordinatorBus, MemoryBus};
pub use protocol::{InboundMessage, OutboundMessage, StoredCamera};
pub use store::{active_key, device_key, keys, KeyValueStore, MemoryStore, PersistedState, StoreChange};
