//! Core engine modules - event bus and collection events
//!
//! These modules are independent of any view.

pub mod collection_events;
pub mod event_bus;

// Re-exports for convenience
pub use collection_events::{ChangeKind, CollectionEvent, LegendAspect};
pub use event_bus::{EventBus, EventEmitter, SubscriptionId, SharedEmitter};
