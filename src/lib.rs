//! PZERO - entity/view synchronization engine
//!
//! Keeps per-view actor registries, trees and tables in step with entity
//! collections. Re-exports all modules for use by binary targets.

// Core engine (event bus, collection events)
pub mod core;

// Data model
pub mod entities;

// Per-view synchronization
pub mod view;

// App modules
pub mod cli;
pub mod config;
pub mod script;
pub mod session;

// Re-export commonly used types from core
pub use core::event_bus::{BoxedEvent, EventBus, EventEmitter, SharedEmitter, SubscriptionId, downcast_event};
pub use core::{ChangeKind, CollectionEvent, LegendAspect};

// Re-export entities
pub use entities::{AttrValue, Attrs, Entity, EntityCollection, EntityFilter, Scene};

// Re-export view
pub use session::Session;
pub use view::{ActorRegistry, SyncController, ViewConfig, ViewProjection};
