//! View module - per-window synchronization engine
//!
//! A view owns one [`ActorRegistry`], any number of [`ViewProjection`]s and a
//! [`SelectionManager`], all driven by one [`SyncController`].

pub mod actor_registry;
pub mod projection;
pub mod renderer;
pub mod selection;
pub mod sync;
pub mod view_config;
pub mod view_events;

pub use actor_registry::{ActorDescriptor, ActorRegistry, RegistryError};
pub use projection::{CheckState, NodeId, OutlineEntry, ProjectionId, ToggleDelta, ToggleTarget, ViewProjection};
pub use renderer::{ActorContent, ActorHandle, HeadlessRenderer, Renderer};
pub use selection::SelectionManager;
pub use sync::SyncController;
pub use view_config::{
    BoundCollection, CollectionKind, CollectionProfile, ProjectionLayout, ProjectionSpec, ViewConfig, ViewKind,
};
pub use view_events::{SelectionChangedEvent, ShowPropertyChangedEvent, VisibilityChangedEvent};
