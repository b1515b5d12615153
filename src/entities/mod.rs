//! Entities module - data model shared by every view
//!
//! Collections own entities and announce every mutation through
//! [`CollectionEvent`](crate::core::CollectionEvent)s. Views read them through
//! the [`EntitySource`] trait only.

pub mod attrs;
pub mod collection;
pub mod entity;
pub mod filter;
pub mod keys;
pub mod scene;
pub mod traits;

pub use attrs::{AttrValue, Attrs};
pub use collection::{EntityCollection, SceneError};
pub use entity::Entity;
pub use filter::{EntityFilter, Filter};
pub use scene::Scene;
pub use traits::EntitySource;
