//! Entity collection events.
//!
//! Every mutation of an [`EntityCollection`](crate::entities::EntityCollection)
//! emits exactly one [`CollectionEvent`] carrying the collection name, the kind
//! of change and the affected uids. Views subscribe to this single event type and
//! filter on the collection name.
//!
//! # Kinds
//!
//! - `Added` / `Removed`: structural, registry rows and projection leaves follow.
//! - `GeomModified`: actor is replaced in place, visibility and property kept.
//! - `DataKeysModified`: property list changed, selectors are refreshed.
//! - `DataValModified`: values of existing properties changed, actors showing a
//!   property are redrawn.
//! - `MetadataModified`: attributes changed (name, role, feature, ...), leaves are
//!   relabelled or relocated when hierarchy-relevant values moved.
//! - `Legend*Modified`: appearance only, forwarded to the renderer.

use serde::{Deserialize, Serialize};

/// Kind of collection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Removed,
    GeomModified,
    DataKeysModified,
    DataValModified,
    MetadataModified,
    LegendColorModified,
    LegendThickModified,
    LegendPointSizeModified,
    LegendOpacityModified,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Removed => "removed",
            ChangeKind::GeomModified => "geom_modified",
            ChangeKind::DataKeysModified => "data_keys_modified",
            ChangeKind::DataValModified => "data_val_modified",
            ChangeKind::MetadataModified => "metadata_modified",
            ChangeKind::LegendColorModified => "legend_color_modified",
            ChangeKind::LegendThickModified => "legend_thick_modified",
            ChangeKind::LegendPointSizeModified => "legend_point_size_modified",
            ChangeKind::LegendOpacityModified => "legend_opacity_modified",
        }
    }

    /// Appearance aspect for legend changes, None for everything else
    pub fn legend_aspect(&self) -> Option<LegendAspect> {
        match self {
            ChangeKind::LegendColorModified => Some(LegendAspect::Color),
            ChangeKind::LegendThickModified => Some(LegendAspect::Thickness),
            ChangeKind::LegendPointSizeModified => Some(LegendAspect::PointSize),
            ChangeKind::LegendOpacityModified => Some(LegendAspect::Opacity),
            _ => None,
        }
    }
}

/// Appearance aspect touched by a legend change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegendAspect {
    Color,
    Thickness,
    PointSize,
    Opacity,
}

/// Emitted by a collection after it mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEvent {
    pub collection: String,
    pub kind: ChangeKind,
    pub uids: Vec<String>,
}

impl CollectionEvent {
    pub fn new(collection: impl Into<String>, kind: ChangeKind, uids: Vec<String>) -> Self {
        Self {
            collection: collection.into(),
            kind,
            uids,
        }
    }
}
