//! View configuration: per-collection profiles, projection layouts and view presets.
//!
//! One [`CollectionProfile`] replaces what used to be a hand-written tree/table
//! module per collection type: hierarchy keys, label keys, default visibility
//! and default property choices are data, not code.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_REBUILD_FRACTION, PROPERTY_NONE};
use crate::entities::filter::EntityFilter;
use crate::entities::keys::{A_FEATURE, A_LOC_ID, A_NAME, A_ROLE, A_SCENARIO, A_TOPOLOGY, A_UID, A_X_SECTION};

/// Collection types known to PZero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Geology,
    XSection,
    Boundary,
    Mesh3D,
    Dom,
    Image,
    Well,
    Fluid,
    Background,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 9] = [
        CollectionKind::Geology,
        CollectionKind::XSection,
        CollectionKind::Boundary,
        CollectionKind::Mesh3D,
        CollectionKind::Dom,
        CollectionKind::Image,
        CollectionKind::Well,
        CollectionKind::Fluid,
        CollectionKind::Background,
    ];

    /// Collection name used in scenes and events
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Geology => "geology",
            CollectionKind::XSection => "xsection",
            CollectionKind::Boundary => "boundary",
            CollectionKind::Mesh3D => "mesh3d",
            CollectionKind::Dom => "dom",
            CollectionKind::Image => "image",
            CollectionKind::Well => "well",
            CollectionKind::Fluid => "fluid",
            CollectionKind::Background => "background",
        }
    }
}

/// How one collection is mirrored in views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionProfile {
    pub collection: String,
    #[serde(default = "default_uid_key")]
    pub uid_key: String,
    #[serde(default = "default_name_key")]
    pub name_key: String,
    /// Column header of the property selector
    #[serde(default = "default_property_key")]
    pub property_key: String,
    /// Grouping keys of the primary tree (empty = flat table)
    #[serde(default)]
    pub hierarchy: Vec<String>,
    /// Visibility of actors created for newly added entities
    #[serde(default)]
    pub default_visible: bool,
    #[serde(default = "default_choices")]
    pub default_property_choices: Vec<String>,
}

fn default_uid_key() -> String {
    A_UID.to_string()
}

fn default_name_key() -> String {
    A_NAME.to_string()
}

fn default_property_key() -> String {
    "show_property".to_string()
}

fn default_choices() -> Vec<String> {
    vec![PROPERTY_NONE.to_string()]
}

fn keys(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

impl CollectionProfile {
    pub fn new(collection: &str, hierarchy: &[&str], default_visible: bool) -> Self {
        Self {
            collection: collection.to_string(),
            uid_key: default_uid_key(),
            name_key: default_name_key(),
            property_key: default_property_key(),
            hierarchy: keys(hierarchy),
            default_visible,
            default_property_choices: default_choices(),
        }
    }

    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.default_property_choices = keys(choices);
        self
    }

    /// Property shown by a fresh actor: the first default choice, None for "none"
    pub fn initial_property(&self) -> Option<String> {
        self.default_property_choices
            .first()
            .filter(|c| c.as_str() != PROPERTY_NONE)
            .cloned()
    }

    /// Stock profile per collection type.
    ///
    /// Geology, fluids, wells, backgrounds and sections start visible; boundaries,
    /// images, meshes and DOMs start hidden.
    pub fn preset(kind: CollectionKind) -> Self {
        let name = kind.as_str();
        let xyz = [PROPERTY_NONE, "X", "Y", "Z"];
        match kind {
            CollectionKind::Geology => Self::new(name, &[A_ROLE, A_FEATURE, A_SCENARIO], true).with_choices(&xyz),
            CollectionKind::Fluid => Self::new(name, &[A_ROLE, A_FEATURE, A_SCENARIO], true).with_choices(&xyz),
            CollectionKind::Background => Self::new(name, &[A_ROLE, A_FEATURE], true).with_choices(&xyz),
            CollectionKind::Well => Self::new(name, &[A_LOC_ID], true).with_choices(&xyz),
            CollectionKind::XSection => Self::new(name, &[], true),
            CollectionKind::Boundary => Self::new(name, &[], false),
            CollectionKind::Mesh3D => Self::new(name, &[], false).with_choices(&xyz),
            CollectionKind::Dom => Self::new(name, &[], false).with_choices(&[PROPERTY_NONE, "X", "Y", "Z", "RGB"]),
            CollectionKind::Image => Self::new(name, &[], false),
        }
    }
}

/// Node arrangement of a projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionLayout {
    #[default]
    Tree,
    Table,
}

/// One tree or table bound to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSpec {
    pub label: String,
    pub collection: String,
    #[serde(default)]
    pub layout: ProjectionLayout,
    /// Overrides the profile hierarchy (ignored for tables)
    #[serde(default)]
    pub hierarchy: Option<Vec<String>>,
}

impl ProjectionSpec {
    pub fn tree(label: &str, collection: &str) -> Self {
        Self {
            label: label.to_string(),
            collection: collection.to_string(),
            layout: ProjectionLayout::Tree,
            hierarchy: None,
        }
    }

    pub fn tree_by(label: &str, collection: &str, hierarchy: &[&str]) -> Self {
        Self {
            hierarchy: Some(keys(hierarchy)),
            ..Self::tree(label, collection)
        }
    }

    pub fn table(label: &str, collection: &str) -> Self {
        Self {
            layout: ProjectionLayout::Table,
            ..Self::tree(label, collection)
        }
    }

    /// Grouping keys actually used for this projection
    pub fn effective_hierarchy(&self, profile: &CollectionProfile) -> Vec<String> {
        match self.layout {
            ProjectionLayout::Table => Vec::new(),
            ProjectionLayout::Tree => self.hierarchy.clone().unwrap_or_else(|| profile.hierarchy.clone()),
        }
    }
}

/// A collection shown in a view, with the view's filter over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundCollection {
    pub profile: CollectionProfile,
    #[serde(default)]
    pub filter: EntityFilter,
}

/// Kind of window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewKind {
    #[serde(rename = "3d")]
    View3D,
    Map,
    XSection { section: String },
    Stereoplot,
}

/// Everything needed to open one view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    pub name: String,
    pub kind: ViewKind,
    pub collections: Vec<BoundCollection>,
    pub projections: Vec<ProjectionSpec>,
    #[serde(default = "default_rebuild_fraction")]
    pub rebuild_fraction: f32,
}

fn default_rebuild_fraction() -> f32 {
    DEFAULT_REBUILD_FRACTION
}

impl ViewConfig {
    pub fn new(name: &str, kind: ViewKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            collections: Vec::new(),
            projections: Vec::new(),
            rebuild_fraction: DEFAULT_REBUILD_FRACTION,
        }
    }

    /// Bind a collection with a filter
    pub fn bind(mut self, profile: CollectionProfile, filter: EntityFilter) -> Self {
        self.collections.push(BoundCollection { profile, filter });
        self
    }

    pub fn project(mut self, spec: ProjectionSpec) -> Self {
        self.projections.push(spec);
        self
    }

    pub fn profile(&self, collection: &str) -> Option<&CollectionProfile> {
        self.collections
            .iter()
            .map(|b| &b.profile)
            .find(|p| p.collection == collection)
    }

    /// Stock view layouts.
    ///
    /// - 3D: every collection, geology with a primary and a topology tree
    /// - Map: everything except 3D-only meshes and DOMs
    /// - XSection: entities drawn on the given section
    /// - Stereoplot: geology orientation data only
    pub fn preset(name: &str, kind: ViewKind) -> Self {
        use CollectionKind as K;
        let geology = K::Geology.as_str();
        let mut cfg = ViewConfig::new(name, kind.clone());
        let standard = |cfg: ViewConfig, kinds: &[K], filter: &EntityFilter| {
            kinds.iter().fold(cfg, |cfg, k| {
                let spec = match k {
                    K::Geology | K::Fluid | K::Background | K::Well => {
                        ProjectionSpec::tree(&format!("{} tree", k.as_str()), k.as_str())
                    }
                    _ => ProjectionSpec::table(&format!("{} table", k.as_str()), k.as_str()),
                };
                cfg.bind(CollectionProfile::preset(*k), filter.clone()).project(spec)
            })
        };
        match kind {
            ViewKind::View3D => {
                cfg = standard(cfg, &K::ALL, &EntityFilter::all());
                cfg = cfg.project(ProjectionSpec::tree_by("topology tree", geology, &[A_TOPOLOGY, A_SCENARIO]));
            }
            ViewKind::Map => {
                let kinds = [K::Geology, K::XSection, K::Boundary, K::Image, K::Well, K::Fluid, K::Background];
                cfg = standard(cfg, &kinds, &EntityFilter::all());
                cfg = cfg.project(ProjectionSpec::tree_by("topology tree", geology, &[A_TOPOLOGY, A_SCENARIO]));
            }
            ViewKind::XSection { ref section } => {
                let on_section = EntityFilter::attr_equals(A_X_SECTION, section);
                cfg = standard(cfg, &[K::Geology, K::Fluid, K::Background, K::Image], &on_section);
            }
            ViewKind::Stereoplot => {
                let attitudes = EntityFilter::attr_one_of(A_TOPOLOGY, &["VertexSet", "XsVertexSet"]);
                cfg = standard(cfg, &[K::Geology], &attitudes);
            }
        }
        cfg
    }
}

/// Read a JSON array of view configs
pub fn load_views<P: AsRef<Path>>(path: P) -> Result<Vec<ViewConfig>> {
    let path = path.as_ref();
    let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let views: Vec<ViewConfig> =
        serde_json::from_str(&json).with_context(|| format!("Invalid view config {}", path.display()))?;
    log::info!("Loaded {} view configs from {}", views.len(), path.display());
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_visibility_presets() {
        let visible: Vec<&str> = CollectionKind::ALL
            .iter()
            .filter(|k| CollectionProfile::preset(**k).default_visible)
            .map(|k| k.as_str())
            .collect();
        assert_eq!(visible, vec!["geology", "xsection", "well", "fluid", "background"]);
    }

    #[test]
    fn test_table_has_no_hierarchy() {
        let profile = CollectionProfile::preset(CollectionKind::Geology);
        assert_eq!(ProjectionSpec::table("t", "geology").effective_hierarchy(&profile), Vec::<String>::new());
        assert_eq!(
            ProjectionSpec::tree("t", "geology").effective_hierarchy(&profile),
            vec![A_ROLE, A_FEATURE, A_SCENARIO]
        );
        assert_eq!(
            ProjectionSpec::tree_by("t", "geology", &[A_TOPOLOGY]).effective_hierarchy(&profile),
            vec![A_TOPOLOGY]
        );
    }

    #[test]
    fn test_initial_property() {
        assert_eq!(CollectionProfile::preset(CollectionKind::Geology).initial_property(), None);
        let profile = CollectionProfile::new("geology", &[], true).with_choices(&["Z", "none"]);
        assert_eq!(profile.initial_property().as_deref(), Some("Z"));
    }

    #[test]
    fn test_presets() {
        let v3d = ViewConfig::preset("3D", ViewKind::View3D);
        assert_eq!(v3d.collections.len(), 9);
        assert_eq!(v3d.projections.len(), 10);
        assert!(v3d.profile("dom").is_some());

        let xs = ViewConfig::preset("XS-1", ViewKind::XSection { section: "XS-1".into() });
        assert!(xs.profile("mesh3d").is_none());
        assert_eq!(xs.projections.len(), 4);
    }

    #[test]
    fn test_view_config_json() {
        let json = r#"{
            "name": "map",
            "kind": { "type": "map" },
            "collections": [ { "profile": { "collection": "geology", "hierarchy": ["role"], "default_visible": true } } ],
            "projections": [ { "label": "geo", "collection": "geology" } ]
        }"#;
        let cfg: ViewConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kind, ViewKind::Map);
        assert_eq!(cfg.rebuild_fraction, DEFAULT_REBUILD_FRACTION);
        assert_eq!(cfg.collections[0].profile.name_key, "name");
        assert_eq!(cfg.collections[0].profile.default_property_choices, vec!["none"]);
        assert_eq!(cfg.projections[0].layout, ProjectionLayout::Tree);

        let kind: ViewKind = serde_json::from_str(r#"{ "type": "3d" }"#).unwrap();
        assert_eq!(kind, ViewKind::View3D);
    }
}
