//! Entity: one uid-addressed row of a collection.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::attrs::{AttrValue, Attrs};
use super::keys::{A_NAME, A_UID};

/// A single geological / well / mesh / image item.
///
/// Geometry itself lives with the renderer; the collection only tracks a
/// revision counter so views can tell an actor must be rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub uid: String,
    #[serde(default)]
    pub attrs: Attrs,
    /// Named data properties with their component count (1 = scalar)
    #[serde(default)]
    pub properties: IndexMap<String, usize>,
    #[serde(default)]
    pub geometry_rev: u64,
}

impl Entity {
    pub fn new(uid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            attrs: Attrs::new().with(A_NAME, name.into()),
            properties: IndexMap::new(),
            geometry_rev: 0,
        }
    }

    /// Builder-style attribute insert
    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attrs.set(key, value);
        self
    }

    /// Builder-style property insert
    pub fn with_property(mut self, name: &str, components: usize) -> Self {
        self.properties.insert(name.to_string(), components.max(1));
        self
    }

    pub fn name(&self) -> &str {
        self.attrs.get_str(A_NAME).unwrap_or(&self.uid)
    }

    /// Attribute lookup where `uid` resolves to the entity uid itself
    pub fn attribute(&self, key: &str) -> Option<AttrValue> {
        if key == A_UID {
            return Some(AttrValue::Str(self.uid.clone()));
        }
        self.attrs.get(key).cloned()
    }

    pub fn property_list(&self) -> Vec<(String, usize)> {
        self.properties.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}
