//! Scene: ordered set of named entity collections.
//!
//! The scene is the unit of serialization. On disk it is a JSON document:
//!
//! ```json
//! { "collections": [ { "name": "geology", "entities": [ { "uid": "1", "attrs": { "name": "F1" } } ] } ] }
//! ```
//!
//! Runtime-only state (the event emitter) is re-attached after loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::info;
use serde::{Deserialize, Serialize};

use super::collection::{EntityCollection, SceneError};
use super::entity::Entity;
use super::traits::EntitySource;
use crate::core::event_bus::SharedEmitter;

#[derive(Debug, Default)]
pub struct Scene {
    collections: IndexMap<String, EntityCollection>,
    emitter: SharedEmitter,
}

#[derive(Serialize, Deserialize)]
struct SceneFile {
    #[serde(default)]
    collections: Vec<CollectionFile>,
}

#[derive(Serialize, Deserialize)]
struct CollectionFile {
    name: String,
    #[serde(default)]
    entities: Vec<Entity>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire every collection (present and future) to the given emitter
    pub fn set_emitter(&mut self, emitter: SharedEmitter) {
        for coll in self.collections.values_mut() {
            coll.set_emitter(emitter.clone());
        }
        self.emitter = emitter;
    }

    /// Get or create a collection
    pub fn ensure_collection(&mut self, name: &str) -> &mut EntityCollection {
        let emitter = self.emitter.clone();
        self.collections.entry(name.to_string()).or_insert_with(|| {
            let mut coll = EntityCollection::new(name);
            coll.set_emitter(emitter);
            coll
        })
    }

    pub fn collection(&self, name: &str) -> Option<&EntityCollection> {
        self.collections.get(name)
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut EntityCollection, SceneError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| SceneError::UnknownCollection(name.to_string()))
    }

    /// Read-only source for views
    pub fn source(&self, name: &str) -> Option<&dyn EntitySource> {
        self.collections.get(name).map(|c| c as &dyn EntitySource)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(|k| k.as_str())
    }

    /// Total entity count over all collections
    pub fn entity_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: SceneFile = serde_json::from_str(json).context("Parse scene error")?;
        let mut scene = Scene::new();
        for cf in file.collections {
            // Loading is silent: views populate from query() when they open
            scene
                .ensure_collection(&cf.name)
                .add_entities(cf.entities)
                .with_context(|| format!("Invalid collection '{}'", cf.name))?;
        }
        Ok(scene)
    }

    pub fn to_json_string(&self) -> Result<String> {
        let file = SceneFile {
            collections: self
                .collections
                .values()
                .map(|c| CollectionFile {
                    name: c.name().to_string(),
                    entities: c.iter().cloned().collect(),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&file).context("Serialize scene error")
    }

    /// Load scene from JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Read scene error: {}", path.display()))?;
        let scene = Self::from_json_str(&json)?;
        info!(
            "Loaded scene {} ({} collections, {} entities)",
            path.display(),
            scene.collections.len(),
            scene.entity_count()
        );
        Ok(scene)
    }

    /// Save scene to JSON file (adds .json extension if missing)
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let path = if path.extension().and_then(|s| s.to_str()) != Some("json") {
            path.with_extension("json")
        } else {
            path.to_path_buf()
        };
        fs::write(&path, self.to_json_string()?)
            .with_context(|| format!("Write scene error: {}", path.display()))?;
        Ok(())
    }
}
