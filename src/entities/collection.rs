//! EntityCollection: uid-indexed mutable store with a typed event stream.
//!
//! All mutation goes through the methods below, and every method that changed
//! something emits exactly one [`CollectionEvent`] listing the affected uids.
//! Views never touch rows directly.

use indexmap::IndexMap;
use log::{debug, trace};

use super::attrs::AttrValue;
use super::entity::Entity;
use super::filter::{EntityFilter, Filter};
use super::traits::EntitySource;
use crate::core::collection_events::{ChangeKind, CollectionEvent, LegendAspect};
use crate::core::event_bus::SharedEmitter;

/// Collection errors
#[derive(Debug, Clone, PartialEq)]
pub enum SceneError {
    UnknownCollection(String),
    DuplicateUid { collection: String, uid: String },
}

impl std::fmt::Display for SceneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneError::UnknownCollection(name) => write!(f, "Unknown collection: {}", name),
            SceneError::DuplicateUid { collection, uid } => {
                write!(f, "Duplicate uid {} in collection {}", uid, collection)
            }
        }
    }
}

impl std::error::Error for SceneError {}

#[derive(Debug, Clone, Default)]
pub struct EntityCollection {
    name: String,
    entities: IndexMap<String, Entity>,
    emitter: SharedEmitter,
}

impl EntityCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: IndexMap::new(),
            emitter: SharedEmitter::dummy(),
        }
    }

    pub fn set_emitter(&mut self, emitter: SharedEmitter) {
        self.emitter = emitter;
    }

    pub fn get(&self, uid: &str) -> Option<&Entity> {
        self.entities.get(uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn emit(&self, kind: ChangeKind, uids: Vec<String>) {
        if uids.is_empty() {
            return;
        }
        trace!("{}: {} {:?}", self.name, kind.as_str(), uids);
        self.emitter.emit(CollectionEvent::new(self.name.clone(), kind, uids));
    }

    /// Keep only uids present in the collection, in the given order, without repeats
    fn existing(&self, uids: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(uids.len());
        for uid in uids {
            if !self.entities.contains_key(uid) {
                debug!("{}: uid {} not found", self.name, uid);
                continue;
            }
            if !out.contains(uid) {
                out.push(uid.clone());
            }
        }
        out
    }

    // === Structural ===

    /// Insert entities. Fails without inserting anything if any uid is taken.
    pub fn add_entities(&mut self, entities: Vec<Entity>) -> Result<Vec<String>, SceneError> {
        for (i, e) in entities.iter().enumerate() {
            let repeated = entities[..i].iter().any(|o| o.uid == e.uid);
            if repeated || self.entities.contains_key(&e.uid) {
                return Err(SceneError::DuplicateUid {
                    collection: self.name.clone(),
                    uid: e.uid.clone(),
                });
            }
        }
        let uids: Vec<String> = entities.iter().map(|e| e.uid.clone()).collect();
        for e in entities {
            self.entities.insert(e.uid.clone(), e);
        }
        self.emit(ChangeKind::Added, uids.clone());
        Ok(uids)
    }

    /// Remove entities, returning the uids that were actually present
    pub fn remove_entities(&mut self, uids: &[String]) -> Vec<String> {
        let removed = self.existing(uids);
        for uid in &removed {
            self.entities.shift_remove(uid);
        }
        self.emit(ChangeKind::Removed, removed.clone());
        removed
    }

    // === Geometry / data ===

    /// Geometry was replaced (bumps the revision of each uid)
    pub fn replace_geometry(&mut self, uids: &[String]) -> Vec<String> {
        let hit = self.existing(uids);
        for uid in &hit {
            if let Some(e) = self.entities.get_mut(uid) {
                e.geometry_rev += 1;
            }
        }
        self.emit(ChangeKind::GeomModified, hit.clone());
        hit
    }

    /// Add (or resize) a data property on one entity
    pub fn add_property(&mut self, uid: &str, name: &str, components: usize) -> bool {
        let Some(e) = self.entities.get_mut(uid) else {
            debug!("{}: add_property on missing uid {}", self.name, uid);
            return false;
        };
        e.properties.insert(name.to_string(), components.max(1));
        self.emit(ChangeKind::DataKeysModified, vec![uid.to_string()]);
        true
    }

    /// Remove a data property from one entity
    pub fn remove_property(&mut self, uid: &str, name: &str) -> bool {
        let removed = self
            .entities
            .get_mut(uid)
            .and_then(|e| e.properties.shift_remove(name))
            .is_some();
        if removed {
            self.emit(ChangeKind::DataKeysModified, vec![uid.to_string()]);
        }
        removed
    }

    /// Property values were rewritten in place
    pub fn touch_property_values(&mut self, uids: &[String]) -> Vec<String> {
        let hit = self.existing(uids);
        self.emit(ChangeKind::DataValModified, hit.clone());
        hit
    }

    // === Metadata / legend ===

    /// Set one attribute on several entities
    pub fn set_attribute(&mut self, uids: &[String], key: &str, value: AttrValue) -> Vec<String> {
        let hit = self.existing(uids);
        for uid in &hit {
            if let Some(e) = self.entities.get_mut(uid) {
                e.attrs.set(key, value.clone());
            }
        }
        self.emit(ChangeKind::MetadataModified, hit.clone());
        hit
    }

    /// Legend appearance changed for these entities
    pub fn legend_changed(&mut self, uids: &[String], aspect: LegendAspect) -> Vec<String> {
        let hit = self.existing(uids);
        let kind = match aspect {
            LegendAspect::Color => ChangeKind::LegendColorModified,
            LegendAspect::Thickness => ChangeKind::LegendThickModified,
            LegendAspect::PointSize => ChangeKind::LegendPointSizeModified,
            LegendAspect::Opacity => ChangeKind::LegendOpacityModified,
        };
        self.emit(kind, hit.clone());
        hit
    }
}

impl EntitySource for EntityCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn contains(&self, uid: &str) -> bool {
        self.entities.contains_key(uid)
    }

    fn query(&self, filter: &EntityFilter) -> Vec<String> {
        self.entities
            .keys()
            .filter(|uid| filter.matches(self, uid))
            .cloned()
            .collect()
    }

    fn get_attribute(&self, uid: &str, key: &str) -> Option<AttrValue> {
        self.entities.get(uid).and_then(|e| e.attribute(key))
    }

    fn get_property_names(&self, uid: &str) -> Vec<(String, usize)> {
        self.entities.get(uid).map(Entity::property_list).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::{EventBus, downcast_event};
    use crate::entities::keys::A_ROLE;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn collection_on(bus: &EventBus) -> EntityCollection {
        let mut coll = EntityCollection::new("geology");
        coll.set_emitter(SharedEmitter::from_emitter(bus.emitter()));
        coll
    }

    fn events(bus: &EventBus) -> Vec<CollectionEvent> {
        bus.poll()
            .iter()
            .filter_map(|e| downcast_event::<CollectionEvent>(e).cloned())
            .collect()
    }

    #[test]
    fn test_add_emits_once() {
        let bus = EventBus::new();
        let mut coll = collection_on(&bus);
        coll.add_entities(vec![Entity::new("1", "F1"), Entity::new("2", "F2")]).unwrap();

        let evs = events(&bus);
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].kind, ChangeKind::Added);
        assert_eq!(evs[0].uids, ids(&["1", "2"]));
    }

    #[test]
    fn test_duplicate_rejected_atomically() {
        let mut coll = EntityCollection::new("geology");
        coll.add_entities(vec![Entity::new("1", "F1")]).unwrap();
        let err = coll
            .add_entities(vec![Entity::new("2", "F2"), Entity::new("1", "again")])
            .unwrap_err();
        assert!(matches!(err, SceneError::DuplicateUid { .. }));
        assert_eq!(coll.len(), 1);
    }

    #[test]
    fn test_remove_skips_missing_and_keeps_order() {
        let bus = EventBus::new();
        let mut coll = collection_on(&bus);
        coll.add_entities(vec![Entity::new("1", "a"), Entity::new("2", "b"), Entity::new("3", "c")])
            .unwrap();
        bus.poll();

        let removed = coll.remove_entities(&ids(&["2", "9"]));
        assert_eq!(removed, ids(&["2"]));
        assert_eq!(coll.query(&EntityFilter::all()), ids(&["1", "3"]));
        assert_eq!(events(&bus)[0].kind, ChangeKind::Removed);
    }

    #[test]
    fn test_noop_mutation_emits_nothing() {
        let bus = EventBus::new();
        let mut coll = collection_on(&bus);
        coll.remove_entities(&ids(&["nope"]));
        coll.set_attribute(&ids(&["nope"]), A_ROLE, "fault".into());
        assert!(bus.poll().is_empty());
    }

    #[test]
    fn test_property_events() {
        let bus = EventBus::new();
        let mut coll = collection_on(&bus);
        coll.add_entities(vec![Entity::new("1", "a")]).unwrap();
        bus.poll();

        assert!(coll.add_property("1", "poro", 1));
        assert!(coll.remove_property("1", "poro"));
        assert!(!coll.remove_property("1", "poro"));
        let kinds: Vec<ChangeKind> = events(&bus).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::DataKeysModified, ChangeKind::DataKeysModified]);
    }

    #[test]
    fn test_geometry_bumps_revision() {
        let mut coll = EntityCollection::new("geology");
        coll.add_entities(vec![Entity::new("1", "a")]).unwrap();
        coll.replace_geometry(&ids(&["1"]));
        assert_eq!(coll.get("1").map(|e| e.geometry_rev), Some(1));
    }
}
