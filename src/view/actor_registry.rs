//! ActorRegistry: per-view map uid → actor descriptor.
//!
//! Holds at most one row per uid. Only in-memory rows are touched here; creating,
//! hiding and disposing actors is the caller's job through the
//! [`Renderer`](super::renderer::Renderer).

use indexmap::IndexMap;
use log::debug;

use super::renderer::ActorHandle;

/// One registered actor.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorDescriptor {
    pub uid: String,
    /// None when the renderer could not build an actor
    pub actor: Option<ActorHandle>,
    pub show: bool,
    pub collection: String,
    pub show_property: Option<String>,
}

/// Registry errors
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    AlreadyRegistered(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyRegistered(uid) => write!(f, "Actor already registered: {}", uid),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Debug, Default)]
pub struct ActorRegistry {
    rows: IndexMap<String, ActorDescriptor>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row. Fails if the uid is present: unregister first.
    pub fn register(
        &mut self,
        uid: &str,
        actor: Option<ActorHandle>,
        show: bool,
        collection: &str,
        show_property: Option<String>,
    ) -> Result<(), RegistryError> {
        if self.rows.contains_key(uid) {
            return Err(RegistryError::AlreadyRegistered(uid.to_string()));
        }
        self.rows.insert(
            uid.to_string(),
            ActorDescriptor {
                uid: uid.to_string(),
                actor,
                show,
                collection: collection.to_string(),
                show_property,
            },
        );
        Ok(())
    }

    /// Remove a row and hand it back so the caller can dispose the actor.
    /// No-op (None) if absent.
    pub fn unregister(&mut self, uid: &str) -> Option<ActorDescriptor> {
        let row = self.rows.shift_remove(uid);
        if row.is_none() {
            debug!("ActorRegistry: unregister of unknown uid {}", uid);
        }
        row
    }

    /// Swap the actor handle keeping show/show_property. Returns the old handle.
    pub fn replace_actor(&mut self, uid: &str, actor: Option<ActorHandle>) -> Option<ActorHandle> {
        match self.rows.get_mut(uid) {
            Some(row) => std::mem::replace(&mut row.actor, actor),
            None => {
                debug!("ActorRegistry: replace_actor on unknown uid {}", uid);
                None
            }
        }
    }

    /// Returns true if the stored value changed
    pub fn set_show(&mut self, uid: &str, show: bool) -> bool {
        match self.rows.get_mut(uid) {
            Some(row) if row.show != show => {
                row.show = show;
                true
            }
            Some(_) => false,
            None => {
                debug!("ActorRegistry: set_show on unknown uid {}", uid);
                false
            }
        }
    }

    pub fn get_show(&self, uid: &str) -> Option<bool> {
        self.rows.get(uid).map(|r| r.show)
    }

    /// Returns true if the stored value changed
    pub fn set_property(&mut self, uid: &str, property: Option<String>) -> bool {
        match self.rows.get_mut(uid) {
            Some(row) if row.show_property != property => {
                row.show_property = property;
                true
            }
            Some(_) => false,
            None => {
                debug!("ActorRegistry: set_property on unknown uid {}", uid);
                false
            }
        }
    }

    pub fn get_property(&self, uid: &str) -> Option<&str> {
        self.rows.get(uid).and_then(|r| r.show_property.as_deref())
    }

    pub fn get(&self, uid: &str) -> Option<&ActorDescriptor> {
        self.rows.get(uid)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.rows.contains_key(uid)
    }

    /// Rows matching a predicate, in registration order
    pub fn query<F>(&self, predicate: F) -> Vec<&ActorDescriptor>
    where
        F: Fn(&ActorDescriptor) -> bool,
    {
        self.rows.values().filter(|r| predicate(r)).collect()
    }

    /// Uids of one collection, in registration order
    pub fn uids_of(&self, collection: &str) -> Vec<String> {
        self.rows
            .values()
            .filter(|r| r.collection == collection)
            .map(|r| r.uid.clone())
            .collect()
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remove every row (view close)
    pub fn drain(&mut self) -> Vec<ActorDescriptor> {
        self.rows.drain(..).map(|(_, row)| row).collect()
    }
}
