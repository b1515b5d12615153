//! Renderer seam: the sync engine asks for actors, it never draws.
//!
//! A real renderer builds meshes and owns GPU resources; [`HeadlessRenderer`]
//! only records what was requested, which is what the CLI and the tests use.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use log::trace;

use crate::core::collection_events::LegendAspect;

/// Opaque render-side handle for one entity in one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorHandle(pub u64);

impl std::fmt::Display for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// What an actor should show.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorContent {
    pub uid: String,
    pub collection: String,
    pub property: Option<String>,
    pub visible: bool,
}

/// Rendering backend of one view.
pub trait Renderer {
    /// Build an actor for an entity
    fn create_actor(&mut self, content: &ActorContent) -> Result<ActorHandle>;

    fn set_visible(&mut self, handle: ActorHandle, visible: bool);

    /// Release an actor and its resources
    fn dispose(&mut self, handle: ActorHandle);

    /// Rebuild an actor with new content. The old handle is invalid afterwards.
    fn replace(&mut self, handle: ActorHandle, content: &ActorContent) -> Result<ActorHandle>;

    /// Appearance changed (legend color, line thickness, ...). Default: nothing to do.
    fn restyle(&mut self, _handle: ActorHandle, _aspect: LegendAspect) {}
}

/// Actor state kept by [`HeadlessRenderer`]
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessActor {
    pub content: ActorContent,
    pub restyles: Vec<LegendAspect>,
}

/// Renderer that keeps actors in memory.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    next: u64,
    actors: HashMap<ActorHandle, HeadlessActor>,
    failing: HashSet<String>,
    pub created: usize,
    pub replaced: usize,
    pub disposed: usize,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make actor creation fail for this uid (simulates broken geometry)
    pub fn fail_on(&mut self, uid: &str) {
        self.failing.insert(uid.to_string());
    }

    pub fn actor(&self, handle: ActorHandle) -> Option<&HeadlessActor> {
        self.actors.get(&handle)
    }

    /// Live actor for a uid, if any
    pub fn actor_for(&self, uid: &str) -> Option<&HeadlessActor> {
        self.actors.values().find(|a| a.content.uid == uid)
    }

    pub fn live_count(&self) -> usize {
        self.actors.len()
    }

    fn build(&mut self, content: &ActorContent) -> Result<ActorHandle> {
        if self.failing.contains(&content.uid) {
            bail!("cannot build actor for {}", content.uid);
        }
        self.next += 1;
        let handle = ActorHandle(self.next);
        self.actors.insert(
            handle,
            HeadlessActor {
                content: content.clone(),
                restyles: Vec::new(),
            },
        );
        Ok(handle)
    }
}

impl Renderer for HeadlessRenderer {
    fn create_actor(&mut self, content: &ActorContent) -> Result<ActorHandle> {
        let handle = self.build(content)?;
        self.created += 1;
        trace!("headless: create {} for {} (visible={})", handle, content.uid, content.visible);
        Ok(handle)
    }

    fn set_visible(&mut self, handle: ActorHandle, visible: bool) {
        if let Some(actor) = self.actors.get_mut(&handle) {
            actor.content.visible = visible;
        }
    }

    fn dispose(&mut self, handle: ActorHandle) {
        if self.actors.remove(&handle).is_some() {
            self.disposed += 1;
        }
    }

    fn replace(&mut self, handle: ActorHandle, content: &ActorContent) -> Result<ActorHandle> {
        let new = self.build(content)?;
        self.actors.remove(&handle);
        self.replaced += 1;
        trace!("headless: replace {} -> {} for {}", handle, new, content.uid);
        Ok(new)
    }

    fn restyle(&mut self, handle: ActorHandle, aspect: LegendAspect) {
        if let Some(actor) = self.actors.get_mut(&handle) {
            actor.restyles.push(aspect);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(uid: &str) -> ActorContent {
        ActorContent {
            uid: uid.to_string(),
            collection: "geology".to_string(),
            property: None,
            visible: true,
        }
    }

    #[test]
    fn test_create_replace_dispose() {
        let mut r = HeadlessRenderer::new();
        let h = r.create_actor(&content("1")).unwrap();
        let h2 = r.replace(h, &content("1")).unwrap();
        assert_ne!(h, h2);
        assert!(r.actor(h).is_none());
        assert_eq!(r.live_count(), 1);
        r.dispose(h2);
        assert_eq!(r.live_count(), 0);
        assert_eq!((r.created, r.replaced, r.disposed), (1, 1, 1));
    }

    #[test]
    fn test_failing_uid() {
        let mut r = HeadlessRenderer::new();
        r.fail_on("bad");
        assert!(r.create_actor(&content("bad")).is_err());
        assert_eq!(r.live_count(), 0);
    }
}
