//! SyncController: keeps one open view in step with the collections it shows.
//!
//! One controller per view. It owns the view's [`ActorRegistry`], its
//! [`ViewProjection`]s and its [`SelectionManager`], and talks to the
//! [`Renderer`] of that view.
//!
//! # Event flow
//!
//! ```text
//! EntityCollection --CollectionEvent--> EventBus --callback--> inbox
//!                                                                |
//!                               pump(scene) <--------------------+
//!                                   |
//!                  registry -> renderer -> projections -> view events
//! ```
//!
//! Bus callbacks only enqueue; [`SyncController::pump`] runs the handlers, so a
//! handler never re-enters another handler. Within one event the registry is
//! always updated before any projection, so a projection rebuild never reads a
//! stale row.
//!
//! # User gestures
//!
//! A gesture (checkbox, property pick, selection) enters through the
//! `user_*` methods with the originating [`ProjectionId`]. The result goes
//! to the registry and renderer, is mirrored into every other projection
//! inside [`ViewProjection::programmatic`], and is announced once on the bus.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use log::{debug, info, trace, warn};

use super::actor_registry::ActorRegistry;
use super::projection::{
    PatchOutcome, PropertyChange, ProjectionId, ProjectionRow, ToggleDelta, ToggleTarget, ViewProjection,
    expand_choices,
};
use super::renderer::{ActorContent, Renderer};
use super::selection::SelectionManager;
use super::view_config::{BoundCollection, CollectionProfile, ProjectionSpec, ViewConfig};
use super::view_events::{ShowPropertyChangedEvent, VisibilityChangedEvent};
use crate::config::{DEFAULT_REBUILD_FRACTION, PROPERTY_NONE};
use crate::core::collection_events::{ChangeKind, CollectionEvent, LegendAspect};
use crate::core::event_bus::{EventBus, SharedEmitter, SubscriptionId};
use crate::entities::{EntityFilter, EntitySource, Filter, Scene};

type Inbox = Arc<Mutex<VecDeque<CollectionEvent>>>;

/// Registry value for a selector choice ("none" means no property)
fn property_value(choice: &str) -> Option<String> {
    (choice != PROPERTY_NONE).then(|| choice.to_string())
}

fn read_rows(source: &dyn EntitySource, hierarchy: &[String], name_key: &str, uids: &[String]) -> Vec<ProjectionRow> {
    uids.iter()
        .filter(|uid| source.contains(uid))
        .map(|uid| ProjectionRow::read(source, uid, hierarchy, name_key))
        .collect()
}

/// Uids touched by an event, split by what the view must do with them
#[derive(Debug, Default)]
struct Membership {
    /// Registered and still matching the filter
    keep: Vec<String>,
    /// Registered but no longer matching (or gone from the collection)
    leave: Vec<String>,
    /// Matching but not registered yet
    join: Vec<String>,
}

pub struct SyncController<R: Renderer> {
    view: String,
    registry: ActorRegistry,
    projections: Vec<ViewProjection>,
    selection: SelectionManager,
    bound: IndexMap<String, BoundCollection>,
    renderer: R,
    emitter: SharedEmitter,
    inbox: Inbox,
    subscriptions: Vec<SubscriptionId>,
    rebuild_fraction: f32,
}

impl<R: Renderer> std::fmt::Debug for SyncController<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("view", &self.view)
            .field("collections", &self.bound.keys().collect::<Vec<_>>())
            .field("projections", &self.projections.len())
            .field("actors", &self.registry.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl<R: Renderer> SyncController<R> {
    pub fn new(view: &str, renderer: R) -> Self {
        Self {
            view: view.to_string(),
            registry: ActorRegistry::new(),
            projections: Vec::new(),
            selection: SelectionManager::new(view),
            bound: IndexMap::new(),
            renderer,
            emitter: SharedEmitter::dummy(),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
            subscriptions: Vec::new(),
            rebuild_fraction: DEFAULT_REBUILD_FRACTION,
        }
    }

    /// Build a controller with every collection and projection of a view config
    pub fn from_config(config: &ViewConfig, renderer: R) -> Self {
        let mut ctl = Self::new(&config.name, renderer);
        ctl.rebuild_fraction = config.rebuild_fraction;
        for bound in &config.collections {
            ctl.bind_collection(bound.profile.clone(), bound.filter.clone());
        }
        for spec in &config.projections {
            ctl.add_projection(spec);
        }
        ctl
    }

    /// Show a collection in this view through a filter
    pub fn bind_collection(&mut self, profile: CollectionProfile, filter: EntityFilter) {
        debug!("{}: bind {} [{}]", self.view, profile.collection, filter.describe());
        self.bound
            .insert(profile.collection.clone(), BoundCollection { profile, filter });
    }

    /// Add a tree or table over a bound collection. Filled on the next load().
    pub fn add_projection(&mut self, spec: &ProjectionSpec) -> Option<ProjectionId> {
        let Some(bound) = self.bound.get(&spec.collection) else {
            warn!("{}: projection '{}' over unbound collection {}", self.view, spec.label, spec.collection);
            return None;
        };
        let profile = &bound.profile;
        let id = ProjectionId(self.projections.len());
        let mut projection = ViewProjection::new(id, &spec.label, &spec.collection, spec.layout);
        projection.configure(
            spec.effective_hierarchy(profile),
            &profile.name_key,
            &profile.uid_key,
            &profile.property_key,
            profile.default_property_choices.clone(),
        );
        projection.set_rebuild_fraction(self.rebuild_fraction);
        self.projections.push(projection);
        Some(id)
    }

    // === Lifecycle ===

    /// Subscribe to collection events and publish view events on this bus.
    pub fn attach(&mut self, bus: &EventBus) {
        let emitter = SharedEmitter::from_emitter(bus.emitter());
        self.selection.set_emitter(emitter.clone());
        self.emitter = emitter;

        let inbox = Arc::clone(&self.inbox);
        let id = bus.subscribe::<CollectionEvent, _>(move |event| {
            inbox.lock().unwrap_or_else(|e| e.into_inner()).push_back(event.clone());
        });
        self.subscriptions.push(id);
        info!("{}: attached ({})", self.view, id);
    }

    /// Drop exactly the subscriptions this controller made. Returns how many were removed.
    pub fn detach(&mut self, bus: &EventBus) -> usize {
        let mut removed = 0;
        for id in self.subscriptions.drain(..) {
            if bus.unsubscribe(id) {
                removed += 1;
            } else {
                warn!("{}: subscription {} was already gone", self.view, id);
            }
        }
        removed
    }

    /// Tear the view down: unsubscribe, dispose every actor, hand the renderer back.
    pub fn close(mut self, bus: &EventBus) -> R {
        self.detach(bus);
        for row in self.registry.drain() {
            if let Some(handle) = row.actor {
                self.renderer.dispose(handle);
            }
        }
        info!("{}: closed", self.view);
        self.renderer
    }

    /// Bring every bound collection in step with the scene and rebuild all projections.
    pub fn load(&mut self, scene: &Scene) {
        let names: Vec<String> = self.bound.keys().cloned().collect();
        for name in &names {
            let wanted = self.query(scene, name);
            let wanted_set: HashSet<&String> = wanted.iter().collect();
            let stale: Vec<String> = self
                .registry
                .uids_of(name)
                .into_iter()
                .filter(|uid| !wanted_set.contains(uid))
                .collect();
            self.unregister(&stale);
            let fresh: Vec<String> = wanted.iter().filter(|uid| !self.registry.contains(uid)).cloned().collect();
            self.register(name, &fresh);
            self.rebuild(scene, name, &wanted);
        }
        let registry = &self.registry;
        self.selection.retain_existing(|uid| registry.contains(uid));
        self.mirror_selection(None);
        info!(
            "{}: loaded {} actors into {} projections",
            self.view,
            self.registry.len(),
            self.projections.len()
        );
    }

    /// Handle every queued collection event. Returns the number handled.
    pub fn pump(&mut self, scene: &Scene) -> usize {
        let mut handled = 0;
        loop {
            let next = self.inbox.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            let Some(event) = next else {
                break;
            };
            self.dispatch(scene, &event);
            handled += 1;
        }
        handled
    }

    /// Route one collection event to its handler
    pub fn dispatch(&mut self, scene: &Scene, event: &CollectionEvent) {
        if !self.bound.contains_key(&event.collection) {
            trace!("{}: {} not shown here", self.view, event.collection);
            return;
        }
        trace!("{}: {} {} x{}", self.view, event.collection, event.kind.as_str(), event.uids.len());
        let (collection, uids) = (event.collection.as_str(), event.uids.as_slice());
        match event.kind {
            ChangeKind::Added => self.on_added(scene, collection, uids),
            ChangeKind::Removed => self.on_removed(collection, uids),
            ChangeKind::GeomModified => self.on_geometry_modified(scene, collection, uids),
            ChangeKind::DataKeysModified => self.on_data_keys_modified(scene, collection, uids),
            ChangeKind::DataValModified => self.on_data_val_modified(collection, uids),
            ChangeKind::MetadataModified => self.on_metadata_modified(scene, collection, uids),
            ChangeKind::LegendColorModified
            | ChangeKind::LegendThickModified
            | ChangeKind::LegendPointSizeModified
            | ChangeKind::LegendOpacityModified => {
                if let Some(aspect) = event.kind.legend_aspect() {
                    self.on_legend_modified(collection, uids, aspect);
                }
            }
        }
    }

    // === Collection handlers ===

    pub fn on_added(&mut self, scene: &Scene, collection: &str, uids: &[String]) {
        let Some(source) = scene.source(collection) else {
            debug!("{}: added to missing collection {}", self.view, collection);
            return;
        };
        let Some(bound) = self.bound.get(collection) else {
            return;
        };
        let matching: Vec<String> = uids
            .iter()
            .filter(|uid| source.contains(uid) && bound.filter.matches(source, uid))
            .cloned()
            .collect();

        let again: Vec<String> = matching.iter().filter(|uid| self.registry.contains(uid)).cloned().collect();
        if !again.is_empty() {
            debug!("{}: {:?} added twice, replacing", self.view, again);
            self.withdraw(collection, &again);
        }

        self.register(collection, &matching);

        let registry = &self.registry;
        let mut resets = Vec::new();
        for p in self.projections.iter_mut().filter(|p| p.collection() == collection) {
            let rows = read_rows(source, p.hierarchy(), p.name_key(), &matching);
            let report = p.programmatic(|p| p.add(rows, registry));
            if report.outcome == PatchOutcome::Rebuilt {
                info!("{}: '{}' rebuilt for {} new rows", self.view, p.label(), matching.len());
            }
            resets.extend(report.property_resets.into_iter().map(|c| (p.id(), c)));
        }
        for (origin, change) in resets {
            self.route_property(change, Some(origin));
        }
        self.mirror_selection(None);
    }

    pub fn on_removed(&mut self, collection: &str, uids: &[String]) {
        self.withdraw(collection, uids);
        let registry = &self.registry;
        self.selection.retain_existing(|uid| registry.contains(uid));
    }

    /// Geometry replaced: rebuild actors in place, or move uids in or out of
    /// the view when the filter verdict changed.
    pub fn on_geometry_modified(&mut self, scene: &Scene, collection: &str, uids: &[String]) {
        let Some(m) = self.membership(scene, collection, uids) else {
            return;
        };
        for uid in &m.keep {
            self.rebuild_actor(uid);
        }
        self.apply_membership(scene, collection, &m);
    }

    /// Property list changed: refresh selectors, reset vanished properties
    pub fn on_data_keys_modified(&mut self, scene: &Scene, collection: &str, uids: &[String]) {
        let (Some(source), Some(bound)) = (scene.source(collection), self.bound.get(collection)) else {
            return;
        };
        let defaults = bound.profile.default_property_choices.clone();
        let updates: Vec<(String, Vec<(String, usize)>)> = uids
            .iter()
            .filter(|uid| self.registry.contains(uid) && source.contains(uid))
            .map(|uid| (uid.clone(), source.get_property_names(uid)))
            .collect();

        // Registry first
        let fallback = defaults.first().map(String::as_str).unwrap_or(PROPERTY_NONE).to_string();
        let stale: Vec<String> = updates
            .iter()
            .filter(|(uid, props)| {
                self.registry
                    .get_property(uid)
                    .is_some_and(|cur| !expand_choices(&defaults, props).iter().any(|c| c == cur))
            })
            .map(|(uid, _)| uid.clone())
            .collect();
        for uid in stale {
            debug!("{}: shown property of {} disappeared", self.view, uid);
            self.route_property(
                PropertyChange {
                    uid,
                    property: fallback.clone(),
                },
                None,
            );
        }

        let mut resets = Vec::new();
        for p in self.projections.iter_mut().filter(|p| p.collection() == collection) {
            let changed = p.programmatic(|p| p.update_properties(&updates));
            resets.extend(changed.into_iter().map(|c| (p.id(), c)));
        }
        for (origin, change) in resets {
            self.route_property(change, Some(origin));
        }
    }

    /// Values of existing properties changed: redraw actors that show one
    pub fn on_data_val_modified(&mut self, collection: &str, uids: &[String]) {
        for uid in uids {
            let shows_property = self
                .registry
                .get(uid)
                .is_some_and(|row| row.collection == collection && row.show_property.is_some());
            if shows_property {
                self.rebuild_actor(uid);
            } else {
                trace!("{}: {} shows no property, nothing to redraw", self.view, uid);
            }
        }
    }

    /// Attributes changed: membership, leaf position and label, legend color
    pub fn on_metadata_modified(&mut self, scene: &Scene, collection: &str, uids: &[String]) {
        let Some(m) = self.membership(scene, collection, uids) else {
            return;
        };
        if let Some(source) = scene.source(collection) {
            let registry = &self.registry;
            for p in self.projections.iter_mut().filter(|p| p.collection() == collection) {
                for uid in &m.keep {
                    let row = ProjectionRow::read(source, uid, p.hierarchy(), p.name_key());
                    let Some(old) = p.leaf_row(uid) else {
                        debug!("{}: '{}' has no leaf for {}", self.view, p.label(), uid);
                        continue;
                    };
                    let (moved, renamed) = (old.path != row.path, old.name != row.name);
                    if moved {
                        trace!("{}: '{}' moves {} to {:?}", self.view, p.label(), uid, row.path);
                        p.programmatic(|p| p.relocate(row, registry));
                    } else if renamed {
                        p.rename(uid, &row.name);
                    }
                }
            }
        }
        for uid in &m.keep {
            self.restyle(uid, LegendAspect::Color);
        }
        self.apply_membership(scene, collection, &m);
    }

    pub fn on_legend_modified(&mut self, collection: &str, uids: &[String], aspect: LegendAspect) {
        for uid in uids {
            if self.registry.get(uid).is_some_and(|row| row.collection == collection) {
                self.restyle(uid, aspect);
            }
        }
    }

    // === User gestures ===

    /// Checkbox click in one projection. Returns the routed delta.
    pub fn user_toggle(&mut self, origin: ProjectionId, target: &ToggleTarget, on: bool) -> Option<ToggleDelta> {
        let delta = self.projections.get_mut(origin.0)?.toggle(target, on)?;
        self.on_user_toggle(origin, &delta);
        Some(delta)
    }

    /// Route a toggle delta: registry, renderer, the other projections, then one event.
    ///
    /// The event lists only uids whose stored visibility actually flipped, and is
    /// skipped when there are none.
    pub fn on_user_toggle(&mut self, origin: ProjectionId, delta: &ToggleDelta) {
        let mut flipped = ToggleDelta::default();
        for (uids, on) in [(&delta.turned_on, true), (&delta.turned_off, false)] {
            for uid in uids {
                if !self.registry.set_show(uid, on) {
                    continue;
                }
                if let Some(handle) = self.registry.get(uid).and_then(|row| row.actor) {
                    self.renderer.set_visible(handle, on);
                }
                if on {
                    flipped.turned_on.push(uid.clone());
                } else {
                    flipped.turned_off.push(uid.clone());
                }
            }
            for p in self.projections.iter_mut().filter(|p| p.id() != origin) {
                let mine: Vec<String> = uids.iter().filter(|uid| p.contains(uid)).cloned().collect();
                if !mine.is_empty() {
                    p.programmatic(|p| p.set_checked(&mine, on));
                }
            }
        }
        if flipped.is_empty() {
            trace!("{}: toggle from {:?} changed nothing", self.view, origin);
            return;
        }
        self.emitter.emit(VisibilityChangedEvent {
            view: self.view.clone(),
            turned_on: flipped.turned_on,
            turned_off: flipped.turned_off,
        });
    }

    /// Property picked in one projection's selector
    pub fn user_select_property(&mut self, origin: ProjectionId, uid: &str, choice: &str) -> bool {
        let Some(change) = self
            .projections
            .get_mut(origin.0)
            .and_then(|p| p.select_property(uid, choice))
        else {
            return false;
        };
        self.route_property(change, Some(origin));
        true
    }

    /// Rows selected in one projection
    pub fn user_select(&mut self, origin: ProjectionId, uids: &[String]) -> bool {
        let Some(selected) = self.projections.get_mut(origin.0).and_then(|p| p.user_select(uids)) else {
            return false;
        };
        self.selection.select(selected);
        self.mirror_selection(Some(origin));
        true
    }

    /// Programmatic selection (scripts, other windows). Unknown uids are dropped.
    pub fn select(&mut self, uids: &[String]) -> bool {
        let known: Vec<String> = uids.iter().filter(|uid| self.registry.contains(uid)).cloned().collect();
        let changed = self.selection.select(known);
        self.mirror_selection(None);
        changed
    }

    /// Regroup one projection under a new key order
    pub fn rearrange(&mut self, pid: ProjectionId, order: Vec<String>, scene: &Scene) -> bool {
        let Some(collection) = self.projections.get(pid.0).map(|p| p.collection().to_string()) else {
            warn!("{}: rearrange of unknown projection {:?}", self.view, pid);
            return false;
        };
        let uids: Vec<String> = self
            .query(scene, &collection)
            .into_iter()
            .filter(|uid| self.registry.contains(uid))
            .collect();
        let registry = &self.registry;
        let p = &mut self.projections[pid.0];
        let rows = match scene.source(&collection) {
            Some(source) => read_rows(source, &order, p.name_key(), &uids),
            None => Vec::new(),
        };
        let resets = p.programmatic(|p| p.rearrange_hierarchy(order, &rows, registry));
        for change in resets {
            self.route_property(change, Some(pid));
        }
        true
    }

    // === Accessors ===

    pub fn view(&self) -> &str {
        &self.view
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn projections(&self) -> &[ViewProjection] {
        &self.projections
    }

    pub fn projection(&self, pid: ProjectionId) -> Option<&ViewProjection> {
        self.projections.get(pid.0)
    }

    /// For widget-only state (expanded flags)
    pub fn projection_mut(&mut self, pid: ProjectionId) -> Option<&mut ViewProjection> {
        self.projections.get_mut(pid.0)
    }

    pub fn find_projection(&self, label: &str) -> Option<ProjectionId> {
        self.projections.iter().find(|p| p.label() == label).map(|p| p.id())
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.bound.keys().map(|k| k.as_str())
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn subscriptions(&self) -> &[SubscriptionId] {
        &self.subscriptions
    }

    /// Collection events waiting for pump()
    pub fn pending(&self) -> usize {
        self.inbox.lock().map(|q| q.len()).unwrap_or(0)
    }

    // === Internals ===

    fn query(&self, scene: &Scene, collection: &str) -> Vec<String> {
        match (scene.source(collection), self.bound.get(collection)) {
            (Some(source), Some(bound)) => source.query(&bound.filter),
            _ => Vec::new(),
        }
    }

    fn membership(&self, scene: &Scene, collection: &str, uids: &[String]) -> Option<Membership> {
        let bound = self.bound.get(collection)?;
        let source = scene.source(collection);
        let mut m = Membership::default();
        for uid in uids {
            let matches = source.is_some_and(|s| s.contains(uid) && bound.filter.matches(s, uid));
            match (self.registry.contains(uid), matches) {
                (true, true) => m.keep.push(uid.clone()),
                (true, false) => m.leave.push(uid.clone()),
                (false, true) => m.join.push(uid.clone()),
                (false, false) => trace!("{}: {} outside the view filter", self.view, uid),
            }
        }
        Some(m)
    }

    fn apply_membership(&mut self, scene: &Scene, collection: &str, m: &Membership) {
        if !m.leave.is_empty() {
            debug!("{}: {:?} no longer match the filter", self.view, m.leave);
            self.on_removed(collection, &m.leave);
        }
        if !m.join.is_empty() {
            debug!("{}: {:?} now match the filter", self.view, m.join);
            self.on_added(scene, collection, &m.join);
        }
    }

    /// Create actors and registry rows at the profile's default visibility.
    /// A failed actor is still registered, with no handle.
    fn register(&mut self, collection: &str, uids: &[String]) {
        let Some(profile) = self.bound.get(collection).map(|b| &b.profile) else {
            debug!("{}: register into unbound collection {}", self.view, collection);
            return;
        };
        let visible = profile.default_visible;
        let property = profile.initial_property();
        for uid in uids {
            let content = ActorContent {
                uid: uid.clone(),
                collection: collection.to_string(),
                property: property.clone(),
                visible,
            };
            let actor = match self.renderer.create_actor(&content) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("{}: no actor for {}: {:#}", self.view, uid, e);
                    None
                }
            };
            if let Err(e) = self.registry.register(uid, actor, visible, collection, property.clone()) {
                warn!("{}: {}", self.view, e);
                if let Some(handle) = actor {
                    self.renderer.dispose(handle);
                }
            }
        }
    }

    fn unregister(&mut self, uids: &[String]) -> Vec<String> {
        let mut gone = Vec::with_capacity(uids.len());
        for uid in uids {
            if let Some(row) = self.registry.unregister(uid) {
                if let Some(handle) = row.actor {
                    self.renderer.dispose(handle);
                }
                gone.push(row.uid);
            }
        }
        gone
    }

    /// Registry rows then projection leaves. Selection is left alone.
    fn withdraw(&mut self, collection: &str, uids: &[String]) {
        let mine: Vec<String> = uids
            .iter()
            .filter(|uid| self.registry.get(uid).is_some_and(|row| row.collection == collection))
            .cloned()
            .collect();
        let gone = self.unregister(&mine);
        if gone.is_empty() {
            return;
        }
        let registry = &self.registry;
        for p in self.projections.iter_mut().filter(|p| p.collection() == collection) {
            let report = p.programmatic(|p| p.remove(&gone, registry));
            if report.outcome == PatchOutcome::Rebuilt {
                info!("{}: '{}' rebuilt after removing {} rows", self.view, p.label(), gone.len());
            }
        }
    }

    fn rebuild(&mut self, scene: &Scene, collection: &str, order: &[String]) {
        let source = scene.source(collection);
        let registry = &self.registry;
        let mut resets = Vec::new();
        for p in self.projections.iter_mut().filter(|p| p.collection() == collection) {
            let rows = match source {
                Some(source) => read_rows(source, p.hierarchy(), p.name_key(), order),
                None => Vec::new(),
            };
            let changed = p.programmatic(|p| p.populate(&rows, registry));
            resets.extend(changed.into_iter().map(|c| (p.id(), c)));
        }
        for (origin, change) in resets {
            self.route_property(change, Some(origin));
        }
    }

    /// Rebuild an actor from its registry row, keeping show and property
    fn rebuild_actor(&mut self, uid: &str) {
        let Some(row) = self.registry.get(uid) else {
            return;
        };
        let content = ActorContent {
            uid: uid.to_string(),
            collection: row.collection.clone(),
            property: row.show_property.clone(),
            visible: row.show,
        };
        let old = row.actor;
        let result = match old {
            Some(handle) => self.renderer.replace(handle, &content),
            None => self.renderer.create_actor(&content),
        };
        match result {
            Ok(handle) => {
                self.registry.replace_actor(uid, Some(handle));
            }
            Err(e) => {
                warn!("{}: rebuilding actor for {} failed: {:#}", self.view, uid, e);
                if let Some(handle) = old {
                    self.renderer.dispose(handle);
                }
                self.registry.replace_actor(uid, None);
            }
        }
    }

    fn restyle(&mut self, uid: &str, aspect: LegendAspect) {
        if let Some(handle) = self.registry.get(uid).and_then(|row| row.actor) {
            self.renderer.restyle(handle, aspect);
        }
    }

    /// A selector value changed in `origin` (or upstream when None)
    fn route_property(&mut self, change: PropertyChange, origin: Option<ProjectionId>) {
        let value = property_value(&change.property);
        if !self.registry.set_property(&change.uid, value.clone()) {
            trace!("{}: property of {} already {:?}", self.view, change.uid, value);
            return;
        }
        self.rebuild_actor(&change.uid);
        for p in self
            .projections
            .iter_mut()
            .filter(|p| Some(p.id()) != origin && p.contains(&change.uid))
        {
            p.programmatic(|p| p.set_property(&change.uid, value.as_deref()));
        }
        self.emitter.emit(ShowPropertyChangedEvent {
            view: self.view.clone(),
            uid: change.uid,
            property: value,
        });
    }

    fn mirror_selection(&mut self, origin: Option<ProjectionId>) {
        let selected = self.selection.get();
        for p in self.projections.iter_mut().filter(|p| Some(p.id()) != origin) {
            p.programmatic(|p| p.set_selection(&selected));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::Event;
    use crate::entities::Entity;
    use crate::entities::keys::{A_FEATURE, A_ROLE};
    use crate::view::projection::CheckState;
    use crate::view::renderer::HeadlessRenderer;
    use crate::view::view_config::ViewKind;
    use crate::view::view_events::SelectionChangedEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TREE: ProjectionId = ProjectionId(0);
    const TABLE: ProjectionId = ProjectionId(1);

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn fault(uid: &str, name: &str) -> Entity {
        Entity::new(uid, name).with_attr(A_ROLE, "fault").with_attr(A_FEATURE, "F")
    }

    fn counter<E: Event>(bus: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe::<E, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    fn config(filter: EntityFilter) -> ViewConfig {
        ViewConfig::new("3D", ViewKind::View3D)
            .bind(
                CollectionProfile::new("geology", &[A_ROLE], false).with_choices(&["none", "X"]),
                filter,
            )
            .project(ProjectionSpec::tree("geology tree", "geology"))
            .project(ProjectionSpec::table("geology table", "geology"))
    }

    fn setup(filter: EntityFilter) -> (EventBus, Scene, SyncController<HeadlessRenderer>) {
        let bus = EventBus::new();
        let mut scene = Scene::new();
        scene.set_emitter(SharedEmitter::from_emitter(bus.emitter()));
        scene.ensure_collection("geology");
        let mut ctl = SyncController::from_config(&config(filter), HeadlessRenderer::new());
        ctl.attach(&bus);
        ctl.load(&scene);
        (bus, scene, ctl)
    }

    fn add(scene: &mut Scene, entities: Vec<Entity>) {
        scene.collection_mut("geology").unwrap().add_entities(entities).unwrap();
    }

    /// Registry uid set equals the filtered query of the collection
    fn assert_consistent(ctl: &SyncController<HeadlessRenderer>, scene: &Scene) {
        let mut expected = ctl.query(scene, "geology");
        let mut actual: Vec<String> = ctl.registry().uids().map(str::to_string).collect();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        for p in ctl.projections() {
            let mut leaves = p.uids();
            leaves.sort();
            assert_eq!(leaves, expected, "projection {}", p.label());
        }
    }

    #[test]
    fn test_added_registers_then_patches() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2")]);
        assert_eq!(ctl.pending(), 1);
        assert_eq!(ctl.pump(&scene), 1);

        assert_eq!(ctl.registry().len(), 2);
        assert_eq!(ctl.registry().get_show("1"), Some(false));
        assert_eq!(ctl.renderer().live_count(), 2);
        let tree = ctl.projection(TREE).unwrap();
        assert_eq!(tree.group_check(&["fault"]), Some(CheckState::Unchecked));
        assert_eq!(ctl.projection(TABLE).unwrap().leaf_count(), 2);
        assert_consistent(&ctl, &scene);
    }

    #[test]
    fn test_filter_controls_membership() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::attr_equals(A_ROLE, "fault"));
        add(
            &mut scene,
            vec![fault("1", "F1"), Entity::new("2", "H1").with_attr(A_ROLE, "horizon")],
        );
        ctl.pump(&scene);
        assert!(!ctl.registry().contains("2"));
        assert_consistent(&ctl, &scene);

        let geology = scene.collection_mut("geology").unwrap();
        geology.set_attribute(&ids(&["2"]), A_ROLE, "fault".into());
        geology.set_attribute(&ids(&["1"]), A_ROLE, "horizon".into());
        ctl.pump(&scene);
        assert!(ctl.registry().contains("2"));
        assert!(!ctl.registry().contains("1"));
        assert_consistent(&ctl, &scene);
    }

    #[test]
    fn test_user_toggle_mirrors_and_emits_once() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2")]);
        ctl.pump(&scene);
        let events = counter::<VisibilityChangedEvent>(&bus);

        let group = ctl.projection(TREE).unwrap().find_group(&["fault"]).unwrap();
        let delta = ctl.user_toggle(TREE, &ToggleTarget::Group(group), true).unwrap();
        assert_eq!(delta.turned_on, ids(&["1", "2"]));
        assert_eq!(events.load(Ordering::SeqCst), 1);

        assert_eq!(ctl.registry().get_show("1"), Some(true));
        assert!(ctl.renderer().actor_for("2").unwrap().content.visible);
        let table = ctl.projection(TABLE).unwrap();
        assert_eq!(table.checked_uids(), ids(&["1", "2"]));
        // Mirroring is programmatic: nothing was routed back
        assert_eq!(table.suppressed_emissions(), 0);
        assert!(!ctl.projection(TREE).unwrap().is_suspended());

        // Same gesture again changes nothing and emits nothing
        assert!(ctl.user_toggle(TABLE, &ToggleTarget::Leaf("1".into()), true).is_none());
        ctl.user_toggle(TABLE, &ToggleTarget::Leaf("1".into()), false).unwrap();
        assert_eq!(events.load(Ordering::SeqCst), 2);
        assert_eq!(
            ctl.projection(TREE).unwrap().group_check(&["fault"]),
            Some(CheckState::PartiallyChecked)
        );
    }

    #[test]
    fn test_removed_prunes_disposes_and_trims_selection() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2")]);
        ctl.pump(&scene);
        let selections = counter::<SelectionChangedEvent>(&bus);
        assert!(ctl.user_select(TREE, &ids(&["1", "2"])));
        assert_eq!(selections.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.projection(TABLE).unwrap().selection(), ids(&["1", "2"]));

        scene.collection_mut("geology").unwrap().remove_entities(&ids(&["1"]));
        ctl.pump(&scene);
        assert_eq!(ctl.selection().get(), ids(&["2"]));
        assert_eq!(selections.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.renderer().disposed, 1);

        scene.collection_mut("geology").unwrap().remove_entities(&ids(&["2"]));
        ctl.pump(&scene);
        assert!(ctl.projection(TREE).unwrap().find_group(&["fault"]).is_none());
        assert!(ctl.selection().is_empty());
        assert_consistent(&ctl, &scene);
    }

    #[test]
    fn test_geometry_modified_keeps_show_and_property() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1")]);
        ctl.pump(&scene);
        ctl.user_toggle(TREE, &ToggleTarget::Leaf("1".into()), true);
        assert!(ctl.user_select_property(TREE, "1", "X"));
        let before = ctl.registry().get("1").unwrap().actor;

        scene.collection_mut("geology").unwrap().replace_geometry(&ids(&["1"]));
        ctl.pump(&scene);
        let row = ctl.registry().get("1").unwrap();
        assert!(row.show);
        assert_eq!(row.show_property.as_deref(), Some("X"));
        assert_ne!(row.actor, before);
        let actor = ctl.renderer().actor_for("1").unwrap();
        assert!(actor.content.visible);
        assert_eq!(actor.content.property.as_deref(), Some("X"));
        assert_eq!(ctl.renderer().live_count(), 1);
    }

    #[test]
    fn test_geometry_modified_outside_filter_is_removed() {
        let mut scene = Scene::new();
        scene
            .ensure_collection("geology")
            .add_entities(vec![fault("1", "F1"), fault("2", "F2")])
            .unwrap();
        let mut ctl = SyncController::from_config(
            &config(EntityFilter::attr_equals(A_ROLE, "fault")),
            HeadlessRenderer::new(),
        );
        ctl.load(&scene);
        assert_eq!(ctl.registry().len(), 2);

        // No bus here: drive the handler directly
        let geology = scene.collection_mut("geology").unwrap();
        geology.set_attribute(&ids(&["2"]), A_ROLE, "horizon".into());
        geology.replace_geometry(&ids(&["1", "2"]));
        ctl.on_geometry_modified(&scene, "geology", &ids(&["1", "2"]));
        assert!(!ctl.registry().contains("2"));
        assert_eq!(ctl.renderer().replaced, 1);
        assert_consistent(&ctl, &scene);
    }

    #[test]
    fn test_vanished_property_resets_everywhere() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1").with_property("poro", 1)]);
        ctl.pump(&scene);
        let changes = counter::<ShowPropertyChangedEvent>(&bus);

        assert!(ctl.user_select_property(TREE, "1", "poro"));
        assert_eq!(ctl.registry().get_property("1"), Some("poro"));
        assert_eq!(ctl.projection(TABLE).unwrap().leaf_property("1"), Some("poro"));
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        scene.collection_mut("geology").unwrap().remove_property("1", "poro");
        ctl.pump(&scene);
        assert_eq!(ctl.registry().get_property("1"), None);
        assert_eq!(ctl.projection(TREE).unwrap().leaf_property("1"), Some("none"));
        assert_eq!(ctl.projection(TABLE).unwrap().leaf_property("1"), Some("none"));
        assert_eq!(ctl.renderer().actor_for("1").unwrap().content.property, None);
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_data_values_redraw_property_actors_only() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1").with_property("poro", 1), fault("2", "F2")]);
        ctl.pump(&scene);
        ctl.user_select_property(TREE, "1", "poro");
        let replaced = ctl.renderer().replaced;

        scene.collection_mut("geology").unwrap().touch_property_values(&ids(&["1", "2"]));
        ctl.pump(&scene);
        assert_eq!(ctl.renderer().replaced, replaced + 1);
    }

    #[test]
    fn test_metadata_relocates_and_renames() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2")]);
        ctl.pump(&scene);
        ctl.user_toggle(TREE, &ToggleTarget::Leaf("1".into()), true);

        let geology = scene.collection_mut("geology").unwrap();
        geology.set_attribute(&ids(&["1"]), A_ROLE, "horizon".into());
        geology.set_attribute(&ids(&["2"]), crate::entities::keys::A_NAME, "Main fault".into());
        ctl.pump(&scene);

        let tree = ctl.projection(TREE).unwrap();
        assert_eq!(tree.group_check(&["horizon"]), Some(CheckState::Checked));
        assert_eq!(tree.group_check(&["fault"]), Some(CheckState::Unchecked));
        assert_eq!(tree.leaf_row("2").unwrap().name, "Main fault");
        assert_eq!(ctl.projection(TABLE).unwrap().leaf_row("2").unwrap().name, "Main fault");
        assert_eq!(ctl.renderer().actor_for("1").unwrap().restyles, vec![LegendAspect::Color]);
    }

    #[test]
    fn test_legend_change_restyles() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1")]);
        ctl.pump(&scene);
        scene
            .collection_mut("geology")
            .unwrap()
            .legend_changed(&ids(&["1"]), LegendAspect::Thickness);
        ctl.pump(&scene);
        assert_eq!(ctl.renderer().actor_for("1").unwrap().restyles, vec![LegendAspect::Thickness]);
    }

    #[test]
    fn test_renderer_failure_is_isolated_per_uid() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        ctl.renderer_mut().fail_on("2");
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2"), fault("3", "F3")]);
        ctl.pump(&scene);
        assert_eq!(ctl.registry().len(), 3);
        assert!(ctl.registry().get("2").unwrap().actor.is_none());
        assert!(ctl.registry().get("1").unwrap().actor.is_some());
        assert!(ctl.registry().get("3").unwrap().actor.is_some());
        assert_consistent(&ctl, &scene);
    }

    #[test]
    fn test_readded_uid_is_replaced() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1")]);
        ctl.pump(&scene);
        ctl.on_added(&scene, "geology", &ids(&["1"]));
        assert_eq!(ctl.registry().len(), 1);
        assert_eq!(ctl.renderer().disposed, 1);
        assert_eq!(ctl.renderer().live_count(), 1);
        assert_eq!(ctl.projection(TREE).unwrap().leaf_count(), 1);
    }

    #[test]
    fn test_readded_uid_stays_selected() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2")]);
        ctl.pump(&scene);
        assert!(ctl.select(&ids(&["1"])));
        let selections = counter::<SelectionChangedEvent>(&bus);

        ctl.on_added(&scene, "geology", &ids(&["1"]));
        assert_eq!(ctl.selection().get(), ids(&["1"]));
        assert!(ctl.projections().iter().all(|p| p.selection() == ids(&["1"])));
        assert_eq!(selections.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_add_keeps_selection_incremental_and_rebuilt() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, (0..10).map(|i| fault(&i.to_string(), &format!("F{}", i))).collect());
        ctl.pump(&scene);
        assert!(ctl.user_select(TREE, &ids(&["1", "2"])));
        let selections = counter::<SelectionChangedEvent>(&bus);

        // One row on ten: patched in place
        add(&mut scene, vec![fault("10", "F10")]);
        ctl.pump(&scene);
        // Five rows on eleven: past the rebuild fraction
        add(&mut scene, (11..16).map(|i| fault(&i.to_string(), &format!("F{}", i))).collect());
        ctl.pump(&scene);

        assert_eq!(ctl.registry().len(), 16);
        assert_eq!(ctl.selection().get(), ids(&["1", "2"]));
        for p in ctl.projections() {
            assert_eq!(p.selection(), ids(&["1", "2"]), "projection {}", p.label());
        }
        assert_eq!(selections.load(Ordering::SeqCst), 0);
        assert_consistent(&ctl, &scene);
    }

    #[test]
    fn test_first_default_choice_reaches_registry_and_actor() {
        let bus = EventBus::new();
        let mut scene = Scene::new();
        scene.set_emitter(SharedEmitter::from_emitter(bus.emitter()));
        scene.ensure_collection("geology");
        let cfg = ViewConfig::new("3D", ViewKind::View3D)
            .bind(
                CollectionProfile::new("geology", &[A_ROLE], true).with_choices(&["X", "Y"]),
                EntityFilter::all(),
            )
            .project(ProjectionSpec::tree("geology tree", "geology"));
        let mut ctl = SyncController::from_config(&cfg, HeadlessRenderer::new());
        ctl.attach(&bus);
        ctl.load(&scene);

        add(&mut scene, vec![fault("1", "F1")]);
        ctl.pump(&scene);
        assert_eq!(ctl.projection(TREE).unwrap().leaf_property("1"), Some("X"));
        assert_eq!(ctl.registry().get_property("1"), Some("X"));
        assert_eq!(ctl.renderer().actor_for("1").unwrap().content.property.as_deref(), Some("X"));
    }

    #[test]
    fn test_toggle_event_lists_only_flipped_uids() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        add(&mut scene, vec![fault("1", "F1"), fault("2", "F2")]);
        ctl.pump(&scene);
        ctl.user_toggle(TREE, &ToggleTarget::Leaf("1".into()), true);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe::<VisibilityChangedEvent, _>(move |e| {
            sink.lock().unwrap().push(e.clone());
        });

        let stale = ToggleDelta {
            turned_on: ids(&["1"]),
            turned_off: Vec::new(),
        };
        ctl.on_user_toggle(TABLE, &stale);
        assert!(seen.lock().unwrap().is_empty());

        let mixed = ToggleDelta {
            turned_on: ids(&["1", "2"]),
            turned_off: Vec::new(),
        };
        ctl.on_user_toggle(TABLE, &mixed);
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].turned_on, ids(&["2"]));
        assert!(events[0].turned_off.is_empty());
        assert_eq!(ctl.projection(TREE).unwrap().leaf_check("2"), Some(CheckState::Checked));
    }

    #[test]
    fn test_rearrange_keeps_checks_and_selection() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        let entities = (0..50)
            .map(|i| {
                Entity::new(format!("{}", i), format!("E{}", i))
                    .with_attr(A_ROLE, if i % 2 == 0 { "fault" } else { "horizon" })
                    .with_attr(A_FEATURE, format!("feat{}", i % 4))
            })
            .collect();
        add(&mut scene, entities);
        ctl.pump(&scene);
        let group = ctl.projection(TREE).unwrap().find_group(&["horizon"]).unwrap();
        ctl.user_toggle(TREE, &ToggleTarget::Group(group), true);
        ctl.user_select(TABLE, &ids(&["3", "8"]));
        let checked = ctl.projection(TREE).unwrap().checked_uids();

        assert!(ctl.rearrange(TREE, vec![A_ROLE.to_string(), A_FEATURE.to_string()], &scene));
        let tree = ctl.projection(TREE).unwrap();
        assert!(tree.find_group(&["horizon", "feat1"]).is_some());
        let mut after = tree.checked_uids();
        let mut before = checked;
        after.sort();
        before.sort();
        assert_eq!(after, before);
        assert_eq!(tree.selection(), ids(&["3", "8"]));
        assert_eq!(ctl.selection().get(), ids(&["3", "8"]));
    }

    #[test]
    fn test_close_unsubscribes_only_own_handlers() {
        let (bus, mut scene, mut ctl) = setup(EntityFilter::all());
        let mut other = SyncController::from_config(&config(EntityFilter::all()), HeadlessRenderer::new());
        other.attach(&bus);
        assert_eq!(bus.subscriber_count::<CollectionEvent>(), 2);

        add(&mut scene, vec![fault("1", "F1")]);
        ctl.pump(&scene);
        let renderer = ctl.close(&bus);
        assert_eq!(renderer.live_count(), 0);
        assert_eq!(bus.subscriber_count::<CollectionEvent>(), 1);

        add(&mut scene, vec![fault("2", "F2")]);
        assert_eq!(other.pump(&scene), 2);
        assert_eq!(other.registry().len(), 2);
    }

    #[test]
    fn test_unbound_collection_ignored() {
        let (_bus, mut scene, mut ctl) = setup(EntityFilter::all());
        scene
            .ensure_collection("wells")
            .add_entities(vec![Entity::new("w1", "W1")])
            .unwrap();
        assert_eq!(ctl.pump(&scene), 1);
        assert!(ctl.registry().is_empty());
    }
}
