//! ViewProjection: UI-agnostic tree/table mirror of a filtered collection subset.
//!
//! # Structure
//!
//! Rows are grouped by their hierarchy path (one label per hierarchy key).
//! Sibling groups are reused by label, so all entities sharing a path prefix
//! end up under the same group node. Tables are projections with an empty
//! hierarchy: every leaf sits at root level.
//!
//! # Checkboxes
//!
//! Leaf checkboxes mirror the registry `show` flag. Group checkboxes are
//! recomputed bottom-up from their children after every mutation and are
//! never set directly.
//!
//! # Patching
//!
//! [`ViewProjection::add`] and [`ViewProjection::remove`] patch the node
//! structure in place for small deltas. Past `rebuild_fraction` of the current
//! row count they rebuild via [`ViewProjection::populate`] instead. Both paths
//! produce the same structure.
//!
//! # Re-entrancy guard
//!
//! User gestures ([`ViewProjection::toggle`], [`ViewProjection::select_property`],
//! [`ViewProjection::user_select`]) return the delta the controller must route.
//! While a programmatic update is in flight ([`ViewProjection::programmatic`])
//! the state change is applied but the delta is swallowed, so mirroring a
//! change into a projection can never bounce back as a new gesture.

mod node;

pub use node::{
    CheckState, LeafData, NodeId, NodeKind, OutlineEntry, ProjectionNode, ProjectionRow, expand_choices,
};

use std::collections::HashMap;

use indexmap::IndexSet;
use log::{debug, trace, warn};

use super::actor_registry::ActorRegistry;
use super::view_config::ProjectionLayout;
use crate::config::{DEFAULT_REBUILD_FRACTION, PROPERTY_NONE};

/// Index of a projection inside its controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectionId(pub usize);

/// What a user clicked
#[derive(Debug, Clone, PartialEq)]
pub enum ToggleTarget {
    Leaf(String),
    Group(NodeId),
}

/// Consolidated result of one checkbox gesture
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToggleDelta {
    pub turned_on: Vec<String>,
    pub turned_off: Vec<String>,
}

impl ToggleDelta {
    pub fn is_empty(&self) -> bool {
        self.turned_on.is_empty() && self.turned_off.is_empty()
    }
}

/// A selector that had to change value (user pick or fallback to default)
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub uid: String,
    pub property: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Unchanged,
    Incremental,
    Rebuilt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchReport {
    pub outcome: PatchOutcome,
    /// Leaves whose stored property was no longer valid
    pub property_resets: Vec<PropertyChange>,
}

impl PatchReport {
    fn unchanged() -> Self {
        Self {
            outcome: PatchOutcome::Unchanged,
            property_resets: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct ViewProjection {
    id: ProjectionId,
    label: String,
    collection: String,
    layout: ProjectionLayout,

    // configure()
    hierarchy: Vec<String>,
    name_key: String,
    uid_key: String,
    property_key: String,
    default_choices: Vec<String>,
    rebuild_fraction: f32,

    nodes: HashMap<NodeId, ProjectionNode>,
    roots: Vec<NodeId>,
    leaves: HashMap<String, NodeId>,
    next_id: u64,

    selected: IndexSet<String>,

    /// Programmatic update depth; gestures are swallowed while > 0
    suspended: u32,
    suppressed: u64,
}

impl ViewProjection {
    pub fn new(id: ProjectionId, label: &str, collection: &str, layout: ProjectionLayout) -> Self {
        Self {
            id,
            label: label.to_string(),
            collection: collection.to_string(),
            layout,
            hierarchy: Vec::new(),
            name_key: crate::entities::keys::A_NAME.to_string(),
            uid_key: crate::entities::keys::A_UID.to_string(),
            property_key: "show_property".to_string(),
            default_choices: vec![PROPERTY_NONE.to_string()],
            rebuild_fraction: DEFAULT_REBUILD_FRACTION,
            nodes: HashMap::new(),
            roots: Vec::new(),
            leaves: HashMap::new(),
            next_id: 0,
            selected: IndexSet::new(),
            suspended: 0,
            suppressed: 0,
        }
    }

    /// Set grouping and column keys. Takes effect on the next populate().
    pub fn configure(
        &mut self,
        hierarchy: Vec<String>,
        name_key: &str,
        uid_key: &str,
        property_key: &str,
        default_property_choices: Vec<String>,
    ) {
        self.hierarchy = match self.layout {
            ProjectionLayout::Tree => hierarchy,
            ProjectionLayout::Table => Vec::new(),
        };
        self.name_key = name_key.to_string();
        self.uid_key = uid_key.to_string();
        self.property_key = property_key.to_string();
        self.default_choices = if default_property_choices.is_empty() {
            vec![PROPERTY_NONE.to_string()]
        } else {
            default_property_choices
        };
    }

    pub fn set_rebuild_fraction(&mut self, fraction: f32) {
        self.rebuild_fraction = fraction.max(0.0);
    }

    // === Accessors ===

    pub fn id(&self) -> ProjectionId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn layout(&self) -> ProjectionLayout {
        self.layout
    }

    pub fn hierarchy(&self) -> &[String] {
        &self.hierarchy
    }

    pub fn name_key(&self) -> &str {
        &self.name_key
    }

    pub fn default_choices(&self) -> &[String] {
        &self.default_choices
    }

    /// Column headers: hierarchy keys (trees only), then name, uid and property
    pub fn columns(&self) -> Vec<String> {
        let mut cols = self.hierarchy.clone();
        cols.extend([self.name_key.clone(), self.uid_key.clone(), self.property_key.clone()]);
        cols
    }

    pub fn node(&self, id: NodeId) -> Option<&ProjectionNode> {
        self.nodes.get(&id)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.leaves.contains_key(uid)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn group_count(&self) -> usize {
        self.nodes.len() - self.leaves.len()
    }

    pub fn leaf_node(&self, uid: &str) -> Option<&ProjectionNode> {
        self.leaves.get(uid).and_then(|id| self.nodes.get(id))
    }

    pub fn leaf_check(&self, uid: &str) -> Option<CheckState> {
        self.leaf_node(uid).map(|n| n.check)
    }

    pub fn leaf_property(&self, uid: &str) -> Option<&str> {
        self.leaf_node(uid).and_then(|n| n.leaf()).map(|l| l.property.as_str())
    }

    pub fn leaf_row(&self, uid: &str) -> Option<&ProjectionRow> {
        self.leaf_node(uid).and_then(|n| n.leaf()).map(|l| &l.row)
    }

    /// Group node at a label path from the root
    pub fn find_group(&self, path: &[&str]) -> Option<NodeId> {
        let mut parent: Option<NodeId> = None;
        for label in path {
            parent = Some(self.find_child_group(parent, label)?);
        }
        parent
    }

    pub fn group_check(&self, path: &[&str]) -> Option<CheckState> {
        self.find_group(path).and_then(|id| self.nodes.get(&id)).map(|n| n.check)
    }

    /// Leaf uids in display order
    pub fn uids(&self) -> Vec<String> {
        self.leaf_ids_dfs().into_iter().filter_map(|id| self.uid_of(id)).collect()
    }

    /// Leaf rows in display order
    pub fn rows(&self) -> Vec<ProjectionRow> {
        self.leaf_ids_dfs()
            .into_iter()
            .filter_map(|id| self.nodes.get(&id).and_then(|n| n.leaf()).map(|l| l.row.clone()))
            .collect()
    }

    pub fn checked_uids(&self) -> Vec<String> {
        self.leaf_ids_dfs()
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.check.is_checked()))
            .filter_map(|id| self.uid_of(id))
            .collect()
    }

    pub fn selection(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn is_selected(&self, uid: &str) -> bool {
        self.selected.contains(uid)
    }

    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) {
        if let Some(n) = self.nodes.get_mut(&id) {
            n.expanded = expanded;
        }
    }

    /// Depth-first structural snapshot
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(NodeId, usize)> = self.roots.iter().rev().map(|id| (*id, 0)).collect();
        while let Some((id, depth)) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            let leaf = node.leaf();
            out.push(OutlineEntry {
                depth,
                label: node.label().to_string(),
                uid: leaf.map(|l| l.row.uid.clone()),
                check: node.check,
                property: leaf.map(|l| l.property.clone()),
                expanded: node.expanded,
                selected: leaf.is_some_and(|l| self.selected.contains(&l.row.uid)),
            });
            stack.extend(node.children.iter().rev().map(|c| (*c, depth + 1)));
        }
        out
    }

    // === Re-entrancy guard ===

    /// Run a programmatic update: gestures inside return no delta.
    pub fn programmatic<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.suspended += 1;
        let out = f(self);
        self.suspended -= 1;
        out
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended > 0
    }

    /// Gestures swallowed by the guard so far
    pub fn suppressed_emissions(&self) -> u64 {
        self.suppressed
    }

    fn swallow(&mut self, what: &str) -> bool {
        if self.suspended > 0 {
            self.suppressed += 1;
            trace!("{}: {} suppressed during programmatic update", self.label, what);
            return true;
        }
        false
    }

    // === Structural mutation ===

    /// Full rebuild from rows. Leaf checkboxes come from the registry.
    pub fn populate(&mut self, rows: &[ProjectionRow], registry: &ActorRegistry) -> Vec<PropertyChange> {
        self.nodes.clear();
        self.roots.clear();
        self.leaves.clear();

        let mut resets = Vec::new();
        for row in rows {
            if self.leaves.contains_key(&row.uid) {
                debug!("{}: duplicate row {} ignored", self.label, row.uid);
                continue;
            }
            if let Some(reset) = self.attach_row(row.clone(), registry) {
                resets.push(reset);
            }
        }
        self.recompute_all();
        self.selected.retain(|uid| self.leaves.contains_key(uid));
        debug!(
            "{}: populated {} leaves in {} groups",
            self.label,
            self.leaves.len(),
            self.nodes.len() - self.leaves.len()
        );
        resets
    }

    fn exceeds_threshold(&self, delta: usize) -> bool {
        delta as f32 > self.rebuild_fraction * self.leaves.len() as f32
    }

    /// Add leaves for new rows. Rows already present are re-attached.
    pub fn add(&mut self, rows: Vec<ProjectionRow>, registry: &ActorRegistry) -> PatchReport {
        let mut fresh: Vec<ProjectionRow> = Vec::with_capacity(rows.len());
        for row in rows {
            if fresh.iter().any(|r| r.uid == row.uid) {
                continue;
            }
            if self.leaves.contains_key(&row.uid) {
                debug!("{}: {} already present, re-attaching", self.label, row.uid);
                self.detach_leaf(&row.uid);
            }
            fresh.push(row);
        }
        if fresh.is_empty() {
            return PatchReport::unchanged();
        }

        if self.exceeds_threshold(fresh.len()) {
            debug!("{}: add of {} rows, rebuilding", self.label, fresh.len());
            let mut all = self.rows();
            all.extend(fresh);
            let property_resets = self.populate(&all, registry);
            return PatchReport {
                outcome: PatchOutcome::Rebuilt,
                property_resets,
            };
        }

        let mut property_resets = Vec::new();
        for row in fresh {
            let uid = row.uid.clone();
            if let Some(reset) = self.attach_row(row, registry) {
                property_resets.push(reset);
            }
            let parent = self.leaves.get(&uid).and_then(|id| self.nodes.get(id)).and_then(|n| n.parent);
            self.recompute_upwards(parent);
        }
        PatchReport {
            outcome: PatchOutcome::Incremental,
            property_resets,
        }
    }

    /// Remove leaves, pruning groups left without children.
    pub fn remove(&mut self, uids: &[String], registry: &ActorRegistry) -> PatchReport {
        let mut present: Vec<&String> = Vec::with_capacity(uids.len());
        for uid in uids {
            if !self.leaves.contains_key(uid) {
                debug!("{}: remove of unknown uid {}", self.label, uid);
            } else if !present.contains(&uid) {
                present.push(uid);
            }
        }
        if present.is_empty() {
            return PatchReport::unchanged();
        }

        if self.exceeds_threshold(present.len()) {
            debug!("{}: remove of {} rows, rebuilding", self.label, present.len());
            let keep: Vec<ProjectionRow> = self
                .rows()
                .into_iter()
                .filter(|r| !present.contains(&&r.uid))
                .collect();
            let property_resets = self.populate(&keep, registry);
            return PatchReport {
                outcome: PatchOutcome::Rebuilt,
                property_resets,
            };
        }

        for uid in present {
            self.detach_leaf(uid);
        }
        self.selected.retain(|uid| self.leaves.contains_key(uid));
        PatchReport {
            outcome: PatchOutcome::Incremental,
            property_resets: Vec::new(),
        }
    }

    /// Regroup under a new key order. Checked leaves, properties and selection survive.
    pub fn rearrange_hierarchy(
        &mut self,
        new_order: Vec<String>,
        rows: &[ProjectionRow],
        registry: &ActorRegistry,
    ) -> Vec<PropertyChange> {
        if self.layout == ProjectionLayout::Table && !new_order.is_empty() {
            warn!("{}: tables have no hierarchy, rearrange ignored", self.label);
            return Vec::new();
        }
        let selection: Vec<String> = self.selection();
        let snapshot: HashMap<String, (CheckState, String)> = self
            .leaves
            .iter()
            .filter_map(|(uid, id)| {
                let n = self.nodes.get(id)?;
                Some((uid.clone(), (n.check, n.leaf()?.property.clone())))
            })
            .collect();

        debug!("{}: hierarchy {:?} -> {:?}", self.label, self.hierarchy, new_order);
        self.hierarchy = new_order;
        let resets = self.populate(rows, registry);

        for (uid, (check, property)) in snapshot {
            let Some(id) = self.leaves.get(&uid).copied() else {
                continue;
            };
            if let Some(node) = self.nodes.get_mut(&id) {
                node.check = check;
                if let NodeKind::Leaf(leaf) = &mut node.kind
                    && leaf.choices.contains(&property)
                {
                    leaf.property = property;
                }
            }
        }
        self.recompute_all();
        self.selected = selection
            .into_iter()
            .filter(|uid| self.leaves.contains_key(uid))
            .collect();
        resets
    }

    /// Move one leaf after its hierarchy path changed, keeping its state.
    pub fn relocate(&mut self, row: ProjectionRow, registry: &ActorRegistry) {
        let Some((check, property)) = self.leaf_node(&row.uid).and_then(|n| Some((n.check, n.leaf()?.property.clone())))
        else {
            debug!("{}: relocate of unknown uid {}", self.label, row.uid);
            return;
        };
        let uid = row.uid.clone();
        self.detach_leaf(&uid);
        self.attach_row(row, registry);
        let Some(id) = self.leaves.get(&uid).copied() else {
            return;
        };
        let parent = self.nodes.get_mut(&id).and_then(|node| {
            node.check = check;
            if let NodeKind::Leaf(leaf) = &mut node.kind
                && leaf.choices.contains(&property)
            {
                leaf.property = property;
            }
            node.parent
        });
        self.recompute_upwards(parent);
    }

    /// Change a leaf's display name in place
    pub fn rename(&mut self, uid: &str, name: &str) -> bool {
        let Some(node) = self.leaves.get(uid).and_then(|id| self.nodes.get_mut(id)) else {
            debug!("{}: rename of unknown uid {}", self.label, uid);
            return false;
        };
        match &mut node.kind {
            NodeKind::Leaf(leaf) if leaf.row.name != name => {
                leaf.row.name = name.to_string();
                true
            }
            _ => false,
        }
    }

    // === Checkboxes ===

    /// User clicked a checkbox. Returns one consolidated delta, or None when
    /// nothing changed or a programmatic update is in flight.
    pub fn toggle(&mut self, target: &ToggleTarget, on: bool) -> Option<ToggleDelta> {
        let id = match target {
            ToggleTarget::Leaf(uid) => self.leaves.get(uid).copied(),
            ToggleTarget::Group(id) => self.nodes.contains_key(id).then_some(*id),
        };
        let Some(id) = id else {
            debug!("{}: toggle of unknown target {:?}", self.label, target);
            return None;
        };

        // Descendants first, then every group of the subtree, then ancestors
        let state = CheckState::from_bool(on);
        let mut delta = ToggleDelta::default();
        for leaf_id in self.subtree_leaves(id) {
            let Some(node) = self.nodes.get_mut(&leaf_id) else {
                continue;
            };
            if node.check == state {
                continue;
            }
            node.check = state;
            if let Some(uid) = node.uid() {
                let uid = uid.to_string();
                if on { delta.turned_on.push(uid) } else { delta.turned_off.push(uid) }
            }
        }
        self.recompute_subtree(id);
        let parent = self.nodes.get(&id).and_then(|n| n.parent);
        self.recompute_upwards(parent);

        if delta.is_empty() || self.swallow("toggle") {
            return None;
        }
        trace!("{}: toggle -> {:?}", self.label, delta);
        Some(delta)
    }

    /// Programmatic checkbox update (mirroring registry state). Never emits.
    pub fn set_checked(&mut self, uids: &[String], on: bool) {
        let state = CheckState::from_bool(on);
        let mut touched: Vec<Option<NodeId>> = Vec::new();
        for uid in uids {
            let Some(node) = self.leaves.get(uid).and_then(|id| self.nodes.get_mut(id)) else {
                debug!("{}: set_checked on unknown uid {}", self.label, uid);
                continue;
            };
            if node.check != state {
                node.check = state;
                if !touched.contains(&node.parent) {
                    touched.push(node.parent);
                }
            }
        }
        for parent in touched {
            self.recompute_upwards(parent);
        }
    }

    // === Property selectors ===

    /// User picked a property. Returns the change to route, None if invalid,
    /// unchanged or suppressed.
    pub fn select_property(&mut self, uid: &str, choice: &str) -> Option<PropertyChange> {
        let label = self.label.clone();
        let leaf = self.leaf_data_mut(uid)?;
        if !leaf.choices.iter().any(|c| c == choice) {
            debug!("{}: '{}' is not a choice for {}", label, choice, uid);
            return None;
        }
        if leaf.property == choice {
            return None;
        }
        leaf.property = choice.to_string();
        if self.swallow("property pick") {
            return None;
        }
        Some(PropertyChange {
            uid: uid.to_string(),
            property: choice.to_string(),
        })
    }

    /// Programmatic selector update. Invalid values fall back to the default.
    pub fn set_property(&mut self, uid: &str, property: Option<&str>) {
        let default = self.default_choices[0].clone();
        if let Some(leaf) = self.leaf_data_mut(uid) {
            leaf.property = property
                .filter(|p| leaf.choices.iter().any(|c| c == p))
                .map(str::to_string)
                .unwrap_or(default);
        }
    }

    /// Replace selector option lists. Selectors whose value vanished reset to
    /// the first default choice and are reported.
    pub fn update_properties(&mut self, updates: &[(String, Vec<(String, usize)>)]) -> Vec<PropertyChange> {
        let defaults = self.default_choices.clone();
        let mut resets = Vec::new();
        for (uid, properties) in updates {
            let Some(leaf) = self.leaf_data_mut(uid) else {
                continue;
            };
            leaf.row.properties = properties.clone();
            leaf.choices = expand_choices(&defaults, properties);
            if !leaf.choices.contains(&leaf.property) {
                debug!("property '{}' of {} gone, reset to '{}'", leaf.property, uid, defaults[0]);
                leaf.property = defaults[0].clone();
                resets.push(PropertyChange {
                    uid: uid.clone(),
                    property: leaf.property.clone(),
                });
            }
        }
        resets
    }

    // === Selection mirror ===

    /// Programmatic selection update (restricted to present leaves)
    pub fn set_selection(&mut self, uids: &[String]) {
        self.selected = uids.iter().filter(|u| self.leaves.contains_key(*u)).cloned().collect();
    }

    /// User selected rows. Returns the uids to route, None when unchanged or suppressed.
    pub fn user_select(&mut self, uids: &[String]) -> Option<Vec<String>> {
        let next: IndexSet<String> = uids.iter().filter(|u| self.leaves.contains_key(*u)).cloned().collect();
        if next == self.selected {
            return None;
        }
        self.selected = next;
        if self.swallow("selection") {
            return None;
        }
        Some(self.selection())
    }

    // === Internals ===

    fn alloc(&mut self, parent: Option<NodeId>, kind: NodeKind, check: CheckState) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            ProjectionNode {
                id,
                parent,
                children: Vec::new(),
                kind,
                check,
                expanded: true,
            },
        );
        match parent.and_then(|p| self.nodes.get_mut(&p)) {
            Some(p) => p.children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    fn find_child_group(&self, parent: Option<NodeId>, label: &str) -> Option<NodeId> {
        let siblings: &[NodeId] = match parent {
            Some(p) => self.nodes.get(&p).map(|n| n.children.as_slice()).unwrap_or(&[]),
            None => &self.roots,
        };
        siblings.iter().copied().find(|id| {
            self.nodes
                .get(id)
                .is_some_and(|n| matches!(&n.kind, NodeKind::Group { label: l } if l == label))
        })
    }

    fn ensure_group_path(&mut self, path: &[String]) -> Option<NodeId> {
        let mut parent: Option<NodeId> = None;
        for label in path {
            let id = match self.find_child_group(parent, label) {
                Some(id) => id,
                None => self.alloc(parent, NodeKind::Group { label: label.clone() }, CheckState::Unchecked),
            };
            parent = Some(id);
        }
        parent
    }

    fn attach_row(&mut self, row: ProjectionRow, registry: &ActorRegistry) -> Option<PropertyChange> {
        let show = registry.get_show(&row.uid).unwrap_or_else(|| {
            debug!("{}: {} not in registry, shown unchecked", self.label, row.uid);
            false
        });
        let choices = expand_choices(&self.default_choices, &row.properties);
        let default = self.default_choices[0].clone();
        let (property, reset) = match registry.get_property(&row.uid) {
            Some(p) if choices.iter().any(|c| c == p) => (p.to_string(), false),
            Some(p) => {
                debug!("{}: stored property '{}' of {} invalid, using '{}'", self.label, p, row.uid, default);
                (default, true)
            }
            // Registry shows nothing: only "none" agrees with it
            None => {
                let reset = default != PROPERTY_NONE;
                (default, reset)
            }
        };
        let uid = row.uid.clone();
        let parent = self.ensure_group_path(&row.path);
        let id = self.alloc(
            parent,
            NodeKind::Leaf(LeafData {
                row,
                property: property.clone(),
                choices,
            }),
            CheckState::from_bool(show),
        );
        self.leaves.insert(uid.clone(), id);
        reset.then_some(PropertyChange { uid, property })
    }

    /// Unlink a leaf and prune ancestors left empty
    fn detach_leaf(&mut self, uid: &str) -> Option<ProjectionNode> {
        let id = self.leaves.remove(uid)?;
        let node = self.nodes.remove(&id)?;
        let mut child = id;
        let mut parent = node.parent;
        loop {
            match parent {
                Some(p) => {
                    let Some(pn) = self.nodes.get_mut(&p) else {
                        break;
                    };
                    pn.children.retain(|c| *c != child);
                    if !pn.children.is_empty() {
                        self.recompute_upwards(Some(p));
                        break;
                    }
                    trace!("{}: pruning empty group '{}'", self.label, pn.label());
                    let next = pn.parent;
                    self.nodes.remove(&p);
                    child = p;
                    parent = next;
                }
                None => {
                    self.roots.retain(|r| *r != child);
                    break;
                }
            }
        }
        Some(node)
    }

    fn leaf_data_mut(&mut self, uid: &str) -> Option<&mut LeafData> {
        let id = self.leaves.get(uid)?;
        match &mut self.nodes.get_mut(id)?.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Group { .. } => None,
        }
    }

    fn uid_of(&self, id: NodeId) -> Option<String> {
        self.nodes.get(&id).and_then(|n| n.uid()).map(str::to_string)
    }

    fn leaf_ids_dfs(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.leaves.len());
        for root in &self.roots {
            out.extend(self.subtree_leaves(*root));
        }
        out
    }

    /// Leaves under a node in display order (the node itself if it is a leaf)
    fn subtree_leaves(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.nodes.get(&cur) else {
                continue;
            };
            if node.is_leaf() {
                out.push(cur);
            } else {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    fn recompute_group(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        if node.is_leaf() {
            return;
        }
        let state = CheckState::aggregate(
            node.children
                .iter()
                .filter_map(|c| self.nodes.get(c))
                .map(|c| c.check)
                .collect::<Vec<_>>(),
        );
        if let Some(node) = self.nodes.get_mut(&id) {
            node.check = state;
        }
    }

    fn recompute_upwards(&mut self, mut cur: Option<NodeId>) {
        while let Some(id) = cur {
            self.recompute_group(id);
            cur = self.nodes.get(&id).and_then(|n| n.parent);
        }
    }

    /// Post-order recompute of every group under (and including) a node
    fn recompute_subtree(&mut self, id: NodeId) {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.get(&cur)
                && !node.is_leaf()
            {
                order.push(cur);
                stack.extend(node.children.iter().copied());
            }
        }
        for gid in order.into_iter().rev() {
            self.recompute_group(gid);
        }
    }

    fn recompute_all(&mut self) {
        for root in self.roots.clone() {
            self.recompute_subtree(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CheckState::*;

    fn row(uid: &str, name: &str, path: &[&str]) -> ProjectionRow {
        ProjectionRow {
            uid: uid.to_string(),
            name: name.to_string(),
            path: path.iter().map(|s| s.to_string()).collect(),
            properties: Vec::new(),
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn registry(rows: &[(&str, bool)]) -> ActorRegistry {
        let mut reg = ActorRegistry::new();
        for (uid, show) in rows {
            reg.register(uid, None, *show, "geology", None).unwrap();
        }
        reg
    }

    fn tree() -> ViewProjection {
        let mut p = ViewProjection::new(ProjectionId(0), "geology tree", "geology", ProjectionLayout::Tree);
        p.configure(vec!["role".into()], "name", "uid", "show_property", vec!["none".into(), "X".into()]);
        p
    }

    fn faults() -> (ViewProjection, ActorRegistry) {
        let reg = registry(&[("1", false), ("2", false)]);
        let mut p = tree();
        p.populate(&[row("1", "F1", &["fault"]), row("2", "F2", &["fault"])], &reg);
        (p, reg)
    }

    /// Every group equals the aggregate of its children
    fn assert_tristate(p: &ViewProjection) {
        for node in p.nodes.values().filter(|n| !n.is_leaf()) {
            let expect = CheckState::aggregate(node.children.iter().map(|c| p.nodes[c].check).collect::<Vec<_>>());
            assert_eq!(node.check, expect, "group {}", node.label());
            assert!(!node.children.is_empty(), "empty group {}", node.label());
        }
    }

    #[test]
    fn test_selection_survives_add_on_both_paths() {
        let uids: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let mut reg = ActorRegistry::new();
        for uid in &uids {
            reg.register(uid, None, false, "geology", None).unwrap();
        }
        let mut p = tree();
        let rows: Vec<ProjectionRow> = uids.iter().map(|u| row(u, u, &["fault"])).collect();
        p.populate(&rows, &reg);
        p.set_selection(&ids(&["1", "2"]));

        reg.register("10", None, false, "geology", None).unwrap();
        let report = p.add(vec![row("10", "10", &["horizon"])], &reg);
        assert_eq!(report.outcome, PatchOutcome::Incremental);
        assert_eq!(p.selection(), ids(&["1", "2"]));

        let more: Vec<ProjectionRow> = (11..16)
            .map(|i| {
                let uid = i.to_string();
                reg.register(&uid, None, false, "geology", None).unwrap();
                row(&uid, &uid, &["horizon"])
            })
            .collect();
        let report = p.add(more, &reg);
        assert_eq!(report.outcome, PatchOutcome::Rebuilt);
        assert_eq!(p.selection(), ids(&["1", "2"]));
        assert_eq!(p.leaf_count(), 16);
    }

    #[test]
    fn test_first_choice_other_than_none_is_reported() {
        let reg = registry(&[("1", false)]);
        let mut p = tree();
        p.configure(vec!["role".into()], "name", "uid", "show_property", vec!["X".into(), "Y".into()]);
        let resets = p.populate(&[row("1", "F1", &["fault"])], &reg);
        assert_eq!(p.leaf_property("1"), Some("X"));
        assert_eq!(
            resets,
            vec![PropertyChange {
                uid: "1".to_string(),
                property: "X".to_string()
            }]
        );

        // Default "none" agrees with an empty registry property
        let (_, reg) = faults();
        let mut p = tree();
        assert!(p.populate(&[row("1", "F1", &["fault"])], &reg).is_empty());
    }

    #[test]
    fn test_populate_groups_by_role() {
        let (p, _) = faults();
        assert_eq!(p.roots().len(), 1);
        assert_eq!(p.group_check(&["fault"]), Some(Unchecked));
        assert_eq!(p.leaf_check("1"), Some(Unchecked));
        assert_eq!(p.leaf_check("2"), Some(Unchecked));
        assert!(p.node(p.roots()[0]).unwrap().expanded);
    }

    #[test]
    fn test_toggle_leaf_makes_group_partial() {
        let (mut p, _) = faults();
        let delta = p.toggle(&ToggleTarget::Leaf("1".into()), true).unwrap();
        assert_eq!(delta.turned_on, ids(&["1"]));
        assert!(delta.turned_off.is_empty());
        assert_eq!(p.group_check(&["fault"]), Some(PartiallyChecked));
        assert_tristate(&p);
    }

    #[test]
    fn test_toggle_round_trip_restores_state() {
        let reg = registry(&[("1", false), ("2", true), ("3", false)]);
        let mut p = tree();
        p.configure(vec!["role".into(), "feature".into()], "name", "uid", "show_property", vec![]);
        p.populate(
            &[
                row("1", "F1", &["fault", "A"]),
                row("2", "F2", &["fault", "A"]),
                row("3", "F3", &["fault", "B"]),
            ],
            &reg,
        );
        let before = p.outline();
        p.toggle(&ToggleTarget::Leaf("1".into()), true).unwrap();
        assert_eq!(p.group_check(&["fault", "A"]), Some(Checked));
        assert_eq!(p.group_check(&["fault"]), Some(PartiallyChecked));
        p.toggle(&ToggleTarget::Leaf("1".into()), false).unwrap();
        assert_eq!(p.outline(), before);
    }

    #[test]
    fn test_group_toggle_is_one_delta() {
        let reg = registry(&[("1", true), ("2", false), ("3", false)]);
        let mut p = tree();
        p.populate(
            &[row("1", "F1", &["fault"]), row("2", "F2", &["fault"]), row("3", "F3", &["fault"])],
            &reg,
        );
        let group = p.find_group(&["fault"]).unwrap();
        let delta = p.toggle(&ToggleTarget::Group(group), true).unwrap();
        assert_eq!(delta.turned_on, ids(&["2", "3"]));
        assert_eq!(p.group_check(&["fault"]), Some(Checked));

        // Nothing left to change
        assert!(p.toggle(&ToggleTarget::Group(group), true).is_none());
        assert_tristate(&p);
    }

    #[test]
    fn test_toggle_suppressed_while_programmatic() {
        let (mut p, _) = faults();
        let delta = p.programmatic(|p| p.toggle(&ToggleTarget::Leaf("1".into()), true));
        assert!(delta.is_none());
        // State still applied
        assert_eq!(p.leaf_check("1"), Some(Checked));
        assert_eq!(p.suppressed_emissions(), 1);
        assert!(!p.is_suspended());
    }

    #[test]
    fn test_add_new_top_level_group() {
        let (mut p, mut reg) = faults();
        reg.register("3", None, true, "geology", None).unwrap();
        p.set_rebuild_fraction(1.0);
        let report = p.add(vec![row("3", "H1", &["horizon"])], &reg);
        assert_eq!(report.outcome, PatchOutcome::Incremental);
        assert_eq!(p.roots().len(), 2);
        assert_eq!(p.group_check(&["horizon"]), Some(Checked));
        assert_eq!(p.group_check(&["fault"]), Some(Unchecked));
        assert_eq!(p.uids(), ids(&["1", "2", "3"]));
    }

    #[test]
    fn test_add_past_threshold_rebuilds_same_structure() {
        let (mut incremental, mut reg) = faults();
        reg.register("3", None, true, "geology", None).unwrap();
        let mut rebuilt = tree();
        rebuilt.populate(&[row("1", "F1", &["fault"]), row("2", "F2", &["fault"])], &reg);

        incremental.set_rebuild_fraction(1.0);
        assert_eq!(incremental.add(vec![row("3", "H1", &["horizon"])], &reg).outcome, PatchOutcome::Incremental);
        assert_eq!(rebuilt.add(vec![row("3", "H1", &["horizon"])], &reg).outcome, PatchOutcome::Rebuilt);
        assert_eq!(incremental.outline(), rebuilt.outline());
    }

    #[test]
    fn test_remove_keeps_group_with_remaining_child() {
        let (mut p, reg) = faults();
        p.toggle(&ToggleTarget::Leaf("1".into()), true);
        p.set_rebuild_fraction(1.0);
        let report = p.remove(&ids(&["1"]), &reg);
        assert_eq!(report.outcome, PatchOutcome::Incremental);
        assert!(!p.contains("1"));
        assert_eq!(p.group_check(&["fault"]), Some(Unchecked));
        assert_eq!(p.uids(), ids(&["2"]));
    }

    #[test]
    fn test_remove_all_prunes_group() {
        let (mut p, reg) = faults();
        p.set_rebuild_fraction(1.0);
        p.remove(&ids(&["1", "2"]), &reg);
        assert!(p.find_group(&["fault"]).is_none());
        assert!(p.roots().is_empty());
        assert_eq!(p.group_count(), 0);
    }

    #[test]
    fn test_remove_prunes_nested_chain() {
        let reg = registry(&[("1", false), ("2", false)]);
        let mut p = tree();
        p.configure(vec!["role".into(), "feature".into(), "scenario".into()], "name", "uid", "p", vec![]);
        p.populate(&[row("1", "a", &["fault", "A", "s1"]), row("2", "b", &["fault", "B", "s1"])], &reg);
        p.set_rebuild_fraction(1.0);
        p.remove(&ids(&["1"]), &reg);
        assert!(p.find_group(&["fault", "A"]).is_none());
        assert!(p.find_group(&["fault", "B", "s1"]).is_some());
        assert_tristate(&p);
    }

    #[test]
    fn test_remove_unknown_is_tolerated() {
        let (mut p, reg) = faults();
        assert_eq!(p.remove(&ids(&["ghost"]), &reg).outcome, PatchOutcome::Unchanged);
        assert_eq!(p.leaf_count(), 2);
    }

    #[test]
    fn test_populate_idempotent() {
        let (mut p, reg) = faults();
        let rows = p.rows();
        let first = p.outline();
        p.populate(&rows, &reg);
        assert_eq!(p.outline(), first);
    }

    #[test]
    fn test_rearrange_keeps_checks_and_selection() {
        let mut reg = ActorRegistry::new();
        let mut rows = Vec::new();
        for i in 0..50 {
            let uid = format!("{}", i);
            reg.register(&uid, None, i % 3 == 0, "geology", None).unwrap();
            let role = if i % 2 == 0 { "fault" } else { "horizon" };
            let feature = format!("feat{}", i % 5);
            rows.push(row(&uid, &format!("E{}", i), &[role, &feature]));
        }
        let mut p = tree();
        p.populate(
            &rows.iter().map(|r| ProjectionRow { path: r.path[..1].to_vec(), ..r.clone() }).collect::<Vec<_>>(),
            &reg,
        );
        p.set_selection(&ids(&["4", "7"]));
        let checked = p.checked_uids();

        p.rearrange_hierarchy(vec!["role".into(), "feature".into()], &rows, &reg);
        assert_eq!(p.hierarchy(), &["role".to_string(), "feature".to_string()]);
        assert!(p.find_group(&["fault", "feat0"]).is_some());
        let mut after = p.checked_uids();
        let mut before = checked;
        after.sort();
        before.sort();
        assert_eq!(after, before);
        assert_eq!(p.selection(), ids(&["4", "7"]));
        assert_tristate(&p);
    }

    #[test]
    fn test_stale_property_falls_back_to_default() {
        let mut reg = registry(&[("1", true)]);
        reg.set_property("1", Some("poro".into()));
        let mut p = tree();
        let resets = p.populate(&[row("1", "F1", &["fault"])], &reg);
        assert_eq!(p.leaf_property("1"), Some("none"));
        assert_eq!(resets, vec![PropertyChange { uid: "1".into(), property: "none".into() }]);
    }

    #[test]
    fn test_update_properties_resets_missing() {
        let reg = registry(&[("1", true), ("2", true)]);
        let mut p = tree();
        let mut r1 = row("1", "F1", &["fault"]);
        r1.properties = vec![("poro".into(), 1)];
        let mut r2 = row("2", "F2", &["fault"]);
        r2.properties = vec![("poro".into(), 1)];
        p.populate(&[r1, r2], &reg);
        assert_eq!(p.select_property("1", "poro").map(|c| c.property), Some("poro".to_string()));
        assert_eq!(p.select_property("2", "X").map(|c| c.property), Some("X".to_string()));

        let resets = p.update_properties(&[
            ("1".to_string(), vec![("perm".to_string(), 1)]),
            ("2".to_string(), vec![]),
        ]);
        assert_eq!(resets, vec![PropertyChange { uid: "1".into(), property: "none".into() }]);
        assert_eq!(p.leaf_property("2"), Some("X"));
        assert!(p.leaf_node("1").unwrap().leaf().unwrap().choices.contains(&"perm".to_string()));
    }

    #[test]
    fn test_select_property_rejects_unknown_choice() {
        let (mut p, _) = faults();
        assert!(p.select_property("1", "nope").is_none());
        assert!(p.select_property("1", "none").is_none());
        assert_eq!(p.leaf_property("1"), Some("none"));
    }

    #[test]
    fn test_missing_hierarchy_value_uses_unspecified_group() {
        use crate::entities::{Entity, EntityCollection, EntitySource};
        let mut coll = EntityCollection::new("geology");
        coll.add_entities(vec![Entity::new("1", "loose")]).unwrap();
        let r = ProjectionRow::read(&coll as &dyn EntitySource, "1", &["role".to_string()], "name");
        assert_eq!(r.path, vec![crate::config::UNSPECIFIED_LABEL.to_string()]);
        assert_eq!(r.name, "loose");
    }

    #[test]
    fn test_relocate_keeps_state() {
        let (mut p, reg) = faults();
        p.toggle(&ToggleTarget::Leaf("1".into()), true);
        p.set_selection(&ids(&["1"]));
        p.relocate(row("1", "F1", &["horizon"]), &reg);
        assert_eq!(p.leaf_check("1"), Some(Checked));
        assert_eq!(p.group_check(&["horizon"]), Some(Checked));
        assert_eq!(p.group_check(&["fault"]), Some(Unchecked));
        assert!(p.is_selected("1"));
    }

    #[test]
    fn test_table_layout_is_flat() {
        let reg = registry(&[("1", true), ("2", false)]);
        let mut p = ViewProjection::new(ProjectionId(1), "boundary table", "boundary", ProjectionLayout::Table);
        p.configure(vec!["role".into()], "name", "uid", "show_property", vec![]);
        p.populate(&[row("1", "B1", &[]), row("2", "B2", &[])], &reg);
        assert_eq!(p.group_count(), 0);
        assert_eq!(p.roots().len(), 2);
        assert!(p.rearrange_hierarchy(vec!["role".into()], &[], &reg).is_empty());
        assert_eq!(p.leaf_count(), 2);
    }

    #[test]
    fn test_user_select_filters_unknown_and_dedups() {
        let (mut p, _) = faults();
        assert_eq!(p.user_select(&ids(&["2", "ghost"])), Some(ids(&["2"])));
        assert_eq!(p.user_select(&ids(&["2"])), None);
        assert_eq!(p.programmatic(|p| p.user_select(&ids(&["1"]))), None);
        assert_eq!(p.selection(), ids(&["1"]));
    }
}
