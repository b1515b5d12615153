//! Projection node model: what a tree or table widget renders against.
//!
//! Group nodes carry an aggregate tri-state checkbox; leaf nodes carry the
//! entity uid, its name, a two-state checkbox and a property selector.

use crate::config::UNSPECIFIED_LABEL;
use crate::entities::traits::EntitySource;

/// Checkbox state. Leaves are only ever Checked / Unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckState {
    Unchecked,
    Checked,
    PartiallyChecked,
}

impl CheckState {
    pub fn from_bool(on: bool) -> Self {
        if on { CheckState::Checked } else { CheckState::Unchecked }
    }

    pub fn is_checked(&self) -> bool {
        matches!(self, CheckState::Checked)
    }

    /// Bottom-up aggregation over child states. No children means Unchecked.
    pub fn aggregate<I: IntoIterator<Item = CheckState>>(states: I) -> Self {
        let (mut any_on, mut any_off) = (false, false);
        for s in states {
            match s {
                CheckState::Checked => any_on = true,
                CheckState::Unchecked => any_off = true,
                CheckState::PartiallyChecked => return CheckState::PartiallyChecked,
            }
            if any_on && any_off {
                return CheckState::PartiallyChecked;
            }
        }
        CheckState::from_bool(any_on)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CheckState::Unchecked => "[ ]",
            CheckState::Checked => "[x]",
            CheckState::PartiallyChecked => "[~]",
        }
    }
}

/// Stable id of a node inside one projection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

/// Everything a projection needs to know about one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRow {
    pub uid: String,
    pub name: String,
    /// One group label per hierarchy key
    pub path: Vec<String>,
    /// Entity properties with component counts
    pub properties: Vec<(String, usize)>,
}

impl ProjectionRow {
    /// Read a row from a source. Missing hierarchy values go to the unspecified group.
    pub fn read(source: &dyn EntitySource, uid: &str, hierarchy: &[String], name_key: &str) -> Self {
        let path = hierarchy
            .iter()
            .map(|key| {
                source
                    .get_attribute(uid, key)
                    .map(|v| v.label())
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| {
                        log::debug!("{}: no '{}' for {}, using '{}'", source.name(), key, uid, UNSPECIFIED_LABEL);
                        UNSPECIFIED_LABEL.to_string()
                    })
            })
            .collect();
        let name = source
            .get_attribute(uid, name_key)
            .map(|v| v.label())
            .unwrap_or_else(|| uid.to_string());
        Self {
            uid: uid.to_string(),
            name,
            path,
            properties: source.get_property_names(uid),
        }
    }
}

/// Leaf payload
#[derive(Debug, Clone, PartialEq)]
pub struct LeafData {
    pub row: ProjectionRow,
    /// Current selector value (always one of `choices`)
    pub property: String,
    pub choices: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Group { label: String },
    Leaf(LeafData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
    pub check: CheckState,
    pub expanded: bool,
}

impl ProjectionNode {
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn label(&self) -> &str {
        match &self.kind {
            NodeKind::Group { label } => label,
            NodeKind::Leaf(leaf) => &leaf.row.name,
        }
    }

    pub fn leaf(&self) -> Option<&LeafData> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Group { .. } => None,
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.leaf().map(|l| l.row.uid.as_str())
    }
}

/// Selector options: defaults first, then every property. Vector properties add
/// one `name[i]` entry per component after the whole-vector entry.
pub fn expand_choices(defaults: &[String], properties: &[(String, usize)]) -> Vec<String> {
    let mut out: Vec<String> = defaults.to_vec();
    for (name, components) in properties {
        if !out.contains(name) {
            out.push(name.clone());
        }
        if *components > 1 {
            out.extend((0..*components).map(|i| format!("{}[{}]", name, i)));
        }
    }
    out
}

/// Flattened, depth-first structural snapshot of a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineEntry {
    pub depth: usize,
    pub label: String,
    pub uid: Option<String>,
    pub check: CheckState,
    pub property: Option<String>,
    pub expanded: bool,
    pub selected: bool,
}

impl std::fmt::Display for OutlineEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let indent = "  ".repeat(self.depth);
        let mark = if self.selected { "*" } else { " " };
        match (&self.uid, &self.property) {
            (Some(uid), Some(prop)) => write!(
                f,
                "{}{}{} {} <{}> ({})",
                indent,
                mark,
                self.check.symbol(),
                self.label,
                uid,
                prop
            ),
            _ => write!(f, "{} {} {}", indent, self.check.symbol(), self.label),
        }
    }
}
