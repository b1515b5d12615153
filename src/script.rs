//! Replayable session scripts.
//!
//! A script is a JSON array of steps. Scene steps mutate collections through
//! their own API (so views hear about it through events); view steps stand in
//! for the user clicking in a tree or table.
//!
//! ```json
//! [
//!   { "op": "add_entities", "collection": "geology",
//!     "entities": [ { "uid": "3", "attrs": { "name": "H1", "role": "horizon" } } ] },
//!   { "op": "toggle", "view": "3D", "projection": "geology tree", "group": ["horizon"], "on": false },
//!   { "op": "print", "view": "3D" }
//! ]
//! ```
//!
//! After each step every view is pumped, so steps observe a consistent state.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::core::collection_events::LegendAspect;
use crate::entities::{AttrValue, Entity, Scene};
use crate::session::Session;
use crate::view::{ProjectionId, Renderer, SyncController, ToggleTarget, ViewConfig};

fn one() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptStep {
    AddEntities {
        collection: String,
        entities: Vec<Entity>,
    },
    RemoveEntities {
        collection: String,
        uids: Vec<String>,
    },
    SetAttribute {
        collection: String,
        uids: Vec<String>,
        key: String,
        value: AttrValue,
    },
    ReplaceGeometry {
        collection: String,
        uids: Vec<String>,
    },
    AddProperty {
        collection: String,
        uid: String,
        name: String,
        #[serde(default = "one")]
        components: usize,
    },
    RemoveProperty {
        collection: String,
        uid: String,
        name: String,
    },
    TouchValues {
        collection: String,
        uids: Vec<String>,
    },
    Legend {
        collection: String,
        uids: Vec<String>,
        aspect: LegendAspect,
    },
    OpenView {
        config: ViewConfig,
    },
    CloseView {
        view: String,
    },
    /// Checkbox click on a leaf (`uid`) or a group (`group` label path)
    Toggle {
        view: String,
        projection: String,
        #[serde(default)]
        uid: Option<String>,
        #[serde(default)]
        group: Option<Vec<String>>,
        on: bool,
    },
    /// Row selection in a projection, or programmatic when no projection is given
    Select {
        view: String,
        #[serde(default)]
        projection: Option<String>,
        uids: Vec<String>,
    },
    SetProperty {
        view: String,
        projection: String,
        uid: String,
        property: String,
    },
    Rearrange {
        view: String,
        projection: String,
        hierarchy: Vec<String>,
    },
    Print {
        #[serde(default)]
        view: Option<String>,
    },
}

fn view_of<'a, R: Renderer>(session: &'a mut Session<R>, name: &str) -> Result<(&'a mut SyncController<R>, &'a Scene)> {
    session.view_mut(name).with_context(|| format!("Unknown view '{}'", name))
}

fn projection_of<R: Renderer>(ctl: &SyncController<R>, label: &str) -> Result<ProjectionId> {
    ctl.find_projection(label)
        .with_context(|| format!("Unknown projection '{}' in view '{}'", label, ctl.view()))
}

impl ScriptStep {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptStep::AddEntities { .. } => "add_entities",
            ScriptStep::RemoveEntities { .. } => "remove_entities",
            ScriptStep::SetAttribute { .. } => "set_attribute",
            ScriptStep::ReplaceGeometry { .. } => "replace_geometry",
            ScriptStep::AddProperty { .. } => "add_property",
            ScriptStep::RemoveProperty { .. } => "remove_property",
            ScriptStep::TouchValues { .. } => "touch_values",
            ScriptStep::Legend { .. } => "legend",
            ScriptStep::OpenView { .. } => "open_view",
            ScriptStep::CloseView { .. } => "close_view",
            ScriptStep::Toggle { .. } => "toggle",
            ScriptStep::Select { .. } => "select",
            ScriptStep::SetProperty { .. } => "set_property",
            ScriptStep::Rearrange { .. } => "rearrange",
            ScriptStep::Print { .. } => "print",
        }
    }

    fn apply<R, W>(&self, session: &mut Session<R>, out: &mut W) -> Result<()>
    where
        R: Renderer + Default,
        W: Write,
    {
        match self {
            ScriptStep::AddEntities { collection, entities } => {
                session
                    .scene_mut()
                    .ensure_collection(collection)
                    .add_entities(entities.clone())?;
            }
            ScriptStep::RemoveEntities { collection, uids } => {
                session.scene_mut().collection_mut(collection)?.remove_entities(uids);
            }
            ScriptStep::SetAttribute {
                collection,
                uids,
                key,
                value,
            } => {
                session
                    .scene_mut()
                    .collection_mut(collection)?
                    .set_attribute(uids, key, value.clone());
            }
            ScriptStep::ReplaceGeometry { collection, uids } => {
                session.scene_mut().collection_mut(collection)?.replace_geometry(uids);
            }
            ScriptStep::AddProperty {
                collection,
                uid,
                name,
                components,
            } => {
                if !session
                    .scene_mut()
                    .collection_mut(collection)?
                    .add_property(uid, name, *components)
                {
                    bail!("No entity {} in {}", uid, collection);
                }
            }
            ScriptStep::RemoveProperty { collection, uid, name } => {
                if !session.scene_mut().collection_mut(collection)?.remove_property(uid, name) {
                    warn!("{} has no property '{}'", uid, name);
                }
            }
            ScriptStep::TouchValues { collection, uids } => {
                session.scene_mut().collection_mut(collection)?.touch_property_values(uids);
            }
            ScriptStep::Legend {
                collection,
                uids,
                aspect,
            } => {
                session.scene_mut().collection_mut(collection)?.legend_changed(uids, *aspect);
            }
            ScriptStep::OpenView { config } => session.open_view(config, R::default())?,
            ScriptStep::CloseView { view } => {
                if session.close_view(view).is_none() {
                    bail!("Unknown view '{}'", view);
                }
            }
            ScriptStep::Toggle {
                view,
                projection,
                uid,
                group,
                on,
            } => {
                let (ctl, _) = view_of(session, view)?;
                let pid = projection_of(ctl, projection)?;
                let target = match (uid, group) {
                    (Some(uid), _) => ToggleTarget::Leaf(uid.clone()),
                    (None, Some(path)) => {
                        let labels: Vec<&str> = path.iter().map(String::as_str).collect();
                        let id = ctl
                            .projection(pid)
                            .and_then(|p| p.find_group(&labels))
                            .with_context(|| format!("No group {:?} in '{}'", path, projection))?;
                        ToggleTarget::Group(id)
                    }
                    (None, None) => bail!("toggle needs 'uid' or 'group'"),
                };
                if ctl.user_toggle(pid, &target, *on).is_none() {
                    debug!("toggle {:?} changed nothing", target);
                }
            }
            ScriptStep::Select { view, projection, uids } => {
                let (ctl, _) = view_of(session, view)?;
                match projection {
                    Some(label) => {
                        let pid = projection_of(ctl, label)?;
                        ctl.user_select(pid, uids);
                    }
                    None => {
                        ctl.select(uids);
                    }
                }
            }
            ScriptStep::SetProperty {
                view,
                projection,
                uid,
                property,
            } => {
                let (ctl, _) = view_of(session, view)?;
                let pid = projection_of(ctl, projection)?;
                if !ctl.user_select_property(pid, uid, property) {
                    warn!("'{}' not applied to {} in '{}'", property, uid, projection);
                }
            }
            ScriptStep::Rearrange {
                view,
                projection,
                hierarchy,
            } => {
                let (ctl, scene) = view_of(session, view)?;
                let pid = projection_of(ctl, projection)?;
                ctl.rearrange(pid, hierarchy.clone(), scene);
            }
            ScriptStep::Print { view } => {
                write!(out, "{}", session.render(view.as_deref()))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let steps: Vec<ScriptStep> = serde_json::from_str(json).context("Parse script error")?;
        Ok(Self { steps })
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let script = Self::from_json_str(&json).with_context(|| format!("Invalid script {}", path.display()))?;
        info!("Loaded {} script steps from {}", script.steps.len(), path.display());
        Ok(script)
    }

    /// Replay every step, pumping all views after each one.
    /// Stops at the first failing step.
    pub fn run<R, W>(&self, session: &mut Session<R>, out: &mut W) -> Result<()>
    where
        R: Renderer + Default,
        W: Write,
    {
        for (i, step) in self.steps.iter().enumerate() {
            debug!("Script step {}: {}", i + 1, step.name());
            step.apply(session, out)
                .with_context(|| format!("Script step {} ({}) failed", i + 1, step.name()))?;
            session.pump();
            for note in session.drain_notifications() {
                info!("{}", note);
            }
        }
        Ok(())
    }
}
