//! Session: one scene, one event bus and the views open on it.
//!
//! Views never see each other. They share only the scene (through the
//! collection events it emits on the bus) and publish their own notifications
//! on the same bus, which [`Session::drain_notifications`] collects.

use anyhow::{Result, bail};
use indexmap::IndexMap;
use log::{debug, info, trace};

use crate::core::event_bus::{Event, EventBus, SharedEmitter, downcast_event};
use crate::core::collection_events::CollectionEvent;
use crate::entities::Scene;
use crate::view::projection::OutlineEntry;
use crate::view::{
    Renderer, SelectionChangedEvent, ShowPropertyChangedEvent, SyncController, ViewConfig, VisibilityChangedEvent,
};

/// A view notification taken off the bus queue
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Visibility(VisibilityChangedEvent),
    Selection(SelectionChangedEvent),
    ShowProperty(ShowPropertyChangedEvent),
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Visibility(e) => {
                write!(f, "[{}] visibility on={:?} off={:?}", e.view, e.turned_on, e.turned_off)
            }
            Notification::Selection(e) => write!(f, "[{}] selection {:?}", e.view, e.selection),
            Notification::ShowProperty(e) => write!(
                f,
                "[{}] {} shows {}",
                e.view,
                e.uid,
                e.property.as_deref().unwrap_or(crate::config::PROPERTY_NONE)
            ),
        }
    }
}

pub struct Session<R: Renderer> {
    scene: Scene,
    bus: EventBus,
    views: IndexMap<String, SyncController<R>>,
}

impl<R: Renderer> Session<R> {
    pub fn new(mut scene: Scene) -> Self {
        let bus = EventBus::new();
        scene.set_emitter(SharedEmitter::from_emitter(bus.emitter()));
        Self {
            scene,
            bus,
            views: IndexMap::new(),
        }
    }

    /// Open a view and load it from the current scene
    pub fn open_view(&mut self, config: &ViewConfig, renderer: R) -> Result<()> {
        if self.views.contains_key(&config.name) {
            bail!("View '{}' is already open", config.name);
        }
        let mut ctl = SyncController::from_config(config, renderer);
        ctl.attach(&self.bus);
        ctl.load(&self.scene);
        info!("Opened view '{}' ({} actors)", config.name, ctl.registry().len());
        self.views.insert(config.name.clone(), ctl);
        Ok(())
    }

    /// Close a view, returning its renderer
    pub fn close_view(&mut self, name: &str) -> Option<R> {
        let ctl = self.views.shift_remove(name)?;
        Some(ctl.close(&self.bus))
    }

    pub fn close_all(&mut self) {
        let names: Vec<String> = self.views.keys().cloned().collect();
        for name in names {
            self.close_view(&name);
        }
    }

    /// Let every view handle the collection events emitted so far
    pub fn pump(&mut self) -> usize {
        let scene = &self.scene;
        let handled: usize = self.views.values_mut().map(|ctl| ctl.pump(scene)).sum();
        trace!("Session: {} collection events handled", handled);
        handled
    }

    /// View notifications queued on the bus since the last call
    pub fn drain_notifications(&self) -> Vec<Notification> {
        let mut out = Vec::new();
        for event in self.bus.poll() {
            if let Some(e) = downcast_event::<VisibilityChangedEvent>(&event) {
                out.push(Notification::Visibility(e.clone()));
            } else if let Some(e) = downcast_event::<SelectionChangedEvent>(&event) {
                out.push(Notification::Selection(e.clone()));
            } else if let Some(e) = downcast_event::<ShowPropertyChangedEvent>(&event) {
                out.push(Notification::ShowProperty(e.clone()));
            } else if downcast_event::<CollectionEvent>(&event).is_none() {
                debug!("Session: unhandled event {}", (*event).type_name());
            }
        }
        out
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutate the scene. Views catch up on the next pump().
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn view(&self, name: &str) -> Option<&SyncController<R>> {
        self.views.get(name)
    }

    /// A view together with the scene it mirrors
    pub fn view_mut(&mut self, name: &str) -> Option<(&mut SyncController<R>, &Scene)> {
        let scene = &self.scene;
        self.views.get_mut(name).map(|ctl| (ctl, scene))
    }

    pub fn views(&self) -> impl Iterator<Item = &SyncController<R>> {
        self.views.values()
    }

    pub fn outline(&self, view: &str, projection: &str) -> Option<Vec<OutlineEntry>> {
        let ctl = self.views.get(view)?;
        let pid = ctl.find_projection(projection)?;
        ctl.projection(pid).map(|p| p.outline())
    }

    /// Text dump of every non-empty projection of a view (all views if None)
    pub fn render(&self, view: Option<&str>) -> String {
        let mut out = String::new();
        for ctl in self.views.values().filter(|c| view.is_none_or(|v| v == c.view())) {
            out.push_str(&format!("== {} ({} actors)\n", ctl.view(), ctl.registry().len()));
            for p in ctl.projections().iter().filter(|p| p.leaf_count() > 0) {
                out.push_str(&format!("-- {} [{}]\n", p.label(), p.hierarchy().join(" > ")));
                for entry in p.outline() {
                    out.push_str(&entry.to_string());
                    out.push('\n');
                }
            }
        }
        out
    }
}
