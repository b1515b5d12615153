//! SelectionManager: the uid set shared by all projections of one view.

use indexmap::IndexSet;
use log::trace;

use super::view_events::SelectionChangedEvent;
use crate::core::event_bus::SharedEmitter;

#[derive(Debug, Default)]
pub struct SelectionManager {
    view: String,
    selected: IndexSet<String>,
    emitter: SharedEmitter,
}

impl SelectionManager {
    pub fn new(view: &str) -> Self {
        Self {
            view: view.to_string(),
            selected: IndexSet::new(),
            emitter: SharedEmitter::dummy(),
        }
    }

    pub fn set_emitter(&mut self, emitter: SharedEmitter) {
        self.emitter = emitter;
    }

    /// Replace the selection. Emits one notification if the set changed.
    pub fn select<I, S>(&mut self, uids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: IndexSet<String> = uids.into_iter().map(Into::into).collect();
        if next == self.selected {
            return false;
        }
        self.selected = next;
        self.notify();
        true
    }

    pub fn clear(&mut self) -> bool {
        if self.selected.is_empty() {
            return false;
        }
        self.selected.clear();
        self.notify();
        true
    }

    pub fn get(&self) -> Vec<String> {
        self.selected.iter().cloned().collect()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.selected.contains(uid)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Drop uids that no longer exist. Silent: no notification.
    pub fn retain_existing<F>(&mut self, exists: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let dropped: Vec<String> = self.selected.iter().filter(|u| !exists(u)).cloned().collect();
        if !dropped.is_empty() {
            self.selected.retain(|u| exists(u));
            trace!("{}: dropped {:?} from selection", self.view, dropped);
        }
        dropped
    }

    fn notify(&self) {
        trace!("{}: selection = {:?}", self.view, self.selected);
        self.emitter.emit(SelectionChangedEvent {
            view: self.view.clone(),
            selection: self.get(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event_bus::EventBus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted() -> (SelectionManager, Arc<AtomicUsize>, EventBus) {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe::<SelectionChangedEvent, _>(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let mut sel = SelectionManager::new("3D");
        sel.set_emitter(SharedEmitter::from_emitter(bus.emitter()));
        (sel, count, bus)
    }

    #[test]
    fn test_bulk_select_notifies_once() {
        let (mut sel, count, _bus) = counted();
        assert!(sel.select(["a", "b", "c"]));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(sel.get(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_same_selection_is_silent() {
        let (mut sel, count, _bus) = counted();
        sel.select(["a", "b"]);
        assert!(!sel.select(["a", "b"]));
        assert!(sel.clear());
        assert!(!sel.clear());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retain_existing_is_silent() {
        let (mut sel, count, _bus) = counted();
        sel.select(["a", "b"]);
        let dropped = sel.retain_existing(|u| u == "a");
        assert_eq!(dropped, vec!["b"]);
        assert_eq!(sel.get(), vec!["a"]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
