//! Notifications a view publishes on the event bus.

/// One per user gesture, after registry and renderer were updated.
#[derive(Clone, Debug, PartialEq)]
pub struct VisibilityChangedEvent {
    pub view: String,
    pub turned_on: Vec<String>,
    pub turned_off: Vec<String>,
}

/// Emitted once per externally visible selection change.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionChangedEvent {
    pub view: String,
    pub selection: Vec<String>,
}

/// The property an actor shows changed (user pick or reset after the
/// property disappeared upstream).
#[derive(Clone, Debug, PartialEq)]
pub struct ShowPropertyChangedEvent {
    pub view: String,
    pub uid: String,
    pub property: Option<String>,
}
