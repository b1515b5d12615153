//! Abstract traits for dependency inversion.
//!
//! Views read collections only through [`EntitySource`], so the sync engine
//! never depends on how rows are stored and never mutates them.

use super::attrs::AttrValue;
use super::filter::EntityFilter;

/// Read-only view of one uid-indexed entity collection.
pub trait EntitySource {
    /// Collection name (events are routed by it)
    fn name(&self) -> &str;

    /// True if the uid is currently stored
    fn contains(&self, uid: &str) -> bool;

    /// Uids matching the filter, in collection order
    fn query(&self, filter: &EntityFilter) -> Vec<String>;

    /// Attribute value, `None` when the uid or the key is missing
    fn get_attribute(&self, uid: &str, key: &str) -> Option<AttrValue>;

    /// Property names with component counts, empty when the uid is missing
    fn get_property_names(&self, uid: &str) -> Vec<(String, usize)>;
}
