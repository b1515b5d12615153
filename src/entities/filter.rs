//! View filter predicates.
//!
//! Each view binds one filter per collection: a cross-section view only shows
//! entities whose `x_section` attribute names it, a stereoplot only orientation
//! data, and so on. Filters are serde-friendly so views can be configured from
//! JSON:
//!
//! ```json
//! { "type": "attr_equals", "key": "x_section", "value": "XS-1" }
//! ```

use enum_dispatch::enum_dispatch;
use log::warn;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::keys::A_NAME;
use super::traits::EntitySource;

/// Predicate over one entity of a source.
#[enum_dispatch]
pub trait Filter {
    fn matches(&self, source: &dyn EntitySource, uid: &str) -> bool;

    /// Short human readable form for logs
    fn describe(&self) -> String;
}

/// Matches every entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllFilter {}

impl Filter for AllFilter {
    fn matches(&self, source: &dyn EntitySource, uid: &str) -> bool {
        source.contains(uid)
    }

    fn describe(&self) -> String {
        "all".to_string()
    }
}

/// Attribute label equals a value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrEquals {
    pub key: String,
    pub value: String,
}

impl Filter for AttrEquals {
    fn matches(&self, source: &dyn EntitySource, uid: &str) -> bool {
        source
            .get_attribute(uid, &self.key)
            .is_some_and(|v| v.label() == self.value)
    }

    fn describe(&self) -> String {
        format!("{} == {}", self.key, self.value)
    }
}

/// Attribute label is one of several values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrOneOf {
    pub key: String,
    pub values: Vec<String>,
}

impl Filter for AttrOneOf {
    fn matches(&self, source: &dyn EntitySource, uid: &str) -> bool {
        source
            .get_attribute(uid, &self.key)
            .is_some_and(|v| self.values.contains(&v.label()))
    }

    fn describe(&self) -> String {
        format!("{} in [{}]", self.key, self.values.join(", "))
    }
}

/// Attribute (name by default) matches a regular expression.
///
/// An invalid pattern matches nothing and is reported once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameMatches {
    #[serde(default = "NameMatches::default_key")]
    pub key: String,
    pub pattern: String,
    #[serde(skip)]
    compiled: OnceCell<Option<Regex>>,
}

impl NameMatches {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            key: Self::default_key(),
            pattern: pattern.into(),
            compiled: OnceCell::new(),
        }
    }

    fn default_key() -> String {
        A_NAME.to_string()
    }

    fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| match Regex::new(&self.pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Invalid name filter '{}': {}", self.pattern, e);
                    None
                }
            })
            .as_ref()
    }
}

impl Filter for NameMatches {
    fn matches(&self, source: &dyn EntitySource, uid: &str) -> bool {
        let Some(re) = self.regex() else {
            return false;
        };
        source
            .get_attribute(uid, &self.key)
            .is_some_and(|v| re.is_match(&v.label()))
    }

    fn describe(&self) -> String {
        format!("{} ~ /{}/", self.key, self.pattern)
    }
}

/// All filter kinds, dispatched statically.
#[enum_dispatch(Filter)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityFilter {
    All(AllFilter),
    AttrEquals(AttrEquals),
    AttrOneOf(AttrOneOf),
    NameMatches(NameMatches),
}

impl Default for EntityFilter {
    fn default() -> Self {
        EntityFilter::All(AllFilter {})
    }
}

impl EntityFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn attr_equals(key: &str, value: &str) -> Self {
        EntityFilter::AttrEquals(AttrEquals {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn attr_one_of(key: &str, values: &[&str]) -> Self {
        EntityFilter::AttrOneOf(AttrOneOf {
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
        })
    }

    pub fn name_matches(pattern: &str) -> Self {
        EntityFilter::NameMatches(NameMatches::new(pattern))
    }
}
