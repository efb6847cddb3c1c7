//! Buildset property bags.
//!
//! Every property value is tagged with the name of the source that
//! contributed it (`Scheduler`, `Dependency`, a builder step, ...). The
//! `scheduler` property records which scheduler created a buildset; it is
//! the only way to tell buildsets for the same source stamp apart.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Name of the property recording the scheduler that created a buildset.
pub const SCHEDULER_PROPERTY: &str = "scheduler";
/// Name of the property listing a scheduler's declared dependencies.
pub const DEPENDENCIES_PROPERTY: &str = "dependencies";
/// Name of the property carrying the source stamp id.
pub const SSID_PROPERTY: &str = "ssid";

/// Source tag for properties set by a scheduler.
pub const SOURCE_SCHEDULER: &str = "Scheduler";
/// Source tag for properties copied from a satisfied dependency.
pub const SOURCE_DEPENDENCY: &str = "Dependency";

/// Untagged property values, as supplied with a build request.
pub type PropertyMap = BTreeMap<String, Value>;

/// A single property value and the source that contributed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PropertyValue {
    pub value: Value,
    pub source: String,
}

/// Named property values attached to a buildset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>, source: &str) {
        self.0.insert(
            name.into(),
            PropertyValue {
                value: value.into(),
                source: source.to_string(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.0.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Merge untagged values, all attributed to `source`.
    pub fn update(&mut self, values: &PropertyMap, source: &str) {
        for (name, value) in values {
            self.set(name.clone(), value.clone(), source);
        }
    }

    /// Merge another bag, keeping the other bag's source tags.
    pub fn update_from(&mut self, other: &Properties) {
        for (name, prop) in other.iter() {
            self.0.insert(name.clone(), prop.clone());
        }
    }

    /// The scheduler that recorded this bag, if any.
    pub fn scheduler(&self) -> Option<&str> {
        self.value(SCHEDULER_PROPERTY).and_then(Value::as_str)
    }

    /// Values whose names appear in `allow_list`, dropping source tags.
    pub fn select(&self, allow_list: &[String]) -> PropertyMap {
        self.0
            .iter()
            .filter(|(name, _)| allow_list.iter().any(|allowed| allowed == *name))
            .map(|(name, prop)| (name.clone(), prop.value.clone()))
            .collect()
    }

    /// All values, dropping source tags.
    pub fn to_map(&self) -> PropertyMap {
        self.0
            .iter()
            .map(|(name, prop)| (name.clone(), prop.value.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_scheduler_property() {
        let mut props = Properties::new();
        assert_eq!(props.scheduler(), None);
        props.set(SCHEDULER_PROPERTY, "compile", SOURCE_SCHEDULER);
        assert_eq!(props.scheduler(), Some("compile"));

        props.set(SCHEDULER_PROPERTY, 7, SOURCE_SCHEDULER);
        assert_eq!(props.scheduler(), None);
    }

    #[test]
    fn test_select_allow_list() {
        let mut props = Properties::new();
        props.set("got_revision", "abc123", "Source");
        props.set("buildnumber", 12, "Build");

        let selected = props.select(&["got_revision".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected["got_revision"], json!("abc123"));
    }

    #[test]
    fn test_update_tags_source() {
        let mut values = PropertyMap::new();
        values.insert("clobber".to_string(), json!(true));

        let mut props = Properties::new();
        props.update(&values, SOURCE_DEPENDENCY);
        assert_eq!(props.get("clobber").unwrap().source, SOURCE_DEPENDENCY);
    }

    #[test]
    fn test_serialized_form() {
        let mut props = Properties::new();
        props.set("got_revision", "abc", SOURCE_DEPENDENCY);
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(
            json,
            json!({"got_revision": {"value": "abc", "source": "Dependency"}})
        );
    }
}
