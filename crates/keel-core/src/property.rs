use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Input or output properties of a resource, keyed by property name.
///
/// A `BTreeMap` keeps serialization order stable so two equal maps always
/// persist byte-identically.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// A single property value as exchanged with providers.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    /// A plain, fully known value.
    Known(Value),
    /// A known value that must never be rendered in clear text.
    Secret(Value),
    /// Not known until the operation producing it actually runs. Only ever
    /// returned by providers during a preview.
    Computed,
}

impl PropertyValue {
    pub fn known(value: impl Into<Value>) -> Self {
        Self::Known(value.into())
    }

    pub fn secret(value: impl Into<Value>) -> Self {
        Self::Secret(value.into())
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, Self::Computed)
    }

    /// The underlying value, secret or not. `None` while computed.
    pub fn reveal(&self) -> Option<&Value> {
        match self {
            Self::Known(v) | Self::Secret(v) => Some(v),
            Self::Computed => None,
        }
    }

    /// Render for display: secrets are masked, computed values shown as such.
    pub fn display(&self) -> String {
        match self {
            Self::Known(v) => v.to_string(),
            Self::Secret(_) => "[secret]".to_string(),
            Self::Computed => "[computed]".to_string(),
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(v) => write!(f, "Known({v})"),
            Self::Secret(_) => f.write_str("Secret(..)"),
            Self::Computed => f.write_str("Computed"),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        Self::Known(value)
    }
}

/// True when any value in the map is still computed.
pub fn has_computed(props: &PropertyMap) -> bool {
    props.values().any(PropertyValue::is_computed)
}

/// Keys whose values differ between `olds` and `news`, including keys present
/// on only one side. Sorted, since both maps are.
pub fn changed_keys(olds: &PropertyMap, news: &PropertyMap) -> Vec<String> {
    let mut keys: Vec<String> = olds
        .iter()
        .filter(|(k, v)| news.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    keys.extend(
        news.keys()
            .filter(|k| !olds.contains_key(*k))
            .cloned(),
    );
    keys.sort();
    keys
}
