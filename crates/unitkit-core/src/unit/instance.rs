//! Constructed unit values.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::UnitType;
use crate::secret::NamedSecret;

/// A coerced field value owned by an instance.
///
/// The value graph is always a tree: nested instances are freshly
/// spawned from literal mappings at construction and never shared.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A primitive or untyped JSON value.
    Plain(Value),
    /// A nested unit instance spawned from a mapping.
    Unit(UnitInstance),
    /// A normalized ordered sequence.
    Seq(Vec<FieldValue>),
    /// A string-keyed mapping with coerced values.
    Map(BTreeMap<String, FieldValue>),
    /// A sensitive wrapper, opaque to the projection layer.
    Secret(NamedSecret),
}

impl FieldValue {
    /// The plain JSON value, when this is not a nested structure.
    #[must_use]
    pub const fn as_plain(&self) -> Option<&Value> {
        match self {
            Self::Plain(v) => Some(v),
            _ => None,
        }
    }

    /// The nested instance, when this field spawned one.
    #[must_use]
    pub const fn as_unit(&self) -> Option<&UnitInstance> {
        match self {
            Self::Unit(inst) => Some(inst),
            _ => None,
        }
    }

    /// The secret wrapper, for secret-typed fields.
    #[must_use]
    pub const fn as_secret(&self) -> Option<&NamedSecret> {
        match self {
            Self::Secret(secret) => Some(secret),
            _ => None,
        }
    }

    /// Integer shortcut for plain values.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_plain().and_then(Value::as_i64)
    }

    /// String shortcut for plain values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_plain().and_then(Value::as_str)
    }

    /// Converts back to a plain JSON value.
    ///
    /// Nested instances expand to their full field mapping (traceless
    /// fields included); secret payloads are never serialized, only the
    /// lookup label survives.
    #[must_use]
    pub fn to_plain_value(&self) -> Value {
        match self {
            Self::Plain(v) => v.clone(),
            Self::Unit(inst) => Value::Object(inst.to_raw_mapping()),
            Self::Seq(items) => Value::Array(items.iter().map(Self::to_plain_value).collect()),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_plain_value()))
                    .collect(),
            ),
            Self::Secret(secret) => {
                let mut obj = Map::new();
                obj.insert("label".to_string(), Value::String(secret.label().to_string()));
                Value::Object(obj)
            },
        }
    }
}

/// A validated, immutable unit value.
///
/// Instances are read-only after construction: the API hands out shared
/// references only, so any later mutation is rejected at compile time.
#[derive(Debug, Clone)]
pub struct UnitInstance {
    ty: Arc<UnitType>,
    fields: BTreeMap<String, FieldValue>,
    unset: BTreeSet<String>,
}

impl UnitInstance {
    pub(crate) const fn new(
        ty: Arc<UnitType>,
        fields: BTreeMap<String, FieldValue>,
        unset: BTreeSet<String>,
    ) -> Self {
        Self { ty, fields, unset }
    }

    /// The type this instance was constructed from.
    #[must_use]
    pub const fn unit_type(&self) -> &Arc<UnitType> {
        &self.ty
    }

    /// Looks up a field or slot value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All stored fields, in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the field was filled from its default rather than given
    /// at construction.
    #[must_use]
    pub fn is_unset(&self, name: &str) -> bool {
        self.unset.contains(name)
    }

    /// Names of all fields filled from defaults.
    #[must_use]
    pub const fn unset_fields(&self) -> &BTreeSet<String> {
        &self.unset
    }

    /// Full field mapping as plain JSON, traceless fields included.
    /// Secret payloads are never serialized.
    #[must_use]
    pub fn to_raw_mapping(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_plain_value()))
            .collect()
    }
}
