//! Field model and the per-type field registry.
//!
//! A unit type declares its configuration surface as a set of named,
//! typed fields. At registration time the declarations of a type and all
//! of its ancestors are merged into a single immutable [`FieldRegistry`]
//! which the constructor and the projection layer consume.
//!
//! # Key Concepts
//!
//! - **Field type**: the semantic type of a declared field
//!   ([`FieldType`]), checked and coerced at construction.
//! - **Default**: a literal value captured at declaration time. Defaults
//!   are cloned into every instance; a registry default is never aliased
//!   by an instance.
//! - **Slot**: a pre-declared storage field outside the annotation path.
//!   Slots accept values by name but carry no semantic type.
//! - **Traceless field**: excluded from the provenance projection and
//!   exempt from required-ness during lightweight validation.

mod registry;

pub use registry::FieldRegistry;
pub(crate) use registry::LocalDecls;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic type of a declared field.
///
/// Coercion rules for each variant are implemented by the instance
/// constructor; see [`crate::unit::construct`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Any JSON value, accepted as-is.
    Any,
    /// Boolean.
    Bool,
    /// Signed 64-bit integer. Floats are never silently truncated.
    Int,
    /// Any JSON number. Integers widen to float.
    Float,
    /// UTF-8 string.
    Str,
    /// Either `null` or the inner type.
    ///
    /// A nullable field with no default anywhere in the ancestor chain
    /// receives a synthesized `null` default; nullable fields are never
    /// implicitly required.
    Nullable(Box<FieldType>),
    /// Ordered sequence with homogeneous element type.
    Sequence(Box<FieldType>),
    /// String-keyed mapping with homogeneous value type.
    Mapping(Box<FieldType>),
    /// One of several alternatives, tried in declared order.
    Union(Vec<FieldType>),
    /// A nested unit instance, spawned from a plain mapping via the
    /// registered type of the given name.
    Unit(String),
    /// A sensitive wrapper around a payload of the inner type. Opaque to
    /// the projection layer.
    Secret(Box<FieldType>),
}

impl FieldType {
    /// Whether `null` is an admissible value for this type.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Nullable(_) => true,
            Self::Union(alts) => alts.iter().any(Self::is_nullable),
            _ => false,
        }
    }

    /// Whether values of this type are secret wrappers.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    /// Short human-readable name, used in mismatch errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Any => "any".to_string(),
            Self::Bool => "bool".to_string(),
            Self::Int => "int".to_string(),
            Self::Float => "float".to_string(),
            Self::Str => "str".to_string(),
            Self::Nullable(inner) => format!("{} | null", inner.describe()),
            Self::Sequence(inner) => format!("[{}]", inner.describe()),
            Self::Mapping(inner) => format!("{{str: {}}}", inner.describe()),
            Self::Union(alts) => alts
                .iter()
                .map(Self::describe)
                .collect::<Vec<_>>()
                .join(" | "),
            Self::Unit(name) => format!("unit<{name}>"),
            Self::Secret(inner) => format!("secret<{}>", inner.describe()),
        }
    }
}

/// A single local field declaration on a unit type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Semantic type of the field.
    pub ty: FieldType,

    /// Declaration-time default, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Excluded from the provenance projection and from required-ness in
    /// lightweight validation.
    #[serde(default)]
    pub traceless: bool,
}

impl FieldDecl {
    /// A required field of the given type.
    #[must_use]
    pub const fn required(ty: FieldType) -> Self {
        Self {
            ty,
            default: None,
            traceless: false,
        }
    }

    /// A field with a declaration-time default.
    #[must_use]
    pub fn with_default(ty: FieldType, default: Value) -> Self {
        Self {
            ty,
            default: Some(default),
            traceless: false,
        }
    }

    /// Marks the field traceless.
    #[must_use]
    pub fn traceless(mut self) -> Self {
        self.traceless = true;
        self
    }
}
