//! Instance construction: validation, defaulting, coercion.
//!
//! Construction consumes a type's cached field registry and a plain
//! keyword mapping. Unknown keys are rejected, missing fields fall back
//! to deep-copied defaults, and every provided value is coerced against
//! its declared semantic type. Coercion is recursive: a union tries its
//! alternatives in declared order, a unit-typed field given a plain
//! mapping spawns a fresh nested instance, and a secret-typed field
//! builds its wrapper directly without further recursion.
//!
//! Construction never mutates type-level state and may run concurrently
//! for the same or different types. Errors are recoverable and carry
//! the field path plus expected/actual detail so they can be shown
//! directly to a configuration author.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::trace;

use super::instance::{FieldValue, UnitInstance};
use super::{UnitResolver, UnitType};
use crate::schema::FieldType;
use crate::secret::{NamedSecret, SecretError, SecretResolver};

/// Collaborators injected into construction.
#[derive(Clone, Copy)]
pub struct ConstructCtx<'a> {
    /// Resolves nested unit types by name.
    pub units: &'a dyn UnitResolver,
    /// Fills secret payloads at construction, when present. Without a
    /// resolver, secrets stay unresolved until filled externally.
    pub secrets: Option<&'a dyn SecretResolver>,
}

impl<'a> ConstructCtx<'a> {
    /// A context with no secret resolver.
    #[must_use]
    pub const fn new(units: &'a dyn UnitResolver) -> Self {
        Self {
            units,
            secrets: None,
        }
    }

    /// Attaches a secret resolver.
    #[must_use]
    pub const fn with_secrets(mut self, secrets: &'a dyn SecretResolver) -> Self {
        self.secrets = Some(secrets);
        self
    }
}

impl std::fmt::Debug for ConstructCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructCtx")
            .field("secrets", &self.secrets.is_some())
            .finish_non_exhaustive()
    }
}

/// Construction-time errors. Recoverable; raised synchronously.
#[derive(Debug, Error)]
pub enum ConstructError {
    /// The type is abstract and cannot be instantiated.
    #[error("type '{unit}' is abstract and cannot be instantiated")]
    AbstractUnit {
        /// The abstract type.
        unit: String,
    },

    /// A keyword does not name a declared field, slot, or default.
    #[error("unknown parameter '{field}' for type '{unit}'")]
    UnknownParameter {
        /// The type being constructed.
        unit: String,
        /// The unrecognized keyword.
        field: String,
    },

    /// A required field was neither provided nor defaulted.
    #[error("missing required field '{field}' for type '{unit}'")]
    MissingRequiredField {
        /// The type being constructed.
        unit: String,
        /// The missing field.
        field: String,
    },

    /// A value does not match the declared field type.
    #[error("field '{field}' of type '{unit}' expects {expected}, got {actual}")]
    TypeMismatch {
        /// The type being constructed.
        unit: String,
        /// Dotted path to the offending field.
        field: String,
        /// Description of the declared type.
        expected: String,
        /// Summary of the rejected value.
        actual: String,
    },

    /// No union alternative matched; carries every alternative's error.
    #[error(
        "field '{field}' of type '{unit}' matched no union alternative:{}",
        render_attempts(.attempts)
    )]
    UnionMismatch {
        /// The type being constructed.
        unit: String,
        /// Dotted path to the offending field.
        field: String,
        /// The per-alternative failures, in declared order.
        attempts: Vec<ConstructError>,
    },

    /// A unit-typed field names a type the resolver does not know.
    #[error("field '{field}' of type '{unit}' references unknown unit type '{name}'")]
    UnknownUnitType {
        /// The type being constructed.
        unit: String,
        /// Dotted path to the offending field.
        field: String,
        /// The unresolved type name.
        name: String,
    },

    /// Secret resolution failed during construction.
    #[error(transparent)]
    Secret(#[from] SecretError),
}

impl ConstructError {
    /// Prefixes the field path for errors bubbling out of a nested
    /// spawn.
    fn nest(self, prefix: &str) -> Self {
        match self {
            Self::UnknownParameter { unit, field } => Self::UnknownParameter {
                unit,
                field: format!("{prefix}.{field}"),
            },
            Self::MissingRequiredField { unit, field } => Self::MissingRequiredField {
                unit,
                field: format!("{prefix}.{field}"),
            },
            Self::TypeMismatch {
                unit,
                field,
                expected,
                actual,
            } => Self::TypeMismatch {
                unit,
                field: format!("{prefix}.{field}"),
                expected,
                actual,
            },
            Self::UnionMismatch {
                unit,
                field,
                attempts,
            } => Self::UnionMismatch {
                unit,
                field: format!("{prefix}.{field}"),
                attempts,
            },
            Self::UnknownUnitType { unit, field, name } => Self::UnknownUnitType {
                unit,
                field: format!("{prefix}.{field}"),
                name,
            },
            other @ (Self::AbstractUnit { .. } | Self::Secret(_)) => other,
        }
    }
}

fn render_attempts(attempts: &[ConstructError]) -> String {
    attempts
        .iter()
        .map(|e| format!("\n  - {e}"))
        .collect::<String>()
}

/// Constructs a validated, immutable instance from a keyword mapping.
///
/// # Errors
///
/// Returns a [`ConstructError`] when the type is abstract, a keyword is
/// unknown, a required field is missing, or a value fails coercion.
pub fn construct(
    ty: &Arc<UnitType>,
    kwargs: &Map<String, Value>,
    ctx: &ConstructCtx<'_>,
) -> Result<UnitInstance, ConstructError> {
    if ty.is_abstract() {
        return Err(ConstructError::AbstractUnit {
            unit: ty.name().to_string(),
        });
    }
    trace!(unit = ty.name(), keys = kwargs.len(), "constructing unit instance");

    let registry = ty.registry();
    reject_unknown_keys(ty, kwargs)?;

    let mut fields = BTreeMap::new();
    let mut unset = BTreeSet::new();

    for (name, field_type) in registry.annotations() {
        if let Some(value) = kwargs.get(name) {
            fields.insert(
                name.to_string(),
                coerce(ty.name(), name, field_type, value, ctx)?,
            );
        } else if let Some(default) = registry.default(name) {
            // Defaults are deep-copied through coercion: containers are
            // cloned and a nested-unit default is rebuilt from its
            // stored mapping, never shared across instances.
            fields.insert(
                name.to_string(),
                coerce(ty.name(), name, field_type, default, ctx)?,
            );
            unset.insert(name.to_string());
        } else {
            return Err(ConstructError::MissingRequiredField {
                unit: ty.name().to_string(),
                field: name.to_string(),
            });
        }
    }

    for slot in registry.slots() {
        if let Some(value) = kwargs.get(slot) {
            fields.insert(slot.to_string(), FieldValue::Plain(value.clone()));
        } else if let Some(default) = registry.default(slot) {
            fields.insert(slot.to_string(), FieldValue::Plain(default.clone()));
            unset.insert(slot.to_string());
        }
    }

    Ok(UnitInstance::new(Arc::clone(ty), fields, unset))
}

/// Coerces and defaults a keyword mapping without building an instance.
///
/// Intended for config-time pre-checks: traceless fields are runtime
/// handles filled in by the framework rather than by configuration, so
/// they are left out of the check entirely and never appear in the
/// returned values.
///
/// # Errors
///
/// Same as [`construct`], except that an abstract type is accepted and
/// traceless fields are skipped.
pub fn validate(
    ty: &Arc<UnitType>,
    kwargs: &Map<String, Value>,
    ctx: &ConstructCtx<'_>,
) -> Result<Map<String, Value>, ConstructError> {
    let registry = ty.registry();
    reject_unknown_keys(ty, kwargs)?;

    let mut out = Map::new();
    for (name, field_type) in registry.annotations() {
        if registry.is_traceless(name) {
            continue;
        }
        if let Some(value) = kwargs.get(name) {
            let coerced = coerce(ty.name(), name, field_type, value, ctx)?;
            out.insert(name.to_string(), coerced.to_plain_value());
        } else if let Some(default) = registry.default(name) {
            out.insert(name.to_string(), default.clone());
        } else {
            return Err(ConstructError::MissingRequiredField {
                unit: ty.name().to_string(),
                field: name.to_string(),
            });
        }
    }
    Ok(out)
}

fn reject_unknown_keys(
    ty: &UnitType,
    kwargs: &Map<String, Value>,
) -> Result<(), ConstructError> {
    for key in kwargs.keys() {
        if !ty.registry().is_known_key(key) {
            return Err(ConstructError::UnknownParameter {
                unit: ty.name().to_string(),
                field: key.clone(),
            });
        }
    }
    Ok(())
}

/// Recursively coerces `value` against `field_type`.
///
/// `path` is the dotted path from the instance root, used in errors.
fn coerce(
    unit: &str,
    path: &str,
    field_type: &FieldType,
    value: &Value,
    ctx: &ConstructCtx<'_>,
) -> Result<FieldValue, ConstructError> {
    match field_type {
        FieldType::Any => Ok(FieldValue::Plain(value.clone())),

        FieldType::Bool => {
            if value.is_boolean() {
                Ok(FieldValue::Plain(value.clone()))
            } else {
                Err(mismatch(unit, path, field_type, value))
            }
        },

        // Floats never silently truncate to int.
        FieldType::Int => {
            if value.is_i64() || value.is_u64() {
                Ok(FieldValue::Plain(value.clone()))
            } else {
                Err(mismatch(unit, path, field_type, value))
            }
        },

        FieldType::Float => {
            if value.is_number() {
                Ok(FieldValue::Plain(value.clone()))
            } else {
                Err(mismatch(unit, path, field_type, value))
            }
        },

        FieldType::Str => {
            if value.is_string() {
                Ok(FieldValue::Plain(value.clone()))
            } else {
                Err(mismatch(unit, path, field_type, value))
            }
        },

        FieldType::Nullable(inner) => {
            if value.is_null() {
                Ok(FieldValue::Plain(Value::Null))
            } else {
                coerce(unit, path, inner, value, ctx)
            }
        },

        FieldType::Sequence(inner) => match value {
            // Order-preserving normalization to the one concrete
            // sequence representation.
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(coerce(unit, &format!("{path}[{i}]"), inner, item, ctx)?);
                }
                Ok(FieldValue::Seq(out))
            },
            _ => Err(mismatch(unit, path, field_type, value)),
        },

        FieldType::Mapping(inner) => match value {
            Value::Object(entries) => {
                let mut out = BTreeMap::new();
                for (key, item) in entries {
                    out.insert(
                        key.clone(),
                        coerce(unit, &format!("{path}.{key}"), inner, item, ctx)?,
                    );
                }
                Ok(FieldValue::Map(out))
            },
            _ => Err(mismatch(unit, path, field_type, value)),
        },

        FieldType::Union(alternatives) => {
            let mut attempts = Vec::with_capacity(alternatives.len());
            for alternative in alternatives {
                match coerce(unit, path, alternative, value, ctx) {
                    Ok(coerced) => return Ok(coerced),
                    Err(err) => attempts.push(err),
                }
            }
            Err(ConstructError::UnionMismatch {
                unit: unit.to_string(),
                field: path.to_string(),
                attempts,
            })
        },

        FieldType::Unit(name) => match value {
            Value::Object(entries) => {
                let nested_ty =
                    ctx.units
                        .resolve(name)
                        .ok_or_else(|| ConstructError::UnknownUnitType {
                            unit: unit.to_string(),
                            field: path.to_string(),
                            name: name.clone(),
                        })?;
                let nested = construct(&nested_ty, entries, ctx).map_err(|e| e.nest(path))?;
                Ok(FieldValue::Unit(nested))
            },
            _ => Err(mismatch(unit, path, field_type, value)),
        },

        FieldType::Secret(inner) => match value {
            Value::Object(entries) => {
                let mut secret = NamedSecret::from_mapping(entries, inner)
                    .ok_or_else(|| mismatch(unit, path, field_type, value))?;
                if let Some(resolver) = ctx.secrets {
                    if !secret.is_resolved() {
                        resolver.fill(&mut secret)?;
                    }
                }
                Ok(FieldValue::Secret(secret))
            },
            _ => Err(mismatch(unit, path, field_type, value)),
        },
    }
}

fn mismatch(unit: &str, path: &str, expected: &FieldType, actual: &Value) -> ConstructError {
    ConstructError::TypeMismatch {
        unit: unit.to_string(),
        field: path.to_string(),
        expected: expected.describe(),
        actual: summarize(actual),
    }
}

/// Short value summary for error messages; long values are truncated so
/// an error stays a single readable line.
fn summarize(value: &Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 60 {
        let head: String = rendered.chars().take(57).collect();
        format!("{head}...")
    } else {
        rendered
    }
}
