//! Unit types, the type registry, and validated construction.
//!
//! A unit type is declared once, at bootstrap, by registering a
//! [`UnitTypeDecl`] with a [`TypeRegistry`]. Registration is the
//! definition-time event: it merges the field declarations of the type
//! and its ancestors into a cached [`FieldRegistry`], folds resource
//! requirements and method tables across the chain, and runs the
//! abstract-contract checks. A failed registration is a programming
//! error and must abort startup.
//!
//! After registration a type is immutable. Instances are built from a
//! plain keyword mapping through [`construct`], which validates,
//! defaults, and coerces every field; [`validate`] runs the same pass
//! without materializing an instance.
//!
//! # Example
//!
//! ```rust
//! use serde_json::{json, Map};
//! use unitkit_core::schema::{FieldDecl, FieldType};
//! use unitkit_core::unit::{ConstructCtx, TypeRegistry, UnitTypeDecl};
//!
//! let registry = TypeRegistry::new();
//! registry
//!     .register(
//!         UnitTypeDecl::new("Sampler")
//!             .field("rate", FieldDecl::with_default(FieldType::Int, json!(10)))
//!             .field("channel", FieldDecl::required(FieldType::Str)),
//!     )
//!     .unwrap();
//!
//! let sampler = registry.get("Sampler").unwrap();
//! let mut kwargs = Map::new();
//! kwargs.insert("channel".to_string(), json!("main"));
//! let instance = sampler
//!     .construct(&kwargs, &ConstructCtx::new(&registry))
//!     .unwrap();
//! assert_eq!(instance.get("rate").and_then(|v| v.as_i64()), Some(10));
//! ```

mod construct;
mod instance;

pub use construct::{construct, validate, ConstructCtx, ConstructError};
pub use instance::{FieldValue, UnitInstance};

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::contract::{check_contracts, ContractError, MethodDecl, MethodRecord};
use crate::schema::{FieldDecl, FieldRegistry, LocalDecls};

/// A registered unit type: name, ancestor chain, merged field registry,
/// merged method table, and merged resource requirements. Immutable
/// after registration; shared through `Arc`.
#[derive(Debug)]
pub struct UnitType {
    name: String,
    ancestors: Vec<String>,
    registry: FieldRegistry,
    is_abstract: bool,
    require: BTreeSet<String>,
    methods: Vec<MethodRecord>,
}

impl UnitType {
    /// Registered type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ancestor names, base-first, excluding the type itself.
    #[must_use]
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// The merged field registry.
    #[must_use]
    pub const fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Whether the type is abstract (cannot be instantiated).
    #[must_use]
    pub const fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// The across-chain method table, base-first.
    #[must_use]
    pub fn methods(&self) -> &[MethodRecord] {
        &self.methods
    }

    /// The set of annotated field names, merged across the chain.
    #[must_use]
    pub fn field_names(&self) -> BTreeSet<String> {
        self.registry.field_names()
    }

    /// Named external dependencies declared across the ancestry,
    /// resolved by an external injection collaborator.
    #[must_use]
    pub const fn required_resources(&self) -> &BTreeSet<String> {
        &self.require
    }

    /// Constructs a validated instance from a keyword mapping.
    ///
    /// # Errors
    ///
    /// See [`construct`].
    pub fn construct(
        self: &Arc<Self>,
        kwargs: &Map<String, Value>,
        ctx: &ConstructCtx<'_>,
    ) -> Result<UnitInstance, ConstructError> {
        construct(self, kwargs, ctx)
    }

    /// Coerces and defaults a keyword mapping without instantiating.
    ///
    /// # Errors
    ///
    /// See [`validate`].
    pub fn validate(
        self: &Arc<Self>,
        kwargs: &Map<String, Value>,
        ctx: &ConstructCtx<'_>,
    ) -> Result<Map<String, Value>, ConstructError> {
        validate(self, kwargs, ctx)
    }
}

/// Declaration of a new unit type, consumed by
/// [`TypeRegistry::register`].
///
/// Parents are listed base-first: on a name collision a later parent
/// overwrites an earlier one, and local declarations overwrite all
/// parents.
#[derive(Debug, Clone)]
pub struct UnitTypeDecl {
    name: String,
    parents: Vec<String>,
    is_abstract: bool,
    fields: Vec<(String, FieldDecl)>,
    default_overrides: Vec<(String, Value)>,
    slots: Vec<(String, Option<Value>)>,
    require: BTreeSet<String>,
    methods: Vec<MethodDecl>,
}

impl UnitTypeDecl {
    /// Starts a declaration for the named type.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            is_abstract: false,
            fields: Vec::new(),
            default_overrides: Vec::new(),
            slots: Vec::new(),
            require: BTreeSet::new(),
            methods: Vec::new(),
        }
    }

    /// Adds a parent type by registered name.
    #[must_use]
    pub fn parent<S: Into<String>>(mut self, name: S) -> Self {
        self.parents.push(name.into());
        self
    }

    /// Flags the type abstract; abstract types cannot be instantiated.
    #[must_use]
    pub const fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Declares an annotated field.
    #[must_use]
    pub fn field<S: Into<String>>(mut self, name: S, decl: FieldDecl) -> Self {
        self.fields.push((name.into(), decl));
        self
    }

    /// Overrides only the default of an inherited field, without a new
    /// annotation.
    #[must_use]
    pub fn default_override<S: Into<String>>(mut self, name: S, default: Value) -> Self {
        self.default_overrides.push((name.into(), default));
        self
    }

    /// Declares a storage slot outside the annotation path.
    #[must_use]
    pub fn slot<S: Into<String>>(mut self, name: S, default: Option<Value>) -> Self {
        self.slots.push((name.into(), default));
        self
    }

    /// Declares a named external resource requirement.
    #[must_use]
    pub fn require<S: Into<String>>(mut self, resource: S) -> Self {
        self.require.insert(resource.into());
        self
    }

    /// Attaches a method declaration.
    #[must_use]
    pub fn method(mut self, decl: MethodDecl) -> Self {
        self.methods.push(decl);
        self
    }
}

/// Errors refusing a type registration. Fatal: abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A parent was named before being registered.
    #[error("type '{unit}' extends unknown parent '{parent}'")]
    UnknownParent {
        /// The type being registered.
        unit: String,
        /// The missing parent.
        parent: String,
    },

    /// The name is already registered.
    #[error("type '{unit}' is already registered")]
    DuplicateType {
        /// The colliding name.
        unit: String,
    },

    /// An abstract-contract violation.
    #[error(transparent)]
    Contract(#[from] ContractError),

    /// The registry lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

/// Maps a textual identifier to a registered unit type.
///
/// Consumed by nested-unit coercion when a field must spawn a unit by
/// name. [`TypeRegistry`] is the canonical implementation; an external
/// collaborator may substitute its own.
pub trait UnitResolver {
    /// Looks up a registered type.
    fn resolve(&self, name: &str) -> Option<Arc<UnitType>>;
}

/// The definition-time type store: name to immutable [`UnitType`].
///
/// Registration happens at bootstrap, parents-first; afterwards the
/// read path is lock-cheap and the cached types are safe to share
/// across threads.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, Arc<UnitType>>>,
}

impl TypeRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type: merges field declarations across the ancestor
    /// chain, folds resource requirements and method tables, and runs
    /// the abstract-contract checks.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] for unknown parents, duplicate names,
    /// or contract violations. All are definition-time errors; callers
    /// are expected to abort startup.
    pub fn register(&self, decl: UnitTypeDecl) -> Result<Arc<UnitType>, RegistryError> {
        let mut types = self.types.write().map_err(|_| RegistryError::LockPoisoned)?;

        if types.contains_key(&decl.name) {
            return Err(RegistryError::DuplicateType { unit: decl.name });
        }

        let mut parents = Vec::with_capacity(decl.parents.len());
        for parent in &decl.parents {
            let resolved = types
                .get(parent)
                .ok_or_else(|| RegistryError::UnknownParent {
                    unit: decl.name.clone(),
                    parent: parent.clone(),
                })?;
            parents.push(Arc::clone(resolved));
        }

        // Ancestor chain, base-first, first occurrence wins.
        let mut ancestors: Vec<String> = Vec::new();
        for parent in &parents {
            for name in parent.ancestors().iter().chain([&parent.name]) {
                if !ancestors.contains(name) {
                    ancestors.push(name.clone());
                }
            }
        }

        let local = LocalDecls {
            fields: decl.fields,
            default_overrides: decl.default_overrides,
            slots: decl.slots,
        };
        let parent_registries: Vec<&FieldRegistry> =
            parents.iter().map(|p| p.registry()).collect();
        let registry = FieldRegistry::build(&parent_registries, &local);

        let mut require = decl.require;
        for parent in &parents {
            require.extend(parent.required_resources().iter().cloned());
        }

        // Across-chain method table, base-first, local declarations
        // last. Records shared through a diamond appear once.
        let mut methods: Vec<MethodRecord> = Vec::new();
        for parent in &parents {
            for record in parent.methods() {
                if !methods.contains(record) {
                    methods.push(record.clone());
                }
            }
        }
        for method in decl.methods {
            methods.push(MethodRecord {
                declared_by: decl.name.clone(),
                decl: method,
            });
        }

        check_contracts(&decl.name, decl.is_abstract, &methods)?;

        let unit = Arc::new(UnitType {
            name: decl.name,
            ancestors,
            registry,
            is_abstract: decl.is_abstract,
            require,
            methods,
        });

        debug!(
            unit = unit.name.as_str(),
            fields = unit.registry.field_names().len(),
            is_abstract = unit.is_abstract,
            "registered unit type"
        );

        types.insert(unit.name.clone(), Arc::clone(&unit));
        Ok(unit)
    }

    /// Looks up a registered type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<UnitType>> {
        self.types
            .read()
            .ok()
            .and_then(|types| types.get(name).map(Arc::clone))
    }

    /// Names of all registered types.
    #[must_use]
    pub fn type_names(&self) -> BTreeSet<String> {
        self.types
            .read()
            .map(|types| types.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl UnitResolver for TypeRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<UnitType>> {
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::FieldType;

    #[test]
    fn register_and_get() {
        let registry = TypeRegistry::new();
        registry
            .register(UnitTypeDecl::new("Base").field("a", FieldDecl::required(FieldType::Int)))
            .unwrap();
        let base = registry.get("Base").unwrap();
        assert_eq!(base.name(), "Base");
        assert!(base.field_names().contains("a"));
    }

    #[test]
    fn unknown_parent_is_fatal() {
        let registry = TypeRegistry::new();
        let err = registry
            .register(UnitTypeDecl::new("Orphan").parent("Missing"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownParent { .. }));
    }

    #[test]
    fn duplicate_name_is_fatal() {
        let registry = TypeRegistry::new();
        registry.register(UnitTypeDecl::new("A")).unwrap();
        let err = registry.register(UnitTypeDecl::new("A")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateType { .. }));
    }

    #[test]
    fn ancestors_are_base_first() {
        let registry = TypeRegistry::new();
        registry.register(UnitTypeDecl::new("A")).unwrap();
        registry.register(UnitTypeDecl::new("B").parent("A")).unwrap();
        registry.register(UnitTypeDecl::new("C").parent("B")).unwrap();
        let c = registry.get("C").unwrap();
        assert_eq!(c.ancestors(), ["A", "B"]);
    }

    #[test]
    fn diamond_ancestry_lists_shared_base_once() {
        let registry = TypeRegistry::new();
        registry.register(UnitTypeDecl::new("A")).unwrap();
        registry.register(UnitTypeDecl::new("B").parent("A")).unwrap();
        registry.register(UnitTypeDecl::new("C").parent("A")).unwrap();
        registry
            .register(UnitTypeDecl::new("D").parent("B").parent("C"))
            .unwrap();
        let d = registry.get("D").unwrap();
        assert_eq!(d.ancestors(), ["A", "B", "C"]);
    }

    #[test]
    fn resource_requirements_merge_across_ancestry() {
        let registry = TypeRegistry::new();
        registry
            .register(UnitTypeDecl::new("Base").require("catalog"))
            .unwrap();
        registry
            .register(UnitTypeDecl::new("Derived").parent("Base").require("extcats"))
            .unwrap();
        let derived = registry.get("Derived").unwrap();
        let resources: Vec<&str> = derived
            .required_resources()
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(resources, ["catalog", "extcats"]);
    }

    #[test]
    fn contract_violation_refuses_registration() {
        let registry = TypeRegistry::new();
        registry
            .register(
                UnitTypeDecl::new("Abs")
                    .abstract_type()
                    .method(crate::contract::MethodDecl::abstract_fn("run", &["self"])),
            )
            .unwrap();
        let err = registry
            .register(UnitTypeDecl::new("Impl").parent("Abs"))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Contract(ContractError::AbstractNotImplemented { .. })
        ));
        // A refused type is not registered.
        assert!(registry.get("Impl").is_none());
    }

    #[test]
    fn default_only_override_changes_derived_default() {
        let registry = TypeRegistry::new();
        registry
            .register(
                UnitTypeDecl::new("Base")
                    .field("x", FieldDecl::with_default(FieldType::Int, json!(1))),
            )
            .unwrap();
        registry
            .register(
                UnitTypeDecl::new("Derived")
                    .parent("Base")
                    .default_override("x", json!(42)),
            )
            .unwrap();
        let derived = registry.get("Derived").unwrap();
        assert_eq!(derived.registry().default("x"), Some(&json!(42)));
        // The base registry is untouched.
        let base = registry.get("Base").unwrap();
        assert_eq!(base.registry().default("x"), Some(&json!(1)));
    }
}
