//! Definition-time abstract-method contracts.
//!
//! Unit types may declare methods abstract: every concrete descendant
//! must then provide an implementation with a matching signature. The
//! checks in this module run exactly once per type, when the type is
//! registered, and never again per instance. A failed check is a
//! programming error: registration returns the error and program
//! startup is expected to abort.
//!
//! Most of what a dynamic language enforces here is covered by the Rust
//! compiler for ordinary trait impls. Units, however, are described by
//! declaration records loaded at bootstrap (possibly from config), so
//! the contract between an abstract ancestor and its descendants is
//! re-checked over those records:
//!
//! - an inherited abstract method must be implemented by a type other
//!   than its declarer, unless a default implementation survives in the
//!   chain (a more derived abstract re-declaration shadows earlier
//!   implementations);
//! - the implementation's parameter count must match exactly, and with
//!   `check_signature` the ordered parameter names must match; both
//!   checks are skipped for `var_args` declarations;
//! - with `check_super_call`, the override must invoke the ancestor
//!   implementation (recorded as `super.<name>` in the override's
//!   invoked-reference set);
//! - overrides of a default implementation honor `check_signature` and
//!   `check_super_call` on their own, whether or not an abstract
//!   declaration shares the name.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a declared method participates in the abstract contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    /// Must be implemented by concrete descendants.
    Abstract {
        /// Enforce even when the declaring subtype is itself abstract.
        #[serde(default)]
        force_check: bool,
        /// Require the override's parameter names to match, not just the
        /// count.
        #[serde(default)]
        check_signature: bool,
        /// Allow any signature; skips count and name checks.
        #[serde(default)]
        var_args: bool,
    },
    /// An implementation that descendants may, but need not, override.
    Default {
        /// Require an override's parameter names to match.
        #[serde(default)]
        check_signature: bool,
        /// Require an override to invoke this implementation.
        #[serde(default)]
        check_super_call: bool,
    },
    /// A plain implementation.
    Concrete,
}

/// A method declaration attached to a unit type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDecl {
    /// Method name, unique within one type.
    pub name: String,
    /// Ordered parameter names, including the receiver.
    pub params: Vec<String>,
    /// Contract participation.
    pub kind: MethodKind,
    /// Method references the body invokes. A call to the ancestor
    /// implementation of `f` is recorded as `super.f`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub invokes: BTreeSet<String>,
}

impl MethodDecl {
    /// An abstract method with default flags.
    pub fn abstract_fn<S: Into<String>>(name: S, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
            kind: MethodKind::Abstract {
                force_check: false,
                check_signature: false,
                var_args: false,
            },
            invokes: BTreeSet::new(),
        }
    }

    /// A default implementation with default flags.
    pub fn default_fn<S: Into<String>>(name: S, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
            kind: MethodKind::Default {
                check_signature: false,
                check_super_call: false,
            },
            invokes: BTreeSet::new(),
        }
    }

    /// A plain implementation.
    pub fn concrete_fn<S: Into<String>>(name: S, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| (*p).to_string()).collect(),
            kind: MethodKind::Concrete,
            invokes: BTreeSet::new(),
        }
    }

    /// Require parameter names (not just the count) to match.
    #[must_use]
    pub fn check_signature(mut self) -> Self {
        match &mut self.kind {
            MethodKind::Abstract {
                check_signature, ..
            }
            | MethodKind::Default {
                check_signature, ..
            } => *check_signature = true,
            MethodKind::Concrete => {},
        }
        self
    }

    /// Enforce the contract even on abstract descendants.
    #[must_use]
    pub fn force_check(mut self) -> Self {
        if let MethodKind::Abstract { force_check, .. } = &mut self.kind {
            *force_check = true;
        }
        self
    }

    /// Exempt the method from signature checks entirely.
    #[must_use]
    pub fn var_args(mut self) -> Self {
        if let MethodKind::Abstract { var_args, .. } = &mut self.kind {
            *var_args = true;
        }
        self
    }

    /// Require overrides to invoke this default implementation.
    #[must_use]
    pub fn check_super_call(mut self) -> Self {
        if let MethodKind::Default {
            check_super_call, ..
        } = &mut self.kind
        {
            *check_super_call = true;
        }
        self
    }

    /// Record a method reference made by the body.
    #[must_use]
    pub fn invoking<S: Into<String>>(mut self, reference: S) -> Self {
        self.invokes.insert(reference.into());
        self
    }
}

/// An abstract-method declaration resolved against a type's ancestor
/// chain. Created once at definition time, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractMethodRecord {
    /// Method name.
    pub name: String,
    /// Type that declared the method abstract.
    pub declared_by: String,
    /// Required parameter count.
    pub param_count: usize,
    /// Required ordered parameter names, when `check_signature` is set.
    pub param_names: Option<Vec<String>>,
    /// Enforced even on abstract descendants.
    pub force_check: bool,
    /// Signature checks are skipped.
    pub var_args: bool,
}

/// A method record as carried on a registered type's merged table:
/// the declaration plus its declaring type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRecord {
    /// Type the method was declared on.
    pub declared_by: String,
    /// The declaration itself.
    pub decl: MethodDecl,
}

/// Contract violations detected at definition time. Fatal: abort startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContractError {
    /// A concrete type inherits an abstract method without implementing
    /// it and no default implementation exists in the chain.
    #[error(
        "type '{unit}' must implement abstract method '{method}' declared by '{declared_by}'"
    )]
    AbstractNotImplemented {
        /// The type failing the check.
        unit: String,
        /// The unimplemented method.
        method: String,
        /// The abstract declarer.
        declared_by: String,
    },

    /// An implementation's parameters do not match the abstract
    /// declaration.
    #[error(
        "method '{method}' on type '{unit}' does not match the abstract declaration in \
         '{declared_by}': required parameters {expected:?}, implemented {actual:?}"
    )]
    SignatureMismatch {
        /// The type failing the check.
        unit: String,
        /// The offending method.
        method: String,
        /// The abstract declarer.
        declared_by: String,
        /// Parameters required by the declaration.
        expected: Vec<String>,
        /// Parameters of the implementation.
        actual: Vec<String>,
    },

    /// An override of a `check_super_call` default implementation never
    /// invokes the ancestor implementation.
    #[error("method '{method}' on type '{unit}' must invoke super.{method}")]
    MissingSuperCall {
        /// The type failing the check.
        unit: String,
        /// The offending method.
        method: String,
    },

    /// An abstract method was declared on a type not flagged abstract.
    #[error("method '{method}' cannot be abstract: type '{unit}' is not abstract")]
    AbstractMarkerOnConcrete {
        /// The concrete type carrying the marker.
        unit: String,
        /// The mismarked method.
        method: String,
    },
}

/// Checks the merged method table of a freshly declared type.
///
/// `records` is the across-chain method table, base-first, with the
/// local declarations last. The table may contain several records per
/// name; the most derived one is the effective method.
///
/// # Errors
///
/// Returns the first [`ContractError`] encountered; registration of the
/// type must then be refused.
pub fn check_contracts(
    unit: &str,
    is_abstract: bool,
    records: &[MethodRecord],
) -> Result<(), ContractError> {
    if !is_abstract {
        // A concrete type may not introduce new abstract methods.
        for record in records.iter().filter(|r| r.declared_by == unit) {
            if matches!(record.decl.kind, MethodKind::Abstract { .. }) {
                return Err(ContractError::AbstractMarkerOnConcrete {
                    unit: unit.to_string(),
                    method: record.decl.name.clone(),
                });
            }
        }
    }

    // Most derived abstract declaration per name, walking base-first.
    // Keyed by BTreeMaps so a type violating several contracts reports
    // the same one on every run.
    let mut abstracts: BTreeMap<&str, AbstractMethodRecord> = BTreeMap::new();
    // Most derived default implementation per name, with its flags.
    let mut defaults: BTreeMap<&str, &MethodRecord> = BTreeMap::new();
    // Most derived non-abstract record per name.
    let mut impls: HashMap<&str, &MethodRecord> = HashMap::new();

    for record in records {
        let name = record.decl.name.as_str();
        match record.decl.kind {
            MethodKind::Abstract {
                force_check,
                check_signature,
                var_args,
            } => {
                abstracts.insert(
                    name,
                    AbstractMethodRecord {
                        name: name.to_string(),
                        declared_by: record.declared_by.clone(),
                        param_count: record.decl.params.len(),
                        param_names: check_signature.then(|| record.decl.params.clone()),
                        force_check,
                        var_args,
                    },
                );
                // A more derived abstract re-declaration shadows an
                // earlier implementation in the chain; the name must be
                // implemented anew. A declaration by the same type is a
                // combined abstract-with-default marker and shadows
                // nothing.
                if impls
                    .get(name)
                    .is_some_and(|r| r.declared_by != record.declared_by)
                {
                    impls.remove(name);
                }
                if defaults
                    .get(name)
                    .is_some_and(|r| r.declared_by != record.declared_by)
                {
                    defaults.remove(name);
                }
            },
            MethodKind::Default { .. } => {
                defaults.insert(name, record);
                impls.insert(name, record);
            },
            MethodKind::Concrete => {
                impls.insert(name, record);
            },
        }
    }

    for abs in abstracts.values() {
        // Abstract types only honor declarations flagged force_check;
        // silently dropping enforcement on re-declaration is not allowed,
        // which the merged-table walk above guarantees (a re-declaration
        // replaces, never removes, the record).
        if is_abstract && !abs.force_check {
            continue;
        }
        // Records declared by the type itself are checked on descendants.
        if abs.declared_by == unit {
            continue;
        }

        // A default implementation satisfies the contract by itself, so
        // only a name with no surviving non-abstract record is missing.
        let Some(implementation) = impls.get(abs.name.as_str()) else {
            return Err(ContractError::AbstractNotImplemented {
                unit: unit.to_string(),
                method: abs.name.clone(),
                declared_by: abs.declared_by.clone(),
            });
        };

        // An override of a super-call default must reference it.
        if let Some(default_record) = defaults.get(abs.name.as_str()) {
            if matches!(
                default_record.decl.kind,
                MethodKind::Default {
                    check_super_call: true,
                    ..
                }
            ) && implementation.declared_by != default_record.declared_by
                && !implementation
                    .decl
                    .invokes
                    .contains(&format!("super.{}", abs.name))
            {
                return Err(ContractError::MissingSuperCall {
                    unit: implementation.declared_by.clone(),
                    method: abs.name.clone(),
                });
            }
        }

        if abs.var_args {
            continue;
        }

        let actual = &implementation.decl.params;
        let count_matches = actual.len() == abs.param_count;
        let names_match = abs
            .param_names
            .as_ref()
            .is_none_or(|expected| expected == actual);
        if !count_matches || !names_match {
            let expected = abs
                .param_names
                .clone()
                .unwrap_or_else(|| vec![format!("<{} parameters>", abs.param_count)]);
            return Err(ContractError::SignatureMismatch {
                unit: unit.to_string(),
                method: abs.name.clone(),
                declared_by: abs.declared_by.clone(),
                expected,
                actual: actual.clone(),
            });
        }
    }

    // Default methods carry their own override obligations, with or
    // without an abstract declaration of the same name. Names with one
    // were already checked above; abstract types defer these checks to
    // their concrete descendants.
    if !is_abstract {
        for (name, default_record) in &defaults {
            if abstracts.contains_key(name) {
                continue;
            }
            let MethodKind::Default {
                check_signature,
                check_super_call,
            } = default_record.decl.kind
            else {
                continue;
            };
            let Some(implementation) = impls.get(name) else {
                continue;
            };
            if implementation.declared_by == default_record.declared_by {
                continue;
            }

            if check_super_call
                && !implementation
                    .decl
                    .invokes
                    .contains(&format!("super.{name}"))
            {
                return Err(ContractError::MissingSuperCall {
                    unit: implementation.declared_by.clone(),
                    method: (*name).to_string(),
                });
            }

            let expected = &default_record.decl.params;
            let actual = &implementation.decl.params;
            if actual.len() != expected.len() || (check_signature && expected != actual) {
                return Err(ContractError::SignatureMismatch {
                    unit: unit.to_string(),
                    method: (*name).to_string(),
                    declared_by: default_record.declared_by.clone(),
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
    }

    Ok(())
}
