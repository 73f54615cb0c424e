//! Schema-backed unit (plugin) type system.
//!
//! A *unit* is a pluggable, configuration-driven component of a larger
//! framework. This crate implements the machinery behind every unit's
//! configuration surface: typed field declarations merged across an
//! ancestor chain, abstract-method contracts enforced when a type is
//! defined, validated construction from raw keyword data, and
//! deterministic provenance projections of the result.
//!
//! # Architecture
//!
//! ```text
//!   UnitTypeDecl --register--> TypeRegistry
//!                                  |
//!              +-------------------+--------------------+
//!              v                                        v
//!      FieldRegistry (merge pass)            contract checks (once per
//!      cached on the UnitType                type, fatal on violation)
//!              |
//!              v
//!      construct / validate  --per call-->  UnitInstance
//!              |                                  |
//!              v                                  v
//!      coercion (unions, nested units,     trace_projection /
//!      secrets, containers)                dict_projection
//! ```
//!
//! Everything runs synchronously and in-process. Type registration
//! happens once, at bootstrap; the cached registries are immutable
//! afterwards and safe to share across threads. Construction may run
//! concurrently and never touches type-level state.
//!
//! Definition-time errors ([`unit::RegistryError`], including contract
//! violations) are programming errors and must abort startup.
//! Construction-time errors ([`unit::ConstructError`]) are recoverable
//! and carry field-level detail for configuration authors.

pub mod contract;
pub mod schema;
pub mod secret;
pub mod trace;
pub mod unit;

pub use contract::{AbstractMethodRecord, ContractError, MethodDecl, MethodKind};
pub use schema::{FieldDecl, FieldRegistry, FieldType};
pub use secret::{NamedSecret, SecretError, SecretResolver};
pub use trace::{dict_projection, trace_projection, ProjectionOptions};
pub use unit::{
    construct, validate, ConstructCtx, ConstructError, FieldValue, RegistryError, TypeRegistry,
    UnitInstance, UnitResolver, UnitType, UnitTypeDecl,
};
