//! Per-type field registry and the definition-time merge pass.
//!
//! The registry for a type is built exactly once, when the type is
//! registered, by folding the already-built registries of its ancestors
//! (base-first) and then applying the type's own local declarations.
//! A more derived declaration wins on name collision, even when it
//! changes only the default. The result is immutable and shared through
//! the owning [`UnitType`](crate::unit::UnitType).
//!
//! The builder never raises: malformed declarations surface later, with
//! field-specific detail, when an instance is constructed.

use std::collections::{BTreeSet, HashMap};

use serde_json::Value;

use super::{FieldDecl, FieldType};

/// Local declarations of a single type, before merging.
///
/// Field and slot names beginning with `_` are private and are skipped
/// by the merge pass.
#[derive(Debug, Clone, Default)]
pub(crate) struct LocalDecls {
    /// Annotated fields, in declaration order.
    pub fields: Vec<(String, FieldDecl)>,
    /// Pure default overrides: a new default for an inherited annotation,
    /// without a new annotation.
    pub default_overrides: Vec<(String, Value)>,
    /// Pre-declared storage slots with optional defaults.
    pub slots: Vec<(String, Option<Value>)>,
}

/// Merged, immutable field registry of a unit type.
///
/// Invariant: every default key names either an annotation or a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRegistry {
    /// Annotation names in across-chain declaration order (base first).
    order: Vec<String>,
    /// Annotation name to semantic type.
    types: HashMap<String, FieldType>,
    /// Annotation or slot name to default value.
    defaults: HashMap<String, Value>,
    /// Slot names in across-chain declaration order.
    slot_order: Vec<String>,
    /// Traceless field names.
    traceless: BTreeSet<String>,
}

impl FieldRegistry {
    /// Builds the merged registry for a type.
    ///
    /// `parents` are the ancestors' already-built registries, base-first:
    /// a later parent overwrites an earlier one on name collision and the
    /// local declarations overwrite all parents.
    pub(crate) fn build(parents: &[&Self], local: &LocalDecls) -> Self {
        let mut merged = Self {
            order: Vec::new(),
            types: HashMap::new(),
            defaults: HashMap::new(),
            slot_order: Vec::new(),
            traceless: BTreeSet::new(),
        };

        // Seed from ancestors, base-first.
        for parent in parents {
            for name in &parent.order {
                merged.insert_annotation(name, parent.types[name].clone());
            }
            for name in &parent.slot_order {
                merged.insert_slot(name);
            }
            for (name, default) in &parent.defaults {
                merged.defaults.insert(name.clone(), default.clone());
            }
            merged.traceless.extend(parent.traceless.iter().cloned());
        }

        // Local annotations and defaults.
        for (name, decl) in &local.fields {
            if is_private(name) {
                continue;
            }
            merged.insert_annotation(name, decl.ty.clone());
            if let Some(default) = &decl.default {
                merged.defaults.insert(name.clone(), default.clone());
            }
            if decl.traceless {
                merged.traceless.insert(name.clone());
            }
        }

        // Pure default overrides are honored without a new annotation,
        // but only for names the chain already knows.
        for (name, default) in &local.default_overrides {
            if is_private(name) || !merged.types.contains_key(name) {
                continue;
            }
            merged.defaults.insert(name.clone(), default.clone());
        }

        // Slots and slot defaults.
        for (name, default) in &local.slots {
            if is_private(name) {
                continue;
            }
            merged.insert_slot(name);
            if let Some(default) = default {
                merged.defaults.insert(name.clone(), default.clone());
            }
        }

        // Nullable fields with no default anywhere in the chain are never
        // implicitly required.
        for name in &merged.order {
            if merged.types[name].is_nullable() && !merged.defaults.contains_key(name) {
                merged.defaults.insert(name.clone(), Value::Null);
            }
        }

        merged
    }

    fn insert_annotation(&mut self, name: &str, ty: FieldType) {
        if !self.types.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.types.insert(name.to_string(), ty);
    }

    fn insert_slot(&mut self, name: &str) {
        if !self.slot_order.iter().any(|s| s == name) {
            self.slot_order.push(name.to_string());
        }
    }

    /// Annotated fields in across-chain declaration order.
    pub fn annotations(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.order
            .iter()
            .map(move |name| (name.as_str(), &self.types[name]))
    }

    /// Semantic type of an annotated field.
    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.types.get(name)
    }

    /// Default value for an annotated field or slot.
    #[must_use]
    pub fn default(&self, name: &str) -> Option<&Value> {
        self.defaults.get(name)
    }

    /// Slot names in across-chain declaration order.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.slot_order.iter().map(String::as_str)
    }

    /// Whether the name is a pre-declared slot.
    #[must_use]
    pub fn is_slot(&self, name: &str) -> bool {
        self.slot_order.iter().any(|s| s == name)
    }

    /// Whether the field is excluded from the provenance projection.
    #[must_use]
    pub fn is_traceless(&self, name: &str) -> bool {
        self.traceless.contains(name)
    }

    /// Whether the name is accepted as a constructor parameter.
    #[must_use]
    pub fn is_known_key(&self, name: &str) -> bool {
        self.types.contains_key(name) || self.is_slot(name) || self.defaults.contains_key(name)
    }

    /// The set of annotated field names.
    #[must_use]
    pub fn field_names(&self) -> BTreeSet<String> {
        self.order.iter().cloned().collect()
    }
}

fn is_private(name: &str) -> bool {
    name.starts_with('_')
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn decls(fields: &[(&str, FieldDecl)]) -> LocalDecls {
        LocalDecls {
            fields: fields
                .iter()
                .map(|(n, d)| ((*n).to_string(), d.clone()))
                .collect(),
            ..LocalDecls::default()
        }
    }

    #[test]
    fn local_fields_recorded_in_order() {
        let reg = FieldRegistry::build(
            &[],
            &decls(&[
                ("b", FieldDecl::required(FieldType::Int)),
                ("a", FieldDecl::with_default(FieldType::Str, json!("x"))),
            ]),
        );
        let names: Vec<&str> = reg.annotations().map(|(n, _)| n).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(reg.default("a"), Some(&json!("x")));
        assert_eq!(reg.default("b"), None);
    }

    #[test]
    fn derived_annotation_wins_on_collision() {
        let base = FieldRegistry::build(
            &[],
            &decls(&[("x", FieldDecl::with_default(FieldType::Int, json!(1)))]),
        );
        let derived = FieldRegistry::build(
            &[&base],
            &decls(&[("x", FieldDecl::with_default(FieldType::Str, json!("y")))]),
        );
        assert_eq!(derived.field_type("x"), Some(&FieldType::Str));
        assert_eq!(derived.default("x"), Some(&json!("y")));
        // Declaration order keeps the base position.
        let names: Vec<&str> = derived.annotations().map(|(n, _)| n).collect();
        assert_eq!(names, ["x"]);
    }

    #[test]
    fn pure_default_override_without_annotation() {
        let base = FieldRegistry::build(
            &[],
            &decls(&[("x", FieldDecl::with_default(FieldType::Int, json!(1)))]),
        );
        let local = LocalDecls {
            default_overrides: vec![("x".to_string(), json!(9))],
            ..LocalDecls::default()
        };
        let derived = FieldRegistry::build(&[&base], &local);
        assert_eq!(derived.field_type("x"), Some(&FieldType::Int));
        assert_eq!(derived.default("x"), Some(&json!(9)));
    }

    #[test]
    fn default_override_for_unknown_name_is_dropped() {
        let local = LocalDecls {
            default_overrides: vec![("ghost".to_string(), json!(1))],
            ..LocalDecls::default()
        };
        let reg = FieldRegistry::build(&[], &local);
        assert_eq!(reg.default("ghost"), None);
        assert!(!reg.is_known_key("ghost"));
    }

    #[test]
    fn private_names_are_skipped() {
        let reg = FieldRegistry::build(
            &[],
            &decls(&[
                ("_hidden", FieldDecl::required(FieldType::Int)),
                ("shown", FieldDecl::required(FieldType::Int)),
            ]),
        );
        assert!(reg.field_type("_hidden").is_none());
        assert!(reg.field_type("shown").is_some());
    }

    #[test]
    fn nullable_without_default_gets_null() {
        let reg = FieldRegistry::build(
            &[],
            &decls(&[(
                "opt",
                FieldDecl::required(FieldType::Nullable(Box::new(FieldType::Int))),
            )]),
        );
        assert_eq!(reg.default("opt"), Some(&Value::Null));
    }

    #[test]
    fn nullable_with_inherited_default_keeps_it() {
        let base = FieldRegistry::build(
            &[],
            &decls(&[(
                "opt",
                FieldDecl::with_default(FieldType::Nullable(Box::new(FieldType::Int)), json!(3)),
            )]),
        );
        let derived = FieldRegistry::build(&[&base], &LocalDecls::default());
        assert_eq!(derived.default("opt"), Some(&json!(3)));
    }

    #[test]
    fn slots_and_slot_defaults() {
        let local = LocalDecls {
            slots: vec![
                ("buf".to_string(), Some(json!([]))),
                ("raw".to_string(), None),
            ],
            ..LocalDecls::default()
        };
        let reg = FieldRegistry::build(&[], &local);
        assert!(reg.is_slot("buf"));
        assert!(reg.is_slot("raw"));
        assert_eq!(reg.default("buf"), Some(&json!([])));
        assert!(reg.is_known_key("raw"));
        // Slots are not annotations.
        assert!(!reg.field_names().contains("buf"));
    }

    #[test]
    fn traceless_markers_merge_across_chain() {
        let base = FieldRegistry::build(
            &[],
            &decls(&[(
                "logger",
                FieldDecl::required(FieldType::Str).traceless(),
            )]),
        );
        let derived =
            FieldRegistry::build(&[&base], &decls(&[("x", FieldDecl::required(FieldType::Int))]));
        assert!(derived.is_traceless("logger"));
        assert!(!derived.is_traceless("x"));
    }

    #[cfg(test)]
    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_field_name() -> impl Strategy<Value = String> {
            prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(str::to_string)
        }

        fn arb_decl() -> impl Strategy<Value = FieldDecl> {
            (
                prop::sample::select(vec![FieldType::Int, FieldType::Str, FieldType::Bool]),
                prop::option::of(prop::sample::select(vec![
                    serde_json::json!(0),
                    serde_json::json!("s"),
                    serde_json::json!(true),
                ])),
                any::<bool>(),
            )
                .prop_map(|(ty, default, traceless)| FieldDecl {
                    ty,
                    default,
                    traceless,
                })
        }

        fn arb_decls(max: usize) -> impl Strategy<Value = LocalDecls> {
            prop::collection::vec((arb_field_name(), arb_decl()), 0..max).prop_map(|fields| {
                LocalDecls {
                    fields,
                    ..LocalDecls::default()
                }
            })
        }

        proptest! {
            // Rebuilding the same declarations always yields the same
            // registry.
            #[test]
            fn merge_is_deterministic(base in arb_decls(4), left in arb_decls(4), right in arb_decls(4)) {
                let a = FieldRegistry::build(&[], &base);
                let l1 = FieldRegistry::build(&[&a], &left);
                let r1 = FieldRegistry::build(&[&a], &right);
                let d1 = FieldRegistry::build(&[&l1, &r1], &LocalDecls::default());

                let a2 = FieldRegistry::build(&[], &base);
                let l2 = FieldRegistry::build(&[&a2], &left);
                let r2 = FieldRegistry::build(&[&a2], &right);
                let d2 = FieldRegistry::build(&[&l2, &r2], &LocalDecls::default());

                prop_assert_eq!(d1, d2);
            }

            // In a diamond whose branches add disjoint field sets on top
            // of the shared base, the branch resolution order does not
            // matter. (A branch overriding a base field is a genuine
            // collision and follows declared parent order instead.)
            #[test]
            fn disjoint_diamond_is_order_independent(base in arb_decls(4), left in arb_decls(4), right in arb_decls(4)) {
                let base_names: std::collections::BTreeSet<String> =
                    base.fields.iter().map(|(n, _)| n.clone()).collect();
                let left_only: Vec<(String, FieldDecl)> = left
                    .fields
                    .iter()
                    .filter(|(n, _)| !base_names.contains(n))
                    .cloned()
                    .collect();
                let left_names: std::collections::BTreeSet<String> =
                    left_only.iter().map(|(n, _)| n.clone()).collect();
                let right_only: Vec<(String, FieldDecl)> = right
                    .fields
                    .iter()
                    .filter(|(n, _)| !base_names.contains(n) && !left_names.contains(n))
                    .cloned()
                    .collect();
                let left = LocalDecls { fields: left_only, ..LocalDecls::default() };
                let right = LocalDecls { fields: right_only, ..LocalDecls::default() };

                let a = FieldRegistry::build(&[], &base);
                let l = FieldRegistry::build(&[&a], &left);
                let r = FieldRegistry::build(&[&a], &right);

                let lr = FieldRegistry::build(&[&l, &r], &LocalDecls::default());
                let mut rl = FieldRegistry::build(&[&r, &l], &LocalDecls::default());

                // Declaration order differs between the two resolution
                // orders; the semantic content must not.
                rl.order = lr.order.clone();
                rl.slot_order = lr.slot_order.clone();
                prop_assert_eq!(lr, rl);
            }
        }
    }
}
