//! End-to-end tests of the unit type system: declaration, contract
//! enforcement, construction, and projections working together over
//! realistic multi-level hierarchies.

use serde_json::{json, Map, Value};
use unitkit_core::{
    dict_projection, trace_projection, ConstructCtx, ConstructError, ContractError, FieldDecl,
    FieldType, FieldValue, MethodDecl, ProjectionOptions, RegistryError, TypeRegistry,
    UnitTypeDecl,
};

fn kwargs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// A small processing-pipeline hierarchy: an abstract base unit with a
/// contract, a filter family deriving from it, and a nested config
/// model.
fn pipeline_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();

    registry
        .register(
            UnitTypeDecl::new("BaseUnit")
                .abstract_type()
                .field(
                    "logger",
                    FieldDecl::required(FieldType::Str).traceless(),
                )
                .field(
                    "version",
                    FieldDecl::required(FieldType::Nullable(Box::new(FieldType::Str))),
                )
                .require("logging")
                .method(MethodDecl::abstract_fn("process", &["self", "alert"]).check_signature()),
        )
        .unwrap();

    registry
        .register(
            UnitTypeDecl::new("Threshold")
                .field("min_mag", FieldDecl::with_default(FieldType::Float, json!(17.5)))
                .field("max_mag", FieldDecl::with_default(FieldType::Float, json!(21.0))),
        )
        .unwrap();

    registry
        .register(
            UnitTypeDecl::new("MagnitudeFilter")
                .parent("BaseUnit")
                .field(
                    "threshold",
                    FieldDecl::required(FieldType::Unit("Threshold".to_string())),
                )
                .field("passes", FieldDecl::with_default(FieldType::Int, json!(1)))
                .require("catalog")
                .method(MethodDecl::concrete_fn("process", &["self", "alert"])),
        )
        .unwrap();

    registry
}

#[test]
fn multi_level_merge_and_construct() {
    let registry = pipeline_registry();
    let filter = registry.get("MagnitudeFilter").unwrap();

    // Fields merge across the chain, base first.
    let names = filter.field_names();
    for expected in ["logger", "version", "threshold", "passes"] {
        assert!(names.contains(expected), "missing field {expected}");
    }

    // Resource requirements merge across the ancestry.
    let resources: Vec<&str> = filter
        .required_resources()
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(resources, ["catalog", "logging"]);

    let instance = filter
        .construct(
            &kwargs(json!({
                "logger": "job-42",
                "threshold": {"min_mag": 18.0},
            })),
            &ConstructCtx::new(&registry),
        )
        .unwrap();

    // Nullable field with no default anywhere: absent, no error.
    assert_eq!(instance.get("version").unwrap().to_plain_value(), Value::Null);

    // Nested spawn from a plain mapping.
    let threshold = instance.get("threshold").and_then(FieldValue::as_unit).unwrap();
    assert_eq!(threshold.unit_type().name(), "Threshold");
    assert_eq!(
        threshold.get("min_mag").unwrap().to_plain_value(),
        json!(18.0)
    );
    assert_eq!(
        threshold.get("max_mag").unwrap().to_plain_value(),
        json!(21.0)
    );
    assert!(threshold.is_unset("max_mag"));
}

#[test]
fn abstract_contract_enforced_at_registration() {
    // Missing implementation.
    let registry = pipeline_registry();
    let err = registry
        .register(UnitTypeDecl::new("Broken").parent("BaseUnit"))
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Contract(ContractError::AbstractNotImplemented { method, .. })
            if method == "process"
    ));

    // Wrong signature.
    let err = registry
        .register(
            UnitTypeDecl::new("WrongArity")
                .parent("BaseUnit")
                .method(MethodDecl::concrete_fn("process", &["self", "alert", "extra"])),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Contract(ContractError::SignatureMismatch { .. })
    ));

    // Exact match registers fine.
    registry
        .register(
            UnitTypeDecl::new("Correct")
                .parent("BaseUnit")
                .method(MethodDecl::concrete_fn("process", &["self", "alert"])),
        )
        .unwrap();
}

#[test]
fn abstract_base_cannot_be_instantiated() {
    let registry = pipeline_registry();
    let base = registry.get("BaseUnit").unwrap();
    let err = base
        .construct(
            &kwargs(json!({"logger": "x", "version": null})),
            &ConstructCtx::new(&registry),
        )
        .unwrap_err();
    assert!(matches!(err, ConstructError::AbstractUnit { .. }));
}

#[test]
fn diamond_default_override_follows_merge_order() {
    let registry = TypeRegistry::new();
    registry
        .register(
            UnitTypeDecl::new("Root")
                .field("chunk", FieldDecl::with_default(FieldType::Int, json!(100))),
        )
        .unwrap();
    registry
        .register(UnitTypeDecl::new("Left").parent("Root"))
        .unwrap();
    registry
        .register(
            UnitTypeDecl::new("Right")
                .parent("Root")
                .default_override("chunk", json!(500)),
        )
        .unwrap();
    // Parents base-first: Right is more specific, its default wins.
    registry
        .register(UnitTypeDecl::new("Join").parent("Left").parent("Right"))
        .unwrap();

    let join = registry.get("Join").unwrap();
    let instance = join
        .construct(&kwargs(json!({})), &ConstructCtx::new(&registry))
        .unwrap();
    assert_eq!(instance.get("chunk").and_then(|v| v.as_i64()), Some(500));

    // Sibling subtypes are unaffected by the override.
    let left = registry.get("Left").unwrap();
    let instance = left
        .construct(&kwargs(json!({})), &ConstructCtx::new(&registry))
        .unwrap();
    assert_eq!(instance.get("chunk").and_then(|v| v.as_i64()), Some(100));
}

#[test]
fn projections_over_a_real_hierarchy() {
    let registry = pipeline_registry();
    let filter = registry.get("MagnitudeFilter").unwrap();
    let ctx = ConstructCtx::new(&registry);

    let instance = filter
        .construct(
            &kwargs(json!({
                "logger": "job-42",
                "threshold": {"min_mag": 18.0},
                "passes": 1,
            })),
            &ctx,
        )
        .unwrap();

    // The traceless logger never reaches the trace projection and two
    // equivalently-built instances trace identically.
    let trace = trace_projection(&instance);
    assert!(!trace.contains("job-42"));
    let other = filter
        .construct(
            &kwargs(json!({
                "logger": "job-43",
                "threshold": {"min_mag": 18.0},
            })),
            &ctx,
        )
        .unwrap();
    assert_eq!(trace, trace_projection(&other));

    // exclude_unset keeps only what was provided.
    let dict = dict_projection(&instance, &ProjectionOptions::new().exclude_unset());
    assert!(dict.contains_key("threshold"));
    assert!(dict.contains_key("passes"));
    assert!(!dict.contains_key("version"));

    // exclude_defaults drops `passes`, provided at its default value.
    let dict = dict_projection(&instance, &ProjectionOptions::new().exclude_defaults());
    assert!(!dict.contains_key("passes"));
    assert!(dict.contains_key("threshold"));
}

#[test]
fn validate_as_config_precheck() {
    let registry = pipeline_registry();
    let filter = registry.get("MagnitudeFilter").unwrap();
    let ctx = ConstructCtx::new(&registry);

    // The traceless logger is a runtime handle; a config file need not
    // provide it.
    let values = filter
        .validate(&kwargs(json!({"threshold": {"min_mag": 16.0}})), &ctx)
        .unwrap();
    assert_eq!(values["passes"], json!(1));
    assert_eq!(values["threshold"]["min_mag"], json!(16.0));
    assert!(!values.contains_key("logger"));

    // Bad config is still rejected with full field paths.
    let err = filter
        .validate(&kwargs(json!({"threshold": {"min_mag": "bright"}})), &ctx)
        .unwrap_err();
    assert!(matches!(
        err,
        ConstructError::TypeMismatch { field, .. } if field == "threshold.min_mag"
    ));
}

#[test]
fn union_of_unit_and_scalar_spawns_by_shape() {
    let registry = TypeRegistry::new();
    registry
        .register(
            UnitTypeDecl::new("Window")
                .field("size", FieldDecl::with_default(FieldType::Int, json!(10))),
        )
        .unwrap();
    registry
        .register(
            UnitTypeDecl::new("Selector").field(
                "window",
                FieldDecl::required(FieldType::Union(vec![
                    FieldType::Int,
                    FieldType::Unit("Window".to_string()),
                ])),
            ),
        )
        .unwrap();
    let selector = registry.get("Selector").unwrap();
    let ctx = ConstructCtx::new(&registry);

    let scalar = selector.construct(&kwargs(json!({"window": 5})), &ctx).unwrap();
    assert_eq!(scalar.get("window").and_then(|v| v.as_i64()), Some(5));

    let spawned = selector
        .construct(&kwargs(json!({"window": {"size": 20}})), &ctx)
        .unwrap();
    let window = spawned.get("window").and_then(FieldValue::as_unit).unwrap();
    assert_eq!(window.get("size").and_then(|v| v.as_i64()), Some(20));

    let err = selector
        .construct(&kwargs(json!({"window": [1, 2]})), &ctx)
        .unwrap_err();
    let rendered = err.to_string();
    // Aggregated union failure names both alternatives.
    assert!(rendered.contains("int"));
    assert!(rendered.contains("unit<Window>"));
}
