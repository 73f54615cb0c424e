//! Fuzz harness for unit construction.
//!
//! Feeds arbitrary bytes through the JSON parser and, when they form an
//! object, constructs a unit with a representative field registry:
//! scalars, containers, a union, a nested unit, and a secret. The
//! harness asserts that construction either succeeds or returns an
//! error, never panics, and that a successful instance survives both
//! projections.

#![no_main]
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Value};
use unitkit_core::{
    dict_projection, trace_projection, ConstructCtx, FieldDecl, FieldType, ProjectionOptions,
    TypeRegistry, UnitTypeDecl,
};

fn build_registry() -> TypeRegistry {
    let registry = TypeRegistry::new();
    registry
        .register(
            UnitTypeDecl::new("Inner")
                .field("a", FieldDecl::with_default(FieldType::Int, json!(0))),
        )
        .expect("inner registration");
    registry
        .register(
            UnitTypeDecl::new("Target")
                .field("flag", FieldDecl::with_default(FieldType::Bool, json!(false)))
                .field("count", FieldDecl::required(FieldType::Int))
                .field("label", FieldDecl::with_default(FieldType::Str, json!("")).traceless())
                .field(
                    "items",
                    FieldDecl::with_default(
                        FieldType::Sequence(Box::new(FieldType::Float)),
                        json!([]),
                    ),
                )
                .field(
                    "extra",
                    FieldDecl::required(FieldType::Nullable(Box::new(FieldType::Union(vec![
                        FieldType::Int,
                        FieldType::Unit("Inner".to_string()),
                    ])))),
                )
                .field(
                    "token",
                    FieldDecl::with_default(
                        FieldType::Secret(Box::new(FieldType::Str)),
                        json!({"label": "fuzz/token"}),
                    ),
                )
                .slot("scratch", None),
        )
        .expect("target registration");
    registry
}

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<Value>(data) else {
        return;
    };
    let Value::Object(kwargs) = value else {
        return;
    };

    let registry = build_registry();
    let target = registry.get("Target").expect("registered");
    let ctx = ConstructCtx::new(&registry);

    if let Ok(instance) = target.construct(&kwargs, &ctx) {
        let trace = trace_projection(&instance);
        assert!(trace.starts_with('{') && trace.ends_with('}'));
        let _ = dict_projection(
            &instance,
            &ProjectionOptions::new().exclude_unset().exclude_defaults(),
        );
    }
    let _ = target.validate(&kwargs, &ctx);
});
