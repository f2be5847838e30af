use dualmodel::prelude::*;
use dualmodel::{AliasGenerator, ValidationErrorKind};
use serde_json::json;

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .define(
            ModelSpec::plain("HeroCreate")
                .field("name", TypeRef::Text, FieldDecl::new().max_length(50))
                .field("secret_name", TypeRef::Text, FieldDecl::new())
                .field(
                    "age",
                    TypeRef::optional(TypeRef::Int),
                    FieldDecl::new().default(Value::Null).ge(0.0),
                ),
        )
        .unwrap();
    registry
        .define(ModelSpec::plain("HeroName").field("name", TypeRef::Text, FieldDecl::new()))
        .unwrap();
    registry
        .define(
            ModelSpec::table("Team")
                .field(
                    "id",
                    TypeRef::optional(TypeRef::Int),
                    FieldDecl::new().default(Value::Null).primary_key(true),
                )
                .field("name", TypeRef::Text, FieldDecl::new())
                .relationship(
                    "heroes",
                    TypeRef::list(TypeRef::named("Hero")),
                    RelationshipDecl::new().back_populates("team"),
                ),
        )
        .unwrap();
    registry
        .define(
            ModelSpec::table("Hero")
                .field(
                    "id",
                    TypeRef::optional(TypeRef::Int),
                    FieldDecl::new().default(Value::Null).primary_key(true),
                )
                .field("name", TypeRef::Text, FieldDecl::new().max_length(50))
                .field("secret_name", TypeRef::Text, FieldDecl::new())
                .field(
                    "age",
                    TypeRef::optional(TypeRef::Int),
                    FieldDecl::new().default(Value::Null).ge(0.0),
                )
                .field(
                    "team_id",
                    TypeRef::optional(TypeRef::Int),
                    FieldDecl::new().default(Value::Null).foreign_key("team.id"),
                )
                .relationship(
                    "team",
                    TypeRef::optional(TypeRef::named("Team")),
                    RelationshipDecl::new().back_populates("heroes"),
                ),
        )
        .unwrap();
    registry.configure().unwrap();
    registry
}

fn names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|v| {
            let hero = v.as_instance().expect("converted to an instance");
            assert!(hero.is_instance_of("Hero"));
            hero.get("name").and_then(|n| n.as_str().map(str::to_string)).unwrap()
        })
        .collect()
}

#[test]
fn validate_collects_every_error() {
    let registry = registry();
    let hero = registry.model("Hero").unwrap();

    let err = hero
        .validate_json(r#"{"name": "x", "age": -3, "secret_name": 5}"#)
        .unwrap_err();
    let errors = err.as_validation().unwrap();
    assert!(errors.has_error_for("age"));
    assert!(errors.has_error_for("secret_name"));
    assert!(!errors.has_error_for("name"));

    let err = hero.validate_json(r#"{"age": 3}"#).unwrap_err();
    let errors = err.as_validation().unwrap();
    assert!(errors
        .errors
        .iter()
        .any(|e| e.kind == ValidationErrorKind::Missing && e.loc == ["name"]));
}

#[test]
fn validating_an_instance_of_the_same_model_is_idempotent() {
    let registry = registry();
    let hero = registry.model("Hero").unwrap();
    let rusty = hero
        .validate(Value::from_json(json!({"name": "Rusty-Man", "secret_name": "Tommy Sharp"})))
        .unwrap();

    let again = hero.validate(Value::Model(rusty.clone())).unwrap();
    assert!(again.is_same_object(&rusty));
    assert_eq!(again.dump(&DumpOptions::default()), rusty.dump(&DumpOptions::default()));
}

#[test]
fn never_persisted_instances_are_only_equal_to_themselves() {
    let registry = registry();
    let hero = registry.model("Hero").unwrap();
    let a = hero
        .construct([("name", "Deadpond"), ("secret_name", "Dive Wilson")])
        .unwrap();
    let b = hero
        .construct([("name", "Deadpond"), ("secret_name", "Dive Wilson")])
        .unwrap();

    assert_eq!(a, a.clone());
    assert_ne!(a, b);
    assert_eq!(a.dump(&DumpOptions::default()), b.dump(&DumpOptions::default()));
}

#[test]
fn mixed_relationship_list_is_converted_in_order() {
    let registry = registry();
    let hero = registry.model("Hero").unwrap();
    let create = registry.model("HeroCreate").unwrap();

    let first = hero
        .construct([("name", "Deadpond"), ("secret_name", "Dive Wilson")])
        .unwrap();
    let second = create
        .construct([("name", "Spider-Boy"), ("secret_name", "Pedro Parqueador")])
        .unwrap();
    let third = Value::from_json(json!({"name": "Rusty-Man", "secret_name": "Tommy Sharp"}));

    let team = registry
        .model("Team")
        .unwrap()
        .validate(Value::Object(
            [
                ("name".to_string(), Value::from("Preventers")),
                (
                    "heroes".to_string(),
                    Value::Array(vec![Value::Model(first.clone()), Value::Model(second), third]),
                ),
            ]
            .into_iter()
            .collect(),
        ))
        .unwrap();

    let heroes = team.get("heroes").unwrap();
    assert_eq!(names(&heroes), ["Deadpond", "Spider-Boy", "Rusty-Man"]);
    // Already-typed members are kept as the same object.
    assert!(heroes.as_array().unwrap()[0].as_instance().unwrap().is_same_object(&first));
}

#[test]
fn conversion_miss_keeps_the_original_value() {
    let registry = registry();
    let team_model = registry.model("Team").unwrap();
    let team = team_model.construct([("name", "Preventers")]).unwrap();

    // Not convertible into a Hero: no name, no secret_name.
    let stray = Value::from_json(json!({"nickname": "nobody"}));
    team_model
        .assign(&team, "heroes", Value::Array(vec![stray.clone(), Value::from(42)]))
        .unwrap();
    assert_eq!(
        team.get("heroes"),
        Some(Value::Array(vec![stray.clone(), Value::BigInt(42)]))
    );

    // The strict path says why.
    let err = team_model.convert("Hero", &stray).unwrap_err();
    assert!(err.as_validation().unwrap().has_error_for("name"));
}

#[test]
fn incomplete_plain_instance_is_kept_on_conversion_miss() {
    let registry = registry();
    let team_model = registry.model("Team").unwrap();
    let team = team_model.construct([("name", "Preventers")]).unwrap();

    // A valid HeroName, but it has no secret_name to give a Hero.
    let partial = registry
        .model("HeroName")
        .unwrap()
        .construct([("name", "Nameless")])
        .unwrap();
    team_model
        .assign(&team, "heroes", vec![Value::Model(partial.clone())])
        .unwrap();

    let heroes = team.get("heroes").unwrap();
    let kept = heroes.as_array().unwrap()[0].as_instance().unwrap();
    assert!(kept.is_same_object(&partial));
    assert!(kept.is_instance_of("HeroName"));

    let err = team_model.convert("Hero", &Value::Model(partial)).unwrap_err();
    assert!(err.as_validation().unwrap().has_error_for("secret_name"));
}

#[test]
fn datetime_fields_normalize_offsets_and_reject_out_of_range_years() {
    let mut registry = Registry::new();
    registry
        .define(ModelSpec::plain("Event").field("at", TypeRef::DateTime, FieldDecl::new()))
        .unwrap();
    registry.configure().unwrap();
    let event = registry.model("Event").unwrap();

    let shifted = event
        .validate_json(r#"{"at": "2024-01-01T10:00:00+02:00"}"#)
        .unwrap();
    let utc = event.validate_json(r#"{"at": "2024-01-01T08:00:00Z"}"#).unwrap();
    assert_eq!(shifted.get("at"), utc.get("at"));
    assert_eq!(
        shifted.dump(&DumpOptions::default()),
        json!({"at": "2024-01-01T08:00:00"})
    );

    let err = event
        .validate_json(r#"{"at": "300000-01-01T00:00:00"}"#)
        .unwrap_err();
    let errors = err.as_validation().unwrap();
    assert!(errors.has_error_for("at"));
    assert!(errors.errors.iter().any(|e| e.kind == ValidationErrorKind::Type));
}

#[test]
fn assignment_is_validated() {
    let registry = registry();
    let hero = registry.model("Hero").unwrap();
    let rusty = hero
        .construct([("name", "Rusty-Man"), ("secret_name", "Tommy Sharp")])
        .unwrap();

    assert!(hero.assign(&rusty, "age", -1).is_err());
    assert_eq!(rusty.get("age"), Some(Value::Null));
    hero.assign(&rusty, "age", "48").unwrap();
    assert_eq!(rusty.get("age"), Some(Value::BigInt(48)));
}

#[test]
fn dump_options_and_serde() {
    let registry = registry();
    let hero = registry.model("Hero").unwrap();
    let rusty = hero
        .validate_json(r#"{"name": "Rusty-Man", "secret_name": "Tommy Sharp"}"#)
        .unwrap();

    assert_eq!(
        rusty.dump(&DumpOptions::new().exclude_unset()),
        json!({"name": "Rusty-Man", "secret_name": "Tommy Sharp"})
    );
    let full = hero.dump(&rusty, &DumpOptions::default());
    assert_eq!(full["age"], serde_json::Value::Null);
    assert!(full.get("team").is_none());
    assert_eq!(serde_json::to_value(&rusty).unwrap(), full);

    let text = hero
        .dump_json(&rusty, &DumpOptions::new().exclude_none())
        .unwrap();
    assert_eq!(text, r#"{"name":"Rusty-Man","secret_name":"Tommy Sharp"}"#);
}

#[test]
fn aliases_and_forbidden_extras() {
    let mut registry = Registry::new();
    registry
        .define(
            ModelSpec::plain("Profile")
                .config(
                    ModelConfig::plain()
                        .alias_generator(AliasGenerator::CamelCase)
                        .extra(ExtraFieldsBehavior::Forbid),
                )
                .field("first_name", TypeRef::Text, FieldDecl::new()),
        )
        .unwrap();
    registry.configure().unwrap();
    let profile = registry.model("Profile").unwrap();

    let ann = profile.validate_json(r#"{"firstName": "Ann"}"#).unwrap();
    assert_eq!(
        ann.dump(&DumpOptions::new().by_alias()),
        json!({"firstName": "Ann"})
    );

    let err = profile
        .validate_json(r#"{"firstName": "Ann", "nickname": "A"}"#)
        .unwrap_err();
    assert!(err
        .as_validation()
        .unwrap()
        .errors
        .iter()
        .any(|e| e.kind == ValidationErrorKind::Extra));
}

#[test]
fn json_schema_lists_required_fields() {
    let registry = registry();
    let schema = registry.model("Hero").unwrap().json_schema();
    assert_eq!(schema["title"], "Hero");
    assert_eq!(schema["required"], json!(["name", "secret_name"]));
    assert!(schema["properties"].get("team").is_none());
    assert_eq!(schema["properties"]["name"]["maxLength"], 50);
}
