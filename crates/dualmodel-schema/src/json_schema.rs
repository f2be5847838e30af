//! JSON Schema for a model's validation shape.
//!
//! Properties use output names (aliases), relationship fields are left out,
//! and nested models are emitted once under `$defs` and referenced.

use std::collections::BTreeMap;

use dualmodel_core::{DefaultValue, DumpOptions, FieldDescriptor, ModelDescriptor, TypeRef};
use serde_json::{Map, Value as Json, json};

use crate::registry::Registry;

/// Schema for `model`, with nested models under `$defs`.
pub fn model_schema(registry: &Registry, model: &ModelDescriptor) -> Json {
    let mut defs = BTreeMap::new();
    let mut schema = object_schema(registry, model, &mut defs);
    defs.remove(&model.name);
    if !defs.is_empty() {
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("$defs".into(), Json::Object(defs.into_iter().collect()));
        }
    }
    schema
}

fn object_schema(
    registry: &Registry,
    model: &ModelDescriptor,
    defs: &mut BTreeMap<String, Json>,
) -> Json {
    // Placeholder first so self references terminate.
    defs.entry(model.name.clone()).or_insert(Json::Null);

    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in &model.fields {
        if field.is_relationship() || field.decl.exclude {
            continue;
        }
        properties.insert(
            field.output_name.clone(),
            field_schema(registry, field, defs),
        );
        if field.is_required() {
            required.push(Json::String(field.output_name.clone()));
        }
    }

    let mut schema = Map::new();
    schema.insert(
        "title".into(),
        Json::String(
            model
                .config
                .title
                .clone()
                .unwrap_or_else(|| model.name.clone()),
        ),
    );
    if let Some(description) = &model.config.description {
        schema.insert("description".into(), Json::String(description.clone()));
    }
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Json::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Json::Array(required));
    }
    let schema = Json::Object(schema);
    defs.insert(model.name.clone(), schema.clone());
    schema
}

fn field_schema(
    registry: &Registry,
    field: &FieldDescriptor,
    defs: &mut BTreeMap<String, Json>,
) -> Json {
    let mut schema = type_schema(registry, &field.ty, defs);
    let Some(obj) = schema.as_object_mut() else {
        return schema;
    };
    let c = &field.decl.constraints;
    let bounds = [
        ("exclusiveMinimum", c.gt),
        ("minimum", c.ge),
        ("exclusiveMaximum", c.lt),
        ("maximum", c.le),
    ];
    for (key, bound) in bounds {
        if let Some(bound) = bound {
            obj.insert(key.into(), json!(bound));
        }
    }
    let is_text = matches!(field.ty.strip_optional(), TypeRef::Text);
    if let Some(min) = c.min_length {
        let key = if is_text { "minLength" } else { "minItems" };
        obj.insert(key.into(), json!(min));
    }
    if let Some(max) = c.max_length {
        let key = if is_text { "maxLength" } else { "maxItems" };
        obj.insert(key.into(), json!(max));
    }
    if let Some(pattern) = &c.pattern {
        obj.insert("pattern".into(), json!(pattern));
    }

    obj.insert(
        "title".into(),
        Json::String(
            field
                .decl
                .title
                .clone()
                .unwrap_or_else(|| title_case(&field.name)),
        ),
    );
    if let Some(description) = &field.decl.description {
        obj.insert("description".into(), json!(description));
    }
    if let DefaultValue::Value(default) = &field.decl.default {
        obj.insert("default".into(), default.to_json(&DumpOptions::default()));
    }
    if let Some(Json::Object(extra)) = &field.decl.schema_extra {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    schema
}

fn type_schema(registry: &Registry, ty: &TypeRef, defs: &mut BTreeMap<String, Json>) -> Json {
    match ty {
        TypeRef::Int => json!({"type": "integer"}),
        TypeRef::Float => json!({"type": "number"}),
        TypeRef::Text => json!({"type": "string"}),
        TypeRef::Bool => json!({"type": "boolean"}),
        TypeRef::Date => json!({"type": "string", "format": "date"}),
        TypeRef::Time => json!({"type": "string", "format": "time"}),
        TypeRef::DateTime => json!({"type": "string", "format": "date-time"}),
        TypeRef::Uuid => json!({"type": "string", "format": "uuid"}),
        TypeRef::Decimal => json!({"anyOf": [{"type": "number"}, {"type": "string"}]}),
        TypeRef::Bytes => json!({"type": "string", "format": "binary"}),
        TypeRef::Enum(e) => json!({"type": "string", "enum": e.variants, "title": e.name}),
        TypeRef::Json | TypeRef::Opaque(_) => json!({}),
        TypeRef::Optional(inner) => {
            json!({"anyOf": [type_schema(registry, inner, defs), {"type": "null"}]})
        }
        TypeRef::List(inner) => {
            json!({"type": "array", "items": type_schema(registry, inner, defs)})
        }
        TypeRef::Set(inner) => json!({
            "type": "array",
            "uniqueItems": true,
            "items": type_schema(registry, inner, defs),
        }),
        TypeRef::Map(args) => match args.get(1) {
            Some(value) => json!({
                "type": "object",
                "additionalProperties": type_schema(registry, value, defs),
            }),
            None => json!({"type": "object"}),
        },
        TypeRef::Named(name) => {
            if !defs.contains_key(name) {
                if let Some(nested) = registry.descriptor(name) {
                    object_schema(registry, &nested, defs);
                }
            }
            json!({"$ref": format!("#/$defs/{name}")})
        }
    }
}

/// `secret_name` -> `Secret Name`
fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("secret_name"), "Secret Name");
        assert_eq!(title_case("id"), "Id");
    }
}
