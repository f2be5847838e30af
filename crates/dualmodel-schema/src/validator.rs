//! Instance validation.
//!
//! Walks a model's fields over a mapping (or another instance), resolves
//! input keys, coerces each value along its declared [`TypeRef`], runs the
//! field constraints and collects every failure into one
//! [`ValidationError`].
//!
//! Relationship fields take a separate path: a value that is an instance of
//! some other model is re-validated into the relationship target by field
//! name. That conversion is best effort. [`try_convert`] reports why it
//! failed; [`convert_related`] keeps the original value when it does.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use dualmodel_core::{
    CollectionKind, Error, ExtraFieldsBehavior, FieldDescriptor, FieldKind, FieldsSet, Instance,
    ModelDescriptor, RelationshipInfo, Result, TypeRef, ValidationError, ValidationErrorKind,
    Value, check_constraints, coerce_scalar,
};

use crate::registry::Registry;

/// Which keys of a mapping name a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keys {
    /// The field's input aliases (and its name under `populate_by_name`).
    Aliases,
    /// The field name only.
    Names,
}

/// Validate `input` into an instance of `model`.
///
/// An instance of `model` itself is returned as is. An instance of another
/// model is read by field name; only fields it had set count as set.
pub(crate) fn validate_model(
    registry: &Registry,
    model: &Arc<ModelDescriptor>,
    input: Value,
    keys: Keys,
) -> std::result::Result<Instance, ValidationError> {
    match input {
        Value::Model(instance) if instance.is_instance_of(&model.name) => Ok(instance),
        Value::Model(instance) => {
            let mut map = instance.extra();
            map.extend(instance.values());
            let set: HashSet<String> = instance.fields_set().into_iter().collect();
            validate_mapping(registry, model, map, Keys::Names, Some(&set))
        }
        Value::Object(map) => validate_mapping(registry, model, map, keys, None),
        Value::Json(json @ serde_json::Value::Object(_)) => {
            validate_model(registry, model, Value::from_json(json), keys)
        }
        other => {
            let mut errors = ValidationError::new().for_model(&model.name);
            errors.add(
                Vec::new(),
                ValidationErrorKind::Type,
                format!(
                    "Input should be a valid dictionary or instance of {}, got {}",
                    model.name,
                    other.type_name()
                ),
            );
            Err(errors)
        }
    }
}

fn validate_mapping(
    registry: &Registry,
    model: &Arc<ModelDescriptor>,
    mut map: BTreeMap<String, Value>,
    keys: Keys,
    source_set: Option<&HashSet<String>>,
) -> std::result::Result<Instance, ValidationError> {
    let strict = model.config.strict;
    let mut errors = ValidationError::new().for_model(&model.name);
    let mut values = Vec::with_capacity(model.fields.len());
    let mut fields_set = FieldsSet::empty(model.fields.len());

    for (idx, field) in model.fields.iter().enumerate() {
        let names: Vec<&str> = match keys {
            Keys::Aliases => field.input_names.iter().map(String::as_str).collect(),
            Keys::Names => vec![field.name.as_str()],
        };
        let mut found = None;
        for name in &names {
            if let Some(value) = map.remove(*name) {
                found.get_or_insert((*name, value));
            }
        }

        match found {
            Some((key, value)) => {
                let loc = vec![key.to_string()];
                let value = validate_field(registry, field, value, &loc, strict, &mut errors);
                values.push(value.unwrap_or_default());
                if source_set.is_none_or(|s| s.contains(&field.name)) {
                    fields_set.set(idx);
                }
            }
            None => match field.decl.default.produce() {
                Some(default) => values.push(default),
                None => {
                    errors.add_missing(names.first().copied().unwrap_or(&field.name));
                    values.push(Value::Null);
                }
            },
        }
    }

    let mut extra = BTreeMap::new();
    match model.config.extra {
        ExtraFieldsBehavior::Ignore => {}
        ExtraFieldsBehavior::Forbid => {
            for key in map.keys() {
                errors.add_extra(key);
            }
        }
        ExtraFieldsBehavior::Allow => extra = map,
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Instance::from_validated(Arc::clone(model), values, fields_set, extra).map_err(|err| {
        let mut errors = ValidationError::new().for_model(&model.name);
        errors.add(Vec::new(), ValidationErrorKind::Custom, err.to_string());
        errors
    })
}

/// Validate one field value. `None` means errors were recorded.
pub(crate) fn validate_field(
    registry: &Registry,
    field: &FieldDescriptor,
    value: Value,
    loc: &[String],
    strict: bool,
    errors: &mut ValidationError,
) -> Option<Value> {
    if let FieldKind::Relationship(rel) = &field.kind {
        return Some(convert_related(registry, rel, value));
    }
    let before = errors.len();
    let value = validate_value(registry, &field.ty, value, loc, strict, errors)?;
    check_constraints(loc, &value, &field.decl.constraints, errors);
    (errors.len() == before).then_some(value)
}

fn validate_value(
    registry: &Registry,
    ty: &TypeRef,
    value: Value,
    loc: &[String],
    strict: bool,
    errors: &mut ValidationError,
) -> Option<Value> {
    let value = match (ty, value) {
        (TypeRef::Json, v) => return Some(v),
        (_, Value::Json(json)) => Value::from_json(json),
        (_, v) => v,
    };
    let got = value.type_name();

    match (ty, value) {
        (TypeRef::Optional(_), Value::Null) => Some(Value::Null),
        (TypeRef::Optional(inner), v) => validate_value(registry, inner, v, loc, strict, errors),
        (_, Value::Null) => {
            errors.add(
                loc.to_vec(),
                ValidationErrorKind::Type,
                format!("Input should be a valid {ty}, got null"),
            );
            None
        }
        (TypeRef::List(inner) | TypeRef::Set(inner), Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut ok = true;
            for (i, item) in items.into_iter().enumerate() {
                let mut item_loc = loc.to_vec();
                item_loc.push(i.to_string());
                match validate_value(registry, inner, item, &item_loc, strict, errors) {
                    Some(v) => out.push(v),
                    None => ok = false,
                }
            }
            if matches!(ty, TypeRef::Set(_)) {
                out = dedup(out);
            }
            ok.then_some(Value::Array(out))
        }
        (TypeRef::Map(args), Value::Object(map)) => {
            let Some(value_ty) = args.get(1) else {
                return Some(Value::Object(map));
            };
            let mut out = BTreeMap::new();
            let mut ok = true;
            for (key, item) in map {
                let mut item_loc = loc.to_vec();
                item_loc.push(key.clone());
                match validate_value(registry, value_ty, item, &item_loc, strict, errors) {
                    Some(v) => {
                        out.insert(key, v);
                    }
                    None => ok = false,
                }
            }
            ok.then_some(Value::Object(out))
        }
        (TypeRef::Named(name), v) => {
            let Some(target) = registry.descriptor(name) else {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::Custom,
                    format!("model `{name}` is not configured"),
                );
                return None;
            };
            match validate_model(registry, &target, v, Keys::Aliases) {
                Ok(instance) => Some(Value::Model(instance)),
                Err(nested) => {
                    errors.merge_nested(loc, nested);
                    None
                }
            }
        }
        (TypeRef::Opaque(_), v) => Some(v),
        (TypeRef::List(_) | TypeRef::Set(_) | TypeRef::Map(_), _) => {
            let expected = match ty {
                TypeRef::Map(_) => "dictionary",
                _ => "list",
            };
            errors.add(
                loc.to_vec(),
                ValidationErrorKind::Type,
                format!("Input should be a valid {expected}, got {got}"),
            );
            None
        }
        (scalar, v) => match coerce_scalar(scalar, v, strict) {
            Ok(v) => Some(v),
            Err(expected) => {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::Type,
                    format!("Input should be a valid {expected}, got {got}"),
                );
                None
            }
        },
    }
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Convert a relationship value into the target model, keeping whatever
/// cannot be converted.
pub(crate) fn convert_related(registry: &Registry, rel: &RelationshipInfo, value: Value) -> Value {
    let value = match value {
        Value::Json(json) => Value::from_json(json),
        other => other,
    };
    match (&rel.collection, value) {
        (_, Value::Null) => Value::Null,
        (CollectionKind::Scalar, v) => convert_one(registry, &rel.target, v),
        (CollectionKind::List, Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|v| convert_one(registry, &rel.target, v))
                .collect(),
        ),
        (CollectionKind::Set, Value::Array(items)) => Value::Array(dedup(
            items
                .into_iter()
                .map(|v| convert_one(registry, &rel.target, v))
                .collect(),
        )),
        (CollectionKind::Mapping { .. }, Value::Object(map)) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, convert_one(registry, &rel.target, v)))
                .collect(),
        ),
        (CollectionKind::Mapping { key }, Value::Array(items)) => {
            let mut out = BTreeMap::new();
            for (i, item) in items.into_iter().enumerate() {
                let item = convert_one(registry, &rel.target, item);
                let map_key = item
                    .as_instance()
                    .and_then(|inst| inst.get(key))
                    .map_or_else(|| i.to_string(), |k| mapping_key(&k));
                out.insert(map_key, item);
            }
            Value::Object(out)
        }
        (_, other) => other,
    }
}

/// Text form of a mapping-collection key.
pub fn mapping_key(value: &Value) -> String {
    match value {
        Value::Text(s) | Value::Decimal(s) => s.clone(),
        Value::BigInt(i) => i.to_string(),
        other => other
            .to_json(&dualmodel_core::DumpOptions::default())
            .to_string(),
    }
}

fn convert_one(registry: &Registry, target: &str, value: Value) -> Value {
    if value
        .as_instance()
        .is_some_and(|inst| inst.is_instance_of(target))
    {
        return value;
    }
    match try_convert(registry, target, &value) {
        Ok(instance) => Value::Model(instance),
        Err(err) => {
            tracing::trace!(
                target_model = target,
                error = %err,
                "Keeping unconverted relationship value"
            );
            value
        }
    }
}

/// Re-validate `value` into `target`.
///
/// # Errors
///
/// The target is unknown, or the value does not validate into it.
pub(crate) fn try_convert(registry: &Registry, target: &str, value: &Value) -> Result<Instance> {
    let descriptor = registry
        .descriptor(target)
        .ok_or_else(|| Error::UnknownModel(target.to_string()))?;
    validate_model(registry, &descriptor, value.clone(), Keys::Aliases).map_err(Error::Validation)
}
