//! Model instances.
//!
//! An [`Instance`] is a shared handle (`Arc<RwLock<..>>`) to one object's
//! field values, so relationship values, sessions and callers all observe the
//! same object, the way ORM-mapped objects behave. Cloning the handle does
//! not copy the object.
//!
//! Equality follows persistence identity: once an instance has been
//! synchronized with storage it carries an [`IdentityKey`] (table + primary
//! key) and two instances with the same key compare equal even when they
//! are different objects. Before that, only the same object equals itself.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::fields_set::FieldsSet;
use crate::model::ModelDescriptor;
use crate::validate::DumpOptions;
use crate::value::Value;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Persistence identity of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityKey {
    pub table: String,
    pub primary_key: Vec<Value>,
}

struct InstanceState {
    model: Arc<ModelDescriptor>,
    values: Vec<Value>,
    fields_set: FieldsSet,
    /// Keys kept under `ExtraFieldsBehavior::Allow`.
    extra: BTreeMap<String, Value>,
    identity: Option<IdentityKey>,
}

/// A shared handle to one model object.
#[derive(Clone)]
pub struct Instance {
    object_id: u64,
    inner: Arc<RwLock<InstanceState>>,
}

impl Instance {
    /// Assemble an instance from already validated values.
    ///
    /// `values` must hold one entry per field of `model`, in field order.
    /// Use the model-level `construct`/`validate` entry points for input that
    /// still needs validation.
    pub fn from_validated(
        model: Arc<ModelDescriptor>,
        values: Vec<Value>,
        fields_set: FieldsSet,
        extra: BTreeMap<String, Value>,
    ) -> Result<Self> {
        if values.len() != model.fields.len() {
            return Err(Error::Custom(format!(
                "{} expects {} values, got {}",
                model.name,
                model.fields.len(),
                values.len()
            )));
        }
        Ok(Self {
            object_id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(RwLock::new(InstanceState {
                model,
                values,
                fields_set,
                extra,
                identity: None,
            })),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, InstanceState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InstanceState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process-unique id of the underlying object.
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// True if both handles point at the same object.
    pub fn is_same_object(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn model(&self) -> Arc<ModelDescriptor> {
        Arc::clone(&self.read().model)
    }

    pub fn model_name(&self) -> String {
        self.read().model.name.clone()
    }

    /// True if this instance belongs to the model named `name`.
    pub fn is_instance_of(&self, name: &str) -> bool {
        self.read().model.name == name
    }

    /// Current value of `field`, or `None` if the model has no such field.
    pub fn get(&self, field: &str) -> Option<Value> {
        let state = self.read();
        let idx = state.model.field_index(field)?;
        state.values.get(idx).cloned()
    }

    /// Value of a key kept under `ExtraFieldsBehavior::Allow`.
    pub fn get_extra(&self, key: &str) -> Option<Value> {
        self.read().extra.get(key).cloned()
    }

    /// All keys kept under `ExtraFieldsBehavior::Allow`.
    pub fn extra(&self) -> BTreeMap<String, Value> {
        self.read().extra.clone()
    }

    /// Store `value` without validation and mark the field as set.
    ///
    /// Storage and relationship bookkeeping use this; callers assigning user
    /// input should go through the model's validated assignment instead.
    pub fn set_unchecked(&self, field: &str, value: Value) -> Result<()> {
        let mut state = self.write();
        let idx = state
            .model
            .field_index(field)
            .ok_or_else(|| Error::Custom(format!("{} has no field `{field}`", state.model.name)))?;
        state.values[idx] = value;
        state.fields_set.set(idx);
        Ok(())
    }

    /// `(field name, value)` pairs in declaration order.
    pub fn values(&self) -> Vec<(String, Value)> {
        let state = self.read();
        state
            .model
            .fields
            .iter()
            .zip(state.values.iter())
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect()
    }

    /// Whether `field` was explicitly provided.
    pub fn is_set(&self, field: &str) -> bool {
        let state = self.read();
        state
            .model
            .field_index(field)
            .is_some_and(|idx| state.fields_set.is_set(idx))
    }

    /// Names of explicitly provided fields.
    pub fn fields_set(&self) -> Vec<String> {
        let state = self.read();
        state
            .fields_set
            .iter()
            .filter_map(|idx| state.model.fields.get(idx).map(|f| f.name.clone()))
            .collect()
    }

    pub fn identity(&self) -> Option<IdentityKey> {
        self.read().identity.clone()
    }

    /// Record (or clear) the persistence identity.
    pub fn set_identity(&self, identity: Option<IdentityKey>) {
        self.write().identity = identity;
    }

    /// Primary key values in key order; empty for plain models.
    pub fn primary_key_values(&self) -> Vec<Value> {
        let state = self.read();
        state
            .model
            .primary_key_fields()
            .iter()
            .filter_map(|f| state.model.field_index(&f.name))
            .map(|idx| state.values[idx].clone())
            .collect()
    }

    /// Serialize to a JSON object. Relationship fields are never included.
    pub fn dump(&self, options: &DumpOptions) -> serde_json::Value {
        let state = self.read();
        let mut out = serde_json::Map::new();
        for (idx, field) in state.model.fields.iter().enumerate() {
            if field.is_relationship() || field.decl.exclude {
                continue;
            }
            if !options.includes(&field.name) {
                continue;
            }
            if options.exclude_unset && !state.fields_set.is_set(idx) {
                continue;
            }
            let value = &state.values[idx];
            if options.exclude_none && value.is_null() {
                continue;
            }
            if options.exclude_defaults {
                if let crate::field::DefaultValue::Value(default) = &field.decl.default {
                    if default == value {
                        continue;
                    }
                }
            }
            let key = if options.by_alias {
                field.output_name.clone()
            } else {
                field.name.clone()
            };
            out.insert(key, value.to_json(options));
        }
        for (key, value) in &state.extra {
            if options.includes(key) {
                out.insert(key.clone(), value.to_json(options));
            }
        }
        serde_json::Value::Object(out)
    }
}

/// Serializes like `dump` with default options.
impl Serialize for Instance {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.dump(&DumpOptions::default()).serialize(serializer)
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        if self.is_same_object(other) {
            return true;
        }
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read();
        let mut s = f.debug_struct(&state.model.name);
        s.field("object_id", &self.object_id);
        if let Some(identity) = &state.identity {
            s.field("identity", &identity.primary_key);
        }
        // Relationship values may point back at this object.
        for (field, value) in state.model.fields.iter().zip(state.values.iter()) {
            if !field.is_relationship() {
                s.field(&field.name, value);
            }
        }
        s.finish()
    }
}
