//! Model handles: the validation entry points of a configured model.

use std::sync::Arc;

use dualmodel_core::{
    DumpOptions, Error, FieldDescriptor, Instance, ModelDescriptor, Result, ValidationError,
    Value,
};

use crate::json_schema;
use crate::registry::Registry;
use crate::validator::{self, Keys};

/// A configured model, borrowed from its registry.
#[derive(Clone)]
pub struct Model<'r> {
    registry: &'r Registry,
    descriptor: Arc<ModelDescriptor>,
}

impl std::fmt::Debug for Model<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.descriptor.name)
            .field("table", &self.descriptor.table_name)
            .finish()
    }
}

impl<'r> Model<'r> {
    pub(crate) fn new(registry: &'r Registry, descriptor: Arc<ModelDescriptor>) -> Self {
        Self {
            registry,
            descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.descriptor
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    pub fn is_table(&self) -> bool {
        self.descriptor.is_table()
    }

    pub fn table_name(&self) -> Option<&str> {
        self.descriptor.table_name.as_deref()
    }

    /// Declared fields with their metadata, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.descriptor.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.descriptor.field(name)
    }

    /// Build an instance from `(field name, value)` pairs.
    ///
    /// Keys are field names, never aliases. Values are validated the same
    /// way [`validate`](Self::validate) does.
    pub fn construct<I, K, V>(&self, pairs: I) -> Result<Instance>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        validator::validate_model(self.registry, &self.descriptor, Value::Object(map), Keys::Names)
            .map_err(Error::Validation)
    }

    /// Validate a mapping or another instance into this model.
    ///
    /// Mapping keys follow the input alias rules. An instance of this model
    /// is returned unchanged (same object); an instance of another model is
    /// read by field name.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] with every failed check.
    pub fn validate(&self, input: impl Into<Value>) -> Result<Instance> {
        validator::validate_model(self.registry, &self.descriptor, input.into(), Keys::Aliases)
            .map_err(Error::Validation)
    }

    /// Validate a JSON document.
    pub fn validate_json(&self, json: &str) -> Result<Instance> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        self.validate(Value::from_json(parsed))
    }

    /// Validated assignment of one field.
    ///
    /// Relationship fields convert instances of other models into the target
    /// model when possible and otherwise keep the value as given.
    pub fn assign(&self, instance: &Instance, field: &str, value: impl Into<Value>) -> Result<()> {
        if !instance.is_instance_of(self.name()) {
            return Err(Error::Custom(format!(
                "cannot assign {}.{field} on an instance of {}",
                self.name(),
                instance.model_name()
            )));
        }
        let descriptor = self.descriptor.field(field).ok_or_else(|| {
            Error::Custom(format!("{} has no field `{field}`", self.name()))
        })?;
        let mut errors = ValidationError::new().for_model(self.name());
        let loc = vec![field.to_string()];
        let value = validator::validate_field(
            self.registry,
            descriptor,
            value.into(),
            &loc,
            self.descriptor.config.strict,
            &mut errors,
        );
        match value {
            Some(value) if errors.is_empty() => instance.set_unchecked(field, value),
            _ => Err(Error::Validation(errors)),
        }
    }

    /// Re-validate `value` into the model named `target`, reporting why it
    /// failed instead of keeping the original.
    pub fn convert(&self, target: &str, value: &Value) -> Result<Instance> {
        validator::try_convert(self.registry, target, value)
    }

    pub fn dump(&self, instance: &Instance, options: &DumpOptions) -> serde_json::Value {
        instance.dump(options)
    }

    pub fn dump_json(&self, instance: &Instance, options: &DumpOptions) -> Result<String> {
        Ok(serde_json::to_string(&instance.dump(options))?)
    }

    /// JSON Schema of this model's validation shape.
    pub fn json_schema(&self) -> serde_json::Value {
        json_schema::model_schema(self.registry, &self.descriptor)
    }
}
