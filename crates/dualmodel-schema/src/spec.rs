//! Model specs: the input to the build step.
//!
//! A [`ModelSpec`] lists a model's fields in declaration order together with
//! its configuration. Handing it to [`Registry::define`] checks everything
//! that can be checked in isolation; [`Registry::configure`] builds the
//! immutable descriptor once every referenced model is known.
//!
//! [`Registry::define`]: crate::Registry::define
//! [`Registry::configure`]: crate::Registry::configure

use dualmodel_core::{FieldDecl, ModelConfig, RelationshipDecl, TypeRef};

/// What a field was declared with.
#[derive(Debug, Clone)]
pub enum Declaration {
    /// A value field (plain or column-backed, decided by classification).
    Field(FieldDecl),
    /// An explicit relationship.
    Relationship(RelationshipDecl),
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub ty: TypeRef,
    pub declaration: Declaration,
}

impl FieldSpec {
    pub fn decl(&self) -> Option<&FieldDecl> {
        match &self.declaration {
            Declaration::Field(d) => Some(d),
            Declaration::Relationship(_) => None,
        }
    }

    pub fn relationship_decl(&self) -> Option<&RelationshipDecl> {
        match &self.declaration {
            Declaration::Relationship(r) => Some(r),
            Declaration::Field(_) => None,
        }
    }
}

/// A model definition before it is built.
///
/// # Example
///
/// ```ignore
/// let hero = ModelSpec::table("Hero")
///     .field(
///         "id",
///         TypeRef::optional(TypeRef::Int),
///         FieldDecl::new().default(Value::Null).primary_key(true),
///     )
///     .field("name", TypeRef::Text, FieldDecl::new())
///     .relationship(
///         "team",
///         TypeRef::optional(TypeRef::named("Team")),
///         RelationshipDecl::new().back_populates("heroes"),
///     );
/// ```
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub config: ModelConfig,
    pub fields: Vec<FieldSpec>,
}

impl ModelSpec {
    /// A validation-only model.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ModelConfig::plain(),
            fields: Vec::new(),
        }
    }

    /// A table-backed model.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ModelConfig::table(),
            fields: Vec::new(),
        }
    }

    /// Replace the configuration, keeping the table flag given at creation
    /// unless `config` sets it.
    #[must_use]
    pub fn config(mut self, config: ModelConfig) -> Self {
        let table = self.config.table || config.table;
        self.config = config;
        self.config.table = table;
        self
    }

    /// Copy every field of `base`.
    ///
    /// Call before declaring the model's own fields. A later declaration of
    /// the same name replaces the inherited one in its original position.
    #[must_use]
    pub fn inherit(mut self, base: &ModelSpec) -> Self {
        for field in &base.fields {
            self.push(field.clone());
        }
        self
    }

    /// Declare a value field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, ty: TypeRef, decl: FieldDecl) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            ty,
            declaration: Declaration::Field(decl),
        });
        self
    }

    /// Declare a relationship field.
    #[must_use]
    pub fn relationship(
        mut self,
        name: impl Into<String>,
        ty: TypeRef,
        decl: RelationshipDecl,
    ) -> Self {
        self.push(FieldSpec {
            name: name.into(),
            ty,
            declaration: Declaration::Relationship(decl),
        });
        self
    }

    fn push(&mut self, field: FieldSpec) {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    pub fn is_table(&self) -> bool {
        self.config.table
    }

    /// Table name: the configured one, else the lower-cased model name.
    pub fn table_name(&self) -> Option<String> {
        if !self.config.table {
            return None;
        }
        Some(
            self.config
                .table_name
                .clone()
                .unwrap_or_else(|| self.name.to_lowercase()),
        )
    }
}

/// Implemented by `#[derive(Model)]`.
pub trait ModelDef {
    /// The declaration of this type's model.
    fn model_spec() -> ModelSpec;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_defaults_to_lowercase() {
        assert_eq!(ModelSpec::table("Hero").table_name().as_deref(), Some("hero"));
        let named = ModelSpec::table("Hero").config(ModelConfig::plain().table_name("heroes"));
        assert!(named.is_table());
        assert_eq!(named.table_name().as_deref(), Some("heroes"));
        assert!(ModelSpec::plain("HeroCreate").table_name().is_none());
    }

    #[test]
    fn test_inherit_keeps_position_on_override() {
        let base = ModelSpec::plain("HeroBase")
            .field("name", TypeRef::Text, FieldDecl::new())
            .field("age", TypeRef::optional(TypeRef::Int), FieldDecl::new());
        let hero = ModelSpec::table("Hero")
            .inherit(&base)
            .field("id", TypeRef::Int, FieldDecl::new().primary_key(true))
            .field("name", TypeRef::Text, FieldDecl::new().index(true));

        let names: Vec<_> = hero.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "age", "id"]);
        assert_eq!(hero.fields[0].decl().unwrap().index, Some(true));
    }
}
