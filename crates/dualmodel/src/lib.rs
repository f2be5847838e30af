//! One declaration for validated data models and mapped SQL tables.
//!
//! `dualmodel` is the facade crate: it re-exports the core types, the model
//! builder, the session and the `#[derive(Model)]` macro.
//!
//! A model declared once is both a validation schema (construct, validate,
//! dump, JSON Schema) and, when marked as a table, a table definition with
//! columns, foreign keys and relationships.
//!
//! # Example
//!
//! ```ignore
//! use dualmodel::prelude::*;
//!
//! #[derive(Model)]
//! #[dualmodel(table)]
//! struct Hero {
//!     #[dualmodel(primary_key, default)]
//!     id: Option<i64>,
//!     name: String,
//!     secret_name: String,
//!     #[dualmodel(default)]
//!     age: Option<i64>,
//! }
//!
//! let mut registry = Registry::new();
//! registry.define_model::<Hero>()?;
//! registry.configure()?;
//!
//! let engine = Engine::memory();
//! engine.create_all(&registry)?;
//!
//! let hero = registry.model("Hero")?.construct([
//!     ("name", "Deadpond"),
//!     ("secret_name", "Dive Wilson"),
//! ])?;
//! let mut session = Session::new(&engine, &registry);
//! session.add(&hero)?;
//! session.commit()?;
//! assert_eq!(hero.get("id"), Some(Value::BigInt(1)));
//! ```

pub mod session;

pub use dualmodel_core::{
    AliasGenerator, CollectionKind, ColumnDescriptor, ColumnOverride, ColumnStorage,
    DefaultValue, DumpOptions, EnumType, Error, ExtraFieldsBehavior, FieldConstraints, FieldDecl,
    FieldDescriptor, FieldKind, FieldValidationError, ForeignKeyRef, IdentityKey, Instance,
    LinkTableInfo, ModelConfig, ModelDescriptor, PassiveDeletes, ReferentialAction,
    RelationshipDecl, RelationshipInfo, RelationshipKind, Result, SqlType, TypeRef,
    ValidationError, ValidationErrorKind, Value,
};
pub use dualmodel_macros::Model;
pub use dualmodel_schema::{
    DdlGenerator, Model, ModelDef, ModelSpec, Registry, SqliteDdlGenerator, create_all, drop_all,
};
pub use session::{Engine, ObjectState, Session, SessionConfig, SessionDebugInfo};

/// Everything needed to declare, validate and persist models.
pub mod prelude {
    pub use crate::{
        DumpOptions, Engine, Error, ExtraFieldsBehavior, FieldDecl, Instance, Model, ModelConfig,
        ModelDef, ModelSpec, ObjectState, PassiveDeletes, ReferentialAction, Registry,
        RelationshipDecl, Result, Session, SessionConfig, SqlType, TypeRef, Value,
    };
}
