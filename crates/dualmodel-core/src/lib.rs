//! Core types for dualmodel.
//!
//! `dualmodel-core` is the **foundation layer** for the workspace. It defines the
//! data types every other crate builds on.
//!
//! # Role In The Architecture
//!
//! - **Declarations**: `FieldDecl`, `ColumnOverride` and `RelationshipDecl` are what
//!   model authors write.
//! - **Built models**: `ModelDescriptor` with its `FieldDescriptor`s, `ColumnDescriptor`s
//!   and `RelationshipInfo`s is the immutable result of configuring a registry.
//! - **Data model**: `Value`, `TypeRef` and `SqlType` describe inputs, declared field
//!   types and storage types; `Instance` is a shared handle to one model object.
//! - **Validation primitives**: scalar coercion, constraint checks, the regex cache and
//!   `ValidationError`.
//!
//! # Who Uses This Crate
//!
//! - `dualmodel-schema` classifies declarations into descriptors and validates input.
//! - `dualmodel-session` stores instances and hydrates relationships.
//! - `dualmodel-macros` generates model specs whose pieces are defined here.
//!
//! Most applications should use the `dualmodel` facade.

pub mod decimal;
pub mod error;
pub mod field;
pub mod fields_set;
pub mod instance;
pub mod model;
pub mod relationship;
pub mod temporal;
pub mod types;
pub mod validate;
pub mod value;

pub use error::{Error, FieldValidationError, Result, ValidationError, ValidationErrorKind};
pub use field::{ColumnOverride, DefaultValue, FieldConstraints, FieldDecl, ReferentialAction};
pub use fields_set::FieldsSet;
pub use instance::{IdentityKey, Instance};
pub use model::{
    AliasGenerator, ColumnDescriptor, ColumnStorage, ExtraFieldsBehavior, FieldDescriptor,
    FieldKind, ForeignKeyRef, ModelConfig, ModelDescriptor,
};
pub use relationship::{
    CollectionKind, LinkTableInfo, PassiveDeletes, RelationshipDecl, RelationshipInfo,
    RelationshipKind,
};
pub use types::{EnumType, SqlType, TypeRef};
pub use validate::{DumpOptions, check_constraints, coerce_scalar, matches_pattern};
pub use value::Value;
