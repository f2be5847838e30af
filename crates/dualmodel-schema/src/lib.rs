//! Model builder, registry and DDL generation for dualmodel.
//!
//! `dualmodel-schema` turns [`ModelSpec`] declarations into configured models.
//!
//! # Role In The Architecture
//!
//! - **Declaration**: [`ModelSpec`] / [`FieldSpec`] describe one model; the
//!   `Model` derive in `dualmodel-macros` produces them through [`ModelDef`].
//! - **Building**: [`Registry`] checks, classifies and publishes descriptors,
//!   resolving forward references between models.
//! - **Validation**: [`Model`] validates mappings, JSON and other instances,
//!   and performs validated assignment and cross-model conversion.
//! - **DDL**: [`ddl`] renders `CREATE TABLE` statements for configured tables.

pub mod classify;
pub mod ddl;
pub mod json_schema;
pub mod model;
pub mod registry;
pub mod spec;
mod validator;

pub use classify::{Resolved, TypeClass};
pub use ddl::{DdlGenerator, SqliteDdlGenerator, create_all, drop_all, quote_identifier};
pub use model::Model;
pub use registry::Registry;
pub use spec::{Declaration, FieldSpec, ModelDef, ModelSpec};
pub use validator::mapping_key;
