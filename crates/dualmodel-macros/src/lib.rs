//! Procedural macros for dualmodel.
//!
//! `#[derive(Model)]` implements `dualmodel::ModelDef` for a struct, so the
//! struct can be registered with `Registry::define_model::<T>()`.
//!
//! # Attributes
//!
//! On the struct:
//!
//! ```ignore
//! #[derive(Model)]
//! #[dualmodel(table, table_name = "heroes", extra = "forbid", alias_generator = "camel")]
//! struct Hero { /* ... */ }
//! ```
//!
//! `table`, `table_name`, `extend_existing`, `table_arg = "<clause>"`,
//! `populate_by_name`, `strict`, `description`, `extra`, `alias_generator`
//! (`"camel"`, `"pascal"`, `"snake"` or a `fn(&str) -> String` path) and
//! `inherit = BaseModel`.
//!
//! On fields:
//!
//! ```ignore
//! #[dualmodel(primary_key, default)]
//! id: Option<i64>,
//! #[dualmodel(index, max_length = 50)]
//! name: String,
//! #[dualmodel(foreign_key = "team.id", ondelete = "SET NULL", default)]
//! team_id: Option<i64>,
//! #[dualmodel(relationship(back_populates = "heroes"))]
//! team: Option<Team>,
//! ```
//!
//! A bare `default` means a `None` default. Field types map to `TypeRef`s;
//! any other single-identifier type is a reference to the model of that
//! name. `type_ref = <expr>` overrides the mapping and `skip` leaves a field
//! out of the model.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod model_derive;

/// Derive macro for the `ModelDef` trait.
#[proc_macro_derive(Model, attributes(dualmodel))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let def = match model_derive::parse_model(&input) {
        Ok(def) => def,
        Err(err) => return err.to_compile_error().into(),
    };

    model_derive::generate_model_def_impl(&def).into()
}
