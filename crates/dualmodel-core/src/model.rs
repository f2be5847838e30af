//! Model configuration and built model descriptors.
//!
//! A [`ModelDescriptor`] is the immutable result of building a model spec:
//! every field with its declaration, its resolved [`FieldKind`] (plain,
//! column or relationship), and its input/output names after alias rules
//! were applied. Descriptors are shared behind `Arc` by instances.

use std::fmt;

use crate::field::{FieldDecl, ReferentialAction};
use crate::relationship::RelationshipInfo;
use crate::types::{SqlType, TypeRef};

/// What to do with input keys that match no field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtraFieldsBehavior {
    /// Drop unknown keys silently.
    #[default]
    Ignore,
    /// Report unknown keys as validation errors.
    Forbid,
    /// Keep unknown keys in the instance's extra map.
    Allow,
}

/// Class-wide alias generation for fields without an explicit alias.
#[derive(Clone, Copy)]
pub enum AliasGenerator {
    /// `secret_name` -> `secretName`
    CamelCase,
    /// `secret_name` -> `SecretName`
    PascalCase,
    /// `secretName` -> `secret_name`
    SnakeCase,
    Custom(fn(&str) -> String),
}

impl AliasGenerator {
    pub fn apply(&self, name: &str) -> String {
        match self {
            AliasGenerator::CamelCase => {
                let pascal = to_pascal(name);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
            AliasGenerator::PascalCase => to_pascal(name),
            AliasGenerator::SnakeCase => to_snake(name),
            AliasGenerator::Custom(f) => f(name),
        }
    }
}

impl fmt::Debug for AliasGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AliasGenerator::CamelCase => f.write_str("CamelCase"),
            AliasGenerator::PascalCase => f.write_str("PascalCase"),
            AliasGenerator::SnakeCase => f.write_str("SnakeCase"),
            AliasGenerator::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn to_pascal(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

fn to_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Per-model configuration.
#[derive(Debug, Clone, Default)]
pub struct ModelConfig {
    /// Build a table-backed model instead of a plain one.
    pub table: bool,
    /// Table name; defaults to the lower-cased model name.
    pub table_name: Option<String>,
    /// Replace an already registered table of the same name.
    pub extend_existing: bool,
    /// Extra table-level clauses (e.g. `UNIQUE (a, b)`, `CHECK (...)`).
    pub table_args: Vec<String>,
    pub alias_generator: Option<AliasGenerator>,
    /// Accept field names in input even when an alias is declared.
    pub populate_by_name: bool,
    pub extra: ExtraFieldsBehavior,
    /// Disable lax coercion (e.g. numeric strings into integers).
    pub strict: bool,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl ModelConfig {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn table() -> Self {
        Self {
            table: true,
            ..Self::default()
        }
    }

    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn extend_existing(mut self, value: bool) -> Self {
        self.extend_existing = value;
        self
    }

    pub fn table_arg(mut self, clause: impl Into<String>) -> Self {
        self.table_args.push(clause.into());
        self
    }

    pub fn alias_generator(mut self, generator: AliasGenerator) -> Self {
        self.alias_generator = Some(generator);
        self
    }

    pub fn populate_by_name(mut self, value: bool) -> Self {
        self.populate_by_name = value;
        self
    }

    pub fn extra(mut self, behavior: ExtraFieldsBehavior) -> Self {
        self.extra = behavior;
        self
    }

    pub fn strict(mut self, value: bool) -> Self {
        self.strict = value;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// A `table.column` foreign key target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRef {
    pub table: String,
    pub column: String,
}

impl ForeignKeyRef {
    /// Parse `table.column`; the last dot separates the column.
    pub fn parse(target: &str) -> Option<Self> {
        let (table, column) = target.rsplit_once('.')?;
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

impl fmt::Display for ForeignKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// How a column's values are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnStorage {
    /// One scalar value per row.
    Scalar,
    /// The value is serialized to JSON text.
    Json,
}

/// A synthesized table column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub unique: bool,
    pub index: bool,
    pub foreign_key: Option<ForeignKeyRef>,
    pub on_delete: Option<ReferentialAction>,
    pub server_default: Option<String>,
    pub comment: Option<String>,
    /// Extra column clauses emitted verbatim.
    pub constraints: Vec<String>,
    pub storage: ColumnStorage,
}

/// What backs a field on a built model.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Validated only; no column.
    Plain,
    Column(ColumnDescriptor),
    Relationship(RelationshipInfo),
}

/// One field of a built model.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub ty: TypeRef,
    pub decl: FieldDecl,
    pub kind: FieldKind,
    /// Keys accepted in validation input, in lookup order.
    pub input_names: Vec<String>,
    /// Key used in dumps with `by_alias`.
    pub output_name: String,
}

impl FieldDescriptor {
    pub fn is_required(&self) -> bool {
        self.decl.default.is_required()
    }

    pub fn column(&self) -> Option<&ColumnDescriptor> {
        match &self.kind {
            FieldKind::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn relationship(&self) -> Option<&RelationshipInfo> {
        match &self.kind {
            FieldKind::Relationship(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_relationship(&self) -> bool {
        matches!(self.kind, FieldKind::Relationship(_))
    }
}

/// The immutable result of building one model.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: String,
    pub config: ModelConfig,
    /// Registered table name; `None` for plain models.
    pub table_name: Option<String>,
    pub fields: Vec<FieldDescriptor>,
}

impl ModelDescriptor {
    pub fn is_table(&self) -> bool {
        self.table_name.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Column-backed fields with their columns, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = (&FieldDescriptor, &ColumnDescriptor)> {
        self.fields
            .iter()
            .filter_map(|f| f.column().map(|c| (f, c)))
    }

    pub fn relationships(&self) -> impl Iterator<Item = (&FieldDescriptor, &RelationshipInfo)> {
        self.fields
            .iter()
            .filter_map(|f| f.relationship().map(|r| (f, r)))
    }

    /// Field backing the column named `column`.
    pub fn field_for_column(&self, column: &str) -> Option<&FieldDescriptor> {
        self.columns().find(|(_, c)| c.name == column).map(|(f, _)| f)
    }

    pub fn primary_key_fields(&self) -> Vec<&FieldDescriptor> {
        self.columns()
            .filter(|(_, c)| c.primary_key)
            .map(|(f, _)| f)
            .collect()
    }
}
