//! Field declarations.
//!
//! A [`FieldDecl`] carries everything a model author can say about one
//! attribute: validation metadata (default, aliases, constraints, docs) and
//! column-shaping options (primary key, nullability, foreign key, ...). Most
//! options are `Option`s so the builder can tell "not supplied" apart from
//! "supplied as false", which is what conflict detection needs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::types::SqlType;
use crate::value::Value;

/// Referential action for foreign key constraints (ON DELETE / ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    /// Raise an error if any references exist.
    #[default]
    NoAction,
    Restrict,
    /// Delete or update referencing rows along with the referenced one.
    Cascade,
    /// Set referencing columns to NULL.
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// SQL spelling of this action.
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for ReferentialAction {
    type Err = String;

    /// Case-insensitive; accepts spaces or underscores between words.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('_', " ").as_str() {
            "NO ACTION" | "NOACTION" => Ok(ReferentialAction::NoAction),
            "RESTRICT" => Ok(ReferentialAction::Restrict),
            "CASCADE" => Ok(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" => Ok(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" => Ok(ReferentialAction::SetDefault),
            other => Err(format!("unknown referential action `{other}`")),
        }
    }
}

/// Where a field's value comes from when the input omits it.
#[derive(Debug, Clone, Default)]
pub enum DefaultValue {
    /// The field must be supplied.
    #[default]
    Required,
    Value(Value),
    /// Called once per constructed instance.
    Factory(fn() -> Value),
}

impl DefaultValue {
    pub const fn is_required(&self) -> bool {
        matches!(self, DefaultValue::Required)
    }

    /// Produce the default, or `None` for required fields.
    pub fn produce(&self) -> Option<Value> {
        match self {
            DefaultValue::Required => None,
            DefaultValue::Value(v) => Some(v.clone()),
            DefaultValue::Factory(f) => Some(f()),
        }
    }
}

/// Validation constraints attached to a field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldConstraints {
    pub gt: Option<f64>,
    pub ge: Option<f64>,
    pub lt: Option<f64>,
    pub le: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    /// Total digits allowed in a decimal.
    pub max_digits: Option<u8>,
    /// Digits allowed after the decimal point.
    pub decimal_places: Option<u8>,
}

impl FieldConstraints {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A complete column supplied by the author instead of an inferred one.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnOverride {
    pub name: Option<String>,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
    pub index: bool,
    pub autoincrement: Option<bool>,
    pub foreign_key: Option<String>,
    pub on_delete: Option<ReferentialAction>,
    /// Server-side default expression.
    pub server_default: Option<String>,
    pub constraints: Vec<String>,
}

impl ColumnOverride {
    pub fn new(sql_type: SqlType) -> Self {
        Self {
            name: None,
            sql_type,
            primary_key: false,
            nullable: true,
            unique: false,
            index: false,
            autoincrement: None,
            foreign_key: None,
            on_delete: None,
            server_default: None,
            constraints: Vec::new(),
        }
    }

    /// Store under a different column name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = value;
        if value {
            self.nullable = false;
        }
        self
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    pub fn index(mut self, value: bool) -> Self {
        self.index = value;
        self
    }

    pub fn autoincrement(mut self, value: bool) -> Self {
        self.autoincrement = Some(value);
        self
    }

    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn server_default(mut self, expr: impl Into<String>) -> Self {
        self.server_default = Some(expr.into());
        self
    }

    pub fn constraint(mut self, expr: impl Into<String>) -> Self {
        self.constraints.push(expr.into());
        self
    }
}

/// Declaration of a single model field.
#[derive(Debug, Clone, Default)]
pub struct FieldDecl {
    pub default: DefaultValue,
    pub primary_key: Option<bool>,
    pub nullable: Option<bool>,
    pub index: Option<bool>,
    pub unique: Option<bool>,
    /// Foreign key target as `table.column`.
    pub foreign_key: Option<String>,
    pub on_delete: Option<ReferentialAction>,
    /// Explicit SQL type instead of the inferred one.
    pub sa_type: Option<SqlType>,
    /// Full column override; excludes every other column-shaping option.
    pub sa_column: Option<ColumnOverride>,
    /// Extra column clauses (e.g. CHECK expressions) appended in DDL.
    pub sa_column_args: Vec<String>,
    /// Column keyword options: `server_default`, `comment`, `name`, `autoincrement`.
    pub sa_column_kwargs: BTreeMap<String, serde_json::Value>,
    /// Passthrough arguments for the inferred column type (e.g. `length`).
    pub type_kwargs: BTreeMap<String, serde_json::Value>,
    /// Alias for both input and output.
    pub alias: Option<String>,
    /// Input-only alias; replaces `alias` when parsing.
    pub validation_alias: Option<String>,
    /// Output-only alias; replaces `alias` when dumping.
    pub serialization_alias: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub constraints: FieldConstraints,
    /// Never included in dumps.
    pub exclude: bool,
    /// Validated attribute with no column on table models.
    pub computed: bool,
    /// Extra JSON Schema properties merged into the field schema.
    pub schema_extra: Option<serde_json::Value>,
}

impl FieldDecl {
    pub fn new() -> Self {
        <Self as Default>::default()
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultValue::Value(value.into());
        self
    }

    pub fn default_factory(mut self, factory: fn() -> Value) -> Self {
        self.default = DefaultValue::Factory(factory);
        self
    }

    pub fn primary_key(mut self, value: bool) -> Self {
        self.primary_key = Some(value);
        self
    }

    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = Some(value);
        self
    }

    pub fn index(mut self, value: bool) -> Self {
        self.index = Some(value);
        self
    }

    pub fn unique(mut self, value: bool) -> Self {
        self.unique = Some(value);
        self
    }

    pub fn foreign_key(mut self, target: impl Into<String>) -> Self {
        self.foreign_key = Some(target.into());
        self
    }

    pub fn ondelete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn sa_type(mut self, sql_type: SqlType) -> Self {
        self.sa_type = Some(sql_type);
        self
    }

    pub fn sa_column(mut self, column: ColumnOverride) -> Self {
        self.sa_column = Some(column);
        self
    }

    pub fn sa_column_arg(mut self, clause: impl Into<String>) -> Self {
        self.sa_column_args.push(clause.into());
        self
    }

    pub fn sa_column_kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.sa_column_kwargs.insert(key.into(), value);
        self
    }

    pub fn type_kwarg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.type_kwargs.insert(key.into(), value);
        self
    }

    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.alias = Some(name.into());
        self
    }

    pub fn validation_alias(mut self, name: impl Into<String>) -> Self {
        self.validation_alias = Some(name.into());
        self
    }

    pub fn serialization_alias(mut self, name: impl Into<String>) -> Self {
        self.serialization_alias = Some(name.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn gt(mut self, bound: f64) -> Self {
        self.constraints.gt = Some(bound);
        self
    }

    pub fn ge(mut self, bound: f64) -> Self {
        self.constraints.ge = Some(bound);
        self
    }

    pub fn lt(mut self, bound: f64) -> Self {
        self.constraints.lt = Some(bound);
        self
    }

    pub fn le(mut self, bound: f64) -> Self {
        self.constraints.le = Some(bound);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.constraints.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.constraints.max_length = Some(len);
        self
    }

    pub fn pattern(mut self, regex: impl Into<String>) -> Self {
        self.constraints.pattern = Some(regex.into());
        self
    }

    pub fn max_digits(mut self, digits: u8) -> Self {
        self.constraints.max_digits = Some(digits);
        self
    }

    pub fn decimal_places(mut self, places: u8) -> Self {
        self.constraints.decimal_places = Some(places);
        self
    }

    pub fn exclude(mut self, value: bool) -> Self {
        self.exclude = value;
        self
    }

    pub fn computed(mut self, value: bool) -> Self {
        self.computed = value;
        self
    }

    pub fn schema_extra(mut self, extra: serde_json::Value) -> Self {
        self.schema_extra = Some(extra);
        self
    }

    /// True if any alias of any kind was declared on this field.
    pub fn has_explicit_alias(&self) -> bool {
        self.alias.is_some()
            || self.validation_alias.is_some()
            || self.serialization_alias.is_some()
    }

    /// True if the declaration asks for column-level treatment explicitly.
    pub fn has_column_declaration(&self) -> bool {
        self.sa_column.is_some()
            || !self.sa_column_args.is_empty()
            || !self.sa_column_kwargs.is_empty()
    }

    /// Options that cannot be combined with `sa_column`.
    ///
    /// Empty when there is no column override or nothing clashes with it.
    pub fn conflicting_options(&self) -> Vec<&'static str> {
        if self.sa_column.is_none() {
            return Vec::new();
        }
        let mut clashes = Vec::new();
        if self.sa_type.is_some() {
            clashes.push("sa_type");
        }
        if self.nullable.is_some() {
            clashes.push("nullable");
        }
        if self.primary_key.is_some() {
            clashes.push("primary_key");
        }
        if self.foreign_key.is_some() {
            clashes.push("foreign_key");
        }
        if self.index.is_some() {
            clashes.push("index");
        }
        if self.unique.is_some() {
            clashes.push("unique");
        }
        if self.on_delete.is_some() {
            clashes.push("ondelete");
        }
        if !self.sa_column_args.is_empty() {
            clashes.push("sa_column_args");
        }
        if !self.sa_column_kwargs.is_empty() {
            clashes.push("sa_column_kwargs");
        }
        clashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referential_action_parse() {
        assert_eq!(
            "set null".parse::<ReferentialAction>(),
            Ok(ReferentialAction::SetNull)
        );
        assert_eq!(
            "SET_DEFAULT".parse::<ReferentialAction>(),
            Ok(ReferentialAction::SetDefault)
        );
        assert_eq!(ReferentialAction::Cascade.as_sql(), "CASCADE");
        assert!("explode".parse::<ReferentialAction>().is_err());
    }

    #[test]
    fn test_no_conflicts_without_override() {
        let decl = FieldDecl::new().primary_key(true).index(true);
        assert!(decl.conflicting_options().is_empty());
    }

    #[test]
    fn test_conflicts_are_reported_in_declaration_order() {
        let decl = FieldDecl::new()
            .sa_column(ColumnOverride::new(SqlType::Text))
            .unique(false)
            .primary_key(true)
            .ondelete(ReferentialAction::Cascade);
        assert_eq!(
            decl.conflicting_options(),
            vec!["primary_key", "unique", "ondelete"]
        );
    }

    #[test]
    fn test_default_factory_runs_each_time() {
        fn zero() -> Value {
            Value::BigInt(0)
        }
        let decl = FieldDecl::new().default_factory(zero);
        assert_eq!(decl.default.produce(), Some(Value::BigInt(0)));
        assert!(FieldDecl::new().default.is_required());
    }

    #[test]
    fn test_column_override_primary_key_is_not_null() {
        let col = ColumnOverride::new(SqlType::Integer).primary_key(true);
        assert!(!col.nullable);
    }
}
