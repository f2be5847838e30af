//! Runtime validation helpers.
//!
//! Scalar coercion, field constraint checks and dump options. The model
//! validator in `dualmodel-schema` walks declared types and calls into these
//! for every leaf value.

use std::collections::{BTreeSet, HashMap};
use std::sync::{OnceLock, PoisonError, RwLock};

use regex::Regex;
use uuid::Uuid;

use crate::decimal;
use crate::error::{ValidationError, ValidationErrorKind};
use crate::field::FieldConstraints;
use crate::temporal;
use crate::types::TypeRef;
use crate::value::Value;

/// Thread-safe regex cache for compiled patterns.
///
/// Patterns are compiled lazily on first use and cached for the lifetime
/// of the program.
struct RegexCache {
    cache: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> Result<Regex, regex::Error> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Check if a string matches a regex pattern.
///
/// Returns `false` if the pattern is invalid (logs a warning).
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern in validation, treating as non-match"
            );
            false
        }
    }
}

/// Validate a regex pattern ahead of use (model build, derive expansion).
///
/// Returns an error message if the pattern is invalid, None if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    match Regex::new(pattern) {
        Ok(_) => None,
        Err(e) => Some(format!("invalid regex pattern: {e}")),
    }
}

/// Options controlling `dump`.
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Emit output aliases instead of field names.
    pub by_alias: bool,
    /// Skip fields that were never explicitly provided.
    pub exclude_unset: bool,
    /// Skip fields still equal to their static default.
    pub exclude_defaults: bool,
    /// Skip null values.
    pub exclude_none: bool,
    /// Only these top-level fields, when given.
    pub include: Option<BTreeSet<String>>,
    pub exclude: BTreeSet<String>,
}

impl DumpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_alias(mut self) -> Self {
        self.by_alias = true;
        self
    }

    pub fn exclude_unset(mut self) -> Self {
        self.exclude_unset = true;
        self
    }

    pub fn exclude_defaults(mut self) -> Self {
        self.exclude_defaults = true;
        self
    }

    pub fn exclude_none(mut self) -> Self {
        self.exclude_none = true;
        self
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Whether a top-level field passes the include/exclude filters.
    pub fn includes(&self, field: &str) -> bool {
        if self.exclude.contains(field) {
            return false;
        }
        self.include.as_ref().is_none_or(|set| set.contains(field))
    }

    /// Options for nested values: include/exclude only apply at the top.
    pub fn nested(&self) -> Self {
        Self {
            include: None,
            exclude: BTreeSet::new(),
            ..self.clone()
        }
    }
}

/// Coerce `value` into the scalar type `ty`.
///
/// Lax mode accepts the usual loose inputs (numeric strings, integral
/// floats, `"yes"`/`"no"` booleans, ISO text for temporal types). On failure
/// the error is the expected type's name, for use in a type error message.
pub fn coerce_scalar(ty: &TypeRef, value: Value, strict: bool) -> Result<Value, String> {
    let expected = || ty.to_string();
    match (ty, value) {
        (TypeRef::Int, Value::BigInt(i)) => Ok(Value::BigInt(i)),
        (TypeRef::Int, Value::Bool(b)) if !strict => Ok(Value::BigInt(i64::from(b))),
        #[allow(clippy::cast_possible_truncation)]
        (TypeRef::Int, Value::Double(f)) if !strict && f.fract() == 0.0 && f.is_finite() => {
            Ok(Value::BigInt(f as i64))
        }
        (TypeRef::Int, Value::Text(s)) if !strict => {
            s.trim().parse::<i64>().map(Value::BigInt).map_err(|_| expected())
        }
        (TypeRef::Int, Value::Decimal(s)) if !strict => decimal::parse(&s)
            .and_then(|d| decimal::to_i64(&d))
            .map(Value::BigInt)
            .ok_or_else(expected),

        (TypeRef::Float, Value::Double(f)) => Ok(Value::Double(f)),
        #[allow(clippy::cast_precision_loss)]
        (TypeRef::Float, Value::BigInt(i)) => Ok(Value::Double(i as f64)),
        (TypeRef::Float, Value::Text(s) | Value::Decimal(s)) if !strict => {
            s.trim().parse::<f64>().map(Value::Double).map_err(|_| expected())
        }

        (TypeRef::Text, Value::Text(s)) => Ok(Value::Text(s)),

        (TypeRef::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
        (TypeRef::Bool, Value::BigInt(i)) if !strict && (i == 0 || i == 1) => {
            Ok(Value::Bool(i == 1))
        }
        (TypeRef::Bool, Value::Text(s)) if !strict => {
            match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" | "t" | "y" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "off" | "f" | "n" => Ok(Value::Bool(false)),
                _ => Err(expected()),
            }
        }

        (TypeRef::Decimal, Value::Decimal(s)) => Ok(Value::Decimal(s)),
        (TypeRef::Decimal, Value::BigInt(i)) => Ok(Value::Decimal(i.to_string())),
        (TypeRef::Decimal, Value::Double(f)) if !strict => {
            decimal::from_f64(f)
                .map(|d| Value::Decimal(d.to_string()))
                .ok_or_else(expected)
        }
        (TypeRef::Decimal, Value::Text(s)) if !strict => decimal::parse(&s)
            .map(|d| Value::Decimal(d.to_string()))
            .ok_or_else(expected),

        (TypeRef::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
        (TypeRef::Bytes, Value::Text(s)) if !strict => Ok(Value::Bytes(s.into_bytes())),

        (TypeRef::Date, Value::Date(d)) => Ok(Value::Date(d)),
        (TypeRef::Date, Value::Text(s)) if !strict => {
            temporal::parse_date(&s).map(Value::Date).ok_or_else(expected)
        }
        (TypeRef::Time, Value::Time(t)) => Ok(Value::Time(t)),
        (TypeRef::Time, Value::Text(s)) if !strict => {
            temporal::parse_time(&s).map(Value::Time).ok_or_else(expected)
        }
        (TypeRef::DateTime, Value::Timestamp(ts)) => Ok(Value::Timestamp(ts)),
        (TypeRef::DateTime, Value::Date(d)) if !strict => {
            temporal::date_to_timestamp(d).map(Value::Timestamp).ok_or_else(expected)
        }
        (TypeRef::DateTime, Value::Text(s)) if !strict => temporal::parse_timestamp(&s)
            .map(Value::Timestamp)
            .ok_or_else(expected),

        (TypeRef::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
        (TypeRef::Uuid, Value::Text(s)) => Uuid::parse_str(s.trim())
            .map(|id| Value::Uuid(id.into_bytes()))
            .map_err(|_| expected()),
        (TypeRef::Uuid, Value::Bytes(b)) if !strict => <[u8; 16]>::try_from(b.as_slice())
            .map(Value::Uuid)
            .map_err(|_| expected()),

        (TypeRef::Enum(e), Value::Text(s)) => {
            if e.contains(&s) {
                Ok(Value::Text(s))
            } else {
                Err(format!(
                    "{} ({})",
                    e.name,
                    e.variants
                        .iter()
                        .map(|v| format!("'{v}'"))
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }
        }

        (TypeRef::Json, v) => Ok(v),

        _ => Err(expected()),
    }
}

/// Check `value` against `constraints`, recording failures at `loc`.
///
/// Null values pass; optionality is handled by the caller.
pub fn check_constraints(
    loc: &[String],
    value: &Value,
    constraints: &FieldConstraints,
    errors: &mut ValidationError,
) {
    if constraints.is_empty() || value.is_null() {
        return;
    }

    if let Some(n) = numeric(value) {
        if let Some(gt) = constraints.gt {
            if n <= gt {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::Min,
                    format!("Input should be greater than {gt}"),
                );
            }
        }
        if let Some(ge) = constraints.ge {
            if n < ge {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::Min,
                    format!("Input should be greater than or equal to {ge}"),
                );
            }
        }
        if let Some(lt) = constraints.lt {
            if n >= lt {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::Max,
                    format!("Input should be less than {lt}"),
                );
            }
        }
        if let Some(le) = constraints.le {
            if n > le {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::Max,
                    format!("Input should be less than or equal to {le}"),
                );
            }
        }
    }

    if let Some(len) = length(value) {
        if let Some(min) = constraints.min_length {
            if len < min {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::MinLength,
                    format!("Value should have at least {min} items or characters"),
                );
            }
        }
        if let Some(max) = constraints.max_length {
            if len > max {
                errors.add(
                    loc.to_vec(),
                    ValidationErrorKind::MaxLength,
                    format!("Value should have at most {max} items or characters"),
                );
            }
        }
    }

    if let (Some(pattern), Value::Text(s)) = (&constraints.pattern, value) {
        if !matches_pattern(s, pattern) {
            errors.add(
                loc.to_vec(),
                ValidationErrorKind::Pattern,
                format!("String should match pattern '{pattern}'"),
            );
        }
    }

    if let Value::Decimal(s) = value {
        check_decimal(loc, s, constraints, errors);
    }
}

fn check_decimal(loc: &[String], text: &str, c: &FieldConstraints, errors: &mut ValidationError) {
    let Some(value) = decimal::parse(text) else {
        return;
    };
    if let Some(max_digits) = c.max_digits {
        if decimal::total_digits(&value) > u32::from(max_digits) {
            errors.add(
                loc.to_vec(),
                ValidationErrorKind::Decimal,
                format!("Decimal input should have no more than {max_digits} digits in total"),
            );
        }
    }
    if let Some(places) = c.decimal_places {
        if decimal::decimal_places(&value) > u32::from(places) {
            errors.add(
                loc.to_vec(),
                ValidationErrorKind::Decimal,
                format!("Decimal input should have no more than {places} decimal places"),
            );
        }
    }
    if let (Some(max_digits), Some(places)) = (c.max_digits, c.decimal_places) {
        let whole = u32::from(max_digits.saturating_sub(places));
        if decimal::whole_digits(&value) > whole {
            errors.add(
                loc.to_vec(),
                ValidationErrorKind::Decimal,
                format!(
                    "Decimal input should have no more than {whole} digits before the decimal point"
                ),
            );
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::BigInt(i) => Some(*i as f64),
        Value::Double(f) => Some(*f),
        Value::Decimal(s) => s.parse().ok(),
        _ => None,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::Text(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}
