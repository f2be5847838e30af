//! Error types for dualmodel.
//!
//! Two families live here:
//!
//! - [`Error`]: structural problems found while building a model (conflicting
//!   declarations, unmappable types, unresolved forward references, broken
//!   invariants) plus the runtime categories of validation and storage.
//! - [`ValidationError`]: the per-instance report produced by the validation
//!   pipeline. It aggregates one [`FieldValidationError`] per failed check so
//!   callers see every problem with an input at once.

use std::fmt;

use serde::Serialize;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Mutually exclusive options were supplied on the same declaration.
    DeclarationConflict {
        model: String,
        field: String,
        /// Names of the options that clash with the column override.
        options: Vec<&'static str>,
    },
    /// A field's declared type maps to no column, relationship or JSON blob.
    UnmappableType {
        model: String,
        field: String,
        type_name: String,
        reason: String,
    },
    /// A forward reference was still unresolved when mappings were configured.
    UnresolvedReference {
        model: String,
        field: String,
        reference: String,
    },
    /// A structural rule of a model was broken.
    InvariantViolation { model: String, message: String },
    /// Input failed validation.
    Validation(ValidationError),
    /// The registry has models whose mappings were not configured yet.
    NotConfigured(String),
    /// No model is registered under this name.
    UnknownModel(String),
    /// Failure reported by the storage collaborator.
    Storage(String),
    /// Free-form error.
    Custom(String),
}

impl Error {
    /// Shorthand for an [`Error::InvariantViolation`].
    pub fn invariant(model: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvariantViolation {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Returns the validation report if this is a validation failure.
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Error::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// True for errors raised while building a model rather than while using one.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::DeclarationConflict { .. }
                | Error::UnmappableType { .. }
                | Error::UnresolvedReference { .. }
                | Error::InvariantViolation { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeclarationConflict {
                model,
                field,
                options,
            } => write!(
                f,
                "{model}.{field}: passing {} is not supported when also passing sa_column",
                options.join(", ")
            ),
            Error::UnmappableType {
                model,
                field,
                type_name,
                reason,
            } => write!(
                f,
                "{model}.{field}: type `{type_name}` has no matching column type ({reason})"
            ),
            Error::UnresolvedReference {
                model,
                field,
                reference,
            } => write!(
                f,
                "{model}.{field}: forward reference `{reference}` could not be resolved"
            ),
            Error::InvariantViolation { model, message } => write!(f, "{model}: {message}"),
            Error::Validation(v) => write!(f, "{v}"),
            Error::NotConfigured(msg) => write!(f, "mappings not configured: {msg}"),
            Error::UnknownModel(name) => write!(f, "unknown model `{name}`"),
            Error::Storage(msg) => write!(f, "storage error: {msg}"),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        let mut v = ValidationError::new();
        v.add(Vec::new(), ValidationErrorKind::Json, err.to_string());
        Error::Validation(v)
    }
}

/// The category of a single validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// A required field was not supplied.
    Missing,
    /// The value has the wrong type and could not be coerced.
    Type,
    /// Numeric value below its lower bound.
    Min,
    /// Numeric value above its upper bound.
    Max,
    /// String or collection shorter than allowed.
    MinLength,
    /// String or collection longer than allowed.
    MaxLength,
    /// String does not match the regex pattern.
    Pattern,
    /// Decimal has too many digits or decimal places.
    Decimal,
    /// Input carried a key that the model forbids.
    Extra,
    /// The input was not valid JSON.
    Json,
    /// Custom validator failure.
    Custom,
}

impl ValidationErrorKind {
    /// Short machine-readable tag.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::Missing => "missing",
            ValidationErrorKind::Type => "type_error",
            ValidationErrorKind::Min => "greater_than",
            ValidationErrorKind::Max => "less_than",
            ValidationErrorKind::MinLength => "too_short",
            ValidationErrorKind::MaxLength => "too_long",
            ValidationErrorKind::Pattern => "string_pattern_mismatch",
            ValidationErrorKind::Decimal => "decimal_invalid",
            ValidationErrorKind::Extra => "extra_forbidden",
            ValidationErrorKind::Json => "json_invalid",
            ValidationErrorKind::Custom => "value_error",
        }
    }
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValidationError {
    /// Path to the offending value (field names and list indices).
    pub loc: Vec<String>,
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl fmt::Display for FieldValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loc.is_empty() {
            write!(f, "{} [{}]", self.message, self.kind.as_str())
        } else {
            write!(
                f,
                "{}: {} [{}]",
                self.loc.join("."),
                self.message,
                self.kind.as_str()
            )
        }
    }
}

/// Aggregated validation failures for one input.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ValidationError {
    /// Name of the model being validated, when known.
    pub model: Option<String>,
    pub errors: Vec<FieldValidationError>,
}

impl ValidationError {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the model name used in the display output.
    pub fn for_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Record a failure at `loc`.
    pub fn add(
        &mut self,
        loc: Vec<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            loc,
            kind,
            message: message.into(),
        });
    }

    pub fn add_missing(&mut self, field: &str) {
        self.add(
            vec![field.to_string()],
            ValidationErrorKind::Missing,
            "Field required",
        );
    }

    pub fn add_type(&mut self, field: &str, expected: &str, got: &str) {
        self.add(
            vec![field.to_string()],
            ValidationErrorKind::Type,
            format!("Input should be a valid {expected}, got {got}"),
        );
    }

    pub fn add_extra(&mut self, key: &str) {
        self.add(
            vec![key.to_string()],
            ValidationErrorKind::Extra,
            "Extra inputs are not permitted",
        );
    }

    pub fn add_pattern(&mut self, field: &str, pattern: &str) {
        self.add(
            vec![field.to_string()],
            ValidationErrorKind::Pattern,
            format!("String should match pattern '{pattern}'"),
        );
    }

    /// Merge a nested report, prefixing every location with `prefix`.
    pub fn merge_nested(&mut self, prefix: &[String], nested: ValidationError) {
        for mut err in nested.errors {
            let mut loc = prefix.to_vec();
            loc.append(&mut err.loc);
            err.loc = loc;
            self.errors.push(err);
        }
    }

    /// True if any failure is located at `field`.
    pub fn has_error_for(&self, field: &str) -> bool {
        self.errors
            .iter()
            .any(|e| e.loc.first().is_some_and(|f| f == field))
    }

    /// `Ok(())` when empty, otherwise `Err(self)`.
    pub fn into_result(self) -> std::result::Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 {
            "error"
        } else {
            "errors"
        };
        match &self.model {
            Some(model) => writeln!(
                f,
                "{} validation {noun} for {model}",
                self.errors.len()
            )?,
            None => writeln!(f, "{} validation {noun}", self.errors.len())?,
        }
        for err in &self.errors {
            writeln!(f, "  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_lists_options() {
        let err = Error::DeclarationConflict {
            model: "Hero".into(),
            field: "name".into(),
            options: vec!["primary_key", "index"],
        };
        let msg = err.to_string();
        assert!(msg.contains("primary_key, index"));
        assert!(msg.contains("sa_column"));
        assert!(err.is_structural());
    }

    #[test]
    fn test_validation_error_into_result() {
        assert!(ValidationError::new().into_result().is_ok());

        let mut errs = ValidationError::new().for_model("Hero");
        errs.add_missing("name");
        assert!(errs.has_error_for("name"));
        let display = errs.to_string();
        assert!(display.starts_with("1 validation error for Hero"));
        assert!(errs.into_result().is_err());
    }

    #[test]
    fn test_merge_nested_prefixes_location() {
        let mut inner = ValidationError::new();
        inner.add_missing("name");
        let mut outer = ValidationError::new();
        outer.merge_nested(&["heroes".to_string(), "0".to_string()], inner);
        assert_eq!(outer.errors[0].loc, vec!["heroes", "0", "name"]);
    }
}
