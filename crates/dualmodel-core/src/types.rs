//! SQL column types and declared field types.
//!
//! [`TypeRef`] is what a model author writes for a field (the annotation);
//! [`SqlType`] is what the builder derives for a column.

use std::fmt;

/// SQL column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    Integer,
    BigInt,
    Double,
    /// Fixed-point number. `None` precision/scale leaves the database default.
    Numeric {
        precision: Option<u8>,
        scale: Option<u8>,
    },
    /// Variable-length string, optionally bounded.
    VarChar(Option<u32>),
    Text,
    Blob,
    Date,
    Time,
    DateTime,
    Uuid,
    /// Serialized JSON document.
    Json,
    /// Named enumeration stored as its variant name.
    Enum { name: String, variants: Vec<String> },
    /// Database-specific type string used verbatim.
    Custom(String),
}

impl SqlType {
    /// Type name as emitted in DDL.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Double => "FLOAT".to_string(),
            SqlType::Numeric {
                precision: Some(p),
                scale: Some(s),
            } => format!("NUMERIC({p}, {s})"),
            SqlType::Numeric {
                precision: Some(p),
                scale: None,
            } => format!("NUMERIC({p})"),
            SqlType::Numeric { .. } => "NUMERIC".to_string(),
            SqlType::VarChar(Some(n)) => format!("VARCHAR({n})"),
            SqlType::VarChar(None) => "VARCHAR".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::DateTime => "DATETIME".to_string(),
            SqlType::Uuid => "CHAR(32)".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::Enum { variants, .. } => {
                let width = variants.iter().map(String::len).max().unwrap_or(1);
                format!("VARCHAR({width})")
            }
            SqlType::Custom(s) => s.clone(),
        }
    }

    /// Whether an integer primary key of this type gets autoincrement by default.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Scale to quantize stored values to, for fixed-point columns.
    pub const fn decimal_scale(&self) -> Option<u8> {
        match self {
            SqlType::Numeric { scale, .. } => *scale,
            _ => None,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql_name())
    }
}

/// An enumeration whose members are stored by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    pub name: String,
    pub variants: Vec<String>,
}

impl EnumType {
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, variant: &str) -> bool {
        self.variants.iter().any(|v| v == variant)
    }
}

/// The declared type of a model field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Int,
    Float,
    Text,
    Bool,
    Date,
    Time,
    DateTime,
    Uuid,
    Decimal,
    Bytes,
    Enum(EnumType),
    /// Any JSON-serializable payload.
    Json,
    Optional(Box<TypeRef>),
    List(Box<TypeRef>),
    Set(Box<TypeRef>),
    /// Mapping with its declared type arguments; a bare mapping has none.
    Map(Vec<TypeRef>),
    /// Reference to a model by name, resolved when mappings are configured.
    Named(String),
    /// A type with no known serialization strategy.
    Opaque(String),
}

impl TypeRef {
    pub fn optional(inner: TypeRef) -> Self {
        TypeRef::Optional(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    pub fn set(inner: TypeRef) -> Self {
        TypeRef::Set(Box::new(inner))
    }

    pub fn map(key: TypeRef, value: TypeRef) -> Self {
        TypeRef::Map(vec![key, value])
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub const fn is_optional(&self) -> bool {
        matches!(self, TypeRef::Optional(_))
    }

    /// The type with any `Optional` wrappers removed.
    pub fn strip_optional(&self) -> &TypeRef {
        match self {
            TypeRef::Optional(inner) => inner.strip_optional(),
            other => other,
        }
    }

    /// True for types that map directly to a single scalar column.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self.strip_optional(),
            TypeRef::Int
                | TypeRef::Float
                | TypeRef::Text
                | TypeRef::Bool
                | TypeRef::Date
                | TypeRef::Time
                | TypeRef::DateTime
                | TypeRef::Uuid
                | TypeRef::Decimal
                | TypeRef::Bytes
                | TypeRef::Enum(_)
        )
    }

    /// Every model name this type refers to.
    pub fn referenced_models(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_models(&mut out);
        out
    }

    fn collect_models<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TypeRef::Named(name) => out.push(name),
            TypeRef::Optional(inner) | TypeRef::List(inner) | TypeRef::Set(inner) => {
                inner.collect_models(out);
            }
            TypeRef::Map(args) => {
                for arg in args {
                    arg.collect_models(out);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Int => f.write_str("i64"),
            TypeRef::Float => f.write_str("f64"),
            TypeRef::Text => f.write_str("String"),
            TypeRef::Bool => f.write_str("bool"),
            TypeRef::Date => f.write_str("Date"),
            TypeRef::Time => f.write_str("Time"),
            TypeRef::DateTime => f.write_str("DateTime"),
            TypeRef::Uuid => f.write_str("Uuid"),
            TypeRef::Decimal => f.write_str("Decimal"),
            TypeRef::Bytes => f.write_str("Vec<u8>"),
            TypeRef::Enum(e) => f.write_str(&e.name),
            TypeRef::Json => f.write_str("Json"),
            TypeRef::Optional(inner) => write!(f, "Option<{inner}>"),
            TypeRef::List(inner) => write!(f, "Vec<{inner}>"),
            TypeRef::Set(inner) => write!(f, "HashSet<{inner}>"),
            TypeRef::Map(args) if args.is_empty() => f.write_str("HashMap"),
            TypeRef::Map(args) => {
                let joined: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "HashMap<{}>", joined.join(", "))
            }
            TypeRef::Named(name) | TypeRef::Opaque(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_sql_name_keeps_precision() {
        let t = SqlType::Numeric {
            precision: Some(5),
            scale: Some(3),
        };
        assert_eq!(t.sql_name(), "NUMERIC(5, 3)");
        assert_eq!(t.decimal_scale(), Some(3));
    }

    #[test]
    fn test_enum_width() {
        let t = SqlType::Enum {
            name: "Color".into(),
            variants: vec!["red".into(), "green".into()],
        };
        assert_eq!(t.sql_name(), "VARCHAR(5)");
    }

    #[test]
    fn test_strip_optional_and_scalar() {
        let t = TypeRef::optional(TypeRef::Int);
        assert!(t.is_optional());
        assert_eq!(t.strip_optional(), &TypeRef::Int);
        assert!(t.is_scalar());
        assert!(!TypeRef::list(TypeRef::Int).is_scalar());
    }

    #[test]
    fn test_referenced_models_and_display() {
        let t = TypeRef::map(TypeRef::Text, TypeRef::named("Hero"));
        assert_eq!(t.referenced_models(), vec!["Hero"]);
        assert_eq!(t.to_string(), "HashMap<String, Hero>");
        assert_eq!(
            TypeRef::optional(TypeRef::named("Team")).to_string(),
            "Option<Team>"
        );
    }
}
