//! Field classification.
//!
//! Every field of a table model is classified exactly once, while the
//! descriptor is built, into a [`TypeClass`]. Precedence:
//!
//! 1. explicit relationship declaration;
//! 2. explicit column declaration (`sa_column`, `sa_column_args`, `sa_column_kwargs`);
//! 3. directly mappable scalar type;
//! 4. container over (or bare reference to) a table model;
//! 5. structured non-table type, stored as a JSON blob;
//! 6. anything else is unmappable.

use dualmodel_core::{
    CollectionKind, ColumnDescriptor, ColumnStorage, Error, FieldDecl, ForeignKeyRef,
    ReferentialAction, Result, SqlType, TypeRef,
};

use crate::spec::{Declaration, FieldSpec};

/// What a referenced model name resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A table model with its table name.
    Table(String),
    /// A plain model.
    Plain,
}

/// How a field is backed on a table model.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeClass {
    /// Validated only (`computed` fields).
    Plain,
    /// One scalar column.
    Scalar(SqlType),
    /// Related table model.
    Relationship {
        target: String,
        target_table: String,
        collection: CollectionKind,
    },
    /// JSON-serialized column.
    SerializedBlob,
}

/// Classify `field` of table model `model`.
///
/// `lookup` resolves model names; `None` means the name is unknown.
pub fn classify(
    model: &str,
    field: &FieldSpec,
    lookup: &dyn Fn(&str) -> Option<Resolved>,
) -> Result<TypeClass> {
    check_mapping_arity(model, field)?;

    let decl = match &field.declaration {
        Declaration::Relationship(rel) => {
            let (target, shape) = relationship_target(model, field)?;
            let collection = match shape {
                Shape::Single => CollectionKind::Scalar,
                Shape::List => CollectionKind::List,
                Shape::Set => CollectionKind::Set,
                Shape::Mapping => CollectionKind::Mapping {
                    key: rel.mapping_key.clone().unwrap_or_default(),
                },
            };
            return match lookup(target) {
                Some(Resolved::Table(target_table)) => Ok(TypeClass::Relationship {
                    target: target.to_string(),
                    target_table,
                    collection,
                }),
                Some(Resolved::Plain) => Err(Error::invariant(
                    model,
                    format!(
                        "relationship `{}` targets `{target}`, which is not a table model",
                        field.name
                    ),
                )),
                None => Err(unresolved(model, field, target)),
            };
        }
        Declaration::Field(decl) => decl,
    };

    if decl.computed {
        return Ok(TypeClass::Plain);
    }

    if let Some(column) = &decl.sa_column {
        return Ok(TypeClass::Scalar(column.sql_type.clone()));
    }

    let ty = field.ty.strip_optional();
    if decl.has_column_declaration() || ty.is_scalar() {
        return match infer_sql_type(ty, decl) {
            Some(sql_type) => Ok(TypeClass::Scalar(sql_type)),
            None if is_serializable(model, field, ty, lookup)? => Ok(TypeClass::SerializedBlob),
            None => Err(unmappable(model, field, "no column type or serialization strategy")),
        };
    }

    if let Some((target, shape)) = table_container(ty) {
        match lookup(target) {
            Some(Resolved::Table(target_table)) => {
                let collection = match shape {
                    Shape::Single => CollectionKind::Scalar,
                    Shape::List => CollectionKind::List,
                    Shape::Set => CollectionKind::Set,
                    Shape::Mapping => CollectionKind::Mapping { key: String::new() },
                };
                return Ok(TypeClass::Relationship {
                    target: target.to_string(),
                    target_table,
                    collection,
                });
            }
            Some(Resolved::Plain) => {}
            None => return Err(unresolved(model, field, target)),
        }
    }

    if is_serializable(model, field, ty, lookup)? {
        return Ok(TypeClass::SerializedBlob);
    }
    Err(unmappable(
        model,
        field,
        "no column type or serialization strategy",
    ))
}

/// A mapping-shaped relationship needs both a key and a value type.
pub fn check_mapping_arity(model: &str, field: &FieldSpec) -> Result<()> {
    let TypeRef::Map(args) = field.ty.strip_optional() else {
        return Ok(());
    };
    let relationship_like = matches!(field.declaration, Declaration::Relationship(_))
        || !field.ty.referenced_models().is_empty();
    if relationship_like && args.len() < 2 {
        return Err(unmappable(
            model,
            field,
            &format!(
                "mapping relationship `{}` needs key and value type arguments, got {}",
                field.name,
                args.len()
            ),
        ));
    }
    Ok(())
}

/// The SQL type for a scalar field, honoring `sa_type`, `max_length`,
/// `max_digits`/`decimal_places` and a `length` type argument.
pub fn infer_sql_type(ty: &TypeRef, decl: &FieldDecl) -> Option<SqlType> {
    if let Some(sql_type) = &decl.sa_type {
        return Some(sql_type.clone());
    }
    let sql_type = match ty.strip_optional() {
        TypeRef::Int => SqlType::Integer,
        TypeRef::Float => SqlType::Double,
        TypeRef::Text => {
            let length = decl
                .constraints
                .max_length
                .and_then(|n| u32::try_from(n).ok())
                .or_else(|| {
                    decl.type_kwargs
                        .get("length")
                        .and_then(serde_json::Value::as_u64)
                        .and_then(|n| u32::try_from(n).ok())
                });
            SqlType::VarChar(length)
        }
        TypeRef::Bool => SqlType::Boolean,
        TypeRef::Date => SqlType::Date,
        TypeRef::Time => SqlType::Time,
        TypeRef::DateTime => SqlType::DateTime,
        TypeRef::Uuid => SqlType::Uuid,
        TypeRef::Decimal => SqlType::Numeric {
            precision: decl.constraints.max_digits,
            scale: decl.constraints.decimal_places,
        },
        TypeRef::Bytes => SqlType::Blob,
        TypeRef::Enum(e) => SqlType::Enum {
            name: e.name.clone(),
            variants: e.variants.clone(),
        },
        _ => return None,
    };
    Some(sql_type)
}

/// Build the column for a column-backed field.
///
/// Checks the foreign key and `ondelete` invariants. Autoincrement is
/// settled later, once the full primary key is known.
pub fn column_for(
    model: &str,
    field: &FieldSpec,
    decl: &FieldDecl,
    sql_type: SqlType,
    storage: ColumnStorage,
) -> Result<ColumnDescriptor> {
    if let Some(over) = &decl.sa_column {
        if over.on_delete.is_some() && over.foreign_key.is_none() {
            return Err(Error::invariant(
                model,
                format!("{}: ondelete requires a foreign_key", field.name),
            ));
        }
        let foreign_key = parse_fk(model, field, over.foreign_key.as_deref())?;
        check_set_null(model, field, over.on_delete, over.nullable)?;
        return Ok(ColumnDescriptor {
            name: over.name.clone().unwrap_or_else(|| field.name.clone()),
            sql_type,
            nullable: over.nullable,
            primary_key: over.primary_key,
            autoincrement: over.autoincrement.unwrap_or(false),
            unique: over.unique,
            index: over.index,
            foreign_key,
            on_delete: over.on_delete,
            server_default: over.server_default.clone(),
            comment: decl.description.clone(),
            constraints: over.constraints.clone(),
            storage,
        });
    }

    if decl.on_delete.is_some() && decl.foreign_key.is_none() {
        return Err(Error::invariant(
            model,
            format!("{}: ondelete requires a foreign_key", field.name),
        ));
    }

    let primary_key = decl.primary_key.unwrap_or(false);
    let nullable = decl
        .nullable
        .unwrap_or(!primary_key && field.ty.is_optional());
    let foreign_key = parse_fk(model, field, decl.foreign_key.as_deref())?;
    check_set_null(model, field, decl.on_delete, nullable)?;

    let kwargs = &decl.sa_column_kwargs;
    let name = kwargs
        .get("name")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| field.name.clone(), str::to_string);

    Ok(ColumnDescriptor {
        name,
        sql_type,
        nullable,
        primary_key,
        autoincrement: kwargs
            .get("autoincrement")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false),
        unique: decl.unique.unwrap_or(false),
        index: decl.index.unwrap_or(false),
        foreign_key,
        on_delete: decl.on_delete,
        server_default: kwargs.get("server_default").map(|v| match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }),
        comment: kwargs
            .get("comment")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| decl.description.clone()),
        constraints: decl.sa_column_args.clone(),
        storage,
    })
}

fn parse_fk(
    model: &str,
    field: &FieldSpec,
    target: Option<&str>,
) -> Result<Option<ForeignKeyRef>> {
    match target {
        None => Ok(None),
        Some(t) => ForeignKeyRef::parse(t).map(Some).ok_or_else(|| {
            Error::invariant(
                model,
                format!(
                    "{}: foreign_key `{t}` must have the form `table.column`",
                    field.name
                ),
            )
        }),
    }
}

fn check_set_null(
    model: &str,
    field: &FieldSpec,
    on_delete: Option<ReferentialAction>,
    nullable: bool,
) -> Result<()> {
    if on_delete == Some(ReferentialAction::SetNull) && !nullable {
        return Err(Error::invariant(
            model,
            format!(
                "{}: ondelete='SET NULL' requires nullable=True",
                field.name
            ),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Single,
    List,
    Set,
    Mapping,
}

fn relationship_target<'a>(model: &str, field: &'a FieldSpec) -> Result<(&'a str, Shape)> {
    table_container(field.ty.strip_optional()).ok_or_else(|| {
        unmappable(
            model,
            field,
            "relationship fields must reference a model, directly or through a list, set or mapping",
        )
    })
}

fn table_container(ty: &TypeRef) -> Option<(&str, Shape)> {
    match ty {
        TypeRef::Named(name) => Some((name, Shape::Single)),
        TypeRef::List(inner) => match inner.strip_optional() {
            TypeRef::Named(name) => Some((name, Shape::List)),
            _ => None,
        },
        TypeRef::Set(inner) => match inner.strip_optional() {
            TypeRef::Named(name) => Some((name, Shape::Set)),
            _ => None,
        },
        TypeRef::Map(args) if args.len() == 2 => match args[1].strip_optional() {
            TypeRef::Named(name) => Some((name, Shape::Mapping)),
            _ => None,
        },
        _ => None,
    }
}

fn is_serializable(
    model: &str,
    field: &FieldSpec,
    ty: &TypeRef,
    lookup: &dyn Fn(&str) -> Option<Resolved>,
) -> Result<bool> {
    Ok(match ty {
        TypeRef::Json => true,
        TypeRef::Opaque(_) => false,
        TypeRef::Named(name) => match lookup(name) {
            Some(Resolved::Plain) => true,
            Some(Resolved::Table(_)) => false,
            None => return Err(unresolved(model, field, name)),
        },
        TypeRef::Optional(inner) | TypeRef::List(inner) | TypeRef::Set(inner) => {
            is_serializable(model, field, inner, lookup)?
        }
        TypeRef::Map(args) => {
            let mut ok = true;
            for arg in args {
                ok &= is_serializable(model, field, arg, lookup)?;
            }
            ok
        }
        scalar => scalar.is_scalar(),
    })
}

fn unresolved(model: &str, field: &FieldSpec, reference: &str) -> Error {
    Error::UnresolvedReference {
        model: model.to_string(),
        field: field.name.clone(),
        reference: reference.to_string(),
    }
}

fn unmappable(model: &str, field: &FieldSpec, reason: &str) -> Error {
    Error::UnmappableType {
        model: model.to_string(),
        field: field.name.clone(),
        type_name: field.ty.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualmodel_core::{ColumnOverride, RelationshipDecl};

    fn no_models(_: &str) -> Option<Resolved> {
        None
    }

    fn hero_world(name: &str) -> Option<Resolved> {
        match name {
            "Team" => Some(Resolved::Table("team".into())),
            "Address" => Some(Resolved::Plain),
            _ => None,
        }
    }

    fn field(name: &str, ty: TypeRef, decl: FieldDecl) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            ty,
            declaration: Declaration::Field(decl),
        }
    }

    #[test]
    fn test_scalars_become_columns() {
        let f = field("name", TypeRef::Text, FieldDecl::new().max_length(40));
        assert_eq!(
            classify("Hero", &f, &no_models).unwrap(),
            TypeClass::Scalar(SqlType::VarChar(Some(40)))
        );
        let money = field(
            "money",
            TypeRef::Decimal,
            FieldDecl::new().max_digits(5).decimal_places(3),
        );
        assert_eq!(
            classify("Hero", &money, &no_models).unwrap(),
            TypeClass::Scalar(SqlType::Numeric {
                precision: Some(5),
                scale: Some(3)
            })
        );
    }

    #[test]
    fn test_explicit_column_wins_over_inference() {
        let f = field(
            "tags",
            TypeRef::list(TypeRef::Text),
            FieldDecl::new().sa_column(ColumnOverride::new(SqlType::Text)),
        );
        assert_eq!(
            classify("Hero", &f, &no_models).unwrap(),
            TypeClass::Scalar(SqlType::Text)
        );
    }

    #[test]
    fn test_table_containers_become_relationships() {
        let list = field("heroes", TypeRef::list(TypeRef::named("Team")), FieldDecl::new());
        match classify("Hero", &list, &hero_world).unwrap() {
            TypeClass::Relationship { target, collection, .. } => {
                assert_eq!(target, "Team");
                assert_eq!(collection, CollectionKind::List);
            }
            other => panic!("expected relationship, got {other:?}"),
        }
        let bare = field("team", TypeRef::optional(TypeRef::named("Team")), FieldDecl::new());
        assert!(matches!(
            classify("Hero", &bare, &hero_world).unwrap(),
            TypeClass::Relationship { collection: CollectionKind::Scalar, .. }
        ));
    }

    #[test]
    fn test_structured_types_become_json() {
        let nested = field("address", TypeRef::named("Address"), FieldDecl::new());
        assert_eq!(
            classify("Hero", &nested, &hero_world).unwrap(),
            TypeClass::SerializedBlob
        );
        let dict = field(
            "meta",
            TypeRef::map(TypeRef::Text, TypeRef::Int),
            FieldDecl::new(),
        );
        assert_eq!(
            classify("Hero", &dict, &no_models).unwrap(),
            TypeClass::SerializedBlob
        );
    }

    #[test]
    fn test_opaque_is_unmappable() {
        let f = field("handle", TypeRef::Opaque("FileHandle".into()), FieldDecl::new());
        let err = classify("Hero", &f, &no_models).unwrap_err();
        assert!(matches!(err, Error::UnmappableType { ref field, .. } if field == "handle"));
    }

    #[test]
    fn test_mapping_relationship_needs_two_args() {
        let f = FieldSpec {
            name: "members".into(),
            ty: TypeRef::Map(vec![TypeRef::named("Hero")]),
            declaration: Declaration::Relationship(RelationshipDecl::new()),
        };
        let err = check_mapping_arity("Team", &f).unwrap_err();
        assert!(err.to_string().contains("members"));
    }

    #[test]
    fn test_set_null_requires_nullable() {
        let f = field(
            "team_id",
            TypeRef::Int,
            FieldDecl::new()
                .foreign_key("team.id")
                .ondelete(ReferentialAction::SetNull),
        );
        let err = column_for(
            "Hero",
            &f,
            f.decl().unwrap(),
            SqlType::Integer,
            ColumnStorage::Scalar,
        )
        .unwrap_err();
        assert!(err.to_string().contains("requires nullable=True"));
    }

    #[test]
    fn test_ondelete_without_foreign_key() {
        let f = field(
            "team_id",
            TypeRef::optional(TypeRef::Int),
            FieldDecl::new().ondelete(ReferentialAction::Cascade),
        );
        let err = column_for(
            "Hero",
            &f,
            f.decl().unwrap(),
            SqlType::Integer,
            ColumnStorage::Scalar,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { .. }));
    }
}
