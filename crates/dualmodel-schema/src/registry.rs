//! The model registry.
//!
//! A [`Registry`] owns two namespaces: models by name, and table metadata by
//! table name. Building is an explicit two-step process:
//!
//! 1. [`Registry::define`] takes a [`ModelSpec`] and checks everything that
//!    does not depend on other models: option conflicts, `ondelete` rules,
//!    primary keys, duplicate columns, duplicate model and table names.
//! 2. [`Registry::configure`] resolves forward references, classifies every
//!    field, works out relationship cardinality and foreign keys, and
//!    publishes immutable [`ModelDescriptor`]s.
//!
//! Structural errors never wait until an instance is created.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use dualmodel_core::{
    CollectionKind, ColumnDescriptor, ColumnStorage, DefaultValue, Error, FieldDecl,
    FieldDescriptor, FieldKind, LinkTableInfo, ModelDescriptor, RelationshipInfo,
    RelationshipKind, Result, SqlType, Value, validate::validate_pattern,
};
use tracing::{debug, trace};

use crate::classify::{self, Resolved, TypeClass};
use crate::model::Model;
use crate::spec::{Declaration, FieldSpec, ModelDef, ModelSpec};

/// Registry of defined models and their tables.
#[derive(Debug, Default)]
pub struct Registry {
    /// Specs in definition order.
    specs: Vec<ModelSpec>,
    /// Table name -> model name.
    tables: BTreeMap<String, String>,
    /// Built descriptors, published by `configure`.
    models: HashMap<String, Arc<ModelDescriptor>>,
    configured: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model spec.
    ///
    /// # Errors
    ///
    /// Returns a structural error for any rule that can be checked without
    /// looking at other models. Nothing is registered on error.
    #[tracing::instrument(level = "debug", skip(self, spec), fields(model = %spec.name))]
    pub fn define(&mut self, spec: ModelSpec) -> Result<()> {
        check_spec(&spec)?;

        let table = spec.table_name();
        let mut replaced = None;
        if let Some(table) = &table {
            if let Some(owner) = self.tables.get(table) {
                if !spec.config.extend_existing {
                    return Err(Error::invariant(
                        &spec.name,
                        format!(
                            "table `{table}` is already defined by model `{owner}`; \
                             set extend_existing to replace it"
                        ),
                    ));
                }
                replaced = Some(owner.clone());
            }
        }
        if self
            .specs
            .iter()
            .any(|s| s.name == spec.name && replaced.as_deref() != Some(s.name.as_str()))
        {
            return Err(Error::invariant(
                &spec.name,
                format!("model `{}` is already defined", spec.name),
            ));
        }

        if let Some(old) = replaced {
            debug!(model = %spec.name, replaced = %old, "Replacing existing table definition");
            self.specs.retain(|s| s.name != old);
            self.models.remove(&old);
        }
        if let Some(table) = table {
            self.tables.insert(table, spec.name.clone());
        }
        debug!(
            model = %spec.name,
            table = spec.is_table(),
            fields = spec.fields.len(),
            "Defined model"
        );
        self.specs.push(spec);
        self.configured = false;
        Ok(())
    }

    /// Register the `ModelSpec` of a `#[derive(Model)]` type.
    pub fn define_model<M: ModelDef>(&mut self) -> Result<()> {
        self.define(M::model_spec())
    }

    /// Build descriptors for every defined model.
    ///
    /// # Errors
    ///
    /// Unresolved forward references, unmappable types, and relationship
    /// errors (missing foreign keys, bad `back_populates`, `cascade_delete`
    /// on a non-nullable foreign key). Previously published descriptors stay
    /// in place on error.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn configure(&mut self) -> Result<()> {
        let names: HashMap<&str, Resolved> = self
            .specs
            .iter()
            .map(|s| {
                let resolved = match s.table_name() {
                    Some(table) => Resolved::Table(table),
                    None => Resolved::Plain,
                };
                (s.name.as_str(), resolved)
            })
            .collect();
        let lookup = |name: &str| names.get(name).cloned();

        let mut built = Vec::with_capacity(self.specs.len());
        for spec in &self.specs {
            built.push(build_descriptor(spec, &lookup)?);
        }
        resolve_relationships(&mut built)?;
        check_back_populates(&built)?;

        self.models = built
            .into_iter()
            .map(|d| (d.name.clone(), Arc::new(d)))
            .collect();
        self.configured = true;
        debug!(models = self.models.len(), "Configured mappings");
        Ok(())
    }

    /// Handle to a configured model.
    ///
    /// # Errors
    ///
    /// [`Error::NotConfigured`] if the model was defined after the last
    /// `configure`, [`Error::UnknownModel`] if it was never defined.
    pub fn model(&self, name: &str) -> Result<Model<'_>> {
        match self.models.get(name) {
            Some(descriptor) => Ok(Model::new(self, Arc::clone(descriptor))),
            None if self.specs.iter().any(|s| s.name == name) => {
                Err(Error::NotConfigured(name.to_string()))
            }
            None => Err(Error::UnknownModel(name.to_string())),
        }
    }

    /// Handle to the model of a `#[derive(Model)]` type.
    pub fn model_of<M: ModelDef>(&self) -> Result<Model<'_>> {
        self.model(&M::model_spec().name)
    }

    /// Built descriptor by model name.
    pub fn descriptor(&self, name: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.get(name).cloned()
    }

    /// Built descriptor of the model mapped to `table`.
    pub fn descriptor_for_table(&self, table: &str) -> Option<Arc<ModelDescriptor>> {
        self.tables.get(table).and_then(|m| self.descriptor(m))
    }

    /// True if a model mapped to `table` has been defined.
    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn contains_model(&self, name: &str) -> bool {
        self.specs.iter().any(|s| s.name == name)
    }

    /// True once every defined model has a published descriptor.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Configured table models in definition order.
    pub fn tables(&self) -> Vec<Arc<ModelDescriptor>> {
        self.specs
            .iter()
            .filter(|s| s.is_table())
            .filter_map(|s| self.descriptor(&s.name))
            .collect()
    }

    /// Configured table models ordered so that referenced tables come first.
    ///
    /// Cycles are broken by falling back to definition order.
    pub fn sorted_tables(&self) -> Vec<Arc<ModelDescriptor>> {
        let tables = self.tables();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(tables.len());

        while out.len() < tables.len() {
            let before = out.len();
            for model in &tables {
                let Some(name) = model.table_name.as_deref() else {
                    continue;
                };
                if emitted.contains(name) {
                    continue;
                }
                let ready = model.columns().all(|(_, c)| {
                    c.foreign_key.as_ref().is_none_or(|fk| {
                        fk.table == name
                            || emitted.contains(&fk.table)
                            || !self.contains_table(&fk.table)
                    })
                });
                if ready {
                    emitted.insert(name.to_string());
                    out.push(Arc::clone(model));
                }
            }
            if out.len() == before {
                // Cycle: take the first pending table as-is.
                if let Some(model) = tables.iter().find(|m| {
                    m.table_name
                        .as_deref()
                        .is_some_and(|n| !emitted.contains(n))
                }) {
                    if let Some(name) = &model.table_name {
                        emitted.insert(name.clone());
                    }
                    out.push(Arc::clone(model));
                }
            }
        }
        out
    }

    /// Drop every model and table.
    pub fn clear(&mut self) {
        debug!(models = self.specs.len(), "Clearing registry");
        self.specs.clear();
        self.tables.clear();
        self.models.clear();
        self.configured = false;
    }
}

/// Checks that need nothing but the declaration itself.
fn check_spec(spec: &ModelSpec) -> Result<()> {
    let model = spec.name.as_str();
    let mut columns: HashSet<String> = HashSet::new();
    let mut has_primary_key = false;

    for field in &spec.fields {
        classify::check_mapping_arity(model, field)?;

        let decl = match &field.declaration {
            Declaration::Relationship(_) if !spec.is_table() => {
                return Err(Error::invariant(
                    model,
                    format!(
                        "relationship `{}` declared on a model that is not a table",
                        field.name
                    ),
                ));
            }
            Declaration::Relationship(_) => continue,
            Declaration::Field(decl) => decl,
        };

        let conflicts = decl.conflicting_options();
        if !conflicts.is_empty() {
            return Err(Error::DeclarationConflict {
                model: model.to_string(),
                field: field.name.clone(),
                options: conflicts,
            });
        }
        if let Some(pattern) = &decl.constraints.pattern {
            if let Some(msg) = validate_pattern(pattern) {
                return Err(Error::invariant(model, format!("{}: {msg}", field.name)));
            }
        }

        if !spec.is_table() {
            continue;
        }
        has_primary_key |= decl.primary_key == Some(true)
            || decl.sa_column.as_ref().is_some_and(|c| c.primary_key);

        // Fields that reference other models are finished by `configure`.
        if !field.ty.referenced_models().is_empty() {
            continue;
        }
        let no_models = |_: &str| -> Option<Resolved> { None };
        if let Some(column) = column_of(model, field, decl, &no_models)? {
            if !columns.insert(column.name.clone()) {
                return Err(duplicate_column(model, &column.name));
            }
        }
    }

    if spec.is_table() && !has_primary_key {
        return Err(Error::invariant(
            model,
            "table models need at least one primary key field",
        ));
    }
    Ok(())
}

/// The column for a value field, or `None` when the field is not column-backed.
fn column_of(
    model: &str,
    field: &FieldSpec,
    decl: &FieldDecl,
    lookup: &dyn Fn(&str) -> Option<Resolved>,
) -> Result<Option<ColumnDescriptor>> {
    let column = match classify::classify(model, field, lookup)? {
        TypeClass::Scalar(sql_type) => Some(classify::column_for(
            model,
            field,
            decl,
            sql_type,
            ColumnStorage::Scalar,
        )?),
        TypeClass::SerializedBlob => Some(classify::column_for(
            model,
            field,
            decl,
            SqlType::Json,
            ColumnStorage::Json,
        )?),
        TypeClass::Plain | TypeClass::Relationship { .. } => None,
    };
    Ok(column)
}

fn duplicate_column(model: &str, column: &str) -> Error {
    Error::invariant(model, format!("column `{column}` is declared more than once"))
}

fn explicit_autoincrement(decl: &FieldDecl) -> Option<bool> {
    match &decl.sa_column {
        Some(over) => over.autoincrement,
        None => decl
            .sa_column_kwargs
            .get("autoincrement")
            .and_then(serde_json::Value::as_bool),
    }
}

fn build_descriptor(
    spec: &ModelSpec,
    lookup: &dyn Fn(&str) -> Option<Resolved>,
) -> Result<ModelDescriptor> {
    let model = spec.name.as_str();
    let mut fields = Vec::with_capacity(spec.fields.len());
    let mut columns: HashSet<String> = HashSet::new();

    for field in &spec.fields {
        let (decl, kind) = if spec.is_table() {
            classify_field(model, field, lookup)?
        } else {
            for reference in field.ty.referenced_models() {
                if lookup(reference).is_none() {
                    return Err(Error::UnresolvedReference {
                        model: model.to_string(),
                        field: field.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }
            (field.decl().cloned().unwrap_or_default(), FieldKind::Plain)
        };
        if let FieldKind::Column(column) = &kind {
            if !columns.insert(column.name.clone()) {
                return Err(duplicate_column(model, &column.name));
            }
        }
        trace!(model, field = %field.name, kind = ?kind_name(&kind), "Classified field");

        let (input_names, output_name) = aliases(spec, &field.name, &decl);
        fields.push(FieldDescriptor {
            name: field.name.clone(),
            ty: field.ty.clone(),
            decl,
            kind,
            input_names,
            output_name,
        });
    }

    // A single integer primary key autoincrements unless told otherwise.
    let pk: Vec<usize> = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| f.column().is_some_and(|c| c.primary_key))
        .map(|(i, _)| i)
        .collect();
    if let [idx] = *pk.as_slice() {
        let explicit = explicit_autoincrement(&fields[idx].decl);
        if let FieldKind::Column(column) = &mut fields[idx].kind {
            column.autoincrement = explicit.unwrap_or(column.sql_type.is_integer());
        }
    }

    Ok(ModelDescriptor {
        name: spec.name.clone(),
        config: spec.config.clone(),
        table_name: spec.table_name(),
        fields,
    })
}

fn kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Plain => "plain",
        FieldKind::Column(c) if c.storage == ColumnStorage::Json => "json column",
        FieldKind::Column(_) => "column",
        FieldKind::Relationship(_) => "relationship",
    }
}

fn classify_field(
    model: &str,
    field: &FieldSpec,
    lookup: &dyn Fn(&str) -> Option<Resolved>,
) -> Result<(FieldDecl, FieldKind)> {
    let class = classify::classify(model, field, lookup)?;
    let decl = field.decl().cloned().unwrap_or_default();
    let kind = match class {
        TypeClass::Plain => FieldKind::Plain,
        TypeClass::Scalar(sql_type) => FieldKind::Column(classify::column_for(
            model,
            field,
            &decl,
            sql_type,
            ColumnStorage::Scalar,
        )?),
        TypeClass::SerializedBlob => FieldKind::Column(classify::column_for(
            model,
            field,
            &decl,
            SqlType::Json,
            ColumnStorage::Json,
        )?),
        TypeClass::Relationship {
            target,
            target_table,
            collection,
        } => {
            let rel = field.relationship_decl().cloned().unwrap_or_default();
            let mut decl = decl;
            decl.default = match collection {
                CollectionKind::Scalar => DefaultValue::Value(Value::Null),
                CollectionKind::List | CollectionKind::Set => {
                    DefaultValue::Factory(|| Value::Array(Vec::new()))
                }
                CollectionKind::Mapping { .. } => {
                    DefaultValue::Factory(|| Value::Object(BTreeMap::new()))
                }
            };
            let kind = if rel.link_model.is_some() {
                RelationshipKind::ManyToMany
            } else if collection == CollectionKind::Scalar {
                RelationshipKind::ManyToOne
            } else {
                RelationshipKind::OneToMany
            };
            let info = RelationshipInfo {
                target,
                target_table,
                kind,
                collection,
                local_key: None,
                remote_key: None,
                link_table: rel.link_model.as_ref().map(|m| LinkTableInfo {
                    table_name: String::new(),
                    model: m.clone(),
                    local_column: String::new(),
                    remote_column: String::new(),
                }),
                back_populates: rel.back_populates.clone(),
                cascade_delete: rel.cascade_delete,
                passive_deletes: rel.passive_deletes,
            };
            return Ok((decl, FieldKind::Relationship(info)));
        }
    };
    Ok((decl, kind))
}

/// Input keys and output key for a field.
fn aliases(spec: &ModelSpec, name: &str, decl: &FieldDecl) -> (Vec<String>, String) {
    let generated = if decl.has_explicit_alias() {
        None
    } else {
        spec.config.alias_generator.map(|g| g.apply(name))
    };
    let input = decl
        .validation_alias
        .clone()
        .or_else(|| decl.alias.clone())
        .or_else(|| generated.clone())
        .unwrap_or_else(|| name.to_string());
    let output = decl
        .serialization_alias
        .clone()
        .or_else(|| decl.alias.clone())
        .or(generated)
        .unwrap_or_else(|| name.to_string());

    let mut inputs = vec![input];
    if spec.config.populate_by_name && inputs[0] != name {
        inputs.push(name.to_string());
    }
    (inputs, output)
}

struct TableView {
    model: String,
    table: String,
    columns: Vec<ColumnDescriptor>,
    primary_key: Vec<String>,
}

fn foreign_keys_to<'a>(view: &'a TableView, table: &str) -> Vec<&'a ColumnDescriptor> {
    view.columns
        .iter()
        .filter(|c| c.foreign_key.as_ref().is_some_and(|fk| fk.table == table))
        .collect()
}

/// Pick the column named `{hint}_id` if present, else the first candidate.
fn pick<'a>(
    candidates: &[&'a ColumnDescriptor],
    hint: Option<&str>,
) -> Option<&'a ColumnDescriptor> {
    hint.and_then(|h| {
        let wanted = format!("{h}_id");
        candidates.iter().find(|c| c.name == wanted).copied()
    })
    .or_else(|| candidates.first().copied())
}

fn resolve_relationships(built: &mut [ModelDescriptor]) -> Result<()> {
    let views: Vec<TableView> = built
        .iter()
        .filter_map(|d| {
            d.table_name.as_ref().map(|table| TableView {
                model: d.name.clone(),
                table: table.clone(),
                columns: d.columns().map(|(_, c)| c.clone()).collect(),
                primary_key: d.primary_key_fields().iter().map(|f| f.name.clone()).collect(),
            })
        })
        .collect();
    let view_of = |model: &str| views.iter().find(|v| v.model == model);

    for descriptor in built.iter_mut() {
        let model = descriptor.name.clone();
        let Some(this) = view_of(&model) else {
            continue;
        };
        for field in &mut descriptor.fields {
            let field_name = field.name.clone();
            let FieldKind::Relationship(rel) = &mut field.kind else {
                continue;
            };
            let Some(target) = view_of(&rel.target) else {
                return Err(Error::UnresolvedReference {
                    model: model.clone(),
                    field: field_name,
                    reference: rel.target.clone(),
                });
            };

            if let CollectionKind::Mapping { key } = &mut rel.collection {
                if key.is_empty() {
                    *key = target.primary_key.first().cloned().unwrap_or_default();
                }
            }

            if let Some(link) = &mut rel.link_table {
                let Some(link_view) = view_of(&link.model) else {
                    return Err(Error::UnresolvedReference {
                        model: model.clone(),
                        field: field_name,
                        reference: link.model.clone(),
                    });
                };
                if rel.collection == CollectionKind::Scalar {
                    return Err(Error::invariant(
                        &model,
                        format!("{field_name}: a link_model relationship needs a collection type"),
                    ));
                }
                let local = foreign_keys_to(link_view, &this.table);
                let remote = foreign_keys_to(link_view, &target.table);
                let local_col = local.first().copied();
                let remote_col = remote
                    .iter()
                    .find(|c| local_col.is_none_or(|l| l.name != c.name))
                    .copied();
                let (Some(local_col), Some(remote_col)) = (local_col, remote_col) else {
                    return Err(Error::invariant(
                        &model,
                        format!(
                            "{field_name}: link model `{}` needs foreign keys to `{}` and `{}`",
                            link.model, this.table, target.table
                        ),
                    ));
                };
                link.table_name = link_view.table.clone();
                link.local_column = local_col.name.clone();
                link.remote_column = remote_col.name.clone();
                continue;
            }

            if rel.collection == CollectionKind::Scalar {
                let local = foreign_keys_to(this, &target.table);
                if let Some(col) = pick(&local, Some(&field_name)) {
                    rel.kind = RelationshipKind::ManyToOne;
                    rel.local_key = Some(col.name.clone());
                } else {
                    let remote = foreign_keys_to(target, &this.table);
                    let Some(col) = pick(&remote, rel.back_populates.as_deref()) else {
                        return Err(no_foreign_key(&model, &field_name, this, target));
                    };
                    rel.kind = RelationshipKind::OneToOne;
                    rel.remote_key = Some(col.name.clone());
                }
            } else {
                let remote = foreign_keys_to(target, &this.table);
                let Some(col) = pick(&remote, rel.back_populates.as_deref()) else {
                    return Err(no_foreign_key(&model, &field_name, this, target));
                };
                rel.kind = RelationshipKind::OneToMany;
                rel.remote_key = Some(col.name.clone());
            }

            if rel.cascade_delete {
                if let Some(remote_key) = &rel.remote_key {
                    let nullable = target
                        .columns
                        .iter()
                        .find(|c| &c.name == remote_key)
                        .is_some_and(|c| c.nullable);
                    if !nullable {
                        return Err(Error::invariant(
                            &model,
                            format!(
                                "{field_name}: cascade_delete requires `{}.{remote_key}` to be nullable",
                                target.table
                            ),
                        ));
                    }
                }
            }
            trace!(
                model = %model,
                field = %field_name,
                kind = ?rel.kind,
                local_key = ?rel.local_key,
                remote_key = ?rel.remote_key,
                "Resolved relationship"
            );
        }
    }
    Ok(())
}

fn no_foreign_key(model: &str, field: &str, this: &TableView, target: &TableView) -> Error {
    Error::invariant(
        model,
        format!(
            "{field}: no foreign key links `{}` and `{}`",
            this.table, target.table
        ),
    )
}

fn check_back_populates(built: &[ModelDescriptor]) -> Result<()> {
    for descriptor in built {
        for (field, rel) in descriptor.relationships() {
            let Some(back) = &rel.back_populates else {
                continue;
            };
            let points_back = built
                .iter()
                .find(|d| d.name == rel.target)
                .and_then(|d| d.field(back))
                .and_then(|f| f.relationship())
                .is_some_and(|r| r.target == descriptor.name);
            if !points_back {
                return Err(Error::invariant(
                    &descriptor.name,
                    format!(
                        "{}: back_populates `{}.{back}` is not a relationship to `{}`",
                        field.name, rel.target, descriptor.name
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualmodel_core::{
        AliasGenerator, ColumnOverride, ModelConfig, ReferentialAction, RelationshipDecl, TypeRef,
    };

    fn team() -> ModelSpec {
        ModelSpec::table("Team")
            .field(
                "id",
                TypeRef::optional(TypeRef::Int),
                FieldDecl::new().default(Value::Null).primary_key(true),
            )
            .field("name", TypeRef::Text, FieldDecl::new().index(true))
            .relationship(
                "heroes",
                TypeRef::list(TypeRef::named("Hero")),
                RelationshipDecl::new().back_populates("team"),
            )
    }

    fn hero() -> ModelSpec {
        ModelSpec::table("Hero")
            .field(
                "id",
                TypeRef::optional(TypeRef::Int),
                FieldDecl::new().default(Value::Null).primary_key(true),
            )
            .field("name", TypeRef::Text, FieldDecl::new())
            .field(
                "team_id",
                TypeRef::optional(TypeRef::Int),
                FieldDecl::new().default(Value::Null).foreign_key("team.id"),
            )
            .relationship(
                "team",
                TypeRef::optional(TypeRef::named("Team")),
                RelationshipDecl::new().back_populates("heroes"),
            )
    }

    #[test]
    fn test_define_and_configure_forward_references() {
        let mut registry = Registry::new();
        registry.define(hero()).unwrap();
        registry.define(team()).unwrap();
        assert!(registry.contains_table("hero"));
        assert!(matches!(
            registry.model("Hero").unwrap_err(),
            Error::NotConfigured(_)
        ));
        registry.configure().unwrap();

        let hero = registry.descriptor("Hero").unwrap();
        let rel = hero.field("team").unwrap().relationship().unwrap();
        assert_eq!(rel.kind, RelationshipKind::ManyToOne);
        assert_eq!(rel.local_key.as_deref(), Some("team_id"));

        let team = registry.descriptor("Team").unwrap();
        let rel = team.field("heroes").unwrap().relationship().unwrap();
        assert_eq!(rel.kind, RelationshipKind::OneToMany);
        assert_eq!(rel.remote_key.as_deref(), Some("team_id"));

        let id = hero.field("id").unwrap().column().unwrap();
        assert!(id.primary_key && id.autoincrement && !id.nullable);
    }

    #[test]
    fn test_unresolved_reference_fails_configure() {
        let mut registry = Registry::new();
        registry.define(hero()).unwrap();
        let err = registry.configure().unwrap_err();
        assert!(matches!(
            err,
            Error::UnresolvedReference { ref reference, .. } if reference == "Team"
        ));
    }

    #[test]
    fn test_sa_column_conflict_names_options() {
        let spec = ModelSpec::table("Item").field(
            "id",
            TypeRef::Int,
            FieldDecl::new()
                .sa_column(ColumnOverride::new(SqlType::Integer).primary_key(true))
                .nullable(false)
                .index(true),
        );
        let err = Registry::new().define(spec).unwrap_err();
        match err {
            Error::DeclarationConflict { field, options, .. } => {
                assert_eq!(field, "id");
                assert_eq!(options, vec!["nullable", "index"]);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_table_requires_primary_key() {
        let spec = ModelSpec::table("Log").field("line", TypeRef::Text, FieldDecl::new());
        assert!(matches!(
            Registry::new().define(spec).unwrap_err(),
            Error::InvariantViolation { .. }
        ));
        let plain = ModelSpec::plain("Line").field("line", TypeRef::Text, FieldDecl::new());
        Registry::new().define(plain).unwrap();
    }

    #[test]
    fn test_duplicate_table_and_extend_existing() {
        let mut registry = Registry::new();
        registry.define(team()).unwrap();
        let again = ModelSpec::table("Squad")
            .config(ModelConfig::plain().table_name("team"))
            .field("id", TypeRef::Int, FieldDecl::new().primary_key(true));
        assert!(registry.define(again.clone()).is_err());

        let replacing = again.config(
            ModelConfig::plain()
                .table_name("team")
                .extend_existing(true),
        );
        registry.define(replacing).unwrap();
        assert!(!registry.contains_model("Team"));
        assert!(registry.contains_model("Squad"));
    }

    #[test]
    fn test_duplicate_model_name() {
        let mut registry = Registry::new();
        registry.define(ModelSpec::plain("A")).unwrap();
        assert!(registry.define(ModelSpec::plain("A")).is_err());
    }

    #[test]
    fn test_duplicate_column_names() {
        let spec = ModelSpec::table("Item")
            .field("id", TypeRef::Int, FieldDecl::new().primary_key(true))
            .field(
                "label",
                TypeRef::Text,
                FieldDecl::new().sa_column_kwarg("name", serde_json::json!("id")),
            );
        let err = Registry::new().define(spec).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_cascade_delete_requires_nullable_fk() {
        let team = ModelSpec::table("Team")
            .field("id", TypeRef::Int, FieldDecl::new().primary_key(true))
            .relationship(
                "heroes",
                TypeRef::list(TypeRef::named("Hero")),
                RelationshipDecl::new().cascade_delete(true),
            );
        let hero = ModelSpec::table("Hero")
            .field("id", TypeRef::Int, FieldDecl::new().primary_key(true))
            .field(
                "team_id",
                TypeRef::Int,
                FieldDecl::new()
                    .foreign_key("team.id")
                    .ondelete(ReferentialAction::Cascade),
            );
        let mut registry = Registry::new();
        registry.define(team).unwrap();
        registry.define(hero).unwrap();
        let err = registry.configure().unwrap_err();
        assert!(err.to_string().contains("to be nullable"));
    }

    #[test]
    fn test_back_populates_must_point_back() {
        let mut registry = Registry::new();
        registry
            .define(team().relationship(
                "heroes",
                TypeRef::list(TypeRef::named("Hero")),
                RelationshipDecl::new().back_populates("sidekick"),
            ))
            .unwrap();
        registry.define(hero()).unwrap();
        assert!(registry.configure().is_err());
    }

    #[test]
    fn test_alias_precedence() {
        let spec = ModelSpec::plain("User")
            .config(
                ModelConfig::plain()
                    .alias_generator(AliasGenerator::CamelCase)
                    .populate_by_name(true),
            )
            .field("first_name", TypeRef::Text, FieldDecl::new())
            .field(
                "last_name",
                TypeRef::Text,
                FieldDecl::new().alias("surname").validation_alias("family"),
            )
            .field(
                "nick_name",
                TypeRef::Text,
                FieldDecl::new().serialization_alias("nick"),
            );
        let mut registry = Registry::new();
        registry.define(spec).unwrap();
        registry.configure().unwrap();
        let user = registry.descriptor("User").unwrap();

        let first = user.field("first_name").unwrap();
        assert_eq!(first.input_names, vec!["firstName", "first_name"]);
        assert_eq!(first.output_name, "firstName");

        let last = user.field("last_name").unwrap();
        assert_eq!(last.input_names[0], "family");
        assert_eq!(last.output_name, "surname");

        let nick = user.field("nick_name").unwrap();
        assert_eq!(nick.input_names[0], "nick_name");
        assert_eq!(nick.output_name, "nick");
    }

    #[test]
    fn test_sorted_tables_puts_parents_first() {
        let mut registry = Registry::new();
        registry.define(hero()).unwrap();
        registry.define(team()).unwrap();
        registry.configure().unwrap();
        let order: Vec<_> = registry
            .sorted_tables()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(order, vec!["Team", "Hero"]);
    }

    #[test]
    fn test_clear() {
        let mut registry = Registry::new();
        registry.define(team()).unwrap();
        registry.clear();
        assert!(!registry.contains_table("team"));
        assert!(matches!(
            registry.model("Team").unwrap_err(),
            Error::UnknownModel(_)
        ));
    }
}
