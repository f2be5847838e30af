//! In-memory storage engine.
//!
//! Tables are created from configured table models and hold rows keyed by
//! column name. The engine enforces what a SQLite database with
//! `PRAGMA foreign_keys = ON` would: NOT NULL, primary key uniqueness,
//! foreign key existence, and `ON DELETE` actions. Every mutation is
//! reported as a [`Change`] so a session can undo its transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dualmodel_core::{ColumnDescriptor, Error, ModelDescriptor, ReferentialAction, Result, Value};
use dualmodel_schema::{Registry, SqliteDdlGenerator};

/// One stored row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// A single mutation applied to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Inserted { table: String, row: Row },
    Updated { table: String, before: Row, after: Row },
    Deleted { table: String, row: Row },
}

#[derive(Debug, Clone)]
struct TableData {
    columns: Vec<ColumnDescriptor>,
    primary_key: Vec<String>,
    autoincrement: Option<String>,
    rows: Vec<Row>,
    last_id: i64,
}

impl TableData {
    fn new(model: &ModelDescriptor) -> Self {
        let columns: Vec<ColumnDescriptor> = model.columns().map(|(_, c)| c.clone()).collect();
        let primary_key = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let autoincrement = columns
            .iter()
            .find(|c| c.primary_key && c.autoincrement)
            .map(|c| c.name.clone());
        Self {
            columns,
            primary_key,
            autoincrement,
            rows: Vec::new(),
            last_id: 0,
        }
    }

    fn key_of(&self, row: &Row) -> Vec<Value> {
        self.primary_key
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or_default())
            .collect()
    }

    fn position(&self, key: &[Value]) -> Option<usize> {
        self.rows.iter().position(|row| self.key_of(row) == key)
    }
}

/// In-memory database.
#[derive(Debug, Default)]
pub struct Engine {
    tables: RwLock<HashMap<String, TableData>>,
}

impl Engine {
    /// An empty in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, TableData>> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, TableData>> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create every table of `registry` that does not exist yet.
    ///
    /// Returns the SQLite DDL describing the tables.
    ///
    /// # Errors
    ///
    /// [`Error::NotConfigured`] if the registry has unconfigured models.
    #[tracing::instrument(level = "debug", skip(self, registry))]
    pub fn create_all(&self, registry: &Registry) -> Result<Vec<String>> {
        if !registry.is_configured() {
            return Err(Error::NotConfigured(
                "configure the registry before creating tables".to_string(),
            ));
        }
        let mut tables = self.write();
        for model in registry.sorted_tables() {
            if let Some(name) = &model.table_name {
                tables
                    .entry(name.clone())
                    .or_insert_with(|| TableData::new(&model));
            }
        }
        tracing::debug!(tables = tables.len(), "Created tables");
        Ok(dualmodel_schema::create_all(registry, &SqliteDdlGenerator))
    }

    /// Drop every table of `registry`, children first.
    pub fn drop_all(&self, registry: &Registry) -> Vec<String> {
        let mut tables = self.write();
        for model in registry.sorted_tables() {
            if let Some(name) = &model.table_name {
                tables.remove(name);
            }
        }
        dualmodel_schema::drop_all(registry, &SqliteDdlGenerator)
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.read().contains_key(table)
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.read().get(table).map_or(0, |t| t.rows.len())
    }

    /// All rows of `table` in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Row of `table` with primary key `key`.
    pub fn find(&self, table: &str, key: &[Value]) -> Option<Row> {
        let tables = self.read();
        let data = tables.get(table)?;
        data.position(key).map(|idx| data.rows[idx].clone())
    }

    /// Rows of `table` whose `column` equals `value`.
    pub fn select_by(&self, table: &str, column: &str, value: &Value) -> Vec<Row> {
        if value.is_null() {
            return Vec::new();
        }
        self.read()
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| row.get(column) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert `row`, assigning the autoincrement key when it is null.
    ///
    /// Returns the stored row.
    pub(crate) fn insert(&self, table: &str, row: Row, changes: &mut Vec<Change>) -> Result<Row> {
        let mut tables = self.write();
        let stored = {
            let data = table_mut(&mut tables, table)?;
            let mut stored: Row = data
                .columns
                .iter()
                .map(|c| (c.name.clone(), row.get(&c.name).cloned().unwrap_or_default()))
                .collect();
            if let Some(col) = &data.autoincrement {
                match stored.get(col) {
                    Some(Value::BigInt(id)) => data.last_id = data.last_id.max(*id),
                    _ => {
                        data.last_id += 1;
                        stored.insert(col.clone(), Value::BigInt(data.last_id));
                    }
                }
            }
            check_not_null(table, &data.columns, &stored)?;
            if data.position(&data.key_of(&stored)).is_some() {
                return Err(Error::Storage(format!(
                    "UNIQUE constraint failed: {table}.{}",
                    data.primary_key.join(", ")
                )));
            }
            check_unique(table, data, &stored, None)?;
            stored
        };
        check_references(&tables, table, &stored)?;

        let data = table_mut(&mut tables, table)?;
        data.rows.push(stored.clone());
        tracing::trace!(table, "Inserted row");
        changes.push(Change::Inserted {
            table: table.to_string(),
            row: stored.clone(),
        });
        Ok(stored)
    }

    /// Replace the row with the same primary key as `row`.
    ///
    /// Returns `false` if no stored row differs from `row`.
    pub(crate) fn update(&self, table: &str, row: Row, changes: &mut Vec<Change>) -> Result<bool> {
        let mut tables = self.write();
        let (idx, before) = {
            let data = table_mut(&mut tables, table)?;
            let Some(idx) = data.position(&data.key_of(&row)) else {
                return Err(Error::Storage(format!("{table}: row to update does not exist")));
            };
            if data.rows[idx] == row {
                return Ok(false);
            }
            check_not_null(table, &data.columns, &row)?;
            check_unique(table, data, &row, Some(idx))?;
            (idx, data.rows[idx].clone())
        };
        check_references(&tables, table, &row)?;

        let data = table_mut(&mut tables, table)?;
        data.rows[idx] = row.clone();
        tracing::trace!(table, "Updated row");
        changes.push(Change::Updated {
            table: table.to_string(),
            before,
            after: row,
        });
        Ok(true)
    }

    /// Delete the row with primary key `key`, applying `ON DELETE` actions
    /// of referencing tables.
    ///
    /// Nothing is changed on error.
    pub(crate) fn delete(
        &self,
        table: &str,
        key: &[Value],
        changes: &mut Vec<Change>,
    ) -> Result<bool> {
        let mut tables = self.write();
        let mut local = Vec::new();
        match delete_row(&mut tables, table, key, &mut local) {
            Ok(found) => {
                changes.extend(local);
                Ok(found)
            }
            Err(err) => {
                revert_locked(&mut tables, local);
                Err(err)
            }
        }
    }

    /// Undo `changes`, most recent first.
    pub(crate) fn revert(&self, changes: Vec<Change>) {
        let mut tables = self.write();
        tracing::debug!(changes = changes.len(), "Reverting changes");
        revert_locked(&mut tables, changes);
    }
}

fn table_mut<'t>(
    tables: &'t mut HashMap<String, TableData>,
    table: &str,
) -> Result<&'t mut TableData> {
    tables
        .get_mut(table)
        .ok_or_else(|| Error::Storage(format!("no such table: {table}")))
}

fn check_not_null(table: &str, columns: &[ColumnDescriptor], row: &Row) -> Result<()> {
    for column in columns {
        if !column.nullable && row.get(&column.name).is_none_or(Value::is_null) {
            return Err(Error::Storage(format!(
                "NOT NULL constraint failed: {table}.{}",
                column.name
            )));
        }
    }
    Ok(())
}

fn check_unique(table: &str, data: &TableData, row: &Row, skip: Option<usize>) -> Result<()> {
    for column in data.columns.iter().filter(|c| c.unique && !c.primary_key) {
        let Some(value) = row.get(&column.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let clash = data
            .rows
            .iter()
            .enumerate()
            .any(|(i, other)| Some(i) != skip && other.get(&column.name) == Some(value));
        if clash {
            return Err(Error::Storage(format!(
                "UNIQUE constraint failed: {table}.{}",
                column.name
            )));
        }
    }
    Ok(())
}

fn check_references(tables: &HashMap<String, TableData>, table: &str, row: &Row) -> Result<()> {
    let Some(data) = tables.get(table) else {
        return Ok(());
    };
    for column in &data.columns {
        let Some(fk) = &column.foreign_key else {
            continue;
        };
        let Some(value) = row.get(&column.name).filter(|v| !v.is_null()) else {
            continue;
        };
        let exists = tables
            .get(&fk.table)
            .is_some_and(|parent| parent.rows.iter().any(|r| r.get(&fk.column) == Some(value)));
        if !exists {
            return Err(Error::Storage(format!(
                "FOREIGN KEY constraint failed: {table}.{} references {fk}",
                column.name
            )));
        }
    }
    Ok(())
}

/// Column of some table referencing `table`.
struct Referrer {
    table: String,
    column: String,
    referenced: String,
    action: ReferentialAction,
}

fn referrers(tables: &HashMap<String, TableData>, table: &str) -> Vec<Referrer> {
    let mut out = Vec::new();
    for (name, data) in tables {
        for column in &data.columns {
            if let Some(fk) = column.foreign_key.as_ref().filter(|fk| fk.table == table) {
                out.push(Referrer {
                    table: name.clone(),
                    column: column.name.clone(),
                    referenced: fk.column.clone(),
                    action: column.on_delete.unwrap_or_default(),
                });
            }
        }
    }
    out
}

fn delete_row(
    tables: &mut HashMap<String, TableData>,
    table: &str,
    key: &[Value],
    changes: &mut Vec<Change>,
) -> Result<bool> {
    let row = {
        let data = table_mut(tables, table)?;
        let Some(idx) = data.position(key) else {
            return Ok(false);
        };
        data.rows.remove(idx)
    };
    tracing::trace!(table, "Deleted row");
    changes.push(Change::Deleted {
        table: table.to_string(),
        row: row.clone(),
    });

    for referrer in referrers(tables, table) {
        let Some(value) = row.get(&referrer.referenced).filter(|v| !v.is_null()) else {
            continue;
        };
        let children: Vec<Row> = tables
            .get(&referrer.table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| r.get(&referrer.column) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for child in children {
            match referrer.action {
                ReferentialAction::Cascade => {
                    let child_key = table_mut(tables, &referrer.table)?.key_of(&child);
                    delete_row(tables, &referrer.table, &child_key, changes)?;
                }
                ReferentialAction::SetNull | ReferentialAction::SetDefault => {
                    let data = table_mut(tables, &referrer.table)?;
                    let key = data.key_of(&child);
                    if let Some(idx) = data.position(&key) {
                        let before = data.rows[idx].clone();
                        data.rows[idx].insert(referrer.column.clone(), Value::Null);
                        changes.push(Change::Updated {
                            table: referrer.table.clone(),
                            before,
                            after: data.rows[idx].clone(),
                        });
                    }
                }
                ReferentialAction::NoAction | ReferentialAction::Restrict => {
                    return Err(Error::Storage(format!(
                        "FOREIGN KEY constraint failed: {}.{} references {table}",
                        referrer.table, referrer.column
                    )));
                }
            }
        }
    }
    Ok(true)
}

fn revert_locked(tables: &mut HashMap<String, TableData>, changes: Vec<Change>) {
    for change in changes.into_iter().rev() {
        match change {
            Change::Inserted { table, row } => {
                if let Some(data) = tables.get_mut(&table) {
                    if let Some(idx) = data.position(&data.key_of(&row)) {
                        data.rows.remove(idx);
                    }
                }
            }
            Change::Updated {
                table,
                before,
                after,
            } => {
                if let Some(data) = tables.get_mut(&table) {
                    if let Some(idx) = data.position(&data.key_of(&after)) {
                        data.rows[idx] = before;
                    }
                }
            }
            Change::Deleted { table, row } => {
                if let Some(data) = tables.get_mut(&table) {
                    data.rows.push(row);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualmodel_core::{FieldDecl, TypeRef};
    use dualmodel_schema::ModelSpec;

    fn registry(on_delete: ReferentialAction) -> Registry {
        let mut registry = Registry::new();
        registry
            .define(
                ModelSpec::table("Team")
                    .field(
                        "id",
                        TypeRef::optional(TypeRef::Int),
                        FieldDecl::new().default(Value::Null).primary_key(true),
                    )
                    .field("name", TypeRef::Text, FieldDecl::new().unique(true)),
            )
            .unwrap();
        registry
            .define(
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
                        FieldDecl::new()
                            .default(Value::Null)
                            .foreign_key("team.id")
                            .ondelete(on_delete),
                    ),
            )
            .unwrap();
        registry.configure().unwrap();
        registry
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_all_returns_ddl() {
        let engine = Engine::memory();
        let ddl = engine.create_all(&registry(ReferentialAction::Cascade)).unwrap();
        assert!(engine.has_table("team"));
        assert!(engine.has_table("hero"));
        assert!(ddl[0].contains("\"team\""));
    }

    #[test]
    fn test_create_all_requires_configured_registry() {
        let mut registry = Registry::new();
        registry
            .define(ModelSpec::table("Solo").field(
                "id",
                TypeRef::Int,
                FieldDecl::new().primary_key(true),
            ))
            .unwrap();
        let err = Engine::memory().create_all(&registry).unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
    }

    #[test]
    fn test_autoincrement_and_constraints() {
        let engine = Engine::memory();
        engine.create_all(&registry(ReferentialAction::Cascade)).unwrap();
        let mut changes = Vec::new();

        let first = engine
            .insert("team", row(&[("name", "Preventers".into())]), &mut changes)
            .unwrap();
        assert_eq!(first["id"], Value::BigInt(1));
        let second = engine
            .insert("team", row(&[("name", "Z-Force".into())]), &mut changes)
            .unwrap();
        assert_eq!(second["id"], Value::BigInt(2));

        let err = engine
            .insert("team", row(&[("name", "Z-Force".into())]), &mut changes)
            .unwrap_err();
        assert!(err.to_string().contains("UNIQUE constraint failed: team.name"));

        let err = engine.insert("team", Row::new(), &mut changes).unwrap_err();
        assert!(err.to_string().contains("NOT NULL constraint failed: team.name"));

        let err = engine
            .insert(
                "hero",
                row(&[("name", "Rusty".into()), ("team_id", Value::BigInt(9))]),
                &mut changes,
            )
            .unwrap_err();
        assert!(err.to_string().contains("FOREIGN KEY constraint failed"));
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_on_delete_cascade_and_set_null() {
        for (action, heroes_left) in [
            (ReferentialAction::Cascade, 0),
            (ReferentialAction::SetNull, 1),
        ] {
            let engine = Engine::memory();
            engine.create_all(&registry(action)).unwrap();
            let mut changes = Vec::new();
            engine
                .insert("team", row(&[("name", "Preventers".into())]), &mut changes)
                .unwrap();
            engine
                .insert(
                    "hero",
                    row(&[("name", "Rusty".into()), ("team_id", Value::BigInt(1))]),
                    &mut changes,
                )
                .unwrap();

            assert!(engine.delete("team", &[Value::BigInt(1)], &mut changes).unwrap());
            assert_eq!(engine.row_count("hero"), heroes_left);
            if heroes_left == 1 {
                assert_eq!(engine.rows("hero")[0]["team_id"], Value::Null);
            }

            engine.revert(changes);
            assert_eq!(engine.row_count("team"), 0);
            assert_eq!(engine.row_count("hero"), 0);
        }
    }

    #[test]
    fn test_restricted_delete_changes_nothing() {
        let engine = Engine::memory();
        engine.create_all(&registry(ReferentialAction::Restrict)).unwrap();
        let mut changes = Vec::new();
        engine
            .insert("team", row(&[("name", "Preventers".into())]), &mut changes)
            .unwrap();
        engine
            .insert(
                "hero",
                row(&[("name", "Rusty".into()), ("team_id", Value::BigInt(1))]),
                &mut changes,
            )
            .unwrap();

        let before = changes.len();
        assert!(engine.delete("team", &[Value::BigInt(1)], &mut changes).is_err());
        assert_eq!(changes.len(), before);
        assert_eq!(engine.row_count("team"), 1);
    }

    #[test]
    fn test_select_by_and_update() {
        let engine = Engine::memory();
        engine.create_all(&registry(ReferentialAction::SetNull)).unwrap();
        let mut changes = Vec::new();
        let team = engine
            .insert("team", row(&[("name", "Preventers".into())]), &mut changes)
            .unwrap();

        let mut renamed = team.clone();
        renamed.insert("name".into(), "Avengers".into());
        assert!(engine.update("team", renamed.clone(), &mut changes).unwrap());
        assert!(!engine.update("team", renamed, &mut changes).unwrap());

        let found = engine.select_by("team", "name", &"Avengers".into());
        assert_eq!(found.len(), 1);
        assert!(engine.select_by("team", "name", &Value::Null).is_empty());
    }
}
