//! DDL generation for configured table models.

mod sqlite;

pub use sqlite::SqliteDdlGenerator;

use dualmodel_core::{ColumnDescriptor, ModelDescriptor};

use crate::registry::Registry;

/// Generates dialect-specific DDL statements.
pub trait DdlGenerator {
    /// Dialect name.
    fn dialect(&self) -> &'static str;

    /// `CREATE TABLE` plus any `CREATE INDEX` statements for `model`.
    fn create_table(&self, model: &ModelDescriptor) -> Vec<String>;

    /// `DROP TABLE` for `table`.
    fn drop_table(&self, table: &str) -> Vec<String>;
}

/// Statements creating every configured table, parents first.
pub fn create_all(registry: &Registry, generator: &dyn DdlGenerator) -> Vec<String> {
    registry
        .sorted_tables()
        .iter()
        .flat_map(|model| generator.create_table(model))
        .collect()
}

/// Statements dropping every configured table, children first.
pub fn drop_all(registry: &Registry, generator: &dyn DdlGenerator) -> Vec<String> {
    registry
        .sorted_tables()
        .iter()
        .rev()
        .filter_map(|model| model.table_name.as_deref())
        .flat_map(|table| generator.drop_table(table))
        .collect()
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column definition as it appears inside `CREATE TABLE`.
///
/// `inline_pk` is set when the table has a single primary key column.
pub(crate) fn column_definition(column: &ColumnDescriptor, inline_pk: bool) -> String {
    let mut sql = format!(
        "{} {}",
        quote_identifier(&column.name),
        column.sql_type.sql_name()
    );
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if inline_pk && column.primary_key {
        sql.push_str(" PRIMARY KEY");
        if column.autoincrement {
            sql.push_str(" AUTOINCREMENT");
        }
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.server_default {
        sql.push_str(" DEFAULT ");
        sql.push_str(default);
    }
    for clause in &column.constraints {
        sql.push(' ');
        sql.push_str(clause);
    }
    sql
}
