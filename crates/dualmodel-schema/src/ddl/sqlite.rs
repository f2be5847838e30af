//! SQLite DDL generator.
//!
//! Unique constraints are inlined on their column; indexes declared with
//! `index` become separate `CREATE INDEX` statements named
//! `ix_<table>_<column>`.

use dualmodel_core::{ModelDescriptor, ReferentialAction};

use super::{DdlGenerator, column_definition, quote_identifier};

/// DDL generator for SQLite.
pub struct SqliteDdlGenerator;

impl DdlGenerator for SqliteDdlGenerator {
    fn dialect(&self) -> &'static str {
        "sqlite"
    }

    fn create_table(&self, model: &ModelDescriptor) -> Vec<String> {
        let Some(table) = model.table_name.as_deref() else {
            return Vec::new();
        };
        tracing::debug!(dialect = "sqlite", table, "Generating DDL");

        let columns: Vec<_> = model.columns().map(|(_, c)| c).collect();
        let pk: Vec<_> = columns.iter().filter(|c| c.primary_key).collect();
        let inline_pk = pk.len() == 1;

        let mut parts: Vec<String> = columns
            .iter()
            .map(|c| column_definition(c, inline_pk))
            .collect();
        if pk.len() > 1 {
            let cols: Vec<String> = pk.iter().map(|c| quote_identifier(&c.name)).collect();
            parts.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }
        for column in &columns {
            let Some(fk) = &column.foreign_key else {
                continue;
            };
            let mut clause = format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                quote_identifier(&column.name),
                quote_identifier(&fk.table),
                quote_identifier(&fk.column)
            );
            if let Some(action) = column.on_delete {
                if action != ReferentialAction::NoAction {
                    clause.push_str(" ON DELETE ");
                    clause.push_str(action.as_sql());
                }
            }
            parts.push(clause);
        }
        parts.extend(model.config.table_args.iter().cloned());

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            quote_identifier(table),
            parts.join(",\n  ")
        )];
        for column in columns.iter().filter(|c| c.index && !c.primary_key) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                quote_identifier(&format!("ix_{table}_{}", column.name)),
                quote_identifier(table),
                quote_identifier(&column.name)
            ));
        }

        for stmt in &statements {
            tracing::trace!(sql = %stmt, "Generated SQLite DDL statement");
        }
        statements
    }

    fn drop_table(&self, table: &str) -> Vec<String> {
        vec![format!("DROP TABLE IF EXISTS {}", quote_identifier(table))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl;
    use crate::registry::Registry;
    use crate::spec::ModelSpec;
    use dualmodel_core::{FieldDecl, ModelConfig, TypeRef, Value};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .define(
                ModelSpec::table("Team")
                    .field(
                        "id",
                        TypeRef::optional(TypeRef::Int),
                        FieldDecl::new().default(Value::Null).primary_key(true),
                    )
                    .field("name", TypeRef::Text, FieldDecl::new().index(true)),
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
                    .field("name", TypeRef::Text, FieldDecl::new().max_length(50))
                    .field(
                        "money",
                        TypeRef::Decimal,
                        FieldDecl::new().max_digits(5).decimal_places(3),
                    )
                    .field(
                        "team_id",
                        TypeRef::optional(TypeRef::Int),
                        FieldDecl::new()
                            .default(Value::Null)
                            .foreign_key("team.id")
                            .ondelete(ReferentialAction::SetNull),
                    ),
            )
            .unwrap();
        registry.configure().unwrap();
        registry
    }

    #[test]
    fn test_create_table() {
        let registry = registry();
        let hero = registry.descriptor("Hero").unwrap();
        let stmts = SqliteDdlGenerator.create_table(&hero);

        assert_eq!(stmts.len(), 1);
        let sql = &stmts[0];
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"hero\""));
        assert!(sql.contains("\"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT"));
        assert!(sql.contains("\"name\" VARCHAR(50) NOT NULL"));
        assert!(sql.contains("\"money\" NUMERIC(5, 3) NOT NULL"));
        assert!(sql.contains(
            "FOREIGN KEY (\"team_id\") REFERENCES \"team\"(\"id\") ON DELETE SET NULL"
        ));
    }

    #[test]
    fn test_create_table_emits_indexes() {
        let registry = registry();
        let team = registry.descriptor("Team").unwrap();
        let stmts = SqliteDdlGenerator.create_table(&team);

        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[1],
            "CREATE INDEX IF NOT EXISTS \"ix_team_name\" ON \"team\"(\"name\")"
        );
    }

    #[test]
    fn test_composite_primary_key_and_table_args() {
        let mut registry = Registry::new();
        registry
            .define(
                ModelSpec::table("HeroPowerLink")
                    .config(ModelConfig::plain().table_arg("UNIQUE (hero_id, power_id)"))
                    .field(
                        "hero_id",
                        TypeRef::Int,
                        FieldDecl::new().primary_key(true),
                    )
                    .field(
                        "power_id",
                        TypeRef::Int,
                        FieldDecl::new().primary_key(true),
                    ),
            )
            .unwrap();
        registry.configure().unwrap();
        let link = registry.descriptor("HeroPowerLink").unwrap();
        let sql = &SqliteDdlGenerator.create_table(&link)[0];
        assert!(sql.contains("PRIMARY KEY (\"hero_id\", \"power_id\")"));
        assert!(sql.contains("UNIQUE (hero_id, power_id)"));
        assert!(!sql.contains("AUTOINCREMENT"));
    }

    #[test]
    fn test_create_all_orders_parents_first() {
        let registry = registry();
        let stmts = ddl::create_all(&registry, &SqliteDdlGenerator);
        assert!(stmts[0].contains("\"team\""));
        assert!(stmts.last().unwrap().contains("\"hero\""));

        let drops = ddl::drop_all(&registry, &SqliteDdlGenerator);
        assert_eq!(drops, vec!["DROP TABLE IF EXISTS \"hero\"", "DROP TABLE IF EXISTS \"team\""]);
    }

    #[test]
    fn test_dialect() {
        assert_eq!(SqliteDdlGenerator.dialect(), "sqlite");
    }
}
