//! `CREATE TABLE` rendering for catalog entities and their junction tables

use std::collections::HashSet;

use super::{Catalog, EntityStructure, ID_NAME, Relation};

/// Column definition for schema generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// SQLite column type (TEXT, INTEGER, REAL)
    pub sql_type: &'static str,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub unique: bool,
    pub default: Option<String>,
    /// `REFERENCES ...` clause for foreign keys
    pub references: Option<String>,
}

impl ColumnDef {
    fn new(name: impl Into<String>, sql_type: &'static str) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            is_primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    /// Generate the column definition SQL
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);

        if self.is_primary_key {
            sql.push_str(" PRIMARY KEY");
        }

        if !self.nullable && !self.is_primary_key {
            sql.push_str(" NOT NULL");
        }

        if self.unique {
            sql.push_str(" UNIQUE");
        }

        if let Some(default) = &self.default {
            sql.push_str(&format!(" DEFAULT {}", default));
        }

        if let Some(references) = &self.references {
            sql.push(' ');
            sql.push_str(references);
        }

        sql
    }
}

/// A table to create: an entity table or a junction table.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Table-level constraints such as a composite primary key
    pub constraints: Vec<String>,
}

impl TableDef {
    /// Generate CREATE TABLE IF NOT EXISTS SQL
    pub fn create_table_sql(&self) -> String {
        let defs: Vec<String> = self
            .columns
            .iter()
            .map(ColumnDef::to_sql)
            .chain(self.constraints.iter().cloned())
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            self.name,
            defs.join(",\n  ")
        )
    }
}

/// Table definition of one entity, with one column per translation key for
/// translated columns and a nullable foreign key per to-one relation.
pub fn entity_table(entity: &EntityStructure, translations: &[String]) -> TableDef {
    let mut columns = vec![ColumnDef {
        is_primary_key: true,
        ..ColumnDef::new(ID_NAME, "TEXT")
    }];

    for column in entity.columns.values() {
        if column.translated {
            for key in translations {
                columns.push(ColumnDef {
                    nullable: true,
                    ..ColumnDef::new(
                        EntityStructure::translated_column(&column.name, key),
                        column.column_type.sql_type(),
                    )
                });
            }
        } else {
            columns.push(ColumnDef {
                nullable: column.nullable,
                unique: column.unique,
                default: column.default.clone(),
                ..ColumnDef::new(column.name.clone(), column.column_type.sql_type())
            });
        }
    }

    for (source_key, target) in entity.foreign_keys() {
        columns.push(ColumnDef {
            nullable: true,
            references: Some(format!("REFERENCES {target}({ID_NAME}) ON DELETE SET NULL")),
            ..ColumnDef::new(source_key, "TEXT")
        });
    }

    TableDef {
        name: entity.name.clone(),
        columns,
        constraints: Vec::new(),
    }
}

/// Junction tables of all many-to-many relations, each rendered once even
/// when both sides declare the relation.
pub fn junction_tables(catalog: &Catalog) -> Vec<TableDef> {
    let mut seen = HashSet::new();
    let mut tables = Vec::new();

    for entity in catalog.entities() {
        for relation in entity.relations.values() {
            let Relation::ManyToMany {
                target,
                via,
                source_via_key,
                target_via_key,
            } = relation
            else {
                continue;
            };
            if !seen.insert(via.clone()) {
                continue;
            }

            let key = |name: &str, points_at: &str| ColumnDef {
                references: Some(format!("REFERENCES {points_at}({ID_NAME}) ON DELETE CASCADE")),
                ..ColumnDef::new(name, "TEXT")
            };

            tables.push(TableDef {
                name: via.clone(),
                columns: vec![key(source_via_key, &entity.name), key(target_via_key, target)],
                constraints: vec![format!("PRIMARY KEY ({source_via_key}, {target_via_key})")],
            });
        }
    }

    tables
}

/// Every table the catalog needs, entity tables first.
pub fn catalog_tables(catalog: &Catalog) -> Vec<TableDef> {
    catalog
        .entities()
        .map(|entity| entity_table(entity, catalog.translations()))
        .chain(junction_tables(catalog))
        .collect()
}
