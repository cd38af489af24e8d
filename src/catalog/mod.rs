//! Relational structure catalog
//!
//! Per-entity metadata the fetch engine and the CRUD resolvers plan against:
//! scalar columns, relation descriptors and select modifiers. The catalog is
//! assembled once at startup with [`CatalogBuilder`] and is read-only afterwards.

pub mod ddl;

use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Primary key column present on every entity.
pub const ID_NAME: &str = "uuid";

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Storage type of a scalar column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
    DateTime,
    Date,
    Json,
}

impl ColumnType {
    /// SQLite storage class used in DDL
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnType::Int | ColumnType::Bool => "INTEGER",
            ColumnType::Float => "REAL",
            ColumnType::String | ColumnType::DateTime | ColumnType::Date | ColumnType::Json => {
                "TEXT"
            }
        }
    }

    /// Name of the GraphQL type the column is exposed as
    pub fn graphql_type(self) -> &'static str {
        match self {
            ColumnType::String => "String",
            ColumnType::Int => "Int",
            ColumnType::Float => "Float",
            ColumnType::Bool => "Boolean",
            ColumnType::DateTime => "DateTime",
            ColumnType::Date => "Date",
            ColumnType::Json => "JSON",
        }
    }
}

/// A scalar column of an entity.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    /// Raw SQL default expression (e.g. `0` or `(datetime('now'))`)
    pub default: Option<String>,
    /// Stored once per translation key as `<name>_<key>`
    pub translated: bool,
    pub unique: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
            translated: false,
            unique: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn translated(mut self) -> Self {
        self.translated = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Whether a create input may omit this column.
    pub fn is_optional(&self) -> bool {
        self.nullable || self.default.is_some() || self.translated
    }
}

/// How an entity reaches another entity.
///
/// The variant alone decides join direction and stitching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// This entity holds `source_key` pointing at the target's primary key.
    ToOne { target: String, source_key: String },
    /// The target holds `target_key` pointing back at this entity.
    ToMany { target: String, target_key: String },
    /// Rows are linked through the junction table `via`.
    ManyToMany {
        target: String,
        via: String,
        source_via_key: String,
        target_via_key: String,
    },
}

impl Relation {
    pub fn to_one(target: impl Into<String>, source_key: impl Into<String>) -> Self {
        Relation::ToOne {
            target: target.into(),
            source_key: source_key.into(),
        }
    }

    pub fn to_many(target: impl Into<String>, target_key: impl Into<String>) -> Self {
        Relation::ToMany {
            target: target.into(),
            target_key: target_key.into(),
        }
    }

    pub fn many_to_many(
        target: impl Into<String>,
        via: impl Into<String>,
        source_via_key: impl Into<String>,
        target_via_key: impl Into<String>,
    ) -> Self {
        Relation::ManyToMany {
            target: target.into(),
            via: via.into(),
            source_via_key: source_via_key.into(),
            target_via_key: target_via_key.into(),
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Relation::ToOne { target, .. }
            | Relation::ToMany { target, .. }
            | Relation::ManyToMany { target, .. } => target,
        }
    }

    /// True when the foreign key lives on the owning entity's table.
    pub fn is_key_holder(&self) -> bool {
        matches!(self, Relation::ToOne { .. })
    }

    /// True when the relation resolves to a set of rows.
    pub fn is_collection(&self) -> bool {
        !self.is_key_holder()
    }

    /// Join keys `(target column, owner column)` for direct relations:
    /// the child query joins `this.<target column> = relation.<owner column>`.
    pub fn join_keys(&self) -> Option<(&str, &str)> {
        match self {
            Relation::ToOne { source_key, .. } => Some((ID_NAME, source_key)),
            Relation::ToMany { target_key, .. } => Some((target_key, ID_NAME)),
            Relation::ManyToMany { .. } => None,
        }
    }
}

/// Metadata for one relational type. The entity name is also its table name.
#[derive(Debug, Clone)]
pub struct EntityStructure {
    pub name: String,
    pub columns: IndexMap<String, Column>,
    pub relations: IndexMap<String, Relation>,
    /// Computed columns: alias -> SQL expression over `this`
    pub select_modifiers: IndexMap<String, String>,
}

impl EntityStructure {
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            name: name.into(),
            columns: Vec::new(),
            relations: Vec::new(),
            select_modifiers: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn select_modifier(&self, alias: &str) -> Option<&str> {
        self.select_modifiers.get(alias).map(String::as_str)
    }

    /// Foreign key columns held by this entity's to-one relations.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.relations.values().filter_map(|relation| match relation {
            Relation::ToOne { source_key, target } => {
                Some((source_key.as_str(), target.as_str()))
            }
            _ => None,
        })
    }

    /// Whether `name` is a physical column of the table that is not translated.
    ///
    /// Covers the primary key, plain columns and to-one foreign keys.
    pub fn has_physical_column(&self, name: &str) -> bool {
        name == ID_NAME
            || self.columns.get(name).is_some_and(|c| !c.translated)
            || self.foreign_keys().any(|(key, _)| key == name)
    }

    /// Physical column storing `column` for the translation `key`.
    pub fn translated_column(column: &str, key: &str) -> String {
        format!("{column}_{key}")
    }
}

/// Builder collecting one entity's columns, relations and modifiers.
#[derive(Debug, Clone)]
pub struct EntityBuilder {
    name: String,
    columns: Vec<Column>,
    relations: Vec<(String, Relation)>,
    select_modifiers: Vec<(String, String)>,
}

impl EntityBuilder {
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.push((name.into(), relation));
        self
    }

    pub fn select_modifier(mut self, alias: impl Into<String>, expr: impl Into<String>) -> Self {
        self.select_modifiers.push((alias.into(), expr.into()));
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("'{0}' is not a valid SQL identifier")]
    InvalidIdentifier(String),

    #[error("Entity '{0}' is declared twice")]
    DuplicateEntity(String),

    #[error("Entity '{entity}' declares '{name}' twice")]
    DuplicateName { entity: String, name: String },

    #[error("Entity '{0}' must not declare the primary key column")]
    ReservedColumn(String),

    #[error("Relation '{entity}.{relation}' targets unknown entity '{target}'")]
    UnknownTarget {
        entity: String,
        relation: String,
        target: String,
    },

    #[error("Relation '{entity}.{relation}' needs column '{key}' on '{target}'")]
    MissingInverseKey {
        entity: String,
        relation: String,
        target: String,
        key: String,
    },

    #[error("At least one translation key is required")]
    NoTranslations,
}

/// Read-only set of entity structures plus the available translation keys.
#[derive(Debug, Clone)]
pub struct Catalog {
    entities: IndexMap<String, Arc<EntityStructure>>,
    translations: Vec<String>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EntityStructure>> {
        self.entities.get(name)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityStructure>> {
        self.entities.values()
    }

    pub fn translations(&self) -> &[String] {
        &self.translations
    }

    pub fn has_translation(&self, key: &str) -> bool {
        self.translations.iter().any(|t| t == key)
    }

    /// First declared translation key
    pub fn default_translation(&self) -> &str {
        &self.translations[0]
    }
}

#[derive(Debug, Clone, Default)]
pub struct CatalogBuilder {
    entities: Vec<EntityBuilder>,
    translations: Vec<String>,
}

fn check_identifier(name: &str) -> Result<(), CatalogError> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(CatalogError::InvalidIdentifier(name.to_string()))
    }
}

impl CatalogBuilder {
    pub fn translations<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.translations = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn entity(mut self, entity: EntityBuilder) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> Result<Catalog, CatalogError> {
        if self.translations.is_empty() {
            return Err(CatalogError::NoTranslations);
        }
        for key in &self.translations {
            check_identifier(key)?;
        }

        let mut entities: IndexMap<String, Arc<EntityStructure>> = IndexMap::new();
        for builder in self.entities {
            let structure = Self::build_entity(builder)?;
            if entities.contains_key(&structure.name) {
                return Err(CatalogError::DuplicateEntity(structure.name));
            }
            entities.insert(structure.name.clone(), Arc::new(structure));
        }

        for entity in entities.values() {
            for (name, relation) in &entity.relations {
                let Some(target) = entities.get(relation.target()) else {
                    return Err(CatalogError::UnknownTarget {
                        entity: entity.name.clone(),
                        relation: name.clone(),
                        target: relation.target().to_string(),
                    });
                };
                if let Relation::ToMany { target_key, .. } = relation {
                    if !target.has_physical_column(target_key) {
                        return Err(CatalogError::MissingInverseKey {
                            entity: entity.name.clone(),
                            relation: name.clone(),
                            target: target.name.clone(),
                            key: target_key.clone(),
                        });
                    }
                }
            }
        }

        tracing::debug!(
            entities = entities.len(),
            translations = ?self.translations,
            "Built structure catalog"
        );

        Ok(Catalog {
            entities,
            translations: self.translations,
        })
    }

    fn build_entity(builder: EntityBuilder) -> Result<EntityStructure, CatalogError> {
        check_identifier(&builder.name)?;

        let duplicate = |name: &str| CatalogError::DuplicateName {
            entity: builder.name.clone(),
            name: name.to_string(),
        };

        let mut columns = IndexMap::new();
        for column in builder.columns {
            check_identifier(&column.name)?;
            if column.name == ID_NAME {
                return Err(CatalogError::ReservedColumn(builder.name.clone()));
            }
            if columns.contains_key(&column.name) {
                return Err(duplicate(&column.name));
            }
            columns.insert(column.name.clone(), column);
        }

        let mut relations = IndexMap::new();
        for (name, relation) in builder.relations {
            check_identifier(&name)?;
            match &relation {
                Relation::ToOne { source_key, .. } => {
                    check_identifier(source_key)?;
                    if columns.contains_key(source_key) {
                        return Err(duplicate(source_key));
                    }
                }
                Relation::ToMany { target_key, .. } => check_identifier(target_key)?,
                Relation::ManyToMany {
                    via,
                    source_via_key,
                    target_via_key,
                    ..
                } => {
                    check_identifier(via)?;
                    check_identifier(source_via_key)?;
                    check_identifier(target_via_key)?;
                }
            }
            if name == ID_NAME || columns.contains_key(&name) || relations.contains_key(&name) {
                return Err(duplicate(&name));
            }
            relations.insert(name, relation);
        }

        let mut select_modifiers = IndexMap::new();
        for (alias, expr) in builder.select_modifiers {
            check_identifier(&alias)?;
            if columns.contains_key(&alias)
                || relations.contains_key(&alias)
                || select_modifiers.contains_key(&alias)
            {
                return Err(duplicate(&alias));
            }
            select_modifiers.insert(alias, expr);
        }

        Ok(EntityStructure {
            name: builder.name,
            columns,
            relations,
            select_modifiers,
        })
    }
}
