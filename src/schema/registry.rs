//! GraphQL type registry
//!
//! Maps logical type names to generated dynamic types. Entity types are built
//! lazily the first time something refers to them and are cached by name;
//! types currently under construction are tracked so mutually recursive
//! entities (`article.author.articles`) terminate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_graphql::dynamic::{Enum, Field, InputObject, InputValue, Object, Scalar, Type, TypeRef};
use async_graphql::{Name, Value};
use convert_case::{Case, Casing};
use indexmap::IndexMap;

use super::{SchemaError, resolve_field, resolve_list_field};
use crate::catalog::{Catalog, Column, EntityStructure, ID_NAME, Relation};
use crate::fetch::{DEFAULT_LIMIT, DEFAULT_PAGE, DEFAULT_SORT};

pub const JSON_SCALAR: &str = "JSON";
pub const DATE_TIME_SCALAR: &str = "DateTime";
pub const DATE_SCALAR: &str = "Date";
pub const MIXED_SCALAR: &str = "Mixed";
pub const ORDER_ENUM: &str = "Order";
pub const MANY_INPUT: &str = "ManyInput";
pub const RELATION_IDS_INPUT: &str = "RelationIDs";

/// Which input flavour of an entity to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    /// Required columns are non-null
    Create,
    /// `uuid` is required, everything else optional
    Update,
    /// Nested objects: everything optional
    Relation,
}

impl InputKind {
    fn suffix(self) -> &'static str {
        match self {
            InputKind::Create => "CreateInput",
            InputKind::Update => "UpdateInput",
            InputKind::Relation => "RelationInput",
        }
    }
}

pub struct TypeRegistry {
    catalog: Arc<Catalog>,
    types: IndexMap<String, Type>,
    pending: HashSet<String>,
    /// entity -> base name used for `<Base>Output`, `<Base>CreateInput`, ...
    output_names: HashMap<String, String>,
    input_names: HashMap<String, String>,
}

impl TypeRegistry {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let mut registry = Self {
            catalog,
            types: IndexMap::new(),
            pending: HashSet::new(),
            output_names: HashMap::new(),
            input_names: HashMap::new(),
        };
        registry.register_builtins();
        registry
    }

    /// Use `name` instead of the PascalCase entity name for output types.
    pub fn set_output_name(&mut self, entity: &str, name: &str) -> Result<(), SchemaError> {
        Self::set_name(&mut self.output_names, entity, name)
    }

    /// Use `name` instead of the PascalCase entity name for input types.
    pub fn set_input_name(&mut self, entity: &str, name: &str) -> Result<(), SchemaError> {
        Self::set_name(&mut self.input_names, entity, name)
    }

    fn set_name(
        names: &mut HashMap<String, String>,
        entity: &str,
        name: &str,
    ) -> Result<(), SchemaError> {
        if names.iter().any(|(e, n)| n == name && e != entity) {
            return Err(SchemaError::DuplicateType(name.to_string()));
        }
        names.insert(entity.to_string(), name.to_string());
        Ok(())
    }

    fn output_base(&self, entity: &str) -> String {
        self.output_names
            .get(entity)
            .cloned()
            .unwrap_or_else(|| entity.to_case(Case::Pascal))
    }

    fn input_base(&self, entity: &str) -> String {
        self.input_names
            .get(entity)
            .cloned()
            .unwrap_or_else(|| entity.to_case(Case::Pascal))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Hand every generated type over for schema registration.
    pub fn into_types(self) -> Vec<Type> {
        self.types.into_values().collect()
    }

    fn insert(&mut self, name: String, ty: Type) -> Result<(), SchemaError> {
        if self.types.contains_key(&name) {
            return Err(SchemaError::DuplicateType(name));
        }
        self.types.insert(name, ty);
        Ok(())
    }

    fn entity(&self, name: &str) -> Result<Arc<EntityStructure>, SchemaError> {
        self.catalog
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownEntity(name.to_string()))
    }

    fn register_builtins(&mut self) {
        for scalar in [JSON_SCALAR, DATE_TIME_SCALAR, DATE_SCALAR, MIXED_SCALAR] {
            self.types
                .insert(scalar.to_string(), Type::Scalar(Scalar::new(scalar)));
        }

        self.types.insert(
            ORDER_ENUM.to_string(),
            Type::Enum(Enum::new(ORDER_ENUM).item("ASC").item("DESC")),
        );

        let many_input = InputObject::new(MANY_INPUT)
            .field(
                InputValue::new("sort", TypeRef::named(TypeRef::STRING))
                    .default_value(Value::from(DEFAULT_SORT)),
            )
            .field(
                InputValue::new("order", TypeRef::named(ORDER_ENUM))
                    .default_value(Value::Enum(Name::new("ASC"))),
            )
            .field(
                InputValue::new("limit", TypeRef::named(TypeRef::INT))
                    .default_value(Value::from(DEFAULT_LIMIT)),
            )
            .field(
                InputValue::new("page", TypeRef::named(TypeRef::INT))
                    .default_value(Value::from(DEFAULT_PAGE)),
            )
            .field(InputValue::new("filters", TypeRef::named(JSON_SCALAR)));
        self.types
            .insert(MANY_INPUT.to_string(), Type::InputObject(many_input));

        let relation_ids = InputObject::new(RELATION_IDS_INPUT)
            .field(InputValue::new("add", TypeRef::named_nn_list(TypeRef::ID)))
            .field(InputValue::new("remove", TypeRef::named_nn_list(TypeRef::ID)))
            .field(InputValue::new("replace", TypeRef::named_nn_list(TypeRef::ID)));
        self.types.insert(
            RELATION_IDS_INPUT.to_string(),
            Type::InputObject(relation_ids),
        );
    }

    /// `<Entity>Output`, built on first use.
    pub fn output_type(&mut self, entity: &str) -> Result<String, SchemaError> {
        let name = format!("{}Output", self.output_base(entity));
        if self.types.contains_key(&name) || self.pending.contains(&name) {
            return Ok(name);
        }

        let structure = self.entity(entity)?;
        self.pending.insert(name.clone());

        let mut object = Object::new(&name)
            .description(format!("Generated output of '{}'", structure.name))
            .field(Field::new(ID_NAME, TypeRef::named_nn(TypeRef::ID), resolve_field));

        for column in structure.columns.values() {
            object = object.field(Field::new(
                &column.name,
                column_type_ref(column, !column.nullable && !column.translated),
                resolve_field,
            ));
        }

        for (relation_name, relation) in &structure.relations {
            let target = self.output_type(relation.target())?;
            object = if relation.is_collection() {
                object.field(Field::new(
                    relation_name,
                    TypeRef::named_nn_list_nn(target),
                    resolve_list_field,
                ))
            } else {
                object.field(Field::new(
                    relation_name,
                    TypeRef::named(target),
                    resolve_field,
                ))
            };
        }

        for alias in structure.select_modifiers.keys() {
            object = object.field(Field::new(
                alias,
                TypeRef::named(MIXED_SCALAR),
                resolve_field,
            ));
        }

        self.pending.remove(&name);
        self.insert(name.clone(), Type::Object(object))?;
        Ok(name)
    }

    /// `<Entity>ManyOutput { data, onPageCount }`.
    pub fn many_output_type(&mut self, entity: &str) -> Result<String, SchemaError> {
        let name = format!("{}ManyOutput", self.output_base(entity));
        if self.types.contains_key(&name) {
            return Ok(name);
        }

        let row = self.output_type(entity)?;
        let object = Object::new(&name)
            .field(Field::new(
                "data",
                TypeRef::named_nn_list_nn(row),
                resolve_list_field,
            ))
            .field(Field::new(
                "onPageCount",
                TypeRef::named_nn(TypeRef::INT),
                resolve_field,
            ));

        self.insert(name.clone(), Type::Object(object))?;
        Ok(name)
    }

    pub fn create_input_type(&mut self, entity: &str) -> Result<String, SchemaError> {
        self.input_type(entity, InputKind::Create)
    }

    pub fn update_input_type(&mut self, entity: &str) -> Result<String, SchemaError> {
        self.input_type(entity, InputKind::Update)
    }

    fn input_type(&mut self, entity: &str, kind: InputKind) -> Result<String, SchemaError> {
        let name = format!("{}{}", self.input_base(entity), kind.suffix());
        if self.types.contains_key(&name) || self.pending.contains(&name) {
            return Ok(name);
        }

        let structure = self.entity(entity)?;
        self.pending.insert(name.clone());

        let uuid_type = if kind == InputKind::Update {
            TypeRef::named_nn(TypeRef::ID)
        } else {
            TypeRef::named(TypeRef::ID)
        };
        let mut input = InputObject::new(&name).field(InputValue::new(ID_NAME, uuid_type));

        for column in structure.columns.values() {
            let required = kind == InputKind::Create && !column.is_optional();
            input = input.field(InputValue::new(
                &column.name,
                column_type_ref(column, required),
            ));
        }

        for (relation_name, relation) in &structure.relations {
            let nested = self.input_type(relation.target(), InputKind::Relation)?;
            input = match relation {
                Relation::ToOne { .. } => input
                    .field(InputValue::new(
                        format!("{relation_name}ID"),
                        TypeRef::named(TypeRef::ID),
                    ))
                    .field(InputValue::new(
                        format!("{relation_name}OBJ"),
                        TypeRef::named(nested),
                    )),
                _ => input
                    .field(InputValue::new(
                        format!("{relation_name}IDs"),
                        TypeRef::named(RELATION_IDS_INPUT),
                    ))
                    .field(InputValue::new(
                        format!("{relation_name}OBJs"),
                        TypeRef::named_nn_list(nested),
                    )),
            };
        }

        self.pending.remove(&name);
        self.insert(name.clone(), Type::InputObject(input))?;
        Ok(name)
    }
}

fn column_type_ref(column: &Column, required: bool) -> TypeRef {
    let name = column.column_type.graphql_type();
    if required {
        TypeRef::named_nn(name)
    } else {
        TypeRef::named(name)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::catalog::{ColumnType, Relation};

    fn catalog() -> Arc<Catalog> {
        Arc::new(
            Catalog::builder()
                .translations(["en"])
                .entity(
                    EntityStructure::builder("article")
                        .column(Column::new("title", ColumnType::String))
                        .relation("author", Relation::to_one("author", "fk_author")),
                )
                .entity(
                    EntityStructure::builder("author")
                        .column(Column::new("name", ColumnType::String))
                        .relation("articles", Relation::to_many("article", "fk_author")),
                )
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_recursive_outputs_are_built_once() {
        let mut registry = TypeRegistry::new(catalog());
        assert_eq!(registry.output_type("article").unwrap(), "ArticleOutput");
        assert!(registry.contains("AuthorOutput"));
        assert_eq!(registry.output_type("author").unwrap(), "AuthorOutput");
        assert_eq!(
            registry.many_output_type("author").unwrap(),
            "AuthorManyOutput"
        );
        assert_eq!(
            registry.type_names().filter(|n| n.ends_with("Output")).count(),
            3
        );
    }

    #[test]
    fn test_input_types_reference_relation_inputs() {
        let mut registry = TypeRegistry::new(catalog());
        assert_eq!(
            registry.create_input_type("article").unwrap(),
            "ArticleCreateInput"
        );
        assert_eq!(
            registry.update_input_type("article").unwrap(),
            "ArticleUpdateInput"
        );
        assert!(registry.contains("AuthorRelationInput"));
        assert!(registry.contains("ArticleRelationInput"));
    }

    #[test]
    fn test_name_overrides() {
        let mut registry = TypeRegistry::new(catalog());
        registry.set_output_name("article", "Post").unwrap();
        assert_eq!(registry.output_type("article").unwrap(), "PostOutput");

        assert_matches!(
            registry.set_output_name("author", "Post"),
            Err(SchemaError::DuplicateType(_))
        );
        assert_matches!(
            registry.output_type("editor"),
            Err(SchemaError::UnknownEntity(_))
        );
    }
}
