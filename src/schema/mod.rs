//! Dynamic GraphQL schema
//!
//! Every generated field shares one resolver function. It first looks the
//! field up on the parent value (rows and page envelopes produced by the
//! fetch engine already contain everything that was selected) and only then
//! asks the [`Dispatcher`] which CRUD resolver action the field names.

pub mod registry;

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::Value;
use async_graphql::dynamic::{
    Field, FieldFuture, FieldValue, InputValue, Object, ResolverContext, Schema, TypeRef,
};
use convert_case::{Case, Casing};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::catalog::{Catalog, ID_NAME};
use crate::dispatch::Dispatcher;
use crate::resolver::{self, Args, CrudResolver, RequestContext};
use crate::selection::FieldSelection;

pub use registry::TypeRegistry;

pub const QUERY_TYPE: &str = "Query";
pub const MUTATION_TYPE: &str = "Mutation";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Type '{0}' is defined twice")]
    DuplicateType(String),

    #[error("Root field '{0}' is defined twice")]
    DuplicateField(String),

    #[error("Unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("No resolvers registered")]
    Empty,

    #[error("Invalid schema: {0}")]
    Build(String),
}

/// Collects resolvers and type-name overrides, then generates the schema.
pub struct SchemaBuilder {
    catalog: Arc<Catalog>,
    resolvers: Vec<Arc<CrudResolver>>,
    output_names: Vec<(String, String)>,
    input_names: Vec<(String, String)>,
}

impl SchemaBuilder {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            resolvers: Vec::new(),
            output_names: Vec::new(),
            input_names: Vec::new(),
        }
    }

    pub fn resolver(mut self, resolver: Arc<CrudResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn resolvers<I>(mut self, resolvers: I) -> Self
    where
        I: IntoIterator<Item = Arc<CrudResolver>>,
    {
        self.resolvers.extend(resolvers);
        self
    }

    /// Name output types of `entity` `<name>Output` instead of the entity name.
    pub fn output_name(mut self, entity: &str, name: &str) -> Self {
        self.output_names.push((entity.to_string(), name.to_string()));
        self
    }

    /// Name input types of `entity` `<name>CreateInput`, ... instead of the entity name.
    pub fn input_name(mut self, entity: &str, name: &str) -> Self {
        self.input_names.push((entity.to_string(), name.to_string()));
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        if self.resolvers.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut registry = TypeRegistry::new(self.catalog.clone());
        for (entity, name) in &self.output_names {
            registry.set_output_name(entity, name)?;
        }
        for (entity, name) in &self.input_names {
            registry.set_input_name(entity, name)?;
        }

        let mut query = Object::new(QUERY_TYPE);
        let mut mutation = Object::new(MUTATION_TYPE);
        let mut root_fields: HashMap<String, &'static str> = HashMap::new();

        for resolver in &self.resolvers {
            let entity = resolver.entity().name.clone();

            for action in resolver.query_actions() {
                let name = root_field_name(resolver, action);
                if root_fields.insert(name.clone(), QUERY_TYPE).is_some() {
                    return Err(SchemaError::DuplicateField(name));
                }
                query = query.field(query_field(&mut registry, &entity, &name, action)?);
            }

            for action in resolver.mutation_actions() {
                let name = root_field_name(resolver, action);
                if root_fields.insert(name.clone(), MUTATION_TYPE).is_some() {
                    return Err(SchemaError::DuplicateField(name));
                }
                mutation = mutation.field(mutation_field(&mut registry, &entity, &name, action)?);
            }
        }

        let dispatcher = Arc::new(Dispatcher::new(self.resolvers.iter().cloned()));

        tracing::info!(
            resolvers = self.resolvers.len(),
            root_fields = root_fields.len(),
            "Generated GraphQL schema"
        );

        let mut schema = Schema::build(QUERY_TYPE, Some(MUTATION_TYPE), None)
            .register(query)
            .register(mutation);
        for ty in registry.into_types() {
            schema = schema.register(ty);
        }

        schema
            .data(dispatcher)
            .finish()
            .map_err(|e| SchemaError::Build(format!("{e:?}")))
    }
}

/// `article` + `manyTotalCount` -> `articleManyTotalCount`
pub fn root_field_name(resolver: &CrudResolver, action: &str) -> String {
    format!("{}{}", resolver.name(), action.to_case(Case::Pascal))
}

fn many_input_argument() -> InputValue {
    InputValue::new("manyInput", TypeRef::named(registry::MANY_INPUT))
}

fn query_field(
    registry: &mut TypeRegistry,
    entity: &str,
    name: &str,
    action: &str,
) -> Result<Field, SchemaError> {
    Ok(match action {
        resolver::ONE => Field::new(name, TypeRef::named(registry.output_type(entity)?), resolve_field)
            .argument(InputValue::new(ID_NAME, TypeRef::named_nn(TypeRef::ID))),
        resolver::MANY | resolver::COLLECTION => Field::new(
            name,
            TypeRef::named_nn(registry.many_output_type(entity)?),
            resolve_field,
        )
        .argument(many_input_argument()),
        _ => Field::new(name, TypeRef::named_nn(TypeRef::INT), resolve_field)
            .argument(many_input_argument()),
    })
}

fn mutation_field(
    registry: &mut TypeRegistry,
    entity: &str,
    name: &str,
    action: &str,
) -> Result<Field, SchemaError> {
    Ok(match action {
        resolver::CREATE => Field::new(name, TypeRef::named(registry.output_type(entity)?), resolve_field)
            .argument(InputValue::new(
                "input",
                TypeRef::named_nn(registry.create_input_type(entity)?),
            )),
        resolver::UPDATE => Field::new(name, TypeRef::named(registry.output_type(entity)?), resolve_field)
            .argument(InputValue::new(
                "input",
                TypeRef::named_nn(registry.update_input_type(entity)?),
            )),
        _ => Field::new(name, TypeRef::named_nn(TypeRef::INT), resolve_field).argument(
            InputValue::new(ID_NAME, TypeRef::named_nn_list_nn(TypeRef::ID)),
        ),
    })
}

/// Resolver shared by every generated field.
pub(crate) fn resolve_field(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move { Ok(resolve_value(&ctx).await?.map(FieldValue::value)) })
}

/// Like [`resolve_field`], for list-typed fields.
pub(crate) fn resolve_list_field(ctx: ResolverContext<'_>) -> FieldFuture<'_> {
    FieldFuture::new(async move {
        Ok(resolve_value(&ctx).await?.map(|value| match value {
            Value::List(items) => FieldValue::list(items.into_iter().map(FieldValue::value)),
            other => FieldValue::value(other),
        }))
    })
}

async fn resolve_value(ctx: &ResolverContext<'_>) -> async_graphql::Result<Option<Value>> {
    let field_name = ctx.field().name();

    if let Some(Value::Object(parent)) = ctx.parent_value.as_value() {
        if let Some(value) = parent.get(field_name) {
            return Ok(match value {
                Value::Null => None,
                value => Some(value.clone()),
            });
        }
    }

    let dispatcher = ctx.data::<Arc<Dispatcher>>()?;
    let Some(dispatch) = dispatcher
        .resolve_field(field_name)
        .filter(|d| d.resolver.exposes(&d.action))
    else {
        return Ok(None);
    };

    let request = ctx.data::<RequestContext>()?;

    let mut args = Args::new();
    for (name, value) in ctx.args.as_index_map() {
        args.insert(name.to_string(), value.clone().into_json()?);
    }

    let root = match ctx.parent_value.as_value() {
        Some(value) => value.clone().into_json()?,
        None => JsonValue::Null,
    };

    let selection = FieldSelection::from_field(ctx.field())
        .map_err(|e| e.into_graphql_error(request.debug))?;

    let value = dispatch
        .resolver
        .call(&dispatch.action, root, args, request, &selection)
        .await
        .map_err(|e| e.into_graphql_error(request.debug))?;

    Ok(match value {
        Value::Null => None,
        value => Some(value),
    })
}
