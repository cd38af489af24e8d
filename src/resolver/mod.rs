//! CRUD resolvers
//!
//! One [`CrudResolver`] per entity answers the generated root fields:
//! `one`, `many`, `manyTotalCount`, `create`, `update`, `delete`, and
//! `collection` / `collectionTotalCount` when a collection source is set.

pub mod hooks;
pub mod input;

use std::sync::Arc;

use async_graphql::Value;
use convert_case::{Case, Casing};
use serde_json::Value as JsonValue;

use crate::catalog::{EntityStructure, ID_NAME};
use crate::db::RequestTransaction;
use crate::error::{ApiError, ApiResult};
use crate::fetch::{FetchEngine, FetchResult, ManyParams};
use crate::orm::{EntityQuery, writer};
use crate::selection::FieldSelection;

pub use hooks::{Action, Args, Interceptor, Interceptors};

pub const ONE: &str = "one";
pub const MANY: &str = "many";
pub const MANY_TOTAL_COUNT: &str = "manyTotalCount";
pub const COLLECTION: &str = "collection";
pub const COLLECTION_TOTAL_COUNT: &str = "collectionTotalCount";
pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";

const INVALID_VALUES: &str = "Invalid values!";
const INVALID_RELATION_VALUES: &str = "Invalid values in relations!";

/// Per-request data every resolver call receives.
#[derive(Clone)]
pub struct RequestContext {
    pub debug: bool,
    pub translation_key: String,
    pub transaction: RequestTransaction,
}

/// Customizes the base query of `collection` actions.
pub type CollectionSource = Arc<dyn Fn(EntityQuery) -> EntityQuery + Send + Sync>;

pub struct CrudResolver {
    entity: Arc<EntityStructure>,
    engine: Arc<FetchEngine>,
    interceptors: Interceptors,
    collection: Option<CollectionSource>,
}

impl CrudResolver {
    pub fn new(engine: Arc<FetchEngine>, entity: &str) -> ApiResult<Self> {
        let entity = engine
            .catalog()
            .get(entity)
            .cloned()
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Unknown entity '{entity}'")))?;

        Ok(Self {
            entity,
            engine,
            interceptors: Interceptors::default(),
            collection: None,
        })
    }

    /// Expose `collection` actions rooted on a customized query.
    pub fn with_collection<F>(mut self, source: F) -> Self
    where
        F: Fn(EntityQuery) -> EntityQuery + Send + Sync + 'static,
    {
        self.collection = Some(Arc::new(source));
        self
    }

    pub fn intercept<I>(mut self, action: Action, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.register(action, Arc::new(interceptor));
        self
    }

    pub fn entity(&self) -> &Arc<EntityStructure> {
        &self.entity
    }

    /// Field-name prefix of the generated root fields (`blogPost`).
    pub fn name(&self) -> String {
        self.entity.name.to_case(Case::Camel)
    }

    /// Registry key (`BlogPostResolver`).
    pub fn identifier(&self) -> String {
        format!("{}Resolver", self.entity.name.to_case(Case::Pascal))
    }

    pub fn has_collection(&self) -> bool {
        self.collection.is_some()
    }

    /// Actions exposed as query fields.
    pub fn query_actions(&self) -> Vec<&'static str> {
        let mut actions = vec![ONE, MANY, MANY_TOTAL_COUNT];
        if self.has_collection() {
            actions.extend([COLLECTION, COLLECTION_TOTAL_COUNT]);
        }
        actions
    }

    /// Actions exposed as mutation fields.
    pub fn mutation_actions(&self) -> Vec<&'static str> {
        vec![CREATE, UPDATE, DELETE]
    }

    pub fn exposes(&self, action: &str) -> bool {
        self.query_actions().contains(&action) || self.mutation_actions().contains(&action)
    }

    /// Run `action` with the arguments of the GraphQL field.
    pub async fn call(
        &self,
        action: &str,
        root: JsonValue,
        args: Args,
        ctx: &RequestContext,
        selection: &FieldSelection,
    ) -> ApiResult<Value> {
        let slot = Action::for_action(action)
            .ok_or_else(|| ApiError::bad_request(format!("Unknown action '{action}'")))?;
        if matches!(action, COLLECTION | COLLECTION_TOTAL_COUNT) && self.collection.is_none() {
            return Err(ApiError::bad_request(format!("Unknown action '{action}'")));
        }

        let (_root, args) = self.interceptors.run(slot, root, args, ctx)?;

        tracing::debug!(entity = %self.entity.name, action, "Resolving action");

        match action {
            ONE => self.one(&args, ctx, selection).await,
            MANY => {
                let query = self.engine.query(&self.entity.name)?;
                self.many(query, &args, ctx, selection).await
            }
            MANY_TOTAL_COUNT => {
                let query = self.engine.query(&self.entity.name)?;
                self.total_count(query, &args, ctx).await
            }
            COLLECTION => {
                let query = self.collection_query()?;
                self.many(query, &args, ctx, selection).await
            }
            COLLECTION_TOTAL_COUNT => {
                let query = self.collection_query()?;
                self.total_count(query, &args, ctx).await
            }
            CREATE => self.save(&args, ctx, selection, false).await,
            UPDATE => self.save(&args, ctx, selection, true).await,
            _ => self.delete(&args, ctx).await,
        }
    }

    fn collection_query(&self) -> ApiResult<EntityQuery> {
        let query = self.engine.query(&self.entity.name)?;
        Ok(match &self.collection {
            Some(source) => source(query),
            None => query,
        })
    }

    async fn one(
        &self,
        args: &Args,
        ctx: &RequestContext,
        selection: &FieldSelection,
    ) -> ApiResult<Value> {
        let uuid = match args.get(ID_NAME) {
            Some(JsonValue::String(uuid)) => uuid.clone(),
            _ => return Err(ApiError::bad_request("Missing uuid")),
        };
        self.fetch_one(&uuid, ctx, selection).await
    }

    async fn fetch_one(
        &self,
        uuid: &str,
        ctx: &RequestContext,
        selection: &FieldSelection,
    ) -> ApiResult<Value> {
        let query = self
            .engine
            .query(&self.entity.name)?
            .where_eq(&format!("this.{ID_NAME}"), uuid)
            .limit(1);

        let mut conn = ctx.transaction.lock().await?;
        let result = self
            .engine
            .fetch_result(&mut conn, query, selection, None, &ctx.translation_key)
            .await?;

        Ok(result
            .into_first()
            .map(|row| row.to_graphql())
            .unwrap_or(Value::Null))
    }

    async fn many(
        &self,
        query: EntityQuery,
        args: &Args,
        ctx: &RequestContext,
        selection: &FieldSelection,
    ) -> ApiResult<Value> {
        let params = many_params(args)?;
        let mut conn = ctx.transaction.lock().await?;
        let result = self
            .engine
            .fetch_result(&mut conn, query, selection, Some(&params), &ctx.translation_key)
            .await?;

        Ok(match result {
            // Only meta fields such as __typename were selected.
            FetchResult::Rows(_) => Value::Object(Default::default()),
            page => page.to_graphql(),
        })
    }

    async fn total_count(
        &self,
        query: EntityQuery,
        args: &Args,
        ctx: &RequestContext,
    ) -> ApiResult<Value> {
        let params = many_params(args)?;
        let mut conn = ctx.transaction.lock().await?;
        let count = self
            .engine
            .count(&mut conn, query, Some(&params), &ctx.translation_key)
            .await?;
        Ok(Value::from(count))
    }

    async fn save(
        &self,
        args: &Args,
        ctx: &RequestContext,
        selection: &FieldSelection,
        update: bool,
    ) -> ApiResult<Value> {
        let input = match args.get("input") {
            Some(JsonValue::Object(input)) => input.clone(),
            _ => return Err(ApiError::bad_request("Missing input")),
        };

        let uuid = {
            let mut conn = ctx.transaction.lock().await?;
            input::persist(
                &mut conn,
                self.engine.catalog(),
                &self.entity,
                input,
                &ctx.translation_key,
                update,
            )
            .await
            .map_err(|e| classify_write_error(e, ctx.debug))?
        };

        self.fetch_one(&uuid, ctx, selection).await
    }

    async fn delete(&self, args: &Args, ctx: &RequestContext) -> ApiResult<Value> {
        let uuids: Vec<String> = match args.get(ID_NAME) {
            Some(JsonValue::String(uuid)) => vec![uuid.clone()],
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ApiError::bad_request("Invalid uuid"))
                })
                .collect::<ApiResult<_>>()?,
            _ => return Err(ApiError::bad_request("Missing uuid")),
        };

        let mut conn = ctx.transaction.lock().await?;
        let deleted = writer::delete_rows(&mut conn, &self.entity, &uuids)
            .await
            .map_err(|e| classify_write_error(e, ctx.debug))?;
        Ok(Value::from(deleted as i64))
    }
}

fn many_params(args: &Args) -> ApiResult<ManyParams> {
    match args.get("manyInput") {
        None | Some(JsonValue::Null) => Ok(ManyParams::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| ApiError::bad_request(format!("Invalid manyInput: {e}"))),
    }
}

/// Turn persistence failures of a write into client errors.
///
/// Integrity violations become "Invalid values in relations!", any other
/// database or internal failure "Invalid values!". Client errors and debug
/// mode keep the original error.
pub fn classify_write_error(err: ApiError, debug: bool) -> ApiError {
    if err.is_client_safe() || debug {
        return err;
    }

    let integrity = match &err {
        ApiError::Database(sqlx::Error::Database(db)) => matches!(
            db.kind(),
            sqlx::error::ErrorKind::UniqueViolation
                | sqlx::error::ErrorKind::ForeignKeyViolation
                | sqlx::error::ErrorKind::NotNullViolation
                | sqlx::error::ErrorKind::CheckViolation
        ),
        _ => false,
    };

    tracing::warn!(error = %err, integrity, "Write rejected");

    if integrity {
        ApiError::bad_request(INVALID_RELATION_VALUES)
    } else {
        ApiError::bad_request(INVALID_VALUES)
    }
}
