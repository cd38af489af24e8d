//! GraphQL request service
//!
//! Every request runs inside one database transaction. The transaction is
//! committed when the response carries no errors and rolled back otherwise,
//! so a failing mutation never leaves partial writes behind.

use std::sync::Arc;

use async_graphql::dynamic::Schema;
use async_graphql::http::GraphiQLSource;
use async_graphql::{Request, Response, ServerError};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::header::{ACCEPT, ACCEPT_LANGUAGE};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::db::Database;
use crate::error::INTERNAL_ERROR_MESSAGE;
use crate::resolver::RequestContext;

pub struct GraphqlService {
    schema: Schema,
    db: Database,
    catalog: Arc<Catalog>,
    debug: bool,
    default_translation: String,
}

impl GraphqlService {
    pub fn new(schema: Schema, db: Database, catalog: Arc<Catalog>, config: &Config) -> Self {
        let default_translation = if catalog.has_translation(&config.default_translation) {
            config.default_translation.clone()
        } else {
            catalog.default_translation().to_string()
        };

        Self {
            schema,
            db,
            catalog,
            debug: config.debug_mode,
            default_translation,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Pick the translation key for an `Accept-Language` header value.
    ///
    /// The first language whose primary subtag is a catalog translation wins;
    /// quality weights are not ranked.
    pub fn translation_for(&self, accept_language: Option<&str>) -> String {
        accept_language
            .into_iter()
            .flat_map(|header| header.split(','))
            .filter_map(|part| part.split(';').next())
            .map(|tag| tag.trim().split('-').next().unwrap_or("").to_ascii_lowercase())
            .find(|key| self.catalog.has_translation(key))
            .unwrap_or_else(|| self.default_translation.clone())
    }

    /// Execute one request inside its own transaction.
    pub async fn execute(&self, request: Request, translation_key: String) -> Response {
        let transaction = match self.db.begin().await {
            Ok(transaction) => transaction,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open request transaction");
                return internal_error_response();
            }
        };

        let ctx = RequestContext {
            debug: self.debug,
            translation_key,
            transaction: transaction.clone(),
        };

        let response = self.schema.execute(request.data(ctx)).await;

        if response.is_ok() {
            if let Err(e) = transaction.commit().await {
                tracing::error!(error = %e, "Failed to commit request transaction");
                return internal_error_response();
            }
        } else {
            tracing::debug!(errors = response.errors.len(), "Rolling back request transaction");
            if let Err(e) = transaction.rollback().await {
                tracing::error!(error = %e, "Failed to roll back request transaction");
            }
        }

        response
    }

    /// `/graphql` (GraphiQL on GET, queries on POST) and `/health`.
    pub fn router() -> Router<Arc<GraphqlService>> {
        Router::new()
            .route("/graphql", get(graphiql).post(graphql_handler))
            .route("/health", get(health))
    }
}

fn internal_error_response() -> Response {
    Response::from_errors(vec![ServerError::new(INTERNAL_ERROR_MESSAGE, None)])
}

async fn graphiql(headers: HeaderMap) -> impl IntoResponse {
    let accepts_html = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false);

    if accepts_html {
        axum::response::Html(GraphiQLSource::build().endpoint("/graphql").finish()).into_response()
    } else {
        (
            axum::http::StatusCode::METHOD_NOT_ALLOWED,
            Json(serde_json::json!({
                "error": "GET requests are not supported for GraphQL queries. Use POST with Content-Type: application/json"
            })),
        )
            .into_response()
    }
}

async fn graphql_handler(
    State(service): State<Arc<GraphqlService>>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> GraphQLResponse {
    let accept_language = headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok());
    let translation = service.translation_for(accept_language);
    service.execute(req.into_inner(), translation).await.into()
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: bool,
}

async fn health(State(service): State<Arc<GraphqlService>>) -> Json<HealthResponse> {
    let database = sqlx::query("SELECT 1")
        .fetch_one(service.db.pool())
        .await
        .is_ok();

    Json(HealthResponse {
        status: if database { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}
