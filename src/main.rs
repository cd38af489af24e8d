//! relgraph server
//!
//! Serves the sample blog catalog over GraphQL at /graphql.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relgraph::app::build_app;
use relgraph::config::Config;
use relgraph::db::Database;
use relgraph::db::schema_sync::sync_catalog_schema;
use relgraph::demo::blog_catalog;
use relgraph::fetch::FetchEngine;
use relgraph::resolver::CrudResolver;
use relgraph::schema::SchemaBuilder;
use relgraph::service::GraphqlService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relgraph=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting relgraph");

    let catalog = Arc::new(blog_catalog().context("Invalid entity catalog")?);

    let db = Database::connect(&config.database_url, config.database_max_connections).await?;

    let sync = sync_catalog_schema(db.pool(), &catalog).await;
    tracing::info!(
        tables_created = sync.tables_created.len(),
        columns_added = sync.columns_added.len(),
        errors = sync.errors.len(),
        "Schema sync complete"
    );
    for error in &sync.errors {
        tracing::warn!(error = %error, "Schema sync error");
    }

    let engine = Arc::new(FetchEngine::new(catalog.clone(), config.strict_selection));
    let mut resolvers = Vec::new();
    for entity in catalog.entities() {
        resolvers.push(Arc::new(CrudResolver::new(engine.clone(), &entity.name)?));
    }

    let schema = SchemaBuilder::new(catalog.clone())
        .resolvers(resolvers)
        .build()?;

    let service = Arc::new(GraphqlService::new(schema, db, catalog, &config));
    let app = build_app(service);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);
    tracing::info!("GraphQL playground: http://localhost:{}/graphql", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
