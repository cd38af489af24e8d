#![allow(dead_code)]

use std::sync::Arc;

use async_graphql::{Request, Variables};
use serde_json::Value as JsonValue;

use relgraph::catalog::Catalog;
use relgraph::config::Config;
use relgraph::db::Database;
use relgraph::db::schema_sync::sync_catalog_schema;
use relgraph::demo::blog_catalog;
use relgraph::fetch::FetchEngine;
use relgraph::resolver::CrudResolver;
use relgraph::schema::SchemaBuilder;
use relgraph::service::GraphqlService;

pub struct TestApp {
    pub service: GraphqlService,
    pub db: Database,
    pub catalog: Arc<Catalog>,
}

pub async fn setup() -> TestApp {
    setup_with(Config {
        database_url: "sqlite::memory:".to_string(),
        ..Config::default()
    })
    .await
}

pub async fn setup_with(config: Config) -> TestApp {
    let catalog = Arc::new(blog_catalog().unwrap());
    let db = Database::connect(&config.database_url, 1).await.unwrap();
    let sync = sync_catalog_schema(db.pool(), &catalog).await;
    assert!(sync.errors.is_empty(), "schema sync failed: {:?}", sync.errors);

    let engine = Arc::new(FetchEngine::new(catalog.clone(), config.strict_selection));
    let resolvers = catalog
        .entities()
        .map(|entity| Arc::new(CrudResolver::new(engine.clone(), &entity.name).unwrap()));
    let schema = SchemaBuilder::new(catalog.clone())
        .resolvers(resolvers)
        .build()
        .unwrap();

    TestApp {
        service: GraphqlService::new(schema, db.clone(), catalog.clone(), &config),
        db,
        catalog,
    }
}

impl TestApp {
    /// Execute a document and return the serialized response.
    pub async fn run(&self, query: &str, variables: JsonValue) -> JsonValue {
        self.run_in(query, variables, "en").await
    }

    pub async fn run_in(&self, query: &str, variables: JsonValue, translation: &str) -> JsonValue {
        let request = Request::new(query).variables(Variables::from_json(variables));
        let response = self.service.execute(request, translation.to_string()).await;
        serde_json::to_value(&response).unwrap()
    }

    /// Execute a document that must succeed and return its `data`.
    pub async fn data(&self, query: &str, variables: JsonValue) -> JsonValue {
        let response = self.run(query, variables).await;
        assert!(
            response.get("errors").is_none(),
            "unexpected errors: {response}"
        );
        response["data"].clone()
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(self.db.pool())
            .await
            .unwrap()
    }

    pub async fn create_author(&self, name: &str) -> String {
        let data = self
            .data(
                "mutation($input: AuthorCreateInput!) { authorCreate(input: $input) { uuid } }",
                serde_json::json!({"input": {"name": name}}),
            )
            .await;
        data["authorCreate"]["uuid"].as_str().unwrap().to_string()
    }

    pub async fn create_article(&self, title: &str, author: &str, views: i64) -> String {
        let data = self
            .data(
                "mutation($input: ArticleCreateInput!) { articleCreate(input: $input) { uuid } }",
                serde_json::json!({"input": {"title": title, "authorID": author, "views": views}}),
            )
            .await;
        data["articleCreate"]["uuid"].as_str().unwrap().to_string()
    }

    pub async fn create_tag(&self, name: &str) -> String {
        let data = self
            .data(
                "mutation($input: TagCreateInput!) { tagCreate(input: $input) { uuid } }",
                serde_json::json!({"input": {"name": name}}),
            )
            .await;
        data["tagCreate"]["uuid"].as_str().unwrap().to_string()
    }

    /// Insert `count` authors in one statement and return their keys in
    /// primary-key order.
    pub async fn seed_authors(&self, count: i64) -> Vec<String> {
        sqlx::query(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < ?) \
             INSERT INTO author (uuid, name) SELECT printf('a%06d', i), 'author ' || i FROM n",
        )
        .bind(count)
        .execute(self.db.pool())
        .await
        .unwrap();
        sqlx::query_scalar("SELECT uuid FROM author ORDER BY uuid")
            .fetch_all(self.db.pool())
            .await
            .unwrap()
    }
}
