//! Before-action interceptors and collection sources

use std::sync::Arc;

use async_graphql::Request;
use pretty_assertions::assert_eq;
use serde_json::{Value as JsonValue, json};

use relgraph::config::Config;
use relgraph::db::Database;
use relgraph::db::schema_sync::sync_catalog_schema;
use relgraph::demo::blog_catalog;
use relgraph::error::{ApiError, ApiResult};
use relgraph::fetch::FetchEngine;
use relgraph::resolver::{Action, Args, CrudResolver, RequestContext};
use relgraph::schema::SchemaBuilder;
use relgraph::service::GraphqlService;

async fn service() -> GraphqlService {
    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        ..Config::default()
    };
    let catalog = Arc::new(blog_catalog().unwrap());
    let db = Database::connect(&config.database_url, 1).await.unwrap();
    sync_catalog_schema(db.pool(), &catalog).await;

    let engine = Arc::new(FetchEngine::new(catalog.clone(), false));

    let tag = CrudResolver::new(engine.clone(), "tag")
        .unwrap()
        .intercept(
            Action::Delete,
            |_root: JsonValue, _args: Args, _ctx: &RequestContext| -> ApiResult<(JsonValue, Args)> {
                Err(ApiError::Unauthorized("tags are read-only".into()))
            },
        )
        .intercept(
            Action::Create,
            |root: JsonValue, mut args: Args, _ctx: &RequestContext| -> ApiResult<(JsonValue, Args)> {
                if let Some(JsonValue::Object(input)) = args.get_mut("input") {
                    if let Some(JsonValue::String(name)) = input.get_mut("name") {
                        *name = name.to_lowercase();
                    }
                }
                Ok((root, args))
            },
        )
        .with_collection(|query| query.where_raw("this.name LIKE ?", vec!["r%".into()]));

    let author = CrudResolver::new(engine.clone(), "author").unwrap();

    let schema = SchemaBuilder::new(catalog.clone())
        .resolvers([Arc::new(tag), Arc::new(author)])
        .build()
        .unwrap();

    GraphqlService::new(schema, db, catalog, &config)
}

async fn run(service: &GraphqlService, query: &str) -> JsonValue {
    let response = service.execute(Request::new(query), "en".to_string()).await;
    serde_json::to_value(&response).unwrap()
}

#[tokio::test]
async fn test_interceptors_rewrite_and_reject() {
    let service = service().await;

    let created = run(
        &service,
        r#"mutation {
            a: tagCreate(input: {name: "RUST"}) { uuid name }
            b: tagCreate(input: {name: "Go"}) { uuid name }
        }"#,
    )
    .await;
    assert_eq!(created["data"]["a"]["name"], json!("rust"));
    assert_eq!(created["data"]["b"]["name"], json!("go"));

    let uuid = created["data"]["a"]["uuid"].as_str().unwrap().to_string();
    let rejected = run(&service, &format!("mutation {{ tagDelete(uuid: [\"{uuid}\"]) }}")).await;
    assert_eq!(
        rejected["errors"][0]["message"],
        json!("Unauthorized: tags are read-only")
    );
    assert_eq!(rejected["errors"][0]["extensions"]["category"], json!(401));
}

#[tokio::test]
async fn test_collection_actions_use_custom_source() {
    let service = service().await;
    run(
        &service,
        r#"mutation {
            a: tagCreate(input: {name: "rust"}) { uuid }
            b: tagCreate(input: {name: "go"}) { uuid }
        }"#,
    )
    .await;

    let data = run(
        &service,
        "{ tagCollection { data { name } } tagCollectionTotalCount tagManyTotalCount }",
    )
    .await;
    assert_eq!(data["data"]["tagCollection"]["data"], json!([{"name": "rust"}]));
    assert_eq!(data["data"]["tagCollectionTotalCount"], json!(1));
    assert_eq!(data["data"]["tagManyTotalCount"], json!(2));

    // resolvers without a collection source expose no collection fields
    let missing = run(&service, "{ authorCollection { data { uuid } } }").await;
    assert!(missing["errors"].is_array());
}
