//! Reads: pagination, filtering, ordering and relation stitching

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;

use common::setup;
use relgraph::error::ApiError;
use relgraph::fetch::{FetchEngine, FetchResult, ManyParams};
use relgraph::selection::FieldSelection;

const TITLES_PAGE: &str = r#"query($manyInput: ManyInput) {
    articleMany(manyInput: $manyInput) { data { title views } onPageCount }
    articleManyTotalCount(manyInput: $manyInput)
}"#;

async fn seed_articles(app: &common::TestApp) -> String {
    let author = app.create_author("Ada").await;
    for (title, views) in [("a", 10), ("b", 30), ("c", 20)] {
        app.create_article(title, &author, views).await;
    }
    author
}

fn titles(data: &serde_json::Value) -> Vec<&str> {
    data["articleMany"]["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["title"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn test_pagination_counts_page_and_total() {
    let app = setup().await;
    seed_articles(&app).await;

    let data = app
        .data(
            TITLES_PAGE,
            json!({"manyInput": {"sort": "views", "order": "DESC", "limit": 2, "page": 2}}),
        )
        .await;

    assert_eq!(titles(&data), vec!["a"]);
    assert_eq!(data["articleMany"]["onPageCount"], json!(1));
    assert_eq!(data["articleManyTotalCount"], json!(3));
}

#[tokio::test]
async fn test_filters_apply_to_rows_and_total_count() {
    let app = setup().await;
    seed_articles(&app).await;

    let data = app
        .data(
            TITLES_PAGE,
            json!({"manyInput": {"sort": "views", "filters": {"views": {"Gte": 20}}}}),
        )
        .await;
    assert_eq!(titles(&data), vec!["c", "b"]);
    assert_eq!(data["articleManyTotalCount"], json!(2));

    // filters may also be passed as a JSON string
    let data = app
        .data(
            TITLES_PAGE,
            json!({"manyInput": {"filters": "{\"title\": {\"In\": [\"a\", \"c\"]}}", "sort": "title"}}),
        )
        .await;
    assert_eq!(titles(&data), vec!["a", "c"]);
}

#[tokio::test]
async fn test_bad_many_input_is_a_client_error() {
    let app = setup().await;
    seed_articles(&app).await;

    let response = app
        .run(
            TITLES_PAGE,
            json!({"manyInput": {"filters": {"password": "x"}}}),
        )
        .await;
    assert_eq!(
        response["errors"][0]["message"],
        json!("Bad request: Invalid filters")
    );
    assert_eq!(response["errors"][0]["extensions"]["category"], json!(400));

    let response = app
        .run(TITLES_PAGE, json!({"manyInput": {"sort": "password"}}))
        .await;
    assert_eq!(response["errors"][0]["extensions"]["category"], json!(400));
}

#[tokio::test]
async fn test_on_page_count_requires_data() {
    let app = setup().await;

    let response = app
        .run("{ articleMany { onPageCount } }", json!({}))
        .await;
    let message = response["errors"][0]["message"].as_str().unwrap();
    assert!(message.starts_with("Bad request:"), "{message}");
    assert_eq!(response["errors"][0]["extensions"]["category"], json!(400));
}

#[tokio::test]
async fn test_nested_relations_are_stitched_under_every_parent() {
    let app = setup().await;
    let author = app.create_author("Ada").await;
    let shared = app.create_tag("shared").await;

    for title in ["first", "second"] {
        app.data(
            "mutation($input: ArticleCreateInput!) { articleCreate(input: $input) { uuid } }",
            json!({"input": {
                "title": title,
                "authorID": author,
                "tagsIDs": {"add": [shared]},
                "commentsOBJs": [{"text": format!("{title} comment")}],
            }}),
        )
        .await;
    }

    let data = app
        .data(
            r#"query($uuid: ID!) {
                authorOne(uuid: $uuid) {
                    name
                    articles {
                        title
                        commentCount
                        author { name }
                        comments { text }
                        tags { name }
                    }
                }
            }"#,
            json!({"uuid": author}),
        )
        .await;

    let mut articles = data["authorOne"]["articles"].as_array().unwrap().clone();
    articles.sort_by_key(|a| a["title"].as_str().unwrap().to_string());

    assert_eq!(
        articles,
        vec![
            json!({
                "title": "first",
                "commentCount": 1,
                "author": {"name": "Ada"},
                "comments": [{"text": "first comment"}],
                "tags": [{"name": "shared"}],
            }),
            json!({
                "title": "second",
                "commentCount": 1,
                "author": {"name": "Ada"},
                "comments": [{"text": "second comment"}],
                "tags": [{"name": "shared"}],
            }),
        ]
    );
}

#[tokio::test]
async fn test_missing_object_resolves_to_null() {
    let app = setup().await;

    let data = app
        .data("{ articleOne(uuid: \"missing\") { uuid } }", json!({}))
        .await;
    assert_eq!(data["articleOne"], json!(null));
}

#[tokio::test]
async fn test_unknown_fields_are_skipped_or_rejected() {
    let app = setup().await;
    let tag = app.create_tag("rust").await;
    let selection = FieldSelection::from_json(&json!({"name": true, "secret": true}));

    for strict in [false, true] {
        let engine = FetchEngine::new(Arc::clone(&app.catalog), strict);
        let tx = app.db.begin().await.unwrap();
        let result = {
            let mut conn = tx.lock().await.unwrap();
            engine
                .fetch_result(
                    &mut conn,
                    engine.query("tag").unwrap(),
                    &selection,
                    Some(&ManyParams::default()),
                    "en",
                )
                .await
        };
        tx.rollback().await.unwrap();

        if strict {
            assert_matches!(result, Err(ApiError::InvalidSelection(_)));
            continue;
        }
        let rows = match result {
            Ok(FetchResult::Rows(rows)) => rows,
            other => panic!("expected plain rows, got {other:?}"),
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&tag].to_json(), json!({"uuid": tag, "name": "rust"}));
    }
}

#[tokio::test]
async fn test_unset_to_one_relation_is_null() {
    let app = setup().await;

    let data = app
        .data(
            "mutation { articleCreate(input: {title: \"Orphan\"}) { uuid author { name } } }",
            json!({}),
        )
        .await;
    assert_eq!(data["articleCreate"]["author"], json!(null));

    let data = app
        .data(
            "query($uuid: ID!) { articleOne(uuid: $uuid) { author { name } comments { text } } }",
            json!({"uuid": data["articleCreate"]["uuid"]}),
        )
        .await;
    assert_eq!(data["articleOne"], json!({"author": null, "comments": []}));
}

#[tokio::test]
async fn test_large_pages_load_nested_relations_and_delete() {
    let app = setup().await;
    let authors = app.seed_authors(33_000).await;
    let last = authors.last().unwrap().clone();
    let article = app.create_article("late", &last, 1).await;

    let data = app
        .data(
            "{ authorMany(manyInput: {limit: 40000}) { data { uuid articles { uuid } } onPageCount } }",
            json!({}),
        )
        .await;
    assert_eq!(data["authorMany"]["onPageCount"], json!(33_000));
    assert_eq!(
        data["authorMany"]["data"][32_999],
        json!({"uuid": last, "articles": [{"uuid": article}]})
    );
    assert_eq!(data["authorMany"]["data"][0]["articles"], json!([]));

    let data = app
        .data(
            "mutation($uuid: [ID!]!) { authorDelete(uuid: $uuid) }",
            json!({"uuid": authors}),
        )
        .await;
    assert_eq!(data["authorDelete"], json!(33_000));
    assert_eq!(app.count("author").await, 0);
}

/// `articleOne` with `levels` alternating `author`/`articles` relations.
fn deep_article_query(levels: usize) -> String {
    let mut selection = "uuid".to_string();
    for level in (0..levels).rev() {
        let relation = if level % 2 == 0 { "author" } else { "articles" };
        selection = format!("{relation} {{ {selection} }}");
    }
    format!("{{ articleOne(uuid: \"missing\") {{ {selection} }} }}")
}

#[tokio::test]
async fn test_selection_deeper_than_cap_is_rejected() {
    let app = setup().await;

    let data = app.data(&deep_article_query(9), json!({})).await;
    assert_eq!(data["articleOne"], json!(null));

    let response = app.run(&deep_article_query(10), json!({})).await;
    assert_eq!(response["data"]["articleOne"], json!(null));
    let message = response["errors"][0]["message"].as_str().unwrap();
    assert!(message.contains("nested deeper than 10 levels"), "{message}");
    assert_eq!(response["errors"][0]["extensions"]["category"], json!(400));
}
