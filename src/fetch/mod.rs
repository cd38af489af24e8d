//! Selection planner and fetch engine
//!
//! Turns a field selection plus many-query parameters into SQL:
//! 1. one root query projecting only the selected columns
//! 2. one batched child query per selected relation and nesting level,
//!    joined back to the parent keys (`WHERE relation.uuid IN (...)`)
//! 3. key-based stitching of children under their parents
//!
//! Child rows carry the parent key they were reached from (`__link`), so a
//! row linked from several parents is stitched under each of them.

pub mod result;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::SqliteConnection;

use crate::catalog::{Catalog, EntityStructure, ID_NAME, Relation};
use crate::error::{ApiError, ApiResult};
use crate::orm::{EntityQuery, FilterExpr, KEY_CHUNK_SIZE, OrderDirection, SqlValue};
use crate::selection::{FieldSelection, Selected};

pub use result::{FetchResult, FieldValue, ResultSet, Row};

pub const DEFAULT_SORT: &str = "this.uuid";
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 50;

/// Projection alias carrying the parent key of a child row.
const LINK_ALIAS: &str = "__link";

/// Pagination, ordering and filtering of a many query.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManyParams {
    pub sort: Option<String>,
    pub order: Option<OrderDirection>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    /// Filter object, or a string holding one
    pub filters: Option<JsonValue>,
}

impl ManyParams {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

/// A fetched row together with the parent key it was reached from.
#[derive(Debug)]
struct LinkedRow {
    link: Option<String>,
    key: String,
    row: Row,
}

#[derive(Debug, Clone)]
pub struct FetchEngine {
    catalog: Arc<Catalog>,
    strict: bool,
}

impl FetchEngine {
    pub fn new(catalog: Arc<Catalog>, strict: bool) -> Self {
        Self { catalog, strict }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn entity(&self, name: &str) -> ApiResult<&Arc<EntityStructure>> {
        self.catalog
            .get(name)
            .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("Unknown entity '{name}'")))
    }

    /// Base query over an entity.
    pub fn query(&self, entity: &str) -> ApiResult<EntityQuery> {
        Ok(EntityQuery::new(self.entity(entity)?.clone()))
    }

    /// Fetch the rows a selection asks for.
    ///
    /// With a top-level `data` key the result is the page envelope, and
    /// `onPageCount` is the number of rows on the returned page.
    pub async fn fetch_result(
        &self,
        conn: &mut SqliteConnection,
        query: EntityQuery,
        selection: &FieldSelection,
        params: Option<&ManyParams>,
        translation: &str,
    ) -> ApiResult<FetchResult> {
        let mut query = query;
        if let Some(params) = params {
            query = apply_filters(query, params, translation)?;
            query = apply_ordering(query, params, translation)?;
            query = apply_paging(query, params)?;
        }
        if !query.has_order() {
            query = query.order_by(DEFAULT_SORT, OrderDirection::Asc);
        }

        if selection.contains("data") {
            let empty = FieldSelection::new();
            let rows_selection = selection.sub("data").unwrap_or(&empty);
            let rows = self
                .resolve_selection(conn, query, rows_selection, translation, None)
                .await?;
            let data = into_result_set(rows);
            let on_page_count = selection.contains("onPageCount").then(|| data.len());
            return Ok(FetchResult::Page {
                data: Some(data),
                on_page_count,
            });
        }

        if selection.contains("onPageCount") {
            return Err(ApiError::invalid_selection(
                "onPageCount can only be requested together with data",
            ));
        }

        let rows = self
            .resolve_selection(conn, query, selection, translation, None)
            .await?;
        Ok(FetchResult::Rows(into_result_set(rows)))
    }

    /// Number of rows matching the filters, ignoring pagination.
    pub async fn count(
        &self,
        conn: &mut SqliteConnection,
        query: EntityQuery,
        params: Option<&ManyParams>,
        translation: &str,
    ) -> ApiResult<i64> {
        let mut query = query.unpaged();
        if let Some(params) = params {
            query = apply_filters(query, params, translation)?;
        }
        Ok(query.count(conn).await?)
    }

    /// Project `selection` on `query`, run it, then fetch and stitch every
    /// nested relation.
    fn resolve_selection<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        query: EntityQuery,
        selection: &'a FieldSelection,
        translation: &'a str,
        link: Option<String>,
    ) -> BoxFuture<'a, ApiResult<Vec<LinkedRow>>> {
        Box::pin(async move {
            let entity = query.entity().clone();
            let mut query = query
                .clear_select()
                .select(ID_NAME, format!("this.{ID_NAME}"), None);
            if let Some(link) = &link {
                query = query.select(LINK_ALIAS, link.clone(), None);
            }

            let mut direct = Vec::new();
            let mut via_junction = Vec::new();

            for (name, selected) in selection.iter() {
                if name == ID_NAME {
                    continue;
                }

                if let Some(relation) = entity.relation(name) {
                    if let Relation::ToOne { source_key, .. } = relation {
                        query = query.select(name, format!("this.{source_key}"), None);
                    }
                    if let Selected::Nested(sub) = selected {
                        if matches!(relation, Relation::ManyToMany { .. }) {
                            via_junction.push((name, relation, sub));
                        } else {
                            direct.push((name, relation, sub));
                        }
                    }
                    continue;
                }

                if let Some(column) = entity.column(name) {
                    let expr = if column.translated {
                        format!(
                            "this.{}",
                            EntityStructure::translated_column(name, translation)
                        )
                    } else {
                        format!("this.{name}")
                    };
                    query = query.select(name, expr, Some(column.column_type));
                    continue;
                }

                if let Some(expr) = query.modifier(name).map(|expr| format!("({expr})")) {
                    query = query.select(name, expr, None);
                    continue;
                }

                if name.starts_with("__") {
                    continue;
                }
                if self.strict {
                    return Err(ApiError::invalid_selection(format!(
                        "Unknown field '{name}' on '{}'",
                        entity.name
                    )));
                }
                tracing::debug!(entity = %entity.name, field = %name, "Skipping unknown selected field");
            }

            let mut rows = Vec::new();
            for sql_row in query.fetch_rows(&mut *conn).await? {
                let mut sql_row = sql_row;
                let link = sql_row
                    .shift_remove(LINK_ALIAS)
                    .and_then(|value| value.as_key());
                let key = sql_row
                    .get(ID_NAME)
                    .and_then(SqlValue::as_key)
                    .ok_or_else(|| {
                        ApiError::Internal(anyhow::anyhow!(
                            "Row of '{}' without primary key",
                            entity.name
                        ))
                    })?;

                let mut row = Row::default();
                for (name, value) in sql_row {
                    row.insert(name, FieldValue::Scalar(value));
                }
                rows.push(LinkedRow { link, key, row });
            }

            if direct.is_empty() && via_junction.is_empty() {
                return Ok(rows);
            }

            let keys: Vec<String> = rows
                .iter()
                .map(|r| r.key.clone())
                .collect::<IndexSet<_>>()
                .into_iter()
                .collect();

            for (name, relation, sub) in direct {
                let target = self.entity(relation.target())?.clone();
                let Some((target_column, owner_column)) = relation.join_keys() else {
                    continue;
                };
                let child_query = EntityQuery::new(target)
                    .join(format!(
                        "JOIN {} AS relation ON this.{target_column} = relation.{owner_column}",
                        entity.name
                    ))
                    .order_by(format!("this.{ID_NAME}"), OrderDirection::Asc);

                let children = self
                    .fetch_children(
                        conn,
                        child_query,
                        sub,
                        translation,
                        &keys,
                        format!("relation.{ID_NAME}"),
                    )
                    .await?;
                stitch(&mut rows, name, relation, children);
            }

            for (name, relation, sub) in via_junction {
                let Relation::ManyToMany {
                    target,
                    via,
                    source_via_key,
                    target_via_key,
                } = relation
                else {
                    continue;
                };
                let link_column = format!("relationNxN.{source_via_key}");
                let child_query = EntityQuery::new(self.entity(target)?.clone())
                    .join(format!(
                        "JOIN {via} AS relationNxN ON this.{ID_NAME} = relationNxN.{target_via_key}"
                    ))
                    .order_by(format!("this.{ID_NAME}"), OrderDirection::Asc);

                let children = self
                    .fetch_children(conn, child_query, sub, translation, &keys, link_column)
                    .await?;
                stitch(&mut rows, name, relation, children);
            }

            Ok(rows)
        })
    }

    /// Run the batched child query restricted to `keys` on the `link`
    /// column, grouping the result by parent key.
    ///
    /// At most [`KEY_CHUNK_SIZE`] keys are bound per statement.
    async fn fetch_children(
        &self,
        conn: &mut SqliteConnection,
        child_query: EntityQuery,
        selection: &FieldSelection,
        translation: &str,
        keys: &[String],
        link: String,
    ) -> ApiResult<HashMap<String, IndexMap<String, Row>>> {
        let mut grouped: HashMap<String, IndexMap<String, Row>> = HashMap::new();
        if keys.is_empty() {
            return Ok(grouped);
        }

        tracing::debug!(
            entity = %child_query.entity().name,
            parent_count = keys.len(),
            "Batch loading relation"
        );

        for chunk in keys.chunks(KEY_CHUNK_SIZE) {
            let query = child_query.clone().where_in(&link, key_values(chunk));
            let children = self
                .resolve_selection(conn, query, selection, translation, Some(link.clone()))
                .await?;
            for child in children {
                let Some(link) = child.link else { continue };
                grouped
                    .entry(link)
                    .or_default()
                    .entry(child.key)
                    .or_insert(child.row);
            }
        }
        Ok(grouped)
    }
}

fn key_values(keys: &[String]) -> Vec<SqlValue> {
    keys.iter().cloned().map(SqlValue::String).collect()
}

/// Attach grouped children to every parent row under `name`.
fn stitch(
    rows: &mut [LinkedRow],
    name: &str,
    relation: &Relation,
    children: HashMap<String, IndexMap<String, Row>>,
) {
    for parent in rows.iter_mut() {
        let linked = children.get(&parent.key);
        let value = if relation.is_key_holder() {
            FieldValue::One(linked.and_then(|c| c.values().next().cloned()))
        } else {
            FieldValue::Many(linked.cloned().unwrap_or_default())
        };
        parent.row.insert(name, value);
    }
}

fn into_result_set(rows: Vec<LinkedRow>) -> ResultSet {
    let mut set = ResultSet::with_capacity(rows.len());
    for linked in rows {
        set.entry(linked.key).or_insert(linked.row);
    }
    set
}

/// Parse and compile the `filters` parameter onto `query`.
fn apply_filters(
    query: EntityQuery,
    params: &ManyParams,
    translation: &str,
) -> ApiResult<EntityQuery> {
    let filters = match &params.filters {
        None | Some(JsonValue::Null) => return Ok(query),
        Some(JsonValue::String(raw)) if raw.trim().is_empty() => return Ok(query),
        Some(JsonValue::String(raw)) => serde_json::from_str(raw).map_err(|e| {
            tracing::debug!(error = %e, "Unparseable filters");
            ApiError::InvalidFilter
        })?,
        Some(value) => value.clone(),
    };

    let (condition, values) = FilterExpr::parse(&filters)
        .and_then(|expr| expr.compile(query.entity(), translation))
        .map_err(|e| {
            tracing::debug!(error = %e, "Rejected filters");
            ApiError::InvalidFilter
        })?;

    Ok(query.where_raw(condition, values))
}

/// Apply `sort`/`order`; the sort key must name a column or select modifier.
fn apply_ordering(
    query: EntityQuery,
    params: &ManyParams,
    translation: &str,
) -> ApiResult<EntityQuery> {
    let sort = params.sort.as_deref().unwrap_or(DEFAULT_SORT);
    let column = sort.strip_prefix("this.").unwrap_or(sort);
    let entity = query.entity().clone();

    let expr = if entity.has_physical_column(column) {
        format!("this.{column}")
    } else if entity.column(column).is_some_and(|c| c.translated) {
        format!(
            "this.{}",
            EntityStructure::translated_column(column, translation)
        )
    } else if let Some(expr) = query.modifier(column) {
        format!("({expr})")
    } else {
        return Err(ApiError::bad_request(format!("Unknown sort column '{sort}'")));
    };

    let mut query = query.order_by(expr, params.order.unwrap_or_default());
    if column != ID_NAME {
        query = query.order_by(format!("this.{ID_NAME}"), OrderDirection::Asc);
    }
    Ok(query)
}

fn apply_paging(query: EntityQuery, params: &ManyParams) -> ApiResult<EntityQuery> {
    let (page, limit) = (params.page(), params.limit());
    if page < 1 || limit < 1 {
        return Err(ApiError::bad_request(format!(
            "Invalid pagination (page {page}, limit {limit})"
        )));
    }
    Ok(query.limit(limit).offset((page - 1) * limit))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::catalog::{Column, ColumnType};

    fn engine() -> FetchEngine {
        let catalog = Catalog::builder()
            .translations(["en"])
            .entity(
                EntityStructure::builder("tag")
                    .column(Column::new("name", ColumnType::String))
                    .select_modifier("size", "length(this.name)"),
            )
            .build()
            .unwrap();
        FetchEngine::new(Arc::new(catalog), false)
    }

    #[test]
    fn test_many_params_deserialize_with_defaults() {
        let params: ManyParams =
            serde_json::from_value(json!({"sort": "name", "order": "DESC"})).unwrap();
        assert_eq!(params.page(), DEFAULT_PAGE);
        assert_eq!(params.limit(), DEFAULT_LIMIT);
        assert_eq!(params.order, Some(OrderDirection::Desc));
    }

    #[test]
    fn test_ordering_and_paging_sql() {
        let engine = engine();
        let params = ManyParams {
            sort: Some("this.size".into()),
            order: Some(OrderDirection::Desc),
            page: Some(3),
            limit: Some(5),
            ..Default::default()
        };
        let query = apply_ordering(engine.query("tag").unwrap(), &params, "en").unwrap();
        let query = apply_paging(query, &params).unwrap();
        assert_eq!(
            query.build_sql(),
            "SELECT this.uuid AS uuid FROM tag AS this \
             ORDER BY (length(this.name)) DESC, this.uuid ASC LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn test_bad_parameters_are_client_errors() {
        let engine = engine();
        let unknown_sort = ManyParams {
            sort: Some("password".into()),
            ..Default::default()
        };
        assert_matches!(
            apply_ordering(engine.query("tag").unwrap(), &unknown_sort, "en"),
            Err(ApiError::BadRequest(_))
        );

        let zero_page = ManyParams {
            page: Some(0),
            ..Default::default()
        };
        assert_matches!(
            apply_paging(engine.query("tag").unwrap(), &zero_page),
            Err(ApiError::BadRequest(_))
        );

        let bad_filter = ManyParams {
            filters: Some(json!("{not json")),
            ..Default::default()
        };
        assert_matches!(
            apply_filters(engine.query("tag").unwrap(), &bad_filter, "en"),
            Err(ApiError::InvalidFilter)
        );
    }

    #[test]
    fn test_filters_accept_json_strings() {
        let engine = engine();
        let params = ManyParams {
            filters: Some(json!("{\"name\": \"rust\"}")),
            ..Default::default()
        };
        let query = apply_filters(engine.query("tag").unwrap(), &params, "en").unwrap();
        assert_eq!(
            query.build_sql(),
            "SELECT this.uuid AS uuid FROM tag AS this WHERE this.name = ?"
        );
    }

    #[tokio::test]
    async fn test_child_reached_twice_is_stitched_once() {
        use sqlx::Connection;

        let catalog = Catalog::builder()
            .translations(["en"])
            .entity(EntityStructure::builder("article").relation(
                "tags",
                Relation::many_to_many("tag", "article_tag", "article", "tag"),
            ))
            .entity(
                EntityStructure::builder("tag").column(Column::new("name", ColumnType::String)),
            )
            .build()
            .unwrap();
        let engine = FetchEngine::new(Arc::new(catalog), true);

        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        for sql in [
            "CREATE TABLE article (uuid TEXT PRIMARY KEY)",
            "CREATE TABLE tag (uuid TEXT PRIMARY KEY, name TEXT)",
            "CREATE TABLE article_tag (article TEXT, tag TEXT)",
            "INSERT INTO article VALUES ('a1'), ('a2')",
            "INSERT INTO tag VALUES ('t1', 'rust')",
            "INSERT INTO article_tag VALUES ('a1', 't1'), ('a1', 't1'), ('a2', 't1')",
        ] {
            sqlx::query(sql).execute(&mut conn).await.unwrap();
        }

        let selection = FieldSelection::from_json(&json!({"tags": {"name": true}}));
        let result = engine
            .fetch_result(&mut conn, engine.query("article").unwrap(), &selection, None, "en")
            .await
            .unwrap();

        assert_eq!(
            result.to_json(),
            json!([
                {"uuid": "a1", "tags": [{"uuid": "t1", "name": "rust"}]},
                {"uuid": "a2", "tags": [{"uuid": "t1", "name": "rust"}]},
            ])
        );
    }
}
