//! Write primitives: row insert/update/delete and relation attach/detach

use indexmap::IndexMap;
use sqlx::SqliteConnection;

use super::builder::{KEY_CHUNK_SIZE, placeholders};
use super::traits::SqlValue;
use crate::catalog::{EntityStructure, ID_NAME, Relation};
use crate::error::{ApiError, ApiResult};

async fn execute(
    conn: &mut SqliteConnection,
    sql: &str,
    values: &[SqlValue],
) -> Result<u64, sqlx::Error> {
    tracing::debug!(sql = %sql, binds = values.len(), "Executing write");

    let mut query = sqlx::query(sql);
    for value in values {
        query = value.bind_to_query(query);
    }
    Ok(query.execute(&mut *conn).await?.rows_affected())
}

fn keys(ids: &[String]) -> Vec<SqlValue> {
    ids.iter().cloned().map(SqlValue::String).collect()
}

/// Insert one row and return its primary key.
///
/// A `uuid` entry in `values` is used as the key, otherwise a v4 uuid is generated.
pub async fn insert_row(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    mut values: IndexMap<String, SqlValue>,
) -> ApiResult<String> {
    let uuid = match values.shift_remove(ID_NAME) {
        Some(SqlValue::String(uuid)) if !uuid.is_empty() => uuid,
        _ => uuid::Uuid::new_v4().to_string(),
    };

    let mut columns = vec![ID_NAME.to_string()];
    let mut binds = vec![SqlValue::String(uuid.clone())];
    for (column, value) in values {
        columns.push(column);
        binds.push(value);
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entity.name,
        columns.join(", "),
        placeholders(binds.len())
    );
    execute(conn, &sql, &binds).await?;

    tracing::info!(entity = %entity.name, uuid = %uuid, "Inserted row");
    Ok(uuid)
}

/// Update the given columns of one row. No-op without values.
pub async fn update_row(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    uuid: &str,
    values: IndexMap<String, SqlValue>,
) -> ApiResult<()> {
    if values.is_empty() {
        return Ok(());
    }

    let assignments: Vec<String> = values.keys().map(|c| format!("{c} = ?")).collect();
    let mut binds: Vec<SqlValue> = values.into_values().collect();
    binds.push(SqlValue::String(uuid.to_string()));

    let sql = format!(
        "UPDATE {} SET {} WHERE {ID_NAME} = ?",
        entity.name,
        assignments.join(", ")
    );
    execute(conn, &sql, &binds).await?;

    tracing::info!(entity = %entity.name, uuid = %uuid, "Updated row");
    Ok(())
}

pub async fn exists(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    uuid: &str,
) -> ApiResult<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE {ID_NAME} = ? LIMIT 1", entity.name);
    let found: Option<i64> = sqlx::query_scalar(&sql)
        .bind(uuid)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

/// Delete rows by primary key and return how many were removed.
pub async fn delete_rows(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    uuids: &[String],
) -> ApiResult<u64> {
    if uuids.is_empty() {
        return Ok(0);
    }

    let mut deleted = 0;
    for chunk in uuids.chunks(KEY_CHUNK_SIZE) {
        let sql = format!(
            "DELETE FROM {} WHERE {ID_NAME} IN ({})",
            entity.name,
            placeholders(chunk.len())
        );
        deleted += execute(conn, &sql, &keys(chunk)).await?;
    }

    tracing::info!(entity = %entity.name, deleted, "Deleted rows");
    Ok(deleted)
}

/// Link `uuid` to every key in `ids` through `relation`.
pub async fn relate(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    name: &str,
    relation: &Relation,
    uuid: &str,
    ids: &[String],
) -> ApiResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    match relation {
        Relation::ToOne { source_key, .. } => {
            let [id] = ids else {
                return Err(ApiError::bad_request(format!(
                    "Relation '{name}' accepts a single object"
                )));
            };
            let sql = format!(
                "UPDATE {} SET {source_key} = ? WHERE {ID_NAME} = ?",
                entity.name
            );
            execute(conn, &sql, &[SqlValue::from(id.as_str()), SqlValue::from(uuid)]).await?;
        }
        Relation::ToMany { target, target_key } => {
            for chunk in ids.chunks(KEY_CHUNK_SIZE) {
                let sql = format!(
                    "UPDATE {target} SET {target_key} = ? WHERE {ID_NAME} IN ({})",
                    placeholders(chunk.len())
                );
                let mut binds = vec![SqlValue::from(uuid)];
                binds.extend(keys(chunk));
                execute(conn, &sql, &binds).await?;
            }
        }
        Relation::ManyToMany {
            via,
            source_via_key,
            target_via_key,
            ..
        } => {
            let sql = format!(
                "INSERT OR IGNORE INTO {via} ({source_via_key}, {target_via_key}) VALUES (?, ?)"
            );
            for id in ids {
                execute(conn, &sql, &[SqlValue::from(uuid), SqlValue::from(id.as_str())]).await?;
            }
        }
    }

    tracing::debug!(entity = %entity.name, relation = %name, count = ids.len(), "Linked relation");
    Ok(())
}

/// Unlink `uuid` from the keys in `ids`.
pub async fn unrelate(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    relation: &Relation,
    uuid: &str,
    ids: &[String],
) -> ApiResult<()> {
    for chunk in ids.chunks(KEY_CHUNK_SIZE) {
        let sql = match relation {
            Relation::ToOne { source_key, .. } => format!(
                "UPDATE {} SET {source_key} = NULL WHERE {ID_NAME} = ? AND {source_key} IN ({})",
                entity.name,
                placeholders(chunk.len())
            ),
            Relation::ToMany { target, target_key } => format!(
                "UPDATE {target} SET {target_key} = NULL WHERE {target_key} = ? AND {ID_NAME} IN ({})",
                placeholders(chunk.len())
            ),
            Relation::ManyToMany {
                via,
                source_via_key,
                target_via_key,
                ..
            } => format!(
                "DELETE FROM {via} WHERE {source_via_key} = ? AND {target_via_key} IN ({})",
                placeholders(chunk.len())
            ),
        };
        let mut binds = vec![SqlValue::from(uuid)];
        binds.extend(keys(chunk));
        execute(conn, &sql, &binds).await?;
    }
    Ok(())
}

/// Unlink `uuid` from everything it reaches through `relation`.
pub async fn unrelate_all(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    relation: &Relation,
    uuid: &str,
) -> ApiResult<()> {
    let sql = match relation {
        Relation::ToOne { source_key, .. } => format!(
            "UPDATE {} SET {source_key} = NULL WHERE {ID_NAME} = ?",
            entity.name
        ),
        Relation::ToMany { target, target_key } => {
            format!("UPDATE {target} SET {target_key} = NULL WHERE {target_key} = ?")
        }
        Relation::ManyToMany {
            via,
            source_via_key,
            ..
        } => format!("DELETE FROM {via} WHERE {source_via_key} = ?"),
    };
    execute(conn, &sql, &[SqlValue::from(uuid)]).await?;
    Ok(())
}

/// Make `ids` the exact set reachable from `uuid` through `relation`.
pub async fn replace_relation(
    conn: &mut SqliteConnection,
    entity: &EntityStructure,
    name: &str,
    relation: &Relation,
    uuid: &str,
    ids: &[String],
) -> ApiResult<()> {
    unrelate_all(conn, entity, relation, uuid).await?;
    relate(conn, entity, name, relation, uuid, ids).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use sqlx::Connection;

    use super::*;
    use crate::catalog::{Catalog, Column, ColumnType};

    async fn setup() -> (SqliteConnection, Catalog) {
        let catalog = Catalog::builder()
            .translations(["en"])
            .entity(
                EntityStructure::builder("article")
                    .column(Column::new("title", ColumnType::String))
                    .relation("author", Relation::to_one("author", "fk_author"))
                    .relation(
                        "tags",
                        Relation::many_to_many("tag", "article_tag", "article", "tag"),
                    ),
            )
            .entity(
                EntityStructure::builder("author")
                    .relation("articles", Relation::to_many("article", "fk_author")),
            )
            .entity(EntityStructure::builder("tag"))
            .build()
            .unwrap();

        let mut conn = SqliteConnection::connect("sqlite::memory:").await.unwrap();
        for table in crate::catalog::ddl::catalog_tables(&catalog) {
            sqlx::query(&table.create_table_sql())
                .execute(&mut conn)
                .await
                .unwrap();
        }
        (conn, catalog)
    }

    fn entity(catalog: &Catalog, name: &str) -> Arc<EntityStructure> {
        catalog.get(name).unwrap().clone()
    }

    async fn count(conn: &mut SqliteConnection, sql: &str) -> i64 {
        sqlx::query_scalar(sql).fetch_one(&mut *conn).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_generates_uuid_and_delete_counts() {
        let (mut conn, catalog) = setup().await;
        let article = entity(&catalog, "article");

        let mut values = IndexMap::new();
        values.insert("title".to_string(), SqlValue::from("Hello"));
        let uuid = insert_row(&mut conn, &article, values).await.unwrap();
        assert_eq!(uuid.len(), 36);
        assert!(exists(&mut conn, &article, &uuid).await.unwrap());

        let deleted = delete_rows(&mut conn, &article, &[uuid, "missing".into()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(delete_rows(&mut conn, &article, &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relation_writes_per_variant() {
        let (mut conn, catalog) = setup().await;
        let article = entity(&catalog, "article");
        let author = entity(&catalog, "author");

        let a1 = insert_row(&mut conn, &author, IndexMap::new()).await.unwrap();
        let mut values = IndexMap::new();
        values.insert("title".to_string(), SqlValue::from("x"));
        let p1 = insert_row(&mut conn, &article, values.clone()).await.unwrap();
        let p2 = insert_row(&mut conn, &article, values).await.unwrap();
        let t1 = insert_row(&mut conn, &entity(&catalog, "tag"), IndexMap::new())
            .await
            .unwrap();

        let articles = author.relation("articles").unwrap();
        relate(&mut conn, &author, "articles", articles, &a1, &[p1.clone(), p2.clone()])
            .await
            .unwrap();
        assert_eq!(
            count(&mut conn, "SELECT COUNT(*) FROM article WHERE fk_author IS NOT NULL").await,
            2
        );

        unrelate(&mut conn, &author, articles, &a1, &[p1.clone()])
            .await
            .unwrap();
        assert_eq!(
            count(&mut conn, "SELECT COUNT(*) FROM article WHERE fk_author IS NOT NULL").await,
            1
        );

        let tags = article.relation("tags").unwrap();
        relate(&mut conn, &article, "tags", tags, &p1, &[t1.clone(), t1.clone()])
            .await
            .unwrap();
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM article_tag").await, 1);

        replace_relation(&mut conn, &article, "tags", tags, &p1, &[])
            .await
            .unwrap();
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM article_tag").await, 0);

        let to_one = article.relation("author").unwrap();
        let err = relate(&mut conn, &article, "author", to_one, &p1, &[a1.clone(), a1])
            .await
            .unwrap_err();
        assert_matches!(err, ApiError::BadRequest(_));
    }

    #[tokio::test]
    async fn test_large_key_lists_span_several_statements() {
        let (mut conn, catalog) = setup().await;
        let article = entity(&catalog, "article");
        let author = entity(&catalog, "author");

        let a1 = insert_row(&mut conn, &author, IndexMap::new()).await.unwrap();
        sqlx::query(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 1200) \
             INSERT INTO article (uuid, title) SELECT printf('p%04d', i), 'x' FROM n",
        )
        .execute(&mut conn)
        .await
        .unwrap();
        let ids: Vec<String> = sqlx::query_scalar("SELECT uuid FROM article")
            .fetch_all(&mut conn)
            .await
            .unwrap();
        assert!(ids.len() > 2 * KEY_CHUNK_SIZE);

        let articles = author.relation("articles").unwrap();
        relate(&mut conn, &author, "articles", articles, &a1, &ids)
            .await
            .unwrap();
        assert_eq!(
            count(&mut conn, "SELECT COUNT(*) FROM article WHERE fk_author IS NOT NULL").await,
            1200
        );

        unrelate(&mut conn, &author, articles, &a1, &ids)
            .await
            .unwrap();
        assert_eq!(
            count(&mut conn, "SELECT COUNT(*) FROM article WHERE fk_author IS NOT NULL").await,
            0
        );

        assert_eq!(delete_rows(&mut conn, &article, &ids).await.unwrap(), 1200);
        assert_eq!(count(&mut conn, "SELECT COUNT(*) FROM article").await, 0);
    }
}
