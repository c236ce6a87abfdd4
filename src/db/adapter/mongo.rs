//! Document adapter (C5): MongoDB.
//!
//! `describe_resource` has no catalog to read from for field shape, so
//! it samples a bounded number of documents and unions top-level field
//! names/types (spec.md §4.5 "document adapter specifics"), grounded
//! in `db/mongo.rs`'s own bson-to-json conversion helpers.

use super::{
    Adapter, ConstraintDescription, FieldDescription, IndexDescription, ResourceDescription,
    ResourceStats, ResourceSummary, UNKNOWN_TABLE,
};
use crate::db::session::BackendSession;
use crate::error::{DbError, DbResult};
use crate::models::{AbstractQuery, DocOperation, QueryResult};
use async_trait::async_trait;
use bson::Document;
use futures_util::stream::TryStreamExt;
use std::collections::BTreeMap;
use std::time::Duration;

/// Number of documents sampled for field-shape inference.
const SAMPLE_SIZE: i64 = 100;

#[derive(Debug, Default)]
pub struct MongoAdapter;

fn expect_mongo(session: &mut BackendSession) -> DbResult<&mut crate::db::mongo::MongoSession> {
    match session {
        BackendSession::Mongo(s) => Ok(s),
        other => Err(DbError::connection(
            format!("MongoAdapter invoked against a {} connection", other.db_type()),
            "This is an internal routing bug, not a user error",
        )),
    }
}

#[async_trait]
impl Adapter for MongoAdapter {
    async fn execute_query(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        limit: u32,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        super::require_kind(query, true)?;
        session.execute(query, limit, timeout).await
    }

    async fn execute_write(
        &mut self,
        session: &mut BackendSession,
        query: &AbstractQuery,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        super::require_kind(query, false)?;
        session.execute(query, 1, timeout).await
    }

    async fn list_resources(&mut self, session: &mut BackendSession) -> DbResult<Vec<ResourceSummary>> {
        let mongo = expect_mongo(session)?;
        let db = mongo.client().database(mongo.db_name());
        let names = db.list_collection_names().await.map_err(DbError::from)?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let stats = coll_stats(mongo, &name).await.ok();
            out.push(ResourceSummary {
                name,
                resource_type: "collection".to_string(),
                row_count: stats.as_ref().and_then(|s| s.row_count),
                size_bytes: stats.as_ref().and_then(|s| s.total_size_bytes),
            });
        }
        Ok(out)
    }

    async fn describe_resource(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceDescription> {
        let mongo = expect_mongo(session)?;
        let collection = mongo.client().database(mongo.db_name()).collection::<Document>(name);

        let cursor = collection
            .find(Document::new())
            .limit(SAMPLE_SIZE)
            .await
            .map_err(DbError::from)?;
        let docs: Vec<Document> = cursor.try_collect().await.map_err(DbError::from)?;

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for doc in &docs {
            for (key, value) in doc {
                fields
                    .entry(key.clone())
                    .and_modify(|t| {
                        let this = bson_type_name(value);
                        if *t != this {
                            *t = "mixed".to_string();
                        }
                    })
                    .or_insert_with(|| bson_type_name(value).to_string());
            }
        }

        let field_descriptions = fields
            .into_iter()
            .map(|(name, type_name)| FieldDescription {
                is_primary_key: name == "_id",
                name,
                type_name,
                nullable: true,
                default_value: None,
            })
            .collect();

        let indexes = list_indexes(mongo, name).await.unwrap_or_default();

        Ok(ResourceDescription {
            name: name.to_string(),
            fields: field_descriptions,
            indexes,
            constraints: Vec::new(),
            native_ddl: None,
        })
    }

    async fn get_resource_stats(
        &mut self,
        session: &mut BackendSession,
        name: &str,
    ) -> DbResult<ResourceStats> {
        let mongo = expect_mongo(session)?;
        coll_stats(mongo, name).await
    }

    /// Document operations carry their collection name directly (spec.md
    /// §3); no lexical parsing is needed or possible.
    fn extract_resource_name(&self, query: &AbstractQuery) -> String {
        match query {
            AbstractQuery::Document(q) => q.collection.clone(),
            _ => UNKNOWN_TABLE.to_string(),
        }
    }
}

fn bson_type_name(value: &bson::Bson) -> &'static str {
    use bson::Bson::*;
    match value {
        Double(_) => "double",
        String(_) => "string",
        Array(_) => "array",
        Document(_) => "object",
        Boolean(_) => "bool",
        Null => "null",
        Int32(_) => "int32",
        Int64(_) => "int64",
        DateTime(_) => "date",
        ObjectId(_) => "objectId",
        Decimal128(_) => "decimal128",
        Binary(_) => "binary",
        _ => "other",
    }
}

async fn list_indexes(mongo: &mut crate::db::mongo::MongoSession, collection: &str) -> DbResult<Vec<IndexDescription>> {
    let coll = mongo.client().database(mongo.db_name()).collection::<Document>(collection);
    let mut cursor = coll.list_indexes().await.map_err(DbError::from)?;
    let mut out = Vec::new();
    while let Some(index) = cursor.try_next().await.map_err(DbError::from)? {
        let columns = index.keys.keys().map(|k| k.to_string()).collect();
        out.push(IndexDescription {
            name: index.options.as_ref().and_then(|o| o.name.clone()).unwrap_or_default(),
            columns,
            is_unique: index.options.as_ref().and_then(|o| o.unique).unwrap_or(false),
            method: None,
        });
    }
    Ok(out)
}

/// Maps to `collStats` (spec.md §4.5: "document adapter specifics").
async fn coll_stats(mongo: &mut crate::db::mongo::MongoSession, collection: &str) -> DbResult<ResourceStats> {
    let reply = mongo
        .client()
        .database(mongo.db_name())
        .run_command(bson::doc! { "collStats": collection })
        .await
        .map_err(DbError::from)?;
    let row_count = reply.get_i64("count").ok().map(|n| n as u64);
    let total_size = reply.get_i64("size").ok().map(|n| n as u64);
    let index_size = reply.get_i64("totalIndexSize").ok().map(|n| n as u64);
    Ok(ResourceStats {
        name: collection.to_string(),
        row_count,
        total_size_bytes: total_size,
        index_size_bytes: index_size,
        extra: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentQuery;

    #[test]
    fn extract_resource_name_uses_collection_field() {
        let adapter = MongoAdapter;
        let query = AbstractQuery::Document(DocumentQuery {
            operation: DocOperation::Find,
            collection: "widgets".to_string(),
            params: serde_json::json!({}),
        });
        assert_eq!(adapter.extract_resource_name(&query), "widgets");
    }

    #[test]
    fn bson_type_names_cover_common_cases() {
        assert_eq!(bson_type_name(&bson::Bson::Int32(1)), "int32");
        assert_eq!(bson_type_name(&bson::Bson::Null), "null");
    }
}
