//! Mongo backend session: a thin stateful wrapper over a `mongodb::Client`.
//!
//! Transaction support on MongoDB requires a replica set or sharded
//! cluster; standalone deployments reject `start_transaction`. Rather
//! than fail on every `begin_transaction` call against a standalone
//! server, the session probes capability once (via `hello`) and caches
//! the result, grounded in spec.md §3's "Mongo transaction availability
//! probed once per connection" supplement.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, DocOperation, DocumentQuery, QueryResult};
use bson::{Bson, Document};
use futures_util::stream::TryStreamExt;
use mongodb::{Client, ClientSession};
use std::time::Duration;

pub struct MongoSession {
    client: Client,
    database_name: String,
    session: Option<ClientSession>,
    supports_transactions: Option<bool>,
    writable: bool,
}

impl MongoSession {
    pub fn new(client: Client, database_name: String, writable: bool) -> Self {
        Self {
            client,
            database_name,
            session: None,
            supports_transactions: None,
            writable,
        }
    }

    pub fn db_name(&self) -> &str {
        &self.database_name
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn transaction_active(&self) -> bool {
        self.session.is_some()
    }

    pub async fn check_health(&self) -> DbResult<()> {
        self.client
            .database(&self.database_name)
            .run_command(bson::doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(DbError::from)
    }

    pub async fn disconnect(&mut self) {
        if self.session.is_some() {
            let _ = self.rollback().await;
        }
    }

    /// Probe `hello.setName` once per connection; replica set members and
    /// sharded mongos routers carry a `setName`/`msg: isdbgrid` field,
    /// standalone nodes do not.
    async fn probe_transaction_support(&mut self) -> DbResult<bool> {
        if let Some(v) = self.supports_transactions {
            return Ok(v);
        }
        let reply = self
            .client
            .database("admin")
            .run_command(bson::doc! { "hello": 1 })
            .await
            .map_err(DbError::from)?;
        let supported = reply.get_str("setName").is_ok() || reply.get_str("msg").map(|m| m == "isdbgrid").unwrap_or(false);
        self.supports_transactions = Some(supported);
        Ok(supported)
    }

    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.session.is_some() {
            return Err(DbError::not_implemented(
                "MongoDB does not support nested transactions or savepoints",
            ));
        }
        if !self.probe_transaction_support().await? {
            return Err(DbError::transaction(
                "this MongoDB deployment is standalone and does not support transactions",
            ));
        }
        let mut session = self.client.start_session().await.map_err(DbError::from)?;
        session.start_transaction().await.map_err(DbError::from)?;
        self.session = Some(session);
        Ok(())
    }

    pub async fn commit(&mut self) -> DbResult<()> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| DbError::transaction("no active transaction to commit"))?;
        session.commit_transaction().await.map_err(DbError::from)
    }

    pub async fn rollback(&mut self) -> DbResult<()> {
        let mut session = self
            .session
            .take()
            .ok_or_else(|| DbError::transaction("no active transaction to roll back"))?;
        session.abort_transaction().await.map_err(DbError::from)
    }

    pub async fn execute_query(
        &mut self,
        query: &DocumentQuery,
        limit: u32,
        timeout: Duration,
    ) -> DbResult<QueryResult> {
        let started = std::time::Instant::now();
        let fut = self.dispatch(query, limit);
        let mut result = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| DbError::query("mongo operation timed out", &query.collection))??;
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn dispatch(&mut self, query: &DocumentQuery, limit: u32) -> DbResult<QueryResult> {
        let collection = self
            .client
            .database(&self.database_name)
            .collection::<Document>(&query.collection);

        match query.operation {
            DocOperation::Find => {
                let filter: Document = bson_from_json(&query.params)?;
                let cursor = collection.find(filter).limit(limit as i64).await.map_err(DbError::from)?;
                let docs: Vec<Document> = cursor.try_collect().await.map_err(DbError::from)?;
                Ok(docs_to_result(docs, limit))
            }
            DocOperation::FindOne => {
                let filter: Document = bson_from_json(&query.params)?;
                let doc = collection.find_one(filter).await.map_err(DbError::from)?;
                Ok(docs_to_result(doc.into_iter().collect(), limit))
            }
            DocOperation::Aggregate => {
                let pipeline = json_array_to_bson_docs(&query.params)?;
                let cursor = collection.aggregate(pipeline).await.map_err(DbError::from)?;
                let docs: Vec<Document> = cursor.try_collect().await.map_err(DbError::from)?;
                Ok(docs_to_result(docs, limit))
            }
            DocOperation::Distinct => {
                let obj = query.params.as_object().cloned().unwrap_or_default();
                let field = obj
                    .get("field")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| DbError::query("distinct requires a 'field' parameter", &query.collection))?;
                let filter: Document = obj
                    .get("filter")
                    .map(|v| bson_from_json(v))
                    .transpose()?
                    .unwrap_or_default();
                let values = collection.distinct(field, filter).await.map_err(DbError::from)?;
                let rows = values
                    .into_iter()
                    .map(|v| {
                        let mut m = serde_json::Map::new();
                        m.insert("value".to_string(), bson_to_json(v));
                        m
                    })
                    .collect();
                Ok(QueryResult {
                    columns: vec![ColumnMetadata::new("value", "bson", true)],
                    rows,
                    rows_affected: None,
                    last_insert_id: None,
                    truncated: false,
                    execution_time_ms: 0,
                })
            }
            DocOperation::Count => {
                let filter: Document = bson_from_json(&query.params)?;
                let count = collection.count_documents(filter).await.map_err(DbError::from)?;
                let mut m = serde_json::Map::new();
                m.insert("count".to_string(), serde_json::Value::from(count));
                Ok(QueryResult {
                    columns: vec![ColumnMetadata::new("count", "i64", false)],
                    rows: vec![m],
                    rows_affected: None,
                    last_insert_id: None,
                    truncated: false,
                    execution_time_ms: 0,
                })
            }
            DocOperation::InsertOne => {
                let doc: Document = bson_from_json(&query.params)?;
                let result = collection.insert_one(doc).await.map_err(DbError::from)?;
                Ok(QueryResult::write_result(1, bson_as_i64(&result.inserted_id), 0))
            }
            DocOperation::InsertMany => {
                let docs = json_array_to_bson_docs(&query.params)?;
                let result = collection.insert_many(docs).await.map_err(DbError::from)?;
                Ok(QueryResult::write_result(result.inserted_ids.len() as u64, None, 0))
            }
            DocOperation::UpdateOne | DocOperation::UpdateMany => {
                let obj = query.params.as_object().cloned().unwrap_or_default();
                let filter: Document = obj
                    .get("filter")
                    .map(bson_from_json)
                    .transpose()?
                    .unwrap_or_default();
                let update_json = obj
                    .get("update")
                    .ok_or_else(|| DbError::query("update requires an 'update' parameter", &query.collection))?;
                let update: Document = wrap_update_in_set(update_json)?;
                let rows_affected = if matches!(query.operation, DocOperation::UpdateOne) {
                    collection.update_one(filter, update).await.map_err(DbError::from)?.modified_count
                } else {
                    collection.update_many(filter, update).await.map_err(DbError::from)?.modified_count
                };
                Ok(QueryResult::write_result(rows_affected, None, 0))
            }
            DocOperation::DeleteOne => {
                let filter: Document = bson_from_json(&query.params)?;
                let result = collection.delete_one(filter).await.map_err(DbError::from)?;
                Ok(QueryResult::write_result(result.deleted_count, None, 0))
            }
            DocOperation::DeleteMany => {
                let filter: Document = bson_from_json(&query.params)?;
                let result = collection.delete_many(filter).await.map_err(DbError::from)?;
                Ok(QueryResult::write_result(result.deleted_count, None, 0))
            }
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Document updates are wrapped in `$set` unless already operator-keyed
/// (keys starting with `$`), matching Mongo's own update-document rules.
fn wrap_update_in_set(update_json: &serde_json::Value) -> DbResult<Document> {
    let doc: Document = bson_from_json(update_json)?;
    if doc.keys().any(|k| k.starts_with('$')) {
        Ok(doc)
    } else {
        Ok(bson::doc! { "$set": doc })
    }
}

fn bson_from_json(value: &serde_json::Value) -> DbResult<Document> {
    if value.is_null() {
        return Ok(Document::new());
    }
    bson::to_document(value).map_err(|e| DbError::query(format!("invalid document: {e}"), ""))
}

fn json_array_to_bson_docs(value: &serde_json::Value) -> DbResult<Vec<Document>> {
    let arr = value
        .as_array()
        .ok_or_else(|| DbError::query("expected a JSON array", ""))?;
    arr.iter().map(bson_from_json).collect()
}

fn bson_as_i64(bson: &Bson) -> Option<i64> {
    match bson {
        Bson::Int32(i) => Some(*i as i64),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

fn bson_to_json(bson: Bson) -> serde_json::Value {
    serde_json::to_value(bson).unwrap_or(serde_json::Value::Null)
}

fn docs_to_result(docs: Vec<Document>, limit: u32) -> QueryResult {
    let truncated = docs.len() > limit as usize;
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = docs
        .into_iter()
        .take(limit.max(1) as usize)
        .map(|doc| match bson_to_json(Bson::Document(doc)) {
            serde_json::Value::Object(m) => m,
            _ => serde_json::Map::new(),
        })
        .collect();

    let columns = rows
        .first()
        .map(|row| row.keys().map(|k| ColumnMetadata::new(k.clone(), "bson", true)).collect())
        .unwrap_or_default();

    QueryResult {
        columns,
        rows,
        rows_affected: None,
        last_insert_id: None,
        truncated,
        execution_time_ms: 0,
    }
}
