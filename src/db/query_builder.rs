//! Query builder (C6): a fluent assembler over the three abstract query
//! variants (spec.md §4.6), grounded in `dbflux_core::SqlQueryBuilder`'s
//! dialect-aware identifier quoting and the original `multi_db/query/sql.py`
//! fluent `.select()/.where_eq()/.build()` call shape.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, DocOperation, DocumentQuery, KvCommand, KvCommandName, QueryParam, SqlQuery};
use std::collections::HashMap;

// ---------------------------------------------------------------------
// SQL builder
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
}

/// Comparison/membership operators (spec.md §4.6's `Operator` enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    NotLike,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

impl Operator {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Between => "BETWEEN",
            Self::NotBetween => "NOT BETWEEN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::Between | Self::NotBetween)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

struct Join {
    table: String,
    join_type: JoinType,
    on_condition: String,
}

/// Either a single bound value or a list, for operators like `IN`/`BETWEEN`
/// that need more than one (spec.md §4.6 validation rules).
#[derive(Debug, Clone)]
pub enum ConditionValue {
    Scalar(QueryParam),
    List(Vec<QueryParam>),
}

struct Condition {
    field: String,
    operator: Operator,
    value: Option<ConditionValue>,
}

fn quote_identifier(name: &str, db_type: DatabaseType) -> String {
    match db_type {
        DatabaseType::Mysql => format!("`{}`", name.replace('`', "``")),
        _ => format!("\"{}\"", name.replace('"', "\"\"")),
    }
}

fn placeholder(name: &str, db_type: DatabaseType) -> String {
    match db_type {
        DatabaseType::Postgres => format!("%({name})s"),
        _ => format!(":{name}"),
    }
}

/// Fluent SQL query builder. Each call site gets disjoint auto-generated
/// parameter names (`p0`, `p1`, ...) so two builders never collide when
/// their output is combined (spec.md §4.6).
pub struct SqlQueryBuilder {
    db_type: DatabaseType,
    query_type: Option<QueryType>,
    resource_name: Option<String>,
    fields: Option<Vec<String>>,
    data: Option<Vec<(String, QueryParam)>>,
    joins: Vec<Join>,
    where_eq: Vec<(String, QueryParam)>,
    conditions: Vec<Condition>,
    group_by: Option<Vec<String>>,
    having: Vec<Condition>,
    order_by: Option<Vec<(String, bool)>>,
    limit: Option<u32>,
    offset: Option<u32>,
    params: HashMap<String, QueryParam>,
    param_counter: u32,
}

impl SqlQueryBuilder {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            query_type: None,
            resource_name: None,
            fields: None,
            data: None,
            joins: Vec::new(),
            where_eq: Vec::new(),
            conditions: Vec::new(),
            group_by: None,
            having: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
            params: HashMap::new(),
            param_counter: 0,
        }
    }

    fn next_param_name(&mut self) -> String {
        let name = format!("p{}", self.param_counter);
        self.param_counter += 1;
        name
    }

    fn bind(&mut self, value: QueryParam) -> String {
        let name = self.next_param_name();
        self.params.insert(name.clone(), value);
        name
    }

    pub fn select(mut self, resource: impl Into<String>, fields: Option<Vec<String>>) -> Self {
        self.query_type = Some(QueryType::Select);
        self.resource_name = Some(resource.into());
        self.fields = fields;
        self
    }

    pub fn insert(mut self, resource: impl Into<String>, data: Vec<(String, QueryParam)>) -> Self {
        self.query_type = Some(QueryType::Insert);
        self.resource_name = Some(resource.into());
        self.data = Some(data);
        self
    }

    pub fn update(mut self, resource: impl Into<String>, data: Vec<(String, QueryParam)>) -> Self {
        self.query_type = Some(QueryType::Update);
        self.resource_name = Some(resource.into());
        self.data = Some(data);
        self
    }

    pub fn delete(mut self, resource: impl Into<String>) -> Self {
        self.query_type = Some(QueryType::Delete);
        self.resource_name = Some(resource.into());
        self
    }

    pub fn join(mut self, table: impl Into<String>, join_type: JoinType, on_condition: impl Into<String>) -> Self {
        self.joins.push(Join {
            table: table.into(),
            join_type,
            on_condition: on_condition.into(),
        });
        self
    }

    /// Simple equality map, combined with `AND` alongside any explicit
    /// conditions added via [`Self::where_condition`].
    pub fn where_eq(mut self, conditions: Vec<(String, QueryParam)>) -> Self {
        self.where_eq = conditions;
        self
    }

    pub fn where_condition(mut self, field: impl Into<String>, operator: Operator, value: Option<ConditionValue>) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator,
            value,
        });
        self
    }

    pub fn group_by(mut self, fields: Vec<String>) -> Self {
        self.group_by = Some(fields);
        self
    }

    pub fn having(mut self, field: impl Into<String>, operator: Operator, value: Option<ConditionValue>) -> Self {
        self.having.push(Condition {
            field: field.into(),
            operator,
            value,
        });
        self
    }

    /// `(field, ascending)` pairs.
    pub fn order_by(mut self, fields: Vec<(String, bool)>) -> Self {
        self.order_by = Some(fields);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    fn render_condition(&mut self, condition: &Condition) -> DbResult<String> {
        let quoted = quote_identifier(&condition.field, self.db_type);
        match condition.operator {
            Operator::IsNull | Operator::IsNotNull => {
                Ok(format!("{quoted} {}", condition.operator.as_sql()))
            }
            op if op.takes_list() => {
                let Some(ConditionValue::List(values)) = &condition.value else {
                    return Err(DbError::query(
                        format!("{} requires a list value", op.as_sql()),
                        &condition.field,
                    ));
                };
                if matches!(op, Operator::Between | Operator::NotBetween) && values.len() != 2 {
                    return Err(DbError::query(
                        format!("{} requires exactly two values", op.as_sql()),
                        &condition.field,
                    ));
                }
                if values.is_empty() {
                    return Err(DbError::query(
                        format!("{} requires at least one value", op.as_sql()),
                        &condition.field,
                    ));
                }
                let values = values.clone();
                if matches!(op, Operator::Between | Operator::NotBetween) {
                    let lo = placeholder(&self.bind(values[0].clone()), self.db_type);
                    let hi = placeholder(&self.bind(values[1].clone()), self.db_type);
                    Ok(format!("{quoted} {} {lo} AND {hi}", op.as_sql()))
                } else {
                    let mut names = Vec::with_capacity(values.len());
                    for v in values {
                        names.push(placeholder(&self.bind(v), self.db_type));
                    }
                    Ok(format!("{quoted} {} ({})", op.as_sql(), names.join(", ")))
                }
            }
            op => {
                let Some(ConditionValue::Scalar(value)) = &condition.value else {
                    return Err(DbError::query(format!("{} requires a value", op.as_sql()), &condition.field));
                };
                let value = value.clone();
                let ph = placeholder(&self.bind(value), self.db_type);
                Ok(format!("{quoted} {} {ph}", op.as_sql()))
            }
        }
    }

    fn render_where(&mut self) -> DbResult<Option<String>> {
        let mut parts = Vec::new();
        for (field, value) in std::mem::take(&mut self.where_eq) {
            let quoted = quote_identifier(&field, self.db_type);
            let ph = placeholder(&self.bind(value), self.db_type);
            parts.push(format!("{quoted} = {ph}"));
        }
        for condition in std::mem::take(&mut self.conditions) {
            parts.push(self.render_condition(&condition)?);
        }
        if parts.is_empty() {
            Ok(None)
        } else {
            Ok(Some(parts.join(" AND ")))
        }
    }

    pub fn build(mut self) -> DbResult<SqlQuery> {
        let query_type = self
            .query_type
            .ok_or_else(|| DbError::query("query builder requires a query_type", ""))?;
        let resource = self
            .resource_name
            .clone()
            .ok_or_else(|| DbError::query("query builder requires a resource_name", ""))?;
        let table = quote_identifier(&resource, self.db_type);

        let sql = match query_type {
            QueryType::Select => {
                let fields = self
                    .fields
                    .clone()
                    .map(|f| f.iter().map(|c| quote_identifier(c, self.db_type)).collect::<Vec<_>>().join(", "))
                    .unwrap_or_else(|| "*".to_string());
                let mut sql = format!("SELECT {fields} FROM {table}");
                for join in &self.joins {
                    sql.push_str(&format!(" {} {} ON {}", join.join_type.as_sql(), join.table, join.on_condition));
                }
                if let Some(where_clause) = self.render_where()? {
                    sql.push_str(&format!(" WHERE {where_clause}"));
                }
                if let Some(group_by) = &self.group_by {
                    sql.push_str(&format!(" GROUP BY {}", group_by.join(", ")));
                }
                if !self.having.is_empty() {
                    let having = std::mem::take(&mut self.having);
                    let mut rendered = Vec::with_capacity(having.len());
                    for condition in &having {
                        rendered.push(self.render_condition(condition)?);
                    }
                    sql.push_str(&format!(" HAVING {}", rendered.join(" AND ")));
                }
                if let Some(order_by) = &self.order_by {
                    let rendered = order_by
                        .iter()
                        .map(|(field, asc)| format!("{} {}", quote_identifier(field, self.db_type), if *asc { "ASC" } else { "DESC" }))
                        .collect::<Vec<_>>()
                        .join(", ");
                    sql.push_str(&format!(" ORDER BY {rendered}"));
                }
                if let Some(limit) = self.limit {
                    sql.push_str(&format!(" LIMIT {limit}"));
                }
                if let Some(offset) = self.offset {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
                sql
            }
            QueryType::Insert => {
                let data = self
                    .data
                    .clone()
                    .ok_or_else(|| DbError::query("insert requires data", &resource))?;
                if data.is_empty() {
                    return Err(DbError::query("insert requires at least one column", &resource));
                }
                let columns = data.iter().map(|(c, _)| quote_identifier(c, self.db_type)).collect::<Vec<_>>().join(", ");
                let mut placeholders = Vec::with_capacity(data.len());
                for (_, value) in data {
                    placeholders.push(placeholder(&self.bind(value), self.db_type));
                }
                format!("INSERT INTO {table} ({columns}) VALUES ({})", placeholders.join(", "))
            }
            QueryType::Update => {
                let data = self
                    .data
                    .clone()
                    .ok_or_else(|| DbError::query("update requires data", &resource))?;
                if data.is_empty() {
                    return Err(DbError::query("update requires at least one column", &resource));
                }
                let mut assignments = Vec::with_capacity(data.len());
                for (column, value) in data {
                    let ph = placeholder(&self.bind(value), self.db_type);
                    assignments.push(format!("{} = {ph}", quote_identifier(&column, self.db_type)));
                }
                let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
                if let Some(where_clause) = self.render_where()? {
                    sql.push_str(&format!(" WHERE {where_clause}"));
                }
                sql
            }
            QueryType::Delete => {
                let mut sql = format!("DELETE FROM {table}");
                if let Some(where_clause) = self.render_where()? {
                    sql.push_str(&format!(" WHERE {where_clause}"));
                }
                sql
            }
        };

        Ok(SqlQuery { sql, params: self.params })
    }
}

// ---------------------------------------------------------------------
// Document (Mongo) builder
// ---------------------------------------------------------------------

/// Wrap a plain field map in `$set` unless the caller already provided an
/// operator-keyed update (spec.md §4.6).
fn wrap_update(update: serde_json::Value) -> serde_json::Value {
    match update.as_object() {
        Some(obj) if obj.keys().any(|k| k.starts_with('$')) => update,
        _ => serde_json::json!({ "$set": update }),
    }
}

pub fn document_find(collection: impl Into<String>, filter: serde_json::Value) -> DocumentQuery {
    DocumentQuery {
        operation: DocOperation::Find,
        collection: collection.into(),
        params: filter,
    }
}

pub fn document_insert_one(collection: impl Into<String>, document: serde_json::Value) -> DocumentQuery {
    DocumentQuery {
        operation: DocOperation::InsertOne,
        collection: collection.into(),
        params: document,
    }
}

pub fn document_update_one(
    collection: impl Into<String>,
    filter: serde_json::Value,
    update: serde_json::Value,
) -> DocumentQuery {
    DocumentQuery {
        operation: DocOperation::UpdateOne,
        collection: collection.into(),
        params: serde_json::json!({ "filter": filter, "update": wrap_update(update) }),
    }
}

pub fn document_delete_one(collection: impl Into<String>, filter: serde_json::Value) -> DocumentQuery {
    DocumentQuery {
        operation: DocOperation::DeleteOne,
        collection: collection.into(),
        params: filter,
    }
}

// ---------------------------------------------------------------------
// KV (Redis) builder
// ---------------------------------------------------------------------

/// `where`/`order_by`/`limit`/`offset` are accepted and silently ignored:
/// Redis has no conditional queries, but callers built against the
/// abstract builder surface should not need a backend-specific branch
/// (spec.md §4.6).
#[derive(Default)]
pub struct KvQueryBuilder {
    command: Option<KvCommandName>,
    key: Option<String>,
    args: Vec<QueryParam>,
}

impl KvQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, key: impl Into<String>) -> Self {
        self.command = Some(KvCommandName::Get);
        self.key = Some(key.into());
        self
    }

    pub fn insert(mut self, key: impl Into<String>, value: QueryParam) -> Self {
        self.command = Some(KvCommandName::Set);
        self.key = Some(key.into());
        self.args = vec![value];
        self
    }

    pub fn update(self, key: impl Into<String>, value: QueryParam) -> Self {
        self.insert(key, value)
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.command = Some(KvCommandName::Del);
        self.key = Some(key.into());
        self
    }

    pub fn expire(mut self, key: impl Into<String>, seconds: i64) -> Self {
        self.command = Some(KvCommandName::Expire);
        self.key = Some(key.into());
        self.args = vec![QueryParam::Int(seconds)];
        self
    }

    pub fn where_clause(self, _conditions: Vec<(String, QueryParam)>) -> Self {
        self
    }

    pub fn order_by(self, _fields: Vec<(String, bool)>) -> Self {
        self
    }

    pub fn limit(self, _limit: u32) -> Self {
        self
    }

    pub fn offset(self, _offset: u32) -> Self {
        self
    }

    pub fn build(self) -> DbResult<KvCommand> {
        let command = self.command.ok_or_else(|| DbError::query("kv builder requires an operation", ""))?;
        let key = self.key.ok_or_else(|| DbError::query("kv builder requires a key", ""))?;
        Ok(KvCommand {
            command,
            key,
            args: self.args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_where_eq_and_order() {
        let query = SqlQueryBuilder::new(DatabaseType::Postgres)
            .select("users", Some(vec!["id".to_string(), "name".to_string()]))
            .where_eq(vec![("active".to_string(), QueryParam::Bool(true))])
            .order_by(vec![("id".to_string(), true)])
            .limit(10)
            .build()
            .unwrap();
        assert!(query.sql.starts_with("SELECT \"id\", \"name\" FROM \"users\" WHERE \"active\" = %(p0)s"));
        assert!(query.sql.ends_with("ORDER BY \"id\" ASC LIMIT 10"));
        assert_eq!(query.params.len(), 1);
    }

    #[test]
    fn in_operator_requires_list() {
        let result = SqlQueryBuilder::new(DatabaseType::Sqlite)
            .select("users", None)
            .where_condition("id", Operator::In, Some(ConditionValue::Scalar(QueryParam::Int(1))))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn between_requires_exactly_two_values() {
        let result = SqlQueryBuilder::new(DatabaseType::Sqlite)
            .select("orders", None)
            .where_condition(
                "created_at",
                Operator::Between,
                Some(ConditionValue::List(vec![QueryParam::Int(1)])),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn build_without_query_type_is_query_error() {
        let result = SqlQueryBuilder::new(DatabaseType::Mysql).build();
        assert!(result.is_err());
    }

    #[test]
    fn insert_emits_mysql_named_placeholders() {
        let query = SqlQueryBuilder::new(DatabaseType::Mysql)
            .insert("users", vec![("name".to_string(), QueryParam::String("Ann".into()))])
            .build()
            .unwrap();
        assert_eq!(query.sql, "INSERT INTO `users` (`name`) VALUES (:p0)");
    }

    #[test]
    fn document_update_wraps_plain_map_in_set() {
        let doc = document_update_one("widgets", serde_json::json!({"id": 1}), serde_json::json!({"qty": 2}));
        assert_eq!(doc.params["update"], serde_json::json!({"$set": {"qty": 2}}));
    }

    #[test]
    fn document_update_leaves_operator_keyed_map_untouched() {
        let doc = document_update_one(
            "widgets",
            serde_json::json!({"id": 1}),
            serde_json::json!({"$inc": {"qty": 1}}),
        );
        assert_eq!(doc.params["update"], serde_json::json!({"$inc": {"qty": 1}}));
    }

    #[test]
    fn kv_builder_accepts_noop_modifiers() {
        let command = KvQueryBuilder::new()
            .select("session:1")
            .where_clause(vec![("ignored".to_string(), QueryParam::Null)])
            .limit(1)
            .build()
            .unwrap();
        assert_eq!(command.command, KvCommandName::Get);
        assert_eq!(command.key, "session:1");
    }
}
