//! A JSON document collection stored in SQLite.
//!
//! Each collection is one table of `(_id, doc)` rows. Store queries are
//! compiled into parameterized SQL over `json_extract`, so field paths and
//! values are always bound, never spliced into the statement text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, Level};
use logging_timer::timer;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Map, Value};

use super::document::{DocumentStore, Find, StoreQuery};
use crate::error::DataKitError;
use crate::query::{SortDirection, SortSpec};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone)]
pub struct SqliteCollection {
    pool: Pool<SqliteConnectionManager>,
    table: String,
}

impl SqliteCollection {
    /// Opens (creating if needed) the collection `name` in the database file
    /// at `path`.
    pub fn open(path: &Path, name: &str) -> Result<Self, DataKitError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager.with_init(init_connection))?;
        Self::with_pool(pool, name)
    }

    /// A private in-memory collection. The pool holds one connection that is
    /// never recycled, since the data lives and dies with it.
    pub fn open_in_memory(name: &str) -> Result<Self, DataKitError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager.with_init(init_connection))?;
        Self::with_pool(pool, name)
    }

    fn with_pool(pool: Pool<SqliteConnectionManager>, name: &str) -> Result<Self, DataKitError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DataKitError::InvalidField(name.to_owned()));
        }

        let conn = pool.get()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{name}\" (
                _id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc TEXT NOT NULL
            )"
        ))?;

        Ok(Self {
            pool,
            table: name.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    /// Inserts one document and returns its assigned `_id`. The id is also
    /// written into the stored document.
    pub fn insert(&self, doc: Value) -> Result<i64, DataKitError> {
        let ids = self.insert_many(vec![doc])?;
        Ok(ids[0])
    }

    pub fn insert_many(&self, docs: Vec<Value>) -> Result<Vec<i64>, DataKitError> {
        let _tmr = timer!(Level::Trace; "SqliteCollection::insert_many", "{} {}", self.table, docs.len());

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(docs.len());

        {
            let mut insert = tx.prepare(&format!("INSERT INTO \"{}\" (doc) VALUES (?1)", self.table))?;
            let mut stamp = tx.prepare(&format!(
                "UPDATE \"{}\" SET doc = json_set(doc, '$._id', _id) WHERE _id = ?1",
                self.table
            ))?;

            for doc in docs {
                if !doc.is_object() {
                    return Err(DataKitError::Error(
                        "only JSON objects can be stored as documents".to_owned(),
                    ));
                }
                insert.execute(params![serde_json::to_string(&doc)?])?;
                let id = tx.last_insert_rowid();
                stamp.execute(params![id])?;
                ids.push(id);
            }
        }

        tx.commit()?;
        Ok(ids)
    }

    fn count_blocking(&self, query: &StoreQuery) -> Result<u64, DataKitError> {
        let _tmr = timer!(Level::Trace; "SqliteCollection::count", "{}", self.table);

        let mut params = Vec::new();
        let clause = compile_query(query, &mut params)?;
        let sql = format!("SELECT COUNT(*) FROM \"{}\" WHERE {clause}", self.table);
        debug!("{sql}");

        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn find_blocking(&self, find: &Find) -> Result<Vec<Value>, DataKitError> {
        let _tmr = timer!(Level::Trace; "SqliteCollection::find", "{}", self.table);

        let mut params = Vec::new();
        let clause = compile_query(&find.query, &mut params)?;
        let order = compile_sort(&find.sort, &mut params)?;

        // LIMIT -1 means no limit in SQLite
        let limit = find.limit.map(|l| l.min(i64::MAX as u64) as i64).unwrap_or(-1);
        params.push(SqlValue::Integer(limit));
        params.push(SqlValue::Integer(find.skip.min(i64::MAX as u64) as i64));

        let sql = format!(
            "SELECT doc FROM \"{}\" WHERE {clause} ORDER BY {order} LIMIT ? OFFSET ?",
            self.table
        );
        debug!("{sql}");

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(serde_json::from_str(&row?)?);
        }
        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for SqliteCollection {
    type Document = Value;

    async fn count_documents(&self, query: &StoreQuery) -> Result<u64, DataKitError> {
        let this = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || this.count_blocking(&query))
            .await
            .map_err(|e| DataKitError::Backend(e.to_string()))?
    }

    async fn find(&self, find: Find) -> Result<Vec<Value>, DataKitError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.find_blocking(&find))
            .await
            .map_err(|e| DataKitError::Backend(e.to_string()))?
    }
}

/// Registers `regexp(pattern, text)` so `text REGEXP pattern` works. Compiled
/// patterns are cached per statement argument. Non-text values never match.
fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let re: Arc<Regex> = ctx.get_or_create_aux(0, |vr| -> Result<_, BoxError> {
                Ok(Regex::new(vr.as_str()?)?)
            })?;

            let is_match = match ctx.get_raw(1) {
                ValueRef::Text(text) => std::str::from_utf8(text)
                    .map(|s| re.is_match(s))
                    .unwrap_or(false),
                _ => false,
            };
            Ok(is_match)
        },
    )
}

/// Compiles a store query into a SQL boolean expression over the `doc`
/// column, appending bound parameters in order.
pub fn compile_query(query: &StoreQuery, params: &mut Vec<SqlValue>) -> Result<String, DataKitError> {
    let mut clauses = Vec::new();

    for (key, condition) in query {
        let clause = match key.as_str() {
            "$and" => compile_logical(condition, " AND ", "1", params)?,
            "$or" => compile_logical(condition, " OR ", "0", params)?,
            op if op.starts_with('$') => return Err(DataKitError::UnsupportedOperator(op.to_owned())),
            field => compile_field(field, condition, params)?,
        };
        clauses.push(clause);
    }

    if clauses.is_empty() {
        return Ok("1".to_owned());
    }
    Ok(clauses.join(" AND "))
}

/// Builds an ORDER BY list. `_id` breaks ties unless it is already sorted on.
pub fn compile_sort(sort: &SortSpec, params: &mut Vec<SqlValue>) -> Result<String, DataKitError> {
    let mut terms = Vec::new();

    for (field, direction) in sort.iter() {
        params.push(SqlValue::Text(json_path(field)?));
        let dir = match direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        terms.push(format!("json_extract(doc, ?) {dir}"));
    }

    if !sort.fields().any(|f| f == "_id") {
        terms.push("_id ASC".to_owned());
    }
    Ok(terms.join(", "))
}

fn compile_logical(
    condition: &Value,
    joiner: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String, DataKitError> {
    let branches = condition
        .as_array()
        .ok_or_else(|| DataKitError::UnsupportedOperator("logical operator expects an array".to_owned()))?;

    if branches.is_empty() {
        return Ok(empty.to_owned());
    }

    let mut parts = Vec::with_capacity(branches.len());
    for branch in branches {
        let branch = branch.as_object().ok_or_else(|| {
            DataKitError::UnsupportedOperator("logical operator branches must be objects".to_owned())
        })?;
        parts.push(format!("({})", compile_query(branch, params)?));
    }
    Ok(format!("({})", parts.join(joiner)))
}

fn compile_field(field: &str, condition: &Value, params: &mut Vec<SqlValue>) -> Result<String, DataKitError> {
    let path = json_path(field)?;

    match condition {
        Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
            compile_operators(&path, ops, params)
        }
        other => compile_eq(&path, other, params),
    }
}

fn compile_operators(
    path: &str,
    ops: &Map<String, Value>,
    params: &mut Vec<SqlValue>,
) -> Result<String, DataKitError> {
    let mut clauses = Vec::new();

    for (op, operand) in ops {
        let clause = match op.as_str() {
            "$eq" => compile_eq(path, operand, params)?,
            "$ne" => format!("NOT {}", compile_eq(path, operand, params)?),
            "$gt" => compile_compare(path, ">", operand, params)?,
            "$gte" => compile_compare(path, ">=", operand, params)?,
            "$lt" => compile_compare(path, "<", operand, params)?,
            "$lte" => compile_compare(path, "<=", operand, params)?,
            "$in" => compile_in(path, operand, params)?,
            "$nin" => format!("NOT {}", compile_in(path, operand, params)?),
            "$exists" => {
                params.push(SqlValue::Text(path.to_owned()));
                match operand.as_bool() {
                    Some(true) => "json_type(doc, ?) IS NOT NULL".to_owned(),
                    Some(false) => "json_type(doc, ?) IS NULL".to_owned(),
                    None => {
                        return Err(DataKitError::UnsupportedOperator(
                            "$exists expects a boolean".to_owned(),
                        ))
                    }
                }
            }
            "$regex" => compile_regex(path, operand, ops.get("$options"), params)?,
            "$options" if ops.contains_key("$regex") => continue,
            other => return Err(DataKitError::UnsupportedOperator(other.to_owned())),
        };
        clauses.push(clause);
    }

    if clauses.is_empty() {
        return Ok("1".to_owned());
    }
    Ok(format!("({})", clauses.join(" AND ")))
}

/// Equality. A null operand matches null or missing fields; an array field
/// matches when any element equals the operand. Scalars must also agree on
/// JSON type, so `true` never equals `1`.
fn compile_eq(path: &str, operand: &Value, params: &mut Vec<SqlValue>) -> Result<String, DataKitError> {
    match operand {
        Value::Null => {
            params.push(SqlValue::Text(path.to_owned()));
            Ok("(json_extract(doc, ?) IS NULL)".to_owned())
        }
        Value::Object(_) | Value::Array(_) => {
            params.push(SqlValue::Text(path.to_owned()));
            params.push(SqlValue::Text(serde_json::to_string(operand)?));
            Ok("(json_extract(doc, ?) = json(?))".to_owned())
        }
        scalar => Ok(compile_scalar_eq(path, scalar, params)),
    }
}

/// Array fields are searched element by element; anything else is compared
/// directly, so an object field never matches a scalar through its members.
fn compile_scalar_eq(path: &str, scalar: &Value, params: &mut Vec<SqlValue>) -> String {
    let types = json_types(scalar);
    for _ in 0..2 {
        params.push(SqlValue::Text(path.to_owned()));
    }
    params.push(sql_value(scalar));
    for _ in 0..2 {
        params.push(SqlValue::Text(path.to_owned()));
    }
    params.push(sql_value(scalar));

    format!(
        "COALESCE((CASE WHEN json_type(doc, ?) = 'array' \
         THEN EXISTS (SELECT 1 FROM json_each(doc, ?) WHERE json_each.type IN ({types}) AND json_each.value = ?) \
         ELSE json_type(doc, ?) IN ({types}) AND json_extract(doc, ?) = ? END), 0)"
    )
}

fn compile_in(path: &str, operand: &Value, params: &mut Vec<SqlValue>) -> Result<String, DataKitError> {
    let options = operand
        .as_array()
        .ok_or_else(|| DataKitError::UnsupportedOperator("$in expects an array".to_owned()))?;

    let clauses: Vec<String> = options
        .iter()
        .filter(|v| !matches!(v, Value::Null | Value::Object(_) | Value::Array(_)))
        .map(|v| compile_scalar_eq(path, v, params))
        .collect();

    if clauses.is_empty() {
        return Ok("(0)".to_owned());
    }
    Ok(format!("({})", clauses.join(" OR ")))
}

/// SQLite `json_type` names for a scalar operand
fn json_types(scalar: &Value) -> &'static str {
    match scalar {
        Value::Bool(true) => "'true'",
        Value::Bool(false) => "'false'",
        Value::Number(_) => "'integer', 'real'",
        _ => "'text'",
    }
}

/// Range comparison restricted to values of the operand's type
fn compile_compare(
    path: &str,
    op: &str,
    operand: &Value,
    params: &mut Vec<SqlValue>,
) -> Result<String, DataKitError> {
    let types = match operand {
        Value::Number(_) => "'integer', 'real'",
        Value::String(_) => "'text'",
        _ => {
            return Err(DataKitError::UnsupportedOperator(format!(
                "range comparison with {operand}"
            )))
        }
    };

    params.push(SqlValue::Text(path.to_owned()));
    params.push(SqlValue::Text(path.to_owned()));
    params.push(sql_value(operand));

    Ok(format!(
        "(json_type(doc, ?) IN ({types}) AND json_extract(doc, ?) {op} ?)"
    ))
}

fn compile_regex(
    path: &str,
    pattern: &Value,
    options: Option<&Value>,
    params: &mut Vec<SqlValue>,
) -> Result<String, DataKitError> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| DataKitError::UnsupportedOperator("$regex expects a string".to_owned()))?;

    let mut flags = String::new();
    if let Some(options) = options {
        let options = options
            .as_str()
            .ok_or_else(|| DataKitError::UnsupportedOperator("$options expects a string".to_owned()))?;
        for c in options.chars() {
            match c {
                'i' | 'm' | 's' | 'x' => flags.push(c),
                other => {
                    return Err(DataKitError::UnsupportedOperator(format!(
                        "$options flag '{other}'"
                    )))
                }
            }
        }
    }

    let pattern = if flags.is_empty() {
        pattern.to_owned()
    } else {
        format!("(?{flags}){pattern}")
    };

    // Surface bad patterns here rather than as an opaque SQLite failure
    Regex::new(&pattern)?;

    params.push(SqlValue::Text(path.to_owned()));
    params.push(SqlValue::Text(pattern));
    Ok("(json_extract(doc, ?) REGEXP ?)".to_owned())
}

/// `address.city` -> `$."address"."city"`
fn json_path(field: &str) -> Result<String, DataKitError> {
    if field.is_empty()
        || field.starts_with('$')
        || field.contains('"')
        || field.split('.').any(str::is_empty)
    {
        return Err(DataKitError::InvalidField(field.to_owned()));
    }

    let mut path = String::from("$");
    for segment in field.split('.') {
        path.push_str(".\"");
        path.push_str(segment);
        path.push('"');
    }
    Ok(path)
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn query(value: Value) -> StoreQuery {
        value.as_object().unwrap().clone()
    }

    fn people() -> SqliteCollection {
        let coll = SqliteCollection::open_in_memory("people").unwrap();
        coll.insert_many(vec![
            json!({"name": "Ada Lovelace", "email": "ada@example.com", "role": "admin", "age": 36, "active": true, "tags": ["math", "poetry"]}),
            json!({"name": "Alan Turing", "email": "alan@example.com", "role": "user", "age": 41, "active": true, "tags": ["math"]}),
            json!({"name": "Grace Hopper", "email": "grace@navy.mil", "role": "admin", "age": 85, "active": false}),
            json!({"name": "Evil (Corp)*", "email": "evil@example.com", "role": "user", "age": 20, "active": false, "nickname": null}),
        ])
        .unwrap();
        coll
    }

    async fn names(coll: &SqliteCollection, q: Value) -> Vec<String> {
        let find = Find::new(query(q)).sort(SortSpec::new().with("_id", SortDirection::Asc));
        coll.find(find)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d["name"].as_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn test_json_path_validation() {
        assert_eq!(json_path("address.city").unwrap(), r#"$."address"."city""#);
        assert!(matches!(json_path("$where"), Err(DataKitError::InvalidField(_))));
        assert!(matches!(json_path("a\"b"), Err(DataKitError::InvalidField(_))));
        assert!(matches!(json_path("a..b"), Err(DataKitError::InvalidField(_))));
    }

    #[test]
    fn test_compile_binds_values() {
        let mut params = Vec::new();
        let sql = compile_query(&query(json!({"age": {"$gte": 30}})), &mut params).unwrap();
        assert_eq!(
            sql,
            "((json_type(doc, ?) IN ('integer', 'real') AND json_extract(doc, ?) >= ?))"
        );
        assert_eq!(
            params,
            vec![
                SqlValue::Text(r#"$."age""#.into()),
                SqlValue::Text(r#"$."age""#.into()),
                SqlValue::Integer(30)
            ]
        );
    }

    #[test]
    fn test_unsupported_operators() {
        let mut params = Vec::new();
        assert!(matches!(
            compile_query(&query(json!({"$where": "1"})), &mut params),
            Err(DataKitError::UnsupportedOperator(op)) if op == "$where"
        ));
        assert!(matches!(
            compile_query(&query(json!({"age": {"$mod": [2, 0]}})), &mut params),
            Err(DataKitError::UnsupportedOperator(op)) if op == "$mod"
        ));
    }

    #[test]
    fn test_insert_assigns_ids() {
        let coll = SqliteCollection::open_in_memory("things").unwrap();
        assert_eq!(coll.insert(json!({"a": 1})).unwrap(), 1);
        assert_eq!(coll.insert(json!({"a": 2})).unwrap(), 2);
        assert!(coll.insert(json!([1, 2])).is_err());
    }

    #[test]
    fn test_rejects_bad_collection_names() {
        assert!(matches!(
            SqliteCollection::open_in_memory("people; DROP TABLE x"),
            Err(DataKitError::InvalidField(_))
        ));
    }

    #[tokio::test]
    async fn test_equality_and_membership() {
        let coll = people();
        assert_eq!(
            names(&coll, json!({"role": "admin"})).await,
            vec!["Ada Lovelace", "Grace Hopper"]
        );
        assert_eq!(names(&coll, json!({"active": false})).await.len(), 2);
        assert_eq!(
            names(&coll, json!({"tags": "math"})).await,
            vec!["Ada Lovelace", "Alan Turing"]
        );
        assert_eq!(
            names(&coll, json!({"age": {"$in": [20, 85]}})).await,
            vec!["Grace Hopper", "Evil (Corp)*"]
        );
        assert_eq!(names(&coll, json!({"role": {"$nin": ["admin"]}})).await.len(), 2);
        assert!(names(&coll, json!({"role": {"$in": []}})).await.is_empty());
    }

    #[tokio::test]
    async fn test_equality_does_not_descend_into_objects() {
        let coll = SqliteCollection::open_in_memory("places").unwrap();
        coll.insert_many(vec![
            json!({"name": "nested", "address": {"city": "Oslo"}, "active": true}),
            json!({"name": "flat", "address": "Oslo", "active": 1}),
        ])
        .unwrap();

        assert_eq!(names(&coll, json!({"address": "Oslo"})).await, vec!["flat"]);
        assert_eq!(names(&coll, json!({"address.city": "Oslo"})).await, vec!["nested"]);
        assert_eq!(names(&coll, json!({"active": true})).await, vec!["nested"]);
        assert_eq!(names(&coll, json!({"active": 1})).await, vec!["flat"]);
        assert_eq!(
            names(&coll, json!({"active": {"$in": [true, "x"]}})).await,
            vec!["nested"]
        );
        assert_eq!(names(&coll, json!({"active": {"$ne": true}})).await, vec!["flat"]);
        assert_eq!(
            names(&coll, json!({"missing": {"$ne": "x"}})).await,
            vec!["nested", "flat"]
        );
    }

    #[tokio::test]
    async fn test_ranges_and_existence() {
        let coll = people();
        assert_eq!(
            names(&coll, json!({"age": {"$gt": 36, "$lte": 85}})).await,
            vec!["Alan Turing", "Grace Hopper"]
        );
        assert_eq!(names(&coll, json!({"tags": {"$exists": true}})).await.len(), 2);
        assert_eq!(
            names(&coll, json!({"nickname": {"$exists": true}})).await,
            vec!["Evil (Corp)*"]
        );
        // null matches explicit null and missing fields
        assert_eq!(names(&coll, json!({"nickname": null})).await.len(), 4);
        assert_eq!(names(&coll, json!({"role": {"$ne": "user"}})).await.len(), 2);
    }

    #[tokio::test]
    async fn test_regex_case_insensitive_and_escaped() {
        let coll = people();
        assert_eq!(
            names(&coll, json!({"name": {"$regex": "ADA", "$options": "i"}})).await,
            vec!["Ada Lovelace"]
        );
        assert!(names(&coll, json!({"name": {"$regex": "ADA"}})).await.is_empty());

        let escaped = crate::utils::Utils::escape_regex("(Corp)*");
        assert_eq!(
            names(&coll, json!({"name": {"$regex": escaped, "$options": "i"}})).await,
            vec!["Evil (Corp)*"]
        );
    }

    #[tokio::test]
    async fn test_or_clause() {
        let coll = people();
        let q = json!({
            "$or": [
                {"name": {"$regex": "navy", "$options": "i"}},
                {"email": {"$regex": "navy", "$options": "i"}}
            ],
            "active": false
        });
        assert_eq!(names(&coll, q).await, vec!["Grace Hopper"]);
    }

    #[tokio::test]
    async fn test_sort_skip_limit_and_count() {
        let coll = people();
        let q = query(json!({"age": {"$gte": 30}}));

        assert_eq!(coll.count_documents(&q).await.unwrap(), 3);

        let find = Find::new(q)
            .sort(SortSpec::new().with("age", SortDirection::Desc))
            .limit(2)
            .skip(1);
        let docs = coll.find(find).await.unwrap();
        let ages: Vec<i64> = docs.iter().map(|d| d["age"].as_i64().unwrap()).collect();
        assert_eq!(ages, vec![41, 36]);
        assert!(docs.iter().all(|d| d["_id"].is_i64()));
    }

    #[tokio::test]
    async fn test_file_backed_collection_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("datakit.db");

        {
            let coll = SqliteCollection::open(&path, "notes").unwrap();
            coll.insert(json!({"title": "first"})).unwrap();
        }

        let coll = SqliteCollection::open(&path, "notes").unwrap();
        assert_eq!(coll.count_documents(&StoreQuery::new()).await.unwrap(), 1);
    }
}
