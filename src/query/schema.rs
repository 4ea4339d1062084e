//! Boundary validation for fetch requests arriving over the network.
//!
//! `parse_request` checks the raw JSON shape before anything is deserialized
//! so every rejection names the offending field. The execution layer repeats
//! the primitive-value checks, so callers that build a `FetchRequest` directly
//! are still protected.

use serde_json::{Map, Value};

use super::{Action, FetchRequest, MAX_SORTS, MAX_SORT_PATH_LEN};
use crate::error::DataKitError;

/// Upper bound on `limit` accepted at the boundary
pub const MAX_REQUEST_LIMIT: u64 = 100;

const KNOWN_FIELDS: [&str; 8] = [
    "action",
    "page",
    "limit",
    "sort",
    "sorts",
    "query",
    "filter",
    "filterConfig",
];

pub fn parse_request(value: &Value) -> Result<FetchRequest, DataKitError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DataKitError::schema("$", "expected an object"))?;

    if let Some(unknown) = obj.keys().find(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
        return Err(DataKitError::schema(unknown.as_str(), "unknown field"));
    }

    if let Some(action) = obj.get("action") {
        match action.as_str() {
            Some(Action::FETCH) => {}
            _ => {
                return Err(DataKitError::schema(
                    "action",
                    format!("expected \"{}\"", Action::FETCH),
                ))
            }
        }
    }

    if let Some(page) = obj.get("page") {
        check_positive_int("page", page)?;
    }

    if let Some(limit) = obj.get("limit") {
        let limit = check_positive_int("limit", limit)?;
        if limit > MAX_REQUEST_LIMIT {
            return Err(DataKitError::schema(
                "limit",
                format!("must be at most {MAX_REQUEST_LIMIT}"),
            ));
        }
    }

    if let Some(query) = obj.get("query") {
        let query = expect_object("query", query)?;
        for (key, v) in query {
            if !matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                return Err(DataKitError::schema(
                    format!("query.{key}"),
                    "must be a string, number or boolean",
                ));
            }
        }
    }

    if let Some(filter) = obj.get("filter") {
        let filter = expect_object("filter", filter)?;
        for (key, v) in filter {
            if matches!(v, Value::Object(_) | Value::Array(_)) {
                return Err(DataKitError::schema(
                    format!("filter.{key}"),
                    "must be a string, number, boolean or null",
                ));
            }
        }
    }

    if let Some(config) = obj.get("filterConfig") {
        let config = expect_object("filterConfig", config)?;
        for (key, entry) in config {
            check_filter_config_entry(key, entry)?;
        }
    }

    if let Some(sorts) = obj.get("sorts") {
        let sorts = sorts
            .as_array()
            .ok_or_else(|| DataKitError::schema("sorts", "expected an array"))?;
        if sorts.len() > MAX_SORTS {
            return Err(DataKitError::schema(
                "sorts",
                format!("at most {MAX_SORTS} sort entries are allowed"),
            ));
        }
        for (i, entry) in sorts.iter().enumerate() {
            check_sort_entry(i, entry)?;
        }
    }

    if let Some(sort) = obj.get("sort") {
        let sort = expect_object("sort", sort)?;
        for (key, direction) in sort {
            check_direction(&format!("sort.{key}"), direction)?;
        }
    }

    Ok(serde_json::from_value(value.clone())?)
}

fn expect_object<'a>(path: &str, value: &'a Value) -> Result<&'a Map<String, Value>, DataKitError> {
    value
        .as_object()
        .ok_or_else(|| DataKitError::schema(path, "expected an object"))
}

fn check_positive_int(path: &str, value: &Value) -> Result<u64, DataKitError> {
    match value.as_u64() {
        Some(n) if n >= 1 => Ok(n),
        _ => Err(DataKitError::schema(path, "must be a positive integer")),
    }
}

fn check_direction(path: &str, value: &Value) -> Result<(), DataKitError> {
    match value.as_i64() {
        Some(1) | Some(-1) => Ok(()),
        _ => Err(DataKitError::schema(path, "must be 1 or -1")),
    }
}

fn check_sort_entry(index: usize, entry: &Value) -> Result<(), DataKitError> {
    let base = format!("sorts[{index}]");
    let obj = expect_object(&base, entry)?;

    if let Some(unknown) = obj.keys().find(|k| *k != "path" && *k != "value") {
        return Err(DataKitError::schema(format!("{base}.{unknown}"), "unknown field"));
    }

    match obj.get("path").and_then(Value::as_str) {
        Some(path) if path.chars().count() <= MAX_SORT_PATH_LEN => {}
        Some(_) => {
            return Err(DataKitError::schema(
                format!("{base}.path"),
                format!("must be at most {MAX_SORT_PATH_LEN} characters"),
            ))
        }
        None => return Err(DataKitError::schema(format!("{base}.path"), "expected a string")),
    }

    match obj.get("value") {
        Some(v) => check_direction(&format!("{base}.value"), v),
        None => Err(DataKitError::schema(format!("{base}.value"), "is required")),
    }
}

fn check_filter_config_entry(key: &str, entry: &Value) -> Result<(), DataKitError> {
    let base = format!("filterConfig.{key}");
    let obj = expect_object(&base, entry)?;

    if let Some(unknown) = obj.keys().find(|k| *k != "type" && *k != "field") {
        return Err(DataKitError::schema(format!("{base}.{unknown}"), "unknown field"));
    }

    match obj.get("type").and_then(Value::as_str) {
        Some("REGEX") | Some("EXACT") => {}
        _ => {
            return Err(DataKitError::schema(
                format!("{base}.type"),
                "must be \"REGEX\" or \"EXACT\"",
            ))
        }
    }

    match obj.get("field") {
        None | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(DataKitError::schema(format!("{base}.field"), "expected a string")),
    }
}
