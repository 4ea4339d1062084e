//! Mirroring controller state into a URL query string.
//!
//! Format: `page=3&limit=25&sort=age:-1,name:1&f_name=ada&q_active=true`.
//! `page` is written only past the first page and `limit` only when it differs
//! from the controller's initial limit.

use std::sync::{Arc, Mutex};

use log::debug;
use serde_json::{Map, Value};

use crate::query::{SortDirection, SortEntry};
use crate::utils::Utils;

const FILTER_PREFIX: &str = "f_";
const QUERY_PREFIX: &str = "q_";

/// The browser-history capability the controller needs
pub trait Location: Send + Sync {
    /// Current query string, with or without the leading `?`
    fn search(&self) -> String;

    /// Pushes a new history entry with the given query string
    fn push(&self, search: &str);
}

#[derive(Clone, Default)]
pub enum StateMode {
    #[default]
    Memory,
    SearchParams(Arc<dyn Location>),
}

impl StateMode {
    pub fn location(&self) -> Option<&Arc<dyn Location>> {
        match self {
            StateMode::Memory => None,
            StateMode::SearchParams(location) => Some(location),
        }
    }
}

/// A `Location` that keeps its history in memory
#[derive(Debug, Default)]
pub struct MemoryLocation {
    history: Mutex<Vec<String>>,
}

impl MemoryLocation {
    pub fn new(search: &str) -> Self {
        Self {
            history: Mutex::new(vec![strip_question_mark(search).to_owned()]),
        }
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }

    /// Drops the latest entry, like the browser back button. Returns false
    /// when already at the first entry.
    pub fn back(&self) -> bool {
        match self.history.lock() {
            Ok(mut history) if history.len() > 1 => {
                history.pop();
                true
            }
            _ => false,
        }
    }
}

impl Location for MemoryLocation {
    fn search(&self) -> String {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.last().cloned())
            .unwrap_or_default()
    }

    fn push(&self, search: &str) {
        if let Ok(mut history) = self.history.lock() {
            history.push(strip_question_mark(search).to_owned());
        }
    }
}

/// State recovered from a query string. Absent parts are `None` or empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlState {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub sorts: Option<Vec<SortEntry>>,
    pub filter: Map<String, Value>,
    pub query: Map<String, Value>,
}

impl UrlState {
    pub fn is_empty(&self) -> bool {
        self == &UrlState::default()
    }
}

/// The parts of controller state that are mirrored
pub struct UrlSnapshot<'a> {
    pub page: u64,
    pub limit: u64,
    pub initial_limit: u64,
    pub sorts: &'a [SortEntry],
    pub filter: &'a Map<String, Value>,
    pub query: &'a Map<String, Value>,
}

pub fn to_search(state: &UrlSnapshot<'_>) -> String {
    let mut pairs: Vec<(String, String)> = Vec::new();

    if state.page > 1 {
        pairs.push(("page".into(), state.page.to_string()));
    }
    if state.limit != state.initial_limit {
        pairs.push(("limit".into(), state.limit.to_string()));
    }
    if !state.sorts.is_empty() {
        let sort = state
            .sorts
            .iter()
            .map(|s| format!("{}:{}", s.path, s.value.as_i64()))
            .collect::<Vec<_>>()
            .join(",");
        pairs.push(("sort".into(), sort));
    }

    for (prefix, fields) in [(FILTER_PREFIX, state.filter), (QUERY_PREFIX, state.query)] {
        for (key, value) in fields {
            if !Utils::is_provided(value) {
                continue;
            }
            if let Some(text) = Utils::display_string(value) {
                pairs.push((format!("{prefix}{key}"), text));
            }
        }
    }

    serde_urlencoded::to_string(&pairs).unwrap_or_default()
}

pub fn parse_search(search: &str) -> UrlState {
    let pairs: Vec<(String, String)> =
        match serde_urlencoded::from_str(strip_question_mark(search)) {
            Ok(pairs) => pairs,
            Err(e) => {
                debug!("Ignoring unparsable query string '{}': {}", search, e);
                return UrlState::default();
            }
        };

    let mut state = UrlState::default();

    for (key, value) in pairs {
        match key.as_str() {
            "page" => state.page = value.parse().ok().filter(|p| *p > 0),
            "limit" => state.limit = value.parse().ok().filter(|l| *l > 0),
            "sort" => state.sorts = Some(parse_sorts(&value)),
            _ => {
                if let Some(field) = key.strip_prefix(FILTER_PREFIX) {
                    state.filter.insert(field.to_owned(), Value::String(value));
                } else if let Some(field) = key.strip_prefix(QUERY_PREFIX) {
                    state.query.insert(field.to_owned(), Value::String(value));
                }
            }
        }
    }

    state
}

/// `age:-1,name:1` -> entries. A missing direction means ascending; entries
/// with an unknown direction or an empty path are dropped.
fn parse_sorts(value: &str) -> Vec<SortEntry> {
    value
        .split(',')
        .filter_map(|part| {
            let (path, direction) = match part.rsplit_once(':') {
                Some((path, dir)) => (path, dir.parse::<i64>().ok()?),
                None => (part, 1),
            };
            if path.is_empty() {
                return None;
            }
            let direction = SortDirection::try_from(direction).ok()?;
            Some(SortEntry::new(path, direction))
        })
        .collect()
}

fn strip_question_mark(search: &str) -> &str {
    search.strip_prefix('?').unwrap_or(search)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_to_search_omits_defaults() {
        let empty = Map::new();
        let search = to_search(&UrlSnapshot {
            page: 1,
            limit: 10,
            initial_limit: 10,
            sorts: &[],
            filter: &empty,
            query: &empty,
        });
        assert_eq!(search, "");
    }

    #[test]
    fn test_to_search_full() {
        let filter = map(json!({"name": "ada lovelace", "role": "", "age": 30}));
        let query = map(json!({"active": true}));
        let sorts = vec![
            SortEntry::new("age", SortDirection::Desc),
            SortEntry::new("name", SortDirection::Asc),
        ];

        let search = to_search(&UrlSnapshot {
            page: 3,
            limit: 25,
            initial_limit: 10,
            sorts: &sorts,
            filter: &filter,
            query: &query,
        });
        assert_eq!(
            search,
            "page=3&limit=25&sort=age%3A-1%2Cname%3A1&f_name=ada+lovelace&f_age=30&q_active=true"
        );
    }

    #[test]
    fn test_parse_search() {
        let state = parse_search("?page=3&limit=25&sort=age%3A-1%2Cname%3A1&f_name=ada+lovelace&q_active=true&other=x");
        assert_eq!(
            state,
            UrlState {
                page: Some(3),
                limit: Some(25),
                sorts: Some(vec![
                    SortEntry::new("age", SortDirection::Desc),
                    SortEntry::new("name", SortDirection::Asc),
                ]),
                filter: map(json!({"name": "ada lovelace"})),
                query: map(json!({"active": "true"})),
            }
        );
    }

    #[test]
    fn test_parse_ignores_bad_numbers_and_sorts() {
        let state = parse_search("page=abc&limit=0&sort=age:2,name,:1");
        assert_eq!(state.page, None);
        assert_eq!(state.limit, None);
        assert_eq!(state.sorts, Some(vec![SortEntry::new("name", SortDirection::Asc)]));
        assert!(parse_search("").is_empty());
    }

    #[test]
    fn test_round_trip_of_string_state() {
        let filter = map(json!({"name": "a&b=c", "city": "Zürich"}));
        let query = Map::new();
        let sorts = vec![SortEntry::new("address.city", SortDirection::Asc)];
        let search = to_search(&UrlSnapshot {
            page: 2,
            limit: 10,
            initial_limit: 10,
            sorts: &sorts,
            filter: &filter,
            query: &query,
        });

        let state = parse_search(&search);
        assert_eq!(state.page, Some(2));
        assert_eq!(state.limit, None);
        assert_eq!(state.sorts, Some(sorts));
        assert_eq!(state.filter, filter);
    }

    #[test]
    fn test_memory_location_history() {
        let location = MemoryLocation::new("?page=2");
        assert_eq!(location.search(), "page=2");

        location.push("?page=3");
        assert_eq!(location.search(), "page=3");
        assert_eq!(location.history(), vec!["page=2", "page=3"]);

        assert!(location.back());
        assert_eq!(location.search(), "page=2");
        assert!(!location.back());
    }
}
