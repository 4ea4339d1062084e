use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use serde_json::{Map, Value};

use super::{Adapter, FetchParams, Page};
use crate::error::DataKitError;
use crate::query::{FilterConfig, MatchType};
use crate::sort::{compare_numbers, sort_rows};
use crate::utils::Utils;

/// Records the in-memory adapter can filter and sort: anything that can
/// answer a dotted-path field lookup.
pub trait Document: Send + Sync {
    fn field(&self, path: &str) -> Option<&Value>;
}

impl Document for Value {
    fn field(&self, path: &str) -> Option<&Value> {
        Utils::value_at_path(self, path)
    }
}

impl Document for Map<String, Value> {
    fn field(&self, path: &str) -> Option<&Value> {
        Utils::map_value_at_path(self, path)
    }
}

/// Adapter over a fixed dataset held in memory. Useful for demos, tests and
/// small reference tables. The dataset is shared read-only; every call builds
/// its own filtered and sorted view.
pub struct MemoryAdapter<T> {
    dataset: Arc<[T]>,
    default_match: MatchType,
}

impl<T> MemoryAdapter<T> {
    pub fn new(dataset: impl Into<Arc<[T]>>) -> Self {
        Self {
            dataset: dataset.into(),
            default_match: MatchType::Exact,
        }
    }

    /// Match type for filter keys with no `filter_config` entry
    pub fn with_default_match(mut self, match_type: MatchType) -> Self {
        self.default_match = match_type;
        self
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }
}

impl<T: Document> MemoryAdapter<T> {
    fn matches_query(row: &T, query: Option<&Map<String, Value>>) -> bool {
        let Some(query) = query else {
            return true;
        };

        query
            .iter()
            .filter(|(_, value)| Utils::is_provided(value))
            .all(|(key, value)| matches_exact(row.field(key), value))
    }

    fn matches_filter(
        &self,
        row: &T,
        filter: &Map<String, Value>,
        config: Option<&FilterConfig>,
    ) -> bool {
        filter
            .iter()
            .filter(|(_, value)| Utils::is_provided(value))
            .all(|(key, value)| {
                let entry = config.and_then(|c| c.get(key));
                let field = entry
                    .and_then(|e| e.field.as_deref())
                    .unwrap_or(key.as_str());
                let match_type = entry.map(|e| e.match_type).unwrap_or(self.default_match);

                match match_type {
                    MatchType::Regex => matches_regex_like(row.field(field), value),
                    MatchType::Exact => matches_exact(row.field(field), value),
                }
            })
    }
}

#[async_trait]
impl<T> Adapter<T> for MemoryAdapter<T>
where
    T: Document + Clone + Send + Sync + 'static,
{
    async fn fetch(&self, params: FetchParams) -> Result<Page<T>, DataKitError> {
        let query = params.request.query.as_ref();
        let config = params.request.filter_config.as_ref();

        let mut rows: Vec<&T> = self
            .dataset
            .iter()
            .filter(|row| Self::matches_query(row, query))
            .filter(|row| self.matches_filter(row, &params.filter, config))
            .collect();

        sort_rows(&mut rows, &params.sorts, |row, path| row.field(path));

        let total = rows.len() as u64;
        let skip = usize::try_from(params.skip()).unwrap_or(usize::MAX);
        let limit = usize::try_from(params.limit).unwrap_or(usize::MAX);

        let items: Vec<T> = rows.into_iter().skip(skip).take(limit).cloned().collect();

        trace!(
            "Memory adapter: {} of {} rows matched, returning {}",
            total,
            self.dataset.len(),
            items.len()
        );

        Ok(Page { items, total })
    }
}

/// Equality, with numbers compared by value (1 == 1.0). An array on the
/// expected side means membership; an array on the record side matches when
/// any element does.
pub fn matches_exact(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };

    match (actual, expected) {
        (_, Value::Array(options)) => options.iter().any(|o| values_equal(actual, o)),
        (Value::Array(elements), _) => elements.iter().any(|e| values_equal(e, expected)),
        _ => values_equal(actual, expected),
    }
}

/// Case-insensitive substring match on string forms
pub fn matches_regex_like(actual: Option<&Value>, expected: &Value) -> bool {
    let (Some(actual), Some(needle)) = (
        actual.and_then(Utils::display_string),
        Utils::display_string(expected),
    ) else {
        return false;
    };

    actual.to_lowercase().contains(&needle.to_lowercase())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y).is_eq(),
        _ => a == b,
    }
}
