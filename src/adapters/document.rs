use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Map, Value};

use super::{Adapter, FetchParams, Page};
use crate::error::DataKitError;
use crate::query::{MatchType, SortDirection, SortSpec};
use crate::utils::Utils;

/// An operator-based filter object in the style of document databases:
/// `{"role": "admin", "name": {"$regex": "ada", "$options": "i"}}`
pub type StoreQuery = Map<String, Value>;

/// Replaces automatic filter translation with a caller-built query
pub type FilterFn = Arc<dyn Fn(&Map<String, Value>) -> StoreQuery + Send + Sync>;

/// Translates the value of one filter key into a query fragment
pub type CustomFilterFn = Arc<dyn Fn(&Value) -> StoreQuery + Send + Sync>;

/// A find operation: query plus sort/limit/skip, built by chaining
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Find {
    pub query: StoreQuery,
    pub sort: SortSpec,
    pub limit: Option<u64>,
    pub skip: u64,
}

impl Find {
    pub fn new(query: StoreQuery) -> Self {
        Self {
            query,
            ..Default::default()
        }
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }
}

/// The capability a document database driver has to provide
#[async_trait]
pub trait DocumentStore: Send + Sync {
    type Document: Send + 'static;

    async fn count_documents(&self, query: &StoreQuery) -> Result<u64, DataKitError>;

    async fn find(&self, find: Find) -> Result<Vec<Self::Document>, DataKitError>;
}

/// Static configuration of a document-store adapter
#[derive(Clone, Default)]
pub struct StoreOptions {
    pub filter: Option<FilterFn>,
    pub filter_custom: BTreeMap<String, CustomFilterFn>,
    pub default_sort: Option<SortSpec>,
}

impl StoreOptions {
    pub fn with_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> StoreQuery + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn with_custom<F>(mut self, key: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> StoreQuery + Send + Sync + 'static,
    {
        self.filter_custom.insert(key.into(), Arc::new(f));
        self
    }

    pub fn with_custom_fn(mut self, key: impl Into<String>, f: CustomFilterFn) -> Self {
        self.filter_custom.insert(key.into(), f);
        self
    }

    pub fn with_default_sort(mut self, sort: SortSpec) -> Self {
        self.default_sort = Some(sort);
        self
    }
}

/// Adapter translating normalized parameters into store-native queries
pub struct DocumentAdapter<S: ?Sized> {
    store: Arc<S>,
    options: StoreOptions,
}

impl<S: DocumentStore + ?Sized> DocumentAdapter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_options(store, StoreOptions::default())
    }

    pub fn with_options(store: Arc<S>, options: StoreOptions) -> Self {
        Self { store, options }
    }

    /// Sort priority: legacy `sort` object, then `sorts`, then the default
    pub fn build_sort(&self, params: &FetchParams) -> SortSpec {
        if let Some(sort) = params.request.sort.as_ref().filter(|s| !s.is_empty()) {
            return sort.clone();
        }

        if !params.sorts.is_empty() {
            return SortSpec::from_entries(&params.sorts);
        }

        self.options
            .default_sort
            .clone()
            .unwrap_or_else(|| SortSpec::new().with("_id", SortDirection::Desc))
    }

    pub fn build_query(&self, params: &FetchParams) -> StoreQuery {
        let mut query = StoreQuery::new();

        // Query params are exact matches
        if let Some(request_query) = &params.request.query {
            for (key, value) in request_query {
                if !Utils::is_provided(value) {
                    continue;
                }
                let clause = match value {
                    Value::Array(options) => json!({ "$in": options }),
                    other => other.clone(),
                };
                insert_safe(&mut query, key, clause);
            }
        }

        let filter = &params.filter;
        let custom = &self.options.filter_custom;

        if let Some(filter_fn) = &self.options.filter {
            merge_safe(&mut query, filter_fn(filter));
        } else {
            let unclaimed = filter
                .iter()
                .filter(|(key, value)| Utils::is_provided(value) && !custom.contains_key(*key));

            match &params.request.filter_config {
                Some(config) => {
                    for (key, value) in unclaimed {
                        let Some(entry) = config.get(key) else {
                            continue;
                        };
                        let field = entry.field.as_deref().unwrap_or(key);
                        let clause = match entry.match_type {
                            MatchType::Regex => regex_clause(value),
                            MatchType::Exact => value.clone(),
                        };
                        insert_safe(&mut query, field, clause);
                    }
                }
                None => {
                    for (key, value) in unclaimed {
                        let clause = match value {
                            Value::String(_) => regex_clause(value),
                            other => other.clone(),
                        };
                        insert_safe(&mut query, key, clause);
                    }
                }
            }
        }

        for (key, value) in filter {
            if !Utils::is_provided(value) {
                continue;
            }
            if let Some(custom_fn) = custom.get(key) {
                merge_safe(&mut query, custom_fn(value));
            }
        }

        query
    }
}

#[async_trait]
impl<S> Adapter<S::Document> for DocumentAdapter<S>
where
    S: DocumentStore + ?Sized,
{
    async fn fetch(&self, params: FetchParams) -> Result<Page<S::Document>, DataKitError> {
        let sort = self.build_sort(&params);
        let query = self.build_query(&params);

        debug!(
            "Store query: {} sort: {}",
            Value::Object(query.clone()),
            serde_json::to_string(&sort)?
        );

        let find = Find::new(query.clone())
            .sort(sort)
            .limit(params.limit)
            .skip(params.skip());

        let (total, items) =
            tokio::try_join!(self.store.count_documents(&query), self.store.find(find))?;

        Ok(Page { items, total })
    }
}

/// Case-insensitive pattern clause matching `value` literally
pub fn regex_clause(value: &Value) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    json!({ "$regex": Utils::escape_regex(&text), "$options": "i" })
}

/// A per-key filter that searches several fields at once:
/// `{"$or": [{"name": {"$regex": ..}}, {"email": {"$regex": ..}}]}`.
/// Non-string and empty values produce an empty fragment.
pub fn search_filter<I, S>(fields: I) -> CustomFilterFn
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let fields: Vec<String> = fields.into_iter().map(Into::into).collect();

    Arc::new(move |value: &Value| {
        let mut fragment = StoreQuery::new();
        let Some(text) = value.as_str().filter(|s| !s.is_empty()) else {
            return fragment;
        };

        let escaped = Utils::escape_regex(text);
        let clauses: Vec<Value> = fields
            .iter()
            .map(|field| json!({ field.as_str(): { "$regex": escaped, "$options": "i" } }))
            .collect();
        fragment.insert("$or".to_owned(), Value::Array(clauses));
        fragment
    })
}

fn insert_safe(query: &mut StoreQuery, key: &str, value: Value) {
    if Utils::is_safe_key(key) {
        query.insert(key.to_owned(), value);
    }
}

fn merge_safe(query: &mut StoreQuery, fragment: StoreQuery) {
    for (key, value) in fragment {
        insert_safe(query, &key, value);
    }
}
