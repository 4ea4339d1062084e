//! Server-side execution of fetch requests.
//!
//! `execute` is the single entry point: it enforces whitelists and the
//! primitive-only rule on untrusted input, normalizes paging, calls the
//! backend and maps the resulting records.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{try_join_all, BoxFuture};
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::adapters::document::{CustomFilterFn, FilterFn, StoreOptions, StoreQuery};
use crate::adapters::{Adapter, DocumentAdapter, DocumentStore, FetchParams};
use crate::error::{DataKitError, FieldKind};
use crate::query::{Action, DataKitResult, FetchRequest, SortSpec};
use crate::utils::Utils;

/// Default upper bound on page size
pub const DEFAULT_MAX_LIMIT: u64 = 100;

/// Where records come from
pub enum Backend<T> {
    /// A ready-made adapter, used as-is
    Adapter(Arc<dyn Adapter<T>>),
    /// A document store driver, wrapped in a `DocumentAdapter`
    Store(Arc<dyn DocumentStore<Document = T>>),
}

impl<T> Clone for Backend<T> {
    fn clone(&self) -> Self {
        match self {
            Backend::Adapter(a) => Backend::Adapter(a.clone()),
            Backend::Store(s) => Backend::Store(s.clone()),
        }
    }
}

impl<T: 'static> Backend<T> {
    pub fn adapter(adapter: impl Adapter<T> + 'static) -> Self {
        Backend::Adapter(Arc::new(adapter))
    }

    pub fn store(store: impl DocumentStore<Document = T> + 'static) -> Self {
        Backend::Store(Arc::new(store))
    }
}

enum MapperKind<T, R> {
    Sync(Arc<dyn Fn(T) -> R + Send + Sync>),
    Async(Arc<dyn Fn(T) -> BoxFuture<'static, Result<R, DataKitError>> + Send + Sync>),
}

/// Transforms each raw record before it is returned
pub struct ItemMapper<T, R> {
    kind: MapperKind<T, R>,
}

impl<T, R> Clone for ItemMapper<T, R> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            MapperKind::Sync(f) => MapperKind::Sync(f.clone()),
            MapperKind::Async(f) => MapperKind::Async(f.clone()),
        };
        Self { kind }
    }
}

impl<T, R> ItemMapper<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        Self {
            kind: MapperKind::Sync(Arc::new(f)),
        }
    }

    /// An asynchronous mapper. All records of a page are mapped concurrently
    /// and the first failure fails the whole request.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, DataKitError>> + Send + 'static,
    {
        Self {
            kind: MapperKind::Async(Arc::new(
                move |item| -> BoxFuture<'static, Result<R, DataKitError>> { Box::pin(f(item)) },
            )),
        }
    }

    pub async fn map_all(&self, items: Vec<T>) -> Result<Vec<R>, DataKitError> {
        match &self.kind {
            MapperKind::Sync(f) => Ok(items.into_iter().map(|item| f(item)).collect()),
            MapperKind::Async(f) => try_join_all(items.into_iter().map(|item| f(item))).await,
        }
    }
}

impl<T: Send + 'static> ItemMapper<T, T> {
    pub fn identity() -> Self {
        Self::sync(|item| item)
    }
}

/// Execution settings for one collection
#[derive(Clone)]
pub struct ExecuteOptions {
    pub max_limit: u64,
    /// Filter keys a client may use. When unset and `filter_custom` is
    /// configured, the custom filter keys are the whitelist.
    pub filter_allowed: Option<Vec<String>>,
    pub query_allowed: Option<Vec<String>>,
    pub sort_allowed: Option<Vec<String>>,
    pub filter_fn: Option<FilterFn>,
    pub filter_custom: BTreeMap<String, CustomFilterFn>,
    pub default_sort: Option<SortSpec>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
            filter_allowed: None,
            query_allowed: None,
            sort_allowed: None,
            filter_fn: None,
            filter_custom: BTreeMap::new(),
            default_sort: None,
        }
    }
}

impl ExecuteOptions {
    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn allow_filters<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter_allowed = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn allow_query<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query_allowed = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn allow_sorts<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort_allowed = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> StoreQuery + Send + Sync + 'static,
    {
        self.filter_fn = Some(Arc::new(f));
        self
    }

    pub fn with_custom_filter(mut self, key: impl Into<String>, f: CustomFilterFn) -> Self {
        self.filter_custom.insert(key.into(), f);
        self
    }

    pub fn with_default_sort(mut self, sort: SortSpec) -> Self {
        self.default_sort = Some(sort);
        self
    }

    fn store_options(&self) -> StoreOptions {
        StoreOptions {
            filter: self.filter_fn.clone(),
            filter_custom: self.filter_custom.clone(),
            default_sort: self.default_sort.clone(),
        }
    }

    fn filter_allowed(&self) -> Option<Vec<&str>> {
        match &self.filter_allowed {
            Some(keys) => Some(keys.iter().map(String::as_str).collect()),
            None if !self.filter_custom.is_empty() => {
                Some(self.filter_custom.keys().map(String::as_str).collect())
            }
            None => None,
        }
    }
}

/// Checks every key against an optional whitelist and every value against
/// the primitive-or-null rule.
fn check_fields(
    kind: FieldKind,
    fields: &Map<String, Value>,
    allowed: Option<&[&str]>,
) -> Result<(), DataKitError> {
    for (key, value) in fields {
        if let Some(allowed) = allowed {
            if !allowed.contains(&key.as_str()) {
                warn!("Rejected {} field '{}'", kind, key);
                return Err(DataKitError::NotAllowed {
                    kind,
                    field: key.clone(),
                });
            }
        }

        if !Utils::is_primitive_or_null(value) {
            warn!("Rejected non-primitive {} value for '{}'", kind, key);
            return Err(DataKitError::NotPrimitive {
                kind,
                field: key.clone(),
            });
        }
    }
    Ok(())
}

fn check_sorts(request: &FetchRequest, allowed: &[String]) -> Result<(), DataKitError> {
    let entry_paths = request.sorts.iter().flatten().map(|s| s.path.as_str());
    let legacy_paths = request.sort.iter().flat_map(|s| s.fields());

    for path in entry_paths.chain(legacy_paths) {
        if !allowed.iter().any(|a| a == path) {
            warn!("Rejected sort field '{}'", path);
            return Err(DataKitError::NotAllowed {
                kind: FieldKind::Sort,
                field: path.to_owned(),
            });
        }
    }
    Ok(())
}

/// Runs one fetch request against `backend`.
///
/// Nothing reaches the backend unless the request passes every check.
pub async fn execute<T, R>(
    request: FetchRequest,
    backend: &Backend<T>,
    mapper: &ItemMapper<T, R>,
    options: &ExecuteOptions,
) -> Result<DataKitResult<R>, DataKitError>
where
    T: Send + 'static,
    R: Send + 'static,
{
    if let Some(query) = &request.query {
        let allowed: Option<Vec<&str>> = options
            .query_allowed
            .as_ref()
            .map(|keys| keys.iter().map(String::as_str).collect());
        check_fields(FieldKind::Query, query, allowed.as_deref())?;
    }

    if let Some(filter) = &request.filter {
        let allowed = options.filter_allowed();
        check_fields(FieldKind::Filter, filter, allowed.as_deref())?;
    }

    if let Some(allowed) = &options.sort_allowed {
        check_sorts(&request, allowed)?;
    }

    match request.action()? {
        Action::Fetch => {
            let (page, limit) = match (request.page, request.limit) {
                (Some(page), Some(limit)) if page > 0 && limit > 0 => (page, limit),
                _ => return Err(DataKitError::MissingPagination),
            };

            let limit = limit.min(options.max_limit);
            let params = FetchParams {
                filter: request.filter.clone().unwrap_or_default(),
                sorts: request.sorts.clone().unwrap_or_default(),
                limit,
                page,
                request,
            };

            debug!(
                "Fetching page {} (limit {}, skip {})",
                params.page,
                params.limit,
                params.skip()
            );

            let result = match backend {
                Backend::Adapter(adapter) => adapter.fetch(params).await?,
                Backend::Store(store) => {
                    DocumentAdapter::with_options(store.clone(), options.store_options())
                        .fetch(params)
                        .await?
                }
            };

            let items = mapper.map_all(result.items).await?;
            Ok(DataKitResult::Items {
                items,
                document_total: result.total,
            })
        }
    }
}
