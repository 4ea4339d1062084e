//! Client-side list controller.
//!
//! A `Controller` owns paging, sorting and filter state for one list, turns it
//! into `FetchRequest`s and keeps the most recent result. State lives in a
//! `watch` channel so any number of renderers can observe it. Fetches may
//! overlap; only the most recently issued one is ever applied.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::action::{execute, Backend, ExecuteOptions, ItemMapper};
use crate::config::QueryConfig;
use crate::error::DataKitError;
use crate::query::{
    Action, DataKitResult, FetchRequest, FilterConfig, PaginationInfo, SortDirection, SortEntry,
    MAX_SORTS,
};

pub mod selection;
pub mod url_state;

pub use selection::Selection;
pub use url_state::{Location, MemoryLocation, StateMode};

use url_state::UrlSnapshot;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
pub const DEFAULT_LIMIT: u64 = 10;

/// The controller's link to the execution layer
#[async_trait]
pub trait FetchAction<R>: Send + Sync {
    async fn call(&self, request: FetchRequest) -> Result<DataKitResult<R>, DataKitError>;
}

#[async_trait]
impl<R, F, Fut> FetchAction<R> for F
where
    R: Send + 'static,
    F: Fn(FetchRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<DataKitResult<R>, DataKitError>> + Send,
{
    async fn call(&self, request: FetchRequest) -> Result<DataKitResult<R>, DataKitError> {
        (self)(request).await
    }
}

/// Runs requests in-process through `execute`
pub struct ExecuteAction<T, R> {
    backend: Backend<T>,
    mapper: ItemMapper<T, R>,
    options: ExecuteOptions,
}

impl<T, R> ExecuteAction<T, R> {
    pub fn new(backend: Backend<T>, mapper: ItemMapper<T, R>, options: ExecuteOptions) -> Self {
        Self {
            backend,
            mapper,
            options,
        }
    }
}

#[async_trait]
impl<T, R> FetchAction<R> for ExecuteAction<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn call(&self, request: FetchRequest) -> Result<DataKitResult<R>, DataKitError> {
        execute(request, &self.backend, &self.mapper, &self.options).await
    }
}

/// Records that can be addressed by id
pub trait ItemKey {
    type Key: PartialEq;

    fn key(&self) -> Self::Key;
}

impl ItemKey for Value {
    type Key = Value;

    /// `_id`, falling back to `id`
    fn key(&self) -> Value {
        self.get("_id")
            .or_else(|| self.get("id"))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Where `push_item` inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Head,
    Tail,
}

/// The state a controller starts from and returns to on `reset`
#[derive(Debug, Clone, PartialEq)]
pub struct InitialState {
    pub page: u64,
    pub limit: u64,
    pub sorts: Vec<SortEntry>,
    pub filter: Map<String, Value>,
    pub query: Map<String, Value>,
}

impl Default for InitialState {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            sorts: Vec::new(),
            filter: Map::new(),
            query: Map::new(),
        }
    }
}

pub type SuccessCallback<R> = Arc<dyn Fn(&DataKitResult<R>) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&DataKitError) + Send + Sync>;

pub struct ControllerOptions<R> {
    pub initial: InitialState,
    pub state_mode: StateMode,
    pub filter_config: Option<FilterConfig>,
    pub auto_fetch: bool,
    pub debounce: Duration,
    pub on_success: Option<SuccessCallback<R>>,
    pub on_error: Option<ErrorCallback>,
}

impl<R> Default for ControllerOptions<R> {
    fn default() -> Self {
        Self {
            initial: InitialState::default(),
            state_mode: StateMode::Memory,
            filter_config: None,
            auto_fetch: true,
            debounce: DEFAULT_DEBOUNCE,
            on_success: None,
            on_error: None,
        }
    }
}

impl<R> ControllerOptions<R> {
    /// Defaults with the page size and debounce window taken from the
    /// `[query]` config section
    pub fn from_config(config: &QueryConfig) -> Self {
        let mut options = Self::default();
        options.initial.limit = config.default_limit.max(1);
        options.debounce = Duration::from_millis(config.debounce_ms);
        options
    }

    pub fn initial(mut self, initial: InitialState) -> Self {
        self.initial = initial;
        self
    }

    pub fn state_mode(mut self, mode: StateMode) -> Self {
        self.state_mode = mode;
        self
    }

    pub fn filter_config(mut self, config: FilterConfig) -> Self {
        self.filter_config = Some(config);
        self
    }

    pub fn auto_fetch(mut self, auto_fetch: bool) -> Self {
        self.auto_fetch = auto_fetch;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn on_success(mut self, f: impl Fn(&DataKitResult<R>) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&DataKitError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

/// Everything a renderer needs. `filter` is what the user typed;
/// `effective_filter` is what the last debounce window settled on and is
/// what gets sent.
#[derive(Debug, Clone)]
pub struct ControllerState<R> {
    pub page: u64,
    pub limit: u64,
    pub sorts: Vec<SortEntry>,
    pub filter: Map<String, Value>,
    pub effective_filter: Map<String, Value>,
    pub query: Map<String, Value>,
    pub items: Vec<R>,
    pub total: u64,
    pub is_loading: bool,
    pub error: Option<Arc<DataKitError>>,
}

impl<R> ControllerState<R> {
    fn from_initial(initial: &InitialState) -> Self {
        Self {
            page: initial.page,
            limit: initial.limit,
            sorts: capped_sorts(initial.sorts.clone()),
            filter: initial.filter.clone(),
            effective_filter: initial.filter.clone(),
            query: initial.query.clone(),
            items: Vec::new(),
            total: 0,
            is_loading: false,
            error: None,
        }
    }

    /// The inputs that determine what a fetch returns
    fn fetch_key(&self) -> FetchKey {
        FetchKey {
            page: self.page,
            limit: self.limit,
            sorts: self.sorts.clone(),
            effective_filter: self.effective_filter.clone(),
            query: self.query.clone(),
        }
    }
}

#[derive(PartialEq)]
struct FetchKey {
    page: u64,
    limit: u64,
    sorts: Vec<SortEntry>,
    effective_filter: Map<String, Value>,
    query: Map<String, Value>,
}

struct Inner<R> {
    state: watch::Sender<ControllerState<R>>,
    action: Arc<dyn FetchAction<R>>,
    options: ControllerOptions<R>,
    sequence: AtomicU64,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

impl<R> Drop for Inner<R> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.debounce.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

pub struct Controller<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for Controller<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> Controller<R>
where
    R: Clone + Send + Sync + 'static,
{
    pub fn new(action: impl FetchAction<R> + 'static, options: ControllerOptions<R>) -> Self {
        let state = ControllerState::from_initial(&options.initial);
        Self {
            inner: Arc::new(Inner {
                state: watch::Sender::new(state),
                action: Arc::new(action),
                options,
                sequence: AtomicU64::new(0),
                debounce: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState<R>> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ControllerState<R> {
        self.inner.state.borrow().clone()
    }

    pub fn pagination(&self) -> PaginationInfo {
        let state = self.inner.state.borrow();
        PaginationInfo::calculate(state.page, state.limit, state.total)
    }

    /// The request the next fetch would send
    pub fn request(&self) -> FetchRequest {
        let state = self.inner.state.borrow();
        FetchRequest {
            action: Some(Action::FETCH.to_owned()),
            page: Some(state.page),
            limit: Some(state.limit),
            sort: None,
            sorts: Some(state.sorts.clone()),
            query: Some(state.query.clone()),
            filter: Some(state.effective_filter.clone()),
            filter_config: self.inner.options.filter_config.clone(),
        }
    }

    /// Initial hydration from the URL (when mirroring) followed by the first
    /// fetch. The URL is not written back during hydration.
    pub async fn mount(&self) {
        if let Some(location) = self.inner.options.state_mode.location() {
            let url = url_state::parse_search(&location.search());
            if !url.is_empty() {
                debug!("Hydrating controller from URL: {:?}", url);
                self.inner.state.send_modify(|s| {
                    if let Some(page) = url.page {
                        s.page = page;
                    }
                    if let Some(limit) = url.limit {
                        s.limit = limit;
                    }
                    if let Some(sorts) = url.sorts {
                        s.sorts = capped_sorts(sorts);
                    }
                    for (key, value) in url.filter {
                        s.filter.insert(key.clone(), value.clone());
                        s.effective_filter.insert(key, value);
                    }
                    s.query.extend(url.query);
                });
            }
        }

        if self.inner.options.auto_fetch {
            self.refresh().await;
        }
    }

    /// Back/forward navigation: state is replaced by what the URL says,
    /// falling back to initial values for anything it omits.
    pub fn navigated(&self) {
        let Some(location) = self.inner.options.state_mode.location() else {
            return;
        };
        let url = url_state::parse_search(&location.search());
        let initial = &self.inner.options.initial;

        let mut filter = initial.filter.clone();
        filter.extend(url.filter);
        let mut query = initial.query.clone();
        query.extend(url.query);

        self.cancel_debounce();
        let changed = self.update_without_url(|s| {
            s.page = url.page.unwrap_or(initial.page);
            s.limit = url.limit.unwrap_or(initial.limit);
            s.sorts = capped_sorts(url.sorts.unwrap_or_else(|| initial.sorts.clone()));
            s.filter = filter.clone();
            s.effective_filter = filter;
            s.query = query;
        });
        if changed {
            self.maybe_fetch();
        }
    }

    pub fn set_page(&self, page: u64) {
        self.update(|s| s.page = page.max(1));
    }

    pub fn set_limit(&self, limit: u64) {
        self.update(|s| {
            s.limit = limit.max(1);
            s.page = 1;
        });
    }

    /// `None` removes `path`. Without `append` the sort becomes just this
    /// entry; with it the entry is updated in place or appended, dropping the
    /// oldest entry past the maximum.
    pub fn set_sort(&self, path: &str, value: Option<SortDirection>, append: bool) {
        self.update(|s| match value {
            None => s.sorts.retain(|e| e.path != path),
            Some(direction) if !append => s.sorts = vec![SortEntry::new(path, direction)],
            Some(direction) => match s.sorts.iter_mut().find(|e| e.path == path) {
                Some(existing) => existing.value = direction,
                None => {
                    s.sorts.push(SortEntry::new(path, direction));
                    if s.sorts.len() > MAX_SORTS {
                        s.sorts.remove(0);
                    }
                }
            },
        });
    }

    /// Replaces the sort list. Only the last `MAX_SORTS` entries are kept.
    pub fn set_sorts(&self, sorts: Vec<SortEntry>) {
        self.update(|s| s.sorts = capped_sorts(sorts));
    }

    pub fn set_filter(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.update(|s| {
            s.filter.insert(key, value);
            s.page = 1;
        });
        self.schedule_debounce();
    }

    pub fn set_filters(&self, filters: Map<String, Value>) {
        self.update(|s| {
            s.filter.extend(filters);
            s.page = 1;
        });
        self.schedule_debounce();
    }

    pub fn clear_filters(&self) {
        self.update(|s| {
            s.filter.clear();
            s.page = 1;
        });
        self.schedule_debounce();
    }

    pub fn set_query(&self, key: impl Into<String>, value: impl Into<Value>) {
        let (key, value) = (key.into(), value.into());
        self.update(|s| {
            s.query.insert(key, value);
            s.page = 1;
        });
    }

    /// Back to the initial page, limit, sorts, filters and query
    pub fn reset(&self) {
        self.cancel_debounce();
        let initial = &self.inner.options.initial;
        self.update(|s| {
            s.page = initial.page;
            s.limit = initial.limit;
            s.sorts = capped_sorts(initial.sorts.clone());
            s.filter = initial.filter.clone();
            s.effective_filter = initial.filter.clone();
            s.query = initial.query.clone();
        });
    }

    /// Fetches with the current state and waits for it to settle
    pub async fn refresh(&self) {
        let mut seq = 0;
        self.inner.state.send_modify(|s| {
            seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            s.is_loading = true;
            s.error = None;
        });

        let request = self.request();
        debug!(
            "Fetch #{} for page {} (limit {})",
            seq,
            request.page.unwrap_or_default(),
            request.limit.unwrap_or_default()
        );

        let result = self.inner.action.call(request).await.map_err(Arc::new);

        let mut applied = false;
        self.inner.state.send_if_modified(|s| {
            if self.inner.sequence.load(Ordering::SeqCst) != seq {
                return false;
            }
            match &result {
                Ok(r) => {
                    s.items = r.items().to_vec();
                    s.total = r.document_total();
                }
                Err(e) => s.error = Some(e.clone()),
            }
            s.is_loading = false;
            applied = true;
            true
        });

        if !applied {
            trace!("Fetch #{} superseded, result dropped", seq);
            return;
        }

        match &result {
            Ok(r) => {
                if let Some(on_success) = &self.inner.options.on_success {
                    on_success(r);
                }
            }
            Err(e) => {
                debug!("Fetch #{} failed: {}", seq, e);
                if let Some(on_error) = &self.inner.options.on_error {
                    on_error(e);
                }
            }
        }
    }

    pub fn set_items(&self, items: Vec<R>) {
        self.inner.state.send_modify(|s| s.items = items);
    }

    /// Replaces the item at `index`; out-of-range indexes are ignored
    pub fn set_item_at(&self, index: usize, item: R) {
        self.inner.state.send_if_modified(|s| match s.items.get_mut(index) {
            Some(slot) => {
                *slot = item;
                true
            }
            None => false,
        });
    }

    pub fn delete_item_at(&self, index: usize) {
        self.inner.state.send_if_modified(|s| {
            if index < s.items.len() {
                s.items.remove(index);
                true
            } else {
                false
            }
        });
    }

    pub fn push_item(&self, item: R, position: Position) {
        self.inner.state.send_modify(|s| match position {
            Position::Head => s.items.insert(0, item),
            Position::Tail => s.items.push(item),
        });
    }

    pub fn delete_bulk(&self, items: &[R])
    where
        R: PartialEq,
    {
        if items.is_empty() {
            return;
        }
        self.inner.state.send_modify(|s| s.items.retain(|it| !items.contains(it)));
    }

    pub fn delete_by_id(&self, id: &R::Key)
    where
        R: ItemKey,
    {
        self.inner.state.send_modify(|s| s.items.retain(|it| it.key() != *id));
    }

    pub fn delete_bulk_by_id(&self, ids: &[R::Key])
    where
        R: ItemKey,
    {
        if ids.is_empty() {
            return;
        }
        self.inner
            .state
            .send_modify(|s| s.items.retain(|it| !ids.contains(&it.key())));
    }

    /// Applies a state edit, mirrors it to the URL and fetches when the
    /// fetch inputs changed.
    fn update(&self, edit: impl FnOnce(&mut ControllerState<R>)) {
        let changed = self.update_without_url(edit);
        self.sync_url();
        if changed {
            self.maybe_fetch();
        }
    }

    fn update_without_url(&self, edit: impl FnOnce(&mut ControllerState<R>)) -> bool {
        let mut changed = false;
        self.inner.state.send_modify(|s| {
            let before = s.fetch_key();
            edit(s);
            changed = s.fetch_key() != before;
        });
        changed
    }

    fn maybe_fetch(&self) {
        if !self.inner.options.auto_fetch {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.refresh().await });
    }

    fn sync_url(&self) {
        let Some(location) = self.inner.options.state_mode.location() else {
            return;
        };

        let search = {
            let s = self.inner.state.borrow();
            url_state::to_search(&UrlSnapshot {
                page: s.page,
                limit: s.limit,
                initial_limit: self.inner.options.initial.limit,
                sorts: &s.sorts,
                filter: &s.filter,
                query: &s.query,
            })
        };

        let current = location.search();
        if search != current.strip_prefix('?').unwrap_or(&current) {
            trace!("Pushing URL state '{}'", search);
            location.push(&search);
        }
    }

    /// (Re)starts the quiet-period timer that promotes `filter` to
    /// `effective_filter`
    fn schedule_debounce(&self) {
        let weak: Weak<Inner<R>> = Arc::downgrade(&self.inner);
        let delay = self.inner.options.debounce;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                Controller { inner }.apply_debounced_filter();
            }
        });

        if let Ok(mut slot) = self.inner.debounce.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    fn cancel_debounce(&self) {
        if let Ok(mut slot) = self.inner.debounce.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    fn apply_debounced_filter(&self) {
        trace!("Debounce window closed");
        let changed = self.update_without_url(|s| s.effective_filter = s.filter.clone());
        if changed {
            self.maybe_fetch();
        }
    }
}

/// Drops the oldest entries past `MAX_SORTS`
fn capped_sorts(mut sorts: Vec<SortEntry>) -> Vec<SortEntry> {
    if sorts.len() > MAX_SORTS {
        sorts.drain(..sorts.len() - MAX_SORTS);
    }
    sorts
}
