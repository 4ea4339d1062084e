//! The adapter contract and its implementations.
//!
//! An adapter turns normalized paging/filter/sort parameters into one page of
//! records plus the size of the whole matching set. The execution layer only
//! ever talks to this trait, so backends can be swapped freely.

use std::future::Future;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::DataKitError;
use crate::query::{FetchRequest, SortEntry};

pub mod document;
pub mod memory;
pub mod sqlite;

pub use document::{DocumentAdapter, DocumentStore, Find, StoreQuery};
pub use memory::{Document, MemoryAdapter};
pub use sqlite::SqliteCollection;

/// Normalized parameters for one adapter call
#[derive(Debug, Clone)]
pub struct FetchParams {
    pub filter: Map<String, Value>,
    pub sorts: Vec<SortEntry>,
    pub limit: u64,
    pub page: u64,
    /// The validated request, for adapters that need `query`, the legacy
    /// `sort` or `filter_config`
    pub request: FetchRequest,
}

impl FetchParams {
    /// Number of records before the requested page. Always derived.
    pub fn skip(&self) -> u64 {
        self.limit.saturating_mul(self.page.saturating_sub(1))
    }
}

/// One page of records and the size of the full matching set
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

#[async_trait]
pub trait Adapter<T>: Send + Sync {
    async fn fetch(&self, params: FetchParams) -> Result<Page<T>, DataKitError>;
}

/// Any async closure over `FetchParams` is an adapter
#[async_trait]
impl<T, F, Fut> Adapter<T> for F
where
    T: Send + 'static,
    F: Fn(FetchParams) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Page<T>, DataKitError>> + Send,
{
    async fn fetch(&self, params: FetchParams) -> Result<Page<T>, DataKitError> {
        (self)(params).await
    }
}
