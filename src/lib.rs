//! Paginated, filterable, sortable collection fetching.
//!
//! A client [`controller::Controller`] owns table state and issues
//! [`query::FetchRequest`]s. On the server, [`action::execute`] validates each
//! request and runs it against an [`adapters::Adapter`]: an in-memory dataset,
//! a document store such as [`adapters::SqliteCollection`], or a custom one.

pub mod action;
pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod controller;
pub mod demo;
pub mod error;
pub mod logging;
pub mod query;
pub mod server;
pub mod sort;
pub mod utils;
