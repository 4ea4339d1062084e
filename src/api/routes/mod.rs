pub mod app;
pub mod collections;
pub mod state;
