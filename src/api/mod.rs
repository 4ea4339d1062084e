pub mod routes;

// Re-export route handlers for convenience
pub use routes::app;
pub use routes::collections;
pub use routes::state::AppState;
