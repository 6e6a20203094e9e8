//! HTTP and WebSocket surface

pub mod models;
pub mod routes;
pub mod ws;


pub use routes::{create_router, AppState};
