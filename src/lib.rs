// src/lib.rs

pub mod achievements;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod progress;
pub mod routes;
pub mod scoring;
pub mod state;
pub mod utils;

// Re-export specific items for convenience if needed
pub use routes::create_router;
