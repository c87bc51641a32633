pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod prediction;
pub mod query;
pub mod service;
pub mod state;
pub mod store;
