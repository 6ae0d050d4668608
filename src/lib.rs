// Social graph and feed services

// Core types and primitives
pub mod core;

// Graph entities, bus envelopes and feed types
pub mod models;

// Infrastructure - store, cache and bus ports with their adapters
pub mod infrastructure;

// Business services - ingestion, relationships, recommendations
pub mod services;

// HTTP and RPC surfaces
pub mod api;

// Common utilities
pub mod app_state;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
