//! Rewind: a response-caching request filter for axum services.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod response;
