//! # Orderly Config
//!
//! Configuration management for Orderly.
//! Supports layered configuration from files, `.env` and environment
//! variables, with runtime refresh.

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
