//! `sealwire` Core Library
//!
//! Shared functionality for the sealwire crates:
//! - Client configuration resolution and hierarchy
//! - Tracing subscriber initialisation
//! - `SQLite` pool helpers for durable key/value storage
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::ClientConfig;
pub use error::{Error, Result};
