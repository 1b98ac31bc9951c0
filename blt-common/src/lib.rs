//! # Building Lead Tool Common Library
//!
//! Shared code for the building lead services:
//! - Error types
//! - TOML configuration loading and root folder resolution
//! - SQLite initialization and schema migrations

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};
