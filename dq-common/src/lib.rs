//! # DriveQuiz Common Library
//!
//! Shared code for the DriveQuiz back-office services:
//! - Error type used by every crate in the workspace
//! - Configuration loading (root folder, TOML file)
//! - Event types and the broadcast event bus
//! - SQLite pool initialization and schema
//! - SSE helpers for the operator console

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
