//! Test Helper Utilities
//!
//! Shared utilities for testing dq-qp

#![allow(dead_code)]

pub mod db_utils;
pub mod fake_ai;

pub use db_utils::{create_test_db, load_explanations, seed_questions};
pub use fake_ai::ScriptedAi;
