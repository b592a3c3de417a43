//! Database Test Utilities

use dq_common::db::init_in_memory_database;
use dq_qp::db::questions::{load_question, upsert_question};
use dq_qp::models::{ExplanationMap, Question, QuestionId};
use sqlx::SqlitePool;

/// In-memory database with the full schema
pub async fn create_test_db() -> SqlitePool {
    init_in_memory_database()
        .await
        .expect("Failed to create in-memory database")
}

/// Insert questions as given
pub async fn seed_questions(pool: &SqlitePool, questions: &[Question]) {
    for question in questions {
        upsert_question(pool, question)
            .await
            .expect("Failed to seed question");
    }
}

/// Decoded explanation map of a stored question
pub async fn load_explanations(pool: &SqlitePool, id: impl Into<QuestionId>) -> ExplanationMap {
    let id = id.into();
    load_question(pool, &id)
        .await
        .expect("Failed to load question")
        .unwrap_or_else(|| panic!("Question {} missing", id))
        .explanations()
}
