//! Batch task orchestrator integration tests

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use dq_common::events::{DqEvent, EventBus};
use dq_qp::ai::{AiCollaborator, AiError, AI_SERVICE_TIMEOUT};
use dq_qp::db::reviews::{list_candidates, CandidateFilter};
use dq_qp::db::step_logs::list_step_logs;
use dq_qp::db::task_items::{findings_to_csv, list_findings, list_items, ItemFilter, StatsWindow};
use dq_qp::db::tasks::{cancel_task, load_task};
use dq_qp::models::{
    ItemStatus, Operation, Question, QuestionId, RevisionSource, TaskOptions, TaskScope, TaskStatus,
};
use dq_qp::models::batch_task::{LocaleList, TranslateOptions};
use dq_qp::tasks::{NewTask, TaskOrchestrator};
use helpers::{create_test_db, load_explanations, seed_questions, ScriptedAi};
use serde_json::json;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

fn q(n: i64) -> QuestionId {
    QuestionId::Numeric(n)
}

fn task(operations: Vec<Operation>, ids: Vec<QuestionId>, batch_size: u32, continue_on_error: bool) -> NewTask {
    NewTask {
        operations,
        options: TaskOptions::default(),
        scope: TaskScope::questions(ids),
        batch_size: Some(batch_size),
        continue_on_error,
        created_by: Some("tester".to_string()),
    }
}

fn with_ai(pool: &SqlitePool, ai: Arc<ScriptedAi>) -> TaskOrchestrator {
    TaskOrchestrator::new(pool.clone(), EventBus::new(1000)).with_ai(Some(ai as Arc<dyn AiCollaborator>))
}

/// Questions 1..=3: one inconsistent, one consistent, one with no explanation
async fn seed_audit_corpus(pool: &SqlitePool) {
    seed_questions(
        pool,
        &[
            Question::new(q(1), Some("true"), Some("本题是错误的。")),
            Question::new(q(2), Some("false"), Some("本题是错误的。")),
            Question::new(q(3), Some("true"), None),
        ],
    )
    .await;
}

#[tokio::test]
async fn test_audit_task_records_inconsistency_and_completes() {
    let pool = create_test_db().await;
    seed_audit_corpus(&pool).await;
    let orchestrator = TaskOrchestrator::new(pool.clone(), EventBus::new(100));

    let created = orchestrator
        .create_task(task(vec![Operation::ExplanationAudit], vec![q(1), q(2), q(3)], 2, true))
        .await
        .unwrap();
    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.counters.total, 3);
    assert_eq!(finished.counters.processed, 3);
    assert_eq!(finished.counters.succeeded, 2);
    assert_eq!(finished.counters.failed, 1);
    assert!(finished.completed_at.is_some());

    let failed = list_items(
        &pool,
        created.task_id,
        &ItemFilter {
            status: Some(ItemStatus::Failed),
            ..Default::default()
        },
        10,
        0,
    )
    .await
    .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].question_id, q(1));
    assert_eq!(failed[0].error_code.as_deref(), Some("EXPLANATION_INCONSISTENT"));
    assert_eq!(failed[0].error_stage.as_deref(), Some("CONSISTENCY"));
    let detail = failed[0].error_detail.as_ref().unwrap();
    assert_eq!(detail["findings"][0]["explanationConsistency"]["expected"], "true");
    assert_eq!(detail["findings"][0]["explanationConsistency"]["inferred"], "false");
    assert_eq!(detail["findings"][0]["autoFixable"], true);

    // Enqueued for review under the task id
    let candidates = list_candidates(
        &pool,
        &CandidateFilter {
            audit_run_id: Some(created.task_id),
            ..Default::default()
        },
        10,
        0,
    )
    .await
    .unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].revisions[0].source, RevisionSource::TaskAudit);

    let findings = list_findings(&pool, &StatsWindow::default()).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].locale, "zh");
    let csv = findings_to_csv(&findings);
    assert_eq!(
        csv,
        "question_id,locale,expected,inferred,source,auto_fixable\n1,zh,true,false,task_audit,true\n"
    );
}

#[tokio::test]
async fn test_first_failure_aborts_when_not_continuing() {
    let pool = create_test_db().await;
    seed_audit_corpus(&pool).await;
    let orchestrator = TaskOrchestrator::new(pool.clone(), EventBus::new(100));

    let created = orchestrator
        .create_task(task(vec![Operation::ExplanationAudit], vec![q(1), q(2), q(3)], 1, false))
        .await
        .unwrap();
    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.counters.processed, 1);
    assert_eq!(finished.counters.failed, 1);
    assert!(finished.failure_reason.unwrap().contains("EXPLANATION_INCONSISTENT"));

    // Remaining questions were never touched
    let items = list_items(&pool, created.task_id, &ItemFilter::default(), 10, 0).await.unwrap();
    assert_eq!(items.len(), 1);
}

#[tokio::test]
async fn test_translate_writes_target_locale_and_logs_checkpoints() {
    let pool = create_test_db().await;
    let mut question = Question::new(q(1), Some("true"), Some("本题是正确的。"));
    question.content = Some(json!({"zh": "红灯亮时应停车。"}));
    question.options = Some(json!(["对", "错"]));
    seed_questions(&pool, &[question]).await;

    let ai = Arc::new(ScriptedAi::always(json!({
        "content": "Stop when the light is red.",
        "options": ["Right", "Wrong"],
        "explanation": {"en": "This statement is true.", "fr": "Vrai."}
    })));
    let orchestrator = with_ai(&pool, ai.clone());

    let mut request = task(vec![Operation::Translate], vec![q(1)], 5, true);
    request.options.translate_options = Some(TranslateOptions {
        from: "zh".to_string(),
        to: LocaleList::One("en".to_string()),
    });
    let created = orchestrator.create_task(request).await.unwrap();
    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let explanations = load_explanations(&pool, q(1)).await;
    assert_eq!(explanations.get("en").map(String::as_str), Some("This statement is true."));
    assert_eq!(explanations.get("zh").map(String::as_str), Some("本题是正确的。"));
    assert!(!explanations.contains_key("fr"));

    let sent = ai.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].scene, "question_translation");
    assert_eq!(sent[0].source_language.as_deref(), Some("zh"));
    assert_eq!(sent[0].target_language.as_deref(), Some("en"));
    assert!(sent[0].question.contains("红灯亮时应停车。"));

    let logs = list_step_logs(&pool, created.task_id, None, 100).await.unwrap();
    let checkpoints: Vec<&str> = logs.iter().map(|l| l.checkpoint.as_str()).collect();
    assert_eq!(
        checkpoints,
        vec!["AI_CALL_BEFORE", "AI_CALL_AFTER", "SANITIZE_AFTER", "DB_WRITE_BEFORE"]
    );
    let sanitize = &logs[2];
    assert_eq!(sanitize.level, "warn");
    assert_eq!(sanitize.payload.as_ref().unwrap()["stripped_locales"], json!(["fr"]));

    let items = list_items(&pool, created.task_id, &ItemFilter::default(), 10, 0).await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Succeeded);
    assert!(items[0].ai_request.is_some());
    assert!(items[0].ai_response.is_some());
}

#[tokio::test]
async fn test_ai_failure_is_an_item_failure() {
    let pool = create_test_db().await;
    let mut questions = Vec::new();
    for n in 1..=3 {
        let mut question = Question::new(q(n), Some("true"), None);
        question.content = Some(json!({ "zh": format!("question {}", n) }));
        questions.push(question);
    }
    seed_questions(&pool, &questions).await;

    let ai = Arc::new(ScriptedAi::new(|request| {
        if request.question.contains("question 2") {
            Err(AiError::new(AI_SERVICE_TIMEOUT, "AI service timeout after 120000 ms"))
        } else {
            Ok(json!({"explanation": "本题是正确的。"}))
        }
    }));
    let orchestrator = with_ai(&pool, ai);

    let created = orchestrator
        .create_task(task(vec![Operation::FillMissing], vec![q(1), q(2), q(3)], 3, true))
        .await
        .unwrap();
    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);

    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.counters.succeeded, 2);
    assert_eq!(finished.counters.failed, 1);

    let failed = list_items(
        &pool,
        created.task_id,
        &ItemFilter {
            status: Some(ItemStatus::Failed),
            ..Default::default()
        },
        10,
        0,
    )
    .await
    .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].question_id, q(2));
    assert_eq!(failed[0].error_code.as_deref(), Some(AI_SERVICE_TIMEOUT));
    assert_eq!(failed[0].error_stage.as_deref(), Some("AI_CALL"));

    assert_eq!(
        load_explanations(&pool, q(1)).await.get("zh").map(String::as_str),
        Some("本题是正确的。")
    );
    assert!(load_explanations(&pool, q(2)).await.is_empty());
}

#[tokio::test]
async fn test_missing_ai_fails_before_any_item() {
    let pool = create_test_db().await;
    seed_audit_corpus(&pool).await;
    let orchestrator = TaskOrchestrator::new(pool.clone(), EventBus::new(100));

    let created = orchestrator
        .create_task(task(vec![Operation::CategoryTags], vec![q(1)], 1, true))
        .await
        .unwrap();
    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    let items = list_items(&pool, created.task_id, &ItemFilter::default(), 10, 0).await.unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_second_task_conflicts_while_one_is_pending() {
    let pool = create_test_db().await;
    seed_audit_corpus(&pool).await;
    let orchestrator = TaskOrchestrator::new(pool.clone(), EventBus::new(100));

    orchestrator
        .create_task(task(vec![Operation::ExplanationAudit], vec![q(1)], 1, true))
        .await
        .unwrap();
    let second = orchestrator
        .create_task(task(vec![Operation::ExplanationAudit], vec![q(2)], 1, true))
        .await;
    assert!(matches!(second, Err(dq_common::Error::Conflict(_))));

    let missing_options = orchestrator
        .create_task(task(vec![Operation::Translate], vec![q(2)], 1, true))
        .await;
    assert!(matches!(missing_options, Err(dq_common::Error::InvalidInput(_))));
}

#[tokio::test]
async fn test_cancel_stops_new_items_and_counters_stay_consistent() {
    let pool = create_test_db().await;
    let questions: Vec<Question> = (1..=6).map(|n| Question::new(q(n), Some("true"), None)).collect();
    seed_questions(&pool, &questions).await;

    let bus = EventBus::new(1000);
    let mut rx = bus.subscribe();
    let ai = Arc::new(
        ScriptedAi::always(json!({"explanation": "本题是正确的。"})).with_delay(Duration::from_millis(50)),
    );
    let orchestrator = TaskOrchestrator::new(pool.clone(), bus.clone())
        .with_ai(Some(ai as Arc<dyn AiCollaborator>));

    let created = orchestrator
        .create_task(task(vec![Operation::FillMissing], (1..=6).map(q).collect(), 1, true))
        .await
        .unwrap();
    let token = CancellationToken::new();
    let runner = {
        let orchestrator = orchestrator.clone();
        let token = token.clone();
        let task_id = created.task_id;
        tokio::spawn(async move { orchestrator.run(task_id, token).await })
    };

    let mut snapshots = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Ok(DqEvent::TaskProgress { total, processed, succeeded, failed, .. })) => {
                snapshots.push((total, processed, succeeded, failed));
                assert!(cancel_task(&pool, created.task_id).await.unwrap());
                token.cancel();
                break;
            }
            Ok(Ok(_)) => continue,
            other => panic!("no progress event: {:?}", other.is_ok()),
        }
    }

    let status = runner.await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Cancelled);

    while let Ok(event) = rx.try_recv() {
        if let DqEvent::TaskProgress { total, processed, succeeded, failed, .. } = event {
            snapshots.push((total, processed, succeeded, failed));
        }
    }
    for (total, processed, succeeded, failed) in &snapshots {
        assert!(succeeded + failed <= *processed && processed <= total);
    }

    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert!(finished.counters.processed < 6);
    assert!(finished.counters.is_consistent());
}

#[tokio::test]
async fn test_cancelled_before_start_processes_nothing() {
    let pool = create_test_db().await;
    seed_audit_corpus(&pool).await;
    let orchestrator = TaskOrchestrator::new(pool.clone(), EventBus::new(100));

    let created = orchestrator
        .create_task(task(vec![Operation::ExplanationAudit], vec![q(1), q(2)], 1, true))
        .await
        .unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let status = orchestrator.run(created.task_id, token).await.unwrap();
    assert_eq!(status, TaskStatus::Cancelled);
    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.counters.processed, 0);
}

#[tokio::test]
async fn test_retry_covers_questions_that_did_not_succeed() {
    let pool = create_test_db().await;
    let mut questions = Vec::new();
    for n in 1..=3 {
        let mut question = Question::new(q(n), Some("true"), None);
        question.content = Some(json!({ "zh": format!("question {}", n) }));
        questions.push(question);
    }
    seed_questions(&pool, &questions).await;

    let flaky = Arc::new(ScriptedAi::new(|request| {
        if request.question.contains("question 2") {
            Err(AiError::new("AI_SERVICE_HTTP_ERROR", "AI service error: 502").with_status(502))
        } else {
            Ok(json!({"explanation": "本题是正确的。"}))
        }
    }));
    let orchestrator = with_ai(&pool, flaky);

    let original = orchestrator
        .create_task(task(vec![Operation::FillMissing], vec![q(1), q(2), q(3)], 1, false))
        .await
        .unwrap();
    let status = orchestrator.run(original.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    // Completed tasks cannot be retried; failed ones can
    let retry = orchestrator.retry_task(original.task_id, None).await.unwrap();
    assert_eq!(retry.retry_of, Some(original.task_id));
    assert_eq!(retry.question_ids(), &[q(2), q(3)]);
    assert_eq!(retry.operations, vec![Operation::FillMissing]);

    let healthy = with_ai(&pool, Arc::new(ScriptedAi::always(json!({"explanation": "本题是正确的。"}))));
    let status = healthy.run(retry.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Completed);
    assert!(load_explanations(&pool, q(3)).await.contains_key("zh"));

    let again = healthy.retry_task(retry.task_id, None).await;
    assert!(matches!(again, Err(dq_common::Error::Conflict(_))));
}

fn translate_to(locales: &[&str]) -> TaskOptions {
    TaskOptions {
        translate_options: Some(TranslateOptions {
            from: "zh".to_string(),
            to: LocaleList::Many(locales.iter().map(|l| l.to_string()).collect()),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_cancel_mid_question_starts_no_further_items() {
    let pool = create_test_db().await;
    let mut question = Question::new(q(1), Some("true"), None);
    question.content = Some(json!({"zh": "红灯亮时应停车。"}));
    seed_questions(&pool, &[question]).await;

    let ai = Arc::new(
        ScriptedAi::always(json!({"content": "Stop.", "explanation": "本题是正确的。"}))
            .with_delay(Duration::from_millis(200)),
    );
    let orchestrator = with_ai(&pool, ai.clone());

    let mut request = task(vec![Operation::FillMissing, Operation::Translate], vec![q(1)], 1, true);
    request.options = translate_to(&["en", "ja"]);
    let created = orchestrator.create_task(request).await.unwrap();

    let token = CancellationToken::new();
    let runner = {
        let orchestrator = orchestrator.clone();
        let token = token.clone();
        let task_id = created.task_id;
        tokio::spawn(async move { orchestrator.run(task_id, token).await })
    };

    // Cancel while the first item waits on the AI
    tokio::time::timeout(Duration::from_secs(5), async {
        while ai.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    token.cancel();

    let status = runner.await.unwrap().unwrap();
    assert_eq!(status, TaskStatus::Cancelled);
    assert_eq!(ai.calls(), 1);

    let items = list_items(&pool, created.task_id, &ItemFilter::default(), 10, 0).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].operation, Operation::FillMissing);
    assert_eq!(items[0].status, ItemStatus::Succeeded);

    // The unfinished question is not counted as done
    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.counters.processed, 0);
    assert!(!load_explanations(&pool, q(1)).await.contains_key("en"));

    let retry = orchestrator.retry_task(created.task_id, None).await.unwrap();
    assert_eq!(retry.question_ids(), &[q(1)]);
}

#[tokio::test]
async fn test_abort_stops_other_questions_in_the_batch() {
    let pool = create_test_db().await;
    // Question 1 is missing, so its first item fails at once
    let mut question = Question::new(q(2), Some("true"), None);
    question.content = Some(json!({"zh": "黄灯亮时应减速。"}));
    seed_questions(&pool, &[question]).await;

    let ai = Arc::new(
        ScriptedAi::always(json!({"content": "Slow down.", "explanation": "本题是正确的。"}))
            .with_delay(Duration::from_millis(150)),
    );
    let orchestrator = with_ai(&pool, ai.clone());

    let mut request = task(vec![Operation::FillMissing, Operation::Translate], vec![q(1), q(2)], 2, false);
    request.options = translate_to(&["en"]);
    let created = orchestrator.create_task(request).await.unwrap();

    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    let items = list_items(&pool, created.task_id, &ItemFilter::default(), 10, 0).await.unwrap();
    assert!(items.iter().all(|item| item.operation == Operation::FillMissing));
    let failed: Vec<_> = items.iter().filter(|i| i.status == ItemStatus::Failed).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].question_id, q(1));
    assert_eq!(failed[0].error_code.as_deref(), Some("QUESTION_NOT_FOUND"));
    assert!(ai.calls() <= 1);

    assert!(!load_explanations(&pool, q(2)).await.contains_key("en"));
    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert_eq!(finished.counters.failed, 1);
    assert!(finished.counters.is_consistent());
}

#[tokio::test]
async fn test_bookkeeping_failure_fails_item_and_task() {
    let pool = create_test_db().await;
    seed_audit_corpus(&pool).await;
    let orchestrator = TaskOrchestrator::new(pool.clone(), EventBus::new(100));

    let created = orchestrator
        .create_task(task(vec![Operation::ExplanationAudit], vec![q(1)], 1, true))
        .await
        .unwrap();
    // Step logs can no longer be written once the audit finds something
    sqlx::query("DROP TABLE task_step_logs").execute(&pool).await.unwrap();

    let status = orchestrator.run(created.task_id, CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Failed);

    let items = list_items(&pool, created.task_id, &ItemFilter::default(), 10, 0).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, ItemStatus::Failed);
    assert_eq!(items[0].error_code.as_deref(), Some("INTERNAL_ERROR"));
    assert_eq!(items[0].error_stage.as_deref(), Some("DB_WRITE"));

    let finished = load_task(&pool, created.task_id).await.unwrap().unwrap();
    assert!(finished
        .failure_reason
        .as_deref()
        .unwrap_or_default()
        .starts_with("Infrastructure error"));
}
