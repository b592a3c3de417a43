//! Operation handlers
//!
//! Each handler writes step logs at the fixed checkpoints (before and after
//! the AI call, after cleanup, before the store write) and captures the AI
//! request and reply on its item.

use serde_json::{json, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::ai::sanitize::{sanitize_reply, SanitizedReply};
use crate::ai::{AiCollaborator, AiError, AiReply, AiRequest, AI_NOT_CONFIGURED, AI_RESPONSE_MALFORMED};
use crate::consistency::{check_consistency, resolve_auto_fix};
use crate::db::questions::{write_category_tags, write_explanation, write_translation, TranslationWrite};
use crate::db::reviews::{enqueue_revision, NewRevision};
use crate::db::step_logs::{append_step_log, NewStepLog};
use crate::db::task_items::{record_ai_request, record_ai_response, EXPLANATION_INCONSISTENT};
use crate::models::question::IMPLICIT_EXPLANATION_LOCALE;
use crate::models::{ErrorStage, Operation, Question, RevisionSource, StepCheckpoint, TaskOptions};

/// Item-level failure, recorded on the item
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub code: String,
    pub stage: ErrorStage,
    pub message: String,
    pub detail: Option<Value>,
}

impl ItemFailure {
    pub fn new(code: impl Into<String>, stage: ErrorStage, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            stage,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    fn from_ai(error: AiError, stage: ErrorStage) -> Self {
        let detail = json!({
            "status": error.status,
            "raw": error.raw,
        });
        Self::new(error.code, stage, error.message).with_detail(detail)
    }

    fn db_write(error: dq_common::Error) -> Self {
        Self::new("DB_WRITE_FAILED", ErrorStage::DbWrite, error.to_string())
    }
}

#[derive(Debug)]
pub enum HandlerError {
    /// The item failed; the task may continue
    Failed(ItemFailure),
    /// Bookkeeping failed; the task cannot continue
    Infrastructure(dq_common::Error),
}

impl From<dq_common::Error> for HandlerError {
    fn from(e: dq_common::Error) -> Self {
        HandlerError::Infrastructure(e)
    }
}

impl From<ItemFailure> for HandlerError {
    fn from(f: ItemFailure) -> Self {
        HandlerError::Failed(f)
    }
}

/// Everything a handler needs for one item
pub struct ItemContext<'a> {
    pub db: &'a SqlitePool,
    pub ai: Option<&'a dyn AiCollaborator>,
    pub task_id: Uuid,
    pub item_id: i64,
    pub question: &'a Question,
    pub operation: Operation,
    pub target_locale: Option<&'a str>,
    pub options: &'a TaskOptions,
}

impl<'a> ItemContext<'a> {
    async fn step(
        &self,
        checkpoint: StepCheckpoint,
        level: &str,
        message: &str,
        payload: Option<&Value>,
    ) -> Result<(), HandlerError> {
        append_step_log(
            self.db,
            &NewStepLog {
                task_id: self.task_id,
                item_id: Some(self.item_id),
                question_id: Some(&self.question.id),
                operation: Some(self.operation.as_str()),
                target_locale: self.target_locale,
                checkpoint,
                level,
                message,
                payload,
            },
        )
        .await?;
        Ok(())
    }

    fn require_target(&self) -> Result<&'a str, HandlerError> {
        self.target_locale.ok_or_else(|| {
            HandlerError::Failed(ItemFailure::new(
                "TARGET_LOCALE_MISSING",
                ErrorStage::Load,
                format!("{} needs a target locale", self.operation.as_str()),
            ))
        })
    }

    async fn call_ai(&self, request: &AiRequest) -> Result<AiReply, HandlerError> {
        let request_json = serde_json::to_value(request).map_err(dq_common::Error::from)?;
        record_ai_request(self.db, self.item_id, &request_json).await?;
        self.step(StepCheckpoint::AiCallBefore, "info", "Calling AI service", Some(&request_json))
            .await?;

        let Some(ai) = self.ai else {
            return Err(ItemFailure::new(
                AI_NOT_CONFIGURED,
                ErrorStage::AiCall,
                "AI service is not configured",
            )
            .into());
        };

        match ai.ask(request).await {
            Ok(reply) => {
                record_ai_response(self.db, self.item_id, &reply.raw).await?;
                self.step(StepCheckpoint::AiCallAfter, "info", "AI service replied", Some(&reply.raw))
                    .await?;
                Ok(reply)
            }
            Err(error) => {
                let payload = json!({
                    "errorCode": error.code,
                    "message": error.message,
                    "status": error.status,
                    "raw": error.raw,
                });
                record_ai_response(self.db, self.item_id, &payload).await?;
                self.step(StepCheckpoint::AiCallAfter, "error", "AI service call failed", Some(&payload))
                    .await?;
                Err(ItemFailure::from_ai(error, ErrorStage::AiCall).into())
            }
        }
    }

    async fn sanitize(&self, reply: &AiReply, locale: &str) -> Result<SanitizedReply, HandlerError> {
        match sanitize_reply(&reply.data, locale) {
            Ok(cleaned) => {
                let payload = serde_json::to_value(&cleaned).map_err(dq_common::Error::from)?;
                let (level, message) = if cleaned.stripped_locales.is_empty() {
                    ("info", "AI reply cleaned")
                } else {
                    ("warn", "AI reply cleaned, unsupported locales stripped")
                };
                self.step(StepCheckpoint::SanitizeAfter, level, message, Some(&payload))
                    .await?;
                Ok(cleaned)
            }
            Err(error) => {
                let payload = json!({"errorCode": error.code, "message": error.message, "raw": reply.raw});
                self.step(StepCheckpoint::SanitizeAfter, "error", "AI reply unusable", Some(&payload))
                    .await?;
                Err(ItemFailure::from_ai(error, ErrorStage::Sanitize).into())
            }
        }
    }

    /// Fail at the sanitize stage, keeping the upstream reply
    fn malformed(&self, reply: &AiReply, message: &str) -> HandlerError {
        ItemFailure::new(AI_RESPONSE_MALFORMED, ErrorStage::Sanitize, message)
            .with_detail(json!({ "raw": reply.raw }))
            .into()
    }
}

/// Options of a question for a locale, from a list or a locale map
fn options_for(question: &Question, locale: &str) -> Vec<String> {
    let list = match &question.options {
        Some(Value::Array(items)) => Some(items),
        Some(Value::Object(map)) => map
            .get(locale)
            .or_else(|| map.get(IMPLICIT_EXPLANATION_LOCALE))
            .and_then(Value::as_array),
        _ => None,
    };
    list.map(|items| {
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect()
    })
    .unwrap_or_default()
}

/// Prompt body: question text, options and explanation in one locale
fn question_block(question: &Question, locale: &str) -> String {
    let mut lines = vec![format!(
        "Content: {}",
        question.content_text(locale).unwrap_or_default()
    )];
    let options = options_for(question, locale);
    if !options.is_empty() {
        lines.push(format!("Options:\n- {}", options.join("\n- ")));
    }
    let explanations = question.explanations();
    if let Some(text) = explanations
        .get(locale)
        .or_else(|| explanations.get(IMPLICIT_EXPLANATION_LOCALE))
    {
        lines.push(format!("Explanation: {}", text));
    }
    lines.join("\n")
}

/// Run one item
pub async fn run_item(ctx: &ItemContext<'_>) -> Result<(), HandlerError> {
    match ctx.operation {
        Operation::Translate => translate(ctx).await,
        Operation::Polish => polish(ctx).await,
        Operation::FillMissing => fill_missing(ctx).await,
        Operation::CategoryTags => category_tags(ctx).await,
        Operation::ExplanationAudit => explanation_audit(ctx).await,
    }
}

async fn translate(ctx: &ItemContext<'_>) -> Result<(), HandlerError> {
    let to = ctx.require_target()?;
    let from = ctx
        .options
        .translate_options
        .as_ref()
        .map(|o| o.from.as_str())
        .unwrap_or(IMPLICIT_EXPLANATION_LOCALE);

    let prompt = [
        format!("Translate the driving-exam question into target language {} from {}.", to, from),
        "Output strictly JSON with keys: content (string), options (string[] optional), explanation (string optional).".to_string(),
        "Do not include any commentary, only JSON.".to_string(),
        String::new(),
        question_block(ctx.question, from),
    ]
    .join("\n");
    let request = AiRequest {
        question: prompt,
        lang: to.to_string(),
        scene: ctx.operation.scene().to_string(),
        source_language: Some(from.to_string()),
        target_language: Some(to.to_string()),
    };

    let reply = ctx.call_ai(&request).await?;
    let cleaned = ctx.sanitize(&reply, to).await?;
    let content = match cleaned.require_content() {
        Ok(content) => content.to_string(),
        Err(_) => return Err(ctx.malformed(&reply, "Translation reply has no content")),
    };

    let write = TranslationWrite {
        content,
        options: cleaned.options.clone(),
        explanation: cleaned.explanation.clone(),
    };
    let payload = json!({
        "locale": to,
        "content": write.content,
        "options": write.options,
        "explanation": write.explanation,
    });
    ctx.step(StepCheckpoint::DbWriteBefore, "info", "Writing translation", Some(&payload))
        .await?;
    write_translation(ctx.db, &ctx.question.id, to, &write)
        .await
        .map_err(ItemFailure::db_write)?;
    Ok(())
}

async fn polish(ctx: &ItemContext<'_>) -> Result<(), HandlerError> {
    let locale = ctx.require_target()?;
    let prompt = [
        format!("You are an editor improving clarity and correctness of driving-exam questions in {}.", locale),
        "Polish the text for clarity, fix grammar, keep original meaning.".to_string(),
        "Output strictly JSON with keys: content (string), options (string[] optional), explanation (string optional).".to_string(),
        String::new(),
        question_block(ctx.question, locale),
    ]
    .join("\n");
    let request = AiRequest {
        question: prompt,
        lang: locale.to_string(),
        scene: ctx.operation.scene().to_string(),
        source_language: None,
        target_language: None,
    };

    let reply = ctx.call_ai(&request).await?;
    let cleaned = ctx.sanitize(&reply, locale).await?;
    let Some(proposed) = cleaned.explanation_text().map(str::to_string) else {
        return Err(ctx.malformed(&reply, "Polish reply has no explanation"));
    };

    let current = ctx.question.explanations().get(locale).cloned();
    let answer = ctx.question.answer_token();
    let verdict = check_consistency(answer.as_deref(), Some(&proposed), Some(locale));
    let revision = NewRevision {
        question_id: ctx.question.id.clone(),
        locale: locale.to_string(),
        audit_run_id: Some(ctx.task_id),
        source: RevisionSource::Polish,
        old_text: current,
        proposed_text: Some(proposed),
        auto_fixable: false,
        verdict: Some(verdict),
    };
    let payload = json!({
        "locale": locale,
        "proposedText": revision.proposed_text,
        "reviewQueue": true,
    });
    ctx.step(StepCheckpoint::DbWriteBefore, "info", "Enqueueing polish proposal for review", Some(&payload))
        .await?;
    enqueue_revision(ctx.db, &revision)
        .await
        .map_err(ItemFailure::db_write)?;
    Ok(())
}

async fn fill_missing(ctx: &ItemContext<'_>) -> Result<(), HandlerError> {
    let locale = ctx.target_locale.unwrap_or(IMPLICIT_EXPLANATION_LOCALE);
    let present = ctx
        .question
        .explanations()
        .get(locale)
        .is_some_and(|t| !t.trim().is_empty());
    if present {
        tracing::debug!(question_id = %ctx.question.id, locale, "Explanation present, nothing to fill");
        return Ok(());
    }

    let answer = ctx.question.answer_token().unwrap_or_default();
    let prompt = [
        format!("Write a concise explanation in {} for the driving-exam question below.", locale),
        format!("The correct answer is: {}. The explanation must agree with it.", answer),
        "Output strictly JSON with key: explanation (string).".to_string(),
        String::new(),
        question_block(ctx.question, locale),
    ]
    .join("\n");
    let request = AiRequest {
        question: prompt,
        lang: locale.to_string(),
        scene: ctx.operation.scene().to_string(),
        source_language: None,
        target_language: Some(locale.to_string()),
    };

    let reply = ctx.call_ai(&request).await?;
    let cleaned = ctx.sanitize(&reply, locale).await?;
    let Some(text) = cleaned.explanation_text().map(str::to_string) else {
        return Err(ctx.malformed(&reply, "Reply has no explanation"));
    };

    let payload = json!({ "locale": locale, "explanation": text });
    ctx.step(StepCheckpoint::DbWriteBefore, "info", "Writing explanation", Some(&payload))
        .await?;
    write_explanation(ctx.db, &ctx.question.id, locale, &text)
        .await
        .map_err(ItemFailure::db_write)?;
    Ok(())
}

async fn category_tags(ctx: &ItemContext<'_>) -> Result<(), HandlerError> {
    let prompt = [
        "Classify the driving-exam question below.".to_string(),
        "Output strictly JSON with keys: category (string), tags (string[]).".to_string(),
        String::new(),
        question_block(ctx.question, IMPLICIT_EXPLANATION_LOCALE),
    ]
    .join("\n");
    let request = AiRequest {
        question: prompt,
        lang: IMPLICIT_EXPLANATION_LOCALE.to_string(),
        scene: ctx.operation.scene().to_string(),
        source_language: None,
        target_language: None,
    };

    let reply = ctx.call_ai(&request).await?;
    let cleaned = ctx.sanitize(&reply, IMPLICIT_EXPLANATION_LOCALE).await?;
    let Some(category) = cleaned.category.clone() else {
        return Err(ctx.malformed(&reply, "Reply has no category"));
    };

    let payload = json!({ "category": category, "tags": cleaned.tags });
    ctx.step(StepCheckpoint::DbWriteBefore, "info", "Writing category and tags", Some(&payload))
        .await?;
    write_category_tags(ctx.db, &ctx.question.id, &category, &cleaned.tags)
        .await
        .map_err(ItemFailure::db_write)?;
    Ok(())
}

/// Check every explanation locale; inconsistencies fail the item and are
/// enqueued for review
async fn explanation_audit(ctx: &ItemContext<'_>) -> Result<(), HandlerError> {
    let answer = ctx.question.answer_token();
    let mut findings = Vec::new();
    let mut revisions = Vec::new();

    for (locale, text) in ctx.question.explanations() {
        let verdict = check_consistency(answer.as_deref(), Some(&text), Some(&locale));
        if !verdict.is_inconsistent() {
            continue;
        }
        let suggested_fix = resolve_auto_fix(verdict.expected, Some(&locale), &text);
        findings.push(json!({
            "explanationConsistency": verdict,
            "autoFixable": suggested_fix.is_some(),
            "oldText": text,
            "suggestedFix": suggested_fix,
            "source": RevisionSource::TaskAudit.as_str(),
        }));
        revisions.push(NewRevision {
            question_id: ctx.question.id.clone(),
            locale,
            audit_run_id: Some(ctx.task_id),
            source: RevisionSource::TaskAudit,
            old_text: Some(text),
            proposed_text: suggested_fix.clone(),
            auto_fixable: suggested_fix.is_some(),
            verdict: Some(verdict),
        });
    }

    if findings.is_empty() {
        return Ok(());
    }

    let detail = json!({ "findings": findings });
    ctx.step(
        StepCheckpoint::DbWriteBefore,
        "warn",
        "Enqueueing inconsistent explanations for review",
        Some(&detail),
    )
    .await?;
    for revision in &revisions {
        enqueue_revision(ctx.db, revision)
            .await
            .map_err(ItemFailure::db_write)?;
    }

    let locales: Vec<&str> = revisions.iter().map(|r| r.locale.as_str()).collect();
    Err(ItemFailure::new(
        EXPLANATION_INCONSISTENT,
        ErrorStage::Consistency,
        format!("Explanation disagrees with the answer in: {}", locales.join(", ")),
    )
    .with_detail(detail)
    .into())
}
