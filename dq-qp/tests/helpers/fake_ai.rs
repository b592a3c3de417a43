//! Scripted AI collaborator

use async_trait::async_trait;
use dq_qp::ai::{AiCollaborator, AiError, AiReply, AiRequest};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Script = Box<dyn Fn(&AiRequest) -> Result<Value, AiError> + Send + Sync>;

/// Answers every request through a closure and records what it was asked
pub struct ScriptedAi {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<AiRequest>>,
}

impl ScriptedAi {
    pub fn new(script: impl Fn(&AiRequest) -> Result<Value, AiError> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same reply for every request
    pub fn always(reply: Value) -> Self {
        Self::new(move |_| Ok(reply.clone()))
    }

    /// Sleep before answering, to keep items in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiCollaborator for ScriptedAi {
    async fn ask(&self, request: &AiRequest) -> Result<AiReply, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let data = (self.script)(request)?;
        Ok(AiReply {
            raw: data.clone(),
            data,
        })
    }
}
