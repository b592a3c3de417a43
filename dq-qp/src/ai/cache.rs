//! Owned answer cache for AI replies
//!
//! Bounded, TTL-expiring, evicting the least recently used entry when full.
//! Time comes from an injected [`Clock`] so expiry is testable.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{AiCollaborator, AiError, AiReply, AiRequest};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.origin + *offset
    }
}

struct CacheEntry {
    reply: AiReply,
    inserted_at: Instant,
    last_access: u64,
}

/// Bounded TTL + LRU map from request to reply
pub struct AnswerCache {
    entries: Mutex<HashMap<AiRequest, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    tick: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnswerCache {
    /// A capacity of zero disables caching
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
            ttl,
            clock,
            tick: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, request: &AiRequest) -> Option<AiReply> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match entries.get(request) {
            Some(entry) => now.duration_since(entry.inserted_at) > self.ttl,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        if expired {
            entries.remove(request);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let tick = self.next_tick();
        let entry = entries.get_mut(request)?;
        entry.last_access = tick;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.reply.clone())
    }

    pub fn insert(&self, request: AiRequest, reply: AiReply) {
        if self.capacity == 0 {
            return;
        }
        let now = self.clock.now();
        let tick = self.next_tick();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        entries.retain(|_, e| now.duration_since(e.inserted_at) <= self.ttl);
        if !entries.contains_key(&request) && entries.len() >= self.capacity {
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
            }
        }
        entries.insert(
            request,
            CacheEntry {
                reply,
                inserted_at: now,
                last_access: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Collaborator decorator answering repeated requests from an [`AnswerCache`]
///
/// Only successful replies are cached.
pub struct CachedAiCollaborator {
    inner: Arc<dyn AiCollaborator>,
    cache: Arc<AnswerCache>,
}

impl CachedAiCollaborator {
    pub fn new(inner: Arc<dyn AiCollaborator>, cache: Arc<AnswerCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &AnswerCache {
        &self.cache
    }
}

#[async_trait]
impl AiCollaborator for CachedAiCollaborator {
    async fn ask(&self, request: &AiRequest) -> Result<AiReply, AiError> {
        if let Some(reply) = self.cache.get(request) {
            tracing::debug!(scene = %request.scene, "AI answer cache hit");
            return Ok(reply);
        }
        let reply = self.inner.ask(request).await?;
        self.cache.insert(request.clone(), reply.clone());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn request(question: &str) -> AiRequest {
        AiRequest {
            question: question.to_string(),
            lang: "zh".to_string(),
            scene: "question_polish".to_string(),
            source_language: None,
            target_language: None,
        }
    }

    fn reply(text: &str) -> AiReply {
        AiReply {
            data: json!(text),
            raw: json!(text),
        }
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = AnswerCache::new(4, Duration::from_secs(60), clock.clone());

        cache.insert(request("a"), reply("A"));
        clock.advance(Duration::from_secs(30));
        assert_eq!(cache.get(&request("a")), Some(reply("A")));

        clock.advance(Duration::from_secs(31));
        assert_eq!(cache.get(&request("a")), None);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = AnswerCache::new(2, Duration::from_secs(60), Arc::new(ManualClock::new()));

        cache.insert(request("a"), reply("A"));
        cache.insert(request("b"), reply("B"));
        assert!(cache.get(&request("a")).is_some());
        cache.insert(request("c"), reply("C"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&request("a")).is_some());
        assert!(cache.get(&request("b")).is_none());
        assert!(cache.get(&request("c")).is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = AnswerCache::new(0, Duration::from_secs(60), Arc::new(SystemClock));
        cache.insert(request("a"), reply("A"));
        assert!(cache.is_empty());
    }

    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AiCollaborator for Counting {
        async fn ask(&self, request: &AiRequest) -> Result<AiReply, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AiError::new("AI_SERVICE_TIMEOUT", "slow"));
            }
            Ok(reply(&request.question))
        }
    }

    #[tokio::test]
    async fn test_decorator_caches_successes_only() {
        let cache = Arc::new(AnswerCache::new(8, Duration::from_secs(60), Arc::new(SystemClock)));

        let ok = Arc::new(Counting { calls: AtomicUsize::new(0), fail: false });
        let cached = CachedAiCollaborator::new(ok.clone(), cache.clone());
        cached.ask(&request("a")).await.unwrap();
        cached.ask(&request("a")).await.unwrap();
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);

        let failing = Arc::new(Counting { calls: AtomicUsize::new(0), fail: true });
        let cached = CachedAiCollaborator::new(failing.clone(), cache);
        assert!(cached.ask(&request("b")).await.is_err());
        assert!(cached.ask(&request("b")).await.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }
}
