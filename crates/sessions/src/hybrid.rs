//! The hybrid session store: bounded memory tier over an optional
//! durable repository, with sticky fallback on durable failure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use vox_domain::error::Result;
use vox_domain::message::Message;

use crate::repository::ConversationRepository;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statistics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct StoreStats {
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub db_reads: AtomicU64,
    pub db_writes: AtomicU64,
    pub db_errors: AtomicU64,
    pub fallback_triggers: AtomicU64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory tier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct CachedSession {
    /// Bounded ring; the oldest messages evict silently.
    messages: VecDeque<Message>,
    last_activity: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HybridSessionStore {
    sessions: Mutex<HashMap<String, CachedSession>>,
    repo: Option<Arc<dyn ConversationRepository>>,
    /// Sticky: once set, durable I/O is suppressed until `reset_fallback`.
    fallback: AtomicBool,
    /// Serializes durable writes for this store.
    write_lock: tokio::sync::Mutex<()>,
    memory_limit: usize,
    ttl: Duration,
    stats: StoreStats,
}

impl HybridSessionStore {
    /// A store with a durable tier attached.
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        memory_limit: usize,
        ttl_hours: u64,
    ) -> Self {
        Self::build(Some(repo), memory_limit, ttl_hours)
    }

    /// A memory-only store: identical to running with `fallback=true`
    /// from birth.
    pub fn memory_only(memory_limit: usize, ttl_hours: u64) -> Self {
        Self::build(None, memory_limit, ttl_hours)
    }

    fn build(
        repo: Option<Arc<dyn ConversationRepository>>,
        memory_limit: usize,
        ttl_hours: u64,
    ) -> Self {
        tracing::info!(
            memory_limit,
            ttl_hours,
            durable = repo.is_some(),
            "hybrid session store ready"
        );
        Self {
            sessions: Mutex::new(HashMap::new()),
            repo,
            fallback: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
            memory_limit,
            ttl: Duration::hours(ttl_hours as i64),
            stats: StoreStats::default(),
        }
    }

    fn durable_active(&self) -> bool {
        self.repo.is_some() && !self.fallback.load(Ordering::Acquire)
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    // ── Read path ──────────────────────────────────────────────────

    /// Conversation history, oldest first.
    ///
    /// Memory hit wins; on a miss the durable tier is consulted and the
    /// memory tier populated. On a hit with a healthy durable tier, a
    /// best-effort read-through may surface older history the ring has
    /// already evicted.
    pub async fn get_history(&self, session_id: &str, limit: Option<usize>) -> Vec<Message> {
        let cached: Option<Vec<Message>> = {
            let sessions = self.sessions.lock();
            sessions
                .get(session_id)
                .map(|s| s.messages.iter().cloned().collect())
        };

        if let Some(cache_messages) = cached {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);

            // Best-effort read-through for history beyond the ring.
            if self.durable_active() {
                let fetch = limit.unwrap_or(self.memory_limit);
                match self.load_from_durable(session_id, fetch).await {
                    Ok(db_messages) if db_messages.len() > cache_messages.len() => {
                        tracing::debug!(
                            session_id,
                            count = db_messages.len(),
                            "read-through found older history"
                        );
                        return clamp_tail(db_messages, limit);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // The cache still serves; no fallback trip here.
                        tracing::warn!(session_id, error = %e, "read-through failed, using cache");
                    }
                }
            }

            return clamp_tail(cache_messages, limit);
        }

        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        if self.durable_active() {
            match self.load_from_durable(session_id, limit.unwrap_or(self.memory_limit)).await {
                Ok(messages) => {
                    if !messages.is_empty() {
                        let mut sessions = self.sessions.lock();
                        let ring = messages
                            .iter()
                            .rev()
                            .take(self.memory_limit)
                            .rev()
                            .cloned()
                            .collect();
                        sessions.insert(
                            session_id.to_string(),
                            CachedSession {
                                messages: ring,
                                last_activity: Utc::now(),
                            },
                        );
                        tracing::debug!(
                            session_id,
                            count = messages.len(),
                            "history loaded from durable tier"
                        );
                    }
                    return messages;
                }
                Err(e) => {
                    tracing::error!(session_id, error = %e, "durable history load failed");
                    self.trip_fallback();
                    return Vec::new();
                }
            }
        }

        Vec::new()
    }

    // ── Write path ─────────────────────────────────────────────────

    /// Append a message: memory tier unconditionally, then the durable
    /// tier under the write lock. A durable failure trips fallback mode
    /// and never fails the call.
    pub async fn add_message(
        &self,
        session_id: &str,
        user_id: Option<&str>,
        message: Message,
    ) {
        {
            let mut sessions = self.sessions.lock();
            let entry = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| CachedSession {
                    messages: VecDeque::with_capacity(self.memory_limit),
                    last_activity: Utc::now(),
                });
            entry.messages.push_back(message.clone());
            while entry.messages.len() > self.memory_limit {
                entry.messages.pop_front();
            }
            entry.last_activity = Utc::now();
        }

        let Some(repo) = self.repo.clone().filter(|_| self.durable_active()) else {
            return;
        };

        let _guard = self.write_lock.lock().await;

        // Auto-creating the session row is a best-effort prerequisite;
        // its failure must not stop the message write attempt.
        if let Err(e) = repo.get_or_create_session(session_id, user_id).await {
            tracing::warn!(session_id, error = %e, "durable session auto-create failed");
        }

        match repo.save_message(session_id, &message).await {
            Ok(()) => {
                self.stats.db_writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "durable message write failed");
                self.trip_fallback();
            }
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Remove a session from both tiers. Missing sessions are a
    /// non-error.
    pub async fn delete_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);

        if let Some(repo) = self.repo.clone().filter(|_| self.durable_active()) {
            if let Err(e) = repo.delete_session(session_id).await {
                tracing::error!(session_id, error = %e, "durable session delete failed");
                self.trip_fallback();
            }
        }
        tracing::info!(session_id, "session deleted");
    }

    /// Purge memory-tier sessions idle past the TTL. The durable tier's
    /// expiry is not this store's concern.
    pub fn cleanup_expired_sessions(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "expired sessions purged from memory");
        }
        removed
    }

    /// Sessions owned by a user, newest activity first. Served from the
    /// durable tier; in fallback (or without one) the answer is empty
    /// rather than an error.
    pub async fn list_user_sessions(
        &self,
        user_id: &str,
        status: Option<vox_domain::message::SessionStatus>,
    ) -> Vec<vox_domain::message::Session> {
        let Some(repo) = self.repo.clone().filter(|_| self.durable_active()) else {
            return Vec::new();
        };
        self.stats.db_reads.fetch_add(1, Ordering::Relaxed);
        match repo.list_user_sessions(user_id, status).await {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(user_id, error = %e, "durable session listing failed");
                self.trip_fallback();
                Vec::new()
            }
        }
    }

    /// Probe the durable tier; on success clear the fallback flag.
    pub async fn reset_fallback(&self) -> bool {
        if !self.fallback.load(Ordering::Acquire) {
            return true;
        }
        let Some(repo) = &self.repo else {
            return false;
        };

        match repo.probe().await {
            Ok(()) => {
                self.fallback.store(false, Ordering::Release);
                tracing::info!("durable tier recovered, fallback cleared");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "durable tier still unavailable");
                false
            }
        }
    }

    pub fn stats_snapshot(&self) -> serde_json::Value {
        let hits = self.stats.cache_hits.load(Ordering::Relaxed);
        let misses = self.stats.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        serde_json::json!({
            "cache_hits": hits,
            "cache_misses": misses,
            "cache_hit_rate": format!("{hit_rate:.2}%"),
            "db_reads": self.stats.db_reads.load(Ordering::Relaxed),
            "db_writes": self.stats.db_writes.load(Ordering::Relaxed),
            "db_errors": self.stats.db_errors.load(Ordering::Relaxed),
            "fallback_triggers": self.stats.fallback_triggers.load(Ordering::Relaxed),
            "fallback_mode": self.is_fallback(),
            "database_enabled": self.repo.is_some(),
            "active_sessions": self.active_session_count(),
        })
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn load_from_durable(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let repo = self
            .repo
            .as_ref()
            .ok_or_else(|| vox_domain::Error::Internal("no durable tier attached".into()))?;
        self.stats.db_reads.fetch_add(1, Ordering::Relaxed);
        repo.load_recent_messages(session_id, limit).await
    }

    fn trip_fallback(&self) {
        self.stats.db_errors.fetch_add(1, Ordering::Relaxed);
        if !self.fallback.swap(true, Ordering::AcqRel) {
            self.stats.fallback_triggers.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("durable tier failed; store is now memory-only (fallback mode)");
        }
    }
}

fn clamp_tail(mut messages: Vec<Message>, limit: Option<usize>) -> Vec<Message> {
    if let Some(limit) = limit {
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
    }
    messages
}
