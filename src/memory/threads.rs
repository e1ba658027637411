//! Per-thread conversation memory with bounded lifetime
//!
//! Threads are created lazily on first use. Each thread has its own locks so
//! work on one conversation never waits on another. Growth is bounded two
//! ways: a cap on distinct threads (least recently active goes first) and an
//! idle TTL applied by [`ConversationMemory::evict_idle`]. Threads dropped by
//! the cap are queued for [`ConversationMemory::take_evicted`] so owners of
//! per-thread state can release it too.

use crate::memory::store::ConversationThread;
use crate::models::ConversationTurn;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Four user/assistant exchanges.
pub const DEFAULT_WINDOW_TURNS: usize = 8;
pub const DEFAULT_MAX_THREADS: usize = 10_000;
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Turns (single messages) retained per thread.
    pub window_turns: usize,
    pub max_threads: usize,
    pub idle_ttl: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_turns: DEFAULT_WINDOW_TURNS,
            max_threads: DEFAULT_MAX_THREADS,
            idle_ttl: DEFAULT_IDLE_TTL,
        }
    }
}

struct ThreadSlot {
    thread: RwLock<ConversationThread>,
    /// Held for the whole of a turn.
    gate: Arc<Mutex<()>>,
    last_active_ms: AtomicU64,
}

impl ThreadSlot {
    fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

/// Registry of conversation threads keyed by opaque thread id
pub struct ConversationMemory {
    config: MemoryConfig,
    threads: DashMap<String, Arc<ThreadSlot>>,
    /// Dropped by the thread cap, not yet collected.
    capped: DashSet<String>,
    epoch: Instant,
}

impl ConversationMemory {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            threads: DashMap::new(),
            capped: DashSet::new(),
            epoch: Instant::now(),
        }
    }

    /// Memory with a specific window and default lifetime limits.
    pub fn with_window(window_turns: usize) -> Self {
        Self::new(MemoryConfig {
            window_turns,
            ..MemoryConfig::default()
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn slot(&self, thread_id: &str) -> Arc<ThreadSlot> {
        if let Some(existing) = self.threads.get(thread_id) {
            let slot = Arc::clone(existing.value());
            drop(existing);
            slot.last_active_ms.store(self.now_ms(), Ordering::Relaxed);
            return slot;
        }

        if self.threads.len() >= self.config.max_threads {
            self.evict_least_recent();
        }

        let now = self.now_ms();
        let window = self.config.window_turns;
        let slot = self
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                debug!(thread_id, "Creating conversation thread");
                Arc::new(ThreadSlot {
                    thread: RwLock::new(ConversationThread::new(thread_id, window)),
                    gate: Arc::new(Mutex::new(())),
                    last_active_ms: AtomicU64::new(now),
                })
            })
            .value()
            .clone();
        slot.last_active_ms.store(now, Ordering::Relaxed);
        slot
    }

    /// Snapshot of the thread, creating it if absent.
    pub async fn get_thread(&self, thread_id: &str) -> ConversationThread {
        let slot = self.slot(thread_id);
        let thread = slot.thread.read().await;
        thread.clone()
    }

    /// Current window for the thread, oldest first.
    pub async fn window(&self, thread_id: &str) -> Vec<ConversationTurn> {
        let slot = self.slot(thread_id);
        let thread = slot.thread.read().await;
        thread.to_vec()
    }

    /// Append a turn, dropping the oldest beyond the window.
    pub async fn append(&self, thread_id: &str, turn: ConversationTurn) {
        let slot = self.slot(thread_id);
        let mut thread = slot.thread.write().await;
        let dropped = thread.push(turn);
        if dropped > 0 {
            debug!(thread_id, dropped, "Trimmed conversation window");
        }
    }

    /// Serialise turns on one thread. The returned guard keeps the thread
    /// from being evicted and blocks other turns on it until dropped.
    pub async fn begin_turn(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        loop {
            let slot = self.slot(thread_id);
            let guard = Arc::clone(&slot.gate).lock_owned().await;
            // The slot may have been removed while we queued on its gate.
            if self.is_registered(thread_id, &slot) {
                return guard;
            }
            debug!(thread_id, "Thread replaced while waiting for its turn gate");
        }
    }

    fn is_registered(&self, thread_id: &str, slot: &Arc<ThreadSlot>) -> bool {
        self.threads
            .get(thread_id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot))
    }

    /// Drop a thread explicitly, waiting for a turn in flight to finish.
    /// Returns whether it existed.
    pub async fn end_thread(&self, thread_id: &str) -> bool {
        let Some(slot) = self.threads.get(thread_id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let _gate = slot.gate.lock().await;
        self.threads
            .remove_if(thread_id, |_, current| Arc::ptr_eq(current, &slot))
            .is_some()
    }

    /// Ids dropped by the thread cap since the last call.
    pub fn take_evicted(&self) -> Vec<String> {
        let ids: Vec<String> = self.capped.iter().map(|id| id.key().clone()).collect();
        for id in &ids {
            self.capped.remove(id);
        }
        ids
    }

    /// Remove threads idle for at least the configured TTL. Threads with a
    /// turn in flight are kept. Returns the evicted ids.
    pub fn evict_idle(&self) -> Vec<String> {
        let now = self.now_ms();
        let ttl_ms = self.config.idle_ttl.as_millis() as u64;
        let is_idle = |slot: &ThreadSlot| {
            now.saturating_sub(slot.last_active_ms.load(Ordering::Relaxed)) >= ttl_ms
        };

        let candidates: Vec<String> = self
            .threads
            .iter()
            .filter(|entry| is_idle(&**entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let evicted: Vec<String> = candidates
            .into_iter()
            .filter(|id| {
                self.threads
                    .remove_if(id, |_, slot| is_idle(&**slot) && !slot.is_busy())
                    .is_some()
            })
            .collect();

        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted idle conversation threads");
        }
        evicted
    }

    fn evict_least_recent(&self) -> Option<String> {
        let oldest = self
            .threads
            .iter()
            .filter(|entry| !entry.value().is_busy())
            .min_by_key(|entry| entry.value().last_active_ms.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone())?;

        self.threads
            .remove_if(&oldest, |_, slot| !slot.is_busy())
            .map(|(id, _)| {
                debug!(thread_id = %id, "Evicted least recently active thread");
                self.capped.insert(id.clone());
                id
            })
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}
