//! In-flight request coalescing
//!
//! Identical `(user, conversation, query)` requests arriving within the
//! dedup window attach to the already-running execution instead of
//! starting a second one. A cancelled execution invalidates its entry so
//! the next identical request starts fresh.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::steps::{FrameSink, FrameStream};

struct InFlight {
    sink: Arc<FrameSink>,
    started: Instant,
}

/// Process-wide table of in-flight executions
pub struct DedupTable {
    entries: DashMap<String, InFlight>,
    window: Duration,
}

impl DedupTable {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            window,
        }
    }

    /// Stable key over the identifying request fields
    pub fn key(user_id: &str, conversation_id: Option<&str>, query: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.as_bytes());
        hasher.update(b"\x00");
        hasher.update(conversation_id.unwrap_or("").as_bytes());
        hasher.update(b"\x00");
        hasher.update(query.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Join an execution already in flight for this key, if it started
    /// within the window.
    pub fn join(&self, key: &str) -> Option<FrameStream> {
        let entry = self.entries.get(key)?;
        if entry.started.elapsed() > self.window {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.sink.subscribe())
    }

    /// Register a fresh execution
    pub fn register(&self, key: String, sink: Arc<FrameSink>) {
        self.entries.insert(
            key,
            InFlight {
                sink,
                started: Instant::now(),
            },
        );
    }

    /// Drop an entry immediately (cancellation path)
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Evict entries older than the window
    pub fn sweep(&self) {
        self.entries
            .retain(|_, entry| entry.started.elapsed() <= self.window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiki_agent_core::{Frame, StepPhase};

    #[test]
    fn key_is_stable_and_sensitive() {
        let a = DedupTable::key("u1", Some("c1"), "hello");
        let b = DedupTable::key("u1", Some("c1"), "hello");
        let c = DedupTable::key("u1", Some("c2"), "hello");
        let d = DedupTable::key("u1", Some("c1"), "hello there");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[tokio::test]
    async fn join_within_window_shares_stream() {
        let table = DedupTable::new(Duration::from_secs(2));
        let (sink, _primary) = FrameSink::new(64);
        sink.step(StepPhase::Analyzing, "analyzing");

        let key = DedupTable::key("u1", None, "q");
        table.register(key.clone(), sink.clone());

        let mut joined = table.join(&key).expect("should join in-flight run");
        match joined.next().await.unwrap() {
            Frame::Step { seq: 0, .. } => {}
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn expired_entries_do_not_join() {
        let table = DedupTable::new(Duration::from_millis(0));
        let (sink, _primary) = FrameSink::new(64);
        let key = DedupTable::key("u1", None, "q");
        table.register(key.clone(), sink);
        std::thread::sleep(Duration::from_millis(5));
        assert!(table.join(&key).is_none());
        // Lazy eviction removed the stale entry
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let table = DedupTable::new(Duration::from_secs(2));
        let (sink, _primary) = FrameSink::new(64);
        let key = DedupTable::key("u1", None, "q");
        table.register(key.clone(), sink);
        table.invalidate(&key);
        assert!(table.join(&key).is_none());
    }
}
