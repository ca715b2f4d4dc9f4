//! In-memory reference backend.
//!
//! Implements the full backend contract against process-local state:
//! field records, set collections, expiring entries, glob pattern
//! pub/sub, and optimistic snapshots whose conflict detection rides a
//! per-key write counter. The test suite runs on it, and so can
//! anything that wants board semantics without a server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::backend::{Backend, Commit, Message, Snapshot, Subscription};
use super::StoreError;

#[derive(Default)]
struct State {
    records: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    expiring: HashMap<String, (String, Instant)>,
    write_counts: HashMap<String, u64>,
    subscribers: Vec<Subscriber>,
    next_subscriber_id: u64,
}

struct Subscriber {
    id: u64,
    pattern: String,
    tx: mpsc::UnboundedSender<Message>,
}

impl State {
    fn write_count(&self, key: &str) -> u64 {
        self.write_counts.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        *self.write_counts.entry(key.to_string()).or_insert(0) += 1;
    }

    fn live_expiring(&mut self, key: &str) -> Option<String> {
        match self.expiring.get(key) {
            Some((value, deadline)) if *deadline > Instant::now() => Some(value.clone()),
            Some(_) => {
                self.expiring.remove(key);
                None
            }
            None => None,
        }
    }

    fn deliver(&mut self, channel: &str, payload: &str) {
        // drop subscribers whose receiver side is gone
        self.subscribers.retain(|sub| {
            if !pattern_matches(&sub.pattern, channel) {
                return true;
            }
            sub.tx
                .send(Message {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
        });
    }
}

/// Process-local backend. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn begin(&self, watch: Option<&str>) -> Result<Arc<dyn Snapshot>, StoreError> {
        let watch = match watch {
            Some(key) => Some((key.to_string(), self.lock()?.write_count(key))),
            None => None,
        };
        Ok(Arc::new(MemorySnapshot {
            state: self.state.clone(),
            watch,
            staged: Mutex::new(Vec::new()),
        }))
    }

    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.lock()?.records.get(key).cloned().unwrap_or_default())
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self.lock()?.sets.get(key).cloned().unwrap_or_default())
    }

    async fn read_expiring(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.lock()?;
        Ok(state.live_expiring(key))
    }

    async fn write_expiring(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .expiring
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        state.touch(key);
        Ok(())
    }

    async fn clear_expiring(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.expiring.remove(key);
        state.touch(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        self.lock()?.deliver(channel, payload);
        Ok(())
    }

    async fn subscribe_pattern(&self, pattern: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock()?;
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.push(Subscriber {
            id,
            pattern: pattern.to_string(),
            tx,
        });
        Ok(Box::new(MemorySubscription {
            state: self.state.clone(),
            id,
            rx,
        }))
    }
}

enum StagedOp {
    WriteFields {
        key: String,
        fields: HashMap<String, String>,
    },
    Delete {
        key: String,
    },
    SetAdd {
        key: String,
        member: String,
    },
    SetRemove {
        key: String,
        member: String,
    },
    WriteExpiring {
        key: String,
        value: String,
        ttl: Duration,
    },
    ClearExpiring {
        key: String,
    },
    Publish {
        channel: String,
        payload: String,
    },
}

struct MemorySnapshot {
    state: Arc<Mutex<State>>,
    watch: Option<(String, u64)>,
    staged: Mutex<Vec<StagedOp>>,
}

impl MemorySnapshot {
    fn push(&self, op: StagedOp) {
        self.staged.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Snapshot for MemorySnapshot {
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))?;
        Ok(state.records.get(key).cloned().unwrap_or_default())
    }

    fn stage_write_fields(&self, key: &str, fields: HashMap<String, String>) {
        self.push(StagedOp::WriteFields {
            key: key.to_string(),
            fields,
        });
    }

    fn stage_delete(&self, key: &str) {
        self.push(StagedOp::Delete {
            key: key.to_string(),
        });
    }

    fn stage_set_add(&self, key: &str, member: &str) {
        self.push(StagedOp::SetAdd {
            key: key.to_string(),
            member: member.to_string(),
        });
    }

    fn stage_set_remove(&self, key: &str, member: &str) {
        self.push(StagedOp::SetRemove {
            key: key.to_string(),
            member: member.to_string(),
        });
    }

    fn stage_write_expiring(&self, key: &str, value: &str, ttl: Duration) {
        self.push(StagedOp::WriteExpiring {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
    }

    fn stage_clear_expiring(&self, key: &str) {
        self.push(StagedOp::ClearExpiring {
            key: key.to_string(),
        });
    }

    fn stage_publish(&self, channel: &str, payload: &str) {
        self.push(StagedOp::Publish {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
    }

    async fn commit(&self) -> Result<Commit, StoreError> {
        let staged = std::mem::take(&mut *self.staged.lock().unwrap());
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))?;

        if let Some((key, seen)) = &self.watch {
            if state.write_count(key) != *seen {
                return Ok(Commit::Conflict);
            }
        }

        for op in staged {
            match op {
                StagedOp::WriteFields { key, fields } => {
                    state.records.entry(key.clone()).or_default().extend(fields);
                    state.touch(&key);
                }
                StagedOp::Delete { key } => {
                    state.records.remove(&key);
                    state.touch(&key);
                }
                StagedOp::SetAdd { key, member } => {
                    state.sets.entry(key.clone()).or_default().insert(member);
                    state.touch(&key);
                }
                StagedOp::SetRemove { key, member } => {
                    if let Some(set) = state.sets.get_mut(&key) {
                        set.remove(&member);
                    }
                    state.touch(&key);
                }
                StagedOp::WriteExpiring { key, value, ttl } => {
                    state
                        .expiring
                        .insert(key.clone(), (value, Instant::now() + ttl));
                    state.touch(&key);
                }
                StagedOp::ClearExpiring { key } => {
                    state.expiring.remove(&key);
                    state.touch(&key);
                }
                StagedOp::Publish { channel, payload } => {
                    state.deliver(&channel, &payload);
                }
            }
        }

        Ok(Commit::Applied)
    }
}

struct MemorySubscription {
    state: Arc<Mutex<State>>,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    async fn unsubscribe(&mut self) -> Result<(), StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Backend("state lock poisoned".to_string()))?;
        state.subscribers.retain(|sub| sub.id != self.id);
        self.rx.close();
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.subscribers.retain(|sub| sub.id != self.id);
        }
    }
}

/// Glob matcher for channel patterns: `*` matches any run of
/// characters, `?` matches exactly one.
fn pattern_matches(pattern: &str, text: &str) -> bool {
    fn matches(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some((b'*', rest)) => (0..=text.len()).any(|skip| matches(rest, &text[skip..])),
            Some((b'?', rest)) => match text.split_first() {
                Some((_, text_rest)) => matches(rest, text_rest),
                None => false,
            },
            Some((ch, rest)) => match text.split_first() {
                Some((text_ch, text_rest)) => ch == text_ch && matches(rest, text_rest),
                None => false,
            },
        }
    }
    matches(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("board-1*", "board-1"));
        assert!(pattern_matches("board-1*", "board-1.extra"));
        assert!(pattern_matches("boards", "boards"));
        assert!(pattern_matches("b?ard", "board"));
        assert!(!pattern_matches("board-1*", "board-2"));
        assert!(!pattern_matches("board-1", "board-12"));
        assert!(!pattern_matches("b?ard", "bard"));
    }

    #[tokio::test]
    async fn test_field_writes_merge() {
        let backend = MemoryBackend::new();

        let batch = backend.begin(None).await.unwrap();
        batch.stage_write_fields("k", fields(&[("a", "1"), ("b", "2")]));
        assert_eq!(batch.commit().await.unwrap(), Commit::Applied);

        let batch = backend.begin(None).await.unwrap();
        batch.stage_write_fields("k", fields(&[("b", "3")]));
        batch.commit().await.unwrap();

        let stored = backend.read_fields("k").await.unwrap();
        assert_eq!(stored, fields(&[("a", "1"), ("b", "3")]));
    }

    #[tokio::test]
    async fn test_watched_key_conflict() {
        let backend = MemoryBackend::new();

        let watched = backend.begin(Some("k")).await.unwrap();

        let rival = backend.begin(None).await.unwrap();
        rival.stage_write_fields("k", fields(&[("f", "v")]));
        assert_eq!(rival.commit().await.unwrap(), Commit::Applied);

        watched.stage_write_fields("k", fields(&[("f", "w")]));
        assert_eq!(watched.commit().await.unwrap(), Commit::Conflict);

        // the losing batch must not have applied
        let stored = backend.read_fields("k").await.unwrap();
        assert_eq!(stored, fields(&[("f", "v")]));
    }

    #[tokio::test]
    async fn test_unrelated_writes_do_not_conflict() {
        let backend = MemoryBackend::new();

        let watched = backend.begin(Some("k")).await.unwrap();

        let rival = backend.begin(None).await.unwrap();
        rival.stage_write_fields("other", fields(&[("f", "v")]));
        rival.commit().await.unwrap();

        watched.stage_write_fields("k", fields(&[("f", "w")]));
        assert_eq!(watched.commit().await.unwrap(), Commit::Applied);
    }

    #[tokio::test]
    async fn test_expiring_entries_lapse() {
        let backend = MemoryBackend::new();

        backend
            .write_expiring("lock", "tok", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(
            backend.read_expiring("lock").await.unwrap().as_deref(),
            Some("tok")
        );

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(backend.read_expiring("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pattern_subscription_delivery() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe_pattern("room*").await.unwrap();

        backend.publish("room1", "hello").await.unwrap();
        backend.publish("lobby", "ignored").await.unwrap();
        backend.publish("room2", "again").await.unwrap();

        assert_eq!(
            sub.next().await,
            Some(Message {
                channel: "room1".to_string(),
                payload: "hello".to_string()
            })
        );
        assert_eq!(sub.next().await.unwrap().channel, "room2");

        sub.unsubscribe().await.unwrap();
        backend.publish("room1", "gone").await.unwrap();
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_publishes_fire_only_on_applied_commits() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe_pattern("chan").await.unwrap();

        let watched = backend.begin(Some("k")).await.unwrap();
        let rival = backend.begin(None).await.unwrap();
        rival.stage_write_fields("k", fields(&[("f", "v")]));
        rival.commit().await.unwrap();

        watched.stage_publish("chan", "never");
        assert_eq!(watched.commit().await.unwrap(), Commit::Conflict);

        backend.publish("chan", "real").await.unwrap();
        assert_eq!(sub.next().await.unwrap().payload, "real");
    }
}
