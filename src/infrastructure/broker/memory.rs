use crate::domain::ports::{StreamBroker, StreamEntry};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

struct Stream {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, Group>,
}

struct Group {
    /// Entries at or before this index in `entries` have been delivered to
    /// some consumer at least once.
    last_delivered: usize,
    /// Per-consumer pending (delivered, not yet acked) entry ids, in
    /// delivery order — replayed when a consumer reads with an id other
    /// than `">"`.
    pending: HashMap<String, VecDeque<String>>,
}

impl Stream {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            groups: HashMap::new(),
        }
    }
}

/// In-memory `StreamBroker`. Backs local development and the whole test
/// suite; a production deployment would swap this for a client against a
/// real append-only, consumer-group-capable store without touching callers
/// (the trait is the seam).
pub struct InMemoryStreamBroker {
    streams: RwLock<HashMap<String, Stream>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
    sets: RwLock<HashMap<String, HashSet<String>>>,
    id_seq: AtomicU64,
}

impl InMemoryStreamBroker {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            hashes: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
            id_seq: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        let n = self.id_seq.fetch_add(1, Ordering::SeqCst);
        format!("{n}-0")
    }
}

impl Default for InMemoryStreamBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn id_index(entries: &[StreamEntry], id: &str) -> Option<usize> {
    entries.iter().position(|e| e.id == id)
}

#[async_trait]
impl StreamBroker for InMemoryStreamBroker {
    async fn xadd(&self, stream: &str, fields: HashMap<String, String>) -> Result<String> {
        let id = self.next_id();
        let mut streams = self.streams.write().await;
        let s = streams.entry(stream.to_string()).or_insert_with(Stream::new);
        s.entries.push(StreamEntry {
            id: id.clone(),
            fields,
        });
        Ok(id)
    }

    async fn xread(&self, stream: &str, after_id: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let streams = self.streams.read().await;
        let Some(s) = streams.get(stream) else {
            return Ok(Vec::new());
        };

        let start = if after_id == "0" || after_id == "0-0" {
            0
        } else {
            id_index(&s.entries, after_id).map(|i| i + 1).unwrap_or(s.entries.len())
        };

        Ok(s.entries.iter().skip(start).take(count).cloned().collect())
    }

    async fn xgroup_create(&self, stream: &str, group: &str) -> Result<()> {
        let mut streams = self.streams.write().await;
        let s = streams.entry(stream.to_string()).or_insert_with(Stream::new);
        // Idempotent: re-creation of an existing group is a no-op.
        s.groups.entry(group.to_string()).or_insert_with(|| Group {
            last_delivered: 0,
            pending: HashMap::new(),
        });
        Ok(())
    }

    async fn xreadgroup(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        start: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut streams = self.streams.write().await;
        let s = streams
            .entry(stream.to_string())
            .or_insert_with(Stream::new);
        let g = s.groups.entry(group.to_string()).or_insert_with(|| Group {
            last_delivered: 0,
            pending: HashMap::new(),
        });

        if start == ">" {
            let new_entries: Vec<StreamEntry> = s
                .entries
                .iter()
                .skip(g.last_delivered)
                .take(count)
                .cloned()
                .collect();
            g.last_delivered += new_entries.len();
            let consumer_pending = g.pending.entry(consumer.to_string()).or_default();
            for e in &new_entries {
                consumer_pending.push_back(e.id.clone());
            }
            Ok(new_entries)
        } else {
            // Replay this consumer's still-pending entries.
            let ids: Vec<String> = g
                .pending
                .get(consumer)
                .map(|p| p.iter().take(count).cloned().collect())
                .unwrap_or_default();
            Ok(ids
                .into_iter()
                .filter_map(|id| s.entries.iter().find(|e| e.id == id).cloned())
                .collect())
        }
    }

    async fn xack(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let mut streams = self.streams.write().await;
        if let Some(s) = streams.get_mut(stream)
            && let Some(g) = s.groups.get_mut(group)
        {
            for pending in g.pending.values_mut() {
                pending.retain(|pid| pid != id);
            }
        }
        Ok(())
    }

    async fn hset(&self, key: &str, fields: HashMap<String, String>) -> Result<()> {
        let mut hashes = self.hashes.write().await;
        hashes.entry(key.to_string()).or_default().extend(fields);
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let hashes = self.hashes.read().await;
        Ok(hashes.get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut sets = self.sets.write().await;
        Ok(sets.entry(key.to_string()).or_default().insert(member.to_string()))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut sets = self.sets.write().await;
        Ok(sets
            .get_mut(key)
            .map(|s| s.remove(member))
            .unwrap_or(false))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let sets = self.sets.read().await;
        Ok(sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn xadd_then_xread_returns_in_order() {
        let broker = InMemoryStreamBroker::new();
        broker
            .xadd("s", HashMap::from([("a".to_string(), "1".to_string())]))
            .await
            .unwrap();
        broker
            .xadd("s", HashMap::from([("a".to_string(), "2".to_string())]))
            .await
            .unwrap();

        let entries = broker.xread("s", "0", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].fields["a"], "1");
        assert_eq!(entries[1].fields["a"], "2");
    }

    #[tokio::test]
    async fn sadd_returns_true_only_on_first_insert() {
        let broker = InMemoryStreamBroker::new();
        assert!(broker.sadd("set", "x").await.unwrap());
        assert!(!broker.sadd("set", "x").await.unwrap());
    }

    #[tokio::test]
    async fn group_create_is_idempotent() {
        let broker = InMemoryStreamBroker::new();
        broker.xgroup_create("s", "g").await.unwrap();
        broker.xgroup_create("s", "g").await.unwrap();
    }

    #[tokio::test]
    async fn xreadgroup_new_then_ack_clears_pending() {
        let broker = InMemoryStreamBroker::new();
        broker.xgroup_create("s", "g").await.unwrap();
        let id = broker
            .xadd("s", HashMap::from([("a".to_string(), "1".to_string())]))
            .await
            .unwrap();

        let entries = broker.xreadgroup("s", "g", "c1", ">", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);

        // A second read of ">" should find nothing new.
        let entries2 = broker.xreadgroup("s", "g", "c1", ">", 10).await.unwrap();
        assert!(entries2.is_empty());

        // Not yet acked: pending replay should still find it.
        let pending = broker.xreadgroup("s", "g", "c1", "0", 10).await.unwrap();
        assert_eq!(pending.len(), 1);

        broker.xack("s", "g", &id).await.unwrap();
        let pending_after_ack = broker.xreadgroup("s", "g", "c1", "0", 10).await.unwrap();
        assert!(pending_after_ack.is_empty());
    }
}
