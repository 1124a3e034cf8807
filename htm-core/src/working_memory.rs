//! Per-robot working memory: a token-budgeted cache with LFU+LRU
//! eviction and context-assembly strategies.
//!
//! One instance exists per robot. All public operations are serialized
//! by a single internal lock; access order is consistent with
//! insertion/refresh order, and eviction ties break by insertion order
//! so the outcome is deterministic.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Context-assembly ordering strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStrategy {
    /// Most recently touched first
    Recent,
    /// Highest access count first
    Frequent,
    /// Rank by `ln(1+access_count) / (1 + age_hours)` descending
    Balanced,
}

impl ContextStrategy {
    /// Parse a strategy name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "recent" => Ok(Self::Recent),
            "frequent" => Ok(Self::Frequent),
            "balanced" => Ok(Self::Balanced),
            other => Err(Error::Validation(format!(
                "unknown context strategy '{other}'"
            ))),
        }
    }
}

/// A resident working-memory record.
///
/// Records are transient values keyed by the node id; they never own the
/// underlying node.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    /// Node content
    pub content: String,
    /// Token count of the content
    pub token_count: usize,
    /// Access count carried over from storage plus local touches
    pub access_count: u64,
    /// Last access time
    pub last_accessed: DateTime<Utc>,
    /// When the record entered this working memory
    pub added_at: DateTime<Utc>,
    /// Whether the record arrived via a recall operation
    pub from_recall: bool,
    /// Whether the record arrived via group synchronization
    pub from_sync: bool,
}

/// An evicted record, returned so the caller can persist side effects
/// (clearing `working_memory` flags in storage, notifying the group).
#[derive(Debug, Clone)]
pub struct EvictedRecord {
    /// Node id the record was keyed by
    pub key: i64,
    /// The record at the moment of eviction
    pub record: MemoryRecord,
    /// The eviction score it was selected with
    pub score: f64,
}

/// Working-memory statistics
#[derive(Debug, Clone, Default)]
pub struct WorkingMemoryStats {
    /// Resident record count
    pub count: usize,
    /// Sum of resident token counts
    pub current_tokens: usize,
    /// Configured token budget
    pub max_tokens: usize,
}

struct Inner {
    records: HashMap<i64, MemoryRecord>,
    /// Insertion/refresh order; later = more recently touched
    access_order: Vec<i64>,
    /// Monotonic insertion sequence for deterministic tie-breaks
    insertion_seq: HashMap<i64, u64>,
    next_seq: u64,
    current_tokens: usize,
}

/// Token-bounded in-memory cache with LFU+LRU eviction.
///
/// Victim score (lower = more evictable):
/// `ln(1 + access_count) + 1 / (1 + age_hours)`. Rarely used, old
/// records go first.
pub struct WorkingMemory {
    max_tokens: usize,
    inner: Mutex<Inner>,
}

impl WorkingMemory {
    /// Create a working memory with the given token budget.
    #[must_use]
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            inner: Mutex::new(Inner {
                records: HashMap::new(),
                access_order: Vec::new(),
                insertion_seq: HashMap::new(),
                next_seq: 0,
                current_tokens: 0,
            }),
        }
    }

    /// Configured token budget.
    #[must_use]
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Insert or overwrite a record. Does not evict; callers check
    /// [`Self::has_space`] and call [`Self::evict_to_make_space`] first.
    pub fn add(&self, key: i64, record: AddRecord) {
        let mut inner = self.inner.lock();
        Self::insert(&mut inner, key, record, false);
    }

    /// Insert or overwrite a record propagated from a group peer,
    /// without triggering any re-broadcast by the caller's protocol.
    pub fn add_from_sync(&self, key: i64, record: AddRecord) {
        let mut inner = self.inner.lock();
        Self::insert(&mut inner, key, record, true);
    }

    fn insert(inner: &mut Inner, key: i64, record: AddRecord, from_sync: bool) {
        let now = Utc::now();
        if let Some(existing) = inner.records.remove(&key) {
            inner.current_tokens -= existing.token_count;
        }
        inner.current_tokens += record.token_count;
        inner.records.insert(
            key,
            MemoryRecord {
                content: record.content,
                token_count: record.token_count,
                access_count: record.access_count,
                last_accessed: record.last_accessed.unwrap_or(now),
                added_at: now,
                from_recall: record.from_recall,
                from_sync,
            },
        );
        inner.access_order.retain(|k| *k != key);
        inner.access_order.push(key);
        let seq = inner.next_seq;
        inner.insertion_seq.entry(key).or_insert(seq);
        inner.next_seq += 1;
    }

    /// Remove a record if present; idempotent.
    pub fn remove(&self, key: i64) -> Option<MemoryRecord> {
        let mut inner = self.inner.lock();
        Self::take(&mut inner, key)
    }

    /// Remove a record in response to a peer's eviction; idempotent.
    pub fn remove_from_sync(&self, key: i64) -> Option<MemoryRecord> {
        self.remove(key)
    }

    fn take(inner: &mut Inner, key: i64) -> Option<MemoryRecord> {
        let record = inner.records.remove(&key)?;
        inner.current_tokens -= record.token_count;
        inner.access_order.retain(|k| *k != key);
        inner.insertion_seq.remove(&key);
        Some(record)
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.access_order.clear();
        inner.insertion_seq.clear();
        inner.current_tokens = 0;
    }

    /// Drop every record in response to a group-wide clear.
    pub fn clear_from_sync(&self) {
        self.clear();
    }

    /// Whether `tokens` more tokens fit in the budget.
    #[must_use]
    pub fn has_space(&self, tokens: usize) -> bool {
        let inner = self.inner.lock();
        inner.current_tokens + tokens <= self.max_tokens
    }

    /// Whether a record is resident.
    #[must_use]
    pub fn contains(&self, key: i64) -> bool {
        self.inner.lock().records.contains_key(&key)
    }

    /// Resident node ids.
    #[must_use]
    pub fn keys(&self) -> Vec<i64> {
        self.inner.lock().records.keys().copied().collect()
    }

    /// Clone of a resident record, bumping its access counters.
    #[must_use]
    pub fn touch(&self, key: i64) -> Option<MemoryRecord> {
        let mut inner = self.inner.lock();
        let record = inner.records.get_mut(&key)?;
        record.access_count += 1;
        record.last_accessed = Utc::now();
        let cloned = record.clone();
        inner.access_order.retain(|k| *k != key);
        inner.access_order.push(key);
        Some(cloned)
    }

    /// Evict records in ascending score order until at least
    /// `needed_tokens` have been freed, or nothing is left.
    ///
    /// Returns the evicted records so the caller can persist side
    /// effects. Ties in score break by insertion order (oldest first).
    pub fn evict_to_make_space(&self, needed_tokens: usize) -> Vec<EvictedRecord> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        let mut candidates: Vec<(i64, f64, u64)> = inner
            .records
            .iter()
            .map(|(key, record)| {
                let seq = inner.insertion_seq.get(key).copied().unwrap_or(u64::MAX);
                (*key, eviction_score(record, now), seq)
            })
            .collect();
        candidates.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });

        let mut evicted = Vec::new();
        let mut freed = 0usize;
        for (key, score, _) in candidates {
            if freed >= needed_tokens {
                break;
            }
            if let Some(record) = Self::take(&mut inner, key) {
                freed += record.token_count;
                evicted.push(EvictedRecord { key, record, score });
            }
        }
        evicted
    }

    /// Concatenate record contents separated by `\n\n` up to a token
    /// budget (`max_tokens` defaults to the working-memory budget).
    ///
    /// Items are included whole-or-not: a record that would push the
    /// running total over the budget is skipped and the next candidate
    /// is tried.
    #[must_use]
    pub fn assemble_context(&self, strategy: ContextStrategy, max_tokens: Option<usize>) -> String {
        let budget = max_tokens.unwrap_or(self.max_tokens);
        let inner = self.inner.lock();
        let now = Utc::now();

        let mut ordered: Vec<(&i64, &MemoryRecord)> = inner.records.iter().collect();
        match strategy {
            ContextStrategy::Recent => {
                // access_order is oldest-first; reverse for most recent first
                let position: HashMap<i64, usize> = inner
                    .access_order
                    .iter()
                    .enumerate()
                    .map(|(i, k)| (*k, i))
                    .collect();
                ordered.sort_by(|a, b| {
                    let pa = position.get(a.0).copied().unwrap_or(0);
                    let pb = position.get(b.0).copied().unwrap_or(0);
                    pb.cmp(&pa)
                });
            }
            ContextStrategy::Frequent => {
                ordered.sort_by(|a, b| b.1.access_count.cmp(&a.1.access_count));
            }
            ContextStrategy::Balanced => {
                ordered.sort_by(|a, b| {
                    let sa = balanced_score(a.1, now);
                    let sb = balanced_score(b.1, now);
                    sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
        }

        let mut pieces = Vec::new();
        let mut used = 0usize;
        for (_, record) in ordered {
            if used + record.token_count > budget {
                continue;
            }
            used += record.token_count;
            pieces.push(record.content.as_str());
        }
        pieces.join("\n\n")
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> WorkingMemoryStats {
        let inner = self.inner.lock();
        WorkingMemoryStats {
            count: inner.records.len(),
            current_tokens: inner.current_tokens,
            max_tokens: self.max_tokens,
        }
    }
}

/// Arguments to an add operation.
#[derive(Debug, Clone, Default)]
pub struct AddRecord {
    /// Node content
    pub content: String,
    /// Token count of the content
    pub token_count: usize,
    /// Access count carried over from storage
    pub access_count: u64,
    /// Last access time carried over from storage (defaults to now)
    pub last_accessed: Option<DateTime<Utc>>,
    /// Whether the record arrived via a recall operation
    pub from_recall: bool,
}

impl AddRecord {
    /// Record with just content and a token count.
    #[must_use]
    pub fn new(content: impl Into<String>, token_count: usize) -> Self {
        Self {
            content: content.into(),
            token_count,
            ..Default::default()
        }
    }
}

fn age_hours(record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
    let seconds = now
        .signed_duration_since(record.added_at)
        .num_milliseconds() as f64
        / 1000.0;
    (seconds / 3600.0).max(0.0)
}

/// Victim score: lower is more evictable.
fn eviction_score(record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
    let frequency = (1.0 + record.access_count as f64).ln();
    let recency = 1.0 / (1.0 + age_hours(record, now));
    frequency + recency
}

/// Balanced context ranking: higher is better.
fn balanced_score(record: &MemoryRecord, now: DateTime<Utc>) -> f64 {
    let frequency = (1.0 + record.access_count as f64).ln();
    let recency = 1.0 / (1.0 + age_hours(record, now));
    frequency * recency
}
