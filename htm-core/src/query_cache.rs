//! Query-result cache with TTL, LRU eviction, and method-selective
//! invalidation.
//!
//! Entries are keyed by `(method, normalized args)`. Argument
//! normalization is deterministic and type-tagged so values of
//! different types can never collide on the same key. Writes to nodes
//! invalidate only the search-method entries they affect; entries for
//! other methods survive.

use lru::LruCache;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default TTL for cached query results (5 minutes)
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(300);

/// Default maximum entries per method
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Search method a cached entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedMethod {
    /// Vector similarity search
    Search,
    /// Full-text search
    Fulltext,
    /// Hybrid RRF search
    Hybrid,
}

impl CachedMethod {
    /// All cacheable methods.
    pub const ALL: [CachedMethod; 3] = [Self::Search, Self::Fulltext, Self::Hybrid];

    /// Method name for logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Fulltext => "fulltext",
            Self::Hybrid => "hybrid",
        }
    }
}

/// A normalized cache argument.
///
/// Encoding is type-tagged: `i:3` and `s:3` are distinct keys, as are
/// an array and a map with the same rendering. Map keys are sorted so
/// insertion order never changes the key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheArg {
    /// Absent optional argument
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float (encoded via its bit pattern)
    Float(f64),
    /// String
    Str(String),
    /// Time range as epoch-millisecond endpoints
    TimeRange(i64, i64),
    /// Ordered list
    List(Vec<CacheArg>),
    /// String-keyed map, canonicalized by sorted keys
    Map(BTreeMap<String, CacheArg>),
}

impl CacheArg {
    fn encode_into(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("n;"),
            Self::Bool(v) => {
                out.push_str("b:");
                out.push_str(if *v { "1" } else { "0" });
                out.push(';');
            }
            Self::Int(v) => {
                out.push_str("i:");
                out.push_str(&v.to_string());
                out.push(';');
            }
            Self::Float(v) => {
                out.push_str("f:");
                out.push_str(&v.to_bits().to_string());
                out.push(';');
            }
            Self::Str(v) => {
                out.push_str("s:");
                out.push_str(&v.len().to_string());
                out.push(':');
                out.push_str(v);
                out.push(';');
            }
            Self::TimeRange(start, end) => {
                out.push_str("t:");
                out.push_str(&start.to_string());
                out.push(',');
                out.push_str(&end.to_string());
                out.push(';');
            }
            Self::List(items) => {
                out.push_str("l[");
                for item in items {
                    item.encode_into(out);
                }
                out.push_str("];");
            }
            Self::Map(entries) => {
                out.push_str("m{");
                for (key, value) in entries {
                    out.push_str(&key.len().to_string());
                    out.push(':');
                    out.push_str(key);
                    out.push('=');
                    value.encode_into(out);
                }
                out.push_str("};");
            }
        }
    }

    /// Canonical string encoding of an argument list.
    #[must_use]
    pub fn encode_all(args: &[CacheArg]) -> String {
        let mut out = String::new();
        for arg in args {
            arg.encode_into(&mut out);
        }
        out
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct QueryCacheStats {
    /// Total hits
    pub hits: u64,
    /// Total misses
    pub misses: u64,
    /// Entries dropped by invalidation
    pub invalidations: u64,
    /// Current entry count across methods
    pub size: usize,
}

impl QueryCacheStats {
    /// Hit rate in `[0, 1]`.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CachedEntry<V> {
    value: V,
    cached_at: Instant,
}

struct CacheInner<V> {
    shards: HashMap<CachedMethod, LruCache<u64, CachedEntry<V>>>,
    hits: u64,
    misses: u64,
    invalidations: u64,
}

/// LRU+TTL cache over search results, one shard per method.
pub struct QueryCache<V> {
    inner: Mutex<CacheInner<V>>,
    ttl: Duration,
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> QueryCache<V> {
    /// Cache with default capacity and TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_ENTRIES, DEFAULT_QUERY_TTL)
    }

    /// Cache with explicit per-method capacity and TTL.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    #[must_use]
    pub fn with_capacity_and_ttl(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be non-zero");
        let shards = CachedMethod::ALL
            .iter()
            .map(|method| (*method, LruCache::new(capacity)))
            .collect();
        Self {
            inner: Mutex::new(CacheInner {
                shards,
                hits: 0,
                misses: 0,
                invalidations: 0,
            }),
            ttl,
        }
    }

    fn key_hash(method: CachedMethod, args: &[CacheArg]) -> u64 {
        let mut hasher = DefaultHasher::new();
        method.hash(&mut hasher);
        CacheArg::encode_all(args).hash(&mut hasher);
        hasher.finish()
    }

    /// Look up a cached result, dropping it when expired.
    #[must_use]
    pub fn get(&self, method: CachedMethod, args: &[CacheArg]) -> Option<V> {
        let hash = Self::key_hash(method, args);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(shard) = inner.shards.get_mut(&method) {
            if let Some(entry) = shard.get(&hash) {
                if entry.cached_at.elapsed() < self.ttl {
                    let value = entry.value.clone();
                    inner.hits += 1;
                    trace!("Query cache hit ({})", method.as_str());
                    return Some(value);
                }
                shard.pop(&hash);
            }
        }
        inner.misses += 1;
        trace!("Query cache miss ({})", method.as_str());
        None
    }

    /// Store a result.
    pub fn put(&self, method: CachedMethod, args: &[CacheArg], value: V) {
        let hash = Self::key_hash(method, args);
        let mut inner = self.inner.lock();
        if let Some(shard) = inner.shards.get_mut(&method) {
            shard.put(
                hash,
                CachedEntry {
                    value,
                    cached_at: Instant::now(),
                },
            );
        }
    }

    /// Drop every entry for the given methods, preserving the rest.
    pub fn invalidate_methods(&self, methods: &[CachedMethod]) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut dropped = 0usize;
        for method in methods {
            if let Some(shard) = inner.shards.get_mut(method) {
                dropped += shard.len();
                shard.clear();
            }
        }
        inner.invalidations += dropped as u64;
        if dropped > 0 {
            debug!("Invalidated {} query cache entries", dropped);
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.invalidate_methods(&CachedMethod::ALL);
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> QueryCacheStats {
        let inner = self.inner.lock();
        QueryCacheStats {
            hits: inner.hits,
            misses: inner.misses,
            invalidations: inner.invalidations,
            size: inner.shards.values().map(LruCache::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(query: &str, limit: i64) -> Vec<CacheArg> {
        vec![CacheArg::Str(query.to_string()), CacheArg::Int(limit)]
    }

    #[test]
    fn put_and_get() {
        let cache: QueryCache<Vec<i64>> = QueryCache::new();
        let key = args("rust memory", 10);

        assert!(cache.get(CachedMethod::Search, &key).is_none());
        cache.put(CachedMethod::Search, &key, vec![1, 2, 3]);
        assert_eq!(cache.get(CachedMethod::Search, &key), Some(vec![1, 2, 3]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn methods_do_not_collide() {
        let cache: QueryCache<Vec<i64>> = QueryCache::new();
        let key = args("same query", 10);

        cache.put(CachedMethod::Search, &key, vec![1]);
        cache.put(CachedMethod::Fulltext, &key, vec![2]);

        assert_eq!(cache.get(CachedMethod::Search, &key), Some(vec![1]));
        assert_eq!(cache.get(CachedMethod::Fulltext, &key), Some(vec![2]));
    }

    #[test]
    fn selective_invalidation_preserves_other_methods() {
        let cache: QueryCache<Vec<i64>> = QueryCache::new();
        let key = args("q", 5);

        cache.put(CachedMethod::Search, &key, vec![1]);
        cache.put(CachedMethod::Fulltext, &key, vec![2]);
        cache.put(CachedMethod::Hybrid, &key, vec![3]);

        cache.invalidate_methods(&[CachedMethod::Search, CachedMethod::Hybrid]);

        assert!(cache.get(CachedMethod::Search, &key).is_none());
        assert!(cache.get(CachedMethod::Hybrid, &key).is_none());
        assert_eq!(cache.get(CachedMethod::Fulltext, &key), Some(vec![2]));
    }

    #[test]
    fn ttl_expiry() {
        let cache: QueryCache<Vec<i64>> =
            QueryCache::with_capacity_and_ttl(10, Duration::from_millis(10));
        let key = args("q", 5);

        cache.put(CachedMethod::Search, &key, vec![1]);
        assert!(cache.get(CachedMethod::Search, &key).is_some());

        std::thread::sleep(Duration::from_millis(15));
        assert!(cache.get(CachedMethod::Search, &key).is_none());
    }

    #[test]
    fn lru_eviction_per_shard() {
        let cache: QueryCache<i64> = QueryCache::with_capacity_and_ttl(2, DEFAULT_QUERY_TTL);

        cache.put(CachedMethod::Search, &args("a", 1), 1);
        cache.put(CachedMethod::Search, &args("b", 1), 2);
        cache.put(CachedMethod::Search, &args("c", 1), 3);

        // Oldest entry evicted by the LRU policy
        assert!(cache.get(CachedMethod::Search, &args("a", 1)).is_none());
        assert!(cache.get(CachedMethod::Search, &args("b", 1)).is_some());
        assert!(cache.get(CachedMethod::Search, &args("c", 1)).is_some());
    }

    #[test]
    fn type_tagged_args_never_collide() {
        // "3" as a string vs 3 as an integer
        let a = CacheArg::encode_all(&[CacheArg::Str("3".into())]);
        let b = CacheArg::encode_all(&[CacheArg::Int(3)]);
        assert_ne!(a, b);

        // A list of one string vs that string bare
        let c = CacheArg::encode_all(&[CacheArg::List(vec![CacheArg::Str("x".into())])]);
        let d = CacheArg::encode_all(&[CacheArg::Str("x".into())]);
        assert_ne!(c, d);

        // Map key order does not matter
        let mut m1 = BTreeMap::new();
        m1.insert("alpha".to_string(), CacheArg::Int(1));
        m1.insert("beta".to_string(), CacheArg::Int(2));
        let mut m2 = BTreeMap::new();
        m2.insert("beta".to_string(), CacheArg::Int(2));
        m2.insert("alpha".to_string(), CacheArg::Int(1));
        assert_eq!(
            CacheArg::encode_all(&[CacheArg::Map(m1)]),
            CacheArg::encode_all(&[CacheArg::Map(m2)])
        );
    }

    #[test]
    fn string_lengths_prevent_concatenation_collisions() {
        let a = CacheArg::encode_all(&[CacheArg::Str("ab".into()), CacheArg::Str("c".into())]);
        let b = CacheArg::encode_all(&[CacheArg::Str("a".into()), CacheArg::Str("bc".into())]);
        assert_ne!(a, b);
    }
}
