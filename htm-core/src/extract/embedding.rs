//! Embedding service: breaker-protected, content-cached vector
//! generation.

use super::EmbeddingBackend;
use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default number of cached embeddings
const DEFAULT_CACHE_SIZE: usize = 1024;

/// Embedding cache hit/miss statistics
#[derive(Debug, Clone, Default)]
pub struct EmbeddingStats {
    /// Cache hits
    pub cache_hits: u64,
    /// Cache misses (backend calls attempted)
    pub cache_misses: u64,
}

/// Breaker-protected embedding generation with an LRU content cache.
///
/// The cache is keyed by the SHA-256 of the input text, so repeated
/// embeds of identical content never reach the backend. Dimensions are
/// not enforced here; the store pads and validates on write.
pub struct EmbeddingService {
    backend: Arc<dyn EmbeddingBackend>,
    breaker: Arc<CircuitBreaker>,
    cache: Mutex<LruCache<[u8; 32], Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingService {
    /// Create a service over a backend and its breaker.
    #[must_use]
    pub fn new(backend: Arc<dyn EmbeddingBackend>, breaker: Arc<CircuitBreaker>) -> Self {
        Self::with_cache_size(backend, breaker, DEFAULT_CACHE_SIZE)
    }

    /// Create a service with an explicit cache capacity.
    ///
    /// # Panics
    ///
    /// Panics when `cache_size` is zero.
    #[must_use]
    pub fn with_cache_size(
        backend: Arc<dyn EmbeddingBackend>,
        breaker: Arc<CircuitBreaker>,
        cache_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_size).expect("embedding cache size must be non-zero");
        Self {
            backend,
            breaker,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Generate an embedding for `text`.
    ///
    /// Returns the cached vector when the same content was embedded
    /// before. A breaker rejection surfaces as [`Error::CircuitOpen`]
    /// verbatim; every other backend failure is wrapped in
    /// [`Error::EmbeddingFailed`].
    pub async fn generate(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::Validation(
                "cannot embed empty text".to_string(),
            ));
        }

        let key: [u8; 32] = Sha256::digest(text.as_bytes()).into();
        if let Some(vector) = self.cache.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let backend = Arc::clone(&self.backend);
        let owned = text.to_string();
        let vector = self
            .breaker
            .call(|| async move {
                backend
                    .embed(&owned)
                    .await
                    .map_err(wrap_embedding_error)
            })
            .await?;

        validate_embedding(&vector)?;
        debug!("Generated embedding of dimension {}", vector.len());
        self.cache.lock().put(key, vector.clone());
        Ok(vector)
    }

    /// Cache statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> EmbeddingStats {
        EmbeddingStats {
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Keep `CircuitOpen` untouched, wrap everything else as an embedding
/// failure.
fn wrap_embedding_error(error: Error) -> Error {
    match error {
        Error::CircuitOpen(_) | Error::EmbeddingFailed(_) => error,
        other => Error::EmbeddingFailed(other.to_string()),
    }
}

/// Reject empty vectors and non-finite components.
fn validate_embedding(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(Error::EmbeddingFailed(
            "backend returned an empty vector".to_string(),
        ));
    }
    if !vector.iter().all(|v| v.is_finite()) {
        return Err(Error::EmbeddingFailed(
            "backend returned non-finite components".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use async_trait::async_trait;

    struct CountingBackend {
        calls: AtomicU64,
        response: Vec<f32>,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl EmbeddingBackend for FailingBackend {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Database("socket closed".to_string()))
        }
    }

    fn service(backend: Arc<dyn EmbeddingBackend>) -> EmbeddingService {
        let breaker = Arc::new(CircuitBreaker::new("embedding", BreakerConfig::default()));
        EmbeddingService::new(backend, breaker)
    }

    #[tokio::test]
    async fn caches_by_content() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU64::new(0),
            response: vec![0.1, 0.2],
        });
        let service = service(Arc::clone(&backend) as Arc<dyn EmbeddingBackend>);

        let first = service.generate("same text").await.unwrap();
        let second = service.generate("same text").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let stats = service.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn rejects_empty_text() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicU64::new(0),
            response: vec![1.0],
        });
        let service = service(backend);
        assert!(matches!(
            service.generate("  ").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn wraps_backend_failures() {
        let service = service(Arc::new(FailingBackend));
        let err = service.generate("text").await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingFailed(_)));
    }

    #[tokio::test]
    async fn surfaces_circuit_open_verbatim() {
        let breaker = Arc::new(CircuitBreaker::new(
            "embedding",
            BreakerConfig {
                failure_threshold: 1,
                reset_timeout_secs: 60,
                half_open_max_calls: 1,
            },
        ));
        let service =
            EmbeddingService::new(Arc::new(FailingBackend), breaker);

        let _ = service.generate("first").await;
        let err = service.generate("second").await.unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test]
    async fn rejects_invalid_vectors() {
        struct NanBackend;
        #[async_trait]
        impl EmbeddingBackend for NanBackend {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![0.5, f32::NAN])
            }
        }
        let nan_service = service(Arc::new(NanBackend));
        assert!(matches!(
            nan_service.generate("text").await,
            Err(Error::EmbeddingFailed(_))
        ));

        struct EmptyBackend;
        #[async_trait]
        impl EmbeddingBackend for EmptyBackend {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(Vec::new())
            }
        }
        let service = service(Arc::new(EmptyBackend));
        assert!(matches!(
            service.generate("text").await,
            Err(Error::EmbeddingFailed(_))
        ));
    }
}
