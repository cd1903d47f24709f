//! Time-bounded dictionary caches.
//!
//! Domain and banned keyword sets change rarely but are read on every
//! submission. Both views live for 30 minutes (absolute expiration) and are
//! rebuilt lazily on the first read after expiry or an explicit clear.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use atelier_core::banned::KeywordSet;
use atelier_core::CoreError;
use atelier_store::DictionaryRepository;

/// Absolute expiration of both derived views.
const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

struct CachedView {
    built_at: Instant,
    sets: Arc<Vec<KeywordSet>>,
}

/// Cached domain + banned dictionary views over the store.
pub struct DictionaryCache {
    store: Arc<dyn DictionaryRepository>,
    domains: RwLock<Option<CachedView>>,
    banned: RwLock<Option<CachedView>>,
}

impl DictionaryCache {
    pub fn new(store: Arc<dyn DictionaryRepository>) -> Self {
        Self {
            store,
            domains: RwLock::new(None),
            banned: RwLock::new(None),
        }
    }

    /// Current domain keyword sets, rebuilt when stale.
    pub async fn domains(&self) -> Result<Arc<Vec<KeywordSet>>, CoreError> {
        if let Some(sets) = Self::fresh(&self.domains).await {
            return Ok(sets);
        }
        let sets = Arc::new(self.store.list_domains().await?);
        *self.domains.write().await = Some(CachedView {
            built_at: Instant::now(),
            sets: Arc::clone(&sets),
        });
        Ok(sets)
    }

    /// Current banned keyword sets, rebuilt when stale.
    pub async fn banned(&self) -> Result<Arc<Vec<KeywordSet>>, CoreError> {
        if let Some(sets) = Self::fresh(&self.banned).await {
            return Ok(sets);
        }
        let sets = Arc::new(self.store.list_banned().await?);
        *self.banned.write().await = Some(CachedView {
            built_at: Instant::now(),
            sets: Arc::clone(&sets),
        });
        Ok(sets)
    }

    /// Evict the domain view immediately (admin mutation hook).
    pub async fn clear_domains(&self) {
        *self.domains.write().await = None;
    }

    /// Evict the banned view immediately (admin mutation hook).
    pub async fn clear_banned(&self) {
        *self.banned.write().await = None;
    }

    async fn fresh(slot: &RwLock<Option<CachedView>>) -> Option<Arc<Vec<KeywordSet>>> {
        let view = slot.read().await;
        view.as_ref()
            .filter(|v| v.built_at.elapsed() < CACHE_TTL)
            .map(|v| Arc::clone(&v.sets))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
