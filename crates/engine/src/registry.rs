//! In-memory account registry.
//!
//! Holds the live [`UpstreamInstance`]s keyed by channel id and a 30-minute
//! TTL derived view mapping sub-channels back to their main channel, rebuilt
//! lazily after any account mutation. Also owns the monotonic counter behind
//! the Polling selection rule.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use atelier_core::types::{ChannelId, Timestamp};

use crate::instance::UpstreamInstance;

/// TTL of the sub-channel reverse view.
const SUB_CHANNEL_TTL: Duration = Duration::from_secs(30 * 60);

struct SubChannelView {
    built_at: Instant,
    /// sub-channel id -> main channel id
    map: HashMap<ChannelId, ChannelId>,
}

/// Registry of live account instances.
#[derive(Default)]
pub struct AccountRegistry {
    instances: RwLock<HashMap<ChannelId, Arc<UpstreamInstance>>>,
    sub_channels: RwLock<Option<SubChannelView>>,
    polling_counter: AtomicU64,
}

impl AccountRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add or replace an instance; invalidates the sub-channel view.
    pub async fn register(&self, instance: Arc<UpstreamInstance>) {
        self.instances
            .write()
            .await
            .insert(instance.channel_id().to_string(), instance);
        self.invalidate_sub_channels().await;
    }

    /// Remove an instance; invalidates the sub-channel view.
    pub async fn remove(&self, channel_id: &str) -> Option<Arc<UpstreamInstance>> {
        let removed = self.instances.write().await.remove(channel_id);
        self.invalidate_sub_channels().await;
        removed
    }

    pub async fn all(&self) -> Vec<Arc<UpstreamInstance>> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Instances that are connected, enabled and inside their work window.
    pub async fn alive(&self, now: Timestamp) -> Vec<Arc<UpstreamInstance>> {
        let mut alive = Vec::new();
        for instance in self.all().await {
            if instance.is_alive(now).await {
                alive.push(instance);
            }
        }
        alive
    }

    pub async fn by_channel(&self, channel_id: &str) -> Option<Arc<UpstreamInstance>> {
        self.instances.read().await.get(channel_id).cloned()
    }

    /// Resolve through the sub-channel reverse view (rebuilt when stale).
    pub async fn by_sub_channel(&self, sub_channel_id: &str) -> Option<Arc<UpstreamInstance>> {
        if let Some(view) = self.sub_channels.read().await.as_ref() {
            if view.built_at.elapsed() < SUB_CHANNEL_TTL {
                let main = view.map.get(sub_channel_id).cloned();
                return match main {
                    Some(main) => self.by_channel(&main).await,
                    None => None,
                };
            }
        }
        let map = self.rebuild_sub_channels().await;
        let main = map.get(sub_channel_id).cloned()?;
        self.by_channel(&main).await
    }

    /// Force the sub-channel view to rebuild on next use (account mutation).
    pub async fn invalidate_sub_channels(&self) {
        *self.sub_channels.write().await = None;
    }

    /// Next tick of the Polling rule's round-robin counter.
    pub fn next_polling_index(&self) -> u64 {
        self.polling_counter.fetch_add(1, Ordering::Relaxed)
    }

    async fn rebuild_sub_channels(&self) -> HashMap<ChannelId, ChannelId> {
        let mut map = HashMap::new();
        for instance in self.all().await {
            let account = instance.account().await;
            for sub in &account.sub_channel_ids {
                map.insert(sub.clone(), account.channel_id.clone());
            }
            // Private channels route their events (seed DMs) the same way.
            for private in [
                account.mj_private_channel_id.as_ref(),
                account.niji_private_channel_id.as_ref(),
            ]
            .into_iter()
            .flatten()
            {
                map.insert(private.clone(), account.channel_id.clone());
            }
        }
        *self.sub_channels.write().await = Some(SubChannelView {
            built_at: Instant::now(),
            map: map.clone(),
        });
        map
    }
}
