//! In-memory store.
//!
//! Reference implementation backing the engine's tests and small
//! single-process deployments. Every collection lives under its own
//! `RwLock` so task churn does not contend with account reads.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use atelier_core::account::Account;
use atelier_core::banned::KeywordSet;
use atelier_core::task::Task;

use crate::repos::{AccountRepository, DictionaryRepository, TaskQuery, TaskRepository};
use crate::StoreResult;

/// All-in-one in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<String, Task>>,
    accounts: RwLock<HashMap<String, Account>>,
    domains: RwLock<HashMap<String, KeywordSet>>,
    banned: RwLock<HashMap<String, KeywordSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn get(&self, id: &str) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn save(&self, task: &Task) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        if let Some(existing) = tasks.get(&task.id) {
            if existing.is_terminal() {
                return Ok(());
            }
        }
        tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.tasks.write().await.remove(id);
        Ok(())
    }

    async fn list(&self, query: &TaskQuery) -> StoreResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut matched: Vec<Task> = tasks.values().filter(|t| query.matches(t)).cloned().collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        if query.newest_first {
            matched.reverse();
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count(&self, query: &TaskQuery) -> StoreResult<usize> {
        let tasks = self.tasks.read().await;
        Ok(tasks.values().filter(|t| query.matches(t)).count())
    }
}

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn get(&self, channel_id: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.read().await.get(channel_id).cloned())
    }

    async fn save(&self, account: &Account) -> StoreResult<()> {
        self.accounts
            .write()
            .await
            .insert(account.channel_id.clone(), account.clone());
        Ok(())
    }

    async fn delete(&self, channel_id: &str) -> StoreResult<()> {
        self.accounts.write().await.remove(channel_id);
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by(|a, b| a.sort.cmp(&b.sort).then_with(|| a.channel_id.cmp(&b.channel_id)));
        Ok(accounts)
    }
}

#[async_trait]
impl DictionaryRepository for MemoryStore {
    async fn list_domains(&self) -> StoreResult<Vec<KeywordSet>> {
        let mut sets: Vec<KeywordSet> = self.domains.read().await.values().cloned().collect();
        sets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sets)
    }

    async fn save_domain(&self, set: &KeywordSet) -> StoreResult<()> {
        self.domains.write().await.insert(set.id.clone(), set.clone());
        Ok(())
    }

    async fn delete_domain(&self, id: &str) -> StoreResult<()> {
        self.domains.write().await.remove(id);
        Ok(())
    }

    async fn list_banned(&self) -> StoreResult<Vec<KeywordSet>> {
        let mut sets: Vec<KeywordSet> = self.banned.read().await.values().cloned().collect();
        sets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sets)
    }

    async fn save_banned(&self, set: &KeywordSet) -> StoreResult<()> {
        self.banned.write().await.insert(set.id.clone(), set.clone());
        Ok(())
    }

    async fn delete_banned(&self, id: &str) -> StoreResult<()> {
        self.banned.write().await.remove(id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
