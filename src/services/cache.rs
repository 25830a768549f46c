use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::Transaction;

#[derive(Default)]
struct Inner {
    transactions: HashMap<String, Transaction>,
    /// reader id -> intent the coordinator itself dispatched there
    readers: HashMap<String, String>,
}

/// Advisory in-memory view of transactions, keyed by intent id.
///
/// The processor holds the authoritative record; everything here may be lost
/// at any time and is rebuilt on demand.
#[derive(Clone, Default)]
pub struct TransactionCache {
    inner: Arc<RwLock<Inner>>,
}

impl TransactionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, intent_id: &str) -> Option<Transaction> {
        self.inner.read().await.transactions.get(intent_id).cloned()
    }

    pub async fn insert(&self, tx: Transaction) {
        self.inner
            .write()
            .await
            .transactions
            .insert(tx.id.clone(), tx);
    }

    /// Inserts `tx` unless an entry already exists; returns whichever is cached.
    pub async fn insert_if_absent(&self, tx: Transaction) -> Transaction {
        let mut inner = self.inner.write().await;
        inner
            .transactions
            .entry(tx.id.clone())
            .or_insert(tx)
            .clone()
    }

    /// Applies `f` to the cached entry, returning its result and the updated entry.
    pub async fn update<R, F>(&self, intent_id: &str, f: F) -> Option<(R, Transaction)>
    where
        F: FnOnce(&mut Transaction) -> R,
    {
        let mut inner = self.inner.write().await;
        let tx = inner.transactions.get_mut(intent_id)?;
        let result = f(tx);
        Some((result, tx.clone()))
    }

    /// Like `update`, seeding the entry from `seed` when it is missing.
    pub async fn upsert<R, S, F>(&self, intent_id: &str, seed: S, f: F) -> (R, Transaction)
    where
        S: FnOnce() -> Transaction,
        F: FnOnce(&mut Transaction) -> R,
    {
        let mut inner = self.inner.write().await;
        let tx = inner
            .transactions
            .entry(intent_id.to_string())
            .or_insert_with(seed);
        let result = f(tx);
        (result, tx.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.transactions.len()
    }

    /// Drops entries idle since before the cutoffs: settled or never-dispatched ones
    /// after `settled_before`, in-flight ones after `in_flight_before`. Reservations
    /// left without a transaction go with them. Returns how many entries were dropped.
    pub async fn evict_idle(
        &self,
        settled_before: DateTime<Utc>,
        in_flight_before: DateTime<Utc>,
    ) -> usize {
        let mut inner = self.inner.write().await;
        let before = inner.transactions.len();
        inner.transactions.retain(|_, tx| {
            let cutoff = if tx.state.is_in_flight() {
                in_flight_before
            } else {
                settled_before
            };
            tx.updated_at >= cutoff
        });
        let evicted = before - inner.transactions.len();
        if evicted > 0 {
            let Inner {
                transactions,
                readers,
            } = &mut *inner;
            readers.retain(|_, holder| transactions.contains_key(holder));
        }
        evicted
    }

    /// Intent holding `reader_id` with an unresolved action, if any.
    pub async fn outstanding_on_reader(&self, reader_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        outstanding(&inner, reader_id).map(str::to_string)
    }

    /// Claims `reader_id` for `intent_id`. Fails with the holding intent when another
    /// in-flight dispatch started by this process still owns the reader.
    pub async fn reserve_reader(&self, reader_id: &str, intent_id: &str) -> Result<(), String> {
        let mut inner = self.inner.write().await;
        if let Some(holder) = outstanding(&inner, reader_id) {
            if holder != intent_id {
                return Err(holder.to_string());
            }
        }
        inner
            .readers
            .insert(reader_id.to_string(), intent_id.to_string());
        Ok(())
    }

    /// Releases `reader_id`; with `intent_id` given, only if that intent holds it.
    pub async fn release_reader(&self, reader_id: &str, intent_id: Option<&str>) {
        let mut inner = self.inner.write().await;
        let held_by_other = match (inner.readers.get(reader_id), intent_id) {
            (Some(holder), Some(id)) => holder != id,
            _ => false,
        };
        if !held_by_other {
            inner.readers.remove(reader_id);
        }
    }
}

// A reservation whose transaction has left flight no longer blocks the reader.
fn outstanding<'a>(inner: &'a Inner, reader_id: &str) -> Option<&'a str> {
    let holder = inner.readers.get(reader_id)?;
    match inner.transactions.get(holder) {
        Some(tx) if tx.state.is_in_flight() => Some(holder.as_str()),
        _ => None,
    }
}
