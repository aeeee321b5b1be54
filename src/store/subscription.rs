//! Subscription store adapter
//!
//! Typed operations over per-user subscription records. Tokens are issued
//! at creation and immutable afterwards. Mutations bump the resync
//! generation so expired or shrunk allotments drop out of the synthesized
//! document on the next cycle.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::watch;
use uuid::Uuid;

use super::{SubscriptionId, SubscriptionRecord, SubscriptionRepository};
use crate::error::{Result, SyncError};
use crate::logger::log;

/// Input for creating a subscription
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub user_id: i64,
    /// Data limit in bytes; 0 means unlimited
    pub data_limit: u64,
    pub expiry_date: DateTime<Utc>,
    pub max_connections: u32,
}

/// Partial update for a subscription; only supplied fields change.
/// The token is deliberately not patchable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscriptionPatch {
    pub data_limit: Option<u64>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub max_connections: Option<u32>,
    pub is_active: Option<bool>,
}

/// True iff the subscription may contribute a client entry to the
/// synthesized document at instant `now`.
pub fn is_valid_at(record: &SubscriptionRecord, now: DateTime<Utc>) -> bool {
    record.is_active
        && record.expiry_date > now
        && (record.data_limit == 0 || record.used_traffic < record.data_limit)
}

/// Typed adapter over persisted subscription records
pub struct SubscriptionStore {
    repo: Arc<dyn SubscriptionRepository>,
    resync: Arc<watch::Sender<u64>>,
}

impl SubscriptionStore {
    pub fn new(repo: Arc<dyn SubscriptionRepository>, resync: Arc<watch::Sender<u64>>) -> Self {
        Self { repo, resync }
    }

    fn signal_resync(&self) {
        self.resync.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Create a subscription, issuing a fresh token.
    pub async fn create(&self, new: NewSubscription) -> Result<SubscriptionRecord> {
        if new.max_connections < 1 {
            return Err(SyncError::Validation(
                "max_connections must be at least 1".to_string(),
            ));
        }

        let now = Utc::now();
        let record = self
            .repo
            .insert(SubscriptionRecord {
                id: 0,
                user_id: new.user_id,
                token: Uuid::new_v4(),
                data_limit: new.data_limit,
                used_traffic: 0,
                expiry_date: new.expiry_date,
                max_connections: new.max_connections,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        log::info!(id = record.id, user_id = record.user_id, token = %record.token, "Subscription created");
        self.signal_resync();
        Ok(record)
    }

    /// Apply a partial patch. Fails with `NotFound` for an unknown id.
    pub async fn update(
        &self,
        id: SubscriptionId,
        patch: SubscriptionPatch,
    ) -> Result<SubscriptionRecord> {
        let mut record = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("subscription {}", id)))?;

        if let Some(data_limit) = patch.data_limit {
            record.data_limit = data_limit;
        }
        if let Some(expiry_date) = patch.expiry_date {
            record.expiry_date = expiry_date;
        }
        if let Some(max_connections) = patch.max_connections {
            if max_connections < 1 {
                return Err(SyncError::Validation(
                    "max_connections must be at least 1".to_string(),
                ));
            }
            record.max_connections = max_connections;
        }
        if let Some(is_active) = patch.is_active {
            record.is_active = is_active;
        }

        record.updated_at = Utc::now();
        let record = self.repo.update(record).await?;

        log::info!(id = record.id, "Subscription updated");
        self.signal_resync();
        Ok(record)
    }

    /// Account consumed traffic against the subscription's limit. A
    /// subscription that crosses its limit drops out of the next document.
    pub async fn record_usage(&self, id: SubscriptionId, bytes: u64) -> Result<SubscriptionRecord> {
        let mut record = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("subscription {}", id)))?;

        let was_valid = is_valid_at(&record, Utc::now());
        record.used_traffic = record.used_traffic.saturating_add(bytes);
        record.updated_at = Utc::now();
        let record = self.repo.update(record).await?;

        // Only wake the reconciler when the usage crossed the limit;
        // plain accounting does not change the document.
        if was_valid && !is_valid_at(&record, Utc::now()) {
            log::info!(id = record.id, "Subscription exhausted its data limit");
            self.signal_resync();
        }
        Ok(record)
    }

    /// Delete a subscription. Returns false when the id does not exist.
    pub async fn delete(&self, id: SubscriptionId) -> Result<bool> {
        let removed = self.repo.remove(id).await?;
        if removed {
            log::info!(id = id, "Subscription deleted");
            self.signal_resync();
        }
        Ok(removed)
    }

    pub async fn get(&self, id: SubscriptionId) -> Result<Option<SubscriptionRecord>> {
        self.repo.fetch(id).await
    }

    /// List subscriptions ordered by id, optionally only active ones
    pub async fn list(
        &self,
        active_only: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SubscriptionRecord>> {
        let records = self.repo.fetch_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| !active_only || r.is_active)
            .skip(offset)
            .take(limit)
            .collect())
    }

    /// True iff the subscription currently gates a client entry
    pub fn is_valid(&self, record: &SubscriptionRecord) -> bool {
        is_valid_at(record, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;

    fn store() -> (SubscriptionStore, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0u64);
        let adapter = SubscriptionStore::new(Arc::new(MemoryStore::new()), Arc::new(tx));
        (adapter, rx)
    }

    fn subscription(days: i64) -> NewSubscription {
        NewSubscription {
            user_id: 1,
            data_limit: 0,
            expiry_date: Utc::now() + Duration::days(days),
            max_connections: 1,
        }
    }

    #[tokio::test]
    async fn test_create_issues_token() {
        let (adapter, _rx) = store();
        let a = adapter.create(subscription(30)).await.unwrap();
        let b = adapter.create(subscription(30)).await.unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(a.used_traffic, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_connections() {
        let (adapter, _rx) = store();
        let mut new = subscription(30);
        new.max_connections = 0;
        let err = adapter.create(new).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_is_valid_active_future() {
        let (adapter, _rx) = store();
        let record = adapter.create(subscription(30)).await.unwrap();
        assert!(adapter.is_valid(&record));
    }

    #[tokio::test]
    async fn test_expired_subscription_is_invalid() {
        let (adapter, _rx) = store();
        let record = adapter.create(subscription(30)).await.unwrap();
        let record = adapter
            .update(
                record.id,
                SubscriptionPatch {
                    expiry_date: Some(Utc::now() - Duration::days(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!adapter.is_valid(&record));
    }

    #[tokio::test]
    async fn test_deactivated_subscription_is_invalid() {
        let (adapter, _rx) = store();
        let record = adapter.create(subscription(30)).await.unwrap();
        let record = adapter
            .update(
                record.id,
                SubscriptionPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!adapter.is_valid(&record));
    }

    #[tokio::test]
    async fn test_data_limit_zero_is_unlimited() {
        let (adapter, _rx) = store();
        let record = adapter.create(subscription(30)).await.unwrap();
        let record = adapter.record_usage(record.id, u64::MAX / 2).await.unwrap();
        assert!(adapter.is_valid(&record));
    }

    #[tokio::test]
    async fn test_exhausted_limit_invalidates_and_signals() {
        let (adapter, rx) = store();
        let mut new = subscription(30);
        new.data_limit = 1024;
        let record = adapter.create(new).await.unwrap();
        let after_create = *rx.borrow();

        // Under the limit: no resync
        let record = adapter.record_usage(record.id, 512).await.unwrap();
        assert!(adapter.is_valid(&record));
        assert_eq!(*rx.borrow(), after_create);

        // Crossing the limit: invalid and resync signaled
        let record = adapter.record_usage(record.id, 512).await.unwrap();
        assert!(!adapter.is_valid(&record));
        assert_eq!(*rx.borrow(), after_create + 1);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let (adapter, _rx) = store();
        let err = adapter
            .update(42, SubscriptionPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_signals_resync() {
        let (adapter, rx) = store();
        let record = adapter.create(subscription(30)).await.unwrap();
        let before = *rx.borrow();
        assert!(adapter.delete(record.id).await.unwrap());
        assert_eq!(*rx.borrow(), before + 1);
    }

    #[tokio::test]
    async fn test_list_active_only_and_pagination() {
        let (adapter, _rx) = store();
        let a = adapter.create(subscription(30)).await.unwrap();
        adapter.create(subscription(30)).await.unwrap();
        adapter.create(subscription(30)).await.unwrap();
        adapter
            .update(
                a.id,
                SubscriptionPatch {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(adapter.list(false, 0, usize::MAX).await.unwrap().len(), 3);
        assert_eq!(adapter.list(true, 0, usize::MAX).await.unwrap().len(), 2);

        let page = adapter.list(false, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, 2);
    }
}
