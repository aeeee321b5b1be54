//! In-memory storage backend
//!
//! Implements both repository traits over `RwLock<HashMap>` state. Enforces
//! the same uniqueness constraints a relational backend would: one port per
//! active inbound, one token per subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    InboundId, InboundRecord, InboundRepository, StateSnapshot, SubscriptionId,
    SubscriptionRecord, SubscriptionRepository,
};
use crate::error::{Result, SyncError};

/// In-memory implementation of the storage collaborator
pub struct MemoryStore {
    inbounds: RwLock<HashMap<InboundId, InboundRecord>>,
    subscriptions: RwLock<HashMap<SubscriptionId, SubscriptionRecord>>,
    next_inbound_id: AtomicI64,
    next_subscription_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inbounds: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            next_inbound_id: AtomicI64::new(1),
            next_subscription_id: AtomicI64::new(1),
        }
    }
}

fn port_conflict(
    records: &HashMap<InboundId, InboundRecord>,
    candidate: &InboundRecord,
) -> bool {
    candidate.is_active
        && records.values().any(|existing| {
            existing.id != candidate.id && existing.is_active && existing.port == candidate.port
        })
}

#[async_trait]
impl InboundRepository for MemoryStore {
    async fn insert(&self, mut record: InboundRecord) -> Result<InboundRecord> {
        let mut inbounds = self.inbounds.write().await;
        if port_conflict(&inbounds, &record) {
            return Err(SyncError::Conflict(format!(
                "port {} is already used by an active inbound",
                record.port
            )));
        }
        record.id = self.next_inbound_id.fetch_add(1, Ordering::SeqCst);
        inbounds.insert(record.id, record.clone());
        Ok(record)
    }

    async fn fetch(&self, id: InboundId) -> Result<Option<InboundRecord>> {
        Ok(self.inbounds.read().await.get(&id).cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<InboundRecord>> {
        let mut records: Vec<_> = self.inbounds.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn update(&self, record: InboundRecord) -> Result<InboundRecord> {
        let mut inbounds = self.inbounds.write().await;
        if !inbounds.contains_key(&record.id) {
            return Err(SyncError::NotFound(format!("inbound {}", record.id)));
        }
        if port_conflict(&inbounds, &record) {
            return Err(SyncError::Conflict(format!(
                "port {} is already used by an active inbound",
                record.port
            )));
        }
        inbounds.insert(record.id, record.clone());
        Ok(record)
    }

    async fn remove(&self, id: InboundId) -> Result<bool> {
        Ok(self.inbounds.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn insert(&self, mut record: SubscriptionRecord) -> Result<SubscriptionRecord> {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.values().any(|s| s.token == record.token) {
            return Err(SyncError::Conflict(format!(
                "subscription token {} already exists",
                record.token
            )));
        }
        record.id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        subscriptions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn fetch(&self, id: SubscriptionId) -> Result<Option<SubscriptionRecord>> {
        Ok(self.subscriptions.read().await.get(&id).cloned())
    }

    async fn fetch_all(&self) -> Result<Vec<SubscriptionRecord>> {
        let mut records: Vec<_> = self.subscriptions.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    async fn update(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.get(&record.id) {
            None => return Err(SyncError::NotFound(format!("subscription {}", record.id))),
            // Token is immutable once issued
            Some(existing) if existing.token != record.token => {
                return Err(SyncError::Conflict(format!(
                    "subscription {} token cannot change",
                    record.id
                )));
            }
            Some(_) => {}
        }
        subscriptions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn remove(&self, id: SubscriptionId) -> Result<bool> {
        Ok(self.subscriptions.write().await.remove(&id).is_some())
    }
}

#[async_trait]
impl StateSnapshot for MemoryStore {
    async fn snapshot(&self) -> Result<(Vec<InboundRecord>, Vec<SubscriptionRecord>)> {
        // Both read guards held at once: neither collection can change
        // until the other has been read.
        let inbounds = self.inbounds.read().await;
        let subscriptions = self.subscriptions.read().await;

        let mut inbound_records: Vec<_> = inbounds.values().cloned().collect();
        inbound_records.sort_by_key(|r| r.id);
        let mut subscription_records: Vec<_> = subscriptions.values().cloned().collect();
        subscription_records.sort_by_key(|r| r.id);
        Ok((inbound_records, subscription_records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Map;
    use uuid::Uuid;

    use crate::catalog::Protocol;

    fn inbound(port: u16, active: bool) -> InboundRecord {
        let now = Utc::now();
        InboundRecord {
            id: 0,
            port,
            protocol: Protocol::Vless,
            settings: Map::new(),
            stream_settings: Map::new(),
            tag: None,
            remark: None,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    fn subscription(token: Uuid) -> SubscriptionRecord {
        let now = Utc::now();
        SubscriptionRecord {
            id: 0,
            user_id: 1,
            token,
            data_limit: 0,
            used_traffic: 0,
            expiry_date: now + chrono::Duration::days(30),
            max_connections: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let store = MemoryStore::new();
        let a = InboundRepository::insert(&store, inbound(443, true)).await.unwrap();
        let b = InboundRepository::insert(&store, inbound(8443, true)).await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn test_active_port_conflict_rejected() {
        let store = MemoryStore::new();
        InboundRepository::insert(&store, inbound(443, true)).await.unwrap();
        let err = InboundRepository::insert(&store, inbound(443, true))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
        assert_eq!(InboundRepository::fetch_all(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_inbound_frees_port() {
        let store = MemoryStore::new();
        InboundRepository::insert(&store, inbound(443, false)).await.unwrap();
        assert!(InboundRepository::insert(&store, inbound(443, true)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_missing_inbound_is_not_found() {
        let store = MemoryStore::new();
        let mut record = inbound(443, true);
        record.id = 99;
        let err = InboundRepository::update(&store, record).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_inbound() {
        let store = MemoryStore::new();
        let record = InboundRepository::insert(&store, inbound(443, true)).await.unwrap();
        assert!(InboundRepository::remove(&store, record.id).await.unwrap());
        assert!(!InboundRepository::remove(&store, record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected() {
        let store = MemoryStore::new();
        let token = Uuid::new_v4();
        SubscriptionRepository::insert(&store, subscription(token))
            .await
            .unwrap();
        let err = SubscriptionRepository::insert(&store, subscription(token))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_token_is_immutable() {
        let store = MemoryStore::new();
        let record = SubscriptionRepository::insert(&store, subscription(Uuid::new_v4()))
            .await
            .unwrap();
        let mut changed = record.clone();
        changed.token = Uuid::new_v4();
        let err = SubscriptionRepository::update(&store, changed).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_fetch_all_sorted_by_id() {
        let store = MemoryStore::new();
        for port in [9001, 9002, 9003] {
            InboundRepository::insert(&store, inbound(port, true)).await.unwrap();
        }
        let all = InboundRepository::fetch_all(&store).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_snapshot_returns_both_collections_sorted() {
        let store = MemoryStore::new();
        for port in [9002, 9001] {
            InboundRepository::insert(&store, inbound(port, true)).await.unwrap();
        }
        SubscriptionRepository::insert(&store, subscription(Uuid::new_v4()))
            .await
            .unwrap();

        let (inbounds, subscriptions) = store.snapshot().await.unwrap();
        assert_eq!(inbounds.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(subscriptions.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_snapshot_is_one_point_in_time() {
        let store = std::sync::Arc::new(MemoryStore::new());

        // The writer inserts strictly in inbound/subscription pairs, so a
        // consistent cut sees the inbound count lead by at most one. A read
        // that releases the inbound guard before taking the subscription
        // guard can observe the subscription count running ahead instead.
        let writer = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move {
                for port in 20000..20200u16 {
                    InboundRepository::insert(&*store, inbound(port, true))
                        .await
                        .unwrap();
                    SubscriptionRepository::insert(&*store, subscription(Uuid::new_v4()))
                        .await
                        .unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let (inbounds, subscriptions) = store.snapshot().await.unwrap();
            let lead = inbounds.len() as i64 - subscriptions.len() as i64;
            assert!(
                lead == 0 || lead == 1,
                "snapshot saw {} inbounds and {} subscriptions",
                inbounds.len(),
                subscriptions.len()
            );
        }
        writer.await.unwrap();
    }
}
