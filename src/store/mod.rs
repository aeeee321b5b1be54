//! Persisted entities and the storage seam
//!
//! The relational store is an external collaborator; this module defines
//! the entity records, the repository traits the adapters are built on,
//! and an in-memory backend used by the binary default and by tests.

pub mod inbound;
pub mod memory;
pub mod subscription;

pub use inbound::{InboundPatch, InboundStore, NewInbound};
pub use memory::MemoryStore;
pub use subscription::{NewSubscription, SubscriptionPatch, SubscriptionStore};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::Protocol;
use crate::error::Result;

/// Inbound ID type, consistent with the panel's database layer
pub type InboundId = i64;

/// Subscription ID type
pub type SubscriptionId = i64;

/// One listener on the supervised xray process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundRecord {
    pub id: InboundId,
    /// Listen port, unique among active inbounds
    pub port: u16,
    pub protocol: Protocol,
    /// Protocol-specific settings (client list, method, ...)
    pub settings: Map<String, Value>,
    /// Transport and security settings
    pub stream_settings: Map<String, Value>,
    pub tag: Option<String>,
    pub remark: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One user's time/volume/connection allotment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    /// Owning user
    pub user_id: i64,
    /// Globally unique, immutable once issued. Embedded as a client
    /// identity in inbound client lists.
    pub token: Uuid,
    /// Data limit in bytes; 0 means unlimited
    pub data_limit: u64,
    /// Traffic consumed so far, in bytes
    pub used_traffic: u64,
    pub expiry_date: DateTime<Utc>,
    pub max_connections: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage operations for inbound records.
///
/// Implementations enforce durability and the port uniqueness constraint;
/// synthesis logic never lives here.
#[async_trait]
pub trait InboundRepository: Send + Sync {
    /// Insert a record, assigning its id
    async fn insert(&self, record: InboundRecord) -> Result<InboundRecord>;
    async fn fetch(&self, id: InboundId) -> Result<Option<InboundRecord>>;
    async fn fetch_all(&self) -> Result<Vec<InboundRecord>>;
    async fn update(&self, record: InboundRecord) -> Result<InboundRecord>;
    async fn remove(&self, id: InboundId) -> Result<bool>;
}

/// Storage operations for subscription records.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Insert a record, assigning its id
    async fn insert(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord>;
    async fn fetch(&self, id: SubscriptionId) -> Result<Option<SubscriptionRecord>>;
    async fn fetch_all(&self) -> Result<Vec<SubscriptionRecord>>;
    async fn update(&self, record: SubscriptionRecord) -> Result<SubscriptionRecord>;
    async fn remove(&self, id: SubscriptionId) -> Result<bool>;
}

/// One consistent point-in-time read of everything synthesis consumes.
///
/// Implementations must read both collections under one cut: a single
/// read transaction in a relational backend, simultaneously held read
/// guards in memory. A mutation landing mid-read must never be visible
/// to only half the snapshot.
#[async_trait]
pub trait StateSnapshot: Send + Sync {
    async fn snapshot(&self) -> Result<(Vec<InboundRecord>, Vec<SubscriptionRecord>)>;
}
