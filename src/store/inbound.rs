//! Inbound store adapter
//!
//! Typed create/read/update/delete/list over persisted inbound records.
//! Every mutation validates input against the protocol catalog, then bumps
//! the resync generation so the reconciler converges the live process. The
//! adapter never writes the xray configuration itself; that is the
//! applier's job.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;

use super::{InboundId, InboundRecord, InboundRepository};
use crate::catalog::Protocol;
use crate::error::{Result, SyncError};
use crate::logger::log;

/// Input for creating an inbound
#[derive(Debug, Clone, Deserialize)]
pub struct NewInbound {
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub stream_settings: Map<String, Value>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// Partial update for an inbound; only supplied fields change
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InboundPatch {
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub settings: Option<Map<String, Value>>,
    pub stream_settings: Option<Map<String, Value>>,
    pub tag: Option<String>,
    pub remark: Option<String>,
}

fn lookup_protocol(name: &str) -> Result<Protocol> {
    Protocol::from_name(name).ok_or_else(|| {
        SyncError::Validation(format!(
            "unknown protocol '{}', supported: {}",
            name,
            Protocol::ALL
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        return Err(SyncError::Validation(
            "port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}

fn validate_settings(protocol: Protocol, settings: &Map<String, Value>) -> Result<()> {
    protocol.validate_settings(settings).map_err(|problems| {
        SyncError::Validation(format!(
            "invalid settings for protocol '{}': {}",
            protocol.as_str(),
            problems.join("; ")
        ))
    })
}

/// Typed adapter over persisted inbound records
pub struct InboundStore {
    repo: Arc<dyn InboundRepository>,
    resync: Arc<watch::Sender<u64>>,
}

impl InboundStore {
    pub fn new(repo: Arc<dyn InboundRepository>, resync: Arc<watch::Sender<u64>>) -> Self {
        Self { repo, resync }
    }

    fn signal_resync(&self) {
        self.resync.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Create an inbound. Fails with `Validation` on bad protocol, port or
    /// settings, `Conflict` if the port is already used by an active inbound.
    pub async fn create(&self, new: NewInbound) -> Result<InboundRecord> {
        validate_port(new.port)?;
        let protocol = lookup_protocol(&new.protocol)?;
        validate_settings(protocol, &new.settings)?;

        let now = Utc::now();
        let record = self
            .repo
            .insert(InboundRecord {
                id: 0,
                port: new.port,
                protocol,
                settings: new.settings,
                stream_settings: new.stream_settings,
                tag: new.tag,
                remark: new.remark,
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        log::info!(id = record.id, port = record.port, protocol = protocol.as_str(), "Inbound created");
        self.signal_resync();
        Ok(record)
    }

    /// Apply a partial patch. Fails with `NotFound` for an unknown id; the
    /// patched record is re-validated as a whole before it is stored.
    pub async fn update(&self, id: InboundId, patch: InboundPatch) -> Result<InboundRecord> {
        let mut record = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("inbound {}", id)))?;

        if let Some(port) = patch.port {
            validate_port(port)?;
            record.port = port;
        }
        if let Some(name) = &patch.protocol {
            record.protocol = lookup_protocol(name)?;
        }
        if let Some(settings) = patch.settings {
            record.settings = settings;
        }
        if let Some(stream_settings) = patch.stream_settings {
            record.stream_settings = stream_settings;
        }
        if let Some(tag) = patch.tag {
            record.tag = Some(tag);
        }
        if let Some(remark) = patch.remark {
            record.remark = Some(remark);
        }

        validate_settings(record.protocol, &record.settings)?;
        record.updated_at = Utc::now();

        let record = self.repo.update(record).await?;
        log::info!(id = record.id, port = record.port, "Inbound updated");
        self.signal_resync();
        Ok(record)
    }

    /// Activate or deactivate an inbound. Deactivation drops the listener
    /// from the next synthesized document without deleting the record.
    pub async fn set_active(&self, id: InboundId, active: bool) -> Result<InboundRecord> {
        let mut record = self
            .repo
            .fetch(id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("inbound {}", id)))?;

        record.is_active = active;
        record.updated_at = Utc::now();
        let record = self.repo.update(record).await?;

        log::info!(id = record.id, active = active, "Inbound activation changed");
        self.signal_resync();
        Ok(record)
    }

    /// Delete an inbound. Returns false when the id does not exist.
    pub async fn delete(&self, id: InboundId) -> Result<bool> {
        let removed = self.repo.remove(id).await?;
        if removed {
            log::info!(id = id, "Inbound deleted");
            self.signal_resync();
        }
        Ok(removed)
    }

    pub async fn get(&self, id: InboundId) -> Result<Option<InboundRecord>> {
        self.repo.fetch(id).await
    }

    /// List inbounds ordered by id, optionally only active ones
    pub async fn list(
        &self,
        active_only: bool,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InboundRecord>> {
        let records = self.repo.fetch_all().await?;
        Ok(records
            .into_iter()
            .filter(|r| !active_only || r.is_active)
            .skip(offset)
            .take(limit)
            .collect())
    }
}
