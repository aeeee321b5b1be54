//! Synthesized configuration document
//!
//! Typed model of the JSON document the supervised xray process reads:
//! top-level `log`, `inbounds`, `outbounds` and `routing` sections. The
//! document is derived, never persisted as an entity; serialization is
//! deterministic (fixed struct field order, open maps sort their keys) so
//! identical snapshots always produce byte-identical output.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Top-level `log` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogSection {
    pub loglevel: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            loglevel: "warning".to_string(),
        }
    }
}

/// One entry of the `inbounds` array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundEntry {
    pub tag: String,
    pub port: u16,
    pub protocol: String,
    pub settings: Map<String, Value>,
    #[serde(
        rename = "streamSettings",
        default,
        skip_serializing_if = "Map::is_empty"
    )]
    pub stream_settings: Map<String, Value>,
}

/// One entry of the `outbounds` array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundEntry {
    pub tag: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub settings: Map<String, Value>,
}

/// Top-level `routing` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingSection {
    #[serde(rename = "domainStrategy")]
    pub domain_strategy: String,
    pub rules: Vec<Value>,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            domain_strategy: "AsIs".to_string(),
            rules: Vec::new(),
        }
    }
}

/// The complete configuration handed to the supervised process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XrayDocument {
    pub log: LogSection,
    pub inbounds: Vec<InboundEntry>,
    pub outbounds: Vec<OutboundEntry>,
    pub routing: RoutingSection,
}

impl XrayDocument {
    /// Fixed process-level sections around an empty inbound set: default
    /// log level, a freedom egress plus a blackhole, pass-through routing.
    pub fn skeleton() -> Self {
        Self {
            log: LogSection::default(),
            inbounds: Vec::new(),
            outbounds: vec![
                OutboundEntry {
                    tag: "direct".to_string(),
                    protocol: "freedom".to_string(),
                    settings: Map::new(),
                },
                OutboundEntry {
                    tag: "blocked".to_string(),
                    protocol: "blackhole".to_string(),
                    settings: Map::new(),
                },
            ],
            routing: RoutingSection::default(),
        }
    }

    /// Serialize to the bytes written to disk
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a document read back from disk
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Merge protocol defaults under explicit settings. Explicit values win;
/// nested objects merge recursively.
pub fn deep_merge(defaults: &Map<String, Value>, explicit: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = explicit.clone();
    for (key, default_value) in defaults {
        match merged.get_mut(key) {
            None => {
                merged.insert(key.clone(), default_value.clone());
            }
            Some(Value::Object(explicit_obj)) => {
                if let Value::Object(default_obj) = default_value {
                    *explicit_obj = deep_merge(default_obj, explicit_obj);
                }
            }
            // Explicit non-object value wins outright
            Some(_) => {}
        }
    }
    merged
}
