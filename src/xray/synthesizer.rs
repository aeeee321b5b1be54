//! Configuration synthesizer
//!
//! Combines protocol catalog defaults, transport security settings and the
//! current set of active inbounds into one complete document for the xray
//! process. Pure function of its snapshot arguments (including the `now`
//! instant): identical snapshots produce byte-identical documents, which is
//! what makes reconciliation idempotent.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::document::{deep_merge, InboundEntry, XrayDocument};
use crate::catalog::Protocol;
use crate::error::{Result, SyncError};
use crate::security::TransportSecurity;
use crate::store::subscription::is_valid_at;
use crate::store::{InboundRecord, SubscriptionRecord};

/// Synthesize the full configuration document from an entity snapshot.
///
/// Fails with `Synthesis` when two active inbounds claim the same port
/// (the store adapter should have prevented this; this is the last line
/// of defense) or when an inbound requests TLS against unusable transport
/// security settings.
pub fn synthesize(
    inbounds: &[InboundRecord],
    subscriptions: &[SubscriptionRecord],
    security: &TransportSecurity,
    now: DateTime<Utc>,
) -> Result<XrayDocument> {
    let mut active: Vec<&InboundRecord> = inbounds.iter().filter(|i| i.is_active).collect();
    active.sort_by_key(|i| i.port);

    for pair in active.windows(2) {
        if pair[0].port == pair[1].port {
            return Err(SyncError::Synthesis(format!(
                "two active inbounds claim port {}",
                pair[0].port
            )));
        }
    }

    let mut valid_tokens = BTreeSet::new();
    let mut invalid_tokens = HashSet::new();
    for subscription in subscriptions {
        let token = subscription.token.to_string();
        if is_valid_at(subscription, now) {
            valid_tokens.insert(token);
        } else {
            invalid_tokens.insert(token);
        }
    }

    let mut document = XrayDocument::skeleton();
    for inbound in active {
        let mut settings = deep_merge(&inbound.protocol.defaults(), &inbound.settings);
        if inbound.protocol.supports_clients() {
            embed_clients(&mut settings, inbound.protocol, &valid_tokens, &invalid_tokens);
        }

        document.inbounds.push(InboundEntry {
            tag: inbound
                .tag
                .clone()
                .unwrap_or_else(|| format!("inbound-{}", inbound.port)),
            port: inbound.port,
            protocol: inbound.protocol.as_str().to_string(),
            settings,
            stream_settings: build_stream_settings(inbound, security)?,
        });
    }

    Ok(document)
}

/// Reconcile an inbound's client list with the subscription snapshot:
/// entries matching an invalid subscription token are dropped, valid tokens
/// not yet present are appended in token order, entries with no matching
/// subscription pass through untouched.
fn embed_clients(
    settings: &mut Map<String, Value>,
    protocol: Protocol,
    valid_tokens: &BTreeSet<String>,
    invalid_tokens: &HashSet<String>,
) {
    let id_key = protocol.client_id_key();

    let mut clients: Vec<Value> = match settings.remove("clients") {
        Some(Value::Array(entries)) => entries,
        _ => Vec::new(),
    };

    clients.retain(|client| {
        client
            .get(id_key)
            .and_then(Value::as_str)
            .map(|id| !invalid_tokens.contains(id))
            .unwrap_or(true)
    });

    let present: HashSet<&str> = clients
        .iter()
        .filter_map(|client| client.get(id_key).and_then(Value::as_str))
        .collect();
    let missing: Vec<&String> = valid_tokens
        .iter()
        .filter(|token| !present.contains(token.as_str()))
        .collect();

    for token in missing {
        clients.push(json!({ id_key: token }));
    }

    settings.insert("clients".to_string(), Value::Array(clients));
}

/// Attach the deployment's TLS fragment when the inbound requests it.
/// Explicit per-inbound `tlsSettings` values win over the fragment.
fn build_stream_settings(
    inbound: &InboundRecord,
    security: &TransportSecurity,
) -> Result<Map<String, Value>> {
    let mut stream = inbound.stream_settings.clone();

    let mode = stream
        .get("security")
        .and_then(Value::as_str)
        .unwrap_or("none");
    if mode != "tls" {
        return Ok(stream);
    }

    let fragment = match security.stream_fragment() {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(SyncError::Synthesis(msg)) => {
            return Err(SyncError::Synthesis(format!(
                "inbound on port {}: {}",
                inbound.port, msg
            )));
        }
        Err(other) => return Err(other),
    };

    let explicit = match stream.remove("tlsSettings") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    stream.insert(
        "tlsSettings".to_string(),
        Value::Object(deep_merge(&fragment, &explicit)),
    );

    Ok(stream)
}
