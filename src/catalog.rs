//! Protocol catalog
//!
//! Static registry of the supported inbound protocols, their default
//! parameter templates and per-protocol validation rules. Pure lookups;
//! adding a protocol means adding a catalog entry, callers are untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Supported inbound protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
    Http,
    Socks,
}

fn as_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl Protocol {
    /// All supported protocols
    pub const ALL: [Protocol; 6] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Shadowsocks,
        Protocol::Http,
        Protocol::Socks,
    ];

    /// Look up a protocol by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "vmess" => Some(Protocol::Vmess),
            "vless" => Some(Protocol::Vless),
            "trojan" => Some(Protocol::Trojan),
            "shadowsocks" => Some(Protocol::Shadowsocks),
            "http" => Some(Protocol::Http),
            "socks" => Some(Protocol::Socks),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Http => "http",
            Protocol::Socks => "socks",
        }
    }

    /// Default parameter template merged under an inbound's explicit settings
    pub fn defaults(&self) -> Map<String, Value> {
        match self {
            Protocol::Vmess => as_map(json!({
                "security": "auto",
                "alterId": 64,
            })),
            Protocol::Vless => as_map(json!({
                "flow": "xtls-rprx-direct",
                "decryption": "none",
            })),
            Protocol::Trojan => as_map(json!({})),
            Protocol::Shadowsocks => as_map(json!({
                "method": "aes-128-gcm",
            })),
            Protocol::Http => as_map(json!({
                "timeout": 300,
                "allowTransparent": false,
            })),
            Protocol::Socks => as_map(json!({
                "auth": "noauth",
                "udp": false,
            })),
        }
    }

    /// Fields an inbound's explicit settings must carry for this protocol
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Protocol::Vmess | Protocol::Vless | Protocol::Trojan => &["clients"],
            Protocol::Shadowsocks => &["method", "password"],
            Protocol::Http | Protocol::Socks => &[],
        }
    }

    /// Whether the protocol carries a per-user client identity list
    pub fn supports_clients(&self) -> bool {
        matches!(self, Protocol::Vmess | Protocol::Vless | Protocol::Trojan)
    }

    /// Key identifying a client entry for this protocol
    pub fn client_id_key(&self) -> &'static str {
        match self {
            Protocol::Trojan => "password",
            _ => "id",
        }
    }

    /// Validate protocol-specific settings, returning the list of missing or
    /// invalid fields on failure.
    pub fn validate_settings(&self, settings: &Map<String, Value>) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();

        for field in self.required_fields() {
            match settings.get(*field) {
                None => problems.push(format!("missing required field '{}'", field)),
                Some(Value::Null) => problems.push(format!("field '{}' must not be null", field)),
                _ => {}
            }
        }

        if self.supports_clients() {
            if let Some(clients) = settings.get("clients") {
                if !clients.is_array() {
                    problems.push("field 'clients' must be an array".to_string());
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_case_insensitive() {
        assert_eq!(Protocol::from_name("VLESS"), Some(Protocol::Vless));
        assert_eq!(Protocol::from_name("vmess"), Some(Protocol::Vmess));
        assert_eq!(Protocol::from_name("wireguard"), None);
    }

    #[test]
    fn test_name_roundtrip() {
        for protocol in Protocol::ALL {
            assert_eq!(Protocol::from_name(protocol.as_str()), Some(protocol));
        }
    }

    #[test]
    fn test_vmess_defaults() {
        let defaults = Protocol::Vmess.defaults();
        assert_eq!(defaults["security"], "auto");
        assert_eq!(defaults["alterId"], 64);
    }

    #[test]
    fn test_vless_defaults() {
        let defaults = Protocol::Vless.defaults();
        assert_eq!(defaults["flow"], "xtls-rprx-direct");
        assert_eq!(defaults["decryption"], "none");
    }

    #[test]
    fn test_client_protocols_require_clients() {
        let empty = Map::new();
        for protocol in [Protocol::Vmess, Protocol::Vless, Protocol::Trojan] {
            let problems = protocol.validate_settings(&empty).unwrap_err();
            assert!(problems.iter().any(|p| p.contains("clients")));
        }
    }

    #[test]
    fn test_clients_must_be_array() {
        let settings = as_map(json!({"clients": "u1"}));
        let problems = Protocol::Vless.validate_settings(&settings).unwrap_err();
        assert!(problems.iter().any(|p| p.contains("must be an array")));
    }

    #[test]
    fn test_valid_vless_settings() {
        let settings = as_map(json!({"clients": [{"id": "u1"}]}));
        assert!(Protocol::Vless.validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_shadowsocks_requires_method_and_password() {
        let settings = as_map(json!({"method": "aes-128-gcm"}));
        let problems = Protocol::Shadowsocks.validate_settings(&settings).unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("password"));
    }

    #[test]
    fn test_http_and_socks_accept_empty_settings() {
        let empty = Map::new();
        assert!(Protocol::Http.validate_settings(&empty).is_ok());
        assert!(Protocol::Socks.validate_settings(&empty).is_ok());
    }

    #[test]
    fn test_client_id_key() {
        assert_eq!(Protocol::Trojan.client_id_key(), "password");
        assert_eq!(Protocol::Vless.client_id_key(), "id");
    }

    #[test]
    fn test_serde_rename() {
        let json = serde_json::to_string(&Protocol::Shadowsocks).unwrap();
        assert_eq!(json, "\"shadowsocks\"");
    }
}
