//! Node configuration file.
//!
//! TOML with every section optional. String values of the form `env:VAR`
//! are replaced by the environment variable before decoding.

use std::fs;
use std::sync::Arc;

use rollup_core::{
    Address, CommitmentEchoVerifier, Hash32, KeyedHashVerifier, ProofVerifier, StaticVerifier,
    VerifierKind,
};
use rollup_engine::{EngineConfig, ExpirationAnchor, TokenInfo, DEFAULT_EXPIRATION_WINDOW_SECS};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeSection {
    #[serde(default = "default_node_label")]
    pub label: String,
}

fn default_node_label() -> String {
    "rollup-node".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            label: default_node_label(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_expiration_window")]
    pub expiration_window_secs: u64,
    #[serde(default)]
    pub expiration_anchor: ExpirationAnchor,
    #[serde(default = "default_max_future_drift")]
    pub max_future_drift_secs: u64,
    #[serde(default = "default_min_register_deposit")]
    pub min_register_deposit: u64,
    /// Hex, with or without `0x`.
    #[serde(default)]
    pub genesis_state_root: Option<String>,
    #[serde(default)]
    pub genesis_timestamp: u64,
}

fn default_expiration_window() -> u64 {
    DEFAULT_EXPIRATION_WINDOW_SECS
}

fn default_max_future_drift() -> u64 {
    EngineConfig::default().max_future_drift_secs
}

fn default_min_register_deposit() -> u64 {
    1
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            expiration_window_secs: default_expiration_window(),
            expiration_anchor: ExpirationAnchor::default(),
            max_future_drift_secs: default_max_future_drift(),
            min_register_deposit: default_min_register_deposit(),
            genesis_state_root: None,
            genesis_timestamp: 0,
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> Result<EngineConfig, String> {
        let genesis_state_root = match self.genesis_state_root.as_deref() {
            Some(hex_root) => Hash32::from_hex(hex_root)
                .map_err(|e| format!("invalid engine.genesis_state_root: {e}"))?,
            None => Hash32::ZERO,
        };
        Ok(EngineConfig {
            expiration_window_secs: self.expiration_window_secs,
            expiration_anchor: self.expiration_anchor,
            max_future_drift_secs: self.max_future_drift_secs,
            min_register_deposit: u128::from(self.min_register_deposit),
            genesis_state_root,
            genesis_timestamp: self.genesis_timestamp,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./data/rollup".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_watcher_enabled")]
    pub enabled: bool,
    #[serde(default = "default_watcher_interval")]
    pub interval_secs: u64,
}

fn default_watcher_enabled() -> bool {
    true
}

fn default_watcher_interval() -> u64 {
    60
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: default_watcher_enabled(),
            interval_secs: default_watcher_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifierConfig {
    #[serde(default)]
    pub blocks: VerifierKind,
    #[serde(default)]
    pub evacuation: VerifierKind,
    /// 32-byte hex key for `keyed_hash`.
    #[serde(default)]
    pub key: Option<String>,
}

impl VerifierConfig {
    pub fn block_verifier(&self) -> Result<Arc<dyn ProofVerifier>, String> {
        self.build(self.blocks)
    }

    pub fn evacuation_verifier(&self) -> Result<Arc<dyn ProofVerifier>, String> {
        self.build(self.evacuation)
    }

    fn build(&self, kind: VerifierKind) -> Result<Arc<dyn ProofVerifier>, String> {
        Ok(match kind {
            VerifierKind::AcceptAll => Arc::new(StaticVerifier::accept_all()),
            VerifierKind::RejectAll => Arc::new(StaticVerifier::reject_all()),
            VerifierKind::CommitmentEcho => Arc::new(CommitmentEchoVerifier),
            VerifierKind::KeyedHash => {
                let key = self
                    .key
                    .as_deref()
                    .ok_or("verifier.key is required for keyed_hash")?;
                let key = Hash32::from_hex(key).map_err(|e| format!("invalid verifier.key: {e}"))?;
                Arc::new(KeyedHashVerifier::new(key.0))
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub token_id: u16,
    pub l1_address: String,
    pub decimals: u8,
}

impl TokenConfig {
    pub fn to_token_info(&self) -> Result<TokenInfo, String> {
        let l1_address = Address::from_hex(&self.l1_address)
            .map_err(|e| format!("invalid l1_address for token {}: {e}", self.token_id))?;
        Ok(TokenInfo {
            token_id: self.token_id,
            l1_address,
            decimals: self.decimals,
        })
    }
}

impl NodeConfig {
    pub fn token_infos(&self) -> Result<Vec<TokenInfo>, String> {
        self.tokens.iter().map(TokenConfig::to_token_info).collect()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.node.label.trim().is_empty() {
            return Err("node.label is empty".to_string());
        }
        if self.engine.expiration_window_secs == 0 {
            return Err("engine.expiration_window_secs must be >= 1".to_string());
        }
        if self.watcher.enabled && self.watcher.interval_secs == 0 {
            return Err("watcher.interval_secs must be >= 1".to_string());
        }
        if !matches!(self.logging.format.as_str(), "compact" | "json") {
            return Err(format!(
                "logging.format must be compact or json, got {}",
                self.logging.format
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for token in &self.tokens {
            if !seen.insert(token.token_id) {
                return Err(format!("duplicate token_id {}", token.token_id));
            }
        }
        self.engine.to_engine_config()?;
        self.token_infos()?;
        self.verifier.block_verifier()?;
        self.verifier.evacuation_verifier()?;
        Ok(())
    }
}

fn resolve_env_refs(mut v: toml::Value) -> Result<toml::Value, String> {
    fn walk(v: &mut toml::Value) -> Result<(), String> {
        match v {
            toml::Value::String(s) => {
                if let Some(var) = s.strip_prefix("env:") {
                    let var = var.trim();
                    if var.is_empty() {
                        return Err("invalid env: reference (empty var name)".to_string());
                    }
                    let val = std::env::var(var)
                        .map_err(|_| format!("missing required environment variable: {var}"))?;
                    *s = val;
                }
            }
            toml::Value::Array(arr) => {
                for x in arr {
                    walk(x)?;
                }
            }
            toml::Value::Table(map) => {
                for (_, x) in map.iter_mut() {
                    walk(x)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    walk(&mut v)?;
    Ok(v)
}

pub fn parse_config(raw: &str) -> Result<NodeConfig, String> {
    let parsed: toml::Value = toml::from_str(raw).map_err(|e| format!("failed to parse config: {e}"))?;
    let resolved = resolve_env_refs(parsed)?;
    resolved
        .try_into::<NodeConfig>()
        .map_err(|e| format!("failed to decode config: {e}"))
}

pub fn load_config(path: &str) -> Result<NodeConfig, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read config {path}: {e}"))?;
    parse_config(&raw).map_err(|e| format!("{path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[node]
label = "devnet"

[engine]
expiration_window_secs = 3600
expiration_anchor = "last_execution"
genesis_state_root = "0x1111111111111111111111111111111111111111111111111111111111111111"

[watcher]
interval_secs = 5

[verifier]
blocks = "keyed_hash"
evacuation = "commitment_echo"
key = "0202020202020202020202020202020202020202020202020202020202020202"

[[tokens]]
token_id = 1
l1_address = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"
decimals = 18
"#;

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse_config("").expect("parse");
        assert_eq!(config.node.label, "rollup-node");
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.engine.expiration_window_secs, DEFAULT_EXPIRATION_WINDOW_SECS);
        assert!(config.tokens.is_empty());
        config.validate().expect("valid");
    }

    #[test]
    fn sample_config_decodes() {
        let config = parse_config(SAMPLE).expect("parse");
        config.validate().expect("valid");
        let engine = config.engine.to_engine_config().expect("engine");
        assert_eq!(engine.expiration_window_secs, 3600);
        assert_eq!(engine.expiration_anchor, ExpirationAnchor::LastExecution);
        assert_eq!(engine.genesis_state_root, Hash32([0x11; 32]));
        let tokens = config.token_infos().expect("tokens");
        assert_eq!(tokens[0].decimals, 18);
        assert_eq!(config.verifier.block_verifier().expect("verifier").name(), "keyed_hash");
    }

    #[test]
    fn env_references_are_resolved() {
        std::env::set_var("ROLLUP_NODE_TEST_DB_PATH", "/tmp/rollup-test-db");
        let config = parse_config(
            r#"
[storage]
path = "env:ROLLUP_NODE_TEST_DB_PATH"
"#,
        )
        .expect("parse");
        assert_eq!(config.storage.path, "/tmp/rollup-test-db");

        let err = parse_config(
            r#"
[storage]
path = "env:ROLLUP_NODE_TEST_UNSET_VAR"
"#,
        )
        .unwrap_err();
        assert!(err.contains("ROLLUP_NODE_TEST_UNSET_VAR"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let missing_key = parse_config("[verifier]\nblocks = \"keyed_hash\"\n").expect("parse");
        assert!(missing_key.validate().unwrap_err().contains("verifier.key"));

        let duplicate = parse_config(
            r#"
[[tokens]]
token_id = 1
l1_address = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"
decimals = 18

[[tokens]]
token_id = 1
l1_address = "0xcccccccccccccccccccccccccccccccccccccccc"
decimals = 6
"#,
        )
        .expect("parse");
        assert!(duplicate.validate().unwrap_err().contains("duplicate"));

        let bad_format = parse_config("[logging]\nformat = \"xml\"\n").expect("parse");
        assert!(bad_format.validate().is_err());
    }

    #[test]
    fn shipped_config_is_valid() {
        let config = parse_config(include_str!("../config/node.toml")).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.token_infos().expect("tokens").len(), 2);
    }
}
