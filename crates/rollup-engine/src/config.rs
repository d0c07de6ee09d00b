use rollup_core::Hash32;
use serde::{Deserialize, Serialize};

/// Default inactivity window after which evacuation may be activated (14 days).
pub const DEFAULT_EXPIRATION_WINDOW_SECS: u64 = 14 * 24 * 60 * 60;

/// Timestamp from which the expiration window is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationAnchor {
    /// Enqueue time of the oldest unexecuted request.
    #[default]
    OldestRequest,
    /// Timestamp of the last executed block.
    LastExecution,
}

impl ExpirationAnchor {
    pub fn from_env_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "oldest_request" | "request" => Some(Self::OldestRequest),
            "last_execution" | "execution" => Some(Self::LastExecution),
            _ => None,
        }
    }
}

/// Engine parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub expiration_window_secs: u64,
    pub expiration_anchor: ExpirationAnchor,
    /// How far a block timestamp may run ahead of the caller's clock.
    pub max_future_drift_secs: u64,
    /// Minimum deposit (L2 units) accompanying a registration.
    pub min_register_deposit: u128,
    pub genesis_state_root: Hash32,
    pub genesis_timestamp: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiration_window_secs: DEFAULT_EXPIRATION_WINDOW_SECS,
            expiration_anchor: ExpirationAnchor::OldestRequest,
            max_future_drift_secs: 15 * 60,
            min_register_deposit: 1,
            genesis_state_root: Hash32::ZERO,
            genesis_timestamp: 0,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `ROLLUP_*` environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            expiration_window_secs: std::env::var("ROLLUP_EXPIRATION_WINDOW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.expiration_window_secs),
            expiration_anchor: std::env::var("ROLLUP_EXPIRATION_ANCHOR")
                .ok()
                .and_then(|s| ExpirationAnchor::from_env_str(&s))
                .unwrap_or(default.expiration_anchor),
            max_future_drift_secs: std::env::var("ROLLUP_MAX_FUTURE_DRIFT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.max_future_drift_secs),
            min_register_deposit: std::env::var("ROLLUP_MIN_REGISTER_DEPOSIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default.min_register_deposit),
            genesis_state_root: std::env::var("ROLLUP_GENESIS_STATE_ROOT")
                .ok()
                .and_then(|s| Hash32::from_hex(&s).ok())
                .unwrap_or(default.genesis_state_root),
            genesis_timestamp: default.genesis_timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_fourteen_days() {
        let config = EngineConfig::default();
        assert_eq!(config.expiration_window_secs, 1_209_600);
        assert_eq!(config.expiration_anchor, ExpirationAnchor::OldestRequest);
    }

    #[test]
    fn anchor_from_env_str() {
        assert_eq!(
            ExpirationAnchor::from_env_str("LAST_EXECUTION"),
            Some(ExpirationAnchor::LastExecution)
        );
        assert_eq!(
            ExpirationAnchor::from_env_str("oldest_request"),
            Some(ExpirationAnchor::OldestRequest)
        );
        assert_eq!(ExpirationAnchor::from_env_str("never"), None);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"expiration_anchor":"last_execution"}"#).unwrap();
        assert_eq!(config.expiration_anchor, ExpirationAnchor::LastExecution);
        assert_eq!(config.expiration_window_secs, DEFAULT_EXPIRATION_WINDOW_SECS);
    }
}
