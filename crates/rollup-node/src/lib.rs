#![forbid(unsafe_code)]
#![deny(clippy::float_arithmetic)]
#![deny(clippy::float_cmp)]
#![deny(clippy::cast_precision_loss)]
#![deny(clippy::cast_possible_truncation)]
#![deny(clippy::cast_possible_wrap)]
#![deny(clippy::cast_sign_loss)]

pub mod config;
pub mod http;
pub mod metrics;
pub mod watcher;

use rollup_engine::{EngineConfig, RollupEngine, TokenRegistry};
use rollup_storage::{Storage, StorageError};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::NodeConfig;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("config error: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("server error: {0}")]
    Server(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resume the persisted engine, or start from genesis on an empty store.
pub fn build_engine(
    config: &NodeConfig,
    engine_config: EngineConfig,
    storage: &Storage,
) -> Result<RollupEngine, NodeError> {
    let tokens = config.token_infos().map_err(NodeError::Config)?;
    let block_verifier = config
        .verifier
        .block_verifier()
        .map_err(NodeError::Config)?;
    let evacuation_verifier = config
        .verifier
        .evacuation_verifier()
        .map_err(NodeError::Config)?;

    match storage.load()? {
        Some(state) => {
            if state.tokens != TokenRegistry::new(tokens) {
                warn!("configured tokens differ from the persisted registry; using persisted");
            }
            let counters = state.blocks.counters();
            info!(
                committed = counters.committed,
                executed = counters.executed,
                evacuating = state.evacuation.is_active(),
                "resuming persisted state"
            );
            Ok(RollupEngine::with_state(
                engine_config,
                state,
                block_verifier,
                evacuation_verifier,
            ))
        }
        None => {
            info!(tokens = tokens.len(), "starting from genesis");
            let engine =
                RollupEngine::new(engine_config, tokens, block_verifier, evacuation_verifier);
            storage.persist(engine.state())?;
            Ok(engine)
        }
    }
}
