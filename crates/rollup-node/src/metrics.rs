use prometheus::{Encoder, IntGauge, Opts, Registry, TextEncoder};
use rollup_engine::EvacuMode;

use crate::http::EngineSnapshot;

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::with_opts(Opts::new(name, help))?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Gauges refreshed from an engine snapshot on every scrape.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    uptime_ms: IntGauge,
    blocks_committed: IntGauge,
    blocks_proved: IntGauge,
    blocks_executed: IntGauge,
    requests_total: IntGauge,
    requests_committed: IntGauge,
    requests_executed: IntGauge,
    evacu_mode: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(Self {
            uptime_ms: gauge(&registry, "rollup_uptime_ms", "Uptime of the node in milliseconds")?,
            blocks_committed: gauge(&registry, "rollup_blocks_committed", "Committed block count")?,
            blocks_proved: gauge(&registry, "rollup_blocks_proved", "Proved block count")?,
            blocks_executed: gauge(&registry, "rollup_blocks_executed", "Executed block count")?,
            requests_total: gauge(&registry, "rollup_requests_total", "Queued L1 requests")?,
            requests_committed: gauge(
                &registry,
                "rollup_requests_committed",
                "L1 requests consumed by committed blocks",
            )?,
            requests_executed: gauge(
                &registry,
                "rollup_requests_executed",
                "L1 requests consumed by executed blocks",
            )?,
            evacu_mode: gauge(&registry, "rollup_evacu_mode", "1 while evacuation mode is active")?,
            registry,
        })
    }

    pub fn observe(&self, snapshot: &EngineSnapshot, uptime_ms: u64) {
        self.uptime_ms.set(to_i64(uptime_ms));
        self.blocks_committed.set(to_i64(snapshot.blocks.committed));
        self.blocks_proved.set(to_i64(snapshot.blocks.proved));
        self.blocks_executed.set(to_i64(snapshot.blocks.executed));
        self.requests_total.set(to_i64(snapshot.requests.total));
        self.requests_committed.set(to_i64(snapshot.requests.committed));
        self.requests_executed.set(to_i64(snapshot.requests.executed));
        self.evacu_mode
            .set(i64::from(snapshot.mode == EvacuMode::Evacuating));
    }

    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
