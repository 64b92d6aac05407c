use anyhow::{bail, Context, Result};
use mod_h2_peer::H2PeerHost;
use serde::Serialize;
use std::sync::Arc;
use tempest_net::{driver, FailureDetector};
use tempest_traits::{FloodReport, PeerHost, PeerSummary};
use tracing::info;

use crate::config::Config;

/// Both sides of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub flood: FloodReport,
    pub peer: PeerSummary,
}

pub struct Engine {
    config: Config,
    host: Arc<dyn PeerHost>,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let host = Arc::new(H2PeerHost::new(config.peer_config()));
        Self::with_host(config, host)
    }

    pub fn with_host(config: Config, host: Arc<dyn PeerHost>) -> Self {
        Self { config, host }
    }

    /// Starts the peer, floods it until the connection dies, then tears the peer down.
    pub async fn run(&self) -> Result<ScenarioOutcome> {
        info!("Launching peer via {} host", self.host.name());
        let peer = self.host.launch().await?;

        let detector = FailureDetector::new();
        detector.on_failure(peer.terminator());

        let flood = driver::run(
            peer.endpoint(),
            self.config.connect_options(),
            detector.clone(),
        )
        .await;

        // Join the peer whatever happened to the flood.
        let summary = peer.shutdown().await;
        let flood = flood.context("flood did not complete")?;
        let peer = summary.context("peer did not shut down cleanly")?;

        Ok(ScenarioOutcome { flood, peer })
    }

    /// [`Engine::run`] bounded by the configured global timeout.
    pub async fn run_with_timeout(&self) -> Result<ScenarioOutcome> {
        let limit = self.config.run_timeout();
        match tokio::time::timeout(limit, self.run()).await {
            Ok(outcome) => outcome,
            Err(_) => bail!(
                "peer did not terminate the flood within {:?}: missing flood defense",
                limit
            ),
        }
    }
}
