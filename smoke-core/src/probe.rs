//! Node liveness probes.
//!
//! A probe turns one [`NodeSpec`] into a [`NodeOutcome`]. The log probe
//! reads the node's log tail; the RPC probe asks the node for its block
//! number over JSON-RPC. Probes never fail: problems become outcomes.

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{LivenessConfig, NodeSpec, ProbeKind};
use crate::liveness::{assess_log_file, LivenessReport, NodeOutcome, NodeReport, QuorumPolicy};

/// Probes a single node.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Inspect `node` and classify it.
    async fn probe(&self, node: &NodeSpec) -> NodeOutcome;
}

/// Searches each node's log tail for the liveness marker.
#[derive(Debug, Clone)]
pub struct LogProbe {
    root: PathBuf,
    tail_lines: usize,
    marker: String,
}

impl LogProbe {
    /// Probe logs under `root` (node log paths are relative to it).
    pub fn new(root: &Path, tail_lines: usize, marker: impl Into<String>) -> Self {
        Self {
            root: root.to_path_buf(),
            tail_lines,
            marker: marker.into(),
        }
    }

    /// The marker searched for.
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

#[async_trait]
impl LivenessProbe for LogProbe {
    async fn probe(&self, node: &NodeSpec) -> NodeOutcome {
        assess_log_file(&self.root.join(&node.log), self.tail_lines, &self.marker).await
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<serde_json::Value>,
}

/// Queries `eth_blockNumber` on each node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct RpcProbe {
    client: reqwest::Client,
    target_height: u64,
}

impl RpcProbe {
    /// Create a probe with a per-request timeout.
    pub fn new(target_height: u64, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            target_height,
        })
    }

    async fn block_number(&self, url: &str) -> Result<u64, String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });

        let response: RpcResponse = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?
            .json()
            .await
            .map_err(|e| e.to_string())?;

        if let Some(err) = response.error {
            return Err(format!("rpc error: {}", err));
        }
        let hex = response
            .result
            .ok_or_else(|| "rpc response has no result".to_string())?;
        parse_quantity(&hex).ok_or_else(|| format!("invalid block number: {}", hex))
    }
}

#[async_trait]
impl LivenessProbe for RpcProbe {
    async fn probe(&self, node: &NodeSpec) -> NodeOutcome {
        let Some(url) = node.rpc_url.as_deref() else {
            return NodeOutcome::Unreadable("no rpc_url configured".into());
        };
        match self.block_number(url).await {
            Ok(height) if height >= self.target_height => NodeOutcome::Reached,
            Ok(height) => NodeOutcome::Behind {
                last_height: Some(height),
            },
            Err(reason) => NodeOutcome::Unreadable(reason),
        }
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(s: &str) -> Option<u64> {
    let digits = s.trim().strip_prefix("0x")?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

/// Build the probe selected by `config` for a workspace rooted at `root`.
pub fn build_probe(config: &LivenessConfig, root: &Path) -> Result<Box<dyn LivenessProbe>, reqwest::Error> {
    Ok(match config.probe {
        ProbeKind::Log => Box::new(LogProbe::new(root, config.tail_lines, config.marker())),
        ProbeKind::Rpc => Box::new(RpcProbe::new(
            config.target_height,
            Duration::from_secs(config.rpc_timeout_secs),
        )?),
    })
}

/// Probe every node concurrently; reports keep node order.
pub async fn probe_all<P: LivenessProbe + ?Sized>(probe: &P, nodes: &[NodeSpec]) -> Vec<NodeReport> {
    let outcomes = join_all(nodes.iter().map(|node| probe.probe(node))).await;
    nodes
        .iter()
        .zip(outcomes)
        .map(|(node, outcome)| NodeReport {
            node: node.name.clone(),
            outcome,
        })
        .collect()
}

/// Probe every node and evaluate the quorum.
pub async fn check<P: LivenessProbe + ?Sized>(
    probe: &P,
    nodes: &[NodeSpec],
    policy: QuorumPolicy,
) -> LivenessReport {
    let report = LivenessReport::evaluate(probe_all(probe, nodes).await, policy);
    for r in &report.reports {
        if r.outcome.is_healthy() {
            tracing::info!(node = %r.node, "{}", r.outcome);
        } else {
            tracing::warn!(node = %r.node, "{}", r.outcome);
        }
    }
    tracing::info!(
        healthy = report.healthy(),
        total = report.total(),
        quorum = %policy,
        passed = report.passed(),
        "liveness check"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn nodes() -> Vec<NodeSpec> {
        (1..=4)
            .map(|i| NodeSpec {
                name: format!("node{}", i),
                log: PathBuf::from(format!("logs{}/axon.log", i)),
                rpc_url: None,
            })
            .collect()
    }

    fn write_log(root: &Path, i: usize, content: &str) {
        let dir = root.join(format!("logs{}", i));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("axon.log"), content).unwrap();
    }

    #[test]
    fn quantity_parsing() {
        assert_eq!(parse_quantity("0xc8"), Some(200));
        assert_eq!(parse_quantity("0x0"), Some(0));
        assert_eq!(parse_quantity("c8"), None);
        assert_eq!(parse_quantity("0x"), None);
        assert_eq!(parse_quantity("0xzz"), None);
    }

    #[tokio::test]
    async fn log_probe_single_healthy_node_passes() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), 2, "... state goto new height 200 ...\n");
        for i in [1, 3, 4] {
            write_log(dir.path(), i, "");
        }

        let probe = LogProbe::new(dir.path(), 100, "state goto new height 200");
        let report = check(&probe, &nodes(), QuorumPolicy::Any).await;

        assert!(report.passed());
        assert_eq!(report.message(), "axon chain works well");
        assert_eq!(report.reports[1].node, "node2");
        assert_eq!(report.reports[1].outcome, NodeOutcome::Reached);
    }

    #[tokio::test]
    async fn log_probe_unrelated_lines_fail() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=4 {
            write_log(dir.path(), i, "INFO network: connected to peer\nINFO mempool: 0 txs\n");
        }

        let probe = LogProbe::new(dir.path(), 100, "state goto new height 200");
        let report = check(&probe, &nodes(), QuorumPolicy::Any).await;

        assert!(!report.passed());
        assert_eq!(
            report.message(),
            "axon chain has some issues, please have a check"
        );
    }

    #[tokio::test]
    async fn log_probe_distinguishes_missing_logs() {
        let dir = tempfile::tempdir().unwrap();
        write_log(dir.path(), 1, "state goto new height 42\n");

        let probe = LogProbe::new(dir.path(), 100, "state goto new height 200");
        let reports = probe_all(&probe, &nodes()).await;

        assert_eq!(
            reports[0].outcome,
            NodeOutcome::Behind {
                last_height: Some(42)
            }
        );
        assert_eq!(reports[1].outcome, NodeOutcome::LogMissing);
    }

    #[tokio::test]
    async fn rpc_probe_without_url() {
        let probe = RpcProbe::new(200, Duration::from_secs(1)).unwrap();
        let outcome = probe.probe(&nodes()[0]).await;
        assert!(matches!(outcome, NodeOutcome::Unreadable(_)));
    }

    #[tokio::test]
    async fn rpc_probe_unreachable_endpoint() {
        let probe = RpcProbe::new(200, Duration::from_secs(1)).unwrap();
        let node = NodeSpec {
            name: "node1".into(),
            log: PathBuf::from("logs1/axon.log"),
            rpc_url: Some("http://127.0.0.1:1".into()),
        };
        assert!(matches!(probe.probe(&node).await, NodeOutcome::Unreadable(_)));
    }

    #[test]
    fn build_probe_selects_kind() {
        let config = LivenessConfig::default();
        assert!(build_probe(&config, Path::new(".")).is_ok());

        let config = LivenessConfig {
            probe: ProbeKind::Rpc,
            ..Default::default()
        };
        assert!(build_probe(&config, Path::new(".")).is_ok());
    }
}
