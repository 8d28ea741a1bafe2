//! Settling between cluster start and the liveness check.
//!
//! `Fixed` sleeps for the whole duration. `Poll` probes the nodes every
//! interval and returns as soon as the quorum holds, or once the timeout
//! passes. Running out of time is not an error; the final liveness check
//! decides the run.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::{NodeSpec, SettleConfig, SettleMode};
use crate::liveness::{LivenessReport, QuorumPolicy};
use crate::probe::{probe_all, LivenessProbe};

/// How to wait for the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// Sleep unconditionally.
    Fixed(Duration),
    /// Probe every `interval` until the quorum holds or `timeout` passes.
    Poll {
        /// Delay between rounds.
        interval: Duration,
        /// Upper bound on the total wait.
        timeout: Duration,
    },
}

impl Settle {
    /// Strategy described by `config`.
    pub fn from_config(config: &SettleConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        match config.mode {
            SettleMode::Fixed => Settle::Fixed(timeout),
            SettleMode::Poll => Settle::Poll {
                interval: Duration::from_secs(config.poll_interval_secs),
                timeout,
            },
        }
    }
}

/// What happened while settling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleOutcome {
    /// Time spent waiting.
    pub elapsed: Duration,
    /// Probe rounds run (0 for a fixed wait).
    pub rounds: usize,
    /// True if polling saw the quorum before the timeout.
    pub ready: bool,
}

/// Wait according to `strategy`.
pub async fn settle<P: LivenessProbe + ?Sized>(
    strategy: Settle,
    probe: &P,
    nodes: &[NodeSpec],
    policy: QuorumPolicy,
) -> SettleOutcome {
    let start = Instant::now();

    match strategy {
        Settle::Fixed(duration) => {
            tracing::info!(secs = duration.as_secs(), "settling (fixed wait)");
            tokio::time::sleep(duration).await;
            SettleOutcome {
                elapsed: start.elapsed(),
                rounds: 0,
                ready: false,
            }
        }
        Settle::Poll { interval, timeout } => {
            tracing::info!(
                interval_secs = interval.as_secs(),
                timeout_secs = timeout.as_secs(),
                "settling (polling)"
            );
            let deadline = start + timeout;
            let mut rounds = 0;

            loop {
                rounds += 1;
                let report = LivenessReport::evaluate(probe_all(probe, nodes).await, policy);
                if report.passed() {
                    tracing::info!(
                        rounds,
                        elapsed_secs = start.elapsed().as_secs(),
                        healthy = report.healthy(),
                        "cluster ready"
                    );
                    return SettleOutcome {
                        elapsed: start.elapsed(),
                        rounds,
                        ready: true,
                    };
                }
                tracing::debug!(rounds, healthy = report.healthy(), "cluster not ready yet");

                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                tokio::time::sleep(interval.min(deadline - now)).await;
            }

            tracing::warn!(rounds, timeout_secs = timeout.as_secs(), "settle timeout reached");
            SettleOutcome {
                elapsed: start.elapsed(),
                rounds,
                ready: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::NodeOutcome;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports `Reached` for every node from the `ready_at`-th call on.
    struct CountingProbe {
        calls: AtomicUsize,
        ready_at: usize,
    }

    #[async_trait]
    impl LivenessProbe for CountingProbe {
        async fn probe(&self, _node: &NodeSpec) -> NodeOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_at {
                NodeOutcome::Reached
            } else {
                NodeOutcome::Behind { last_height: None }
            }
        }
    }

    fn one_node() -> Vec<NodeSpec> {
        vec![NodeSpec {
            name: "node1".into(),
            log: PathBuf::from("logs1/axon.log"),
            rpc_url: None,
        }]
    }

    #[test]
    fn strategy_from_config() {
        assert_eq!(
            Settle::from_config(&SettleConfig::default()),
            Settle::Poll {
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(700),
            }
        );

        let fixed = SettleConfig {
            mode: SettleMode::Fixed,
            ..Default::default()
        };
        assert_eq!(Settle::from_config(&fixed), Settle::Fixed(Duration::from_secs(700)));
    }

    #[tokio::test]
    async fn poll_returns_early_when_ready() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            ready_at: 3,
        };
        let strategy = Settle::Poll {
            interval: Duration::from_millis(5),
            timeout: Duration::from_secs(30),
        };

        let outcome = settle(strategy, &probe, &one_node(), QuorumPolicy::Any).await;
        assert!(outcome.ready);
        assert_eq!(outcome.rounds, 3);
        assert!(outcome.elapsed < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn poll_gives_up_after_timeout() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            ready_at: usize::MAX,
        };
        let strategy = Settle::Poll {
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(50),
        };

        let outcome = settle(strategy, &probe, &one_node(), QuorumPolicy::Any).await;
        assert!(!outcome.ready);
        assert!(outcome.rounds >= 2);
        assert!(outcome.elapsed >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn fixed_wait_never_probes() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            ready_at: 1,
        };

        let outcome = settle(
            Settle::Fixed(Duration::from_millis(20)),
            &probe,
            &one_node(),
            QuorumPolicy::Any,
        )
        .await;
        assert!(!outcome.ready);
        assert_eq!(outcome.rounds, 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.elapsed >= Duration::from_millis(20));
    }
}
