//! Liveness evaluation of node logs.
//!
//! A node counts as healthy when the last `tail_lines` lines of its log
//! contain the literal marker (`state goto new height 200` by default).
//! The run passes when the number of healthy nodes satisfies the
//! [`QuorumPolicy`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::SeekFrom;
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::{FAIL_MESSAGE, PASS_MESSAGE};

/// Prefix the consensus layer logs when it advances to a new height.
pub const HEIGHT_MARKER_PREFIX: &str = "state goto new height ";

/// Bytes read per step when scanning a log backwards.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Build the liveness marker for a target height.
pub fn height_marker(height: u64) -> String {
    format!("{}{}", HEIGHT_MARKER_PREFIX, height)
}

/// Minimum number of healthy nodes for a run to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "QuorumRepr", into = "QuorumRepr")]
pub enum QuorumPolicy {
    /// At least one node.
    #[default]
    Any,
    /// Every node.
    All,
    /// At least this many nodes.
    AtLeast(usize),
}

impl QuorumPolicy {
    /// Number of healthy nodes required out of `total`.
    ///
    /// `AtLeast(n)` is taken as is, so a count above `total` can never be
    /// met. [`QuorumPolicy::check_nodes`] rejects such a policy up front.
    pub fn required(&self, total: usize) -> usize {
        match self {
            QuorumPolicy::Any => 1,
            QuorumPolicy::All => total.max(1),
            QuorumPolicy::AtLeast(n) => (*n).max(1),
        }
    }

    /// Check that the policy is satisfiable with `total` nodes.
    pub fn check_nodes(&self, total: usize) -> Result<(), String> {
        match self {
            QuorumPolicy::AtLeast(n) if *n > total => Err(format!(
                "quorum of {} nodes exceeds the {} configured nodes",
                n, total
            )),
            _ => Ok(()),
        }
    }

    /// Whether `healthy` out of `total` nodes satisfies this policy.
    pub fn is_met(&self, healthy: usize, total: usize) -> bool {
        total > 0 && healthy >= self.required(total)
    }
}

impl fmt::Display for QuorumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumPolicy::Any => write!(f, "any"),
            QuorumPolicy::All => write!(f, "all"),
            QuorumPolicy::AtLeast(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for QuorumPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "any" => Ok(QuorumPolicy::Any),
            "all" => Ok(QuorumPolicy::All),
            other => match other.parse::<usize>() {
                Ok(0) => Err("quorum must be at least 1".to_string()),
                Ok(n) => Ok(QuorumPolicy::AtLeast(n)),
                Err(_) => Err(format!(
                    "invalid quorum '{}': expected 'any', 'all' or a node count",
                    s
                )),
            },
        }
    }
}

/// TOML form of a quorum: `"any"`, `"all"` or an integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum QuorumRepr {
    Count(usize),
    Named(String),
}

impl TryFrom<QuorumRepr> for QuorumPolicy {
    type Error = String;

    fn try_from(repr: QuorumRepr) -> Result<Self, Self::Error> {
        match repr {
            QuorumRepr::Count(0) => Err("quorum must be at least 1".to_string()),
            QuorumRepr::Count(n) => Ok(QuorumPolicy::AtLeast(n)),
            QuorumRepr::Named(name) => name.parse(),
        }
    }
}

impl From<QuorumPolicy> for QuorumRepr {
    fn from(policy: QuorumPolicy) -> Self {
        match policy {
            QuorumPolicy::AtLeast(n) => QuorumRepr::Count(n),
            named => QuorumRepr::Named(named.to_string()),
        }
    }
}

/// What the harness found for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// The marker (or target height) was observed.
    Reached,
    /// The log exists but shows no marker; carries the highest height seen.
    Behind {
        /// Highest `state goto new height N` in the inspected tail, if any.
        last_height: Option<u64>,
    },
    /// No log file: the node most likely never started.
    LogMissing,
    /// The log (or probe endpoint) could not be read.
    Unreadable(String),
}

impl NodeOutcome {
    /// Returns true if the node counts toward the quorum.
    pub fn is_healthy(&self) -> bool {
        matches!(self, NodeOutcome::Reached)
    }
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Reached => write!(f, "reached target height"),
            NodeOutcome::Behind {
                last_height: Some(h),
            } => write!(f, "behind (last height {})", h),
            NodeOutcome::Behind { last_height: None } => write!(f, "no height progress logged"),
            NodeOutcome::LogMissing => write!(f, "log missing"),
            NodeOutcome::Unreadable(reason) => write!(f, "unreadable: {}", reason),
        }
    }
}

/// Outcome for a single named node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    /// Node name.
    pub node: String,
    /// What was observed.
    pub outcome: NodeOutcome,
}

/// Aggregate liveness verdict.
#[derive(Debug, Clone)]
pub struct LivenessReport {
    /// Per-node outcomes, in node order.
    pub reports: Vec<NodeReport>,
    /// Policy applied.
    pub policy: QuorumPolicy,
}

impl LivenessReport {
    /// Evaluate per-node outcomes against a quorum policy.
    pub fn evaluate(reports: Vec<NodeReport>, policy: QuorumPolicy) -> Self {
        Self { reports, policy }
    }

    /// Number of healthy nodes.
    pub fn healthy(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.is_healthy())
            .count()
    }

    /// Number of nodes inspected.
    pub fn total(&self) -> usize {
        self.reports.len()
    }

    /// Whether the quorum was met.
    pub fn passed(&self) -> bool {
        self.policy.is_met(self.healthy(), self.total())
    }

    /// The verdict line printed at the end of a run.
    pub fn message(&self) -> &'static str {
        if self.passed() {
            PASS_MESSAGE
        } else {
            FAIL_MESSAGE
        }
    }
}

/// The last `n` lines of `content`.
pub fn tail_lines(content: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

/// Whether any of the last `n` lines contains `marker` verbatim.
pub fn tail_contains(content: &str, n: usize, marker: &str) -> bool {
    tail_lines(content, n)
        .iter()
        .any(|line| line.contains(marker))
}

/// Highest height announced by `state goto new height N` lines.
pub fn last_height(lines: &[&str]) -> Option<u64> {
    lines
        .iter()
        .filter_map(|line| {
            let pos = line.find(HEIGHT_MARKER_PREFIX)?;
            let digits: String = line[pos + HEIGHT_MARKER_PREFIX.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<u64>().ok()
        })
        .max()
}

/// Classify a node from its log content.
pub fn assess_log(content: &str, tail: usize, marker: &str) -> NodeOutcome {
    let lines = tail_lines(content, tail);
    if lines.iter().any(|line| line.contains(marker)) {
        NodeOutcome::Reached
    } else {
        NodeOutcome::Behind {
            last_height: last_height(&lines),
        }
    }
}

/// Read the last `n` lines of a file, scanning backwards from its end.
///
/// Only as much of the file is read as the tail needs.
pub async fn read_tail(path: &Path, n: usize) -> std::io::Result<String> {
    read_tail_chunked(path, n, TAIL_CHUNK).await
}

async fn read_tail_chunked(path: &Path, n: usize, chunk: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut pos = file.metadata().await?.len();
    let mut buf: Vec<u8> = Vec::new();
    let mut newlines = 0;

    // One newline more than the tail needs marks the start of its first line.
    while pos > 0 && newlines <= n {
        let step = chunk.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos)).await?;

        let mut block = vec![0u8; step as usize];
        file.read_exact(&mut block).await?;
        newlines += block.iter().filter(|&&b| b == b'\n').count();
        block.extend_from_slice(&buf);
        buf = block;
    }

    if pos > 0 {
        if let Some(first) = buf.iter().position(|&b| b == b'\n') {
            buf.drain(..=first);
        }
    }

    let text = String::from_utf8_lossy(&buf);
    Ok(tail_lines(&text, n).join("\n"))
}

/// Read and classify a node's log file.
pub async fn assess_log_file(path: &Path, tail: usize, marker: &str) -> NodeOutcome {
    match read_tail(path, tail).await {
        Ok(content) => assess_log(&content, tail, marker),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => NodeOutcome::LogMissing,
        Err(e) => NodeOutcome::Unreadable(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARKER: &str = "state goto new height 200";

    fn report(node: &str, outcome: NodeOutcome) -> NodeReport {
        NodeReport {
            node: node.into(),
            outcome,
        }
    }

    fn behind() -> NodeOutcome {
        NodeOutcome::Behind { last_height: None }
    }

    #[test]
    fn marker_for_height() {
        assert_eq!(height_marker(200), MARKER);
    }

    #[test]
    fn tail_keeps_last_lines() {
        let content = "a\nb\nc\nd\n";
        assert_eq!(tail_lines(content, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(content, 10), vec!["a", "b", "c", "d"]);
        assert!(tail_lines("", 100).is_empty());
    }

    #[test]
    fn marker_inside_tail_counts() {
        let content = "boot\n[INFO] overlord: state goto new height 200, round 0\n";
        assert!(tail_contains(content, 100, MARKER));
        assert_eq!(assess_log(content, 100, MARKER), NodeOutcome::Reached);
    }

    #[test]
    fn marker_outside_tail_ignored() {
        let mut content = String::from("state goto new height 200\n");
        for i in 0..100 {
            content.push_str(&format!("unrelated line {}\n", i));
        }
        assert!(!tail_contains(&content, 100, MARKER));
        assert!(tail_contains(&content, 101, MARKER));
    }

    #[test]
    fn behind_reports_highest_height() {
        let content = "\
state goto new height 12
state goto new height 150
state goto new height 149, round 1
";
        assert_eq!(
            assess_log(content, 100, MARKER),
            NodeOutcome::Behind {
                last_height: Some(150)
            }
        );
    }

    #[test]
    fn behind_without_progress() {
        assert_eq!(assess_log("starting node\n", 100, MARKER), behind());
    }

    #[test]
    fn quorum_parse() {
        assert_eq!("any".parse::<QuorumPolicy>().unwrap(), QuorumPolicy::Any);
        assert_eq!("ALL".parse::<QuorumPolicy>().unwrap(), QuorumPolicy::All);
        assert_eq!(
            "3".parse::<QuorumPolicy>().unwrap(),
            QuorumPolicy::AtLeast(3)
        );
        assert!("0".parse::<QuorumPolicy>().is_err());
        assert!("most".parse::<QuorumPolicy>().is_err());
    }

    #[test]
    fn quorum_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            quorum: QuorumPolicy,
        }

        let w: Wrapper = toml::from_str("quorum = \"all\"").unwrap();
        assert_eq!(w.quorum, QuorumPolicy::All);
        let w: Wrapper = toml::from_str("quorum = 3").unwrap();
        assert_eq!(w.quorum, QuorumPolicy::AtLeast(3));
        assert!(toml::from_str::<Wrapper>("quorum = 0").is_err());
    }

    #[test]
    fn quorum_required_counts() {
        assert_eq!(QuorumPolicy::Any.required(4), 1);
        assert_eq!(QuorumPolicy::All.required(4), 4);
        assert_eq!(QuorumPolicy::AtLeast(3).required(4), 3);
        assert_eq!(QuorumPolicy::AtLeast(5).required(4), 5);
        assert!(!QuorumPolicy::Any.is_met(0, 0));
    }

    #[test]
    fn any_passes_with_single_healthy_node() {
        let report = LivenessReport::evaluate(
            vec![
                report("node1", behind()),
                report("node2", NodeOutcome::Reached),
                report("node3", NodeOutcome::LogMissing),
                report("node4", behind()),
            ],
            QuorumPolicy::Any,
        );

        assert!(report.passed());
        assert_eq!(report.healthy(), 1);
        assert_eq!(report.message(), "axon chain works well");
    }

    #[test]
    fn any_fails_with_no_healthy_nodes() {
        let report = LivenessReport::evaluate(
            (1..=4)
                .map(|i| report(&format!("node{}", i), behind()))
                .collect(),
            QuorumPolicy::Any,
        );

        assert!(!report.passed());
        assert_eq!(
            report.message(),
            "axon chain has some issues, please have a check"
        );
    }

    #[test]
    fn all_requires_every_node() {
        let mut reports: Vec<_> = (1..=4)
            .map(|i| report(&format!("node{}", i), NodeOutcome::Reached))
            .collect();
        assert!(LivenessReport::evaluate(reports.clone(), QuorumPolicy::All).passed());

        reports[3].outcome = NodeOutcome::Unreadable("permission denied".into());
        assert!(!LivenessReport::evaluate(reports.clone(), QuorumPolicy::All).passed());
        assert!(LivenessReport::evaluate(reports, QuorumPolicy::AtLeast(3)).passed());
    }

    #[test]
    fn quorum_above_node_count_is_never_met() {
        let reports: Vec<NodeReport> = (1..=4)
            .map(|i| report(&format!("node{}", i), NodeOutcome::Reached))
            .collect();
        assert!(!LivenessReport::evaluate(reports, QuorumPolicy::AtLeast(5)).passed());

        assert!(QuorumPolicy::AtLeast(5).check_nodes(4).is_err());
        assert!(QuorumPolicy::AtLeast(4).check_nodes(4).is_ok());
        assert!(QuorumPolicy::All.check_nodes(4).is_ok());
    }

    #[tokio::test]
    async fn missing_log_file_is_distinguished() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = assess_log_file(&dir.path().join("nope.log"), 100, MARKER).await;
        assert_eq!(outcome, NodeOutcome::LogMissing);
    }

    #[tokio::test]
    async fn log_file_with_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axon.log");
        std::fs::write(&path, "x\n... state goto new height 200 ...\n").unwrap();

        assert_eq!(
            assess_log_file(&path, 100, MARKER).await,
            NodeOutcome::Reached
        );
    }

    #[tokio::test]
    async fn tail_read_backwards_matches_full_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axon.log");
        let content: String = (0..50)
            .map(|i| format!("INFO consensus: state goto new height {}\n", i))
            .collect();
        std::fs::write(&path, &content).unwrap();

        for chunk in [1, 7, 64, 100_000] {
            for n in [1, 3, 10, 50, 80] {
                let tail = read_tail_chunked(&path, n, chunk).await.unwrap();
                assert_eq!(tail, tail_lines(&content, n).join("\n"), "chunk={} n={}", chunk, n);
            }
        }

        std::fs::write(&path, "no trailing newline\nlast").unwrap();
        assert_eq!(read_tail_chunked(&path, 1, 4).await.unwrap(), "last");
        std::fs::write(&path, "").unwrap();
        assert_eq!(read_tail(&path, 100).await.unwrap(), "");
    }

    #[tokio::test]
    async fn large_log_marker_outside_tail_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("axon.log");
        let mut content = String::from("state goto new height 200\n");
        for i in 0..5_000 {
            content.push_str(&format!("INFO network: heartbeat {}\n", i));
        }
        content.push_str("state goto new height 199\n");
        std::fs::write(&path, &content).unwrap();

        assert_eq!(
            assess_log_file(&path, 100, MARKER).await,
            NodeOutcome::Behind {
                last_height: Some(199)
            }
        );
    }
}
