use std::{fs, path::Path, time::Duration};

use yaml_rust::{Yaml, YamlLoader};

use crate::error::ConfigError;

/// Timing knobs of a proposer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposerConfig {
    /// How long a round may sit in one phase before it is abandoned.
    pub round_timeout: Duration,
    /// Fresh rounds started after the first one times out.
    pub max_retries: u32,
    /// Pause before a retry.
    pub retry_backoff: Duration,
    /// Upper bound of the random extra pause added to `retry_backoff`, so
    /// competing proposers stop colliding.
    pub retry_jitter: Duration,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        ProposerConfig {
            round_timeout: Duration::from_millis(500),
            max_retries: 5,
            retry_backoff: Duration::from_millis(50),
            retry_jitter: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaxosRole {
    Proposer,
    Acceptor,
    Learner,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: u64,
    pub address: String,
    pub role: PaxosRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub nodes: Vec<Node>,
    pub proposer: ProposerConfig,
    /// Bound on a single request/response exchange over TCP.
    pub request_timeout: Duration,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(&path)?;
        Self::parse(&s)
    }

    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(s)?;
        let doc = docs.first().ok_or(ConfigError::Missing("nodes"))?;

        let raw = doc["nodes"].as_vec().ok_or(ConfigError::Missing("nodes"))?;
        let nodes = raw.iter().map(parse_node).collect::<Result<Vec<_>, _>>()?;

        // run_config is optional; every key in it falls back to the default.
        let r = &doc["run_config"];
        let defaults = ProposerConfig::default();
        let proposer = ProposerConfig {
            round_timeout: millis(r, "round_timeout_ms", defaults.round_timeout)?,
            max_retries: match &r["max_retries"] {
                Yaml::BadValue => defaults.max_retries,
                v => v
                    .as_i64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| invalid("max_retries", "expected a non-negative integer"))?,
            },
            retry_backoff: millis(r, "retry_backoff_ms", defaults.retry_backoff)?,
            retry_jitter: millis(r, "retry_jitter_ms", defaults.retry_jitter)?,
        };
        let request_timeout = millis(r, "request_timeout_ms", Duration::from_millis(200))?;

        Ok(Config {
            nodes,
            proposer,
            request_timeout,
        })
    }

    pub fn node(&self, node_id: u64) -> Result<&Node, ConfigError> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .ok_or(ConfigError::UnknownNode(node_id))
    }

    /// Acceptor nodes in config order.
    pub fn acceptors(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == PaxosRole::Acceptor)
    }
}

fn parse_node(e: &Yaml) -> Result<Node, ConfigError> {
    let node_id = e["node_id"]
        .as_i64()
        .ok_or(ConfigError::Missing("node_id"))?;
    let node_id = u64::try_from(node_id).map_err(|_| invalid("node_id", "must be non-negative"))?;
    let address = e["address"]
        .as_str()
        .ok_or(ConfigError::Missing("address"))?
        .to_string();
    let role = match e["role"].as_str().ok_or(ConfigError::Missing("role"))? {
        "proposer" => PaxosRole::Proposer,
        "acceptor" => PaxosRole::Acceptor,
        "learner" => PaxosRole::Learner,
        other => return Err(invalid("role", format!("unknown role `{}`", other))),
    };
    Ok(Node {
        node_id,
        address,
        role,
    })
}

fn millis(r: &Yaml, field: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match &r[field] {
        Yaml::BadValue => Ok(default),
        v => v
            .as_i64()
            .and_then(|ms| u64::try_from(ms).ok())
            .map(Duration::from_millis)
            .ok_or_else(|| invalid(field, "expected milliseconds")),
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
