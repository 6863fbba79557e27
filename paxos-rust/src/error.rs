use thiserror::Error;

use crate::paxos::types::AcceptorId;

/// Errors surfaced by the protocol roles.
///
/// None of these is fatal: every variant leaves the role able to take part
/// in a later round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaxosError {
    #[error("a proposal round is already in progress")]
    AlreadyInProgress,

    #[error("proposer was configured without any acceptors")]
    NoAcceptors,

    #[error("no value has been decided yet")]
    NotYetDecided,

    #[error("no quorum reached after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("round was abandoned")]
    Abandoned,

    #[error("proposal numbers are exhausted")]
    NumbersExhausted,
}

/// Delivery failures reported by a [`Transport`](crate::network::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("message lost in transit")]
    Lost,

    #[error("no route to acceptor {0}")]
    Unknown(AcceptorId),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed before a response arrived")]
    Closed,

    #[error("reply does not match the request")]
    UnexpectedReply,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Yaml(#[from] yaml_rust::ScanError),

    #[error("config is missing `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("node {0} is not listed in the config")]
    UnknownNode(u64),
}
