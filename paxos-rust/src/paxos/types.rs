use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of an acceptor within the fixed acceptor set of an instance.
pub type AcceptorId = usize;

/// Ordering key for proposals.
///
/// Proposals compare by `number` first and fall back to `node_id`, so two
/// proposers that happen to pick the same number are still totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalId {
    number: i64,
    node_id: String,
}

impl ProposalId {
    pub fn new(number: i64, node_id: impl Into<String>) -> Self {
        ProposalId {
            number,
            node_id: node_id.into(),
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.number, self.node_id)
    }
}

/// Phase 1a.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub proposal_id: ProposalId,
}

/// Phase 1b.
///
/// `accepted` holds the acceptor's highest accepted proposal and its value, or
/// `None` if it has never accepted anything for this instance. On the wire the
/// pair travels as `accepted_id`/`accepted_value`, jointly present or absent.
/// On rejection `promised` reports the promise that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    into = "PrepareResponseWire<V>",
    try_from = "PrepareResponseWire<V>",
    bound(
        serialize = "V: Serialize + Clone",
        deserialize = "V: Deserialize<'de>"
    )
)]
pub struct PrepareResponse<V> {
    pub proposal_id: ProposalId,
    pub accepted: Option<(ProposalId, V)>,
    pub ok: bool,
    pub promised: Option<ProposalId>,
}

#[derive(Serialize, Deserialize)]
struct PrepareResponseWire<V> {
    proposal_id: ProposalId,
    accepted_id: Option<ProposalId>,
    accepted_value: Option<V>,
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    promised: Option<ProposalId>,
}

impl<V> From<PrepareResponse<V>> for PrepareResponseWire<V> {
    fn from(resp: PrepareResponse<V>) -> Self {
        let (accepted_id, accepted_value) = match resp.accepted {
            Some((id, value)) => (Some(id), Some(value)),
            None => (None, None),
        };
        PrepareResponseWire {
            proposal_id: resp.proposal_id,
            accepted_id,
            accepted_value,
            ok: resp.ok,
            promised: resp.promised,
        }
    }
}

impl<V> TryFrom<PrepareResponseWire<V>> for PrepareResponse<V> {
    type Error = &'static str;

    fn try_from(wire: PrepareResponseWire<V>) -> Result<Self, Self::Error> {
        let accepted = match (wire.accepted_id, wire.accepted_value) {
            (Some(id), Some(value)) => Some((id, value)),
            (None, None) => None,
            _ => return Err("accepted_id and accepted_value must be present together"),
        };
        Ok(PrepareResponse {
            proposal_id: wire.proposal_id,
            accepted,
            ok: wire.ok,
            promised: wire.promised,
        })
    }
}

/// Phase 2a.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest<V> {
    pub proposal_id: ProposalId,
    pub value: V,
}

/// Phase 2b.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub proposal_id: ProposalId,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promised: Option<ProposalId>,
}

/// A value chosen by an accept quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision<V> {
    pub id: ProposalId,
    pub value: V,
}
