use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::error::PaxosError;
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptorId, Decision, PrepareRequest, PrepareResponse,
    ProposalId,
};

/// Phase of the in-flight round.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Collecting promises (phase 1).
    Preparing {
        promises: BTreeSet<AcceptorId>,
        /// Highest accepted id adopted from a promise so far.
        highest_adopted: Option<ProposalId>,
    },
    /// Collecting accepts (phase 2).
    Accepting { accepts: BTreeSet<AcceptorId> },
}

/// Round state machine of a single proposer. Performs no I/O.
///
/// Callers feed it acceptor responses in any order; it hands back the next
/// request to broadcast (`AcceptRequest`) or the decision once reached.
#[derive(Debug, Clone)]
pub struct ProposerCore<V> {
    node_id: String,
    acceptors: BTreeSet<AcceptorId>,
    quorum: usize,
    /// Highest proposal number used or observed; the next round goes above it.
    last_number: i64,
    current_id: Option<ProposalId>,
    candidate: Option<V>,
    phase: Phase,
}

impl<V: Clone + std::fmt::Debug> ProposerCore<V> {
    pub fn new(
        node_id: impl Into<String>,
        acceptors: impl IntoIterator<Item = AcceptorId>,
    ) -> Result<Self, PaxosError> {
        let acceptors: BTreeSet<AcceptorId> = acceptors.into_iter().collect();
        if acceptors.is_empty() {
            return Err(PaxosError::NoAcceptors);
        }
        let node_id = node_id.into();
        let quorum = acceptors.len() / 2 + 1;
        info!(
            "Proposer {}: Initialized with {} acceptors (quorum {})",
            node_id,
            acceptors.len(),
            quorum
        );
        Ok(ProposerCore {
            node_id,
            acceptors,
            quorum,
            last_number: 0,
            current_id: None,
            candidate: None,
            phase: Phase::Idle,
        })
    }

    /// Seeds the counter, e.g. from a number persisted by an earlier run.
    pub fn with_last_number(mut self, last_number: i64) -> Self {
        self.last_number = last_number;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn acceptors(&self) -> impl Iterator<Item = AcceptorId> + '_ {
        self.acceptors.iter().copied()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn last_number(&self) -> i64 {
        self.last_number
    }

    pub fn current_id(&self) -> Option<&ProposalId> {
        self.current_id.as_ref()
    }

    /// The value this round will ask acceptors to accept.
    pub fn candidate(&self) -> Option<&V> {
        self.candidate.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub fn is_preparing(&self) -> bool {
        matches!(self.phase, Phase::Preparing { .. })
    }

    pub fn is_accepting(&self) -> bool {
        matches!(self.phase, Phase::Accepting { .. })
    }

    pub fn promise_count(&self) -> usize {
        match &self.phase {
            Phase::Preparing { promises, .. } => promises.len(),
            _ => 0,
        }
    }

    pub fn accept_count(&self) -> usize {
        match &self.phase {
            Phase::Accepting { accepts } => accepts.len(),
            _ => 0,
        }
    }

    /// Starts a new round for `value` and returns the Prepare to broadcast.
    pub fn begin(&mut self, value: V) -> Result<PrepareRequest, PaxosError> {
        if let Some(id) = &self.current_id {
            debug!(
                "Proposer {}: Refusing new proposal while round {} is active",
                self.node_id, id
            );
            return Err(PaxosError::AlreadyInProgress);
        }

        let Some(number) = self.last_number.checked_add(1) else {
            warn!(
                "Proposer {}: No proposal number left above {}",
                self.node_id, self.last_number
            );
            return Err(PaxosError::NumbersExhausted);
        };
        self.last_number = number;
        let id = ProposalId::new(number, self.node_id.clone());
        info!(
            "Proposer {}: Starting round {} with value {:?}",
            self.node_id, id, value
        );
        self.current_id = Some(id.clone());
        self.candidate = Some(value);
        self.phase = Phase::Preparing {
            promises: BTreeSet::new(),
            highest_adopted: None,
        };
        Ok(PrepareRequest { proposal_id: id })
    }

    /// Drops the current round, if any. The counter is kept.
    pub fn abandon(&mut self) -> Option<ProposalId> {
        let id = self.current_id.take()?;
        warn!("Proposer {}: Abandoning round {}", self.node_id, id);
        self.candidate = None;
        self.phase = Phase::Idle;
        Some(id)
    }

    /// Abandons the current round only if it is still `id`.
    pub fn abandon_if(&mut self, id: &ProposalId) -> bool {
        if self.current_id.as_ref() == Some(id) {
            self.abandon();
            true
        } else {
            false
        }
    }

    /// Replaces round `id` with a fresh, higher-numbered round for `value`.
    ///
    /// Returns `None` when `id` is no longer the current round, in which case
    /// nothing changes.
    pub fn restart(&mut self, id: &ProposalId, value: V) -> Option<PrepareRequest> {
        if !self.abandon_if(id) {
            return None;
        }
        self.begin(value).ok()
    }

    /// Handles a phase 1b response. Returns the Accept to broadcast when this
    /// response completes the promise quorum; that happens once per round.
    pub fn on_prepare_response(
        &mut self,
        from: AcceptorId,
        resp: PrepareResponse<V>,
    ) -> Option<AcceptRequest<V>> {
        if !self.is_current(from, &resp.proposal_id) {
            return None;
        }
        let Phase::Preparing {
            promises,
            highest_adopted,
        } = &mut self.phase
        else {
            debug!(
                "Proposer {}: Late promise from acceptor {} for {}",
                self.node_id, from, resp.proposal_id
            );
            return None;
        };

        if !resp.ok {
            debug!(
                "Proposer {}: Acceptor {} rejected prepare {} (promised {:?})",
                self.node_id, from, resp.proposal_id, resp.promised
            );
            if let Some(promised) = &resp.promised {
                self.last_number = self.last_number.max(promised.number());
            }
            return None;
        }

        promises.insert(from);
        if let Some((accepted_id, accepted_value)) = resp.accepted {
            if highest_adopted.as_ref().is_none_or(|h| accepted_id > *h) {
                info!(
                    "Proposer {}: Adopting value {:?} accepted under {}",
                    self.node_id, accepted_value, accepted_id
                );
                *highest_adopted = Some(accepted_id);
                self.candidate = Some(accepted_value);
            }
        }

        if promises.len() < self.quorum {
            return None;
        }

        let id = resp.proposal_id;
        let value = self.candidate.clone()?;
        info!(
            "Proposer {}: Promise quorum ({}/{}) for {}; sending accept",
            self.node_id,
            promises.len(),
            self.acceptors.len(),
            id
        );
        self.phase = Phase::Accepting {
            accepts: BTreeSet::new(),
        };
        Some(AcceptRequest {
            proposal_id: id,
            value,
        })
    }

    /// Handles a phase 2b response. Returns the decision when this response
    /// completes the accept quorum, after which the proposer is idle again.
    pub fn on_accept_response(
        &mut self,
        from: AcceptorId,
        resp: AcceptResponse,
    ) -> Option<Decision<V>> {
        if !self.is_current(from, &resp.proposal_id) {
            return None;
        }
        let Phase::Accepting { accepts } = &mut self.phase else {
            debug!(
                "Proposer {}: Accept response from {} before accept phase of {}",
                self.node_id, from, resp.proposal_id
            );
            return None;
        };

        if !resp.ok {
            debug!(
                "Proposer {}: Acceptor {} rejected accept {} (promised {:?})",
                self.node_id, from, resp.proposal_id, resp.promised
            );
            if let Some(promised) = &resp.promised {
                self.last_number = self.last_number.max(promised.number());
            }
            return None;
        }

        accepts.insert(from);
        if accepts.len() < self.quorum {
            return None;
        }

        let id = self.current_id.take()?;
        let value = self.candidate.take()?;
        self.phase = Phase::Idle;
        info!(
            "Proposer {}: Value {:?} chosen under {}",
            self.node_id, value, id
        );
        Some(Decision { id, value })
    }

    fn is_current(&self, from: AcceptorId, id: &ProposalId) -> bool {
        if !self.acceptors.contains(&from) {
            warn!(
                "Proposer {}: Dropping response from unknown acceptor {}",
                self.node_id, from
            );
            return false;
        }
        if self.current_id.as_ref() != Some(id) {
            debug!(
                "Proposer {}: Discarding stale response for {} (current {:?})",
                self.node_id, id, self.current_id
            );
            return false;
        }
        true
    }
}
