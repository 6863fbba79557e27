use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};

use crate::paxos::types::{
    AcceptRequest, AcceptResponse, PrepareRequest, PrepareResponse, ProposalId,
};
use crate::paxos::AcceptorTrait;

/// A basic implementation of a Paxos acceptor for a single decision instance.
#[derive(Debug, Clone)]
pub struct BasicAcceptor<V> {
    promised_id: Option<ProposalId>,
    accepted: Option<(ProposalId, V)>,
}

impl<V> BasicAcceptor<V> {
    pub fn new() -> Self {
        BasicAcceptor {
            promised_id: None,
            accepted: None,
        }
    }
}

impl<V> Default for BasicAcceptor<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + std::fmt::Debug> AcceptorTrait<V> for BasicAcceptor<V> {
    fn handle_prepare(&mut self, req: &PrepareRequest) -> PrepareResponse<V> {
        let id = &req.proposal_id;
        // Grant a promise if we have not yet promised or if the new proposal id is higher.
        match &self.promised_id {
            Some(promised) if id <= promised => {
                warn!(
                    "Acceptor: Rejected prepare for proposal {} (already promised {})",
                    id, promised
                );
                PrepareResponse {
                    proposal_id: id.clone(),
                    accepted: None,
                    ok: false,
                    promised: Some(promised.clone()),
                }
            }
            _ => {
                self.promised_id = Some(id.clone());
                info!("Acceptor: Promised proposal {}", id);
                PrepareResponse {
                    proposal_id: id.clone(),
                    accepted: self.accepted.clone(),
                    ok: true,
                    promised: None,
                }
            }
        }
    }

    fn handle_accept(&mut self, req: &AcceptRequest<V>) -> AcceptResponse {
        let id = &req.proposal_id;
        // Accept anything not below the current promise.
        if let Some(promised) = &self.promised_id {
            if id < promised {
                warn!(
                    "Acceptor: Rejected accept for proposal {} (promised {})",
                    id, promised
                );
                return AcceptResponse {
                    proposal_id: id.clone(),
                    ok: false,
                    promised: Some(promised.clone()),
                };
            }
        }

        self.promised_id = Some(id.clone());
        self.accepted = Some((id.clone(), req.value.clone()));
        info!(
            "Acceptor: Accepted proposal {} with value {:?}",
            id, req.value
        );
        AcceptResponse {
            proposal_id: id.clone(),
            ok: true,
            promised: None,
        }
    }

    fn promised(&self) -> Option<&ProposalId> {
        self.promised_id.as_ref()
    }

    fn accepted(&self) -> Option<&(ProposalId, V)> {
        self.accepted.as_ref()
    }
}

/// Cloneable handle serializing all access to one acceptor.
///
/// Handlers for the same acceptor never interleave; distinct acceptors do not
/// contend with each other.
#[derive(Debug)]
pub struct SharedAcceptor<V> {
    inner: Arc<Mutex<BasicAcceptor<V>>>,
}

impl<V> Clone for SharedAcceptor<V> {
    fn clone(&self) -> Self {
        SharedAcceptor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Default for SharedAcceptor<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SharedAcceptor<V> {
    pub fn new() -> Self {
        SharedAcceptor {
            inner: Arc::new(Mutex::new(BasicAcceptor::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BasicAcceptor<V>> {
        // A panic inside a handler cannot leave the fields half-written, so the
        // state behind a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<V: Clone + std::fmt::Debug> SharedAcceptor<V> {
    pub fn handle_prepare(&self, req: &PrepareRequest) -> PrepareResponse<V> {
        self.lock().handle_prepare(req)
    }

    pub fn handle_accept(&self, req: &AcceptRequest<V>) -> AcceptResponse {
        self.lock().handle_accept(req)
    }

    pub fn promised(&self) -> Option<ProposalId> {
        self.lock().promised().cloned()
    }

    pub fn accepted(&self) -> Option<(ProposalId, V)> {
        self.lock().accepted().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(number: i64, node: &str) -> PrepareRequest {
        PrepareRequest {
            proposal_id: ProposalId::new(number, node),
        }
    }

    fn accept(number: i64, node: &str, value: &str) -> AcceptRequest<String> {
        AcceptRequest {
            proposal_id: ProposalId::new(number, node),
            value: value.to_string(),
        }
    }

    #[test]
    fn first_prepare_is_promised_without_accepted_value() {
        let mut acceptor = BasicAcceptor::<String>::new();
        let resp = acceptor.handle_prepare(&prepare(1, "P1"));
        assert!(resp.ok);
        assert_eq!(resp.accepted, None);
        assert_eq!(acceptor.promised(), Some(&ProposalId::new(1, "P1")));
    }

    #[test]
    fn rejects_prepare_below_existing_promise() {
        let mut acceptor = BasicAcceptor::<String>::new();
        assert!(acceptor.handle_prepare(&prepare(5, "X")).ok);

        let resp = acceptor.handle_prepare(&prepare(3, "Y"));
        assert!(!resp.ok, "Lower proposal must be rejected");
        assert_eq!(resp.promised, Some(ProposalId::new(5, "X")));
        assert_eq!(acceptor.promised(), Some(&ProposalId::new(5, "X")));
    }

    #[test]
    fn rejects_repeated_prepare_with_same_id() {
        let mut acceptor = BasicAcceptor::<String>::new();
        assert!(acceptor.handle_prepare(&prepare(2, "A")).ok);
        assert!(!acceptor.handle_prepare(&prepare(2, "A")).ok);
    }

    #[test]
    fn node_id_breaks_ties_between_equal_numbers() {
        let mut acceptor = BasicAcceptor::<String>::new();
        assert!(acceptor.handle_prepare(&prepare(4, "A")).ok);
        assert!(acceptor.handle_prepare(&prepare(4, "B")).ok);
        assert!(!acceptor.handle_prepare(&prepare(4, "A")).ok);
    }

    #[test]
    fn accept_at_promise_records_value() {
        let mut acceptor = BasicAcceptor::new();
        acceptor.handle_prepare(&prepare(1, "P1"));
        let resp = acceptor.handle_accept(&accept(1, "P1", "x"));
        assert!(resp.ok);
        assert_eq!(
            acceptor.accepted(),
            Some(&(ProposalId::new(1, "P1"), "x".to_string()))
        );
    }

    #[test]
    fn accept_without_promise_is_allowed_and_raises_promise() {
        let mut acceptor = BasicAcceptor::new();
        assert!(acceptor.handle_accept(&accept(3, "P1", "x")).ok);
        assert_eq!(acceptor.promised(), Some(&ProposalId::new(3, "P1")));
        assert!(!acceptor.handle_prepare(&prepare(2, "P2")).ok);
    }

    #[test]
    fn rejects_accept_below_promise_and_keeps_state() {
        let mut acceptor = BasicAcceptor::new();
        acceptor.handle_prepare(&prepare(1, "P1"));
        acceptor.handle_accept(&accept(1, "P1", "x"));
        acceptor.handle_prepare(&prepare(2, "P2"));

        let resp = acceptor.handle_accept(&accept(1, "P1", "late"));
        assert!(!resp.ok);
        assert_eq!(resp.promised, Some(ProposalId::new(2, "P2")));
        assert_eq!(
            acceptor.accepted(),
            Some(&(ProposalId::new(1, "P1"), "x".to_string()))
        );
    }

    #[test]
    fn promise_reports_previously_accepted_value() {
        let mut acceptor = BasicAcceptor::new();
        acceptor.handle_prepare(&prepare(1, "P1"));
        acceptor.handle_accept(&accept(1, "P1", "x"));

        let resp = acceptor.handle_prepare(&prepare(2, "P2"));
        assert!(resp.ok);
        assert_eq!(resp.accepted, Some((ProposalId::new(1, "P1"), "x".to_string())));
    }

    #[test]
    fn promised_id_never_decreases() {
        let mut acceptor = BasicAcceptor::new();
        let requests = [(3, "A"), (1, "B"), (7, "A"), (7, "A"), (5, "C"), (9, "B")];
        let mut last: Option<ProposalId> = None;
        for (i, (number, node)) in requests.iter().enumerate() {
            if i % 2 == 0 {
                acceptor.handle_prepare(&prepare(*number, node));
            } else {
                acceptor.handle_accept(&accept(*number, node, "v"));
            }
            let now = acceptor.promised().cloned();
            assert!(now >= last, "promise went from {:?} to {:?}", last, now);
            if let (Some(promised), Some((accepted, _))) = (&now, acceptor.accepted()) {
                assert!(accepted <= promised);
            }
            last = now;
        }
    }

    #[test]
    fn shared_handle_sees_same_state() {
        let acceptor = SharedAcceptor::<String>::new();
        let other = acceptor.clone();
        assert!(acceptor.handle_prepare(&prepare(1, "P1")).ok);
        assert!(!other.handle_prepare(&prepare(1, "P1")).ok);
        assert_eq!(other.promised(), Some(ProposalId::new(1, "P1")));
    }
}
