pub mod acceptor;
pub mod driver;
pub mod learner;
pub mod proposer;
pub mod types;

use crate::error::PaxosError;
use types::{AcceptRequest, AcceptResponse, PrepareRequest, PrepareResponse, ProposalId};

pub trait AcceptorTrait<V> {
    /// Phase 1: promise not to accept anything numbered below the request.
    fn handle_prepare(&mut self, req: &PrepareRequest) -> PrepareResponse<V>;
    /// Phase 2: accept the value unless a higher promise has been made.
    fn handle_accept(&mut self, req: &AcceptRequest<V>) -> AcceptResponse;
    /// Highest proposal promised so far.
    fn promised(&self) -> Option<&ProposalId>;
    /// Highest accepted proposal and its value, if any.
    fn accepted(&self) -> Option<&(ProposalId, V)>;
}

/// Sink for decisions. Shared between tasks, so it takes `&self`.
pub trait LearnerTrait<V>: Send + Sync {
    /// Records a decided value. Repeated or older decisions are ignored.
    fn learn(&self, id: ProposalId, value: V);
    /// Returns the learned value, or `NotYetDecided`.
    fn learned_value(&self) -> Result<V, PaxosError>;
}
