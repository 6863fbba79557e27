pub mod config;
pub mod error;
pub mod network;
pub mod paxos;

pub use config::{Config, ProposerConfig};
pub use error::{ConfigError, PaxosError, TransportError};
pub use network::simulation::{NetworkConditions, SimulatedNetwork};
pub use network::tcp::{serve_acceptor, TcpTransport};
pub use network::{LocalTransport, Transport};
pub use paxos::acceptor::{BasicAcceptor, SharedAcceptor};
pub use paxos::driver::{Proposer, Round};
pub use paxos::learner::BasicLearner;
pub use paxos::proposer::ProposerCore;
pub use paxos::types::{
    AcceptRequest, AcceptResponse, AcceptorId, Decision, PrepareRequest, PrepareResponse,
    ProposalId,
};
pub use paxos::{AcceptorTrait, LearnerTrait};
