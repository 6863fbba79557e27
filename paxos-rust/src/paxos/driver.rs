use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use crate::config::ProposerConfig;
use crate::error::{PaxosError, TransportError};
use crate::network::Transport;
use crate::paxos::proposer::ProposerCore;
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptorId, Decision, PrepareRequest, PrepareResponse,
    ProposalId,
};
use crate::paxos::LearnerTrait;

/// Responses flowing back from the per-acceptor delivery tasks.
enum Reply<V> {
    Prepare(AcceptorId, Result<PrepareResponse<V>, TransportError>),
    Accept(AcceptorId, Result<AcceptResponse, TransportError>),
}

/// Round state and the stop signal of the running round change together.
struct State<V> {
    core: ProposerCore<V>,
    stop: Option<oneshot::Sender<()>>,
}

struct Shared<V, T> {
    state: Mutex<State<V>>,
    transport: Arc<T>,
    acceptors: Vec<AcceptorId>,
    learners: RwLock<Vec<Arc<dyn LearnerTrait<V>>>>,
    config: ProposerConfig,
}

impl<V, T> Shared<V, T> {
    fn state(&self) -> MutexGuard<'_, State<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn learners(&self) -> Vec<Arc<dyn LearnerTrait<V>>> {
        self.learners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Asynchronous proposer: fans requests out to every acceptor on separate
/// tasks and folds the replies into its [`ProposerCore`].
///
/// Must be used from within a tokio runtime.
pub struct Proposer<V, T> {
    shared: Arc<Shared<V, T>>,
}

impl<V, T> Clone for Proposer<V, T> {
    fn clone(&self) -> Self {
        Proposer {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A round started by [`Proposer::propose`].
pub struct Round<V> {
    id: ProposalId,
    task: JoinHandle<Result<Decision<V>, PaxosError>>,
}

impl<V> Round<V> {
    /// Id of the first attempt. Retries use higher numbers.
    pub fn id(&self) -> &ProposalId {
        &self.id
    }

    /// Waits until the value is chosen, the round is abandoned or retries run out.
    pub async fn outcome(self) -> Result<Decision<V>, PaxosError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Proposer: Round task {} failed: {}", self.id, e);
                Err(PaxosError::Abandoned)
            }
        }
    }
}

impl<V, T> Proposer<V, T>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
{
    pub fn new(
        node_id: impl Into<String>,
        acceptors: Vec<AcceptorId>,
        transport: Arc<T>,
        config: ProposerConfig,
    ) -> Result<Self, PaxosError> {
        let core = ProposerCore::new(node_id, acceptors)?;
        Ok(Proposer {
            shared: Arc::new(Shared {
                acceptors: core.acceptors().collect(),
                state: Mutex::new(State { core, stop: None }),
                transport,
                learners: RwLock::new(Vec::new()),
                config,
            }),
        })
    }

    /// Registers a learner to be told about decisions. Clones of this
    /// proposer share the registration.
    pub fn with_learner(self, learner: Arc<dyn LearnerTrait<V>>) -> Self {
        self.add_learner(learner);
        self
    }

    /// Registers a learner; it hears about every decision made from now on.
    pub fn add_learner(&self, learner: Arc<dyn LearnerTrait<V>>) {
        self.shared
            .learners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(learner);
    }

    pub fn node_id(&self) -> String {
        self.shared.state().core.node_id().to_string()
    }

    pub fn current_id(&self) -> Option<ProposalId> {
        self.shared.state().core.current_id().cloned()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.state().core.is_idle()
    }

    /// Starts a round for `value` and returns without waiting for replies.
    pub fn propose(&self, value: V) -> Result<Round<V>, PaxosError> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let prepare = {
            let mut state = self.shared.state();
            let prepare = state.core.begin(value.clone())?;
            state.stop = Some(stop_tx);
            prepare
        };
        let id = prepare.proposal_id.clone();

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(drive(shared, value, prepare, stop_rx));
        Ok(Round { id, task })
    }

    /// Abandons the running round. Its responses are ignored from now on.
    pub fn abandon(&self) -> Option<ProposalId> {
        let mut state = self.shared.state();
        let id = state.core.abandon();
        if let Some(stop) = state.stop.take() {
            let _ = stop.send(());
        }
        id
    }
}

async fn drive<V, T>(
    shared: Arc<Shared<V, T>>,
    value: V,
    prepare: PrepareRequest,
    mut stop: oneshot::Receiver<()>,
) -> Result<Decision<V>, PaxosError>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut id = prepare.proposal_id.clone();
    let mut attempts = 1;
    broadcast_prepare(&shared, &tx, prepare);

    loop {
        let deadline = Instant::now() + shared.config.round_timeout;
        loop {
            tokio::select! {
                _ = &mut stop => {
                    // Also fires when the sender was dropped.
                    shared.state().core.abandon_if(&id);
                    info!("Proposer: Round {} stopped", id);
                    return Err(PaxosError::Abandoned);
                }
                _ = sleep_until(deadline) => break,
                Some(reply) = rx.recv() => {
                    if let Some(decision) = handle_reply(&shared, &tx, reply) {
                        for learner in shared.learners() {
                            learner.learn(decision.id.clone(), decision.value.clone());
                        }
                        return Ok(decision);
                    }
                }
            }
        }

        warn!("Proposer: Round {} timed out after attempt {}", id, attempts);
        if attempts > shared.config.max_retries {
            shared.state().core.abandon_if(&id);
            return Err(PaxosError::Timeout { attempts });
        }

        sleep(backoff(&shared.config)).await;
        let Some(next) = shared.state().core.restart(&id, value.clone()) else {
            // Abandoned or replaced from outside while we were waiting.
            return Err(PaxosError::Abandoned);
        };
        attempts += 1;
        id = next.proposal_id.clone();
        info!("Proposer: Retrying as {} (attempt {})", id, attempts);
        broadcast_prepare(&shared, &tx, next);
    }
}

/// Feeds one reply into the core; broadcasts the Accept when phase 1 completes.
fn handle_reply<V, T>(
    shared: &Arc<Shared<V, T>>,
    tx: &mpsc::UnboundedSender<Reply<V>>,
    reply: Reply<V>,
) -> Option<Decision<V>>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
    T: Transport<V>,
{
    match reply {
        Reply::Prepare(from, Ok(resp)) => {
            let accept = shared.state().core.on_prepare_response(from, resp)?;
            broadcast_accept(shared, tx, accept);
            None
        }
        Reply::Accept(from, Ok(resp)) => shared.state().core.on_accept_response(from, resp),
        Reply::Prepare(from, Err(e)) | Reply::Accept(from, Err(e)) => {
            debug!("Proposer: No reply from acceptor {}: {}", from, e);
            None
        }
    }
}

fn broadcast_prepare<V, T>(
    shared: &Arc<Shared<V, T>>,
    tx: &mpsc::UnboundedSender<Reply<V>>,
    req: PrepareRequest,
) where
    V: Send + 'static,
    T: Transport<V>,
{
    for &to in &shared.acceptors {
        let response = shared.transport.prepare(to, req.clone());
        let tx = tx.clone();
        tokio::spawn(async move {
            // The driver may already be gone; nothing left to tell it then.
            let _ = tx.send(Reply::Prepare(to, response.await));
        });
    }
}

fn broadcast_accept<V, T>(
    shared: &Arc<Shared<V, T>>,
    tx: &mpsc::UnboundedSender<Reply<V>>,
    req: AcceptRequest<V>,
) where
    V: Clone + Send + 'static,
    T: Transport<V>,
{
    for &to in &shared.acceptors {
        let response = shared.transport.accept(to, req.clone());
        let tx = tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(Reply::Accept(to, response.await));
        });
    }
}

fn backoff(config: &ProposerConfig) -> Duration {
    let jitter = config.retry_jitter.as_millis() as u64;
    let extra = if jitter == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter)
    };
    config.retry_backoff + Duration::from_millis(extra)
}
