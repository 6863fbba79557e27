use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::TransportError;
use crate::network::{LocalTransport, Transport};
use crate::paxos::acceptor::SharedAcceptor;
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptorId, PrepareRequest, PrepareResponse,
};

/// How badly the simulated network behaves.
#[derive(Debug, Clone)]
pub struct NetworkConditions {
    /// Each hop is delayed by a random duration in `min_delay..=max_delay`.
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Probability that a request never reaches the acceptor.
    pub request_loss: f64,
    /// Probability that the acceptor handles the request but its reply is lost.
    pub response_loss: f64,
    /// Probability that a request is delivered to the acceptor twice.
    pub duplicate_rate: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        NetworkConditions {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            request_loss: 0.0,
            response_loss: 0.0,
            duplicate_rate: 0.0,
        }
    }
}

impl NetworkConditions {
    /// Conditions with the given loss applied to both directions.
    pub fn lossy(loss: f64) -> Self {
        NetworkConditions {
            request_loss: loss,
            response_loss: loss,
            ..Default::default()
        }
    }
}

/// What happens to one request on its way through the network.
#[derive(Debug, Clone, Copy)]
struct Fate {
    delay: Duration,
    return_delay: Duration,
    deliveries: usize,
    response_lost: bool,
}

/// In-process network with random delay, loss and duplication.
pub struct SimulatedNetwork<V> {
    local: Arc<LocalTransport<V>>,
    conditions: NetworkConditions,
    rng: Mutex<StdRng>,
}

impl<V> SimulatedNetwork<V> {
    pub fn new(
        acceptors: impl IntoIterator<Item = (AcceptorId, SharedAcceptor<V>)>,
        conditions: NetworkConditions,
    ) -> Self {
        Self::with_rng(acceptors, conditions, StdRng::from_os_rng())
    }

    /// Same as [`SimulatedNetwork::new`] but reproducible.
    pub fn seeded(
        acceptors: impl IntoIterator<Item = (AcceptorId, SharedAcceptor<V>)>,
        conditions: NetworkConditions,
        seed: u64,
    ) -> Self {
        Self::with_rng(acceptors, conditions, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        acceptors: impl IntoIterator<Item = (AcceptorId, SharedAcceptor<V>)>,
        conditions: NetworkConditions,
        rng: StdRng,
    ) -> Self {
        SimulatedNetwork {
            local: Arc::new(LocalTransport::new(acceptors)),
            conditions,
            rng: Mutex::new(rng),
        }
    }

    pub fn acceptor_ids(&self) -> Vec<AcceptorId> {
        self.local.acceptor_ids()
    }

    pub fn acceptor(&self, id: AcceptorId) -> Option<&SharedAcceptor<V>> {
        self.local.acceptor(id)
    }

    fn roll(&self) -> Option<Fate> {
        let c = &self.conditions;
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut delay = || {
            if c.max_delay <= c.min_delay {
                c.min_delay
            } else {
                rng.random_range(c.min_delay..=c.max_delay)
            }
        };
        let (delay, return_delay) = (delay(), delay());
        if rng.random_bool(c.request_loss.clamp(0.0, 1.0)) {
            return None;
        }
        let deliveries = if rng.random_bool(c.duplicate_rate.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        Some(Fate {
            delay,
            return_delay,
            deliveries,
            response_lost: rng.random_bool(c.response_loss.clamp(0.0, 1.0)),
        })
    }
}

impl<V> SimulatedNetwork<V>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
{
    /// Sends one request through the simulated network. `call` performs the
    /// actual delivery and may run more than once.
    fn deliver<R, F>(
        &self,
        to: AcceptorId,
        kind: &'static str,
        call: F,
    ) -> BoxFuture<'static, Result<R, TransportError>>
    where
        R: Send + 'static,
        F: Fn(Arc<LocalTransport<V>>) -> BoxFuture<'static, Result<R, TransportError>>
            + Send
            + 'static,
    {
        let fate = self.roll();
        let local = Arc::clone(&self.local);
        async move {
            let Some(fate) = fate else {
                tokio::time::sleep(Duration::from_millis(1)).await;
                debug!("Network: Dropped {} to acceptor {}", kind, to);
                return Err(TransportError::Lost);
            };
            tokio::time::sleep(fate.delay).await;
            let response = call(Arc::clone(&local)).await;
            for _ in 1..fate.deliveries {
                // The duplicate's own reply never makes it back.
                debug!("Network: Duplicated {} to acceptor {}", kind, to);
                let _ = call(Arc::clone(&local)).await;
            }
            if fate.response_lost {
                debug!("Network: Dropped {} reply from acceptor {}", kind, to);
                return Err(TransportError::Lost);
            }
            tokio::time::sleep(fate.return_delay).await;
            response
        }
        .boxed()
    }
}

impl<V> Transport<V> for SimulatedNetwork<V>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
{
    fn prepare(
        &self,
        to: AcceptorId,
        req: PrepareRequest,
    ) -> BoxFuture<'static, Result<PrepareResponse<V>, TransportError>> {
        self.deliver(to, "prepare", move |local| local.prepare(to, req.clone()))
    }

    fn accept(
        &self,
        to: AcceptorId,
        req: AcceptRequest<V>,
    ) -> BoxFuture<'static, Result<AcceptResponse, TransportError>> {
        self.deliver(to, "accept", move |local| local.accept(to, req.clone()))
    }
}
