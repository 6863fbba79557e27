pub mod simulation;
pub mod tcp;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::FutureExt;

use crate::error::TransportError;
use crate::paxos::acceptor::SharedAcceptor;
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptorId, PrepareRequest, PrepareResponse,
};

/// Delivers requests to acceptors and hands their responses back.
///
/// A transport may lose, duplicate or reorder messages but never corrupt
/// them. Returned futures are `'static` so the proposer can drive each
/// delivery on its own task.
pub trait Transport<V>: Send + Sync + 'static {
    fn prepare(
        &self,
        to: AcceptorId,
        req: PrepareRequest,
    ) -> BoxFuture<'static, Result<PrepareResponse<V>, TransportError>>;

    fn accept(
        &self,
        to: AcceptorId,
        req: AcceptRequest<V>,
    ) -> BoxFuture<'static, Result<AcceptResponse, TransportError>>;
}

impl<V, T: Transport<V> + ?Sized> Transport<V> for Arc<T> {
    fn prepare(
        &self,
        to: AcceptorId,
        req: PrepareRequest,
    ) -> BoxFuture<'static, Result<PrepareResponse<V>, TransportError>> {
        (**self).prepare(to, req)
    }

    fn accept(
        &self,
        to: AcceptorId,
        req: AcceptRequest<V>,
    ) -> BoxFuture<'static, Result<AcceptResponse, TransportError>> {
        (**self).accept(to, req)
    }
}

/// In-process transport calling acceptors directly. Never loses anything.
pub struct LocalTransport<V> {
    acceptors: HashMap<AcceptorId, SharedAcceptor<V>>,
}

impl<V> LocalTransport<V> {
    pub fn new(acceptors: impl IntoIterator<Item = (AcceptorId, SharedAcceptor<V>)>) -> Self {
        LocalTransport {
            acceptors: acceptors.into_iter().collect(),
        }
    }

    pub fn acceptor_ids(&self) -> Vec<AcceptorId> {
        let mut ids: Vec<AcceptorId> = self.acceptors.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn acceptor(&self, id: AcceptorId) -> Option<&SharedAcceptor<V>> {
        self.acceptors.get(&id)
    }
}

impl<V> Transport<V> for LocalTransport<V>
where
    V: Clone + std::fmt::Debug + Send + Sync + 'static,
{
    fn prepare(
        &self,
        to: AcceptorId,
        req: PrepareRequest,
    ) -> BoxFuture<'static, Result<PrepareResponse<V>, TransportError>> {
        let result = match self.acceptors.get(&to) {
            Some(acceptor) => Ok(acceptor.handle_prepare(&req)),
            None => Err(TransportError::Unknown(to)),
        };
        future::ready(result).boxed()
    }

    fn accept(
        &self,
        to: AcceptorId,
        req: AcceptRequest<V>,
    ) -> BoxFuture<'static, Result<AcceptResponse, TransportError>> {
        let result = match self.acceptors.get(&to) {
            Some(acceptor) => Ok(acceptor.handle_accept(&req)),
            None => Err(TransportError::Unknown(to)),
        };
        future::ready(result).boxed()
    }
}
