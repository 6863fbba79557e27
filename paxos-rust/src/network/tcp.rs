//! Line-delimited JSON over TCP.
//!
//! Each request is one JSON object on its own line; the acceptor answers with
//! one line on the same connection.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransportError;
use crate::network::Transport;
use crate::paxos::acceptor::SharedAcceptor;
use crate::paxos::types::{
    AcceptRequest, AcceptResponse, AcceptorId, PrepareRequest, PrepareResponse,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(bound(
    serialize = "V: Serialize + Clone",
    deserialize = "V: DeserializeOwned"
))]
pub enum Request<V> {
    Prepare(PrepareRequest),
    Accept(AcceptRequest<V>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[serde(bound(
    serialize = "V: Serialize + Clone",
    deserialize = "V: DeserializeOwned"
))]
pub enum Response<V> {
    Promise(PrepareResponse<V>),
    Accepted(AcceptResponse),
}

/// Answers requests for `acceptor` on every connection `listener` accepts.
pub async fn serve_acceptor<V>(
    listener: TcpListener,
    acceptor: SharedAcceptor<V>,
) -> io::Result<()>
where
    V: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    info!("Acceptor: Listening on {}", listener.local_addr()?);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                // Transient (e.g. out of file descriptors); keep serving.
                warn!("Acceptor: Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
        };
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, acceptor).await {
                warn!("Acceptor: Error handling connection from {}: {}", peer, e);
            }
        });
    }
}

async fn handle_connection<V>(
    stream: TcpStream,
    acceptor: SharedAcceptor<V>,
) -> Result<(), TransportError>
where
    V: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request<V>>(&line)? {
            Request::Prepare(req) => Response::Promise(acceptor.handle_prepare(&req)),
            Request::Accept(req) => Response::Accepted(acceptor.handle_accept(&req)),
        };
        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        write.write_all(json.as_bytes()).await?;
        write.flush().await?;
    }
    Ok(())
}

/// Sends one request and waits for the matching reply line.
pub async fn send_and_receive<V>(
    addr: &str,
    req: &Request<V>,
) -> Result<Response<V>, TransportError>
where
    V: Serialize + DeserializeOwned + Clone,
{
    let stream = TcpStream::connect(addr).await?;
    let (read, mut write) = stream.into_split();
    let mut json = serde_json::to_string(req)?;
    json.push('\n');
    write.write_all(json.as_bytes()).await?;
    write.flush().await?;

    let mut lines = BufReader::new(read).lines();
    let line = lines.next_line().await?.ok_or(TransportError::Closed)?;
    Ok(serde_json::from_str(&line)?)
}

/// Transport reaching acceptors at fixed socket addresses.
pub struct TcpTransport<V> {
    peers: Arc<HashMap<AcceptorId, String>>,
    timeout: Duration,
    _value: std::marker::PhantomData<fn() -> V>,
}

impl<V> TcpTransport<V> {
    pub fn new(peers: impl IntoIterator<Item = (AcceptorId, String)>, timeout: Duration) -> Self {
        TcpTransport {
            peers: Arc::new(peers.into_iter().collect()),
            timeout,
            _value: std::marker::PhantomData,
        }
    }
}

impl<V> TcpTransport<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn exchange(
        &self,
        to: AcceptorId,
        req: Request<V>,
    ) -> BoxFuture<'static, Result<Response<V>, TransportError>> {
        let addr = self.peers.get(&to).cloned();
        let timeout = self.timeout;
        async move {
            let addr = addr.ok_or(TransportError::Unknown(to))?;
            debug!("Network: Sending to acceptor {} at {}", to, addr);
            tokio::time::timeout(timeout, send_and_receive(&addr, &req))
                .await
                .map_err(|_| TransportError::Timeout)?
        }
        .boxed()
    }
}

impl<V> Transport<V> for TcpTransport<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn prepare(
        &self,
        to: AcceptorId,
        req: PrepareRequest,
    ) -> BoxFuture<'static, Result<PrepareResponse<V>, TransportError>> {
        let reply = self.exchange(to, Request::Prepare(req));
        async move {
            match reply.await? {
                Response::Promise(resp) => Ok(resp),
                Response::Accepted(_) => Err(TransportError::UnexpectedReply),
            }
        }
        .boxed()
    }

    fn accept(
        &self,
        to: AcceptorId,
        req: AcceptRequest<V>,
    ) -> BoxFuture<'static, Result<AcceptResponse, TransportError>> {
        let reply = self.exchange(to, Request::Accept(req));
        async move {
            match reply.await? {
                Response::Accepted(resp) => Ok(resp),
                Response::Promise(_) => Err(TransportError::UnexpectedReply),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::types::ProposalId;

    #[test]
    fn promise_without_accepted_value_has_null_pair() {
        let resp: Response<String> = Response::Promise(PrepareResponse {
            proposal_id: ProposalId::new(1, "P1"),
            accepted: None,
            ok: true,
            promised: None,
        });
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["promise"]["accepted_id"], serde_json::Value::Null);
        assert_eq!(json["promise"]["accepted_value"], serde_json::Value::Null);
        assert_eq!(json["promise"]["proposal_id"]["number"], 1);
    }

    #[test]
    fn half_present_accepted_pair_is_rejected() {
        let line = r#"{"promise":{"proposal_id":{"number":2,"node_id":"P2"},"accepted_id":{"number":1,"node_id":"P1"},"ok":true}}"#;
        assert!(serde_json::from_str::<Response<String>>(line).is_err());
    }

    #[test]
    fn promise_with_accepted_value_parses() {
        let line = r#"{"promise":{"proposal_id":{"number":2,"node_id":"P2"},"accepted_id":{"number":1,"node_id":"P1"},"accepted_value":"x","ok":true}}"#;
        let resp: Response<String> = serde_json::from_str(line).unwrap();
        let promise = match resp {
            Response::Promise(promise) => promise,
            other => panic!("expected a promise, got {:?}", other),
        };
        assert_eq!(promise.accepted, Some((ProposalId::new(1, "P1"), "x".to_string())));
        assert_eq!(promise.promised, None);
    }

    #[tokio::test]
    async fn server_answers_prepare_and_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let acceptor = SharedAcceptor::<String>::new();
        tokio::spawn(serve_acceptor(listener, acceptor.clone()));

        let transport = TcpTransport::<String>::new([(0, addr)], Duration::from_secs(2));
        let id = ProposalId::new(1, "P1");
        let promise = transport
            .prepare(0, PrepareRequest { proposal_id: id.clone() })
            .await
            .unwrap();
        assert!(promise.ok);

        let accepted = transport
            .accept(
                0,
                AcceptRequest {
                    proposal_id: id.clone(),
                    value: "x".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(accepted.ok);
        assert_eq!(acceptor.accepted(), Some((id, "x".to_string())));
    }

    #[tokio::test]
    async fn server_keeps_serving_after_a_bad_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(serve_acceptor(listener, SharedAcceptor::<String>::new()));

        let mut bad = TcpStream::connect(&addr).await.unwrap();
        bad.write_all(b"not json\n").await.unwrap();
        drop(bad);

        let transport = TcpTransport::<String>::new([(0, addr)], Duration::from_secs(2));
        let promise = transport
            .prepare(0, PrepareRequest { proposal_id: ProposalId::new(1, "P1") })
            .await
            .expect("server should still answer after a failed connection");
        assert!(promise.ok);
        assert!(!server.is_finished(), "serve loop must not exit");
    }

    #[tokio::test]
    async fn unknown_peer_is_reported() {
        let transport = TcpTransport::<String>::new([], Duration::from_secs(1));
        let result = transport
            .prepare(3, PrepareRequest { proposal_id: ProposalId::new(1, "P1") })
            .await;
        assert!(matches!(result, Err(TransportError::Unknown(3))));
    }
}
