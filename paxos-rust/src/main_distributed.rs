use std::sync::Arc;

use anyhow::{bail, Context};
use log::info;
use synod_paxos::config::PaxosRole;
use synod_paxos::{serve_acceptor, BasicLearner, Config, Proposer, SharedAcceptor, TcpTransport};
use tokio::net::TcpListener;

/// Serves the acceptor `node_id` on the address the config gives it.
pub async fn run_acceptor(config_path: &str, node_id: u64) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path))?;
    let node = config.node(node_id)?;
    if node.role != PaxosRole::Acceptor {
        bail!(
            "node {} is configured as {:?}, not an acceptor",
            node_id,
            node.role
        );
    }

    info!("Starting acceptor {} on {}", node_id, node.address);
    let listener = TcpListener::bind(&node.address).await?;
    let acceptor = SharedAcceptor::<String>::new();
    tokio::select! {
        res = serve_acceptor(listener, acceptor) => res?,
        _ = tokio::signal::ctrl_c() => info!("Acceptor {} shutting down", node_id),
    }
    Ok(())
}

/// Runs one proposal from `node_id` against every acceptor in the config.
pub async fn run_proposer(
    config_path: &str,
    node_id: u64,
    value: String,
) -> anyhow::Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading {}", config_path))?;
    let node = config.node(node_id)?;

    let peers = acceptor_peers(&config)?;
    let acceptor_ids = peers.iter().map(|(id, _)| *id).collect();
    let transport = Arc::new(TcpTransport::<String>::new(peers, config.request_timeout));
    let learner = Arc::new(BasicLearner::<String>::new());

    let proposer = Proposer::new(
        format!("node{}", node.node_id),
        acceptor_ids,
        transport,
        config.proposer.clone(),
    )?
    .with_learner(learner.clone());

    let round = proposer.propose(value)?;
    info!("Proposer {}: Started round {}", node_id, round.id());
    let decision = round.outcome().await?;
    println!("Chosen: '{}' (proposal {})", decision.value, decision.id);
    info!("Learner holds {:?}", learner.learned());
    Ok(())
}

/// Acceptor ids and addresses from the config, keyed by node id.
fn acceptor_peers(config: &Config) -> anyhow::Result<Vec<(usize, String)>> {
    config
        .acceptors()
        .map(|n| {
            let id = usize::try_from(n.node_id)
                .with_context(|| format!("node id {} does not fit this platform", n.node_id))?;
            Ok::<_, anyhow::Error>((id, n.address.clone()))
        })
        .collect()
}
