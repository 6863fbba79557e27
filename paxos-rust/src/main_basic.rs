use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::Args;
use log::{info, warn};
use synod_paxos::{
    BasicLearner, LearnerTrait, NetworkConditions, PaxosError, Proposer, ProposerConfig,
    SharedAcceptor, SimulatedNetwork,
};

#[derive(Args)]
pub struct SimulateArgs {
    /// number of acceptors
    #[arg(long, default_value_t = 5)]
    acceptors: usize,
    /// number of concurrent proposers
    #[arg(long, default_value_t = 3)]
    proposers: usize,
    /// probability that a message is lost, per direction
    #[arg(long, default_value_t = 0.1)]
    loss: f64,
    /// probability that a request is delivered twice
    #[arg(long, default_value_t = 0.05)]
    duplicate: f64,
    /// maximum one-way delay in milliseconds
    #[arg(long, default_value_t = 20)]
    max_delay_ms: u64,
    /// seed for the simulated network
    #[arg(long)]
    seed: Option<u64>,
}

pub async fn run(args: SimulateArgs) -> anyhow::Result<()> {
    println!(
        "Running single-decree Paxos with {} proposers and {} acceptors...",
        args.proposers, args.acceptors
    );

    let acceptors: Vec<_> = (0..args.acceptors)
        .map(|id| (id, SharedAcceptor::<String>::new()))
        .collect();
    let conditions = NetworkConditions {
        max_delay: Duration::from_millis(args.max_delay_ms),
        request_loss: args.loss,
        response_loss: args.loss,
        duplicate_rate: args.duplicate,
        ..Default::default()
    };
    let network = Arc::new(match args.seed {
        Some(seed) => SimulatedNetwork::seeded(acceptors.clone(), conditions, seed),
        None => SimulatedNetwork::new(acceptors.clone(), conditions),
    });
    let learner = Arc::new(BasicLearner::<String>::new());
    let config = ProposerConfig {
        round_timeout: Duration::from_millis(args.max_delay_ms * 6 + 20),
        max_retries: 20,
        ..Default::default()
    };

    let mut rounds = Vec::new();
    for i in 0..args.proposers {
        let proposer = Proposer::new(
            format!("P{}", i + 1),
            network.acceptor_ids(),
            Arc::clone(&network),
            config.clone(),
        )?
        .with_learner(learner.clone());
        let value = format!("value from P{}", i + 1);
        println!("Proposing: '{}'", value);
        rounds.push((proposer.node_id(), proposer.propose(value)?));
    }

    let mut chosen = Vec::new();
    for (node, round) in rounds {
        match round.outcome().await {
            Ok(decision) => {
                println!(
                    "{} saw '{}' chosen under proposal {}",
                    node, decision.value, decision.id
                );
                chosen.push(decision.value);
            }
            Err(PaxosError::Timeout { attempts }) => {
                warn!("{} gave up after {} attempts", node, attempts);
            }
            Err(e) => warn!("{} failed: {}", node, e),
        }
    }
    println!("--------------------------------------");

    chosen.dedup();
    if chosen.len() > 1 {
        bail!("safety violated: several values chosen: {:?}", chosen);
    }

    match learner.learned_value() {
        Ok(value) => println!("Learner confirmed consensus: '{}'", value),
        Err(e) => println!("Learner has nothing yet: {}", e),
    }

    println!("Final acceptor state:");
    for (id, acceptor) in &acceptors {
        info!("Acceptor {} promised {:?}", id, acceptor.promised());
        match acceptor.accepted() {
            Some((accepted_id, value)) => {
                println!("  acceptor {}: '{}' under {}", id, value, accepted_id)
            }
            None => println!("  acceptor {}: nothing accepted", id),
        }
    }
    Ok(())
}
