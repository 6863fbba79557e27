mod main_basic;
mod main_distributed;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Single-decree Paxos")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run competing proposers against in-process acceptors over a lossy network
    Simulate(main_basic::SimulateArgs),
    /// Serve one acceptor from the cluster config
    Acceptor {
        /// path to config file
        #[arg(long, default_value = "config.yaml")]
        config: String,
        /// this node's id in the config
        #[arg(long)]
        node_id: u64,
    },
    /// Propose a value to the acceptors in the cluster config
    Propose {
        #[arg(long, default_value = "config.yaml")]
        config: String,
        #[arg(long)]
        node_id: u64,
        value: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=info shows the protocol trace.
    env_logger::init();

    match Args::parse().command {
        Command::Simulate(args) => main_basic::run(args).await,
        Command::Acceptor { config, node_id } => {
            main_distributed::run_acceptor(&config, node_id).await
        }
        Command::Propose {
            config,
            node_id,
            value,
        } => main_distributed::run_proposer(&config, node_id, value).await,
    }
}
