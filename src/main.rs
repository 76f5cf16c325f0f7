use clap::Parser;

use kermapy::config::Config;
use kermapy::node::Node;

/// Kerma peer node. Configuration is read from the environment (§6) and
/// may be overridden on the command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on, overriding LISTEN_ADDR.
    #[arg(long)]
    listen: Option<String>,

    /// Directory for the object store and peers.json, overriding STORAGE_PATH.
    #[arg(long)]
    storage_path: Option<String>,

    /// Additional bootstrap peer ("host:port"), repeatable.
    #[arg(long = "peer")]
    peers: Vec<String>,
}

// Single-threaded cooperative scheduling (§5): every task runs on one
// OS thread, so the store's read-decide-write sequences in `connection`
// never race across genuinely parallel threads.
#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(storage_path) = args.storage_path {
        config.storage_path = storage_path.into();
    }
    config.bootstrap_nodes.extend(args.peers);

    println!("[kermapy] starting, listen={} storage={}", config.listen_addr, config.storage_path.display());

    let node = Node::new(config)?;
    node.run().await
}
