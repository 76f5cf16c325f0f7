use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};

use crate::block_validator::Broadcaster;
use crate::config::Config;
use crate::mempool::Mempool;
use crate::peers::Peers;
use crate::protocol::Message;
use crate::store::ObjectStore;

/// One registered live connection's outbound channel, keyed by a
/// process-local id. `peer_name` is the `host:port` string used to
/// dedupe outbound attempts (§4.10).
struct Registered {
    peer_name: String,
    tx: mpsc::UnboundedSender<Message>,
}

struct Inner {
    config: Config,
    store: ObjectStore,
    mempool: Mutex<Mempool>,
    peers: Peers,
    connections: Mutex<HashMap<u64, Registered>>,
    next_id: AtomicU64,
    outbound_semaphore: Semaphore,
}

/// Owns the listener, the outbound connector, the live connection set,
/// and the object store / mempool / peer collaborators (§4.10). Cheap
/// to clone: every clone shares the same state through an `Arc`.
#[derive(Clone)]
pub struct Node(Arc<Inner>);

impl Node {
    pub fn new(config: Config) -> Result<Self, crate::error::StoreError> {
        let store = ObjectStore::open(&config.storage_path)?;
        let mempool = Mempool::new(store.clone())?;
        let peers = Peers::load(config.storage_path.join("peers.json"))?;
        let outbound_semaphore = Semaphore::new(config.client_connections);

        Ok(Self(Arc::new(Inner {
            config,
            store,
            mempool: Mutex::new(mempool),
            peers,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            outbound_semaphore,
        })))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn store(&self) -> &ObjectStore {
        &self.0.store
    }

    pub fn mempool(&self) -> &Mutex<Mempool> {
        &self.0.mempool
    }

    pub fn peers(&self) -> &Peers {
        &self.0.peers
    }

    /// Registers a newly established connection's outbound channel;
    /// returns the id used to unregister it and to exclude it from
    /// broadcasts of its own messages.
    pub(crate) fn register(&self, peer_name: String, tx: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0.connections.lock().insert(id, Registered { peer_name, tx });
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.0.connections.lock().remove(&id);
    }

    pub(crate) fn is_connected_to(&self, peer_name: &str) -> bool {
        self.0.connections.lock().values().any(|r| r.peer_name == peer_name)
    }

    /// Enqueues a write of `msg` on every live connection except `exclude`,
    /// as an independent send per connection; individual failures (a dead
    /// or slow peer) are tolerated and never abort the broadcaster (§4.10,
    /// §9 DESIGN NOTES).
    pub fn broadcast(&self, msg: Message, exclude: Option<u64>) {
        let senders: Vec<mpsc::UnboundedSender<Message>> = self
            .0
            .connections
            .lock()
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(_, r)| r.tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(msg.clone());
        }
    }

    /// Accepts inbound connections and connects to the configured
    /// bootstrap peers, then runs forever.
    pub async fn run(self) -> anyhow::Result<()> {
        let bootstrap = self.0.config.bootstrap_nodes.clone();
        for peer in bootstrap {
            let node = self.clone();
            tokio::spawn(async move { node.connect_outbound(peer).await });
        }

        let listener = TcpListener::bind(&self.0.config.listen_addr).await?;
        println!("[node] listening on {}", self.0.config.listen_addr);
        self.serve(listener).await
    }

    /// Accepts inbound connections on an already-bound listener, forever.
    /// Split out from `run` so tests can bind an ephemeral port (`:0`),
    /// read back the real address, and drive the accept loop in the
    /// background without touching `LISTEN_ADDR`.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            let node = self.clone();
            tokio::spawn(async move {
                println!("[node] inbound connection from {addr}");
                crate::connection::run(node, stream, addr.to_string()).await;
            });
        }
    }

    /// Connects to `peer_name`, bounded by the outbound semaphore (§4.10,
    /// §5). Skipped if already connected to that peer name. Tolerates and
    /// logs a TCP failure; never panics the caller.
    async fn connect_outbound(self, peer_name: String) {
        if self.is_connected_to(&peer_name) {
            return;
        }
        let Ok(_permit) = self.0.outbound_semaphore.acquire().await else { return };
        match TcpStream::connect(&peer_name).await {
            Ok(stream) => {
                println!("[node] connected to {peer_name}");
                crate::connection::run(self, stream, peer_name).await;
            }
            Err(e) => {
                println!("[node] failed to connect to {peer_name}: {e}");
            }
        }
    }
}

impl Broadcaster for Node {
    fn broadcast_getobject(&self, oid: &str) {
        self.broadcast(Message::GetObject { objectid: oid.to_string() }, None);
    }
}
