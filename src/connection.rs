use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::block_validator;
use crate::chain;
use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::{ParseError, ProtocolError, TransportError};
use crate::node::Node;
use crate::objectid::id;
use crate::protocol::Message;
use crate::schema;

const AGENT: &str = "kermapy";

/// Outcome of reading one newline-framed line (§4.9). `Eof` is a clean
/// close; everything else distinguishes a parse-level problem (which
/// gets an `error` reply) from a transport-level one (which closes the
/// connection silently, per §7).
enum Frame {
    Line(String),
    Eof,
    InvalidUtf8,
    OverCap,
    Transport(TransportError),
}

async fn read_frame(reader: &mut BufReader<OwnedReadHalf>, buf: &mut String, cap: usize) -> Frame {
    buf.clear();
    match reader.read_line(buf).await {
        Ok(0) => Frame::Eof,
        Ok(_) if !buf.ends_with('\n') => Frame::Transport(TransportError::Closed),
        Ok(_) if buf.len() > cap => Frame::OverCap,
        Ok(_) => Frame::Line(buf.trim_end_matches(['\n', '\r']).to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Frame::InvalidUtf8,
        Err(e) => Frame::Transport(TransportError::from(e)),
    }
}

fn parse_and_validate(raw: &str) -> Result<Value, ProtocolError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    schema::validate_message_shape(&value).map_err(ProtocolError::from)?;
    Ok(value)
}

/// Drives one peer session end to end: framed read/write, handshake,
/// per-message dispatch. `Opening`/`AwaitingHello` are the handshake
/// block below; `Established` is the steady-state dispatch loop;
/// `Closed` is simply this function returning. Never propagates an
/// error: every failure is logged and simply ends the session.
pub async fn run(node: Node, stream: TcpStream, peer_name: String) {
    {
        let (read_half, mut write_half) = stream.into_split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                if write_half.write_all(&msg.to_line()).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let conn_id = node.register(peer_name.clone(), write_tx.clone());
        let send = |msg: Message| {
            let _ = write_tx.send(msg);
        };

        send(Message::hello(AGENT));
        send(Message::GetPeers {});
        send(Message::GetChainTip {});
        send(Message::GetMempool {});

        let cap = node.config().buffer_size;
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        // AwaitingHello: the first inbound message must validate and be
        // of type 'hello'; any other outcome replies (where applicable)
        // and closes the connection (§4.9).
        let rejection: Option<Option<Message>> = match read_frame(&mut reader, &mut line, cap).await {
            Frame::Line(raw) => match parse_and_validate(&raw) {
                Ok(value) if value["type"] == "hello" => {
                    println!("[p2p] handshake with {peer_name} complete");
                    None
                }
                Ok(_) => Some(Some(Message::error("first message must be of type 'hello'"))),
                Err(e) => Some(Some(Message::error(e.to_string()))),
            },
            Frame::InvalidUtf8 => Some(Some(Message::error(ParseError::InvalidUtf8.to_string()))),
            Frame::OverCap => Some(Some(Message::error("message exceeds the configured buffer size"))),
            Frame::Eof | Frame::Transport(_) => {
                println!("[p2p] {peer_name} closed before completing the handshake");
                Some(None)
            }
        };
        if let Some(reply) = rejection {
            if let Some(msg) = reply {
                send(msg);
            }
            node.unregister(conn_id);
            drop(send);
            let _ = writer_task.await;
            return;
        }

        // Established: dispatch every subsequent message as an
        // independent task so one connection's resolution waits never
        // starve the read loop (§4.9, §5). Writes stay serialized
        // through the single `write_tx` channel.
        let mut tasks = tokio::task::JoinSet::new();
        loop {
            match read_frame(&mut reader, &mut line, cap).await {
                Frame::Line(raw) => {
                    let handle = ConnectionHandle { node: node.clone(), id: conn_id, peer_name: peer_name.clone(), write_tx: write_tx.clone() };
                    tasks.spawn(async move { handle.handle_line(raw).await });
                }
                Frame::InvalidUtf8 => {
                    send(Message::error(ParseError::InvalidUtf8.to_string()));
                }
                Frame::OverCap => {
                    send(Message::error("message exceeds the configured buffer size"));
                }
                Frame::Eof => {
                    println!("[p2p] {peer_name} disconnected");
                    break;
                }
                Frame::Transport(e) => {
                    eprintln!("[p2p] transport error with {peer_name}: {e}");
                    break;
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        node.unregister(conn_id);
        drop(send);
        let _ = writer_task.await;
    }
}

/// A cheaply-clonable handle used by the per-message dispatch tasks; it
/// does not own the read half, only what's needed to reply and to reach
/// shared node state.
#[derive(Clone)]
struct ConnectionHandle {
    node: Node,
    id: u64,
    peer_name: String,
    write_tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    fn send(&self, msg: Message) {
        let _ = self.write_tx.send(msg);
    }

    async fn handle_line(self, raw: String) {
        let value = match parse_and_validate(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.send(Message::error(e.to_string()));
                return;
            }
        };

        let message: Message = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                self.send(Message::error(format!("malformed message: {e}")));
                return;
            }
        };

        if let Err(e) = self.dispatch(message).await {
            eprintln!("[p2p] {}: {e}", self.peer_name);
            self.send(Message::error(e.to_string()));
        }
    }

    async fn dispatch(&self, message: Message) -> Result<(), ProtocolError> {
        match message {
            Message::Hello { .. } => {
                return Err(ProtocolError::other("unexpected second 'hello'"));
            }
            Message::GetPeers {} => {
                self.send(Message::Peers { peers: self.node.peers().snapshot() });
            }
            Message::Peers { peers } => {
                let added = self.node.peers().add_filtered(&peers);
                if !added.is_empty() {
                    self.node.peers().persist().map_err(ProtocolError::from)?;
                    println!("[p2p] learned {} new peer(s) from {}", added.len(), self.peer_name);
                }
            }
            Message::GetObject { objectid } => {
                if let Ok(object) = self.node.store().get_object(&objectid) {
                    self.send(Message::Object { object });
                }
            }
            Message::IHaveObject { objectid } => {
                if !self.node.store().contains(&objectid).unwrap_or(false) {
                    self.send(Message::GetObject { objectid });
                }
            }
            Message::Object { object } => {
                self.ingest_object(object).await?;
            }
            Message::GetChainTip {} => {
                if let Ok(Some(tip)) = self.node.store().get_chaintip() {
                    self.send(Message::ChainTip { blockid: tip });
                }
            }
            Message::ChainTip { blockid } => {
                if !self.node.store().contains(&blockid).unwrap_or(false) {
                    self.send(Message::GetObject { objectid: blockid });
                }
            }
            Message::GetMempool {} => {
                let txids = self.node.mempool().lock().get_pending();
                self.send(Message::Mempool { txids });
            }
            Message::Mempool { txids } => {
                self.ingest_mempool(txids).await;
            }
            Message::Error { .. } => {
                // Reply-only; nothing to do on receipt.
            }
        }
        Ok(())
    }

    /// §4.9 "Ingestion of `object`": compute the id, drop duplicates,
    /// otherwise validate by type, store, update chain state, and
    /// broadcast `ihaveobject` to every other live connection on success.
    async fn ingest_object(&self, object: Value) -> Result<(), ProtocolError> {
        let oid = id(&object);
        if self.node.store().contains(&oid).unwrap_or(false) {
            return Ok(());
        }

        let ty = object.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match ty {
            "transaction" => {
                crate::tx_validator::validate(&object, self.node.store()).map_err(ProtocolError::from)?;
                self.node.store().put_object(&object).map_err(ProtocolError::from)?;
                println!("[chain] accepted transaction {oid}");
            }
            "block" => {
                let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
                let new_utxo = block_validator::validate_block(&object, self.node.store(), &self.node, timeout).await?;
                let block: crate::block::Block =
                    serde_json::from_value(object.clone()).map_err(|e| ProtocolError::other(format!("malformed block: {e}")))?;
                let height = chain::height_of(&block, self.node.store()).map_err(ProtocolError::from)?;
                let new_chaintip = chain::is_new_chaintip(height, self.node.store()).map_err(ProtocolError::from)?;
                self.node.store().put_block(&object, &new_utxo, height, new_chaintip).map_err(ProtocolError::from)?;
                println!("[chain] accepted block {oid} at height {height} (new_chaintip={new_chaintip})");
                if new_chaintip {
                    self.node.mempool().lock().handle_chaintip_change(&oid).map_err(ProtocolError::from)?;
                    println!("[mempool] rebuilt for new chaintip {oid}");
                }
            }
            other => {
                return Err(ProtocolError::other(format!("unknown object type '{other}'")));
            }
        }

        self.node.broadcast(Message::IHaveObject { objectid: oid }, Some(self.id));
        Ok(())
    }

    /// §4.9 "mempool: for each txid, fetch if missing (broadcast+wait);
    /// then ingest". A resolution failure is logged and that txid is
    /// skipped; it does not abort the remaining ones.
    async fn ingest_mempool(&self, txids: Vec<String>) {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        for txid in txids {
            if block_validator::resolve(self.node.store(), &self.node, &txid, timeout).await.is_err() {
                eprintln!("[mempool] could not resolve advertised txid {txid}");
                continue;
            }
            self.node.mempool().lock().add_tx(&txid);
        }
    }
}
