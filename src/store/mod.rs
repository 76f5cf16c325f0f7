use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::path::Path;

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::canonical::canonicalize;
use crate::error::StoreError;
use crate::objectid::{id, ObjectId};

const CHAINTIP_KEY: &str = "chaintip";

type WaiterTable = Arc<Mutex<HashMap<ObjectId, HashMap<u64, oneshot::Sender<()>>>>>;

/// A handle completed when `oid` is next `put_object`'d (§4.2, §9
/// "waiter registry for async resolution"). Dropping the handle before
/// it fires (e.g. on timeout or cancellation) deregisters its slot from
/// the shared table so a block that never arrives doesn't leak memory.
pub struct Waiter {
    oid: ObjectId,
    token: u64,
    table: WaiterTable,
    rx: oneshot::Receiver<()>,
}

impl Future for Waiter {
    type Output = Result<(), oneshot::error::RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(slots) = self.table.lock().get_mut(&self.oid) {
            slots.remove(&self.token);
        }
    }
}

fn height_to_bytes(h: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&h.to_be_bytes());
    out
}

fn bytes_to_height(b: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    let start = b.len().saturating_sub(8);
    arr.copy_from_slice(&b[start..]);
    u64::from_be_bytes(arr)
}

/// Namespaced key/value over a persistent ordered store (§4.2), plus an
/// in-memory table of pending waiters keyed by object id.
#[derive(Clone)]
pub struct ObjectStore {
    env: Env,
    objects: Database<Str, Bytes>,
    heights: Database<Str, Bytes>,
    utxos: Database<Str, Bytes>,
    chaintip: Database<Str, Str>,
    waiters: WaiterTable,
    next_waiter_token: Arc<AtomicU64>,
}

impl ObjectStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(path)?;
        let map_size_gb: usize = std::env::var("KERMA_LMDB_MAP_SIZE_GB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_gb * 1024 * 1024 * 1024)
                .max_dbs(4)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let objects = env.create_database(&mut wtxn, Some("objects"))?;
        let heights = env.create_database(&mut wtxn, Some("heights"))?;
        let utxos = env.create_database(&mut wtxn, Some("utxos"))?;
        let chaintip = env.create_database(&mut wtxn, Some("chaintip"))?;
        wtxn.commit()?;

        let store = Self {
            env,
            objects,
            heights,
            utxos,
            chaintip,
            waiters: Arc::new(Mutex::new(HashMap::new())),
            next_waiter_token: Arc::new(AtomicU64::new(0)),
        };
        store.ensure_genesis()?;
        Ok(store)
    }

    fn ensure_genesis(&self) -> Result<(), StoreError> {
        let genesis = crate::block::Block::genesis();
        let gid = genesis.id();
        if self.contains(&gid)? {
            return Ok(());
        }
        println!("[store] initializing store with genesis {gid}");
        self.put_block(&genesis.to_value(), &HashMap::new(), 0, true)?;
        Ok(())
    }

    pub fn contains(&self, oid: &str) -> Result<bool, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.objects.get(&rtxn, oid)?.is_some())
    }

    pub fn get_object(&self, oid: &str) -> Result<Value, StoreError> {
        let rtxn = self.env.read_txn()?;
        let bytes = self
            .objects
            .get(&rtxn, oid)?
            .ok_or_else(|| StoreError::NotFound(oid.to_string()))?;
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn get_height(&self, oid: &str) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn()?;
        let bytes = self
            .heights
            .get(&rtxn, oid)?
            .ok_or_else(|| StoreError::NotFound(oid.to_string()))?;
        Ok(bytes_to_height(bytes))
    }

    pub fn get_utxo(&self, oid: &str) -> Result<HashMap<String, u64>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let bytes = self
            .utxos
            .get(&rtxn, oid)?
            .ok_or_else(|| StoreError::NotFound(oid.to_string()))?;
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn get_chaintip(&self) -> Result<Option<ObjectId>, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.chaintip.get(&rtxn, CHAINTIP_KEY)?.map(|s| s.to_string()))
    }

    /// Stores canonical bytes for `obj`; wakes any waiters registered for
    /// `id(obj)`, then forgets them. Returns the computed id.
    pub fn put_object(&self, obj: &Value) -> Result<ObjectId, StoreError> {
        let oid = id(obj);
        let bytes = canonicalize(obj);
        let mut wtxn = self.env.write_txn()?;
        self.objects.put(&mut wtxn, &oid, &bytes)?;
        wtxn.commit()?;
        self.wake_waiters(&oid);
        Ok(oid)
    }

    /// Atomically writes height, utxo, object; updates the chaintip
    /// pointer when `new_chaintip`. Ordered so an observer of the
    /// chaintip pointer can already read the block, its height and UTXO.
    pub fn put_block(
        &self,
        obj: &Value,
        utxo: &HashMap<String, u64>,
        height: u64,
        new_chaintip: bool,
    ) -> Result<ObjectId, StoreError> {
        let oid = id(obj);
        let obj_bytes = canonicalize(obj);
        let height_bytes = height_to_bytes(height);
        let utxo_bytes = serde_json::to_vec(utxo)?;

        let mut wtxn = self.env.write_txn()?;
        self.objects.put(&mut wtxn, &oid, &obj_bytes)?;
        self.heights.put(&mut wtxn, &oid, &height_bytes)?;
        self.utxos.put(&mut wtxn, &oid, &utxo_bytes)?;
        if new_chaintip {
            self.chaintip.put(&mut wtxn, CHAINTIP_KEY, &oid)?;
        }
        wtxn.commit()?;

        self.wake_waiters(&oid);
        Ok(oid)
    }

    fn wake_waiters(&self, oid: &str) {
        if let Some(slots) = self.waiters.lock().remove(oid) {
            for (_, tx) in slots {
                let _ = tx.send(());
            }
        }
    }

    /// Returns a wait handle completed the next time `oid` is
    /// `put_object`'d. Multiple concurrent waiters on the same id are
    /// supported; each completes at most once. Dropping the handle
    /// before it fires (timeout, cancellation) deregisters its slot so
    /// nothing leaks for an object that never arrives (§4.2, §9).
    pub fn event_for(&self, oid: &ObjectId) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let token = self.next_waiter_token.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().entry(oid.clone()).or_default().insert(token, tx);
        Waiter { oid: oid.clone(), token, table: self.waiters.clone(), rx }
    }
}
