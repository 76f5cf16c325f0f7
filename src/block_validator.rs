use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use crate::block::{Block, GENESIS_ID};
use crate::config::{BLOCK_REWARD, TARGET};
use crate::error::ProtocolError;
use crate::objectid::hex_less_than;
use crate::schema;
use crate::store::ObjectStore;
use crate::tx::Transaction;
use crate::tx_validator;
use crate::utxo::{self, Snapshot};

/// Broadcasts a `getobject` request to every other live connection.
/// Implemented by `Node`/`Connection`; kept as a trait so BlockValidator
/// does not depend on the P2P layer directly.
pub trait Broadcaster: Send + Sync {
    fn broadcast_getobject(&self, oid: &str);
}

fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Waits for `oid` to appear in the store, broadcasting `getobject`
/// first if it isn't already present. Returns `Err(())` on timeout.
/// Shared with the `mempool` message handler (§4.9), which resolves
/// txids the same way before admitting them.
pub(crate) async fn resolve(store: &ObjectStore, broadcaster: &dyn Broadcaster, oid: &str, timeout: Duration) -> Result<(), ()> {
    if store.contains(oid).unwrap_or(false) {
        return Ok(());
    }
    let rx = store.event_for(&oid.to_string());
    broadcaster.broadcast_getobject(oid);
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

/// `validate_block(block) -> new_utxo` or `ProtocolError` (§4.6).
pub async fn validate_block(
    block_value: &Value,
    store: &ObjectStore,
    broadcaster: &dyn Broadcaster,
    timeout: Duration,
) -> Result<Snapshot, ProtocolError> {
    // 1. schema
    schema::validate_block_shape(block_value).map_err(ProtocolError::from)?;
    let block: Block = serde_json::from_value(block_value.clone())
        .map_err(|e| ProtocolError::other(format!("malformed block: {e}")))?;

    // 2. fixed target
    if block.target != TARGET {
        return Err(ProtocolError::other("invalid target"));
    }

    // 3. proof of work
    let bid = block.id();
    if !hex_less_than(&bid, &block.target) {
        return Err(ProtocolError::other("does not satisfy the proof-of-work equation"));
    }

    // 4. resolve txids, concurrently
    let tx_waits = join_all(
        block
            .txids
            .iter()
            .map(|txid| resolve(store, broadcaster, txid, timeout)),
    )
    .await;
    if tx_waits.iter().any(|r| r.is_err()) {
        return Err(ProtocolError::other("contains transactions that could not be received"));
    }

    // 5. resolve parent
    match &block.previd {
        Some(previd) => {
            if resolve(store, broadcaster, previd, timeout).await.is_err() {
                return Err(ProtocolError::other("which parent(-s) could not be received"));
            }
        }
        None => {
            if bid != *GENESIS_ID {
                return Err(ProtocolError::other("stops at a different genesis"));
            }
        }
    }

    // 6 & 7. timestamp checks
    if let Some(previd) = &block.previd {
        let parent_value = store
            .get_object(previd)
            .map_err(|_| ProtocolError::other(format!("unknown parent '{previd}'")))?;
        let parent: Block = serde_json::from_value(parent_value)
            .map_err(|e| ProtocolError::other(format!("stored parent is not a block: {e}")))?;
        if block.created <= parent.created {
            return Err(ProtocolError::other("timestamp not later than of its parent"));
        }
    }
    if block.created > now_seconds() {
        return Err(ProtocolError::other("timestamp in the future"));
    }

    // 8. validate every non-coinbase tx, accumulate fees; track coinbase info
    let mut fees: i128 = 0;
    let mut coinbase_index: Option<usize> = None;
    let mut coinbase_txid: Option<String> = None;
    let mut coinbase_height: Option<u64> = None;
    let mut coinbase_total_out: u64 = 0;

    for (i, txid) in block.txids.iter().enumerate() {
        let tx_value = store
            .get_object(txid)
            .map_err(|_| ProtocolError::other(format!("could not find transaction '{txid}' in object database")))?;
        let tx: Transaction = serde_json::from_value(tx_value.clone())
            .map_err(|e| ProtocolError::other(format!("stored object '{txid}' is not a transaction: {e}")))?;

        if tx.is_coinbase() {
            if coinbase_index.is_some() {
                return Err(ProtocolError::other("a block may contain at most one coinbase transaction"));
            }
            coinbase_index = Some(i);
            coinbase_txid = Some(txid.clone());
            coinbase_height = tx.height;
            coinbase_total_out = tx.outputs.iter().map(|o| o.value).sum();
        } else {
            let totals = tx_validator::validate(&tx_value, store)?;
            fees += totals.total_in as i128 - totals.total_out as i128;
        }
    }

    // 9. new UTXO
    let new_utxo = utxo::next_utxo(&block, store).map_err(ProtocolError::from)?;

    // 10. coinbase rules
    if let (Some(index), Some(coinbase_txid)) = (coinbase_index, &coinbase_txid) {
        if index != 0 {
            return Err(ProtocolError::other("coinbase transaction must be at index 0"));
        }

        let expected_height = match &block.previd {
            None => 0,
            Some(previd) => store
                .get_height(previd)
                .map_err(|_| ProtocolError::other(format!("unknown parent height for '{previd}'")))?
                + 1,
        };
        if coinbase_height != Some(expected_height) {
            return Err(ProtocolError::other("coinbase height does not match block height"));
        }

        for txid in &block.txids {
            if txid == coinbase_txid {
                continue;
            }
            let tx_value = store.get_object(txid).map_err(ProtocolError::from)?;
            let tx: Transaction = serde_json::from_value(tx_value)
                .map_err(|e| ProtocolError::other(format!("malformed transaction: {e}")))?;
            if let Some(inputs) = &tx.inputs {
                if inputs.iter().any(|inp| &inp.outpoint.txid == coinbase_txid) {
                    return Err(ProtocolError::other("coinbase transaction cannot be spent in the same block"));
                }
            }
        }

        let allowance = BLOCK_REWARD as i128 + fees;
        if coinbase_total_out as i128 > allowance {
            return Err(ProtocolError::other(
                "coinbase transaction contains outputs that exceed block rewards and the fees",
            ));
        }
    }

    Ok(new_utxo)
}

impl From<crate::error::StoreError> for ProtocolError {
    fn from(e: crate::error::StoreError) -> Self {
        ProtocolError::other(e.to_string())
    }
}
