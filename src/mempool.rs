use std::collections::HashMap;

use crate::block::Block;
use crate::error::StoreError;
use crate::store::ObjectStore;
use crate::tx::Transaction;
use crate::utxo::{self, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Pending,
    InChain,
}

/// UTXO-consistent pending set, rebuilt across chaintip changes (§4.8).
pub struct Mempool {
    store: ObjectStore,
    entries: HashMap<String, TxState>,
    utxo_tmp: Snapshot,
    chaintip: Option<String>,
}

fn load_block(store: &ObjectStore, id: &str) -> Result<Block, StoreError> {
    let value = store.get_object(id)?;
    serde_json::from_value(value).map_err(StoreError::from)
}

fn load_tx(store: &ObjectStore, id: &str) -> Result<Transaction, StoreError> {
    let value = store.get_object(id)?;
    serde_json::from_value(value).map_err(StoreError::from)
}

impl Mempool {
    pub fn new(store: ObjectStore) -> Result<Self, StoreError> {
        let mut mempool = Self {
            store,
            entries: HashMap::new(),
            utxo_tmp: Snapshot::new(),
            chaintip: None,
        };
        mempool.init()?;
        Ok(mempool)
    }

    /// Reads the chaintip; populates `utxo_tmp` and marks every txid on
    /// the chain `InChain` (§4.8 `init`).
    pub fn init(&mut self) -> Result<(), StoreError> {
        self.entries.clear();
        self.chaintip = self.store.get_chaintip()?;
        match &self.chaintip {
            None => {
                self.utxo_tmp = Snapshot::new();
            }
            Some(tip) => {
                self.utxo_tmp = self.store.get_utxo(tip)?;
                let mut cursor = Some(tip.clone());
                while let Some(id) = cursor {
                    let block = load_block(&self.store, &id)?;
                    for txid in &block.txids {
                        self.entries.insert(txid.clone(), TxState::InChain);
                    }
                    cursor = block.previd;
                }
            }
        }
        Ok(())
    }

    /// Attempts to apply `txid` to the working UTXO snapshot; marks it
    /// `Pending` on success, leaves the mempool untouched on failure.
    pub fn add_tx(&mut self, txid: &str) {
        if self.entries.contains_key(txid) {
            return;
        }
        let Ok(tx) = load_tx(&self.store, txid) else { return };
        if tx.is_coinbase() {
            // Invariant (§3): the pending set holds only non-coinbase txs.
            return;
        }
        let mut candidate = self.utxo_tmp.clone();
        if utxo::apply_tx(&mut candidate, &tx, txid, &self.store).is_ok() {
            self.utxo_tmp = candidate;
            self.entries.insert(txid.to_string(), TxState::Pending);
        }
    }

    pub fn get_pending(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, state)| **state == TxState::Pending)
            .map(|(txid, _)| txid.clone())
            .collect()
    }

    fn pending_txids(&self) -> Vec<String> {
        self.get_pending()
    }

    fn height_of(&self, id: &str) -> Result<u64, StoreError> {
        self.store.get_height(id)
    }

    fn lowest_common_ancestor(&self, a: &str, b: &str) -> Result<String, StoreError> {
        let mut a_id = a.to_string();
        let mut b_id = b.to_string();
        let mut a_height = self.height_of(&a_id)?;
        let mut b_height = self.height_of(&b_id)?;

        while a_height > b_height {
            a_id = load_block(&self.store, &a_id)?.previd.expect("height>0 implies a parent");
            a_height -= 1;
        }
        while b_height > a_height {
            b_id = load_block(&self.store, &b_id)?.previd.expect("height>0 implies a parent");
            b_height -= 1;
        }
        while a_id != b_id {
            a_id = load_block(&self.store, &a_id)?.previd.expect("distinct chains share genesis");
            b_id = load_block(&self.store, &b_id)?.previd.expect("distinct chains share genesis");
        }
        Ok(a_id)
    }

    /// Collects every non-coinbase txid on the branch from `tip` down to
    /// (exclusive of) `ancestor`.
    fn txids_above(&self, tip: &str, ancestor: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut cursor = tip.to_string();
        while cursor != ancestor {
            let block = load_block(&self.store, &cursor)?;
            for txid in &block.txids {
                let tx = load_tx(&self.store, txid)?;
                if !tx.is_coinbase() {
                    out.push(txid.clone());
                }
            }
            cursor = block.previd.expect("ancestor not reached before genesis");
        }
        Ok(out)
    }

    /// Rebuilds the pending set after a chaintip change (§4.8).
    pub fn handle_chaintip_change(&mut self, new_chaintip: &str) -> Result<(), StoreError> {
        let old_chaintip = self.chaintip.clone();
        let new_block = load_block(&self.store, new_chaintip)?;
        let new_height = self.height_of(new_chaintip)?;

        let is_fast_path = match &old_chaintip {
            Some(old) => new_block.previd.as_deref() == Some(old.as_str()) && new_height == self.height_of(old)? + 1,
            None => false,
        };

        if is_fast_path {
            for txid in &new_block.txids {
                self.entries.insert(txid.clone(), TxState::InChain);
            }
            self.utxo_tmp = self.store.get_utxo(new_chaintip)?;
            self.chaintip = Some(new_chaintip.to_string());

            let previously_pending = self.pending_txids();
            for txid in previously_pending {
                self.add_tx(&txid);
            }
        } else {
            let mut carry_over = Vec::new();
            if let Some(old) = &old_chaintip {
                let ancestor = self.lowest_common_ancestor(old, new_chaintip)?;
                carry_over = self.txids_above(old, &ancestor)?;
            }

            self.init()?;
            self.chaintip = Some(new_chaintip.to_string());

            let previously_pending = self.pending_txids();
            for txid in carry_over.into_iter().chain(previously_pending) {
                self.add_tx(&txid);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_on_fresh_store_has_genesis_as_tip_and_empty_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let mempool = Mempool::new(store).unwrap();
        assert!(mempool.get_pending().is_empty());
    }

    #[test]
    fn add_tx_with_unresolvable_input_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let mut mempool = Mempool::new(store.clone()).unwrap();

        let tx = Transaction {
            ty: "transaction".to_string(),
            inputs: Some(vec![crate::tx::TxInput {
                outpoint: crate::tx::Outpoint { txid: "a".repeat(64), index: 0 },
                sig: "b".repeat(128),
            }]),
            height: None,
            outputs: vec![],
        };
        let txid = store.put_object(&tx.to_value()).unwrap();
        mempool.add_tx(&txid);
        assert!(mempool.get_pending().is_empty());
    }

    #[test]
    fn add_tx_never_admits_a_coinbase() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let mut mempool = Mempool::new(store.clone()).unwrap();

        let coinbase = Transaction {
            ty: "transaction".to_string(),
            inputs: None,
            height: Some(1),
            outputs: vec![crate::tx::TxOutput { pubkey: "c".repeat(64), value: 100 }],
        };
        let coinbase_id = store.put_object(&coinbase.to_value()).unwrap();
        mempool.add_tx(&coinbase_id);
        assert!(mempool.get_pending().is_empty());
    }
}
