use std::collections::HashMap;

use crate::block::Block;
use crate::error::UtxoError;
use crate::store::ObjectStore;
use crate::tx::Transaction;

pub type Snapshot = HashMap<String, u64>;

fn utxo_key(txid: &str, pubkey: &str, index: u32) -> String {
    format!("{txid}_{pubkey}_{index}")
}

fn load_tx(store: &ObjectStore, txid: &str) -> Result<Transaction, UtxoError> {
    let value = store
        .get_object(txid)
        .map_err(|_| UtxoError::new(format!("could not find transaction '{txid}' in object database")))?;
    serde_json::from_value(value).map_err(|e| UtxoError::new(format!("stored object '{txid}' is not a transaction: {e}")))
}

/// Applies a single transaction (coinbase or not) to `utxo` in place:
/// spends declared inputs, adds declared outputs. Used both by the
/// block-level UtxoEngine and, with a private working copy, by the
/// Mempool (§4.5, §4.8).
pub fn apply_tx(utxo: &mut Snapshot, tx: &Transaction, txid: &str, store: &ObjectStore) -> Result<(), UtxoError> {
    if let Some(inputs) = &tx.inputs {
        for input in inputs {
            let prev_tx = load_tx(store, &input.outpoint.txid)?;
            let prev_output = prev_tx
                .outputs
                .get(input.outpoint.index as usize)
                .ok_or_else(|| UtxoError::new(format!("invalid index {} for transaction '{}'", input.outpoint.index, input.outpoint.txid)))?;
            let key = utxo_key(&input.outpoint.txid, &prev_output.pubkey, input.outpoint.index);
            if utxo.remove(&key).is_none() {
                return Err(UtxoError::new(format!("Could not find UTXO entry for key '{key}'")));
            }
        }
    }

    for (j, output) in tx.outputs.iter().enumerate() {
        let key = utxo_key(txid, &output.pubkey, j as u32);
        utxo.insert(key, output.value);
    }

    Ok(())
}

/// Derives the UTXO snapshot for `block` from its parent's snapshot and
/// its transactions (§4.5).
pub fn next_utxo(block: &Block, store: &ObjectStore) -> Result<Snapshot, UtxoError> {
    let mut utxo: Snapshot = match &block.previd {
        None => HashMap::new(),
        Some(previd) => store
            .get_utxo(previd)
            .map_err(|_| UtxoError::new(format!("could not find UTXO snapshot for block '{previd}'")))?,
    };

    for txid in &block.txids {
        let tx = load_tx(store, txid)?;
        apply_tx(&mut utxo, &tx, txid, store)?;
    }

    Ok(utxo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utxo_key_format_is_txid_pubkey_index() {
        assert_eq!(utxo_key("aa", "bb", 0), "aa_bb_0");
    }

    #[test]
    fn spending_missing_key_is_utxo_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();

        let prev_txid = "a".repeat(64);
        let prev_tx = Transaction {
            ty: "transaction".to_string(),
            inputs: None,
            height: Some(1),
            outputs: vec![crate::tx::TxOutput { pubkey: "b".repeat(64), value: 100 }],
        };
        store.put_object(&prev_tx.to_value()).unwrap();

        let spending_tx = Transaction {
            ty: "transaction".to_string(),
            inputs: Some(vec![crate::tx::TxInput {
                outpoint: crate::tx::Outpoint { txid: prev_txid.clone(), index: 0 },
                sig: "c".repeat(128),
            }]),
            height: None,
            outputs: vec![],
        };

        let mut utxo = Snapshot::new();
        // Parent snapshot never credited the output, so spending fails.
        let result = apply_tx(&mut utxo, &spending_tx, "spendingtxid", &store);
        assert!(result.is_err());
    }

    #[test]
    fn coinbase_credits_output_without_spending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        let tx = Transaction {
            ty: "transaction".to_string(),
            inputs: None,
            height: Some(1),
            outputs: vec![crate::tx::TxOutput { pubkey: "d".repeat(64), value: 50 }],
        };
        let mut utxo = Snapshot::new();
        apply_tx(&mut utxo, &tx, "txid1", &store).unwrap();
        assert_eq!(utxo.get(&utxo_key("txid1", &"d".repeat(64), 0)), Some(&50));
    }
}
