use std::collections::HashSet;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde_json::Value;

use crate::canonical::canonicalize;
use crate::error::InvalidTx;
use crate::schema;
use crate::store::ObjectStore;
use crate::tx::Transaction;

pub struct Totals {
    pub total_in: u64,
    pub total_out: u64,
}

fn verify_signature(pubkey_hex: &str, msg: &[u8], sig_hex: &str) -> bool {
    let Ok(pk_bytes) = hex::decode(pubkey_hex) else { return false };
    let Ok(pk_array) = <[u8; 32]>::try_from(pk_bytes.as_slice()) else { return false };
    let Ok(public_key) = VerifyingKey::from_bytes(&pk_array) else { return false };

    let Ok(sig_bytes) = hex::decode(sig_hex) else { return false };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else { return false };
    let signature = Signature::from_bytes(&sig_array);

    public_key.verify(msg, &signature).is_ok()
}

/// `validate(tx, store) -> {total_in, total_out}` or `InvalidTx` (§4.4).
pub fn validate(tx_value: &Value, store: &ObjectStore) -> Result<Totals, InvalidTx> {
    schema::validate_transaction_shape(tx_value).map_err(|e| InvalidTx::new(e.to_string()))?;
    let tx: Transaction = serde_json::from_value(tx_value.clone())
        .map_err(|e| InvalidTx::new(format!("malformed transaction: {e}")))?;

    if tx.is_coinbase() {
        // No conservation check here; enforced at block level (§4.6 step 10).
        return Ok(Totals { total_in: 0, total_out: 0 });
    }

    let inputs = tx.inputs.as_ref().expect("non-coinbase tx has inputs");

    let mut seen_outpoints = HashSet::new();
    let mut total_in: u64 = 0;

    let nulled = tx.with_sigs_nulled();
    let nulled_bytes = canonicalize(&nulled);

    for input in inputs {
        let key = (input.outpoint.txid.clone(), input.outpoint.index);
        if !seen_outpoints.insert(key) {
            return Err(InvalidTx::new("multiple inputs with the same outpoint"));
        }

        let prev_value = store
            .get_object(&input.outpoint.txid)
            .map_err(|_| InvalidTx::new(format!("could not find transaction '{}' in object database", input.outpoint.txid)))?;
        let prev_tx: Transaction = serde_json::from_value(prev_value)
            .map_err(|e| InvalidTx::new(format!("stored object '{}' is not a transaction: {e}", input.outpoint.txid)))?;

        let prev_output = prev_tx
            .outputs
            .get(input.outpoint.index as usize)
            .ok_or_else(|| InvalidTx::new("invalid index"))?;

        if !verify_signature(&prev_output.pubkey, &nulled_bytes, &input.sig) {
            return Err(InvalidTx::new("invalid signature"));
        }

        total_in = total_in.saturating_add(prev_output.value);
    }

    let total_out: u64 = tx.outputs.iter().map(|o| o.value).sum();
    if total_in < total_out {
        return Err(InvalidTx::new(
            "sum of input values is smaller than the sum of the specified output values",
        ));
    }

    Ok(Totals { total_in, total_out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use serde_json::json;

    fn store() -> (ObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn coinbase_is_accepted_without_signature_checks() {
        let (store, _dir) = store();
        let tx = json!({"type": "transaction", "height": 1, "outputs": [{"pubkey": "a".repeat(64), "value": 1}]});
        let totals = validate(&tx, &store).unwrap();
        assert_eq!(totals.total_in, 0);
    }

    #[test]
    fn spending_valid_signed_input_succeeds() {
        let (store, _dir) = store();
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let pubkey_hex = hex::encode(signing_key.verifying_key().to_bytes());

        let prev = Transaction {
            ty: "transaction".to_string(),
            inputs: None,
            height: Some(1),
            outputs: vec![crate::tx::TxOutput { pubkey: pubkey_hex.clone(), value: 100 }],
        };
        let prev_id = store.put_object(&prev.to_value()).unwrap();

        let mut spending = Transaction {
            ty: "transaction".to_string(),
            inputs: Some(vec![crate::tx::TxInput {
                outpoint: crate::tx::Outpoint { txid: prev_id, index: 0 },
                sig: "0".repeat(128),
            }]),
            height: None,
            outputs: vec![crate::tx::TxOutput { pubkey: pubkey_hex, value: 100 }],
        };
        let nulled = canonicalize(&spending.with_sigs_nulled());
        let signature: Signature = ed25519_dalek::Signer::sign(&signing_key, &nulled);
        spending.inputs.as_mut().unwrap()[0].sig = hex::encode(signature.to_bytes());

        let totals = validate(&spending.to_value(), &store).unwrap();
        assert_eq!(totals.total_in, 100);
        assert_eq!(totals.total_out, 100);
    }

    #[test]
    fn duplicate_outpoints_rejected() {
        let (store, _dir) = store();
        let outpoint = json!({"txid": "a".repeat(64), "index": 0});
        let tx = json!({
            "type": "transaction",
            "inputs": [
                {"outpoint": outpoint, "sig": "0".repeat(128)},
                {"outpoint": outpoint, "sig": "0".repeat(128)},
            ],
            "outputs": [],
        });
        let err = validate(&tx, &store).unwrap_err();
        assert!(err.0.contains("multiple inputs"));
    }
}
