use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::objectid::{id, ObjectId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Outpoint {
    pub txid: ObjectId,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxInput {
    pub outpoint: Outpoint,
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    pub pubkey: String,
    pub value: u64,
}

/// Either shape; `inputs` and `height` are mutually exclusive and
/// presence of `height` distinguishes a coinbase transaction (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<TxInput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.height.is_some()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Transaction always serializes")
    }

    pub fn id(&self) -> ObjectId {
        id(&self.to_value())
    }

    /// A copy of this transaction with every input's `sig` field
    /// replaced by `null`, canonicalized for signature verification
    /// (§4.4 step 3c).
    pub fn with_sigs_nulled(&self) -> Value {
        let mut v = self.to_value();
        if let Some(inputs) = v.get_mut("inputs").and_then(|i| i.as_array_mut()) {
            for input in inputs.iter_mut() {
                input["sig"] = json!(null);
            }
        }
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_has_no_inputs_field_when_serialized() {
        let tx = Transaction {
            ty: "transaction".to_string(),
            inputs: None,
            height: Some(1),
            outputs: vec![TxOutput { pubkey: "ab".repeat(32), value: 50_000_000_000_000 }],
        };
        let v = tx.to_value();
        assert!(v.get("inputs").is_none());
        assert_eq!(v["height"], 1);
    }

    #[test]
    fn sig_nulling_only_touches_inputs() {
        let tx = Transaction {
            ty: "transaction".to_string(),
            inputs: Some(vec![TxInput {
                outpoint: Outpoint { txid: "a".repeat(64), index: 0 },
                sig: "b".repeat(128),
            }]),
            height: None,
            outputs: vec![],
        };
        let nulled = tx.with_sigs_nulled();
        assert!(nulled["inputs"][0]["sig"].is_null());
    }
}
