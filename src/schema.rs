//! Fixed catalog of shapes (§6). `validate_*` fails with `SchemaError`
//! on the first violation found, walking fields in their declared order.

use serde_json::Value;

use crate::error::SchemaError;

fn err(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::new(path, message)
}

fn require_object<'a>(v: &'a Value, path: &str) -> Result<&'a serde_json::Map<String, Value>, SchemaError> {
    v.as_object().ok_or_else(|| err(path, "expected an object"))
}

fn require_str<'a>(v: &'a Value, path: &str) -> Result<&'a str, SchemaError> {
    v.as_str().ok_or_else(|| err(path, "expected a string"))
}

fn require_field<'a>(obj: &'a serde_json::Map<String, Value>, field: &str, path: &str) -> Result<&'a Value, SchemaError> {
    obj.get(field).ok_or_else(|| err(path, format!("missing required field '{field}'")))
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

pub fn validate_hex64(s: &str, path: &str) -> Result<(), SchemaError> {
    if !is_hex_of_len(s, 64) {
        return Err(err(path, "expected 64 lowercase hex characters"));
    }
    Ok(())
}

fn validate_pubkey(s: &str, path: &str) -> Result<(), SchemaError> {
    if !is_hex_of_len(s, 64) {
        return Err(err(path, "pubkey must be 32 bytes hex (64 chars)"));
    }
    Ok(())
}

fn validate_sig(s: &str, path: &str) -> Result<(), SchemaError> {
    if !is_hex_of_len(s, 128) {
        return Err(err(path, "sig must be 64 bytes hex (128 chars)"));
    }
    Ok(())
}

fn validate_ascii_at_most(s: &str, max: usize, path: &str) -> Result<(), SchemaError> {
    if s.len() > max {
        return Err(err(path, format!("must be at most {max} characters")));
    }
    if !s.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
        return Err(err(path, "must be printable ASCII"));
    }
    Ok(())
}

fn validate_output(v: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = require_object(v, path)?;
    let pubkey = require_str(require_field(obj, "pubkey", path)?, &format!("{path}.pubkey"))?;
    validate_pubkey(pubkey, &format!("{path}.pubkey"))?;
    let value = require_field(obj, "value", path)?
        .as_u64()
        .ok_or_else(|| err(&format!("{path}.value"), "expected a non-negative integer"))?;
    let _ = value;
    Ok(())
}

fn validate_input(v: &Value, path: &str) -> Result<(), SchemaError> {
    let obj = require_object(v, path)?;
    let outpoint = require_object(require_field(obj, "outpoint", path)?, &format!("{path}.outpoint"))?;
    let txid = require_str(require_field(outpoint, "txid", path)?, &format!("{path}.outpoint.txid"))?;
    validate_hex64(txid, &format!("{path}.outpoint.txid"))?;
    let index = require_field(outpoint, "index", path)?
        .as_i64()
        .ok_or_else(|| err(&format!("{path}.outpoint.index"), "expected an integer"))?;
    if index < 0 {
        return Err(err(&format!("{path}.outpoint.index"), "must be >= 0"));
    }
    let sig = require_str(require_field(obj, "sig", path)?, &format!("{path}.sig"))?;
    validate_sig(sig, &format!("{path}.sig"))?;
    Ok(())
}

/// Validates a transaction object (coinbase or regular), §3 / §4.4 step 1.
pub fn validate_transaction_shape(v: &Value) -> Result<(), SchemaError> {
    let obj = require_object(v, "$")?;
    let ty = require_str(require_field(obj, "type", "$")?, "$.type")?;
    if ty != "transaction" {
        return Err(err("$.type", "expected 'transaction'"));
    }

    let outputs = require_field(obj, "outputs", "$")?
        .as_array()
        .ok_or_else(|| err("$.outputs", "expected an array"))?;
    for (i, o) in outputs.iter().enumerate() {
        validate_output(o, &format!("$.outputs[{i}]"))?;
    }

    if let Some(height) = obj.get("height") {
        // Coinbase transaction: presence of `height` distinguishes it.
        let h = height.as_i64().ok_or_else(|| err("$.height", "expected a non-negative integer"))?;
        if h < 0 {
            return Err(err("$.height", "must be >= 0"));
        }
        if obj.contains_key("inputs") {
            return Err(err("$", "coinbase transaction must not have an 'inputs' field"));
        }
    } else {
        let inputs = require_field(obj, "inputs", "$")?
            .as_array()
            .ok_or_else(|| err("$.inputs", "expected an array"))?;
        for (i, inp) in inputs.iter().enumerate() {
            validate_input(inp, &format!("$.inputs[{i}]"))?;
        }
    }

    Ok(())
}

/// Validates a block object, §3 / §4.6 step 1.
pub fn validate_block_shape(v: &Value) -> Result<(), SchemaError> {
    let obj = require_object(v, "$")?;
    let ty = require_str(require_field(obj, "type", "$")?, "$.type")?;
    if ty != "block" {
        return Err(err("$.type", "expected 'block'"));
    }

    let txids = require_field(obj, "txids", "$")?
        .as_array()
        .ok_or_else(|| err("$.txids", "expected an array"))?;
    for (i, t) in txids.iter().enumerate() {
        let s = require_str(t, &format!("$.txids[{i}]"))?;
        validate_hex64(s, &format!("$.txids[{i}]"))?;
    }

    let nonce = require_str(require_field(obj, "nonce", "$")?, "$.nonce")?;
    validate_hex64(nonce, "$.nonce")?;

    let previd_val = require_field(obj, "previd", "$")?;
    if !previd_val.is_null() {
        let previd = require_str(previd_val, "$.previd")?;
        validate_hex64(previd, "$.previd")?;
    }

    require_field(obj, "created", "$")?
        .as_i64()
        .ok_or_else(|| err("$.created", "expected an integer (unix seconds)"))?;

    let target = require_str(require_field(obj, "T", "$")?, "$.T")?;
    validate_hex64(target, "$.T")?;

    if let Some(miner) = obj.get("miner") {
        let s = require_str(miner, "$.miner")?;
        validate_ascii_at_most(s, 128, "$.miner")?;
    }
    if let Some(note) = obj.get("note") {
        let s = require_str(note, "$.note")?;
        validate_ascii_at_most(s, 128, "$.note")?;
    }

    Ok(())
}

/// Dispatches on `type` for any object carried in an `object` message.
pub fn validate_object_shape(v: &Value) -> Result<(), SchemaError> {
    let obj = require_object(v, "$")?;
    let ty = require_str(require_field(obj, "type", "$")?, "$.type")?;
    match ty {
        "transaction" => validate_transaction_shape(v),
        "block" => validate_block_shape(v),
        other => Err(err("$.type", format!("unknown object type '{other}'"))),
    }
}

fn validate_version(s: &str, path: &str) -> Result<(), SchemaError> {
    // "0.8.\d" per §6.
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 3 || parts[0] != "0" || parts[1] != "8" || parts[2].len() != 1 || !parts[2].chars().all(|c| c.is_ascii_digit()) {
        return Err(err(path, "expected version matching '0.8.\\d'"));
    }
    Ok(())
}

fn validate_peer_entry(s: &str, path: &str) -> Result<(), SchemaError> {
    if s.rsplit_once(':').is_none() {
        return Err(err(path, "expected '<host>:<port>'"));
    }
    Ok(())
}

/// Validates an inbound wire message against the tagged-union shape
/// catalog in §6.
pub fn validate_message_shape(v: &Value) -> Result<(), SchemaError> {
    let obj = require_object(v, "$")?;
    let ty = require_str(require_field(obj, "type", "$")?, "$.type")?;
    match ty {
        "hello" => {
            let version = require_str(require_field(obj, "version", "$")?, "$.version")?;
            validate_version(version, "$.version")?;
            require_str(require_field(obj, "agent", "$")?, "$.agent")?;
            Ok(())
        }
        "getpeers" => Ok(()),
        "peers" => {
            let peers = require_field(obj, "peers", "$")?
                .as_array()
                .ok_or_else(|| err("$.peers", "expected an array"))?;
            for (i, p) in peers.iter().enumerate() {
                let s = require_str(p, &format!("$.peers[{i}]"))?;
                validate_peer_entry(s, &format!("$.peers[{i}]"))?;
            }
            Ok(())
        }
        "getobject" => {
            let objectid = require_str(require_field(obj, "objectid", "$")?, "$.objectid")?;
            validate_hex64(objectid, "$.objectid")
        }
        "ihaveobject" => {
            let objectid = require_str(require_field(obj, "objectid", "$")?, "$.objectid")?;
            validate_hex64(objectid, "$.objectid")
        }
        "object" => {
            let object = require_field(obj, "object", "$")?;
            validate_object_shape(object)
        }
        "getchaintip" => Ok(()),
        "chaintip" => {
            let blockid = require_str(require_field(obj, "blockid", "$")?, "$.blockid")?;
            validate_hex64(blockid, "$.blockid")
        }
        "getmempool" => Ok(()),
        "mempool" => {
            let txids = require_field(obj, "txids", "$")?
                .as_array()
                .ok_or_else(|| err("$.txids", "expected an array"))?;
            for (i, t) in txids.iter().enumerate() {
                let s = require_str(t, &format!("$.txids[{i}]"))?;
                validate_hex64(s, &format!("$.txids[{i}]"))?;
            }
            Ok(())
        }
        "error" => {
            require_str(require_field(obj, "error", "$")?, "$.error")?;
            Ok(())
        }
        other => Err(err("$.type", format!("unknown message type '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_requires_version_pattern() {
        let v = json!({"type": "hello", "version": "0.8.0", "agent": "kermapy"});
        assert!(validate_message_shape(&v).is_ok());
        let bad = json!({"type": "hello", "version": "0.9.0", "agent": "kermapy"});
        assert!(validate_message_shape(&bad).is_err());
    }

    #[test]
    fn coinbase_rejects_inputs_field() {
        let v = json!({"type": "transaction", "height": 1, "inputs": [], "outputs": []});
        assert!(validate_transaction_shape(&v).is_err());
    }

    #[test]
    fn note_over_128_chars_rejected() {
        let long_note = "a".repeat(129);
        let v = json!({
            "type": "block", "txids": [], "nonce": "0".repeat(64), "previd": null,
            "created": 1, "T": "0".repeat(64), "note": long_note,
        });
        assert!(validate_block_shape(&v).is_err());
    }

    #[test]
    fn getmempool_has_no_required_fields() {
        let v = json!({"type": "getmempool"});
        assert!(validate_message_shape(&v).is_ok());
    }

    #[test]
    fn unknown_message_type_is_schema_error() {
        let v = json!({"type": "nonsense"});
        assert!(validate_message_shape(&v).is_err());
    }
}
