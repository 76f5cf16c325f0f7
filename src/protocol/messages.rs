use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed wire messages (§6). Only constructed from a JSON value that has
/// already passed `schema::validate_message_shape` — deeper pattern
/// checks (version regex, hex-length, ASCII bounds) live in `schema`,
/// not in this derive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "hello")]
    Hello { version: String, agent: String },
    #[serde(rename = "getpeers")]
    GetPeers {},
    #[serde(rename = "peers")]
    Peers { peers: Vec<String> },
    #[serde(rename = "getobject")]
    GetObject { objectid: String },
    #[serde(rename = "ihaveobject")]
    IHaveObject { objectid: String },
    #[serde(rename = "object")]
    Object { object: Value },
    #[serde(rename = "getchaintip")]
    GetChainTip {},
    #[serde(rename = "chaintip")]
    ChainTip { blockid: String },
    #[serde(rename = "getmempool")]
    GetMempool {},
    #[serde(rename = "mempool")]
    Mempool { txids: Vec<String> },
    #[serde(rename = "error")]
    Error { error: String },
}

impl Message {
    pub fn hello(agent: &str) -> Self {
        Message::Hello { version: crate::config::VERSION.to_string(), agent: agent.to_string() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Message::Error { error: message.into() }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Message always serializes")
    }

    /// Serializes to a single newline-terminated canonical JSON line, the
    /// unit of wire framing (§4.9).
    pub fn to_line(&self) -> Vec<u8> {
        let mut bytes = crate::canonical::canonicalize(&self.to_value());
        bytes.push(b'\n');
        bytes
    }
}
