use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{GENESIS_CREATED, GENESIS_MINER, GENESIS_NONCE, GENESIS_NOTE, TARGET};
use crate::objectid::{id, ObjectId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub ty: String,
    pub txids: Vec<ObjectId>,
    pub nonce: String,
    pub previd: Option<ObjectId>,
    pub created: i64,
    #[serde(rename = "T")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Block {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("Block always serializes")
    }

    pub fn id(&self) -> ObjectId {
        id(&self.to_value())
    }

    pub fn is_genesis(&self) -> bool {
        self.previd.is_none()
    }

    /// The single fixed genesis block literal (§3, §9 DESIGN NOTES). Its
    /// id is the network constant `GENESIS_ID`.
    pub fn genesis() -> Block {
        Block {
            ty: "block".to_string(),
            txids: vec![],
            nonce: GENESIS_NONCE.to_string(),
            previd: None,
            created: GENESIS_CREATED,
            target: TARGET.to_string(),
            miner: Some(GENESIS_MINER.to_string()),
            note: Some(GENESIS_NOTE.to_string()),
        }
    }
}

pub static GENESIS_ID: once_cell::sync::Lazy<ObjectId> = once_cell::sync::Lazy::new(|| Block::genesis().id());
