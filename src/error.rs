use thiserror::Error;

/// Framing/parsing failure: the bytes up to the newline are not valid
/// UTF-8 or not valid JSON.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid utf-8 in message")]
    InvalidUtf8,
    #[error("invalid json: {0}")]
    InvalidJson(String),
}

/// A message or stored object violates its expected shape.
#[derive(Debug, Error)]
#[error("{path}: {message}")]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

/// Transaction-level rejection, always carrying the exact wording the
/// wire protocol expects in an `error` reply.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidTx(pub String);

impl InvalidTx {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Raised by the UTXO engine when applying a block or mempool tx.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UtxoError(pub String);

impl UtxoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A well-shaped message rejected for semantic reasons: bad handshake,
/// second hello, invalid block, resolution timeouts.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    InvalidTx(#[from] InvalidTx),
    #[error(transparent)]
    Utxo(#[from] UtxoError),
    #[error("{0}")]
    Other(String),
}

impl ProtocolError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Connection closed, reset, or EOF mid-message. Logged, never replied to.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures surfaced by the object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage engine error: {0}")]
    Engine(#[from] heed::Error),
    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
