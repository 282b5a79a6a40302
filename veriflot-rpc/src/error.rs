use thiserror::Error;

/// Error taxonomy of the RPC layer. Everything crossing the wire is
/// flattened to its rendered string; nothing here is ever fatal to a
/// running daemon.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("env mismatch")]
    EnvMismatch,

    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),

    #[error("unhandled method: {0}")]
    UnknownMethod(String),

    #[error("malformed input: {0}")]
    BadInput(String),

    #[error("endpoint already exists in host list")]
    DuplicateHost,

    #[error("endpoint does not exist in host list")]
    UnknownHost,

    #[error("identifier already set, mismatch")]
    IdentifierMismatch,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("rpc call timed out")]
    Timeout,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),
}
