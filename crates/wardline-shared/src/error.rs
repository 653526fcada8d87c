use thiserror::Error;

/// Errors raised while encoding or decoding the wire contract.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),
}
