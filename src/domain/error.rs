//! Broker error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Bad key material: {0}")]
    BadKeyMaterial(String),
    #[error("Encryption failed: {0}")]
    Encrypt(String),
    #[error("Token encoding failed: {0}")]
    Token(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("RPC call failed: {0}")]
    Rpc(String),
    #[error("user not found")]
    UserNotFound(String),
    #[error("Malformed registry record: {0}")]
    BadRecord(String),
    #[error("Timeout: {0}")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{0}")]
    BadInput(String),
    #[error("{0}")]
    StateViolation(String),
    #[error("user alias do not match")]
    PeerMismatch,
    #[error("access denied")]
    AccessDenied,
    #[error("{0}")]
    SessionNotFound(String),
}

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Callback failed: {0}")]
    Callback(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Protocol(ProtocolError::BadInput(err.to_string()))
    }
}

impl BrokerError {
    /// Whether this failure condemns both sides of a pairing, or only the
    /// connection it was raised on.
    #[must_use]
    pub fn condemns_peer(&self) -> bool {
        matches!(
            self,
            BrokerError::Protocol(ProtocolError::PeerMismatch)
                | BrokerError::Protocol(ProtocolError::AccessDenied)
        )
    }
}
