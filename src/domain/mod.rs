//! Domain layer containing core broker types, traits, and error definitions.

pub mod error;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{BrokerError, ConfigError, CryptoError, ProtocolError, RegistryError};
pub use protocol::{
    ChallengePayload, ClientCommand, GrantPayload, InitPayload, OutboundFrame, ServerMessage,
    COMMAND_AUTH, COMMAND_CHECK, COMMAND_READY,
};
pub use traits::{AuthHooks, RecordRegistry};
pub use types::{
    AuthAttempt, AuthGrant, BrokerConfig, RegistryConfig, Session, SessionStage, TlsMaterial,
    UserKeys, AUTHORIZATION_TIME_FRAME, CHALLENGE_SECRET_LEN, DEFAULT_PORT, SOCKET_PING_TIMEOUT,
};
