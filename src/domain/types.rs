//! Core broker types: session records, pairing stages, and configuration.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine;
use rsa::RsaPublicKey;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::error::ConfigError;
use super::protocol::{OutboundFrame, ServerMessage};

/// Default listener port.
pub const DEFAULT_PORT: u16 = 31313;

/// Bounded window within which a pairing must complete, measured from
/// session creation.
pub const AUTHORIZATION_TIME_FRAME: Duration = Duration::from_secs(120);

/// Interval of the liveness sweep: connections whose previous ping went
/// unanswered are reaped on the next tick.
pub const SOCKET_PING_TIMEOUT: Duration = Duration::from_secs(30);

/// Length of the random challenge secret.
pub const CHALLENGE_SECRET_LEN: usize = 128;

/// Expected length of a decoded AES secret code (AES-256).
const SECRET_CODE_LEN: usize = 32;

/// Stage of a session in the pairing state machine.
///
/// The authenticator side walks `New → Inited` on its first connection, then
/// `New → Challenged → Done` on the second; the widget side walks
/// `New → Activated → Paired → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStage {
    /// Connection accepted, no command handled yet
    #[default]
    New,
    /// AUTH_INIT answered; record persists detached until CHECK or expiry
    Inited,
    /// Widget activated by CHECK, waiting for the authenticator's HELLO
    Activated,
    /// Widget linked to an authenticator session
    Paired,
    /// Challenge issued, waiting for AUTH
    Challenged,
    /// Terminal: a final response has been sent
    Done,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Inited => "inited",
            Self::Activated => "activated",
            Self::Paired => "paired",
            Self::Challenged => "challenged",
            Self::Done => "done",
        }
    }

    /// Terminal stages accept no further commands.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Broker-side state for one live client connection.
///
/// `peer` holds the paired session's `client_id` rather than a direct
/// reference; it is dereferenced through the session registry on use, so a
/// closed peer connection can never dangle.
pub struct Session {
    pub client_id: Uuid,
    pub session_id: Uuid,
    pub client_session_id: Option<Uuid>,
    pub alias: Option<String>,
    pub user_id: Option<String>,
    pub peer: Option<Uuid>,
    pub secret: Option<Vec<u8>>,
    pub public_key_sign: Option<RsaPublicKey>,
    pub current_user_token: Option<serde_json::Value>,
    pub stage: SessionStage,
    pub alive: bool,
    pub created_at: Instant,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    reaper: Option<AbortHandle>,
}

impl Session {
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            client_session_id: None,
            alias: None,
            user_id: None,
            peer: None,
            secret: None,
            public_key_sign: None,
            current_user_token: None,
            stage: SessionStage::New,
            alive: true,
            created_at: Instant::now(),
            outbound: Some(outbound),
            reaper: None,
        }
    }

    /// Whether a writer is still attached to this record. Detached records
    /// (after the AUTH_INIT reply) survive their connection.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.outbound.is_some()
    }

    /// Enqueue a message for the connection. Sends to a detached or already
    /// closed connection are dropped silently.
    pub fn send(&self, message: ServerMessage) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(OutboundFrame::Message(message));
        }
    }

    /// Enqueue a transport-level ping.
    pub fn send_ping(&self) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(OutboundFrame::Ping);
        }
    }

    /// Enqueue a close frame and detach the writer, keeping the record.
    pub fn detach(&mut self) {
        if let Some(tx) = self.outbound.take() {
            let _ = tx.send(OutboundFrame::Close);
        }
    }

    /// Enqueue a close frame without detaching; used on finalization where
    /// the record is removed right after.
    pub fn send_close(&self) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(OutboundFrame::Close);
        }
    }

    pub fn set_reaper(&mut self, handle: AbortHandle) {
        self.reaper = Some(handle);
    }

    /// Cancel the authorization-window reaper, if still pending.
    pub fn cancel_reaper(&mut self) {
        if let Some(handle) = self.reaper.take() {
            handle.abort();
        }
    }
}

/// The two RSA-2048 public keys anchored on chain for one alias.
#[derive(Debug, Clone)]
pub struct UserKeys {
    /// Wraps the challenge secret; only the authenticator can open it.
    pub encrypt: RsaPublicKey,
    /// Verifies the authenticator's signature over the secret.
    pub sign: RsaPublicKey,
}

/// Input handed to `AuthHooks::on_success` after a verified challenge.
#[derive(Debug, Clone, Serialize)]
pub struct AuthAttempt {
    pub alias: String,
    /// Fields the authenticator included with AUTH, as requested via the
    /// broker's `fields` configuration.
    pub fields: serde_json::Value,
    pub current_user_token: Option<serde_json::Value>,
}

/// Relying-party verdict minted by `on_success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGrant {
    /// Project-specific token delivered to the widget.
    pub token: String,
    #[serde(default)]
    pub linked_id: String,
    /// A populated error denies the authentication despite a valid challenge.
    #[serde(default)]
    pub error: Option<String>,
}

impl AuthGrant {
    #[must_use]
    pub fn granted(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            linked_id: String::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            linked_id: String::new(),
            error: Some(reason.into()),
        }
    }
}

/// TLS material for the listener. When present, the endpoint is served over
/// rustls; otherwise plaintext.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Configuration for the blockchain registry RPC client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: String::new(),
            timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Broker construction parameters.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Enables verbose structured logging.
    pub debug: bool,
    /// Listener port.
    pub port: u16,
    /// Project identifier echoed in the AUTH_INIT reply.
    pub project_id: Uuid,
    /// Base64-encoded AES-256 key wrapping the sessionId into the INIT token.
    pub secret_code: SecretString,
    /// Opaque string echoed in CHALLENGE; names the fields the authenticator
    /// should include with AUTH.
    pub fields: String,
    /// Optional TLS material for the listener.
    pub ssl: Option<TlsMaterial>,
    /// Authorization window per session.
    pub auth_window: Duration,
    /// Liveness sweep interval.
    pub ping_interval: Duration,
    pub registry: RegistryConfig,
}

impl BrokerConfig {
    /// Build a validated configuration. Fails fast on a malformed project id
    /// or secret code.
    pub fn new(project_id: &str, secret_code: &str) -> Result<Self, ConfigError> {
        let project_id =
            Uuid::parse_str(project_id).map_err(|e| ConfigError::InvalidValue {
                key: "project_id".to_string(),
                message: e.to_string(),
            })?;
        let config = Self {
            debug: false,
            port: DEFAULT_PORT,
            project_id,
            secret_code: SecretString::from(secret_code.to_string()),
            fields: String::new(),
            ssl: None,
            auth_window: AUTHORIZATION_TIME_FRAME,
            ping_interval: SOCKET_PING_TIMEOUT,
            registry: RegistryConfig::default(),
        };
        config.secret_key()?;
        Ok(config)
    }

    /// Read configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_id = std::env::var("PAIRGATE_PROJECT_ID")
            .map_err(|_| ConfigError::MissingEnvVar("PAIRGATE_PROJECT_ID".to_string()))?;
        let secret_code = std::env::var("PAIRGATE_SECRET_CODE")
            .map_err(|_| ConfigError::MissingEnvVar("PAIRGATE_SECRET_CODE".to_string()))?;

        let mut config = Self::new(&project_id, &secret_code)?;

        config.debug = std::env::var("PAIRGATE_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if let Ok(port) = std::env::var("PAIRGATE_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PAIRGATE_PORT".to_string(),
                message: format!("not a port number: {port}"),
            })?;
        }
        config.fields = std::env::var("PAIRGATE_FIELDS").unwrap_or_default();

        let cert = std::env::var("PAIRGATE_TLS_CERT").ok();
        let key = std::env::var("PAIRGATE_TLS_KEY").ok();
        config.ssl = match (cert, key) {
            (Some(cert), Some(key)) => Some(TlsMaterial {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "PAIRGATE_TLS_CERT/PAIRGATE_TLS_KEY".to_string(),
                    message: "both cert and key must be set for TLS".to_string(),
                })
            }
        };

        if let Ok(secs) = std::env::var("PAIRGATE_AUTH_WINDOW_SECS") {
            config.auth_window = parse_secs("PAIRGATE_AUTH_WINDOW_SECS", &secs)?;
        }
        if let Ok(secs) = std::env::var("PAIRGATE_PING_INTERVAL_SECS") {
            config.ping_interval = parse_secs("PAIRGATE_PING_INTERVAL_SECS", &secs)?;
        }
        if let Ok(url) = std::env::var("REGISTRY_RPC_URL") {
            config.registry.rpc_url = url;
        }
        if let Ok(contract) = std::env::var("REGISTRY_CONTRACT") {
            config.registry.contract_address = contract;
        }

        Ok(config)
    }

    /// Decode the base64 secret code into the raw AES-256 key.
    pub fn secret_key(&self) -> Result<[u8; SECRET_CODE_LEN], ConfigError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.secret_code.expose_secret())
            .map_err(|e| ConfigError::InvalidValue {
                key: "secret_code".to_string(),
                message: format!("not valid base64: {e}"),
            })?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| ConfigError::InvalidValue {
                key: "secret_code".to_string(),
                message: format!("key must be {} bytes, got {}", SECRET_CODE_LEN, v.len()),
            })
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("not a number of seconds: {value}"),
        })
}
