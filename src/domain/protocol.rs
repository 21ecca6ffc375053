//! Wire protocol: command envelopes exchanged over the message endpoint.
//!
//! Every envelope is a JSON object whose `_` field names the command. The
//! inbound and outbound catalogs are modeled as internally tagged enums so a
//! malformed or unknown command surfaces as a deserialization error at the
//! edge.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command value of the authenticator's challenge reply. Public so
/// downstream consumers can match on it.
pub const COMMAND_AUTH: &str = "AUTH";
/// Command value of the widget's activation request.
pub const COMMAND_CHECK: &str = "CHECK";
/// Command value of the broker's activation acknowledgment.
pub const COMMAND_READY: &str = "READY";

/// Commands accepted from either client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "_")]
pub enum ClientCommand {
    /// Authenticator opening move; answered with the encrypted session token.
    #[serde(rename = "AUTH_INIT")]
    AuthInit,
    /// Widget activation: `session_id` is the decrypted INIT token value.
    #[serde(rename = "CHECK")]
    Check { session_id: String, alias: String },
    /// Authenticator rendezvous: `session_id` carries the clientSessionId
    /// issued to the widget by READY.
    #[serde(rename = "HELLO")]
    Hello { session_id: String, alias: String },
    /// Challenge reply: `challenge_signed` is `decryptedHex|signatureHex`.
    #[serde(rename = "AUTH")]
    Auth {
        alias: String,
        challenge_signed: String,
        #[serde(default)]
        fields: serde_json::Value,
    },
    /// User refused the pairing on the authenticator.
    #[serde(rename = "AUTH_DECLINED")]
    AuthDeclined,
    /// Opaque token forwarded to `on_success`; stored on the session.
    #[serde(rename = "CURRENT_USER_TOKEN")]
    CurrentUserToken { payload: serde_json::Value },
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthInit => "AUTH_INIT",
            Self::Check { .. } => COMMAND_CHECK,
            Self::Hello { .. } => "HELLO",
            Self::Auth { .. } => COMMAND_AUTH,
            Self::AuthDeclined => "AUTH_DECLINED",
            Self::CurrentUserToken { .. } => "CURRENT_USER_TOKEN",
        }
    }
}

/// Payload of the AUTH_INIT reply.
#[derive(Debug, Clone, Serialize)]
pub struct InitPayload {
    /// Project identifier of this broker.
    pub id: Uuid,
    /// `sessionId` encrypted under the shared secret code.
    pub token: String,
}

/// Payload of the CHALLENGE message.
#[derive(Debug, Clone, Serialize)]
pub struct ChallengePayload {
    /// RSA-encrypted challenge secret, hex.
    pub challenge: String,
    /// Field list the authenticator should include with AUTH.
    pub fields: String,
}

/// Payload of the terminal AUTH_RESULT message.
#[derive(Debug, Clone, Serialize)]
pub struct GrantPayload {
    pub token: String,
    pub linked_id: String,
}

/// Messages emitted by the broker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "_")]
pub enum ServerMessage {
    #[serde(rename = "AUTH_INIT")]
    AuthInit { payload: InitPayload },
    #[serde(rename = "READY")]
    Ready { client_session_id: Uuid },
    #[serde(rename = "ACTIVATED")]
    Activated,
    #[serde(rename = "CHALLENGE")]
    Challenge {
        message: String,
        payload: ChallengePayload,
    },
    #[serde(rename = "AUTH_RESULT")]
    AuthResult {
        message: String,
        payload: GrantPayload,
    },
    #[serde(rename = "AUTH_DECLINED")]
    AuthDeclined,
    #[serde(rename = "CONNECTION_FAILED")]
    ConnectionFailed,
    #[serde(rename = "ERROR")]
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Frames handed to a connection's writer task.
#[derive(Debug)]
pub enum OutboundFrame {
    Message(ServerMessage),
    Ping,
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_init() {
        let cmd: ClientCommand = serde_json::from_str(r#"{"_":"AUTH_INIT"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::AuthInit));
        assert_eq!(cmd.name(), "AUTH_INIT");
    }

    #[test]
    fn test_parse_check() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"_":"CHECK","session_id":"abc","alias":"alice"}"#).unwrap();
        match cmd {
            ClientCommand::Check { session_id, alias } => {
                assert_eq!(session_id, "abc");
                assert_eq!(alias, "alice");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_auth_defaults_fields() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"_":"AUTH","alias":"alice","challenge_signed":"aa|bb"}"#)
                .unwrap();
        match cmd {
            ClientCommand::Auth { fields, .. } => assert!(fields.is_null()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_unknown_command_fails() {
        let result = serde_json::from_str::<ClientCommand>(r#"{"_":"REBOOT"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_missing_fields_fails() {
        let result = serde_json::from_str::<ClientCommand>(r#"{"_":"CHECK","alias":"alice"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_ready_discriminator() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(ServerMessage::Ready {
            client_session_id: id,
        })
        .unwrap();
        assert_eq!(json["_"], COMMAND_READY);
        assert_eq!(json["client_session_id"], id.to_string());
    }

    #[test]
    fn test_serialize_auth_result() {
        let json = serde_json::to_value(ServerMessage::AuthResult {
            message: "welcome".to_string(),
            payload: GrantPayload {
                token: "tok".to_string(),
                linked_id: String::new(),
            },
        })
        .unwrap();
        assert_eq!(json["_"], "AUTH_RESULT");
        assert_eq!(json["message"], "welcome");
        assert_eq!(json["payload"]["token"], "tok");
        assert_eq!(json["payload"]["linked_id"], "");
    }

    #[test]
    fn test_serialize_error() {
        let json = serde_json::to_value(ServerMessage::error("access denied")).unwrap();
        assert_eq!(json["_"], "ERROR");
        assert_eq!(json["message"], "access denied");
    }

    #[test]
    fn test_serialize_unit_messages() {
        assert_eq!(
            serde_json::to_value(ServerMessage::Activated).unwrap()["_"],
            "ACTIVATED"
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::ConnectionFailed).unwrap()["_"],
            "CONNECTION_FAILED"
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::AuthDeclined).unwrap()["_"],
            "AUTH_DECLINED"
        );
    }
}
