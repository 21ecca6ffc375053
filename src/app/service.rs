//! Pairing service: command dispatch and the two-sided session state machine.
//!
//! Message handling for a connection is strictly sequential (the read loop
//! awaits each dispatch), so a session is only ever mutated by its own
//! dispatcher, with one exception: CHECK writes the widget's record and the
//! originating authenticator record in the same handler. Every mutation path
//! takes the registry-wide lock; the lock is released across suspension
//! points (registry RPC, application callbacks) and guards are re-checked
//! after re-acquiring it.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::app::challenge::ChallengeService;
use crate::app::sessions::{SessionMap, SessionRegistry};
use crate::domain::{
    AuthAttempt, AuthHooks, BrokerConfig, BrokerError, ClientCommand, GrantPayload, OutboundFrame,
    ProtocolError, RecordRegistry, ServerMessage, Session, SessionStage,
};
use crate::domain::{ChallengePayload, InitPayload};
use crate::infra::crypto::aes_encrypt;

/// Greeting carried by the terminal AUTH_RESULT.
const WELCOME_MESSAGE: &str = "welcome";

/// Broker-side pairing logic, shared by every connection.
pub struct PairingService {
    config: BrokerConfig,
    secret_key: [u8; 32],
    sessions: SessionRegistry,
    challenges: ChallengeService,
    hooks: Arc<dyn AuthHooks>,
}

impl PairingService {
    /// Build the service, decoding the AES secret code up front so a
    /// malformed code fails construction instead of the first INIT.
    pub fn new(
        config: BrokerConfig,
        registry: Arc<dyn RecordRegistry>,
        hooks: Arc<dyn AuthHooks>,
    ) -> Result<Self, BrokerError> {
        let secret_key = config.secret_key()?;
        Ok(Self {
            config,
            secret_key,
            sessions: SessionRegistry::new(),
            challenges: ChallengeService::new(registry),
            hooks,
        })
    }

    /// Accept a new connection: create its session record and arm the
    /// authorization-window reaper.
    pub async fn register(self: &Arc<Self>, outbound: mpsc::UnboundedSender<OutboundFrame>) -> Uuid {
        let session = Session::new(outbound);
        let client_id = session.client_id;

        let mut map = self.sessions.lock().await;
        map.insert(session);

        // Arm the reaper while still holding the lock: expire() blocks on it,
        // so the handle is in place before the timer can possibly fire.
        let window = self.config.auth_window;
        let service = Arc::clone(self);
        let reaper = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            service.expire(client_id).await;
        });
        if let Some(session) = map.get_mut(&client_id) {
            session.set_reaper(reaper.abort_handle());
        }

        debug!(client_id = %client_id, live = map.len(), "Session created");
        client_id
    }

    /// Dispatch one inbound frame. Errors terminate the offending session
    /// (and, for pair-condemning errors, its peer).
    #[instrument(skip(self, text), fields(client_id = %client_id))]
    pub async fn handle_message(&self, client_id: Uuid, text: &str) {
        let command = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => command,
            Err(e) => {
                self.fail(client_id, BrokerError::from(e)).await;
                return;
            }
        };

        debug!(command = command.name(), "Dispatching");
        let result = match command {
            ClientCommand::AuthInit => self.handle_auth_init(client_id).await,
            ClientCommand::Check { session_id, alias } => {
                self.handle_check(client_id, &session_id, &alias).await
            }
            ClientCommand::Hello { session_id, alias } => {
                self.handle_hello(client_id, &session_id, &alias).await
            }
            ClientCommand::Auth {
                alias,
                challenge_signed,
                fields,
            } => {
                self.handle_auth(client_id, &alias, &challenge_signed, fields)
                    .await
            }
            ClientCommand::AuthDeclined => self.handle_declined(client_id).await,
            ClientCommand::CurrentUserToken { payload } => {
                self.handle_current_user_token(client_id, payload).await
            }
        };

        if let Err(e) = result {
            self.fail(client_id, e).await;
        }
    }

    /// AUTH_INIT: answer with the project id and the encrypted session
    /// token, then close. The record is detached, not removed; it must
    /// outlive its connection so CHECK can resolve the sessionId.
    async fn handle_auth_init(&self, client_id: Uuid) -> Result<(), BrokerError> {
        let mut map = self.sessions.lock().await;
        let session = map
            .get_mut(&client_id)
            .ok_or_else(|| ProtocolError::SessionNotFound("session not found".into()))?;
        if session.stage != SessionStage::New {
            return Err(ProtocolError::StateViolation("unexpected AUTH_INIT".into()).into());
        }

        let token = aes_encrypt(session.session_id.to_string().as_bytes(), &self.secret_key);
        session.stage = SessionStage::Inited;
        session.send(ServerMessage::AuthInit {
            payload: InitPayload {
                id: self.config.project_id,
                token,
            },
        });
        session.detach();
        info!(session_id = %session.session_id, "Session inited, awaiting activation");
        Ok(())
    }

    /// CHECK: activate the widget against an inited session. The only
    /// cross-record mutation in the protocol; the registry lock is held for
    /// the whole mutation body.
    async fn handle_check(
        &self,
        client_id: Uuid,
        session_id: &str,
        alias: &str,
    ) -> Result<(), BrokerError> {
        let session_id = Uuid::parse_str(session_id)
            .map_err(|_| ProtocolError::BadInput("malformed session id".into()))?;

        {
            let mut map = self.sessions.lock().await;
            let me = map
                .get(&client_id)
                .ok_or_else(|| ProtocolError::SessionNotFound("session not found".into()))?;
            if me.stage != SessionStage::New {
                return Err(ProtocolError::StateViolation("unexpected CHECK".into()).into());
            }
            Self::inited_target(&mut map, &session_id)?;
        }

        // Suspension point: let the relying party vet the user before the
        // session is linked. Guards are re-checked below.
        let user_id = self
            .hooks
            .on_user_validate(&json!({ "alias": alias, "session_id": session_id }))
            .await?;

        let mut map = self.sessions.lock().await;
        if map.get(&client_id).map(|s| s.stage) != Some(SessionStage::New) {
            // Widget vanished or raced a second command while validating.
            return Ok(());
        }
        let target_id = {
            let target = Self::inited_target(&mut map, &session_id)?;
            target.alias = Some(alias.to_string());
            target.client_id
        };

        let client_session_id = Uuid::new_v4();
        let me = map.get_mut(&client_id).expect("checked above");
        me.alias = Some(alias.to_string());
        me.user_id = user_id;
        me.client_session_id = Some(client_session_id);
        me.stage = SessionStage::Activated;
        me.send(ServerMessage::Ready { client_session_id });

        // Push the activation note to the originating authenticator session.
        // Usually detached by now; the send is then dropped silently.
        if let Some(target) = map.get(&target_id) {
            target.send(ServerMessage::Activated);
        }

        info!(alias = %alias, client_session_id = %client_session_id, "Session activated");
        Ok(())
    }

    /// Locate an INIT session still eligible for activation.
    fn inited_target<'a>(
        map: &'a mut SessionMap,
        session_id: &Uuid,
    ) -> Result<&'a mut Session, BrokerError> {
        let target = map
            .find_by_session_id_mut(session_id)
            .ok_or_else(|| ProtocolError::SessionNotFound("session not found".into()))?;
        if target.alias.is_some() {
            return Err(ProtocolError::StateViolation("session is already activated".into()).into());
        }
        if target.stage != SessionStage::Inited {
            return Err(ProtocolError::SessionNotFound("session not found".into()).into());
        }
        Ok(target)
    }

    /// HELLO: the authenticator's second connection adopts the activated
    /// widget as peer and receives the challenge.
    async fn handle_hello(
        &self,
        client_id: Uuid,
        client_session_id: &str,
        alias: &str,
    ) -> Result<(), BrokerError> {
        let client_session_id = Uuid::parse_str(client_session_id)
            .map_err(|_| ProtocolError::BadInput("malformed session id".into()))?;

        {
            let mut map = self.sessions.lock().await;
            let me = map
                .get(&client_id)
                .ok_or_else(|| ProtocolError::SessionNotFound("session not found".into()))?;
            if me.stage != SessionStage::New {
                return Err(ProtocolError::StateViolation("unexpected HELLO".into()).into());
            }
            let widget = map
                .find_by_client_session_id_mut(&client_session_id)
                .ok_or_else(|| {
                    ProtocolError::SessionNotFound("client session not found".into())
                })?;
            if widget.stage != SessionStage::Activated {
                return Err(
                    ProtocolError::StateViolation("session is already paired".into()).into(),
                );
            }
        }

        // Suspension point: blockchain lookup + challenge build. A widget
        // disconnect during this await surfaces as the re-check below.
        let challenge = self.challenges.create(alias).await?;

        let mut map = self.sessions.lock().await;
        if map.get(&client_id).map(|s| s.stage) != Some(SessionStage::New) {
            return Ok(());
        }
        let widget_id = {
            let widget = map
                .find_by_client_session_id_mut(&client_session_id)
                .ok_or_else(|| {
                    ProtocolError::SessionNotFound("client session not found".into())
                })?;
            if widget.stage != SessionStage::Activated {
                return Err(
                    ProtocolError::StateViolation("session is already paired".into()).into(),
                );
            }
            widget.peer = Some(client_id);
            widget.stage = SessionStage::Paired;
            widget.client_id
        };

        let me = map.get_mut(&client_id).expect("checked above");
        me.alias = Some(alias.to_string());
        me.secret = Some(challenge.secret);
        me.public_key_sign = Some(challenge.public_key_sign);
        me.peer = Some(widget_id);
        me.stage = SessionStage::Challenged;
        me.send(ServerMessage::Challenge {
            message: "challenge".to_string(),
            payload: ChallengePayload {
                challenge: challenge.challenge,
                fields: self.config.fields.clone(),
            },
        });

        info!(alias = %alias, "Challenge issued");
        Ok(())
    }

    /// AUTH: verify the challenge reply, consult the relying party, and
    /// finalize both sides with a terminal response.
    async fn handle_auth(
        &self,
        client_id: Uuid,
        alias: &str,
        challenge_signed: &str,
        fields: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let (peer_id, current_user_token) = {
            let mut map = self.sessions.lock().await;
            let me = map
                .get_mut(&client_id)
                .ok_or_else(|| ProtocolError::SessionNotFound("session not found".into()))?;
            if me.stage != SessionStage::Challenged {
                return Err(ProtocolError::StateViolation("unexpected AUTH".into()).into());
            }
            let peer_id = me
                .peer
                .ok_or_else(|| ProtocolError::StateViolation("no active pairing".into()))?;
            // The secret is only live between HELLO and AUTH; consume it now.
            let secret = me
                .secret
                .take()
                .ok_or_else(|| BrokerError::Internal("challenge secret missing".into()))?;
            let public_key_sign = me
                .public_key_sign
                .clone()
                .ok_or_else(|| BrokerError::Internal("signing key missing".into()))?;
            let current_user_token = me.current_user_token.take();

            let peer_alias = map
                .get(&peer_id)
                .and_then(|peer| peer.alias.clone())
                .ok_or_else(|| ProtocolError::SessionNotFound("peer session not found".into()))?;
            if peer_alias != alias {
                return Err(ProtocolError::PeerMismatch.into());
            }
            if !ChallengeService::verify(&secret, &public_key_sign, challenge_signed) {
                return Err(ProtocolError::AccessDenied.into());
            }
            (peer_id, current_user_token)
        };

        // Suspension point: the relying party mints the widget token.
        let grant = self
            .hooks
            .on_success(AuthAttempt {
                alias: alias.to_string(),
                fields,
                current_user_token,
            })
            .await?;

        if let Some(reason) = grant.error {
            warn!(alias = %alias, reason = %reason, "Authentication denied by relying party");
            self.finalize_pair(client_id, peer_id, ServerMessage::error(reason))
                .await;
            return Ok(());
        }

        let result = ServerMessage::AuthResult {
            message: WELCOME_MESSAGE.to_string(),
            payload: GrantPayload {
                token: grant.token,
                linked_id: grant.linked_id,
            },
        };

        let mut map = self.sessions.lock().await;
        match map.get_mut(&client_id) {
            Some(me) if me.stage == SessionStage::Challenged => {
                me.stage = SessionStage::Done;
            }
            // Already finalized (at-most-once), or the authenticator dropped
            // during the callback: deliver to the widget where possible.
            _ => {
                if let Some(widget) = map.remove(&peer_id) {
                    widget.send(result);
                    widget.send_close();
                }
                return Ok(());
            }
        }

        if let Some(widget) = map.remove(&peer_id) {
            widget.send(result.clone());
            widget.send_close();
        }
        if let Some(me) = map.remove(&client_id) {
            me.send(result);
            me.send_close();
        }
        info!(alias = %alias, "Authentication completed");
        Ok(())
    }

    /// AUTH_DECLINED: the user refused on the authenticator; both sides are
    /// told and terminated.
    async fn handle_declined(&self, client_id: Uuid) -> Result<(), BrokerError> {
        let mut map = self.sessions.lock().await;
        let Some(me) = map.remove(&client_id) else {
            return Ok(());
        };
        if let Some(peer_id) = me.peer {
            if let Some(peer) = map.remove(&peer_id) {
                peer.send(ServerMessage::AuthDeclined);
                peer.send_close();
            }
        }
        me.send(ServerMessage::AuthDeclined);
        me.send_close();
        info!(client_id = %client_id, "Pairing declined");
        Ok(())
    }

    /// CURRENT_USER_TOKEN: stash the opaque token on this session for the
    /// upcoming AUTH. Session-scoped rather than process-global, so
    /// concurrent flows cannot bleed tokens into each other.
    async fn handle_current_user_token(
        &self,
        client_id: Uuid,
        payload: serde_json::Value,
    ) -> Result<(), BrokerError> {
        let mut map = self.sessions.lock().await;
        let me = map
            .get_mut(&client_id)
            .ok_or_else(|| ProtocolError::SessionNotFound("session not found".into()))?;
        if me.stage.is_terminal() {
            return Err(ProtocolError::StateViolation("session is closed".into()).into());
        }
        me.current_user_token = Some(payload);
        Ok(())
    }

    /// Transport-level close of a connection. Detached records (after the
    /// AUTH_INIT reply) survive their connection; anything else is reaped
    /// with failure fanout to its peer.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn handle_disconnect(&self, client_id: Uuid) {
        let mut map = self.sessions.lock().await;
        // Look the record up before touching anything: the session may
        // already be gone if a terminal response or the reaper won the race.
        let Some(session) = map.get(&client_id) else {
            return;
        };
        if !session.is_attached() {
            return;
        }
        let session = map.remove(&client_id).expect("present above");
        debug!(stage = %session.stage, "Connection dropped");
        Self::fail_peer_of(&mut map, &session);
    }

    /// Pong received: the connection answered the last ping.
    pub async fn handle_pong(&self, client_id: Uuid) {
        let mut map = self.sessions.lock().await;
        if let Some(session) = map.get_mut(&client_id) {
            session.alive = true;
        }
    }

    /// One liveness pass: reap attached connections whose previous ping went
    /// unanswered, then ping the rest. Returns the number reaped.
    pub async fn sweep_liveness(&self) -> usize {
        let mut map = self.sessions.lock().await;
        let mut dead = Vec::new();
        for session in map.iter_mut() {
            if !session.is_attached() {
                continue;
            }
            if session.alive {
                session.alive = false;
                session.send_ping();
            } else {
                dead.push(session.client_id);
            }
        }

        for client_id in &dead {
            if let Some(session) = map.remove(client_id) {
                warn!(client_id = %client_id, "Ping unanswered, terminating");
                Self::fail_peer_of(&mut map, &session);
                session.send_close();
            }
        }
        dead.len()
    }

    /// Authorization window elapsed without a terminal state.
    async fn expire(&self, client_id: Uuid) {
        let mut map = self.sessions.lock().await;
        let Some(session) = map.remove(&client_id) else {
            return;
        };
        info!(client_id = %client_id, stage = %session.stage, "Authorization window elapsed");
        Self::fail_peer_of(&mut map, &session);
        session.send(ServerMessage::ConnectionFailed);
        session.send_close();
    }

    /// Terminate an erring session, and its peer when the error condemns the
    /// pair. The wire message is the error's display form.
    async fn fail(&self, client_id: Uuid, error: BrokerError) {
        warn!(client_id = %client_id, error = %error, "Terminating session");
        let message = error.to_string();

        let mut map = self.sessions.lock().await;
        let Some(session) = map.remove(&client_id) else {
            return;
        };
        if error.condemns_peer() {
            if let Some(peer_id) = session.peer {
                if let Some(peer) = map.remove(&peer_id) {
                    peer.send(ServerMessage::error(message.clone()));
                    peer.send_close();
                }
            }
        }
        session.send(ServerMessage::error(message));
        session.send_close();
    }

    /// Send one terminal message to both sides of a pair and remove them.
    async fn finalize_pair(&self, client_id: Uuid, peer_id: Uuid, message: ServerMessage) {
        let mut map = self.sessions.lock().await;
        if let Some(peer) = map.remove(&peer_id) {
            peer.send(message.clone());
            peer.send_close();
        }
        if let Some(me) = map.remove(&client_id) {
            me.send(message);
            me.send_close();
        }
    }

    /// Failure fanout: a removed session's peer receives CONNECTION_FAILED
    /// and is terminated too.
    fn fail_peer_of(map: &mut SessionMap, session: &Session) {
        if let Some(peer_id) = session.peer {
            if let Some(peer) = map.remove(&peer_id) {
                peer.send(ServerMessage::ConnectionFailed);
                peer.send_close();
            }
        }
    }

    /// Number of live session records; drives the readiness probe.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
