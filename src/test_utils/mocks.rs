//! Mock implementations for testing.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::domain::{
    AuthAttempt, AuthGrant, AuthHooks, BrokerError, RecordRegistry, RegistryError,
};
use crate::infra::crypto::sha256hex;

/// A user identity the way the authenticator app holds it: both RSA private
/// keys, with the public moduli packed into the on-chain mixed seed.
pub struct TestIdentity {
    encrypt_key: RsaPrivateKey,
    sign_key: RsaPrivateKey,
}

impl TestIdentity {
    /// Generate a fresh identity. 2048-bit keygen is slow in debug builds;
    /// prefer [`TestIdentity::shared`] unless the test needs distinct keys.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            encrypt_key: RsaPrivateKey::new(&mut rng, 2048).expect("keygen"),
            sign_key: RsaPrivateKey::new(&mut rng, 2048).expect("keygen"),
        }
    }

    /// Process-wide shared identity.
    #[must_use]
    pub fn shared() -> &'static TestIdentity {
        static IDENTITY: OnceLock<TestIdentity> = OnceLock::new();
        IDENTITY.get_or_init(TestIdentity::generate)
    }

    #[must_use]
    pub fn encrypt_public(&self) -> RsaPublicKey {
        self.encrypt_key.to_public_key()
    }

    #[must_use]
    pub fn sign_public(&self) -> RsaPublicKey {
        self.sign_key.to_public_key()
    }

    /// The packed on-chain record value: encryption modulus, then signing
    /// modulus, `0x`-framed.
    #[must_use]
    pub fn mixed_seed_hex(&self) -> String {
        use rsa::traits::PublicKeyParts;
        let mut bytes = self.encrypt_key.n().to_bytes_be();
        bytes.extend_from_slice(&self.sign_key.n().to_bytes_be());
        format!("0x{}", hex::encode(bytes))
    }

    /// Play the authenticator's part: open the wrapped challenge secret and
    /// sign it, producing the `decryptedHex|signatureHex` reply.
    #[must_use]
    pub fn answer_challenge(&self, challenge_hex: &str) -> String {
        let wrapped = hex::decode(challenge_hex).expect("challenge hex");
        let secret = self
            .encrypt_key
            .decrypt(Pkcs1v15Encrypt, &wrapped)
            .expect("challenge decrypt");
        let digest = Sha256::digest(&secret);
        let signature = self
            .sign_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .expect("challenge sign");
        format!("{}|{}", hex::encode(&secret), hex::encode(signature))
    }
}

struct MockRegistryState {
    records: HashMap<String, String>,
    requests: Vec<(String, Vec<String>)>,
    fail_with: Option<String>,
    default_response: Option<String>,
}

/// Scripted [`RecordRegistry`] with call recording and failure injection.
pub struct MockRecordRegistry {
    state: Mutex<MockRegistryState>,
}

impl MockRecordRegistry {
    /// No aliases known; every lookup yields the `"0x"` unknown marker.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(MockRegistryState {
                records: HashMap::new(),
                requests: Vec::new(),
                fail_with: None,
                default_response: None,
            }),
        }
    }

    /// Registry knowing one alias.
    #[must_use]
    pub fn with_user(alias: &str, identity: &TestIdentity) -> Self {
        let registry = Self::empty();
        registry.add_user(alias, identity);
        registry
    }

    /// Every lookup yields `mixed`, regardless of alias.
    #[must_use]
    pub fn returning(mixed: &str) -> Self {
        let registry = Self::empty();
        registry.state.lock().unwrap().default_response = Some(mixed.to_string());
        registry
    }

    /// Every call fails with an RPC error.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        let registry = Self::empty();
        registry.state.lock().unwrap().fail_with = Some(message.to_string());
        registry
    }

    pub fn add_user(&self, alias: &str, identity: &TestIdentity) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(sha256hex(alias.as_bytes()), identity.mixed_seed_hex());
    }

    /// The most recent `(alias_hash, names)` request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<(String, Vec<String>)> {
        self.state.lock().unwrap().requests.last().cloned()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }
}

#[async_trait]
impl RecordRegistry for MockRecordRegistry {
    async fn health_check(&self) -> Result<(), BrokerError> {
        let state = self.state.lock().unwrap();
        if let Some(msg) = &state.fail_with {
            return Err(BrokerError::Registry(RegistryError::Rpc(msg.clone())));
        }
        Ok(())
    }

    async fn get_record_hashed(
        &self,
        alias_hash: &str,
        names: &[String],
    ) -> Result<String, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state
            .requests
            .push((alias_hash.to_string(), names.to_vec()));

        if let Some(msg) = &state.fail_with {
            return Err(BrokerError::Registry(RegistryError::Rpc(msg.clone())));
        }
        if let Some(mixed) = state.records.get(alias_hash) {
            return Ok(mixed.clone());
        }
        Ok(state
            .default_response
            .clone()
            .unwrap_or_else(|| "0x".to_string()))
    }
}

struct HooksState {
    validations: Vec<serde_json::Value>,
    attempts: Vec<AuthAttempt>,
    grant: AuthGrant,
    user_id: Option<String>,
    fail_validate: Option<String>,
    fail_success: Option<String>,
}

/// [`AuthHooks`] that records every invocation and answers from a script.
pub struct RecordingHooks {
    state: Mutex<HooksState>,
}

impl RecordingHooks {
    /// Hooks that grant every verified attempt a fixed token.
    #[must_use]
    pub fn granting(token: &str) -> Self {
        Self {
            state: Mutex::new(HooksState {
                validations: Vec::new(),
                attempts: Vec::new(),
                grant: AuthGrant::granted(token),
                user_id: None,
                fail_validate: None,
                fail_success: None,
            }),
        }
    }

    /// Hooks whose `on_success` denies with `reason`.
    #[must_use]
    pub fn denying(reason: &str) -> Self {
        let hooks = Self::granting("");
        hooks.state.lock().unwrap().grant = AuthGrant::denied(reason);
        hooks
    }

    /// Hooks whose `on_success` fails outright.
    #[must_use]
    pub fn failing_success(message: &str) -> Self {
        let hooks = Self::granting("");
        hooks.state.lock().unwrap().fail_success = Some(message.to_string());
        hooks
    }

    /// Hooks whose `on_user_validate` fails outright.
    #[must_use]
    pub fn failing_validate(message: &str) -> Self {
        let hooks = Self::granting("");
        hooks.state.lock().unwrap().fail_validate = Some(message.to_string());
        hooks
    }

    /// Script the user id returned by `on_user_validate`.
    #[must_use]
    pub fn with_user_id(self, user_id: &str) -> Self {
        self.state.lock().unwrap().user_id = Some(user_id.to_string());
        self
    }

    #[must_use]
    pub fn attempts(&self) -> Vec<AuthAttempt> {
        self.state.lock().unwrap().attempts.clone()
    }

    #[must_use]
    pub fn validations(&self) -> Vec<serde_json::Value> {
        self.state.lock().unwrap().validations.clone()
    }
}

#[async_trait]
impl AuthHooks for RecordingHooks {
    async fn on_user_validate(
        &self,
        user_data: &serde_json::Value,
    ) -> Result<Option<String>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.validations.push(user_data.clone());
        if let Some(msg) = &state.fail_validate {
            return Err(BrokerError::Callback(msg.clone()));
        }
        Ok(state.user_id.clone())
    }

    async fn on_success(&self, attempt: AuthAttempt) -> Result<AuthGrant, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.attempts.push(attempt);
        if let Some(msg) = &state.fail_success {
            return Err(BrokerError::Callback(msg.clone()));
        }
        Ok(state.grant.clone())
    }
}
