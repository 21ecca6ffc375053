//! Challenge construction and verification against registry-anchored keys.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::RsaPublicKey;
use tracing::{debug, instrument};

use crate::domain::{
    BrokerError, RecordRegistry, RegistryError, UserKeys, CHALLENGE_SECRET_LEN,
};
use crate::infra::crypto::{rsa_encrypt, rsa_public_from_modulus, rsa_verify, sha256hex, RSA_MODULUS_LEN};

/// Record-name suffix of the encryption public key.
pub const RECORD_SUFFIX_ENC: &str = ":publicEnc";
/// Record-name suffix of the signing public key.
pub const RECORD_SUFFIX_SIGN: &str = ":publicSign";

/// A freshly built challenge. The plaintext secret stays broker-side, bound
/// to the authenticator session; only the wrapped form goes on the wire.
pub struct Challenge {
    pub secret: Vec<u8>,
    /// RSA encryption of the secret under the alias's encryption key, hex.
    pub challenge: String,
    pub public_key_sign: RsaPublicKey,
}

/// Builds challenges and verifies replies.
pub struct ChallengeService {
    registry: Arc<dyn RecordRegistry>,
}

impl ChallengeService {
    #[must_use]
    pub fn new(registry: Arc<dyn RecordRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve the two public keys anchored on chain for `alias`.
    ///
    /// The record names are hashed so on-chain storage stays opaque; both
    /// moduli come back packed in one "mixed" blob, split in half here.
    #[instrument(skip(self))]
    pub async fn user_keys(&self, alias: &str) -> Result<UserKeys, BrokerError> {
        let alias_hash = sha256hex(alias.as_bytes());
        let names = vec![
            sha256hex(format!("{alias}{RECORD_SUFFIX_ENC}").as_bytes()),
            sha256hex(format!("{alias}{RECORD_SUFFIX_SIGN}").as_bytes()),
        ];

        let mixed = self.registry.get_record_hashed(&alias_hash, &names).await?;
        if mixed == "0x" {
            return Err(RegistryError::UserNotFound(alias.to_string()).into());
        }

        let bytes = hex::decode(mixed.trim_start_matches("0x"))
            .map_err(|e| RegistryError::BadRecord(e.to_string()))?;
        if bytes.len() != 2 * RSA_MODULUS_LEN {
            return Err(RegistryError::BadRecord(format!(
                "mixed seed must be {} bytes, got {}",
                2 * RSA_MODULUS_LEN,
                bytes.len()
            ))
            .into());
        }

        let (enc, sign) = bytes.split_at(RSA_MODULUS_LEN);
        Ok(UserKeys {
            encrypt: rsa_public_from_modulus(enc)?,
            sign: rsa_public_from_modulus(sign)?,
        })
    }

    /// Build a challenge for `alias`: 128 random secret bytes, wrapped under
    /// the alias's encryption key.
    #[instrument(skip(self))]
    pub async fn create(&self, alias: &str) -> Result<Challenge, BrokerError> {
        let keys = self.user_keys(alias).await?;

        let mut secret = vec![0u8; CHALLENGE_SECRET_LEN];
        OsRng.fill_bytes(&mut secret);

        let wrapped = rsa_encrypt(&keys.encrypt, &secret)?;
        debug!(alias = %alias, "Challenge built");

        Ok(Challenge {
            secret,
            challenge: hex::encode(wrapped),
            public_key_sign: keys.sign,
        })
    }

    /// Check a challenge reply of the form `decryptedHex|signatureHex`.
    ///
    /// Both conjuncts must hold: the decrypted bytes equal the secret, and
    /// the signature over the secret verifies. Any malformed input is simply
    /// a failed check, never an error.
    #[must_use]
    pub fn verify(secret: &[u8], public_key_sign: &RsaPublicKey, challenge_signed: &str) -> bool {
        let Some((decrypted_hex, signature_hex)) = challenge_signed.split_once('|') else {
            return false;
        };
        let Ok(decrypted) = hex::decode(decrypted_hex) else {
            return false;
        };
        let Ok(signature) = hex::decode(signature_hex) else {
            return false;
        };
        decrypted == secret && rsa_verify(public_key_sign, secret, &signature)
    }
}
