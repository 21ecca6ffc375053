//! Cryptographic primitives: hash framing, RSA key reconstruction, and the
//! AES session-token codec.
//!
//! The RSA padding (PKCS#1 v1.5 for both encryption and signatures) and the
//! AES mode (AES-256-CTR, 16-byte random IV) are build-time constants; an
//! interoperating authenticator must use the same modes.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{BigUint, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::domain::CryptoError;

/// Raw byte length of an RSA-2048 modulus.
pub const RSA_MODULUS_LEN: usize = 256;

/// Fixed public exponent of all registry-anchored keys.
const RSA_EXPONENT: u32 = 65537;

const AES_IV_LEN: usize = 16;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// SHA-256 over `data`, framed as `0x` + lowercase hex.
#[must_use]
pub fn sha256hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("0x{}", hex::encode(digest))
}

/// Reconstruct an RSA-2048 public key from a raw big-endian modulus.
pub fn rsa_public_from_modulus(modulus: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    if modulus.len() != RSA_MODULUS_LEN {
        return Err(CryptoError::BadKeyMaterial(format!(
            "modulus must be {} bytes, got {}",
            RSA_MODULUS_LEN,
            modulus.len()
        )));
    }
    RsaPublicKey::new(
        BigUint::from_bytes_be(modulus),
        BigUint::from(RSA_EXPONENT),
    )
    .map_err(|e| CryptoError::BadKeyMaterial(e.to_string()))
}

/// Public-key encryption of `plaintext`. Output differs between invocations
/// (randomized padding).
pub fn rsa_encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    key.encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))
}

/// Verify `signature` over `message` (SHA-256, PKCS#1 v1.5).
#[must_use]
pub fn rsa_verify(key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(message);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .is_ok()
}

/// Encrypt `plaintext` under an AES-256-CTR key with a fresh random IV.
/// Output frame is `hex(iv) || hex(ciphertext)`.
#[must_use]
pub fn aes_encrypt(plaintext: &[u8], key: &[u8; 32]) -> String {
    let mut iv = [0u8; AES_IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let mut buf = plaintext.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut buf);

    format!("{}{}", hex::encode(iv), hex::encode(buf))
}

/// Invert [`aes_encrypt`]. Public so downstream consumers can open the INIT
/// token with the shared secret code.
pub fn aes_decrypt(token: &str, key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let bytes = hex::decode(token).map_err(|e| CryptoError::Token(e.to_string()))?;
    if bytes.len() < AES_IV_LEN {
        return Err(CryptoError::Token(format!(
            "token shorter than the {AES_IV_LEN}-byte IV"
        )));
    }
    let (iv, ciphertext) = bytes.split_at(AES_IV_LEN);

    let iv: [u8; AES_IV_LEN] = iv.try_into().expect("split_at yields exactly the IV");
    let mut buf = ciphertext.to_vec();
    let mut cipher = Aes256Ctr::new(key.into(), (&iv).into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;
    use std::sync::OnceLock;

    // 2048-bit keygen is slow in debug builds; share one pair across tests.
    fn test_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("keygen"))
    }

    #[test]
    fn test_sha256hex_framing() {
        let framed = sha256hex(b"abc");
        assert!(framed.starts_with("0x"));
        assert_eq!(framed.len(), 2 + 64);
        assert_eq!(
            framed,
            "0xba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256hex_lowercase() {
        let framed = sha256hex(&[0xffu8; 7]);
        assert_eq!(framed, framed.to_lowercase());
    }

    #[test]
    fn test_modulus_length_guard() {
        assert!(matches!(
            rsa_public_from_modulus(&[1u8; 255]),
            Err(CryptoError::BadKeyMaterial(_))
        ));
        assert!(matches!(
            rsa_public_from_modulus(&[1u8; 257]),
            Err(CryptoError::BadKeyMaterial(_))
        ));
    }

    #[test]
    fn test_modulus_round_trip() {
        let public = test_key().to_public_key();
        let modulus = public.n().to_bytes_be();
        assert_eq!(modulus.len(), RSA_MODULUS_LEN);

        let rebuilt = rsa_public_from_modulus(&modulus).unwrap();
        assert_eq!(rebuilt, public);
    }

    #[test]
    fn test_rsa_encrypt_decrypts_with_private_key() {
        let private = test_key();
        let public = private.to_public_key();

        let ciphertext = rsa_encrypt(&public, b"challenge secret").unwrap();
        let plaintext = private.decrypt(Pkcs1v15Encrypt, &ciphertext).unwrap();
        assert_eq!(plaintext, b"challenge secret");
    }

    #[test]
    fn test_rsa_verify_accepts_valid_signature() {
        let private = test_key();
        let public = private.to_public_key();

        let message = b"the secret bytes";
        let digest = Sha256::digest(message);
        let signature = private.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();

        assert!(rsa_verify(&public, message, &signature));
    }

    #[test]
    fn test_rsa_verify_rejects_tampered_message() {
        let private = test_key();
        let public = private.to_public_key();

        let digest = Sha256::digest(b"original");
        let signature = private.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();

        assert!(!rsa_verify(&public, b"tampered", &signature));
    }

    #[test]
    fn test_rsa_verify_rejects_garbage_signature() {
        let public = test_key().to_public_key();
        assert!(!rsa_verify(&public, b"message", &[0u8; 256]));
    }

    #[test]
    fn test_aes_round_trip() {
        let key = [9u8; 32];
        let token = aes_encrypt(b"d2657424-6a20-4d86-91a1-6c9a5c0a3a3e", &key);
        let plaintext = aes_decrypt(&token, &key).unwrap();
        assert_eq!(plaintext, b"d2657424-6a20-4d86-91a1-6c9a5c0a3a3e");
    }

    #[test]
    fn test_aes_random_iv_varies_ciphertext() {
        let key = [9u8; 32];
        let a = aes_encrypt(b"same input", &key);
        let b = aes_encrypt(b"same input", &key);
        assert_ne!(a, b);
        // Both still decrypt to the same plaintext.
        assert_eq!(aes_decrypt(&a, &key).unwrap(), aes_decrypt(&b, &key).unwrap());
    }

    #[test]
    fn test_aes_decrypt_rejects_bad_hex() {
        assert!(matches!(
            aes_decrypt("zz-not-hex", &[0u8; 32]),
            Err(CryptoError::Token(_))
        ));
    }

    #[test]
    fn test_aes_decrypt_rejects_truncated_token() {
        assert!(matches!(
            aes_decrypt("00ff00", &[0u8; 32]),
            Err(CryptoError::Token(_))
        ));
    }
}
