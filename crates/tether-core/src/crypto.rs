//! RSA challenge-response primitives for the admission handshake.
//!
//! The server encrypts a random challenge under the client's registered
//! public key (PKCS#1 v1.5 padding); only the holder of the matching
//! private key can return the plaintext. Challenge text is base64 of 32
//! bytes of OS randomness, so it is printable and compared byte-for-byte.
//!
//! Key encodings are tolerant of both common PEM flavors: PKIX
//! (`PUBLIC KEY`) and PKCS#1 (`RSA PUBLIC KEY`) for public keys, PKCS#1
//! (`RSA PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) for private keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::Pkcs1v15Encrypt;
pub use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::{TetherError, TetherResult};

/// Challenge entropy in bytes.
pub const CHALLENGE_BYTES: usize = 32;

/// Generate a fresh random challenge, encoded as base64 text.
pub fn generate_challenge() -> String {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Parse an RSA public key from PEM (PKIX or PKCS#1).
pub fn parse_public_key(pem: &str) -> TetherResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| TetherError::Crypto(format!("invalid RSA public key: {e}")))
}

/// Parse an RSA private key from PEM (PKCS#1 or PKCS#8).
pub fn parse_private_key(pem: &str) -> TetherResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| TetherError::Crypto(format!("invalid RSA private key: {e}")))
}

/// Encrypt a challenge under a registered public key, returning base64
/// ciphertext suitable for the `challenge` message payload.
pub fn encrypt_challenge(challenge: &str, public_key_pem: &str) -> TetherResult<String> {
    let key = parse_public_key(public_key_pem)?;
    let ciphertext = key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, challenge.as_bytes())
        .map_err(|e| TetherError::Crypto(format!("challenge encryption failed: {e}")))?;
    Ok(BASE64.encode(ciphertext))
}

/// Decrypt a base64 challenge payload with the client's private key.
pub fn decrypt_challenge(encrypted: &str, key: &RsaPrivateKey) -> TetherResult<String> {
    let ciphertext = BASE64
        .decode(encrypted)
        .map_err(|e| TetherError::Crypto(format!("challenge is not valid base64: {e}")))?;
    let plaintext = key
        .decrypt(Pkcs1v15Encrypt, &ciphertext)
        .map_err(|e| TetherError::Crypto(format!("challenge decryption failed: {e}")))?;
    String::from_utf8(plaintext)
        .map_err(|_| TetherError::Crypto("decrypted challenge is not UTF-8".into()))
}

/// Generate a new RSA keypair, returning `(private_pem, public_pem)`.
/// Private key is PKCS#1, public key is PKIX, matching what the server
/// and client config files expect.
pub fn generate_keypair(bits: usize) -> TetherResult<(String, String)> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
        .map_err(|e| TetherError::Crypto(format!("key generation failed: {e}")))?;
    let private_pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| TetherError::Crypto(format!("private key encoding failed: {e}")))?
        .to_string();
    let public_pem = key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| TetherError::Crypto(format!("public key encoding failed: {e}")))?;
    Ok((private_pem, public_pem))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1024-bit keys keep test keygen fast; production uses 2048+.
    fn test_keypair() -> (RsaPrivateKey, String) {
        let (private_pem, public_pem) = generate_keypair(1024).unwrap();
        (parse_private_key(&private_pem).unwrap(), public_pem)
    }

    #[test]
    fn challenge_round_trip() {
        let (private_key, public_pem) = test_keypair();
        let challenge = generate_challenge();
        let encrypted = encrypt_challenge(&challenge, &public_pem).unwrap();
        assert_ne!(encrypted, challenge);
        let decrypted = decrypt_challenge(&encrypted, &private_key).unwrap();
        assert_eq!(decrypted, challenge);
    }

    #[test]
    fn challenges_are_unique() {
        assert_ne!(generate_challenge(), generate_challenge());
    }

    #[test]
    fn wrong_key_cannot_decrypt() {
        let (_, public_pem) = test_keypair();
        let (other_key, _) = test_keypair();
        let encrypted = encrypt_challenge(&generate_challenge(), &public_pem).unwrap();
        assert!(decrypt_challenge(&encrypted, &other_key).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (private_key, public_pem) = test_keypair();
        let encrypted = encrypt_challenge(&generate_challenge(), &public_pem).unwrap();
        assert!(decrypt_challenge("not-base64!!!", &private_key).is_err());
        // Valid base64, garbage ciphertext.
        let garbage = BASE64.encode([0u8; 128]);
        assert!(decrypt_challenge(&garbage, &private_key).is_err());
        let _ = encrypted;
    }

    #[test]
    fn non_rsa_pem_rejected() {
        assert!(parse_public_key("-----BEGIN PUBLIC KEY-----\nZm9v\n-----END PUBLIC KEY-----\n").is_err());
        assert!(parse_private_key("not a pem at all").is_err());
    }
}
