//! # Packet Cryptography
//!
//! Confidentiality and integrity for session traffic.
//!
//! The session token doubles as key material for both primitives:
//! - **AES-256-GCM** encrypts the payload under a fresh 96-bit IV per packet;
//!   the 128-bit GCM tag is appended to the ciphertext.
//! - **HMAC-SHA256** covers the cleartext header bytes followed by the
//!   (encrypted) payload, so tampering with routing fields is detected too.
//!
//! Tag comparison goes through `Mac::verify_slice`, which is constant time.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{constants, ProtocolError, Result};

/// Length of a session token (and therefore of both keys)
pub const SESSION_TOKEN_LENGTH: usize = 32;

/// Length of the AES-GCM initialization vector
pub const IV_LENGTH: usize = 12;

/// Length of the GCM tag appended to every ciphertext
pub const AEAD_TAG_LENGTH: usize = 16;

/// Length of the trailing HMAC-SHA256 auth tag
pub const AUTH_TAG_LENGTH: usize = 32;

/// Length of a SHA-256 digest
pub const SHA256_LENGTH: usize = 32;

/// Opaque session credential carried in every header
pub type SessionToken = [u8; SESSION_TOKEN_LENGTH];

/// Sentinel meaning "no session yet"
pub const NO_SESSION: SessionToken = [0u8; SESSION_TOKEN_LENGTH];

type HmacSha256 = Hmac<Sha256>;

/// Cipher and MAC keyed by one session token
pub struct Crypto {
    cipher: Aes256Gcm,
    mac_key: Zeroizing<SessionToken>,
}

impl Crypto {
    pub fn new(token: &SessionToken) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(token)),
            mac_key: Zeroizing::new(*token),
        }
    }

    /// Encrypt `plaintext`; the result is ciphertext followed by the GCM tag.
    pub fn encrypt(&self, plaintext: &[u8], iv: &[u8; IV_LENGTH]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(iv), plaintext)
            .map_err(|_| ProtocolError::EncryptionFailure)
    }

    /// Decrypt ciphertext produced by [`Crypto::encrypt`], consuming its tag.
    pub fn decrypt(&self, ciphertext: &[u8], iv: &[u8; IV_LENGTH]) -> Result<Vec<u8>> {
        if ciphertext.len() < AEAD_TAG_LENGTH {
            return Err(ProtocolError::DecryptionFailure);
        }
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailure)
    }

    fn mac(&self, header: &[u8], payload: &[u8]) -> Result<HmacSha256> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.mac_key.as_slice())
            .map_err(|e| ProtocolError::SecurityError(e.to_string()))?;
        mac.update(header);
        mac.update(payload);
        Ok(mac)
    }

    /// Compute the auth tag over `header || payload`.
    pub fn authenticate(&self, header: &[u8], payload: &[u8]) -> Result<[u8; AUTH_TAG_LENGTH]> {
        let digest = self.mac(header, payload)?.finalize().into_bytes();
        let mut tag = [0u8; AUTH_TAG_LENGTH];
        tag.copy_from_slice(&digest);
        Ok(tag)
    }

    /// Check an auth tag in constant time.
    pub fn verify(&self, header: &[u8], payload: &[u8], tag: &[u8]) -> Result<()> {
        self.mac(header, payload)?
            .verify_slice(tag)
            .map_err(|_| ProtocolError::IntegrityFailure)
    }

    /// Fresh IV from the OS random source.
    pub fn generate_iv() -> Result<[u8; IV_LENGTH]> {
        random_bytes()
    }
}

/// Fill an array from the OS random source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    getrandom::fill(&mut out)
        .map_err(|e| ProtocolError::SecurityError(format!("{}: {e}", constants::ERR_RANDOM_SOURCE)))?;
    Ok(out)
}

/// Random token that is never the no-session sentinel.
pub fn generate_token() -> Result<SessionToken> {
    loop {
        let token: SessionToken = random_bytes()?;
        if !is_no_session(&token) {
            return Ok(token);
        }
    }
}

pub fn is_no_session(token: &SessionToken) -> bool {
    token.iter().all(|b| *b == 0)
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; SHA256_LENGTH] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; SHA256_LENGTH];
    out.copy_from_slice(&digest);
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn key() -> SessionToken {
        [0x42; SESSION_TOKEN_LENGTH]
    }

    #[test]
    fn encrypt_appends_gcm_tag() {
        let crypto = Crypto::new(&key());
        let iv = Crypto::generate_iv().unwrap();
        let ct = crypto.encrypt(b"uptime please", &iv).unwrap();
        assert_eq!(ct.len(), b"uptime please".len() + AEAD_TAG_LENGTH);
        assert_eq!(crypto.decrypt(&ct, &iv).unwrap(), b"uptime please");
    }

    #[test]
    fn decrypt_rejects_wrong_key_and_flipped_bits() {
        let iv = Crypto::generate_iv().unwrap();
        let mut ct = Crypto::new(&key()).encrypt(b"payload", &iv).unwrap();

        let other = Crypto::new(&[7u8; SESSION_TOKEN_LENGTH]);
        assert!(matches!(
            other.decrypt(&ct, &iv),
            Err(ProtocolError::DecryptionFailure)
        ));

        ct[0] ^= 0x01;
        assert!(matches!(
            Crypto::new(&key()).decrypt(&ct, &iv),
            Err(ProtocolError::DecryptionFailure)
        ));
    }

    #[test]
    fn decrypt_rejects_truncated_input() {
        let iv = [0u8; IV_LENGTH];
        assert!(Crypto::new(&key()).decrypt(&[1, 2, 3], &iv).is_err());
    }

    #[test]
    fn hmac_covers_header_and_payload() {
        let crypto = Crypto::new(&key());
        let tag = crypto.authenticate(b"header", b"payload").unwrap();
        assert!(crypto.verify(b"header", b"payload", &tag).is_ok());
        assert!(matches!(
            crypto.verify(b"headex", b"payload", &tag),
            Err(ProtocolError::IntegrityFailure)
        ));
        assert!(crypto.verify(b"header", b"payloae", &tag).is_err());
        assert!(crypto.verify(b"header", b"payload", &tag[..31]).is_err());
    }

    #[test]
    fn generated_tokens_are_never_the_sentinel() {
        for _ in 0..64 {
            let token = generate_token().unwrap();
            assert!(!is_no_session(&token));
        }
        assert!(is_no_session(&NO_SESSION));
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
