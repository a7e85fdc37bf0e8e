//! Link encryption for post-negotiation unicast traffic: key derivation from the
//! primary/local master keys, ChaCha20-Poly1305 sealing. Broadcasts stay in the clear.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the PMK and LMK strings.
pub const KEY_MATERIAL_LEN: usize = 16;

const NONCE_LEN: usize = 12;

/// Derive the 32-byte link key shared by every peer configured with the same PMK/LMK.
pub fn derive_link_key(pmk: &[u8], lmk: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"pong-link-v1");
    hasher.update(pmk);
    hasher.update(lmk);
    hasher.finalize().into()
}

/// Encrypt `plaintext`. Output is a random 96-bit nonce followed by the ciphertext and tag.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, LinkCryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| LinkCryptoError::Key)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| LinkCryptoError::Encrypt)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse [`seal`].
pub fn open(key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, LinkCryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(LinkCryptoError::Truncated);
    }
    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| LinkCryptoError::Key)?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| LinkCryptoError::Decrypt)
}

#[derive(Debug, thiserror::Error)]
pub enum LinkCryptoError {
    #[error("invalid key")]
    Key,
    #[error("sealed frame shorter than nonce")]
    Truncated,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let key = derive_link_key(b"pmk1234567890123", b"lmk1234567890123");
        let plain = b"unicast packet";
        let sealed = seal(&key, plain).unwrap();
        assert_ne!(&sealed[NONCE_LEN..], plain.as_slice());
        assert_eq!(open(&key, &sealed).unwrap(), plain);
    }

    #[test]
    fn tampered_or_wrong_key_rejected() {
        let key = derive_link_key(b"pmk1234567890123", b"lmk1234567890123");
        let mut sealed = seal(&key, b"payload").unwrap();
        let other = derive_link_key(b"pmk1234567890123", b"lmk0000000000000");
        assert!(matches!(open(&other, &sealed), Err(LinkCryptoError::Decrypt)));
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(open(&key, &sealed), Err(LinkCryptoError::Decrypt)));
        assert!(matches!(open(&key, &[0u8; 4]), Err(LinkCryptoError::Truncated)));
    }

    #[test]
    fn key_depends_on_both_inputs() {
        let a = derive_link_key(b"pmk1234567890123", b"lmk1234567890123");
        let b = derive_link_key(b"pmk1234567890124", b"lmk1234567890123");
        assert_ne!(a, b);
    }
}
