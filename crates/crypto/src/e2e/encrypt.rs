//! Nachrichten-Verschluesselung mit dem Sitzungsschluessel
//!
//! ## Format
//! ```text
//! [nonce(12)] [ciphertext + auth_tag(16)]
//! ```
//!
//! Die Nonce wird pro Nachricht zufaellig gezogen. Der Auth-Tag ist die
//! einzige Authentifizierung der Nachricht.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::types::{EncryptedPayload, SessionKey, NONCE_LEN};

/// Versiegelt eine Nachricht mit dem Sitzungsschluessel eines Peers
pub fn encrypt_message(plaintext: &[u8], key: &SessionKey) -> CryptoResult<EncryptedPayload> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

    Ok(EncryptedPayload { nonce, ciphertext })
}

/// Versiegelt und serialisiert in einem Schritt
pub fn encrypt_message_bytes(plaintext: &[u8], key: &SessionKey) -> CryptoResult<Vec<u8>> {
    Ok(encrypt_message(plaintext, key)?.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TAG_LEN;

    #[test]
    fn ciphertext_hat_tag_overhead() {
        let key = SessionKey::generieren();
        let payload = encrypt_message(b"Hallo Gegenstelle", &key).unwrap();
        assert_eq!(payload.ciphertext.len(), b"Hallo Gegenstelle".len() + TAG_LEN);
    }

    #[test]
    fn nonce_ist_pro_nachricht_frisch() {
        let key = SessionKey::generieren();
        let a = encrypt_message(b"x", &key).unwrap();
        let b = encrypt_message(b"x", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
