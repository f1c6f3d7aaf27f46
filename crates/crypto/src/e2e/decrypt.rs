//! Nachrichten-Entschluesselung mit dem Sitzungsschluessel

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};

use crate::error::{CryptoError, CryptoResult};
use crate::types::{EncryptedPayload, SessionKey};

/// Oeffnet eine versiegelte Nachricht
///
/// Schlaegt fehl wenn Schluessel, Nonce oder Chiffrat nicht zusammenpassen.
/// Es wird nie ein verfaelschter Klartext zurueckgegeben.
pub fn decrypt_message(payload: &EncryptedPayload, key: &SessionKey) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(&payload.nonce), payload.ciphertext.as_slice())
        .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
}

/// Deserialisiert und oeffnet in einem Schritt
pub fn decrypt_message_bytes(bytes: &[u8], key: &SessionKey) -> CryptoResult<Vec<u8>> {
    let payload = EncryptedPayload::from_bytes(bytes)
        .ok_or_else(|| CryptoError::UngueltigeDaten("Chiffrat zu kurz".to_string()))?;
    decrypt_message(&payload, key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::e2e::encrypt::{encrypt_message, encrypt_message_bytes};

    #[test]
    fn verschluesseln_und_entschluesseln() {
        let key = SessionKey::generieren();
        let sealed = encrypt_message_bytes(b"Tastatur: Strg+Alt+Entf", &key).unwrap();
        let opened = decrypt_message_bytes(&sealed, &key).unwrap();
        assert_eq!(opened, b"Tastatur: Strg+Alt+Entf");
    }

    #[test]
    fn fremder_schluessel_schlaegt_deterministisch_fehl() {
        let key = SessionKey::generieren();
        let fremd = SessionKey::generieren();
        let payload = encrypt_message(b"geheim", &key).unwrap();

        for _ in 0..3 {
            assert!(matches!(
                decrypt_message(&payload, &fremd),
                Err(CryptoError::Entschluesselung(_))
            ));
        }
    }

    #[test]
    fn manipuliertes_chiffrat_wird_erkannt() {
        let key = SessionKey::generieren();
        let mut payload = encrypt_message(b"Mausposition 100,200", &key).unwrap();
        payload.ciphertext[0] ^= 0xFF;
        assert!(decrypt_message(&payload, &key).is_err());
    }

    #[test]
    fn zu_kurze_bytes_sind_ungueltig() {
        let key = SessionKey::generieren();
        assert!(matches!(
            decrypt_message_bytes(&[0u8; 5], &key),
            Err(CryptoError::UngueltigeDaten(_))
        ));
    }
}
