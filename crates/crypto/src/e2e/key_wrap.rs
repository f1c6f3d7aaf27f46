//! Einwickeln eines Sitzungsschluessels fuer einen Empfaenger
//!
//! Asymmetrische Verschluesselung des Schluesselmaterials in der Art einer
//! Sealed Box: ephemerer X25519-DH mit dem oeffentlichen Schluessel des
//! Empfaengers, HKDF-SHA256 zum Wrapping-Key, AES-256-GCM ueber die
//! Schluessel-Bytes.
//!
//! ## Format
//! ```text
//! [ephemeral_public(32)] [nonce(12)] [ciphertext(32) + auth_tag(16)]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

use super::key_exchange::{hkdf_derive, KeyPair};
use crate::error::{CryptoError, CryptoResult};
use crate::types::{PublicKey, SessionKey, NONCE_LEN, SESSION_KEY_LEN, TAG_LEN};

const WRAP_INFO: &[u8] = b"relaydesk-key-wrap-v1";

/// Laenge eines eingewickelten Sitzungsschluessels
pub const WRAPPED_KEY_LEN: usize = 32 + NONCE_LEN + SESSION_KEY_LEN + TAG_LEN;

/// Verschluesselt einen Sitzungsschluessel fuer den Inhaber von `recipient`
pub fn wrap_session_key(key: &SessionKey, recipient: &PublicKey) -> CryptoResult<Vec<u8>> {
    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let dh_output = ephemeral_secret.diffie_hellman(&X25519PublicKey::from(*recipient.as_bytes()));
    let wrapping_key = hkdf_derive(
        dh_output.as_bytes(),
        &wrap_salt(ephemeral_public.as_bytes(), recipient.as_bytes()),
        WRAP_INFO,
        32,
    )?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrapping_key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), key.as_bytes())
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Entschluesselt einen eingewickelten Sitzungsschluessel mit dem eigenen
/// Schluesselpaar
pub fn unwrap_session_key(wrapped: &[u8], own: &KeyPair) -> CryptoResult<SessionKey> {
    if wrapped.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::UngueltigeDaten(format!(
            "Eingewickelter Schluessel hat {} Bytes, erwartet {}",
            wrapped.len(),
            WRAPPED_KEY_LEN
        )));
    }

    let (ephemeral_pub, rest) = wrapped.split_at(32);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_LEN);
    let ephemeral_pub: [u8; 32] = ephemeral_pub
        .try_into()
        .map_err(|_| CryptoError::UngueltigeDaten("Ephemerer Schluessel".into()))?;

    let dh_output = own.diffie_hellman(&ephemeral_pub);
    let wrapping_key = hkdf_derive(
        dh_output.as_bytes(),
        &wrap_salt(&ephemeral_pub, own.public_key().as_bytes()),
        WRAP_INFO,
        32,
    )?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&wrapping_key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| CryptoError::Entschluesselung(e.to_string()))?;

    SessionKey::aus_bytes(plaintext)
}

fn wrap_salt(ephemeral_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> [u8; 64] {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral_pub);
    salt[32..].copy_from_slice(recipient_pub);
    salt
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn einwickeln_und_auswickeln() {
        let empfaenger = KeyPair::generieren();
        let key = SessionKey::generieren();

        let wrapped = wrap_session_key(&key, empfaenger.public_key()).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_KEY_LEN);

        let unwrapped = unwrap_session_key(&wrapped, &empfaenger).unwrap();
        assert_eq!(unwrapped.as_bytes(), key.as_bytes());
    }

    #[test]
    fn falscher_empfaenger_kann_nicht_auswickeln() {
        let empfaenger = KeyPair::generieren();
        let fremder = KeyPair::generieren();
        let key = SessionKey::generieren();

        let wrapped = wrap_session_key(&key, empfaenger.public_key()).unwrap();
        let result = unwrap_session_key(&wrapped, &fremder);
        assert!(matches!(result, Err(CryptoError::Entschluesselung(_))));
    }

    #[test]
    fn jedes_einwickeln_ist_anders() {
        let empfaenger = KeyPair::generieren();
        let key = SessionKey::generieren();
        let w1 = wrap_session_key(&key, empfaenger.public_key()).unwrap();
        let w2 = wrap_session_key(&key, empfaenger.public_key()).unwrap();
        assert_ne!(w1, w2, "Ephemerer Schluessel und Nonce muessen frisch sein");
    }

    #[test]
    fn manipulierter_schluessel_wird_abgelehnt() {
        let empfaenger = KeyPair::generieren();
        let key = SessionKey::generieren();
        let mut wrapped = wrap_session_key(&key, empfaenger.public_key()).unwrap();
        let letzter = wrapped.len() - 1;
        wrapped[letzter] ^= 0x01;
        assert!(unwrap_session_key(&wrapped, &empfaenger).is_err());
    }

    #[test]
    fn falsche_laenge_wird_abgelehnt() {
        let empfaenger = KeyPair::generieren();
        assert!(matches!(
            unwrap_session_key(&[0u8; 10], &empfaenger),
            Err(CryptoError::UngueltigeDaten(_))
        ));
    }
}
