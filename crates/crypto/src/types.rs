//! Gemeinsame Typen fuer das Kryptografie-Subsystem

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

/// Laenge eines symmetrischen Sitzungsschluessels (AES-256)
pub const SESSION_KEY_LEN: usize = 32;

/// Laenge der AES-GCM Nonce
pub const NONCE_LEN: usize = 12;

/// Laenge des AES-GCM Auth-Tags
pub const TAG_LEN: usize = 16;

/// Oeffentlicher X25519-Schluessel (32 Bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    pub bytes: [u8; 32],
}

impl PublicKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Exportiert den Schluessel fuer das Wire-Format (Base64)
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    /// Importiert einen Schluessel aus dem Wire-Format
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let raw = BASE64.decode(encoded)?;
        let bytes: [u8; 32] =
            raw.as_slice()
                .try_into()
                .map_err(|_| CryptoError::UngueltigeSchluesselLaenge {
                    erwartet: 32,
                    erhalten: raw.len(),
                })?;
        Ok(Self { bytes })
    }
}

/// Sicherer Schluessel-Container (wird beim Drop genullt)
#[derive(Clone)]
pub struct SecretBytes(pub Vec<u8>);

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([REDACTED] {} bytes)", self.0.len())
    }
}

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Symmetrischer Sitzungsschluessel fuer einen Peer (AES-256-GCM)
#[derive(Debug, Clone)]
pub struct SessionKey {
    key_bytes: SecretBytes,
}

impl SessionKey {
    /// Erzeugt einen frischen zufaelligen 256-Bit-Schluessel
    pub fn generieren() -> Self {
        let mut bytes = vec![0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self {
            key_bytes: SecretBytes::new(bytes),
        }
    }

    /// Uebernimmt exportiertes Schluesselmaterial
    pub fn aus_bytes(bytes: Vec<u8>) -> CryptoResult<Self> {
        if bytes.len() != SESSION_KEY_LEN {
            return Err(CryptoError::UngueltigeSchluesselLaenge {
                erwartet: SESSION_KEY_LEN,
                erhalten: bytes.len(),
            });
        }
        Ok(Self {
            key_bytes: SecretBytes::new(bytes),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.key_bytes.as_bytes()
    }
}

/// Verschluesselter Payload (Nonce + Ciphertext mit angehaengtem Auth-Tag)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// 12 Bytes Nonce, pro Nachricht frisch gezogen
    pub nonce: [u8; NONCE_LEN],
    /// Verschluesselter Inhalt inkl. 16 Bytes Auth-Tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    /// Serialisiert zu Bytes: [nonce(12)] + [ciphertext]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Deserialisiert aus Bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&bytes[..NONCE_LEN]);
        Some(Self {
            nonce,
            ciphertext: bytes[NONCE_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_base64() {
        let pk = PublicKey::new([7u8; 32]);
        let importiert = PublicKey::from_base64(&pk.to_base64()).unwrap();
        assert_eq!(pk, importiert);
    }

    #[test]
    fn public_key_falsche_laenge() {
        let kurz = BASE64.encode([1u8; 16]);
        assert!(matches!(
            PublicKey::from_base64(&kurz),
            Err(CryptoError::UngueltigeSchluesselLaenge { erwartet: 32, erhalten: 16 })
        ));
        assert!(matches!(
            PublicKey::from_base64("%%%"),
            Err(CryptoError::Base64(_))
        ));
    }

    #[test]
    fn session_keys_sind_zufaellig() {
        let a = SessionKey::generieren();
        let b = SessionKey::generieren();
        assert_eq!(a.as_bytes().len(), SESSION_KEY_LEN);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn session_key_laenge_wird_geprueft() {
        assert!(SessionKey::aus_bytes(vec![0u8; 16]).is_err());
        assert!(SessionKey::aus_bytes(vec![0u8; 32]).is_ok());
    }

    #[test]
    fn secret_bytes_debug_ist_geschwaerzt() {
        let s = SecretBytes::new(vec![0xAB; 32]);
        let dbg = format!("{:?}", s);
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }

    #[test]
    fn encrypted_payload_zu_kurz() {
        assert!(EncryptedPayload::from_bytes(&[0u8; 20]).is_none());
    }
}
