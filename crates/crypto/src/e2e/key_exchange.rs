//! X25519 Schluesselpaare und HKDF-Ableitung
//!
//! Jeder Endpunkt haelt ein statisches Schluesselpaar fuer die Lebensdauer
//! des Prozesses. Der oeffentliche Teil wird bei der Registrierung
//! exportiert, der private Teil verlaesst den Endpunkt nie.

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, SharedSecret, StaticSecret};

use crate::error::{CryptoError, CryptoResult};
use crate::types::PublicKey;

/// Statisches X25519 Schluesselpaar eines Endpunkts
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Erzeugt ein frisches Schluesselpaar
    pub fn generieren() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::new(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Oeffentlicher Schluessel
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// DH-Austausch mit einem fremden oeffentlichen Schluessel
    pub(crate) fn diffie_hellman(&self, other: &[u8; 32]) -> SharedSecret {
        self.secret.diffie_hellman(&X25519PublicKey::from(*other))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public.to_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// HKDF-basierte Key Derivation (allgemein verwendbar)
pub fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8], len: usize) -> CryptoResult<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
