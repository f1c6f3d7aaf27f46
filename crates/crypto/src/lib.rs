//! # relaydesk-crypto
//!
//! Schluesselaustausch und Nachrichtenverschluesselung zwischen Endpunkten.
//!
//! ## Module
//! - `e2e` - Schluesselpaare, Einwickeln von Sitzungsschluesseln, AES-256-GCM
//! - `types` - Gemeinsame Typen (PublicKey, SessionKey, EncryptedPayload, ...)
//! - `error` - Fehlertypen

pub mod e2e;
pub mod error;
pub mod types;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use types::{EncryptedPayload, PublicKey, SecretBytes, SessionKey};

pub use e2e::{
    decrypt_message, decrypt_message_bytes, encrypt_message, encrypt_message_bytes, hkdf_derive,
    unwrap_session_key, wrap_session_key, KeyPair,
};
