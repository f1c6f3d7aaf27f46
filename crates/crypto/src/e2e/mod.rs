//! E2E Verschluesselung (Endpunkt <-> Endpunkt)
//!
//! Das Relay forwardet Schluessel und Chiffrate blind und kann keinen
//! Inhalt entschluesseln.
//!
//! ## Ablauf
//! 1. Jeder Endpunkt erzeugt beim Start ein X25519 `KeyPair` und meldet den
//!    oeffentlichen Schluessel bei der Registrierung an
//! 2. Der Annehmende erzeugt einen zufaelligen `SessionKey` und wickelt ihn
//!    fuer den oeffentlichen Schluessel des Anfragenden ein
//! 3. Der Anfragende wickelt mit seinem privaten Schluessel aus
//! 4. Nachrichten werden mit AES-256-GCM und frischer Nonce versiegelt

pub mod decrypt;
pub mod encrypt;
pub mod key_exchange;
pub mod key_wrap;

pub use decrypt::{decrypt_message, decrypt_message_bytes};
pub use encrypt::{encrypt_message, encrypt_message_bytes};
pub use key_exchange::{hkdf_derive, KeyPair};
pub use key_wrap::{unwrap_session_key, wrap_session_key};
