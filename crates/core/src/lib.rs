//! relaydesk-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Identifikationstypen und den zentralen
//! Fehler-Enum bereit, die von Relay-Server und Peer-Endpunkt gemeinsam
//! genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{RelayError, Result};
pub use types::{ClientId, ConnectionId, SessionId};
