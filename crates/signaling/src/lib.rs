//! relaydesk-signaling – Rendezvous- und Aushandlungs-Relay
//!
//! Dieser Crate implementiert den zentralen Relay: Registrierung der
//! Endpunkte, Aushandlung von Sitzungen, Weiterleitung sitzungsgebundener
//! Nachrichten und des Schluesselaustauschs.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |
//!     v
//! MessageDispatcher (catch_unwind pro Nachricht)
//!     |
//!     +-- RegisterHandler (Registrierung, Schluessel-Abfrage)
//!     +-- SessionHandler  (Anfrage, Antwort, Sitzungsende)
//!     +-- RelayHandler    (Offer, Answer, Candidate, Chat, ...)
//!     +-- CryptoHandler   (Handshake, Sitzungsschluessel, verschluesselte Nachrichten)
//!
//! ClientRegistry     – Wer ist registriert, ueber welche Verbindung
//! SessionCoordinator – Offene Anfragen und aktive Sitzungen
//! EventBroadcaster   – Send-Queues aller Verbindungen
//! ```

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server_state;
pub mod sessions;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::EventBroadcaster;
pub use connection::ClientConnection;
pub use dispatcher::{DispatcherContext, MessageDispatcher};
pub use error::{SignalingError, SignalingResult};
pub use registry::{ClientRecord, ClientRegistry};
pub use server_state::{SignalingConfig, SignalingState, SignalingStatistik, StatistikSnapshot};
pub use sessions::{NegotiationOutcome, NegotiationState, Session, SessionCoordinator};
pub use tcp::SignalingServer;
