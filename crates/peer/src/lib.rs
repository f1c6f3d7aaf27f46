//! # relaydesk-peer
//!
//! Endpunkt-Seite des Relays: TCP-Client, Schluesselaustausch pro Peer,
//! versiegelte Nachrichten und die Chunk-Uebertragung.
//!
//! ## Module
//! - `client` - `SignalingClient` (TCP + FrameCodec)
//! - `handshake` - Zustandsautomat des Schluesselaustauschs
//! - `crypto` - Versiegeln/Oeffnen nach `EncryptionPolicy`
//! - `transfer` - Sender und Reassembler
//! - `endpoint` - Verarbeitung eingehender Nachrichten ohne eigenes IO

pub mod client;
pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod transfer;

pub use client::SignalingClient;
pub use config::PeerConfig;
pub use crypto::{PeerCrypto, Versiegelt};
pub use endpoint::{PeerEndpoint, PeerEvent, Reaktion};
pub use error::{PeerError, PeerResult, TransferError};
pub use handshake::{HandshakeManager, HandshakeRole, HandshakeState};
pub use transfer::{nachrichten_erzeugen, Reassembler, TransferEreignis};
