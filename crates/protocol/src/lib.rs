//! relaydesk-protocol – Netzwerkprotokoll-Definitionen
//!
//! Dieses Crate definiert alle Nachrichtentypen, die zwischen Endpunkt und
//! Relay ausgetauscht werden, sowie das Frame-Format der TCP-Verbindung.

pub mod control;
pub mod crypto;
pub mod transfer;
pub mod wire;

pub use control::{ControlMessage, ControlPayload, ErrorCode};
pub use crypto::EncryptionPolicy;
pub use transfer::TransferMessage;
pub use wire::{Frame, FrameCodec};
