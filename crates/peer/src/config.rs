//! Konfiguration eines Endpunkts

use relaydesk_protocol::EncryptionPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Einstellungen eines Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Anzeigename bei der Registrierung
    pub name: String,
    /// Plattform-Tag bei der Registrierung
    pub platform: String,
    /// Verhalten ohne etablierten Sitzungsschluessel
    pub policy: EncryptionPolicy,
    /// Nach dieser Zeit gilt ein laufender Handshake als verwaist
    pub handshake_timeout_ms: u64,
    /// Nach dieser Zeit ohne Chunk gilt eine Uebertragung als gestockt
    pub stall_timeout_ms: u64,
    /// Pause zwischen zwei Chunks beim Senden
    pub chunk_pause_ms: u64,
    /// Passwort, das eingehende Verbindungsanfragen mitbringen muessen
    pub verbindungs_passwort: Option<String>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "relaydesk".to_string(),
            platform: std::env::consts::OS.to_string(),
            policy: EncryptionPolicy::AllowFallback,
            handshake_timeout_ms: 10_000,
            stall_timeout_ms: 30_000,
            chunk_pause_ms: 10,
            verbindungs_passwort: None,
        }
    }
}

impl PeerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    /// Prueft das Passwort einer eingehenden Verbindungsanfrage
    ///
    /// Ohne konfiguriertes Passwort ist jede Anfrage zulaessig.
    pub fn passwort_pruefen(&self, angegeben: Option<&str>) -> bool {
        match &self.verbindungs_passwort {
            None => true,
            Some(erwartet) => angegeben == Some(erwartet.as_str()),
        }
    }
}
