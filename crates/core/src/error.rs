//! Fehlertypen fuer Relaydesk
//!
//! Zentraler Fehler-Enum der die Fehlerklassen des Relays abdeckt.
//! Untermodule definieren eigene Fehler und bilden sie bei Bedarf hierauf ab.

use thiserror::Error;

/// Globaler Result-Alias fuer Relaydesk
pub type Result<T> = std::result::Result<T, RelayError>;

/// Fehlerklassen im Relaydesk-System
#[derive(Debug, Error)]
pub enum RelayError {
    // --- Adressierung ---
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Nicht Mitglied der Sitzung: {0}")]
    NichtInSitzung(String),

    // --- Kryptografie ---
    #[error("Verschluesselung nicht verfuegbar: {0}")]
    KryptoNichtVerfuegbar(String),

    #[error("Kryptografische Operation fehlgeschlagen: {0}")]
    KryptoFehlgeschlagen(String),

    // --- Zeit ---
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Uebertragung stockt: {0}")]
    UebertragungStockt(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl RelayError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Versuch sinnvoll sein koennte
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(self, Self::Zeitlimit(_) | Self::UebertragungStockt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = RelayError::NichtGefunden("client desk-2".into());
        assert_eq!(e.to_string(), "Nicht gefunden: client desk-2");
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(RelayError::Zeitlimit("anfrage".into()).ist_wiederholbar());
        assert!(!RelayError::KryptoFehlgeschlagen("tag".into()).ist_wiederholbar());
    }
}
