//! Fehlertypen fuer die Endpunkt-Bibliothek

use relaydesk_core::types::ClientId;
use relaydesk_core::RelayError;
use relaydesk_crypto::CryptoError;
use relaydesk_protocol::control::ErrorCode;
use thiserror::Error;

/// Fehler der Chunk-Uebertragung
#[derive(Debug, Error)]
pub enum TransferError {
    /// Nutzlast ueberschreitet die Maximalgroesse
    #[error("Nutzlast zu gross: {groesse} Bytes (Maximum: {max} Bytes)")]
    ZuGross { groesse: u64, max: u64 },

    /// Chunk-Index ausserhalb der angekuendigten Anzahl
    #[error("Chunk-Index {index} ausserhalb von 0..{total}")]
    UngueltigerIndex { index: u32, total: u32 },

    /// Mehr Chunks angekuendigt als fuer die Dateigroesse moeglich
    #[error("{total} Chunks fuer {file_size} Bytes angekuendigt (hoechstens {max})")]
    ZuVieleChunks { total: u32, file_size: u64, max: u64 },

    /// Empfangene Chunks uebersteigen die angekuendigte Groesse
    #[error("Uebertragung '{file_name}' ueberschreitet {max} Zeichen")]
    UeberLaenge { file_name: String, max: u64 },

    /// Keine Chunks angekuendigt
    #[error("Uebertragung '{0}' ohne Chunks angekuendigt")]
    Leer(String),

    /// Seit `stall_timeout` kein Chunk mehr
    #[error("Uebertragung '{file_name}' von {peer} stockt")]
    Stockt { peer: ClientId, file_name: String },

    /// Zusammengesetzter Inhalt ist kein gueltiges Base64
    #[error("Chunk-Inhalt ungueltig: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Fehlertyp fuer Endpunkte
#[derive(Debug, Error)]
pub enum PeerError {
    /// IO-Fehler (TCP)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Relay hat die Verbindung beendet
    #[error("Verbindung vom Relay getrennt")]
    VerbindungGetrennt,

    /// Relay hat mit einem Fehler geantwortet
    #[error("Server-Fehler ({code:?}): {message}")]
    Server { code: ErrorCode, message: String },

    /// Antwort passt nicht zur Anfrage
    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    /// Fuer diesen Peer laeuft bereits ein Handshake
    #[error("Handshake mit {0} laeuft bereits")]
    HandshakeLaeuft(ClientId),

    /// Keine Sitzung mit diesem Peer
    #[error("Keine Sitzung mit {0}")]
    KeineSitzung(ClientId),

    /// Kein Sitzungsschluessel fuer diesen Peer
    #[error("Kein Sitzungsschluessel fuer {0}")]
    KryptoNichtVerfuegbar(ClientId),

    /// Schluesselaustausch oder Ver-/Entschluesselung fehlgeschlagen
    #[error("Krypto-Fehler: {0}")]
    Krypto(#[from] CryptoError),

    /// Fehler der Chunk-Uebertragung
    #[error("Uebertragung: {0}")]
    Transfer(#[from] TransferError),

    /// Zeitlimit ueberschritten
    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    /// JSON-Fehler bei Transfer-Nachrichten
    #[error("Serialisierung: {0}")]
    Serialisierung(#[from] serde_json::Error),
}

impl PeerError {
    /// Fehler-Code im Sinne des Protokolls
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Server { code, .. } => *code,
            Self::KeineSitzung(_) => ErrorCode::NotInSession,
            Self::KryptoNichtVerfuegbar(_) => ErrorCode::CryptoUnavailable,
            Self::Krypto(_) => ErrorCode::CryptoOperationFailure,
            Self::Zeitlimit(_) | Self::Transfer(TransferError::Stockt { .. }) => ErrorCode::Timeout,
            Self::Transfer(_) | Self::UnerwarteteAntwort(_) | Self::Serialisierung(_) => {
                ErrorCode::InvalidRequest
            }
            Self::HandshakeLaeuft(_) | Self::Io(_) | Self::VerbindungGetrennt => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<PeerError> for RelayError {
    fn from(e: PeerError) -> Self {
        match e {
            PeerError::KeineSitzung(id) => RelayError::NichtInSitzung(id.to_string()),
            PeerError::KryptoNichtVerfuegbar(id) => RelayError::KryptoNichtVerfuegbar(id.to_string()),
            PeerError::Krypto(k) => RelayError::KryptoFehlgeschlagen(k.to_string()),
            PeerError::Transfer(t @ TransferError::Stockt { .. }) => {
                RelayError::UebertragungStockt(t.to_string())
            }
            PeerError::Zeitlimit(m) => RelayError::Zeitlimit(m),
            PeerError::Server {
                code: ErrorCode::NotFound,
                message,
            } => RelayError::NichtGefunden(message),
            andere => RelayError::Intern(andere.to_string()),
        }
    }
}

/// Result-Typ fuer Endpunkte
pub type PeerResult<T> = Result<T, PeerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stockende_uebertragung_ist_timeout() {
        let e = PeerError::from(TransferError::Stockt {
            peer: ClientId::from("b"),
            file_name: "bild.png".into(),
        });
        assert_eq!(e.error_code(), ErrorCode::Timeout);
        assert!(matches!(RelayError::from(e), RelayError::UebertragungStockt(_)));
    }

    #[test]
    fn fehlender_schluessel_ist_crypto_unavailable() {
        let e = PeerError::KryptoNichtVerfuegbar(ClientId::from("b"));
        assert_eq!(e.error_code(), ErrorCode::CryptoUnavailable);
    }
}
