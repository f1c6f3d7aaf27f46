//! Fehlertypen fuer den Signaling-Service

use relaydesk_core::RelayError;
use relaydesk_protocol::control::ErrorCode;
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltiges Frame, falscher Zustand)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Client, Anfrage oder Sitzung unbekannt
    #[error("Nicht gefunden: {0}")]
    NichtGefunden(String),

    /// Absender ist nicht Mitglied der Sitzung
    #[error("Nicht Mitglied der Sitzung: {0}")]
    NichtInSitzung(String),

    /// Berechtigung verweigert (falsches Zugangsgeheimnis)
    #[error("Berechtigung verweigert: {0}")]
    ZugriffVerweigert(String),

    /// Ziel unterstuetzt keine Verschluesselung
    #[error("Verschluesselung nicht verfuegbar: {0}")]
    KryptoNichtVerfuegbar(String),

    /// Senden an Client fehlgeschlagen (Channel geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Timeout (Keepalive, Anfrage)
    #[error("Timeout")]
    Timeout,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }

    /// Fehler-Code fuer die Antwort an den Client
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NichtGefunden(_) => ErrorCode::NotFound,
            Self::NichtInSitzung(_) => ErrorCode::NotInSession,
            Self::ZugriffVerweigert(_) => ErrorCode::PermissionDenied,
            Self::KryptoNichtVerfuegbar(_) => ErrorCode::CryptoUnavailable,
            Self::Protokoll(_) => ErrorCode::InvalidRequest,
            Self::Timeout => ErrorCode::Timeout,
            Self::Io(_) | Self::VerbindungGetrennt | Self::SendFehler | Self::Intern(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<SignalingError> for RelayError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::NichtGefunden(m) => RelayError::NichtGefunden(m),
            SignalingError::NichtInSitzung(m) => RelayError::NichtInSitzung(m),
            SignalingError::KryptoNichtVerfuegbar(m) => RelayError::KryptoNichtVerfuegbar(m),
            SignalingError::Protokoll(m) => RelayError::UngueltigeNachricht(m),
            SignalingError::Timeout => RelayError::Zeitlimit("Signaling".into()),
            andere => RelayError::Intern(andere.to_string()),
        }
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
