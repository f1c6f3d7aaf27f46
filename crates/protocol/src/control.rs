//! Control-Protokoll (TCP)
//!
//! Definiert alle Nachrichten die zwischen Endpunkt und Relay ausgetauscht
//! werden: Registrierung, Verbindungsaushandlung, Signal-Relay und
//! Krypto-Handshake.
//!
//! ## Design
//! - Umschlag mit `request_id: u32` (Antworten kopieren die ID)
//! - JSON-Serialisierung via serde, Typ-Tag in kebab-case (`register-client`)
//! - Felder in camelCase, Binaerdaten (Schluessel, Chiffrate) als Base64-String
//! - Signal-Payloads (`webrtc-offer` usw.) sind opakes JSON und werden
//!   unveraendert weitergereicht

use chrono::{DateTime, Utc};
use relaydesk_core::types::{ClientId, ConnectionId, SessionId};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    NotFound,
    PermissionDenied,
    // Sitzung
    NotInSession,
    Timeout,
    // Krypto
    CryptoUnavailable,
    CryptoOperationFailure,
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    /// Optionale maschinenlesbare Details
    pub details: Option<serde_json::Value>,
}

/// Fehlermeldung mit Code (fuer `connection-error` und `crypto-error`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    pub code: ErrorCode,
    pub message: String,
    /// Peer, auf den sich der Fehler bezieht
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ClientId>,
}

// ---------------------------------------------------------------------------
// Registrierung
// ---------------------------------------------------------------------------

/// Registrierung eines Endpunkts beim Relay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClientRequest {
    /// Eigene ID (fehlt sie, vergibt der Server eine)
    #[serde(default)]
    pub client_id: Option<ClientId>,
    /// Anzeigename
    #[serde(default)]
    pub name: Option<String>,
    /// Plattform-Tag (z.B. "linux", "windows")
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub supports_encryption: Option<bool>,
    /// Exportierter oeffentlicher Schluessel (Base64)
    #[serde(default)]
    pub public_key: Option<String>,
    /// Gemeinsames Geheimnis, falls der Server eines verlangt
    #[serde(default)]
    pub secret: Option<String>,
}

/// Bestaetigung der Registrierung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistered {
    pub client_id: ClientId,
    pub server_supports_encryption: bool,
}

/// Oeffentliche Informationen ueber einen registrierten Client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub name: String,
    pub address: String,
    pub platform: String,
    pub is_available: bool,
    pub supports_encryption: bool,
    pub public_key: Option<String>,
    pub last_seen: DateTime<Utc>,
}

/// Liste aller anderen registrierten Clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsList {
    pub clients: Vec<ClientInfo>,
}

/// Ein Client hat sich abgemeldet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientDisconnected {
    pub client_id: ClientId,
}

// ---------------------------------------------------------------------------
// Verbindungsaushandlung
// ---------------------------------------------------------------------------

/// Verbindungsanfrage an einen anderen Client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub target_id: ClientId,
    pub requester_id: ClientId,
    /// Verbindungspasswort, falls das Ziel eines verlangt
    #[serde(default)]
    pub password: Option<String>,
}

/// An das Ziel weitergeleitete Verbindungsanfrage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequested {
    pub requester_id: ClientId,
    /// Kanal-Verweis des Anfragenden, wird in der Antwort zurueckgegeben
    pub requester_channel: ConnectionId,
    /// Unix-Timestamp in Millisekunden
    pub timestamp: i64,
    #[serde(default)]
    pub password: Option<String>,
}

/// Antwort des Ziels auf eine Verbindungsanfrage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResponse {
    pub requester_channel: ConnectionId,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Verbindung angenommen, Sitzung erstellt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionAccepted {
    pub session_id: SessionId,
    /// Der jeweils andere Teilnehmer
    pub peer_id: ClientId,
}

/// Verbindung abgelehnt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRejected {
    pub message: String,
}

/// Anfrage ohne Antwort abgelaufen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTimeout {
    pub target_id: ClientId,
}

/// Sitzung explizit schliessen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCloseRequest {
    pub session_id: SessionId,
}

/// Sitzung wurde geschlossen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClosed {
    pub session_id: SessionId,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Signal-Relay
// ---------------------------------------------------------------------------

/// Sitzungsgebundene Nachricht mit opakem Inhalt
///
/// Gilt fuer Offer/Answer/Candidate sowie Fernsteuerung, Chat und
/// Dateiuebertragung. `from` wird vom Relay gesetzt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub session_id: SessionId,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub from: Option<ClientId>,
}

impl SignalEnvelope {
    /// Erstellt einen Umschlag ohne Absender (setzt das Relay)
    pub fn new(session_id: SessionId, payload: serde_json::Value) -> Self {
        Self {
            session_id,
            payload,
            from: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Krypto-Handshake
// ---------------------------------------------------------------------------

/// Handshake-Anstoss vom Anfragenden (R) an das Ziel (A)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoHandshakeRequest {
    pub target_id: ClientId,
    /// Oeffentlicher Schluessel von R (Base64)
    pub public_key: String,
}

/// An A weitergeleiteter Handshake-Anstoss
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInit {
    pub requester_id: ClientId,
    pub requester_public_key: String,
}

/// Eingewickelter Sitzungsschluessel von A an R
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyMessage {
    pub requester_id: ClientId,
    /// Mit dem oeffentlichen Schluessel von R verschluesselter Schluessel (Base64)
    pub encrypted_session_key: String,
    #[serde(default)]
    pub from: Option<ClientId>,
}

/// Verschluesselte Direktnachricht
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    pub target_id: ClientId,
    /// nonce || ciphertext (Base64)
    pub encrypted_data: String,
    #[serde(default)]
    pub from: Option<ClientId>,
    /// Unix-Timestamp in Millisekunden, vom Relay gesetzt
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Abfrage des oeffentlichen Schluessels eines Clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRequest {
    pub client_id: ClientId,
}

/// Antwort mit dem gespeicherten Schluessel (falls vorhanden)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub client_id: ClientId,
    pub public_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Ping (Client -> Server oder Server -> Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    /// Unix-Timestamp in Millisekunden fuer RTT-Messung
    pub timestamp_ms: u64,
}

/// Pong-Antwort (spiegelt Timestamp zurueck)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    /// Originaler Timestamp aus dem Ping
    pub echo_timestamp_ms: u64,
    /// Server-eigener Timestamp
    pub server_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Haupt-Enum: ControlPayload
// ---------------------------------------------------------------------------

/// Alle moeglichen Control-Nachrichten (typsicher via Tagged Enum)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlPayload {
    // Registrierung
    RegisterClient(RegisterClientRequest),
    ClientRegistered(ClientRegistered),
    ClientsList(ClientsList),
    ClientConnected(ClientInfo),
    ClientDisconnected(ClientDisconnected),

    // Verbindungsaushandlung
    ConnectionRequest(ConnectionRequest),
    ConnectionRequested(ConnectionRequested),
    ConnectionResponse(ConnectionResponse),
    ConnectionAccepted(ConnectionAccepted),
    ConnectionRejected(ConnectionRejected),
    ConnectionError(ErrorNotice),
    ConnectionTimeout(ConnectionTimeout),
    SessionClose(SessionCloseRequest),
    SessionClosed(SessionClosed),

    // Signal-Relay (sitzungsgebunden, opak)
    WebrtcOffer(SignalEnvelope),
    WebrtcAnswer(SignalEnvelope),
    IceCandidate(SignalEnvelope),
    RemoteControl(SignalEnvelope),
    ChatMessage(SignalEnvelope),
    FileTransfer(SignalEnvelope),
    FileTransferRequest(SignalEnvelope),
    FileTransferResponse(SignalEnvelope),

    // Krypto
    CryptoHandshake(CryptoHandshakeRequest),
    HandshakeInit(HandshakeInit),
    SessionKey(SessionKeyMessage),
    EncryptedMessage(EncryptedMessage),
    CryptoError(ErrorNotice),
    PublicKeyRequest(PublicKeyRequest),
    PublicKeyResponse(PublicKeyResponse),

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    // Error
    Error(ErrorResponse),
}

impl ControlPayload {
    /// Sitzungs-ID und Umschlag, falls es sich um eine Relay-Nachricht handelt
    pub fn signal_envelope(&self) -> Option<&SignalEnvelope> {
        match self {
            Self::WebrtcOffer(e)
            | Self::WebrtcAnswer(e)
            | Self::IceCandidate(e)
            | Self::RemoteControl(e)
            | Self::ChatMessage(e)
            | Self::FileTransfer(e)
            | Self::FileTransferRequest(e)
            | Self::FileTransferResponse(e) => Some(e),
            _ => None,
        }
    }

    /// Veraenderlicher Zugriff auf den Relay-Umschlag
    pub fn signal_envelope_mut(&mut self) -> Option<&mut SignalEnvelope> {
        match self {
            Self::WebrtcOffer(e)
            | Self::WebrtcAnswer(e)
            | Self::IceCandidate(e)
            | Self::RemoteControl(e)
            | Self::ChatMessage(e)
            | Self::FileTransfer(e)
            | Self::FileTransferRequest(e)
            | Self::FileTransferResponse(e) => Some(e),
            _ => None,
        }
    }

    /// Kurzname des Nachrichtentyps fuer Logs und Metriken
    pub fn typ_name(&self) -> &'static str {
        match self {
            Self::RegisterClient(_) => "register-client",
            Self::ClientRegistered(_) => "client-registered",
            Self::ClientsList(_) => "clients-list",
            Self::ClientConnected(_) => "client-connected",
            Self::ClientDisconnected(_) => "client-disconnected",
            Self::ConnectionRequest(_) => "connection-request",
            Self::ConnectionRequested(_) => "connection-requested",
            Self::ConnectionResponse(_) => "connection-response",
            Self::ConnectionAccepted(_) => "connection-accepted",
            Self::ConnectionRejected(_) => "connection-rejected",
            Self::ConnectionError(_) => "connection-error",
            Self::ConnectionTimeout(_) => "connection-timeout",
            Self::SessionClose(_) => "session-close",
            Self::SessionClosed(_) => "session-closed",
            Self::WebrtcOffer(_) => "webrtc-offer",
            Self::WebrtcAnswer(_) => "webrtc-answer",
            Self::IceCandidate(_) => "ice-candidate",
            Self::RemoteControl(_) => "remote-control",
            Self::ChatMessage(_) => "chat-message",
            Self::FileTransfer(_) => "file-transfer",
            Self::FileTransferRequest(_) => "file-transfer-request",
            Self::FileTransferResponse(_) => "file-transfer-response",
            Self::CryptoHandshake(_) => "crypto-handshake",
            Self::HandshakeInit(_) => "handshake-init",
            Self::SessionKey(_) => "session-key",
            Self::EncryptedMessage(_) => "encrypted-message",
            Self::CryptoError(_) => "crypto-error",
            Self::PublicKeyRequest(_) => "public-key-request",
            Self::PublicKeyResponse(_) => "public-key-response",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Error(_) => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Control-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Control-Protokoll-Nachricht mit Request/Response-Zuordnung
///
/// Jede Nachricht traegt eine `request_id` die der Client vergibt.
/// Der Server kopiert die ID in direkte Antworten; weitergeleitete und
/// gebroadcastete Nachrichten tragen die ID 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Nachrichten-ID fuer Request/Response-Zuordnung
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: ControlPayload,
}

impl ControlMessage {
    /// Erstellt eine neue Control-Nachricht
    pub fn new(request_id: u32, payload: ControlPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt eine vom Server ausgeloeste Nachricht (request_id 0)
    pub fn push(payload: ControlPayload) -> Self {
        Self::new(0, payload)
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Ping(PingMessage { timestamp_ms }),
        )
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64, server_timestamp_ms: u64) -> Self {
        Self::new(
            request_id,
            ControlPayload::Pong(PongMessage {
                echo_timestamp_ms,
                server_timestamp_ms,
            }),
        )
    }

    /// Erstellt eine Fehler-Antwort
    pub fn error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::Error(ErrorResponse {
                code,
                message: message.into(),
                details: None,
            }),
        )
    }

    /// Erstellt eine `connection-error`-Nachricht
    pub fn connection_error(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            request_id,
            ControlPayload::ConnectionError(ErrorNotice {
                code,
                message: message.into(),
                target_id: None,
            }),
        )
    }

    /// Erstellt eine `crypto-error`-Nachricht zum Handshake mit `target_id`
    pub fn crypto_error(
        request_id: u32,
        code: ErrorCode,
        message: impl Into<String>,
        target_id: &ClientId,
    ) -> Self {
        Self::new(
            request_id,
            ControlPayload::CryptoError(ErrorNotice {
                code,
                message: message.into(),
                target_id: Some(target_id.clone()),
            }),
        )
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_pong_serialisierung() {
        let ping = ControlMessage::ping(1, 1234567890);
        let json = ping.to_json().unwrap();
        let decoded = ControlMessage::from_json(&json).unwrap();
        assert_eq!(decoded.request_id, 1);
        if let ControlPayload::Ping(p) = decoded.payload {
            assert_eq!(p.timestamp_ms, 1234567890);
        } else {
            panic!("Erwartet Ping-Payload");
        }
    }

    #[test]
    fn error_response_serialisierung() {
        let msg = ControlMessage::error(42, ErrorCode::NotInSession, "Nicht in der Sitzung");
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"NOT_IN_SESSION\""));
        let decoded = ControlMessage::from_json(&json).unwrap();
        assert_eq!(decoded.request_id, 42);
        if let ControlPayload::Error(e) = decoded.payload {
            assert_eq!(e.code, ErrorCode::NotInSession);
            assert_eq!(e.message, "Nicht in der Sitzung");
        } else {
            panic!("Erwartet Error-Payload");
        }
    }

    #[test]
    fn register_client_typ_tag_und_camel_case() {
        let json = r#"{"request_id":3,"payload":{"type":"register-client","clientId":"desk-1","supportsEncryption":true,"publicKey":"AAAA"}}"#;
        let decoded = ControlMessage::from_json(json).unwrap();
        if let ControlPayload::RegisterClient(r) = decoded.payload {
            assert_eq!(r.client_id, Some(ClientId::from("desk-1")));
            assert_eq!(r.supports_encryption, Some(true));
            assert_eq!(r.public_key.as_deref(), Some("AAAA"));
            assert!(r.name.is_none());
        } else {
            panic!("Erwartet RegisterClient-Payload");
        }
    }

    #[test]
    fn register_client_ohne_felder() {
        let json = r#"{"request_id":1,"payload":{"type":"register-client"}}"#;
        let decoded = ControlMessage::from_json(json).unwrap();
        assert!(matches!(
            decoded.payload,
            ControlPayload::RegisterClient(RegisterClientRequest { client_id: None, .. })
        ));
    }

    #[test]
    fn signal_payload_bleibt_unveraendert() {
        let sdp = serde_json::json!({"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1"});
        let msg = ControlMessage::new(
            7,
            ControlPayload::WebrtcOffer(SignalEnvelope::new(SessionId::new(), sdp.clone())),
        );
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"webrtc-offer\""));
        let decoded = ControlMessage::from_json(&json).unwrap();
        let env = decoded.payload.signal_envelope().expect("Relay-Umschlag erwartet");
        assert_eq!(env.payload, sdp);
        assert!(env.from.is_none());
    }

    #[test]
    fn signal_envelope_nur_fuer_relay_typen() {
        let ping = ControlPayload::Ping(PingMessage { timestamp_ms: 1 });
        assert!(ping.signal_envelope().is_none());
        let chat = ControlPayload::ChatMessage(SignalEnvelope::new(
            SessionId::new(),
            serde_json::json!("hallo"),
        ));
        assert!(chat.signal_envelope().is_some());
        assert_eq!(chat.typ_name(), "chat-message");
    }

    #[test]
    fn crypto_error_nennt_ziel() {
        let msg = ControlMessage::crypto_error(
            3,
            ErrorCode::NotFound,
            "Client b nicht gefunden",
            &ClientId::from("b"),
        );
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"targetId\":\"b\""));

        // Aeltere Gegenstellen senden kein Ziel
        let ohne: ErrorNotice =
            serde_json::from_str(r#"{"code":"NOT_FOUND","message":"x"}"#).unwrap();
        assert!(ohne.target_id.is_none());
    }

    #[test]
    fn connection_error_traegt_code() {
        let msg = ControlMessage::connection_error(9, ErrorCode::NotFound, "Client nicht gefunden");
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"connection-error\""));
        let decoded = ControlMessage::from_json(&json).unwrap();
        if let ControlPayload::ConnectionError(n) = decoded.payload {
            assert_eq!(n.code, ErrorCode::NotFound);
        } else {
            panic!("Erwartet ConnectionError-Payload");
        }
    }

    #[test]
    fn unbekannter_typ_wird_abgelehnt() {
        let json = r#"{"request_id":1,"payload":{"type":"screen-share"}}"#;
        assert!(ControlMessage::from_json(json).is_err());
    }

    #[test]
    fn error_codes_serialisierbar() {
        for code in [
            ErrorCode::InternalError,
            ErrorCode::NotFound,
            ErrorCode::CryptoUnavailable,
            ErrorCode::CryptoOperationFailure,
            ErrorCode::Timeout,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            let decoded: ErrorCode = serde_json::from_str(&json).unwrap();
            assert_eq!(code, decoded);
        }
    }
}
