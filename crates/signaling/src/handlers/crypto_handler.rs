//! Crypto-Handler – Weiterleitung des Schluesselaustauschs
//!
//! Der Server sieht nur oeffentliche Schluessel und eingewickelte
//! Sitzungsschluessel. Er prueft, ob das Ziel bekannt ist und
//! Verschluesselung unterstuetzt, und reicht die Nachrichten durch.

use relaydesk_core::types::ClientId;
use relaydesk_protocol::control::{
    ControlMessage, ControlPayload, CryptoHandshakeRequest, EncryptedMessage, ErrorCode,
    HandshakeInit, SessionKeyMessage,
};
use std::sync::Arc;

use super::jetzt_ms;
use crate::registry::ClientRecord;
use crate::server_state::SignalingState;

/// Sucht das Ziel oder liefert `crypto-error` (NotFound)
fn ziel_suchen(
    id: &ClientId,
    request_id: u32,
    state: &SignalingState,
) -> Result<ClientRecord, ControlMessage> {
    state.registry.suchen(id).ok_or_else(|| {
        ControlMessage::crypto_error(
            request_id,
            ErrorCode::NotFound,
            format!("Client {} nicht gefunden", id),
            id,
        )
    })
}

/// Verarbeitet `crypto-handshake` und leitet `handshake-init` an das Ziel
pub async fn handle_crypto_handshake(
    request: CryptoHandshakeRequest,
    request_id: u32,
    client_id: ClientId,
    state: &Arc<SignalingState>,
) -> Option<ControlMessage> {
    let ziel = match ziel_suchen(&request.target_id, request_id, state) {
        Ok(z) => z,
        Err(antwort) => return Some(antwort),
    };

    if !state.config.verschluesselung_unterstuetzt || !ziel.supports_encryption {
        return Some(ControlMessage::crypto_error(
            request_id,
            ErrorCode::CryptoUnavailable,
            format!("Client {} unterstuetzt keine Verschluesselung", ziel.id),
            &ziel.id,
        ));
    }

    state.broadcaster.an_verbindung_senden(
        &ziel.connection,
        ControlMessage::push(ControlPayload::HandshakeInit(HandshakeInit {
            requester_id: client_id.clone(),
            requester_public_key: request.public_key,
        })),
    );
    tracing::debug!(requester = %client_id, target = %ziel.id, "Handshake weitergeleitet");
    None
}

/// Verarbeitet `session-key` und leitet ihn an den Anfragenden weiter
pub async fn handle_session_key(
    message: SessionKeyMessage,
    request_id: u32,
    client_id: ClientId,
    state: &Arc<SignalingState>,
) -> Option<ControlMessage> {
    let ziel = match ziel_suchen(&message.requester_id, request_id, state) {
        Ok(z) => z,
        Err(antwort) => return Some(antwort),
    };

    state.broadcaster.an_verbindung_senden(
        &ziel.connection,
        ControlMessage::push(ControlPayload::SessionKey(SessionKeyMessage {
            requester_id: message.requester_id,
            encrypted_session_key: message.encrypted_session_key,
            from: Some(client_id.clone()),
        })),
    );
    tracing::debug!(from = %client_id, target = %ziel.id, "Sitzungsschluessel weitergeleitet");
    None
}

/// Verarbeitet `encrypted-message`
pub async fn handle_encrypted_message(
    message: EncryptedMessage,
    request_id: u32,
    client_id: ClientId,
    state: &Arc<SignalingState>,
) -> Option<ControlMessage> {
    let ziel = match ziel_suchen(&message.target_id, request_id, state) {
        Ok(z) => z,
        Err(antwort) => return Some(antwort),
    };

    if state.broadcaster.an_verbindung_senden(
        &ziel.connection,
        ControlMessage::push(ControlPayload::EncryptedMessage(EncryptedMessage {
            target_id: message.target_id,
            encrypted_data: message.encrypted_data,
            from: Some(client_id),
            timestamp: Some(jetzt_ms()),
        })),
    ) {
        state.statistik.weitergeleitet();
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use chrono::Utc;
    use relaydesk_core::types::ConnectionId;

    fn eintragen(state: &SignalingState, id: &str, verschluesselung: bool) -> ConnectionId {
        let conn = ConnectionId::new();
        state.registry.registrieren(ClientRecord {
            id: ClientId::from(id),
            connection: conn,
            name: id.into(),
            address: "127.0.0.1:1".parse().unwrap(),
            platform: "linux".into(),
            is_available: true,
            supports_encryption: verschluesselung,
            last_seen: Utc::now(),
            public_key: verschluesselung.then(|| "PK".to_string()),
        });
        conn
    }

    fn fehler_code(antwort: Option<ControlMessage>) -> ErrorCode {
        match antwort.map(|a| a.payload) {
            Some(ControlPayload::CryptoError(e)) => e.code,
            andere => panic!("crypto-error erwartet, erhalten {:?}", andere),
        }
    }

    #[tokio::test]
    async fn handshake_an_unbekanntes_ziel() {
        let state = SignalingState::neu(SignalingConfig::default());
        let req = CryptoHandshakeRequest {
            target_id: ClientId::from("fehlt"),
            public_key: "PK".into(),
        };
        let antwort = handle_crypto_handshake(req, 1, ClientId::from("r"), &state).await;
        match antwort.map(|a| a.payload) {
            Some(ControlPayload::CryptoError(e)) => {
                assert_eq!(e.code, ErrorCode::NotFound);
                assert_eq!(e.target_id, Some(ClientId::from("fehlt")));
            }
            andere => panic!("crypto-error erwartet, erhalten {:?}", andere),
        }
    }

    #[tokio::test]
    async fn handshake_ohne_verschluesselung_beim_ziel() {
        let state = SignalingState::neu(SignalingConfig::default());
        eintragen(&state, "a", false);
        let req = CryptoHandshakeRequest {
            target_id: ClientId::from("a"),
            public_key: "PK".into(),
        };
        let antwort = handle_crypto_handshake(req, 1, ClientId::from("r"), &state).await;
        assert_eq!(fehler_code(antwort), ErrorCode::CryptoUnavailable);
    }

    #[tokio::test]
    async fn handshake_wird_als_init_weitergeleitet() {
        let state = SignalingState::neu(SignalingConfig::default());
        let conn = eintragen(&state, "a", true);
        let mut rx = state.broadcaster.verbindung_registrieren(conn);

        let req = CryptoHandshakeRequest {
            target_id: ClientId::from("a"),
            public_key: "R-PK".into(),
        };
        assert!(handle_crypto_handshake(req, 1, ClientId::from("r"), &state)
            .await
            .is_none());

        match rx.try_recv().unwrap().payload {
            ControlPayload::HandshakeInit(init) => {
                assert_eq!(init.requester_id, ClientId::from("r"));
                assert_eq!(init.requester_public_key, "R-PK");
            }
            andere => panic!("Unerwartet: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn session_key_traegt_absender() {
        let state = SignalingState::neu(SignalingConfig::default());
        let conn = eintragen(&state, "r", true);
        let mut rx = state.broadcaster.verbindung_registrieren(conn);

        let msg = SessionKeyMessage {
            requester_id: ClientId::from("r"),
            encrypted_session_key: "WRAPPED".into(),
            from: None,
        };
        handle_session_key(msg, 1, ClientId::from("a"), &state).await;

        match rx.try_recv().unwrap().payload {
            ControlPayload::SessionKey(k) => {
                assert_eq!(k.from, Some(ClientId::from("a")));
                assert_eq!(k.encrypted_session_key, "WRAPPED");
            }
            andere => panic!("Unerwartet: {:?}", andere),
        }
    }

    #[tokio::test]
    async fn verschluesselte_nachricht_erhaelt_timestamp() {
        let state = SignalingState::neu(SignalingConfig::default());
        let conn = eintragen(&state, "b", true);
        let mut rx = state.broadcaster.verbindung_registrieren(conn);

        let msg = EncryptedMessage {
            target_id: ClientId::from("b"),
            encrypted_data: "CT".into(),
            from: Some(ClientId::from("gefaelscht")),
            timestamp: None,
        };
        handle_encrypted_message(msg, 1, ClientId::from("a"), &state).await;

        match rx.try_recv().unwrap().payload {
            ControlPayload::EncryptedMessage(m) => {
                assert_eq!(m.from, Some(ClientId::from("a")));
                assert!(m.timestamp.is_some());
            }
            andere => panic!("Unerwartet: {:?}", andere),
        }
        assert_eq!(state.statistik.snapshot().weitergeleitet, 1);
    }
}
