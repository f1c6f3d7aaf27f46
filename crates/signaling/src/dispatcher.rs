//! Message-Dispatcher – Routet ControlMessages an die richtigen Handler
//!
//! Der Dispatcher empfaengt ControlMessages von einer ClientConnection,
//! bestimmt den richtigen Handler und gibt die Antwort zurueck.
//!
//! ## Zustandspruefung
//! - `register-client`, `ping` und `pong` sind immer erlaubt
//! - Alle anderen Nachrichten erst nach erfolgreicher Registrierung
//!
//! ## Fehlergrenze
//! Jeder Handler laeuft innerhalb von `catch_unwind`. Ein Panic wird als
//! `InternalError` beantwortet, die Verbindung bleibt bestehen.

use futures_util::FutureExt;
use relaydesk_core::types::{ClientId, ConnectionId};
use relaydesk_protocol::control::{
    ClientDisconnected, ControlMessage, ControlPayload, ErrorCode, SessionClosed,
};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::handlers::{crypto_handler, register_handler, relay_handler, session_handler};
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
#[derive(Debug, Clone)]
pub struct DispatcherContext {
    /// Adresse des Gegenuebers
    pub peer_addr: SocketAddr,
    /// Kanal-Verweis dieser Verbindung
    pub connection_id: ConnectionId,
    /// Registrierte Client-ID (None vor `register-client`)
    pub client_id: Option<ClientId>,
}

impl DispatcherContext {
    pub fn neu(peer_addr: SocketAddr, connection_id: ConnectionId) -> Self {
        Self {
            peer_addr,
            connection_id,
            client_id: None,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende ControlMessage und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort gesendet werden soll
    /// (weitergeleitete Nachrichten, Pong).
    pub async fn dispatch(
        &self,
        message: ControlMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<ControlMessage> {
        let request_id = message.request_id;
        let typ = message.payload.typ_name();

        match AssertUnwindSafe(self.route(message, ctx)).catch_unwind().await {
            Ok(antwort) => antwort,
            Err(_) => {
                tracing::error!(
                    peer = %ctx.peer_addr,
                    request_id,
                    typ,
                    "Handler abgebrochen (Panic)"
                );
                Some(ControlMessage::error(
                    request_id,
                    ErrorCode::InternalError,
                    "Interner Fehler bei der Verarbeitung",
                ))
            }
        }
    }

    async fn route(
        &self,
        message: ControlMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<ControlMessage> {
        let request_id = message.request_id;

        match message.payload {
            // -------------------------------------------------------------------
            // Immer erlaubt
            // -------------------------------------------------------------------
            ControlPayload::RegisterClient(req) => {
                Some(register_handler::handle_register(req, request_id, ctx, &self.state).await)
            }

            ControlPayload::Ping(ping) => {
                let server_ts = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis() as u64;
                Some(ControlMessage::pong(request_id, ping.timestamp_ms, server_ts))
            }

            ControlPayload::Pong(_) => {
                tracing::trace!("Pong empfangen (RTT-Messung)");
                None
            }

            // -------------------------------------------------------------------
            // Registrierung erforderlich
            // -------------------------------------------------------------------
            payload => {
                let client_id = match ctx.client_id.clone() {
                    Some(id) => id,
                    None => {
                        return Some(ControlMessage::error(
                            request_id,
                            ErrorCode::PermissionDenied,
                            "Nicht registriert – bitte zuerst register-client senden",
                        ));
                    }
                };

                self.dispatch_registriert(payload, request_id, client_id, ctx)
                    .await
            }
        }
    }

    /// Routet Nachrichten die eine Registrierung erfordern
    async fn dispatch_registriert(
        &self,
        payload: ControlPayload,
        request_id: u32,
        client_id: ClientId,
        ctx: &DispatcherContext,
    ) -> Option<ControlMessage> {
        match payload {
            // -------------------------------------------------------------------
            // Verbindungsaushandlung
            // -------------------------------------------------------------------
            ControlPayload::ConnectionRequest(req) => {
                session_handler::handle_connection_request(
                    req,
                    request_id,
                    client_id,
                    ctx,
                    &self.state,
                )
                .await
            }

            ControlPayload::ConnectionResponse(resp) => {
                session_handler::handle_connection_response(
                    resp,
                    request_id,
                    client_id,
                    ctx,
                    &self.state,
                )
                .await
            }

            ControlPayload::SessionClose(req) => Some(
                session_handler::handle_session_close(req, request_id, client_id, ctx, &self.state)
                    .await,
            ),

            // -------------------------------------------------------------------
            // Signal-Relay
            // -------------------------------------------------------------------
            payload @ (ControlPayload::WebrtcOffer(_)
            | ControlPayload::WebrtcAnswer(_)
            | ControlPayload::IceCandidate(_)
            | ControlPayload::RemoteControl(_)
            | ControlPayload::ChatMessage(_)
            | ControlPayload::FileTransfer(_)
            | ControlPayload::FileTransferRequest(_)
            | ControlPayload::FileTransferResponse(_)) => {
                relay_handler::handle_relay(payload, request_id, client_id, ctx, &self.state).await
            }

            // -------------------------------------------------------------------
            // Krypto
            // -------------------------------------------------------------------
            ControlPayload::CryptoHandshake(req) => {
                crypto_handler::handle_crypto_handshake(req, request_id, client_id, &self.state)
                    .await
            }

            ControlPayload::SessionKey(msg) => {
                crypto_handler::handle_session_key(msg, request_id, client_id, &self.state).await
            }

            ControlPayload::EncryptedMessage(msg) => {
                crypto_handler::handle_encrypted_message(msg, request_id, client_id, &self.state)
                    .await
            }

            ControlPayload::PublicKeyRequest(req) => Some(
                register_handler::handle_public_key_request(req, request_id, &self.state).await,
            ),

            // -------------------------------------------------------------------
            // Unerwartete Server->Client Nachrichten
            // -------------------------------------------------------------------
            ControlPayload::ClientRegistered(_)
            | ControlPayload::ClientsList(_)
            | ControlPayload::ClientConnected(_)
            | ControlPayload::ClientDisconnected(_)
            | ControlPayload::ConnectionRequested(_)
            | ControlPayload::ConnectionAccepted(_)
            | ControlPayload::ConnectionRejected(_)
            | ControlPayload::ConnectionError(_)
            | ControlPayload::ConnectionTimeout(_)
            | ControlPayload::SessionClosed(_)
            | ControlPayload::HandshakeInit(_)
            | ControlPayload::CryptoError(_)
            | ControlPayload::PublicKeyResponse(_)
            | ControlPayload::Error(_) => {
                tracing::warn!(
                    request_id,
                    client_id = %client_id,
                    "Unerwartete Server->Client Nachricht vom Client empfangen"
                );
                Some(ControlMessage::error(
                    request_id,
                    ErrorCode::InvalidRequest,
                    "Unerwartete Nachricht",
                ))
            }

            // Oben bereits behandelt
            ControlPayload::RegisterClient(_) | ControlPayload::Ping(_) | ControlPayload::Pong(_) => {
                None
            }
        }
    }

    /// Bereinigt alle Ressourcen einer getrennten Verbindung
    ///
    /// Entfernt den Registry-Eintrag (nur wenn er noch zu dieser Verbindung
    /// gehoert), schliesst alle Sitzungen, verwirft offene Anfragen und
    /// meldet die Send-Queue ab.
    pub fn verbindung_aufraeumen(&self, ctx: &DispatcherContext) {
        let state = &self.state;
        let conn = ctx.connection_id;

        if let Some(id) = &ctx.client_id {
            if state.registry.entfernen_wenn_verbindung(id, &conn).is_some() {
                let ziele = state.registry.verbindungen_ausser(id);
                let anzahl = state.broadcaster.an_verbindungen_senden(
                    ziele,
                    ControlMessage::push(ControlPayload::ClientDisconnected(ClientDisconnected {
                        client_id: id.clone(),
                    })),
                );
                tracing::info!(client_id = %id, benachrichtigt = anzahl, "Client abgemeldet");
            }
        }

        let aufgeraeumt = state.sessions.verbindung_beenden(&conn);

        for session in &aufgeraeumt.geschlossene_sitzungen {
            if let Some(andere) = session.gegenstelle(&conn) {
                state.broadcaster.an_verbindung_senden(
                    &andere.connection,
                    ControlMessage::push(ControlPayload::SessionClosed(SessionClosed {
                        session_id: session.id,
                        reason: "Teilnehmer hat die Verbindung getrennt".to_string(),
                    })),
                );
            }
            tracing::info!(session_id = %session.id, "Sitzung durch Trennung beendet");
        }

        // Anfragen an diese Verbindung enden fuer den Anfragenden als Fehler
        for anfrage in &aufgeraeumt.verworfene_anfragen {
            if anfrage.requester_channel != conn {
                state.statistik.fehlgeschlagen();
                state.broadcaster.an_verbindung_senden(
                    &anfrage.requester_channel,
                    ControlMessage::connection_error(
                        0,
                        ErrorCode::NotFound,
                        format!("Client {} hat die Verbindung getrennt", anfrage.target_id),
                    ),
                );
            }
        }

        state.broadcaster.verbindung_entfernen(&conn);
        tracing::debug!(connection_id = %conn, "Verbindungs-Ressourcen bereinigt");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
