//! Session-Handler – Verbindungsanfrage, Antwort, Sitzungsende
//!
//! Die Antwort eines Ziels wird an den Kanal-Verweis geroutet, den die
//! Anfrage mitgebracht hat, nicht an das Ergebnis einer neuen Suche in der
//! Registry.

use relaydesk_core::types::ClientId;
use relaydesk_protocol::control::{
    ConnectionAccepted, ConnectionRejected, ConnectionRequest, ConnectionRequested,
    ConnectionResponse, ConnectionTimeout, ControlMessage, ControlPayload, ErrorCode,
    SessionCloseRequest, SessionClosed,
};
use std::sync::Arc;

use super::jetzt_ms;
use crate::dispatcher::DispatcherContext;
use crate::server_state::SignalingState;
use crate::sessions::{NegotiationOutcome, PendingKey};

/// Verarbeitet `connection-request`
///
/// Unbekanntes Ziel: genau ein `connection-error` an den Anfragenden.
/// Sonst wird `connection-requested` an das Ziel weitergeleitet und ein
/// Timer fuer den Uebergang nach `TimedOut` gestartet.
pub async fn handle_connection_request(
    request: ConnectionRequest,
    request_id: u32,
    client_id: ClientId,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> Option<ControlMessage> {
    if request.requester_id != client_id {
        return Some(ControlMessage::error(
            request_id,
            ErrorCode::InvalidRequest,
            "requesterId stimmt nicht mit der registrierten ID ueberein",
        ));
    }

    let ziel = match state.registry.suchen(&request.target_id) {
        Some(z) => z,
        None => {
            state.statistik.fehlgeschlagen();
            tracing::debug!(
                requester = %client_id,
                target = %request.target_id,
                "Verbindungsanfrage an unbekanntes Ziel"
            );
            return Some(ControlMessage::connection_error(
                request_id,
                ErrorCode::NotFound,
                format!("Client {} nicht gefunden", request.target_id),
            ));
        }
    };

    let anfrage = state.sessions.anfrage_registrieren(
        client_id.clone(),
        ctx.connection_id,
        ziel.id.clone(),
        ziel.connection,
    );
    let key = PendingKey {
        requester_channel: ctx.connection_id,
        target_id: ziel.id.clone(),
    };

    let weitergeleitet = state.broadcaster.an_verbindung_senden(
        &ziel.connection,
        ControlMessage::push(ControlPayload::ConnectionRequested(ConnectionRequested {
            requester_id: client_id.clone(),
            requester_channel: ctx.connection_id,
            timestamp: jetzt_ms(),
            password: request.password,
        })),
    );
    if !weitergeleitet {
        state.sessions.ablaufen(&key, anfrage.token);
        state.statistik.fehlgeschlagen();
        return Some(ControlMessage::connection_error(
            request_id,
            ErrorCode::NotFound,
            format!("Client {} nicht erreichbar", ziel.id),
        ));
    }

    tracing::info!(
        requester = %client_id,
        target = %ziel.id,
        "Verbindungsanfrage weitergeleitet"
    );

    timer_starten(Arc::clone(state), key, anfrage.token);
    None
}

/// Startet den Ablauf-Timer einer offenen Anfrage
fn timer_starten(state: Arc<SignalingState>, key: PendingKey, token: u64) {
    let dauer = state.config.anfrage_timeout();
    tokio::spawn(async move {
        tokio::time::sleep(dauer).await;
        if let Some(anfrage) = state.sessions.ablaufen(&key, token) {
            state.statistik.abgelaufen();
            tracing::info!(
                requester = %anfrage.requester_id,
                target = %anfrage.target_id,
                "Verbindungsanfrage abgelaufen"
            );
            state.broadcaster.an_verbindung_senden(
                &anfrage.requester_channel,
                ControlMessage::push(ControlPayload::ConnectionTimeout(ConnectionTimeout {
                    target_id: anfrage.target_id,
                })),
            );
        }
    });
}

/// Verarbeitet `connection-response`
pub async fn handle_connection_response(
    response: ConnectionResponse,
    request_id: u32,
    client_id: ClientId,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> Option<ControlMessage> {
    let ergebnis = state.sessions.antworten(
        response.requester_channel,
        &client_id,
        ctx.connection_id,
        response.accepted,
    );

    match ergebnis {
        Err(e) => {
            tracing::debug!(client_id = %client_id, fehler = %e, "Antwort ohne offene Anfrage");
            Some(ControlMessage::error(request_id, e.error_code(), e.to_string()))
        }
        Ok(NegotiationOutcome::Rejected { anfrage }) => {
            state.statistik.abgelehnt();
            let message = response
                .reason
                .unwrap_or_else(|| "Verbindung abgelehnt".to_string());
            state.broadcaster.an_verbindung_senden(
                &anfrage.requester_channel,
                ControlMessage::push(ControlPayload::ConnectionRejected(ConnectionRejected {
                    message,
                })),
            );
            tracing::info!(
                requester = %anfrage.requester_id,
                target = %client_id,
                "Verbindung abgelehnt"
            );
            None
        }
        Ok(NegotiationOutcome::Accepted { anfrage, session }) => {
            state.statistik.angenommen();
            state.broadcaster.an_verbindung_senden(
                &anfrage.requester_channel,
                ControlMessage::push(ControlPayload::ConnectionAccepted(ConnectionAccepted {
                    session_id: session.id,
                    peer_id: client_id.clone(),
                })),
            );
            tracing::info!(
                session_id = %session.id,
                requester = %anfrage.requester_id,
                target = %client_id,
                "Sitzung erstellt"
            );
            Some(ControlMessage::new(
                request_id,
                ControlPayload::ConnectionAccepted(ConnectionAccepted {
                    session_id: session.id,
                    peer_id: anfrage.requester_id,
                }),
            ))
        }
    }
}

/// Verarbeitet `session-close`
///
/// Das andere Mitglied erhaelt `session-closed`, der Absender dieselbe
/// Nachricht als Bestaetigung.
pub async fn handle_session_close(
    request: SessionCloseRequest,
    request_id: u32,
    client_id: ClientId,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> ControlMessage {
    let session = match state.sessions.schliessen(&request.session_id, &ctx.connection_id) {
        Ok(s) => s,
        Err(e) => return ControlMessage::error(request_id, e.error_code(), e.to_string()),
    };

    let reason = format!("Sitzung von {} beendet", client_id);
    if let Some(andere) = session.gegenstelle(&ctx.connection_id) {
        state.broadcaster.an_verbindung_senden(
            &andere.connection,
            ControlMessage::push(ControlPayload::SessionClosed(SessionClosed {
                session_id: session.id,
                reason: reason.clone(),
            })),
        );
    }
    tracing::info!(session_id = %session.id, client_id = %client_id, "Sitzung geschlossen");

    ControlMessage::new(
        request_id,
        ControlPayload::SessionClosed(SessionClosed {
            session_id: session.id,
            reason,
        }),
    )
}
