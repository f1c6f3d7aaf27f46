//! Relay-Handler – Sitzungsgebundene Nachrichten weiterleiten
//!
//! Offer, Answer, Candidate sowie Fernsteuerungs-, Chat- und
//! Datei-Nachrichten werden unveraendert an das andere Mitglied der Sitzung
//! weitergegeben. Nur `from` wird gesetzt.

use relaydesk_core::types::ClientId;
use relaydesk_protocol::control::{ControlMessage, ControlPayload, ErrorCode};
use std::sync::Arc;

use crate::dispatcher::DispatcherContext;
use crate::server_state::SignalingState;

/// Leitet eine Relay-Nachricht weiter
///
/// Gibt nur im Fehlerfall eine Antwort an den Absender zurueck.
pub async fn handle_relay(
    mut payload: ControlPayload,
    request_id: u32,
    client_id: ClientId,
    ctx: &DispatcherContext,
    state: &Arc<SignalingState>,
) -> Option<ControlMessage> {
    let typ = payload.typ_name();
    let envelope = match payload.signal_envelope_mut() {
        Some(e) => e,
        None => {
            return Some(ControlMessage::error(
                request_id,
                ErrorCode::InvalidRequest,
                "Keine Relay-Nachricht",
            ))
        }
    };
    let session_id = envelope.session_id;

    let gegenstelle = match state.sessions.gegenstelle(&session_id, &ctx.connection_id) {
        Ok(Some(m)) => m,
        Ok(None) => {
            tracing::trace!(session_id = %session_id, typ, "Kein anderes Mitglied – verworfen");
            return None;
        }
        Err(e) => {
            tracing::debug!(session_id = %session_id, client_id = %client_id, fehler = %e, "Relay abgelehnt");
            return Some(ControlMessage::error(request_id, e.error_code(), e.to_string()));
        }
    };

    envelope.from = Some(client_id);
    if state
        .broadcaster
        .an_verbindung_senden(&gegenstelle.connection, ControlMessage::push(payload))
    {
        state.statistik.weitergeleitet();
        tracing::trace!(session_id = %session_id, typ, ziel = %gegenstelle.client_id, "Weitergeleitet");
    }
    None
}
