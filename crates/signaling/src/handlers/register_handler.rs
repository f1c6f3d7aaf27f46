//! Register-Handler – Registrierung und Schluessel-Abfrage
//!
//! Eine Registrierung ersetzt einen vorhandenen Eintrag unter derselben ID
//! vollstaendig. Registriert sich eine Verbindung unter einer neuen ID,
//! wird ihre alte ID freigegeben und als abgemeldet gemeldet.

use chrono::Utc;
use relaydesk_core::types::ClientId;
use relaydesk_protocol::control::{
    ClientDisconnected, ClientRegistered, ClientsList, ControlMessage, ControlPayload, ErrorCode,
    PublicKeyRequest, PublicKeyResponse, RegisterClientRequest,
};
use std::sync::Arc;

use crate::dispatcher::DispatcherContext;
use crate::registry::ClientRecord;
use crate::server_state::SignalingState;

/// Verarbeitet `register-client`
///
/// Antwortet mit `client-registered`, stellt `clients-list` in die eigene
/// Queue und meldet den neuen Client allen anderen per `client-connected`.
pub async fn handle_register(
    request: RegisterClientRequest,
    request_id: u32,
    ctx: &mut DispatcherContext,
    state: &Arc<SignalingState>,
) -> ControlMessage {
    if let Some(geheimnis) = &state.config.zugangs_geheimnis {
        if request.secret.as_deref() != Some(geheimnis.as_str()) {
            tracing::warn!(peer = %ctx.peer_addr, "Registrierung mit falschem Zugangsgeheimnis");
            return ControlMessage::error(
                request_id,
                ErrorCode::PermissionDenied,
                "Zugangsgeheimnis ungueltig",
            );
        }
    }

    let client_id = match request.client_id {
        Some(id) if !id.as_str().trim().is_empty() => id,
        _ => ClientId::generieren(),
    };

    // Alte ID dieser Verbindung freigeben
    if let Some(alte_id) = ctx.client_id.take() {
        if alte_id != client_id {
            alte_id_freigeben(&alte_id, ctx, state);
        }
    }

    let supports_encryption =
        request.supports_encryption.unwrap_or(false) || request.public_key.is_some();

    let record = ClientRecord {
        id: client_id.clone(),
        connection: ctx.connection_id,
        name: request
            .name
            .unwrap_or_else(|| format!("Client {}", client_id.kurzform())),
        address: ctx.peer_addr,
        platform: request.platform.unwrap_or_else(|| "unknown".to_string()),
        is_available: true,
        supports_encryption,
        last_seen: Utc::now(),
        public_key: request.public_key,
    };
    let info = record.to_info();
    state.registry.registrieren(record);
    ctx.client_id = Some(client_id.clone());

    // Liste der anderen Clients folgt der Bestaetigung ueber die eigene Queue
    let clients = state.registry.andere_clients(&client_id);
    state.broadcaster.an_verbindung_senden(
        &ctx.connection_id,
        ControlMessage::push(ControlPayload::ClientsList(ClientsList { clients })),
    );

    let ziele = state.registry.verbindungen_ausser(&client_id);
    let anzahl = state
        .broadcaster
        .an_verbindungen_senden(ziele, ControlMessage::push(ControlPayload::ClientConnected(info)));

    tracing::info!(
        client_id = %client_id,
        peer = %ctx.peer_addr,
        verschluesselung = supports_encryption,
        benachrichtigt = anzahl,
        "Client registriert"
    );

    ControlMessage::new(
        request_id,
        ControlPayload::ClientRegistered(ClientRegistered {
            client_id,
            server_supports_encryption: state.config.verschluesselung_unterstuetzt,
        }),
    )
}

/// Verarbeitet `public-key-request`
pub async fn handle_public_key_request(
    request: PublicKeyRequest,
    request_id: u32,
    state: &Arc<SignalingState>,
) -> ControlMessage {
    let public_key = state.registry.public_key(&request.client_id);
    ControlMessage::new(
        request_id,
        ControlPayload::PublicKeyResponse(PublicKeyResponse {
            client_id: request.client_id,
            public_key,
        }),
    )
}

/// Entfernt die vorherige ID einer Verbindung und meldet sie als abgemeldet
fn alte_id_freigeben(alte_id: &ClientId, ctx: &DispatcherContext, state: &SignalingState) {
    if state
        .registry
        .entfernen_wenn_verbindung(alte_id, &ctx.connection_id)
        .is_none()
    {
        return;
    }
    let ziele = state.registry.verbindungen_ausser(alte_id);
    state.broadcaster.an_verbindungen_senden(
        ziele,
        ControlMessage::push(ControlPayload::ClientDisconnected(ClientDisconnected {
            client_id: alte_id.clone(),
        })),
    );
    tracing::info!(client_id = %alte_id, "Alte Client-ID freigegeben");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
