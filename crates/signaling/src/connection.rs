//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Die Send-Queue der Verbindung wird sofort beim Broadcaster
//! angemeldet, damit weitergeleitete Nachrichten auch vor der Registrierung
//! zugestellt werden koennen.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Client muss innerhalb von `verbindungs_timeout_sek` etwas senden
//! - Bei Timeout wird die Verbindung getrennt

use futures_util::{SinkExt, StreamExt};
use relaydesk_core::types::ConnectionId;
use relaydesk_protocol::{
    control::{ControlMessage, ErrorCode},
    wire::{Frame, FrameCodec},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne TCP-Verbindung
///
/// Liest Frames via `FrameCodec`, dispatcht an `MessageDispatcher` und
/// sendet Antworten zurueck.
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    connection_id: ConnectionId,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self {
            state,
            peer_addr,
            connection_id: ConnectionId::new(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht. Danach werden Registry, Sitzungen und Queue aufgeraeumt.
    pub async fn verarbeiten<S>(
        self,
        stream: S,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer_addr = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        tracing::info!(peer = %peer_addr, connection_id = %self.connection_id, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::new());
        let mut sende_rx = self.state.broadcaster.verbindung_registrieren(self.connection_id);

        let mut ctx = DispatcherContext::neu(peer_addr, self.connection_id);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        let mut letzter_empfang = Instant::now();
        let mut naechster_ping = Instant::now() + keepalive_intervall;
        let mut ping_request_id: u32 = 0;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                // Eingehender Frame vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(Frame::Message(nachricht))) => {
                            letzter_empfang = Instant::now();
                            if let Some(id) = &ctx.client_id {
                                self.state.registry.zuletzt_gesehen_aktualisieren(id, &self.connection_id);
                            }
                            tracing::trace!(
                                peer = %peer_addr,
                                request_id = nachricht.request_id,
                                typ = nachricht.payload.typ_name(),
                                "Nachricht empfangen"
                            );

                            if let Some(antwort) = dispatcher.dispatch(nachricht, &mut ctx).await {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }
                        }
                        Some(Ok(Frame::Malformed { reason })) => {
                            letzter_empfang = Instant::now();
                            tracing::debug!(peer = %peer_addr, grund = %reason, "Ungueltiger Frame");
                            let fehler = ControlMessage::error(0, ErrorCode::InvalidRequest, reason);
                            if let Err(e) = framed.send(fehler).await {
                                tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus dem Broadcaster
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Weiterleitung fehlgeschlagen");
                        break;
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        ping_request_id = ping_request_id.wrapping_add(1);
                        let ts = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64;

                        if let Err(e) = framed.send(ControlMessage::ping(ping_request_id, ts)).await {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = ControlMessage::error(
                            0,
                            ErrorCode::InternalError,
                            "Server wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        dispatcher.verbindung_aufraeumen(&ctx);
        tracing::info!(peer = %peer_addr, "Verbindungs-Task beendet");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_state::SignalingConfig;
    use bytes::BufMut;
    use relaydesk_protocol::control::ControlPayload;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn ungueltiger_frame_beendet_verbindung_nicht() {
        let state = SignalingState::neu(SignalingConfig::default());
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let verbindung = ClientConnection::neu(Arc::clone(&state), "127.0.0.1:1".parse().unwrap());
        let task = tokio::spawn(verbindung.verarbeiten(server, shutdown_rx));

        let mut client = Framed::new(client, FrameCodec::new());

        // Ungueltiges JSON mit gueltigem Laengenpraefix
        let muell = b"{kein json";
        let mut roh = bytes::BytesMut::new();
        roh.put_u32(muell.len() as u32);
        roh.put_slice(muell);
        client.get_mut().write_all(&roh).await.unwrap();

        match client.next().await {
            Some(Ok(Frame::Message(m))) => assert!(matches!(
                m.payload,
                ControlPayload::Error(ref e) if e.code == ErrorCode::InvalidRequest
            )),
            andere => panic!("Fehlerantwort erwartet: {:?}", andere),
        }

        // Verbindung lebt noch
        client.send(ControlMessage::ping(7, 1)).await.unwrap();
        match client.next().await {
            Some(Ok(Frame::Message(m))) => {
                assert_eq!(m.request_id, 7);
                assert!(matches!(m.payload, ControlPayload::Pong(_)));
            }
            andere => panic!("Pong erwartet: {:?}", andere),
        }

        drop(client);
        task.await.unwrap();
        assert_eq!(state.broadcaster.verbindungs_anzahl(), 0);
    }
}
