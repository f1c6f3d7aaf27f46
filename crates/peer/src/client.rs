//! Endpunkt-seitige TCP-Verbindung zum Relay
//!
//! Nutzt den FrameCodec aus relaydesk-protocol (u32 BE length + JSON).
//! Nachrichten, die waehrend des Wartens auf eine Antwort eintreffen,
//! werden gepuffert und spaeter von `naechste_nachricht` geliefert.

use futures_util::{SinkExt, StreamExt};
use relaydesk_core::types::{ClientId, ConnectionId, SessionId};
use relaydesk_protocol::control::{
    ClientRegistered, ConnectionRequest, ConnectionResponse, ControlMessage, ControlPayload,
    CryptoHandshakeRequest, EncryptedMessage, ErrorNotice, ErrorResponse, PublicKeyRequest, PublicKeyResponse,
    RegisterClientRequest, SessionCloseRequest, SessionKeyMessage, SignalEnvelope,
};
use relaydesk_protocol::wire::{Frame, FrameCodec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::error::{PeerError, PeerResult};

// ---------------------------------------------------------------------------
// SignalingClient
// ---------------------------------------------------------------------------

/// TCP-Verbindung eines Endpunkts zum Relay
pub struct SignalingClient {
    /// Framed TCP-Stream mit FrameCodec
    framed: Framed<TcpStream, FrameCodec>,
    /// Eigene ID nach der Registrierung
    client_id: Option<ClientId>,
    /// Monoton steigender Request-ID-Zaehler
    next_request_id: AtomicU32,
    /// Beim Warten uebersprungene Nachrichten
    gepuffert: VecDeque<ControlMessage>,
}

impl SignalingClient {
    /// Baut eine TCP-Verbindung zum Relay auf
    pub async fn verbinden(addr: impl ToSocketAddrs) -> PeerResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::info!(peer = ?stream.peer_addr().ok(), "TCP-Verbindung zum Relay hergestellt");

        Ok(Self {
            framed: Framed::new(stream, FrameCodec::new()),
            client_id: None,
            next_request_id: AtomicU32::new(1),
            gepuffert: VecDeque::new(),
        })
    }

    /// Eigene ID (nach `registrieren`)
    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Generiert die naechste Request-ID
    fn next_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sendet eine Nachricht und liefert deren Request-ID
    pub async fn senden(&mut self, payload: ControlPayload) -> PeerResult<u32> {
        let request_id = self.next_id();
        self.framed
            .send(ControlMessage::new(request_id, payload))
            .await?;
        Ok(request_id)
    }

    /// Empfaengt die naechste Nachricht
    ///
    /// Pings des Relays werden automatisch beantwortet, unlesbare Frames
    /// uebersprungen.
    pub async fn naechste_nachricht(&mut self) -> PeerResult<ControlMessage> {
        if let Some(msg) = self.gepuffert.pop_front() {
            return Ok(msg);
        }
        self.vom_stream_lesen().await
    }

    async fn vom_stream_lesen(&mut self) -> PeerResult<ControlMessage> {
        loop {
            match self.framed.next().await {
                Some(Ok(Frame::Message(msg))) => {
                    if let ControlPayload::Ping(ref ping) = msg.payload {
                        let pong = ControlMessage::pong(msg.request_id, ping.timestamp_ms, jetzt_ms());
                        self.framed.send(pong).await?;
                        continue;
                    }
                    return Ok(msg);
                }
                Some(Ok(Frame::Malformed { reason })) => {
                    tracing::warn!(grund = %reason, "Unlesbarer Frame vom Relay");
                }
                Some(Err(e)) => return Err(PeerError::Io(e)),
                None => return Err(PeerError::VerbindungGetrennt),
            }
        }
    }

    /// Wartet auf die erste Nachricht, fuer die `pruefen` zutrifft
    ///
    /// Andere Nachrichten bleiben gepuffert und in ihrer Reihenfolge erhalten.
    pub async fn warten_auf<F>(&mut self, pruefen: F, timeout: Duration) -> PeerResult<ControlMessage>
    where
        F: Fn(&ControlMessage) -> bool,
    {
        if let Some(pos) = self.gepuffert.iter().position(&pruefen) {
            if let Some(msg) = self.gepuffert.remove(pos) {
                return Ok(msg);
            }
        }

        let warten = async {
            loop {
                let msg = self.vom_stream_lesen().await?;
                if pruefen(&msg) {
                    return Ok(msg);
                }
                self.gepuffert.push_back(msg);
            }
        };
        tokio::time::timeout(timeout, warten)
            .await
            .map_err(|_| PeerError::Zeitlimit("Warten auf Nachricht vom Relay".into()))?
    }

    /// Wartet auf die direkte Antwort zu `request_id`
    async fn antwort_zu(&mut self, request_id: u32) -> PeerResult<ControlMessage> {
        let antwort = self
            .warten_auf(|m| m.request_id == request_id, Duration::from_secs(10))
            .await?;
        Self::check_error(&antwort)?;
        Ok(antwort)
    }

    /// Prueft ob die Antwort ein Fehler ist und konvertiert ihn
    fn check_error(response: &ControlMessage) -> PeerResult<()> {
        match &response.payload {
            ControlPayload::Error(ErrorResponse { code, message, .. })
            | ControlPayload::ConnectionError(ErrorNotice { code, message, .. })
            | ControlPayload::CryptoError(ErrorNotice { code, message, .. }) => Err(PeerError::Server {
                code: *code,
                message: message.clone(),
            }),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Registrierung
    // -----------------------------------------------------------------------

    /// Registriert den Endpunkt beim Relay
    pub async fn registrieren(&mut self, req: RegisterClientRequest) -> PeerResult<ClientRegistered> {
        let request_id = self.senden(ControlPayload::RegisterClient(req)).await?;
        let antwort = self.antwort_zu(request_id).await?;

        match antwort.payload {
            ControlPayload::ClientRegistered(registriert) => {
                tracing::info!(client_id = %registriert.client_id, "Beim Relay registriert");
                self.client_id = Some(registriert.client_id.clone());
                Ok(registriert)
            }
            andere => Err(PeerError::UnerwarteteAntwort(format!(
                "Erwartet client-registered, erhalten: {}",
                andere.typ_name()
            ))),
        }
    }

    /// Fragt den oeffentlichen Schluessel eines Clients ab
    pub async fn public_key_abfragen(&mut self, client_id: ClientId) -> PeerResult<PublicKeyResponse> {
        let request_id = self
            .senden(ControlPayload::PublicKeyRequest(PublicKeyRequest { client_id }))
            .await?;
        match self.antwort_zu(request_id).await?.payload {
            ControlPayload::PublicKeyResponse(r) => Ok(r),
            andere => Err(PeerError::UnerwarteteAntwort(format!(
                "Erwartet public-key-response, erhalten: {}",
                andere.typ_name()
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Aushandlung
    // -----------------------------------------------------------------------

    /// Sendet eine Verbindungsanfrage an `target_id`
    ///
    /// Das Ergebnis (angenommen, abgelehnt, abgelaufen) kommt spaeter als
    /// eigene Nachricht.
    pub async fn verbindung_anfragen(
        &mut self,
        target_id: ClientId,
        password: Option<String>,
    ) -> PeerResult<u32> {
        let requester_id = self
            .client_id
            .clone()
            .ok_or_else(|| PeerError::UnerwarteteAntwort("Nicht registriert".into()))?;
        self.senden(ControlPayload::ConnectionRequest(ConnectionRequest {
            target_id,
            requester_id,
            password,
        }))
        .await
    }

    /// Beantwortet eine eingegangene Verbindungsanfrage
    pub async fn antworten(
        &mut self,
        requester_channel: ConnectionId,
        accepted: bool,
        reason: Option<String>,
    ) -> PeerResult<u32> {
        self.senden(ControlPayload::ConnectionResponse(ConnectionResponse {
            requester_channel,
            accepted,
            reason,
        }))
        .await
    }

    /// Schliesst eine Sitzung
    pub async fn sitzung_schliessen(&mut self, session_id: SessionId) -> PeerResult<u32> {
        self.senden(ControlPayload::SessionClose(SessionCloseRequest { session_id }))
            .await
    }

    /// Sendet eine sitzungsgebundene Nachricht ueber das Relay
    ///
    /// `bauen` waehlt die Nachrichtenart (Offer, Answer, Chat, ...).
    pub async fn relay(
        &mut self,
        bauen: fn(SignalEnvelope) -> ControlPayload,
        session_id: SessionId,
        payload: serde_json::Value,
    ) -> PeerResult<u32> {
        self.senden(bauen(SignalEnvelope::new(session_id, payload)))
            .await
    }

    // -----------------------------------------------------------------------
    // Krypto
    // -----------------------------------------------------------------------

    /// Stoesst einen Handshake an
    pub async fn handshake_senden(&mut self, req: CryptoHandshakeRequest) -> PeerResult<u32> {
        self.senden(ControlPayload::CryptoHandshake(req)).await
    }

    /// Schickt den eingewickelten Sitzungsschluessel zurueck
    pub async fn session_key_senden(&mut self, msg: SessionKeyMessage) -> PeerResult<u32> {
        self.senden(ControlPayload::SessionKey(msg)).await
    }

    /// Sendet eine verschluesselte Direktnachricht
    pub async fn verschluesselt_senden(
        &mut self,
        target_id: ClientId,
        encrypted_data: String,
    ) -> PeerResult<u32> {
        self.senden(ControlPayload::EncryptedMessage(EncryptedMessage {
            target_id,
            encrypted_data,
            from: None,
            timestamp: None,
        }))
        .await
    }
}

fn jetzt_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
