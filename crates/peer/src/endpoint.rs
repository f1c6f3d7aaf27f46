//! Endpunkt-Logik ohne eigenes IO
//!
//! `PeerEndpoint` nimmt eingehende Nachrichten entgegen und liefert eine
//! `Reaktion`: Nachrichten, die an das Relay zurueckgehen, und Ereignisse
//! fuer die Anwendung. Das Senden uebernimmt der Aufrufer (z.B. ueber
//! `SignalingClient`).
//!
//! Gestockte Uebertragungen meldet der Endpunkt nicht von selbst: der
//! Aufrufer ruft `stockende_pruefen` periodisch auf (z.B. im Takt von
//! `PeerConfig::stall_timeout`).

use relaydesk_core::types::{ClientId, ConnectionId, SessionId};
use relaydesk_protocol::control::{
    ClientInfo, ConnectionResponse, ControlMessage, ControlPayload, EncryptedMessage, ErrorCode,
    RegisterClientRequest, SignalEnvelope,
};
use relaydesk_protocol::{EncryptionPolicy, TransferMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use crate::config::PeerConfig;
use crate::crypto::{PeerCrypto, Versiegelt};
use crate::error::{PeerError, PeerResult, TransferError};
use crate::handshake::HandshakeManager;
use crate::transfer::{self, Reassembler, TransferEreignis};

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Ereignis fuer die Anwendung
#[derive(Debug)]
pub enum PeerEvent {
    Registriert {
        client_id: ClientId,
        server_verschluesselt: bool,
    },
    ClientsListe(Vec<ClientInfo>),
    ClientVerbunden(ClientInfo),
    ClientGetrennt(ClientId),
    /// Eingehende Anfrage, die Anwendung entscheidet ueber Annahme
    AnfrageEingegangen {
        requester_id: ClientId,
        requester_channel: ConnectionId,
    },
    SitzungAngenommen {
        session_id: SessionId,
        peer_id: ClientId,
    },
    Abgelehnt {
        message: String,
    },
    Abgelaufen {
        target_id: ClientId,
    },
    SitzungGeschlossen {
        session_id: SessionId,
        peer_id: Option<ClientId>,
        reason: String,
    },
    /// Sitzungsgebundene Nachricht (Offer, Answer, Chat, ...)
    Signal {
        art: &'static str,
        session_id: SessionId,
        from: Option<ClientId>,
        payload: serde_json::Value,
    },
    SchluesselEtabliert {
        peer_id: ClientId,
    },
    /// Entschluesselte Direktnachricht
    Nachricht {
        from: ClientId,
        daten: Vec<u8>,
    },
    Transfer(TransferEreignis),
    /// Fehler, der nur eine Nachricht betrifft
    Fehler {
        peer_id: Option<ClientId>,
        fehler: PeerError,
    },
}

/// Ergebnis einer verarbeiteten Nachricht
#[derive(Debug, Default)]
pub struct Reaktion {
    pub senden: Vec<ControlPayload>,
    pub ereignisse: Vec<PeerEvent>,
}

impl Reaktion {
    fn ereignis(ereignis: PeerEvent) -> Self {
        Self {
            senden: Vec::new(),
            ereignisse: vec![ereignis],
        }
    }

    fn fehler(peer_id: Option<ClientId>, fehler: PeerError) -> Self {
        Self::ereignis(PeerEvent::Fehler { peer_id, fehler })
    }
}

// ---------------------------------------------------------------------------
// PeerEndpoint
// ---------------------------------------------------------------------------

/// Zustand eines Endpunkts
pub struct PeerEndpoint {
    config: PeerConfig,
    crypto: PeerCrypto,
    reassembler: Reassembler,
    /// Aktive Sitzungen und deren Gegenstelle
    sitzungen: HashMap<SessionId, ClientId>,
    /// Ziele, an die diese Seite eine Anfrage gestellt hat
    angefragt: HashSet<ClientId>,
}

impl PeerEndpoint {
    pub fn neu(own_id: ClientId, config: PeerConfig) -> Self {
        let handshakes = Arc::new(HandshakeManager::neu(own_id, config.handshake_timeout()));
        let crypto = PeerCrypto::neu(handshakes, config.policy);
        let reassembler = Reassembler::neu(config.stall_timeout());
        Self {
            config,
            crypto,
            reassembler,
            sitzungen: HashMap::new(),
            angefragt: HashSet::new(),
        }
    }

    pub fn own_id(&self) -> &ClientId {
        self.crypto.handshakes().own_id()
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn crypto(&self) -> &PeerCrypto {
        &self.crypto
    }

    /// Sitzung mit `peer`, falls vorhanden
    pub fn sitzung_mit(&self, peer: &ClientId) -> Option<SessionId> {
        self.sitzungen
            .iter()
            .find(|(_, p)| *p == peer)
            .map(|(id, _)| *id)
    }

    // -----------------------------------------------------------------------
    // Ausgehend
    // -----------------------------------------------------------------------

    /// Registrierungsnachricht mit eigenem Schluessel
    pub fn registrierung(&self) -> RegisterClientRequest {
        RegisterClientRequest {
            client_id: Some(self.own_id().clone()),
            name: Some(self.config.name.clone()),
            platform: Some(self.config.platform.clone()),
            supports_encryption: Some(true),
            public_key: Some(self.crypto.handshakes().public_key_base64()),
            secret: None,
        }
    }

    /// Merkt sich, dass diese Seite `target` angefragt hat
    ///
    /// Nach der Annahme startet diese Seite den Handshake.
    pub fn anfrage_vormerken(&mut self, target: ClientId) {
        self.angefragt.insert(target);
    }

    /// Antwort auf eine eingegangene Anfrage
    pub fn anfrage_beantworten(
        &self,
        requester_channel: ConnectionId,
        annehmen: bool,
        reason: Option<String>,
    ) -> ControlPayload {
        ControlPayload::ConnectionResponse(ConnectionResponse {
            requester_channel,
            accepted: annehmen,
            reason,
        })
    }

    /// Versiegelt eine Chat-Nachricht fuer `peer`
    ///
    /// Ohne Schluessel und mit `AllowFallback` geht sie als `chat-message`
    /// im Klartext ueber die Sitzung.
    pub fn chat_nachricht(&self, peer: &ClientId, text: &str) -> PeerResult<ControlPayload> {
        match self.crypto.versiegeln(peer, text.as_bytes())? {
            Versiegelt::Verschluesselt(encrypted_data) => {
                Ok(ControlPayload::EncryptedMessage(EncryptedMessage {
                    target_id: peer.clone(),
                    encrypted_data,
                    from: None,
                    timestamp: None,
                }))
            }
            Versiegelt::Klartext(_) => {
                let session_id = self
                    .sitzung_mit(peer)
                    .ok_or_else(|| PeerError::KeineSitzung(peer.clone()))?;
                Ok(ControlPayload::ChatMessage(SignalEnvelope::new(
                    session_id,
                    serde_json::json!({ "text": text }),
                )))
            }
        }
    }

    /// Zerlegt eine Datei fuer die Uebertragung an `peer`
    pub fn uebertragung_vorbereiten(
        &self,
        peer: &ClientId,
        file_name: &str,
        daten: &[u8],
    ) -> PeerResult<(SessionId, Vec<TransferMessage>)> {
        let session_id = self
            .sitzung_mit(peer)
            .ok_or_else(|| PeerError::KeineSitzung(peer.clone()))?;

        let key = self.crypto.handshakes().schluessel(peer);
        if key.is_none() {
            if self.crypto.policy() == EncryptionPolicy::RequireEncryption {
                return Err(PeerError::KryptoNichtVerfuegbar(peer.clone()));
            }
            tracing::warn!(peer = %peer, datei = %file_name, "Kein Sitzungsschluessel – Uebertragung unverschluesselt");
        }

        let nachrichten = transfer::nachrichten_erzeugen(file_name, daten, key.as_deref())?;
        Ok((session_id, nachrichten))
    }

    /// Meldet und verwirft gestockte Uebertragungen
    ///
    /// Liefert pro gestockter Uebertragung ein `PeerEvent::Fehler` mit
    /// `TransferError::Stockt`.
    pub fn stockende_pruefen(&mut self, jetzt: Instant) -> Vec<PeerEvent> {
        self.reassembler
            .stockende_entfernen(jetzt)
            .into_iter()
            .map(|fehler| PeerEvent::Fehler {
                peer_id: match &fehler {
                    TransferError::Stockt { peer, .. } => Some(peer.clone()),
                    _ => None,
                },
                fehler: fehler.into(),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Eingehend
    // -----------------------------------------------------------------------

    /// Verarbeitet eine Nachricht vom Relay
    pub fn verarbeiten(&mut self, msg: ControlMessage) -> Reaktion {
        match msg.payload {
            ControlPayload::ClientRegistered(r) => Reaktion::ereignis(PeerEvent::Registriert {
                client_id: r.client_id,
                server_verschluesselt: r.server_supports_encryption,
            }),
            ControlPayload::ClientsList(liste) => {
                Reaktion::ereignis(PeerEvent::ClientsListe(liste.clients))
            }
            ControlPayload::ClientConnected(info) => {
                Reaktion::ereignis(PeerEvent::ClientVerbunden(info))
            }
            ControlPayload::ClientDisconnected(d) => {
                self.peer_vergessen(&d.client_id);
                self.sitzungen.retain(|_, p| *p != d.client_id);
                Reaktion::ereignis(PeerEvent::ClientGetrennt(d.client_id))
            }

            ControlPayload::ConnectionRequested(anfrage) => {
                if self.config.passwort_pruefen(anfrage.password.as_deref()) {
                    return Reaktion::ereignis(PeerEvent::AnfrageEingegangen {
                        requester_id: anfrage.requester_id,
                        requester_channel: anfrage.requester_channel,
                    });
                }
                tracing::info!(requester = %anfrage.requester_id, "Anfrage mit falschem Passwort abgelehnt");
                Reaktion {
                    senden: vec![self.anfrage_beantworten(
                        anfrage.requester_channel,
                        false,
                        Some("Falsches Passwort".into()),
                    )],
                    ereignisse: Vec::new(),
                }
            }
            ControlPayload::ConnectionAccepted(a) => self.sitzung_angenommen(a.session_id, a.peer_id),
            ControlPayload::ConnectionRejected(r) => {
                Reaktion::ereignis(PeerEvent::Abgelehnt { message: r.message })
            }
            ControlPayload::ConnectionTimeout(t) => {
                self.angefragt.remove(&t.target_id);
                Reaktion::ereignis(PeerEvent::Abgelaufen {
                    target_id: t.target_id,
                })
            }
            ControlPayload::ConnectionError(e) => Reaktion::fehler(
                None,
                PeerError::Server {
                    code: e.code,
                    message: e.message,
                },
            ),
            ControlPayload::SessionClosed(c) => {
                let peer_id = self.sitzungen.remove(&c.session_id);
                // Schluessel gilt pro Peer: nur mit der letzten Sitzung verwerfen
                if let Some(peer) = &peer_id {
                    if self.sitzung_mit(peer).is_none() {
                        self.peer_vergessen(peer);
                    }
                }
                Reaktion::ereignis(PeerEvent::SitzungGeschlossen {
                    session_id: c.session_id,
                    peer_id,
                    reason: c.reason,
                })
            }

            ControlPayload::FileTransfer(env) => self.transfer_verarbeiten(env),
            payload @ (ControlPayload::WebrtcOffer(_)
            | ControlPayload::WebrtcAnswer(_)
            | ControlPayload::IceCandidate(_)
            | ControlPayload::RemoteControl(_)
            | ControlPayload::ChatMessage(_)
            | ControlPayload::FileTransferRequest(_)
            | ControlPayload::FileTransferResponse(_)) => {
                let art = payload.typ_name();
                match payload.signal_envelope() {
                    Some(env) => Reaktion::ereignis(PeerEvent::Signal {
                        art,
                        session_id: env.session_id,
                        from: env.from.clone(),
                        payload: env.payload.clone(),
                    }),
                    None => Reaktion::default(),
                }
            }

            ControlPayload::HandshakeInit(init) => {
                let peer = init.requester_id.clone();
                match self.crypto.handshakes().init_annehmen(&init) {
                    Ok(Some(antwort)) => Reaktion {
                        senden: vec![ControlPayload::SessionKey(antwort)],
                        ereignisse: vec![PeerEvent::SchluesselEtabliert { peer_id: peer }],
                    },
                    Ok(None) => Reaktion::default(),
                    Err(e) => Reaktion::fehler(Some(peer), e),
                }
            }
            ControlPayload::SessionKey(sk) => {
                let Some(peer) = sk.from else {
                    return Reaktion::fehler(
                        None,
                        PeerError::UnerwarteteAntwort("session-key ohne Absender".into()),
                    );
                };
                match self
                    .crypto
                    .handshakes()
                    .abschliessen(&peer, &sk.encrypted_session_key)
                {
                    Ok(_) => Reaktion::ereignis(PeerEvent::SchluesselEtabliert { peer_id: peer }),
                    Err(e) => Reaktion::fehler(Some(peer), e),
                }
            }
            ControlPayload::CryptoError(e) => {
                match &e.target_id {
                    Some(peer) => self.crypto.handshakes().fehlgeschlagen(peer),
                    // Ohne Ziel: alle offenen eigenen Handshakes scheitern
                    None => {
                        for peer in &self.angefragt {
                            self.crypto.handshakes().fehlgeschlagen(peer);
                        }
                    }
                }
                let code = if e.code == ErrorCode::CryptoUnavailable {
                    e.code
                } else {
                    ErrorCode::CryptoOperationFailure
                };
                Reaktion::fehler(
                    e.target_id,
                    PeerError::Server {
                        code,
                        message: e.message,
                    },
                )
            }
            ControlPayload::EncryptedMessage(m) => {
                let Some(from) = m.from else {
                    return Reaktion::fehler(
                        None,
                        PeerError::UnerwarteteAntwort("encrypted-message ohne Absender".into()),
                    );
                };
                match self.crypto.oeffnen(&from, &m.encrypted_data) {
                    Ok(daten) => Reaktion::ereignis(PeerEvent::Nachricht { from, daten }),
                    Err(e) => Reaktion::fehler(Some(from), e),
                }
            }

            ControlPayload::Error(e) => Reaktion::fehler(
                None,
                PeerError::Server {
                    code: e.code,
                    message: e.message,
                },
            ),

            // Keepalive beantwortet der SignalingClient, der Rest richtet sich an das Relay
            andere => {
                tracing::trace!(typ = andere.typ_name(), "Nachricht ignoriert");
                Reaktion::default()
            }
        }
    }

    fn sitzung_angenommen(&mut self, session_id: SessionId, peer_id: ClientId) -> Reaktion {
        self.sitzungen.insert(session_id, peer_id.clone());
        let mut reaktion = Reaktion::ereignis(PeerEvent::SitzungAngenommen {
            session_id,
            peer_id: peer_id.clone(),
        });

        // Die anfragende Seite stoesst den Schluesselaustausch an, ein
        // bestehender Schluessel gilt auch fuer weitere Sitzungen
        let etabliert = self.crypto.handshakes().zustand(&peer_id).ist_etabliert();
        if self.angefragt.contains(&peer_id) && !etabliert {
            match self.crypto.handshakes().starten(&peer_id) {
                Ok(req) => reaktion.senden.push(ControlPayload::CryptoHandshake(req)),
                Err(e) => reaktion.ereignisse.push(PeerEvent::Fehler {
                    peer_id: Some(peer_id),
                    fehler: e,
                }),
            }
        }
        reaktion
    }

    fn transfer_verarbeiten(&mut self, env: SignalEnvelope) -> Reaktion {
        let Some(peer) = env.from.or_else(|| self.sitzungen.get(&env.session_id).cloned()) else {
            return Reaktion::fehler(
                None,
                PeerError::UnerwarteteAntwort("file-transfer ohne Absender".into()),
            );
        };
        let nachricht: TransferMessage = match serde_json::from_value(env.payload) {
            Ok(n) => n,
            Err(e) => return Reaktion::fehler(Some(peer), e.into()),
        };
        let key = self.crypto.handshakes().schluessel(&peer);
        match self.reassembler.verarbeiten(&peer, nachricht, key.as_deref()) {
            Ok(Some(ereignis)) => Reaktion::ereignis(PeerEvent::Transfer(ereignis)),
            Ok(None) => Reaktion::default(),
            Err(e) => Reaktion::fehler(Some(peer), e),
        }
    }

    fn peer_vergessen(&mut self, peer: &ClientId) {
        self.crypto.handshakes().vergessen(peer);
        self.reassembler.peer_vergessen(peer);
        self.angefragt.remove(peer);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
