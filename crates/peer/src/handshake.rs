//! Schluesselaustausch zwischen zwei Endpunkten
//!
//! ## Ablauf
//! ```text
//! R                         Relay                         A
//! |-- crypto-handshake ----->|                            |
//! |                          |-- handshake-init --------->|
//! |                          |      A erzeugt Schluessel, |
//! |                          |      wickelt ihn fuer R ein|
//! |                          |<------------ session-key --|
//! |<------- session-key -----|                            |
//! R wickelt aus, beide halten denselben Schluessel
//! ```
//!
//! ## Zustand pro Peer
//! `Idle | Negotiating { since, role } | Established(key)`
//!
//! Uebergaenge sind Compare-and-Set unter einem Mutex. Die eigentliche
//! Krypto-Arbeit passiert ausserhalb der Sperre, `since` dient als Version:
//! ein Ergebnis wird nur uebernommen, wenn der Zustand noch derselbe
//! Verhandlungsversuch ist. Ein zweiter Handshake fuer denselben Peer wird
//! abgelehnt, bis der erste abgeschlossen ist oder `handshake_timeout`
//! ueberschritten hat.
//!
//! Starten beide Seiten gleichzeitig, bleibt die Seite mit der kleineren
//! Client-ID Initiator, die andere antwortet.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use relaydesk_core::types::ClientId;
use relaydesk_crypto::{unwrap_session_key, wrap_session_key, KeyPair, PublicKey, SessionKey};
use relaydesk_protocol::control::{CryptoHandshakeRequest, HandshakeInit, SessionKeyMessage};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{PeerError, PeerResult};

// ---------------------------------------------------------------------------
// Zustand
// ---------------------------------------------------------------------------

/// Rolle im laufenden Handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    /// Hat `crypto-handshake` gesendet und wartet auf `session-key`
    Initiator,
    /// Erzeugt gerade den Sitzungsschluessel
    Responder,
}

/// Handshake-Zustand fuer einen Peer
#[derive(Debug, Clone)]
pub enum HandshakeState {
    Idle,
    Negotiating { since: Instant, role: HandshakeRole },
    Established(Arc<SessionKey>),
}

impl HandshakeState {
    pub fn ist_etabliert(&self) -> bool {
        matches!(self, Self::Established(_))
    }
}

// ---------------------------------------------------------------------------
// HandshakeManager
// ---------------------------------------------------------------------------

/// Verwaltet Schluesselpaar und Handshake-Zustaende aller Peers
pub struct HandshakeManager {
    own_id: ClientId,
    keypair: KeyPair,
    timeout: Duration,
    zustaende: Mutex<HashMap<ClientId, HandshakeState>>,
}

impl HandshakeManager {
    /// Erstellt einen Manager mit frischem Schluesselpaar
    pub fn neu(own_id: ClientId, timeout: Duration) -> Self {
        Self::mit_schluesselpaar(own_id, KeyPair::generieren(), timeout)
    }

    pub fn mit_schluesselpaar(own_id: ClientId, keypair: KeyPair, timeout: Duration) -> Self {
        Self {
            own_id,
            keypair,
            timeout,
            zustaende: Mutex::new(HashMap::new()),
        }
    }

    pub fn own_id(&self) -> &ClientId {
        &self.own_id
    }

    /// Eigener oeffentlicher Schluessel im Wire-Format
    pub fn public_key_base64(&self) -> String {
        self.keypair.public_key().to_base64()
    }

    /// Aktueller Zustand fuer `peer`
    pub fn zustand(&self, peer: &ClientId) -> HandshakeState {
        self.zustaende
            .lock()
            .get(peer)
            .cloned()
            .unwrap_or(HandshakeState::Idle)
    }

    /// Etablierter Sitzungsschluessel fuer `peer`
    pub fn schluessel(&self, peer: &ClientId) -> Option<Arc<SessionKey>> {
        match self.zustaende.lock().get(peer) {
            Some(HandshakeState::Established(key)) => Some(Arc::clone(key)),
            _ => None,
        }
    }

    fn laeuft(&self, since: &Instant) -> bool {
        since.elapsed() < self.timeout
    }

    /// Idle/Established -> Negotiating{Initiator}
    ///
    /// Liefert die `crypto-handshake`-Nachricht an den Peer.
    pub fn starten(&self, peer: &ClientId) -> PeerResult<CryptoHandshakeRequest> {
        let mut zustaende = self.zustaende.lock();
        if let Some(HandshakeState::Negotiating { since, .. }) = zustaende.get(peer) {
            if self.laeuft(since) {
                return Err(PeerError::HandshakeLaeuft(peer.clone()));
            }
            tracing::debug!(peer = %peer, "Verwaister Handshake wird ersetzt");
        }
        zustaende.insert(
            peer.clone(),
            HandshakeState::Negotiating {
                since: Instant::now(),
                role: HandshakeRole::Initiator,
            },
        );
        drop(zustaende);

        tracing::debug!(peer = %peer, "Handshake gestartet");
        Ok(CryptoHandshakeRequest {
            target_id: peer.clone(),
            public_key: self.public_key_base64(),
        })
    }

    /// Verarbeitet `handshake-init` auf der Seite des Ziels
    ///
    /// Gibt `Ok(None)` zurueck, wenn diese Seite bei gleichzeitigem Start
    /// Initiator bleibt.
    pub fn init_annehmen(&self, init: &HandshakeInit) -> PeerResult<Option<SessionKeyMessage>> {
        let peer = &init.requester_id;
        let peer_key = PublicKey::from_base64(&init.requester_public_key)?;

        let version = {
            let mut zustaende = self.zustaende.lock();
            if let Some(HandshakeState::Negotiating { since, role }) = zustaende.get(peer) {
                if self.laeuft(since) {
                    match role {
                        HandshakeRole::Initiator if self.own_id < *peer => {
                            tracing::debug!(peer = %peer, "Gleichzeitiger Handshake – bleibe Initiator");
                            return Ok(None);
                        }
                        HandshakeRole::Initiator => {}
                        HandshakeRole::Responder => {
                            return Err(PeerError::HandshakeLaeuft(peer.clone()))
                        }
                    }
                }
            }
            let since = Instant::now();
            zustaende.insert(
                peer.clone(),
                HandshakeState::Negotiating {
                    since,
                    role: HandshakeRole::Responder,
                },
            );
            since
        };

        let key = SessionKey::generieren();
        let wrapped = match wrap_session_key(&key, &peer_key) {
            Ok(w) => w,
            Err(e) => {
                self.zuruecksetzen_wenn(peer, version);
                return Err(e.into());
            }
        };

        if !self.etablieren_wenn(peer, version, HandshakeRole::Responder, key) {
            return Err(PeerError::UnerwarteteAntwort(format!(
                "Handshake mit {} wurde waehrenddessen ersetzt",
                peer
            )));
        }

        tracing::info!(peer = %peer, "Sitzungsschluessel erzeugt (Antwortende Seite)");
        Ok(Some(SessionKeyMessage {
            requester_id: peer.clone(),
            encrypted_session_key: BASE64.encode(wrapped),
            from: None,
        }))
    }

    /// Verarbeitet `session-key` auf der Seite des Initiators
    pub fn abschliessen(
        &self,
        peer: &ClientId,
        encrypted_session_key: &str,
    ) -> PeerResult<Arc<SessionKey>> {
        let version = match self.zustaende.lock().get(peer) {
            Some(HandshakeState::Negotiating {
                since,
                role: HandshakeRole::Initiator,
            }) => *since,
            _ => {
                return Err(PeerError::UnerwarteteAntwort(format!(
                    "session-key von {} ohne laufenden Handshake",
                    peer
                )))
            }
        };

        let ergebnis = BASE64
            .decode(encrypted_session_key)
            .map_err(|e| PeerError::Krypto(e.into()))
            .and_then(|bytes| unwrap_session_key(&bytes, &self.keypair).map_err(PeerError::from));

        let key = match ergebnis {
            Ok(k) => k,
            Err(e) => {
                self.zuruecksetzen_wenn(peer, version);
                return Err(e);
            }
        };

        if !self.etablieren_wenn(peer, version, HandshakeRole::Initiator, key) {
            return Err(PeerError::UnerwarteteAntwort(format!(
                "Handshake mit {} wurde waehrenddessen ersetzt",
                peer
            )));
        }
        tracing::info!(peer = %peer, "Sitzungsschluessel etabliert");
        self.schluessel(peer)
            .ok_or_else(|| PeerError::KryptoNichtVerfuegbar(peer.clone()))
    }

    /// Negotiating -> Idle (z.B. nach `crypto-error`)
    pub fn fehlgeschlagen(&self, peer: &ClientId) {
        let mut zustaende = self.zustaende.lock();
        if matches!(zustaende.get(peer), Some(HandshakeState::Negotiating { .. })) {
            zustaende.remove(peer);
            tracing::debug!(peer = %peer, "Handshake fehlgeschlagen");
        }
    }

    /// Verwirft den Zustand eines Peers (Abmeldung, Sitzungsende)
    pub fn vergessen(&self, peer: &ClientId) {
        if self.zustaende.lock().remove(peer).is_some() {
            tracing::debug!(peer = %peer, "Schluesselmaterial verworfen");
        }
    }

    // -----------------------------------------------------------------------
    // CAS-Hilfen
    // -----------------------------------------------------------------------

    fn etablieren_wenn(
        &self,
        peer: &ClientId,
        version: Instant,
        rolle: HandshakeRole,
        key: SessionKey,
    ) -> bool {
        let mut zustaende = self.zustaende.lock();
        match zustaende.get(peer) {
            Some(HandshakeState::Negotiating { since, role }) if *since == version && *role == rolle => {
                zustaende.insert(peer.clone(), HandshakeState::Established(Arc::new(key)));
                true
            }
            _ => false,
        }
    }

    fn zuruecksetzen_wenn(&self, peer: &ClientId, version: Instant) {
        let mut zustaende = self.zustaende.lock();
        if let Some(HandshakeState::Negotiating { since, .. }) = zustaende.get(peer) {
            if *since == version {
                zustaende.remove(peer);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_crypto::{decrypt_message_bytes, encrypt_message_bytes};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn init_von(r: &HandshakeManager, req: &CryptoHandshakeRequest) -> HandshakeInit {
        HandshakeInit {
            requester_id: r.own_id().clone(),
            requester_public_key: req.public_key.clone(),
        }
    }

    #[test]
    fn vollstaendiger_handshake_schluessel_passen() {
        let r = HandshakeManager::neu(ClientId::from("r"), TIMEOUT);
        let a = HandshakeManager::neu(ClientId::from("a"), TIMEOUT);

        let req = r.starten(a.own_id()).unwrap();
        assert_eq!(req.target_id, ClientId::from("a"));

        let antwort = a.init_annehmen(&init_von(&r, &req)).unwrap().unwrap();
        assert!(a.zustand(r.own_id()).ist_etabliert());

        let key_r = r
            .abschliessen(a.own_id(), &antwort.encrypted_session_key)
            .unwrap();
        let key_a = a.schluessel(r.own_id()).unwrap();
        assert_eq!(key_r.as_bytes(), key_a.as_bytes());

        // In beide Richtungen nutzbar
        let ct = encrypt_message_bytes(b"hallo", &key_r).unwrap();
        assert_eq!(decrypt_message_bytes(&ct, &key_a).unwrap(), b"hallo");
        let ct = encrypt_message_bytes(b"zurueck", &key_a).unwrap();
        assert_eq!(decrypt_message_bytes(&ct, &key_r).unwrap(), b"zurueck");

        // Fremder Schluessel scheitert
        let fremd = SessionKey::generieren();
        assert!(decrypt_message_bytes(&ct, &fremd).is_err());
    }

    #[test]
    fn zweiter_start_wird_abgelehnt() {
        let r = HandshakeManager::neu(ClientId::from("r"), TIMEOUT);
        let peer = ClientId::from("a");
        assert!(r.starten(&peer).is_ok());
        assert!(matches!(r.starten(&peer), Err(PeerError::HandshakeLaeuft(_))));
    }

    #[test]
    fn verwaister_handshake_darf_ersetzt_werden() {
        let r = HandshakeManager::neu(ClientId::from("r"), Duration::ZERO);
        let peer = ClientId::from("a");
        assert!(r.starten(&peer).is_ok());
        assert!(r.starten(&peer).is_ok());
    }

    #[test]
    fn gleichzeitige_starts_nur_einer_gewinnt() {
        let r = Arc::new(HandshakeManager::neu(ClientId::from("r"), TIMEOUT));
        let peer = ClientId::from("a");

        let erfolge = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let r = Arc::clone(&r);
                    let peer = peer.clone();
                    scope.spawn(move || r.starten(&peer).is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(erfolge, 1);
    }

    #[test]
    fn gleichzeitiger_handshake_beider_seiten() {
        let a = HandshakeManager::neu(ClientId::from("a"), TIMEOUT);
        let b = HandshakeManager::neu(ClientId::from("b"), TIMEOUT);

        let req_a = a.starten(b.own_id()).unwrap();
        let req_b = b.starten(a.own_id()).unwrap();

        // "a" < "b": a bleibt Initiator und ignoriert das Init von b
        assert!(a.init_annehmen(&init_von(&b, &req_b)).unwrap().is_none());
        // b gibt nach und antwortet
        let antwort = b.init_annehmen(&init_von(&a, &req_a)).unwrap().unwrap();

        let key_a = a.abschliessen(b.own_id(), &antwort.encrypted_session_key).unwrap();
        let key_b = b.schluessel(a.own_id()).unwrap();
        assert_eq!(key_a.as_bytes(), key_b.as_bytes());
    }

    #[test]
    fn session_key_ohne_handshake_abgelehnt() {
        let r = HandshakeManager::neu(ClientId::from("r"), TIMEOUT);
        let ergebnis = r.abschliessen(&ClientId::from("a"), "AAAA");
        assert!(matches!(ergebnis, Err(PeerError::UnerwarteteAntwort(_))));
    }

    #[test]
    fn manipulierter_schluessel_setzt_zurueck() {
        let r = HandshakeManager::neu(ClientId::from("r"), TIMEOUT);
        let a = HandshakeManager::neu(ClientId::from("a"), TIMEOUT);
        let req = r.starten(a.own_id()).unwrap();
        let antwort = a.init_annehmen(&init_von(&r, &req)).unwrap().unwrap();

        let mut bytes = BASE64.decode(&antwort.encrypted_session_key).unwrap();
        let letzter = bytes.len() - 1;
        bytes[letzter] ^= 0xFF;

        let ergebnis = r.abschliessen(a.own_id(), &BASE64.encode(bytes));
        assert!(matches!(ergebnis, Err(PeerError::Krypto(_))));
        assert!(matches!(r.zustand(a.own_id()), HandshakeState::Idle));
        // Neuer Versuch sofort moeglich
        assert!(r.starten(a.own_id()).is_ok());
    }

    #[test]
    fn ungueltiger_public_key_im_init() {
        let a = HandshakeManager::neu(ClientId::from("a"), TIMEOUT);
        let init = HandshakeInit {
            requester_id: ClientId::from("r"),
            requester_public_key: "kein base64!".into(),
        };
        assert!(matches!(a.init_annehmen(&init), Err(PeerError::Krypto(_))));
        assert!(matches!(a.zustand(&ClientId::from("r")), HandshakeState::Idle));
    }

    #[test]
    fn vergessen_entfernt_schluessel() {
        let r = HandshakeManager::neu(ClientId::from("r"), TIMEOUT);
        let a = HandshakeManager::neu(ClientId::from("a"), TIMEOUT);
        let req = r.starten(a.own_id()).unwrap();
        a.init_annehmen(&init_von(&r, &req)).unwrap();

        a.vergessen(r.own_id());
        assert!(a.schluessel(r.own_id()).is_none());
    }
}
