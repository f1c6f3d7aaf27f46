//! Sitzungs-Koordinator – Verbindungsaushandlung und Sitzungen
//!
//! ## Zustandsautomat pro (Kanal des Anfragenden, Ziel)
//! ```text
//! Idle -> RequestSent -> { Accepted | Rejected | Error | TimedOut }
//! Accepted -> SessionActive -> Closed
//! ```
//!
//! Nur `RequestSent` wird gespeichert (als offene Anfrage). Alle
//! Endzustaende entfernen die Anfrage wieder, das Paar ist danach `Idle`.
//! Eine angenommene Anfrage erzeugt eine `Session` mit genau zwei
//! Mitgliedern. Sitzungen enden explizit (`session-close`) oder wenn ein
//! Mitglied die Verbindung trennt.
//!
//! Der gesamte Zustand liegt hinter einem einzigen Mutex. Jeder Uebergang
//! geschieht unter einer Sperre und nie ueber ein `.await` hinweg.

use parking_lot::Mutex;
use relaydesk_core::types::{ClientId, ConnectionId, SessionId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Zustand eines (Anfragender, Ziel)-Paars aus Sicht des Koordinators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    RequestSent,
}

/// Schluessel einer offenen Anfrage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub requester_channel: ConnectionId,
    pub target_id: ClientId,
}

/// Offene Verbindungsanfrage (Zustand `RequestSent`)
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub requester_id: ClientId,
    pub requester_channel: ConnectionId,
    pub target_id: ClientId,
    pub target_channel: ConnectionId,
    /// Unterscheidet wiederholte Anfragen desselben Paars (fuer den Timer)
    pub token: u64,
    pub seit: Instant,
}

impl PendingRequest {
    fn key(&self) -> PendingKey {
        PendingKey {
            requester_channel: self.requester_channel,
            target_id: self.target_id.clone(),
        }
    }
}

/// Mitglied einer Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMember {
    pub client_id: ClientId,
    pub connection: ConnectionId,
}

/// Aktive Sitzung zwischen Anfragendem und Annehmendem
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// `[anfragender, annehmender]`
    pub members: [SessionMember; 2],
    pub erstellt: Instant,
}

impl Session {
    /// Prueft ob eine Verbindung Mitglied ist
    pub fn ist_mitglied(&self, connection: &ConnectionId) -> bool {
        self.members.iter().any(|m| &m.connection == connection)
    }

    /// Das andere Mitglied aus Sicht von `connection`
    ///
    /// `None` wenn `connection` kein Mitglied ist oder beide Plaetze von
    /// derselben Verbindung belegt sind.
    pub fn gegenstelle(&self, connection: &ConnectionId) -> Option<&SessionMember> {
        if !self.ist_mitglied(connection) {
            return None;
        }
        self.members.iter().find(|m| &m.connection != connection)
    }
}

/// Ergebnis einer Antwort auf eine Verbindungsanfrage
#[derive(Debug, Clone)]
pub enum NegotiationOutcome {
    Accepted {
        anfrage: PendingRequest,
        session: Session,
    },
    Rejected {
        anfrage: PendingRequest,
    },
}

/// Was beim Trennen einer Verbindung aufgeraeumt wurde
#[derive(Debug, Default)]
pub struct Aufraeumen {
    pub geschlossene_sitzungen: Vec<Session>,
    pub verworfene_anfragen: Vec<PendingRequest>,
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KoordinatorZustand {
    offene_anfragen: HashMap<PendingKey, PendingRequest>,
    sitzungen: HashMap<SessionId, Session>,
}

/// Koordiniert Verbindungsanfragen und Sitzungen
///
/// Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<SessionCoordinatorInner>,
}

struct SessionCoordinatorInner {
    zustand: Mutex<KoordinatorZustand>,
    naechstes_token: AtomicU64,
}

impl SessionCoordinator {
    /// Erstellt einen leeren Koordinator
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(SessionCoordinatorInner {
                zustand: Mutex::new(KoordinatorZustand::default()),
                naechstes_token: AtomicU64::new(1),
            }),
        }
    }

    /// Idle -> RequestSent
    ///
    /// Eine erneute Anfrage desselben Paars ersetzt die offene Anfrage und
    /// erhaelt ein neues Token (ein alter Timer laeuft dann ins Leere).
    pub fn anfrage_registrieren(
        &self,
        requester_id: ClientId,
        requester_channel: ConnectionId,
        target_id: ClientId,
        target_channel: ConnectionId,
    ) -> PendingRequest {
        let anfrage = PendingRequest {
            requester_id,
            requester_channel,
            target_id,
            target_channel,
            token: self.inner.naechstes_token.fetch_add(1, Ordering::Relaxed),
            seit: Instant::now(),
        };
        self.inner
            .zustand
            .lock()
            .offene_anfragen
            .insert(anfrage.key(), anfrage.clone());
        anfrage
    }

    /// RequestSent -> Accepted/Rejected
    ///
    /// Die Anfrage wird ueber den Kanal-Verweis des Anfragenden und die ID
    /// des Antwortenden gefunden. Fehlt sie, ist das Paar bereits `Idle`
    /// (nie angefragt, schon beantwortet oder abgelaufen).
    pub fn antworten(
        &self,
        requester_channel: ConnectionId,
        acceptor_id: &ClientId,
        acceptor_channel: ConnectionId,
        angenommen: bool,
    ) -> SignalingResult<NegotiationOutcome> {
        let key = PendingKey {
            requester_channel,
            target_id: acceptor_id.clone(),
        };

        let mut zustand = self.inner.zustand.lock();
        let anfrage = match zustand.offene_anfragen.get(&key) {
            Some(a) if a.target_channel == acceptor_channel => a.clone(),
            _ => {
                return Err(SignalingError::NichtGefunden(format!(
                    "Keine offene Anfrage von {} an {}",
                    requester_channel, acceptor_id
                )))
            }
        };
        zustand.offene_anfragen.remove(&key);

        if !angenommen {
            return Ok(NegotiationOutcome::Rejected { anfrage });
        }

        let session = Session {
            id: SessionId::new(),
            members: [
                SessionMember {
                    client_id: anfrage.requester_id.clone(),
                    connection: anfrage.requester_channel,
                },
                SessionMember {
                    client_id: acceptor_id.clone(),
                    connection: acceptor_channel,
                },
            ],
            erstellt: Instant::now(),
        };
        zustand.sitzungen.insert(session.id, session.clone());

        Ok(NegotiationOutcome::Accepted { anfrage, session })
    }

    /// RequestSent -> TimedOut
    ///
    /// Entfernt die Anfrage nur, wenn sie noch dasselbe Token traegt.
    pub fn ablaufen(&self, key: &PendingKey, token: u64) -> Option<PendingRequest> {
        let mut zustand = self.inner.zustand.lock();
        match zustand.offene_anfragen.get(key) {
            Some(a) if a.token == token => zustand.offene_anfragen.remove(key),
            _ => None,
        }
    }

    /// Aktueller Zustand eines Paars
    pub fn status(&self, key: &PendingKey) -> NegotiationState {
        if self.inner.zustand.lock().offene_anfragen.contains_key(key) {
            NegotiationState::RequestSent
        } else {
            NegotiationState::Idle
        }
    }

    /// Sitzung nachschlagen
    pub fn sitzung(&self, id: &SessionId) -> Option<Session> {
        self.inner.zustand.lock().sitzungen.get(id).cloned()
    }

    /// Gegenstelle fuer eine Relay-Nachricht bestimmen
    ///
    /// - unbekannte Sitzung: `NichtGefunden`
    /// - Absender ist kein Mitglied: `NichtInSitzung`
    /// - kein anderes Mitglied: `Ok(None)`
    pub fn gegenstelle(
        &self,
        id: &SessionId,
        absender: &ConnectionId,
    ) -> SignalingResult<Option<SessionMember>> {
        let zustand = self.inner.zustand.lock();
        let session = zustand
            .sitzungen
            .get(id)
            .ok_or_else(|| SignalingError::NichtGefunden(format!("Sitzung {}", id)))?;
        if !session.ist_mitglied(absender) {
            return Err(SignalingError::NichtInSitzung(id.to_string()));
        }
        Ok(session.gegenstelle(absender).cloned())
    }

    /// SessionActive -> Closed (explizit durch ein Mitglied)
    pub fn schliessen(&self, id: &SessionId, durch: &ConnectionId) -> SignalingResult<Session> {
        let mut zustand = self.inner.zustand.lock();
        match zustand.sitzungen.get(id) {
            None => Err(SignalingError::NichtGefunden(format!("Sitzung {}", id))),
            Some(s) if !s.ist_mitglied(durch) => {
                Err(SignalingError::NichtInSitzung(id.to_string()))
            }
            Some(_) => zustand
                .sitzungen
                .remove(id)
                .ok_or_else(|| SignalingError::intern("Sitzung verschwunden")),
        }
    }

    /// Raeumt alle Sitzungen und Anfragen einer getrennten Verbindung ab
    pub fn verbindung_beenden(&self, connection: &ConnectionId) -> Aufraeumen {
        let mut zustand = self.inner.zustand.lock();

        let sitzungs_ids: Vec<SessionId> = zustand
            .sitzungen
            .values()
            .filter(|s| s.ist_mitglied(connection))
            .map(|s| s.id)
            .collect();
        let geschlossene_sitzungen = sitzungs_ids
            .iter()
            .filter_map(|id| zustand.sitzungen.remove(id))
            .collect();

        let anfrage_keys: Vec<PendingKey> = zustand
            .offene_anfragen
            .values()
            .filter(|a| &a.requester_channel == connection || &a.target_channel == connection)
            .map(|a| a.key())
            .collect();
        let verworfene_anfragen = anfrage_keys
            .iter()
            .filter_map(|k| zustand.offene_anfragen.remove(k))
            .collect();

        Aufraeumen {
            geschlossene_sitzungen,
            verworfene_anfragen,
        }
    }

    /// Anzahl aktiver Sitzungen
    pub fn aktive_sitzungen(&self) -> usize {
        self.inner.zustand.lock().sitzungen.len()
    }

    /// Anzahl offener Anfragen
    pub fn offene_anfragen(&self) -> usize {
        self.inner.zustand.lock().offene_anfragen.len()
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Paar {
        r_id: ClientId,
        r_conn: ConnectionId,
        a_id: ClientId,
        a_conn: ConnectionId,
    }

    fn paar() -> Paar {
        Paar {
            r_id: ClientId::generieren(),
            r_conn: ConnectionId::new(),
            a_id: ClientId::generieren(),
            a_conn: ConnectionId::new(),
        }
    }

    fn anfragen(k: &SessionCoordinator, p: &Paar) -> PendingRequest {
        k.anfrage_registrieren(p.r_id.clone(), p.r_conn, p.a_id.clone(), p.a_conn)
    }

    fn key(p: &Paar) -> PendingKey {
        PendingKey {
            requester_channel: p.r_conn,
            target_id: p.a_id.clone(),
        }
    }

    #[test]
    fn annahme_erzeugt_sitzung_mit_zwei_mitgliedern() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);
        assert_eq!(k.status(&key(&p)), NegotiationState::RequestSent);

        let ergebnis = k.antworten(p.r_conn, &p.a_id, p.a_conn, true).unwrap();
        let session = match ergebnis {
            NegotiationOutcome::Accepted { session, .. } => session,
            andere => panic!("Erwartet Accepted, erhalten {:?}", andere),
        };

        assert_eq!(session.members[0].connection, p.r_conn);
        assert_eq!(session.members[1].connection, p.a_conn);
        assert_eq!(k.status(&key(&p)), NegotiationState::Idle);
        assert_eq!(k.aktive_sitzungen(), 1);
        assert_eq!(
            session.gegenstelle(&p.r_conn).map(|m| m.client_id.clone()),
            Some(p.a_id.clone())
        );
    }

    #[test]
    fn ablehnung_fuehrt_zu_idle_und_neue_anfrage_gelingt() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);

        let ergebnis = k.antworten(p.r_conn, &p.a_id, p.a_conn, false).unwrap();
        assert!(matches!(ergebnis, NegotiationOutcome::Rejected { .. }));
        assert_eq!(k.status(&key(&p)), NegotiationState::Idle);
        assert_eq!(k.aktive_sitzungen(), 0);

        anfragen(&k, &p);
        let ergebnis = k.antworten(p.r_conn, &p.a_id, p.a_conn, true).unwrap();
        assert!(matches!(ergebnis, NegotiationOutcome::Accepted { .. }));
    }

    #[test]
    fn antwort_ohne_anfrage_ist_nicht_gefunden() {
        let k = SessionCoordinator::neu();
        let p = paar();
        let ergebnis = k.antworten(p.r_conn, &p.a_id, p.a_conn, true);
        assert!(matches!(ergebnis, Err(SignalingError::NichtGefunden(_))));
        assert_eq!(k.aktive_sitzungen(), 0);
    }

    #[test]
    fn antwort_von_fremder_verbindung_wird_abgelehnt() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);
        let ergebnis = k.antworten(p.r_conn, &p.a_id, ConnectionId::new(), true);
        assert!(matches!(ergebnis, Err(SignalingError::NichtGefunden(_))));
        assert_eq!(k.status(&key(&p)), NegotiationState::RequestSent);
    }

    #[test]
    fn doppelte_antwort_erzeugt_nur_eine_sitzung() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);
        assert!(k.antworten(p.r_conn, &p.a_id, p.a_conn, true).is_ok());
        assert!(k.antworten(p.r_conn, &p.a_id, p.a_conn, true).is_err());
        assert_eq!(k.aktive_sitzungen(), 1);
    }

    #[test]
    fn gleichzeitige_annahmen_ergeben_verschiedene_ids() {
        let k = SessionCoordinator::neu();
        let paare: Vec<Paar> = (0..64).map(|_| paar()).collect();
        for p in &paare {
            anfragen(&k, p);
        }

        let ids: Vec<SessionId> = std::thread::scope(|scope| {
            let handles: Vec<_> = paare
                .iter()
                .map(|p| {
                    let k = k.clone();
                    scope.spawn(move || match k.antworten(p.r_conn, &p.a_id, p.a_conn, true) {
                        Ok(NegotiationOutcome::Accepted { session, .. }) => session.id,
                        andere => panic!("Annahme fehlgeschlagen: {:?}", andere),
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let eindeutig: HashSet<SessionId> = ids.iter().copied().collect();
        assert_eq!(eindeutig.len(), paare.len());
        assert_eq!(k.aktive_sitzungen(), paare.len());
    }

    #[test]
    fn mehrere_anfragen_an_dasselbe_ziel_bleiben_offen() {
        let k = SessionCoordinator::neu();
        let ziel = ClientId::from("ziel");
        let ziel_conn = ConnectionId::new();
        let r1 = ConnectionId::new();
        let r2 = ConnectionId::new();

        k.anfrage_registrieren(ClientId::from("r1"), r1, ziel.clone(), ziel_conn);
        k.anfrage_registrieren(ClientId::from("r2"), r2, ziel.clone(), ziel_conn);
        assert_eq!(k.offene_anfragen(), 2);

        assert!(k.antworten(r2, &ziel, ziel_conn, true).is_ok());
        assert!(k.antworten(r1, &ziel, ziel_conn, false).is_ok());
        assert_eq!(k.offene_anfragen(), 0);
    }

    #[test]
    fn ablaufen_nur_mit_aktuellem_token() {
        let k = SessionCoordinator::neu();
        let p = paar();
        let erste = anfragen(&k, &p);
        let zweite = anfragen(&k, &p);

        assert!(k.ablaufen(&key(&p), erste.token).is_none());
        assert_eq!(k.status(&key(&p)), NegotiationState::RequestSent);

        assert!(k.ablaufen(&key(&p), zweite.token).is_some());
        assert_eq!(k.status(&key(&p)), NegotiationState::Idle);

        let spaet = k.antworten(p.r_conn, &p.a_id, p.a_conn, true);
        assert!(matches!(spaet, Err(SignalingError::NichtGefunden(_))));
    }

    #[test]
    fn gegenstelle_prueft_mitgliedschaft() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);
        let session = match k.antworten(p.r_conn, &p.a_id, p.a_conn, true).unwrap() {
            NegotiationOutcome::Accepted { session, .. } => session,
            _ => unreachable!(),
        };

        let andere = k.gegenstelle(&session.id, &p.a_conn).unwrap();
        assert_eq!(andere.map(|m| m.connection), Some(p.r_conn));

        let fremd = k.gegenstelle(&session.id, &ConnectionId::new());
        assert!(matches!(fremd, Err(SignalingError::NichtInSitzung(_))));

        let unbekannt = k.gegenstelle(&SessionId::new(), &p.a_conn);
        assert!(matches!(unbekannt, Err(SignalingError::NichtGefunden(_))));
    }

    #[test]
    fn sitzung_mit_sich_selbst_hat_keine_gegenstelle() {
        let k = SessionCoordinator::neu();
        let id = ClientId::from("solo");
        let conn = ConnectionId::new();
        k.anfrage_registrieren(id.clone(), conn, id.clone(), conn);
        let session = match k.antworten(conn, &id, conn, true).unwrap() {
            NegotiationOutcome::Accepted { session, .. } => session,
            _ => unreachable!(),
        };
        assert!(k.gegenstelle(&session.id, &conn).unwrap().is_none());
    }

    #[test]
    fn schliessen_nur_durch_mitglied() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);
        let session = match k.antworten(p.r_conn, &p.a_id, p.a_conn, true).unwrap() {
            NegotiationOutcome::Accepted { session, .. } => session,
            _ => unreachable!(),
        };

        assert!(k.schliessen(&session.id, &ConnectionId::new()).is_err());
        assert!(k.schliessen(&session.id, &p.r_conn).is_ok());
        assert!(k.sitzung(&session.id).is_none());
        assert!(matches!(
            k.schliessen(&session.id, &p.r_conn),
            Err(SignalingError::NichtGefunden(_))
        ));
    }

    #[test]
    fn trennen_raeumt_sitzungen_und_anfragen_ab() {
        let k = SessionCoordinator::neu();
        let p = paar();
        anfragen(&k, &p);
        k.antworten(p.r_conn, &p.a_id, p.a_conn, true).unwrap();

        // Weitere offene Anfrage des Annehmenden an einen Dritten
        k.anfrage_registrieren(
            p.a_id.clone(),
            p.a_conn,
            ClientId::from("dritter"),
            ConnectionId::new(),
        );

        let aufgeraeumt = k.verbindung_beenden(&p.a_conn);
        assert_eq!(aufgeraeumt.geschlossene_sitzungen.len(), 1);
        assert_eq!(aufgeraeumt.verworfene_anfragen.len(), 1);
        assert_eq!(k.aktive_sitzungen(), 0);
        assert_eq!(k.offene_anfragen(), 0);

        let nochmal = k.verbindung_beenden(&p.a_conn);
        assert!(nochmal.geschlossene_sitzungen.is_empty());
    }
}
