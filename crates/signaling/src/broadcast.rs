//! Event-Broadcaster – Sendet Nachrichten an verbundene Transportkanaele
//!
//! Der EventBroadcaster verwaltet die Send-Queues aller offenen Verbindungen.
//! Adressiert wird ueber die `ConnectionId` (den Kanal-Verweis), nicht ueber
//! die Client-ID: eine Antwort erreicht genau den Kanal, ueber den die
//! Anfrage kam.
//!
//! ## Selektives Senden
//! - An einen Kanal: `an_verbindung_senden`
//! - An eine Liste von Kanaelen: `an_verbindungen_senden`

use dashmap::DashMap;
use relaydesk_core::types::ConnectionId;
use relaydesk_protocol::control::ControlMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Standardgroesse der Send-Queue pro Verbindung
pub const SEND_QUEUE_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub connection_id: ConnectionId,
    pub tx: mpsc::Sender<ControlMessage>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an die Verbindung
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: ControlMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.connection_id, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %self.connection_id, "Send-Queue geschlossen (Verbindung getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// Zentraler Event-Broadcaster fuer alle offenen Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<EventBroadcasterInner>,
}

struct EventBroadcasterInner {
    /// Sender, indiziert nach ConnectionId
    verbindungen: DashMap<ConnectionId, ClientSender>,
    /// Kapazitaet neuer Queues
    queue_groesse: usize,
}

impl EventBroadcaster {
    /// Erstellt einen neuen EventBroadcaster mit Standard-Queuegroesse
    pub fn neu() -> Self {
        Self::mit_queue_groesse(SEND_QUEUE_GROESSE)
    }

    /// Erstellt einen EventBroadcaster mit eigener Queuegroesse
    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(EventBroadcasterInner {
                verbindungen: DashMap::new(),
                queue_groesse: queue_groesse.max(1),
            }),
        }
    }

    /// Registriert eine neue Verbindung und gibt ihre Empfangs-Queue zurueck
    ///
    /// Die `ClientConnection` liest aus dieser Queue und sendet via TCP.
    pub fn verbindung_registrieren(
        &self,
        connection_id: ConnectionId,
    ) -> mpsc::Receiver<ControlMessage> {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let sender = ClientSender { connection_id, tx };
        self.inner.verbindungen.insert(connection_id, sender);
        tracing::debug!(connection_id = %connection_id, "Verbindung im Broadcaster registriert");
        rx
    }

    /// Entfernt eine Verbindung aus dem Broadcaster
    pub fn verbindung_entfernen(&self, connection_id: &ConnectionId) {
        self.inner.verbindungen.remove(connection_id);
        tracing::debug!(connection_id = %connection_id, "Verbindung aus Broadcaster entfernt");
    }

    /// Sendet eine Nachricht an eine einzelne Verbindung
    ///
    /// Gibt `true` zurueck wenn die Verbindung gefunden und die Nachricht eingereiht wurde.
    pub fn an_verbindung_senden(
        &self,
        connection_id: &ConnectionId,
        nachricht: ControlMessage,
    ) -> bool {
        match self.inner.verbindungen.get(connection_id) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(connection_id = %connection_id, "Senden an unbekannte Verbindung");
                false
            }
        }
    }

    /// Sendet eine Nachricht an mehrere Verbindungen
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_verbindungen_senden<I>(&self, ziele: I, nachricht: ControlMessage) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let mut gesendet = 0;
        for ziel in ziele {
            if self.an_verbindung_senden(&ziel, nachricht.clone()) {
                gesendet += 1;
            }
        }
        gesendet
    }

    /// Gibt die Anzahl der offenen Verbindungen zurueck
    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.verbindungen.len()
    }

    /// Prueft ob eine Verbindung registriert ist
    pub fn ist_registriert(&self, connection_id: &ConnectionId) -> bool {
        self.inner.verbindungen.contains_key(connection_id)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
