//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt alle geteilten Services und Zustands-Manager als Arc-Referenzen,
//! die sicher zwischen tokio-Tasks geteilt werden koennen.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::{EventBroadcaster, SEND_QUEUE_GROESSE};
use crate::registry::ClientRegistry;
use crate::sessions::SessionCoordinator;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige Verbindungen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Zeit bis eine unbeantwortete Verbindungsanfrage ablaeuft
    pub anfrage_timeout_sek: u64,
    /// Wird in `client-registered` gemeldet
    pub verschluesselung_unterstuetzt: bool,
    /// Optionales gemeinsames Geheimnis fuer `register-client`
    pub zugangs_geheimnis: Option<String>,
    /// Kapazitaet der Send-Queue pro Verbindung
    pub send_queue_groesse: usize,
}

impl SignalingConfig {
    pub fn anfrage_timeout(&self) -> Duration {
        Duration::from_secs(self.anfrage_timeout_sek)
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            anfrage_timeout_sek: 30,
            verschluesselung_unterstuetzt: true,
            zugangs_geheimnis: None,
            send_queue_groesse: SEND_QUEUE_GROESSE,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehler fuer Relay und Aushandlung (werden periodisch exportiert)
#[derive(Debug, Default)]
pub struct SignalingStatistik {
    weitergeleitet: AtomicU64,
    angenommen: AtomicU64,
    abgelehnt: AtomicU64,
    abgelaufen: AtomicU64,
    fehlgeschlagen: AtomicU64,
}

/// Momentaufnahme der Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatistikSnapshot {
    pub weitergeleitet: u64,
    pub angenommen: u64,
    pub abgelehnt: u64,
    pub abgelaufen: u64,
    pub fehlgeschlagen: u64,
}

impl SignalingStatistik {
    pub fn weitergeleitet(&self) {
        self.weitergeleitet.fetch_add(1, Ordering::Relaxed);
    }

    pub fn angenommen(&self) {
        self.angenommen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abgelehnt(&self) {
        self.abgelehnt.fetch_add(1, Ordering::Relaxed);
    }

    pub fn abgelaufen(&self) {
        self.abgelaufen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fehlgeschlagen(&self) {
        self.fehlgeschlagen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatistikSnapshot {
        StatistikSnapshot {
            weitergeleitet: self.weitergeleitet.load(Ordering::Relaxed),
            angenommen: self.angenommen.load(Ordering::Relaxed),
            abgelehnt: self.abgelehnt.load(Ordering::Relaxed),
            abgelaufen: self.abgelaufen.load(Ordering::Relaxed),
            fehlgeschlagen: self.fehlgeschlagen.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// SignalingState
// ---------------------------------------------------------------------------

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Server-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Registrierte Clients
    pub registry: ClientRegistry,
    /// Send-Queues aller offenen Verbindungen
    pub broadcaster: EventBroadcaster,
    /// Offene Anfragen und aktive Sitzungen
    pub sessions: SessionCoordinator,
    /// Zaehler fuer Metriken
    pub statistik: SignalingStatistik,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig) -> Arc<Self> {
        let broadcaster = EventBroadcaster::mit_queue_groesse(config.send_queue_groesse);
        Arc::new(Self {
            config: Arc::new(config),
            registry: ClientRegistry::neu(),
            broadcaster,
            sessions: SessionCoordinator::neu(),
            statistik: SignalingStatistik::default(),
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
