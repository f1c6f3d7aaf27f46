//! Client-Registry – Tabelle der registrierten Clients
//!
//! Haelt pro Client-ID genau einen Eintrag mit Metadaten, Kanal-Verweis und
//! optionalem oeffentlichen Schluessel. Eine erneute Registrierung unter
//! derselben ID ersetzt den Eintrag vollstaendig (kein Zusammenfuehren).
//!
//! Entfernt wird nur, wenn der Eintrag noch zur trennenden Verbindung
//! gehoert. So kann eine alte Verbindung die neuere Registrierung nicht
//! abraeumen, und jede Abmeldung wird genau einmal wirksam.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relaydesk_core::types::{ClientId, ConnectionId};
use relaydesk_protocol::control::ClientInfo;
use std::net::SocketAddr;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// ClientRecord
// ---------------------------------------------------------------------------

/// Eintrag eines registrierten Clients
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRecord {
    pub id: ClientId,
    /// Verbindung, ueber die der Client erreichbar ist
    pub connection: ConnectionId,
    pub name: String,
    pub address: SocketAddr,
    pub platform: String,
    pub is_available: bool,
    pub supports_encryption: bool,
    pub last_seen: DateTime<Utc>,
    /// Exportierter oeffentlicher Schluessel (Base64)
    pub public_key: Option<String>,
}

impl ClientRecord {
    /// Oeffentliche Sicht fuer Listen und Broadcasts
    pub fn to_info(&self) -> ClientInfo {
        ClientInfo {
            client_id: self.id.clone(),
            name: self.name.clone(),
            address: self.address.to_string(),
            platform: self.platform.clone(),
            is_available: self.is_available,
            supports_encryption: self.supports_encryption,
            public_key: self.public_key.clone(),
            last_seen: self.last_seen,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientRegistry
// ---------------------------------------------------------------------------

/// Registry aller aktuell registrierten Clients
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<DashMap<ClientId, ClientRecord>>,
}

impl ClientRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Speichert einen Eintrag und gibt den ersetzten Eintrag zurueck
    pub fn registrieren(&self, record: ClientRecord) -> Option<ClientRecord> {
        let id = record.id.clone();
        let alt = self.inner.insert(id.clone(), record);
        if alt.is_some() {
            tracing::info!(client_id = %id, "Client neu registriert – Eintrag ersetzt");
        } else {
            tracing::info!(client_id = %id, "Client registriert");
        }
        alt
    }

    /// Sucht einen Client
    pub fn suchen(&self, id: &ClientId) -> Option<ClientRecord> {
        self.inner.get(id).map(|r| r.value().clone())
    }

    /// Entfernt einen Client, sofern er noch zu `connection` gehoert
    ///
    /// Gibt den entfernten Eintrag zurueck. Bei mehrfachem Aufruf liefert
    /// nur der erste einen Eintrag.
    pub fn entfernen_wenn_verbindung(
        &self,
        id: &ClientId,
        connection: &ConnectionId,
    ) -> Option<ClientRecord> {
        self.inner
            .remove_if(id, |_, record| &record.connection == connection)
            .map(|(_, record)| record)
    }

    /// Aktualisiert den Zeitpunkt der letzten Aktivitaet
    pub fn zuletzt_gesehen_aktualisieren(&self, id: &ClientId, connection: &ConnectionId) {
        if let Some(mut record) = self.inner.get_mut(id) {
            if &record.connection == connection {
                record.last_seen = Utc::now();
            }
        }
    }

    /// Alle Clients ausser `ausgenommen`
    pub fn andere_clients(&self, ausgenommen: &ClientId) -> Vec<ClientInfo> {
        self.inner
            .iter()
            .filter(|e| e.key() != ausgenommen)
            .map(|e| e.value().to_info())
            .collect()
    }

    /// Verbindungen aller Clients ausser `ausgenommen`
    pub fn verbindungen_ausser(&self, ausgenommen: &ClientId) -> Vec<ConnectionId> {
        self.inner
            .iter()
            .filter(|e| e.key() != ausgenommen)
            .map(|e| e.value().connection)
            .collect()
    }

    /// Oeffentlicher Schluessel eines Clients
    pub fn public_key(&self, id: &ClientId) -> Option<String> {
        self.inner.get(id).and_then(|r| r.public_key.clone())
    }

    /// Anzahl registrierter Clients
    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }
}

impl Default for ClientRegistry {
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

    fn eintrag(id: &str, connection: ConnectionId, name: &str) -> ClientRecord {
        ClientRecord {
            id: ClientId::from(id),
            connection,
            name: name.to_string(),
            address: "127.0.0.1:50000".parse().unwrap(),
            platform: "linux".to_string(),
            is_available: true,
            supports_encryption: false,
            last_seen: Utc::now(),
            public_key: None,
        }
    }

    #[test]
    fn neu_registrierung_ersetzt_ohne_zusammenfuehren() {
        let registry = ClientRegistry::neu();
        let conn = ConnectionId::new();

        let mut erster = eintrag("desk-1", conn, "Buero");
        erster.public_key = Some("ALT".into());
        erster.supports_encryption = true;
        registry.registrieren(erster);

        let zweiter = eintrag("desk-1", conn, "Wohnzimmer");
        let ersetzt = registry.registrieren(zweiter.clone());
        assert_eq!(ersetzt.map(|r| r.name), Some("Buero".to_string()));

        let gefunden = registry.suchen(&ClientId::from("desk-1")).unwrap();
        assert_eq!(gefunden, zweiter);
        assert!(gefunden.public_key.is_none(), "Alter Schluessel darf nicht uebernommen werden");
        assert!(!gefunden.supports_encryption);
        assert_eq!(registry.anzahl(), 1);
    }

    #[test]
    fn entfernen_genau_einmal() {
        let registry = ClientRegistry::neu();
        let conn = ConnectionId::new();
        registry.registrieren(eintrag("desk-1", conn, "A"));

        let id = ClientId::from("desk-1");
        assert!(registry.entfernen_wenn_verbindung(&id, &conn).is_some());
        assert!(registry.entfernen_wenn_verbindung(&id, &conn).is_none());
        assert!(registry.suchen(&id).is_none());
    }

    #[test]
    fn alte_verbindung_entfernt_neue_registrierung_nicht() {
        let registry = ClientRegistry::neu();
        let alt = ConnectionId::new();
        let neu = ConnectionId::new();
        let id = ClientId::from("desk-1");

        registry.registrieren(eintrag("desk-1", alt, "A"));
        registry.registrieren(eintrag("desk-1", neu, "A"));

        assert!(registry.entfernen_wenn_verbindung(&id, &alt).is_none());
        assert_eq!(registry.suchen(&id).map(|r| r.connection), Some(neu));
    }

    #[test]
    fn andere_clients_ohne_sich_selbst() {
        let registry = ClientRegistry::neu();
        let c1 = ConnectionId::new();
        let c2 = ConnectionId::new();
        registry.registrieren(eintrag("a", c1, "A"));
        registry.registrieren(eintrag("b", c2, "B"));

        let andere = registry.andere_clients(&ClientId::from("a"));
        assert_eq!(andere.len(), 1);
        assert_eq!(andere[0].client_id, ClientId::from("b"));

        assert_eq!(registry.verbindungen_ausser(&ClientId::from("a")), vec![c2]);
    }

    #[test]
    fn zuletzt_gesehen_nur_fuer_eigene_verbindung() {
        let registry = ClientRegistry::neu();
        let conn = ConnectionId::new();
        let mut record = eintrag("a", conn, "A");
        record.last_seen = DateTime::<Utc>::MIN_UTC;
        registry.registrieren(record);

        let id = ClientId::from("a");
        registry.zuletzt_gesehen_aktualisieren(&id, &ConnectionId::new());
        assert_eq!(registry.suchen(&id).unwrap().last_seen, DateTime::<Utc>::MIN_UTC);

        registry.zuletzt_gesehen_aktualisieren(&id, &conn);
        assert!(registry.suchen(&id).unwrap().last_seen > DateTime::<Utc>::MIN_UTC);
    }
}
