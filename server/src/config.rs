//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Server ohne Konfigurationsdatei
//! lauffaehig ist.

use relaydesk_signaling::SignalingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Aushandlung und Keepalive
    pub sitzung: SitzungsEinstellungen,
    /// Verschluesselung
    pub krypto: KryptoEinstellungen,
    /// Upload/Download-Seitenkanal
    pub uploads: UploadEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Verbindungen
    pub max_clients: u32,
    /// Gemeinsames Geheimnis fuer die Registrierung (leer = offen)
    pub zugangs_geheimnis: Option<String>,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "relaydesk".into(),
            max_clients: 512,
            zugangs_geheimnis: None,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer alle Listener
    pub bind_adresse: String,
    /// Port fuer das Signaling (TCP, Frame-Protokoll)
    pub tcp_port: u16,
    /// Port fuer Upload/Download (HTTP)
    pub http_port: u16,
    /// Groesse der Sende-Queue pro Verbindung
    pub send_queue_groesse: usize,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 3001,
            http_port: 3002,
            send_queue_groesse: 256,
        }
    }
}

/// Aushandlung und Keepalive
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitzungsEinstellungen {
    /// Zeit bis eine unbeantwortete Verbindungsanfrage ablaeuft
    pub anfrage_timeout_sek: u64,
    /// Intervall fuer Server-Pings
    pub keepalive_sek: u64,
    /// Verbindung wird nach dieser Zeit ohne Frame getrennt
    pub verbindungs_timeout_sek: u64,
}

impl Default for SitzungsEinstellungen {
    fn default() -> Self {
        Self {
            anfrage_timeout_sek: 30,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
        }
    }
}

/// Verschluesselung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KryptoEinstellungen {
    /// Leitet Handshake-Nachrichten weiter und meldet das bei der Registrierung
    pub verschluesselung_unterstuetzt: bool,
}

impl Default for KryptoEinstellungen {
    fn default() -> Self {
        Self {
            verschluesselung_unterstuetzt: true,
        }
    }
}

/// Upload/Download-Seitenkanal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadEinstellungen {
    /// Aktiviert den HTTP-Server fuer Uploads
    pub aktiviert: bool,
    /// Ablageverzeichnis
    pub verzeichnis: PathBuf,
    /// Maximale Dateigroesse in MiB
    pub max_groesse_mb: u64,
}

impl Default for UploadEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            verzeichnis: PathBuf::from("uploads"),
            max_groesse_mb: 100,
        }
    }
}

impl UploadEinstellungen {
    pub fn max_bytes(&self) -> usize {
        (self.max_groesse_mb as usize).saturating_mul(1024 * 1024)
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            port: 9300,
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Einstellungen fuer den Signaling-Dienst
    pub fn signaling_config(&self) -> SignalingConfig {
        SignalingConfig {
            max_clients: self.server.max_clients,
            keepalive_sek: self.sitzung.keepalive_sek,
            verbindungs_timeout_sek: self.sitzung.verbindungs_timeout_sek,
            anfrage_timeout_sek: self.sitzung.anfrage_timeout_sek,
            verschluesselung_unterstuetzt: self.krypto.verschluesselung_unterstuetzt,
            zugangs_geheimnis: self
                .server
                .zugangs_geheimnis
                .clone()
                .filter(|g| !g.is_empty()),
            send_queue_groesse: self.netzwerk.send_queue_groesse,
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer das Signaling zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Gibt die Bind-Adresse fuer Upload/Download zurueck
    pub fn http_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.http_port)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.observability.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.server.max_clients, 512);
        assert_eq!(cfg.netzwerk.tcp_port, 3001);
        assert_eq!(cfg.sitzung.anfrage_timeout_sek, 30);
        assert!(cfg.krypto.verschluesselung_unterstuetzt);
        assert_eq!(cfg.uploads.max_bytes(), 100 * 1024 * 1024);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn bind_adressen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.tcp_bind_adresse(), "0.0.0.0:3001");
        assert_eq!(cfg.http_bind_adresse(), "0.0.0.0:3002");
        assert_eq!(cfg.observability_bind_adresse(), "0.0.0.0:9300");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [server]
            name = "Buero"
            zugangs_geheimnis = "abc"

            [sitzung]
            anfrage_timeout_sek = 10

            [krypto]
            verschluesselung_unterstuetzt = false
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.name, "Buero");
        assert_eq!(cfg.sitzung.anfrage_timeout_sek, 10);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.sitzung.keepalive_sek, 30);
        assert_eq!(cfg.netzwerk.tcp_port, 3001);

        let signaling = cfg.signaling_config();
        assert_eq!(signaling.anfrage_timeout_sek, 10);
        assert!(!signaling.verschluesselung_unterstuetzt);
        assert_eq!(signaling.zugangs_geheimnis.as_deref(), Some("abc"));
    }

    #[test]
    fn leeres_geheimnis_bedeutet_offen() {
        let mut cfg = ServerConfig::default();
        cfg.server.zugangs_geheimnis = Some(String::new());
        assert!(cfg.signaling_config().zugangs_geheimnis.is_none());
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = ServerConfig::laden("/nicht/vorhanden/relaydesk.toml").unwrap();
        assert_eq!(cfg.netzwerk.tcp_port, 3001);
    }
}
