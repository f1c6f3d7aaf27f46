//! relaydesk-server – Bibliotheks-Root
//!
//! Verdrahtet Signaling, Upload-Kanal und Observability zu einem Prozess.

pub mod config;
pub mod uploads;

use anyhow::{Context, Result};
use config::ServerConfig;
use relaydesk_observability::{
    observability_server_starten, request_timing_layer, timing_middleware, KennzahlenQuelle,
    RelayKennzahlen, RelayMetrics,
};
use relaydesk_signaling::{SignalingServer, SignalingState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use uploads::{upload_router, UploadSpeicher};

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    pub state: Arc<SignalingState>,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        let state = SignalingState::neu(config.signaling_config());
        Self { config, state }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Signaling-Listener (TCP)
    /// 2. Upload/Download (HTTP), falls aktiviert
    /// 3. Observability (Metriken, Health), falls aktiviert
    /// 4. Auf Ctrl-C warten, dann alle Tasks ueber den Watch-Kanal beenden
    pub async fn starten(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metriken = RelayMetrics::neu()?;
        let mut tasks = tokio::task::JoinSet::new();

        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %self.config.tcp_bind_adresse(),
            max_clients = self.config.server.max_clients,
            verschluesselung = self.config.krypto.verschluesselung_unterstuetzt,
            "Server startet"
        );

        let tcp_addr = adresse_parsen(&self.config.tcp_bind_adresse())?;
        let signaling = SignalingServer::neu(self.state.clone(), tcp_addr);
        let rx = shutdown_rx.clone();
        tasks.spawn(async move {
            signaling
                .starten(rx)
                .await
                .context("Signaling-Server beendet")
        });

        if self.config.uploads.aktiviert {
            let http_addr = adresse_parsen(&self.config.http_bind_adresse())?;
            let app = http_router(&self.config, metriken.clone());
            let mut rx = shutdown_rx.clone();
            tasks.spawn(async move {
                let listener = tokio::net::TcpListener::bind(http_addr).await?;
                tracing::info!(adresse = %http_addr, "Upload-Kanal gestartet");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        while rx.changed().await.is_ok() {
                            if *rx.borrow() {
                                break;
                            }
                        }
                    })
                    .await
                    .context("Upload-Kanal beendet")
            });
        }

        if self.config.observability.aktiviert {
            let obs_addr = adresse_parsen(&self.config.observability_bind_adresse())?;
            let quelle = kennzahlen_quelle(self.state.clone());
            let rx = shutdown_rx.clone();
            tasks.spawn(observability_server_starten(obs_addr, metriken, quelle, rx));
        }

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
            }
            Some(ergebnis) = tasks.join_next() => {
                // Ein Subsystem ist vorzeitig ausgestiegen
                let _ = shutdown_tx.send(true);
                ergebnis??;
                anyhow::bail!("Subsystem unerwartet beendet");
            }
        }

        let _ = shutdown_tx.send(true);
        while let Some(ergebnis) = tasks.join_next().await {
            if let Err(e) = ergebnis? {
                tracing::warn!(fehler = %e, "Subsystem mit Fehler beendet");
            }
        }
        Ok(())
    }
}

/// HTTP-Router fuer den Upload-Kanal inklusive Metriken, Tracing und CORS
pub fn http_router(config: &ServerConfig, metriken: RelayMetrics) -> axum::Router {
    let speicher = Arc::new(UploadSpeicher::neu(config.uploads.verzeichnis.clone()));
    upload_router(speicher, config.uploads.max_bytes())
        .layer(axum::middleware::from_fn_with_state(
            metriken,
            timing_middleware,
        ))
        .layer(request_timing_layer())
        .layer(CorsLayer::permissive())
}

/// Liest die Relay-Kennzahlen bei jedem Aufruf frisch aus dem Zustand
pub fn kennzahlen_quelle(state: Arc<SignalingState>) -> KennzahlenQuelle {
    Arc::new(move || {
        let statistik = state.statistik.snapshot();
        RelayKennzahlen {
            verbundene_clients: state.registry.anzahl() as u64,
            max_clients: u64::from(state.config.max_clients),
            aktive_sitzungen: state.sessions.aktive_sitzungen() as u64,
            offene_anfragen: state.sessions.offene_anfragen() as u64,
            weitergeleitet: statistik.weitergeleitet,
            angenommen: statistik.angenommen,
            abgelehnt: statistik.abgelehnt,
            abgelaufen: statistik.abgelaufen,
            fehlgeschlagen: statistik.fehlgeschlagen,
        }
    })
}

fn adresse_parsen(adresse: &str) -> Result<SocketAddr> {
    adresse
        .parse()
        .with_context(|| format!("Ungueltige Bind-Adresse '{adresse}'"))
}
