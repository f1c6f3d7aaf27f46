//! Prometheus-kompatible Metriken fuer relaydesk
//!
//! Registrierte Metriken:
//! - `relaydesk_connected_clients` – Gauge: Aktuell registrierte Clients
//! - `relaydesk_active_sessions` – Gauge: Aktive Sitzungen
//! - `relaydesk_pending_requests` – Gauge: Unbeantwortete Verbindungsanfragen
//! - `relaydesk_relayed_messages_total` – Counter: Weitergeleitete Sitzungsnachrichten
//! - `relaydesk_negotiations_total` – Counter: Ausgang der Aushandlungen (outcome)
//! - `relaydesk_http_requests_total` – Counter: HTTP-Anfragen (method, path, status)
//! - `relaydesk_http_request_duration_seconds` – Histogram: HTTP-Antwortzeit
//!
//! Die Relay-Werte werden beim Scrape aus einer `KennzahlenQuelle` gelesen.

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Momentaufnahme der Relay-Zaehler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayKennzahlen {
    pub verbundene_clients: u64,
    pub max_clients: u64,
    pub aktive_sitzungen: u64,
    pub offene_anfragen: u64,
    pub weitergeleitet: u64,
    pub angenommen: u64,
    pub abgelehnt: u64,
    pub abgelaufen: u64,
    pub fehlgeschlagen: u64,
}

/// Liefert die aktuellen Kennzahlen (z.B. aus dem SignalingState)
pub type KennzahlenQuelle = Arc<dyn Fn() -> RelayKennzahlen + Send + Sync>;

/// Alle relaydesk-Prometheus-Metriken
#[derive(Clone)]
pub struct RelayMetrics {
    pub registry: Arc<Registry>,

    // Relay-Metriken
    pub connected_clients: IntGauge,
    pub active_sessions: IntGauge,
    pub pending_requests: IntGauge,
    pub relayed_messages_total: IntCounter,
    pub negotiations_total: IntCounterVec,

    // HTTP-Metriken
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
}

impl RelayMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // --- Relay-Metriken ---
        let connected_clients = IntGauge::with_opts(Opts::new(
            "relaydesk_connected_clients",
            "Anzahl aktuell registrierter Clients",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let active_sessions = IntGauge::with_opts(Opts::new(
            "relaydesk_active_sessions",
            "Anzahl aktiver Sitzungen",
        ))?;
        registry.register(Box::new(active_sessions.clone()))?;

        let pending_requests = IntGauge::with_opts(Opts::new(
            "relaydesk_pending_requests",
            "Anzahl unbeantworteter Verbindungsanfragen",
        ))?;
        registry.register(Box::new(pending_requests.clone()))?;

        let relayed_messages_total = IntCounter::with_opts(Opts::new(
            "relaydesk_relayed_messages_total",
            "Gesamtanzahl weitergeleiteter Sitzungsnachrichten",
        ))?;
        registry.register(Box::new(relayed_messages_total.clone()))?;

        let negotiations_total = IntCounterVec::new(
            Opts::new(
                "relaydesk_negotiations_total",
                "Ausgang der Verbindungsaushandlungen",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(negotiations_total.clone()))?;

        // --- HTTP-Metriken ---
        let http_requests_total = IntCounterVec::new(
            Opts::new("relaydesk_http_requests_total", "Gesamtanzahl HTTP-Anfragen"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "relaydesk_http_request_duration_seconds",
                "HTTP-Antwortzeit in Sekunden",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "path"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            active_sessions,
            pending_requests,
            relayed_messages_total,
            negotiations_total,
            http_requests_total,
            http_request_duration_seconds,
        })
    }

    /// Uebernimmt eine Momentaufnahme
    ///
    /// Zaehler steigen nur um die Differenz zum bisherigen Stand.
    pub fn uebernehmen(&self, k: &RelayKennzahlen) {
        self.connected_clients.set(k.verbundene_clients as i64);
        self.active_sessions.set(k.aktive_sitzungen as i64);
        self.pending_requests.set(k.offene_anfragen as i64);
        nachziehen(&self.relayed_messages_total, k.weitergeleitet);

        for (outcome, wert) in [
            ("accepted", k.angenommen),
            ("rejected", k.abgelehnt),
            ("timed_out", k.abgelaufen),
            ("failed", k.fehlgeschlagen),
        ] {
            nachziehen(&self.negotiations_total.with_label_values(&[outcome]), wert);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn nachziehen(counter: &IntCounter, stand: u64) {
    let delta = stand.saturating_sub(counter.get());
    if delta > 0 {
        counter.inc_by(delta);
    }
}

#[derive(Clone)]
struct MetrikState {
    metriken: RelayMetrics,
    quelle: KennzahlenQuelle,
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: RelayMetrics, quelle: KennzahlenQuelle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(MetrikState { metriken, quelle })
}

async fn metrics_handler(State(state): State<MetrikState>) -> impl IntoResponse {
    state.metriken.uebernehmen(&(state.quelle)());
    match state.metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kennzahlen() -> RelayKennzahlen {
        RelayKennzahlen {
            verbundene_clients: 3,
            max_clients: 512,
            aktive_sitzungen: 1,
            offene_anfragen: 2,
            weitergeleitet: 40,
            angenommen: 5,
            abgelehnt: 1,
            abgelaufen: 0,
            fehlgeschlagen: 2,
        }
    }

    #[test]
    fn uebernehmen_setzt_gauges_und_zaehler() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.uebernehmen(&kennzahlen());

        assert_eq!(metriken.connected_clients.get(), 3);
        assert_eq!(metriken.active_sessions.get(), 1);
        assert_eq!(metriken.pending_requests.get(), 2);
        assert_eq!(metriken.relayed_messages_total.get(), 40);
        assert_eq!(
            metriken.negotiations_total.with_label_values(&["accepted"]).get(),
            5
        );
    }

    #[test]
    fn zaehler_wachsen_nur_um_differenz() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.uebernehmen(&kennzahlen());
        metriken.uebernehmen(&kennzahlen());
        assert_eq!(metriken.relayed_messages_total.get(), 40);

        let mut spaeter = kennzahlen();
        spaeter.weitergeleitet = 45;
        spaeter.verbundene_clients = 1;
        metriken.uebernehmen(&spaeter);
        assert_eq!(metriken.relayed_messages_total.get(), 45);
        assert_eq!(metriken.connected_clients.get(), 1);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = RelayMetrics::neu().unwrap();
        metriken.uebernehmen(&kennzahlen());

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("relaydesk_connected_clients 3"));
        assert!(output.contains("relaydesk_relayed_messages_total 40"));
        assert!(output.contains("relaydesk_negotiations_total{outcome=\"failed\"} 2"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[tokio::test]
    async fn metrics_endpunkt_liest_quelle() {
        use axum::body::Body;
        use axum::http::{Request, StatusCode};
        use tower::ServiceExt;

        let quelle: KennzahlenQuelle = Arc::new(kennzahlen);
        let app = metrics_router(RelayMetrics::neu().unwrap(), quelle);

        let antwort = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(antwort.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(antwort.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("relaydesk_active_sessions 1"));
    }
}
