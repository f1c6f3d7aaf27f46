//! Health-Check-Endpunkt fuer relaydesk
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Auslastung

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::metrics::{KennzahlenQuelle, RelayKennzahlen};

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Voller Server gilt als `Degraded`
    pub fn aus_kennzahlen(k: &RelayKennzahlen) -> Self {
        if k.max_clients > 0 && k.verbundene_clients >= k.max_clients {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub connected_clients: u64,
    pub active_sessions: u64,
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub quelle: KennzahlenQuelle,
}

impl HealthState {
    pub fn neu(quelle: KennzahlenQuelle) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            quelle,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn antwort(&self) -> HealthResponse {
        let k = (self.quelle)();
        HealthResponse {
            status: HealthStatus::aus_kennzahlen(&k),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            connected_clients: k.verbundene_clients,
            active_sessions: k.aktive_sitzungen,
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(quelle: KennzahlenQuelle) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(HealthState::neu(quelle))
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quelle(verbunden: u64, max: u64) -> KennzahlenQuelle {
        Arc::new(move || RelayKennzahlen {
            verbundene_clients: verbunden,
            max_clients: max,
            aktive_sitzungen: 2,
            ..Default::default()
        })
    }

    #[test]
    fn gesund_unter_der_grenze() {
        let state = HealthState::neu(quelle(3, 10));
        let antwort = state.antwort();
        assert_eq!(antwort.status, HealthStatus::Healthy);
        assert_eq!(antwort.connected_clients, 3);
        assert_eq!(antwort.active_sessions, 2);
        assert!(antwort.uptime_seconds < 5);
    }

    #[test]
    fn voller_server_ist_degraded() {
        let state = HealthState::neu(quelle(10, 10));
        assert_eq!(state.antwort().status, HealthStatus::Degraded);
    }

    #[test]
    fn health_response_serialisierung() {
        let response = HealthResponse {
            status: HealthStatus::Healthy,
            version: "0.1.0".to_string(),
            uptime_seconds: 3600,
            connected_clients: 4,
            active_sessions: 1,
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"uptime_seconds\":3600"));
        assert!(json.contains("\"connected_clients\":4"));
    }
}
