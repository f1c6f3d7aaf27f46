//! Request-Timing Middleware fuer Axum
//!
//! Misst die Antwortzeit jeder HTTP-Anfrage, protokolliert sie als
//! strukturiertes Log-Event und traegt sie in die HTTP-Metriken ein.

use axum::{
    body::Body,
    extract::State,
    http::{Request, Response},
    middleware::Next,
};
use std::time::Instant;

use crate::metrics::RelayMetrics;

/// Erstellt den Tower-Layer fuer Request-Spans.
pub fn request_timing_layer() -> tower_http::trace::TraceLayer<
    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
> {
    tower_http::trace::TraceLayer::new_for_http()
}

/// Axum-Middleware-Funktion: misst Antwortzeit, loggt und zaehlt.
///
/// Verwendung:
/// ```ignore
/// Router::new()
///     .route("/", get(handler))
///     .layer(axum::middleware::from_fn_with_state(metriken, timing_middleware))
/// ```
pub async fn timing_middleware(
    State(metriken): State<RelayMetrics>,
    req: Request<Body>,
    next: Next,
) -> Response<Body> {
    let methode = req.method().to_string();
    let pfad = pfad_label(req.uri().path());
    let start = Instant::now();

    let response = next.run(req).await;

    let dauer = start.elapsed();
    let status = response.status().as_u16();

    metriken
        .http_requests_total
        .with_label_values(&[methode.as_str(), pfad, status.to_string().as_str()])
        .inc();
    metriken
        .http_request_duration_seconds
        .with_label_values(&[methode.as_str(), pfad])
        .observe(dauer.as_secs_f64());

    tracing::info!(
        method = %methode,
        path = %pfad,
        status = status,
        duration_ms = dauer.as_millis(),
        "HTTP-Anfrage abgeschlossen"
    );

    response
}

/// Fasst Pfade mit Dateinamen zusammen, damit die Label-Anzahl begrenzt bleibt
pub fn pfad_label(pfad: &str) -> &'static str {
    match pfad {
        "/upload" => "/upload",
        "/health" => "/health",
        "/metrics" => "/metrics",
        p if p.starts_with("/download/") => "/download/:filename",
        _ => "other",
    }
}
