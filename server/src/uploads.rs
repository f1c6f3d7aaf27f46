//! Upload/Download-Seitenkanal
//!
//! - `POST /upload` (multipart, Feld `file`) speichert unter
//!   `<millis>-<uuid>-<originalname>`
//! - `GET /download/:filename` liefert die Datei oder 404
//!
//! Die UUID verhindert Kollisionen bei Uploads in derselben Millisekunde.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler des Upload-Kanals
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Keine Datei im Feld 'file'")]
    KeineDatei,

    #[error("Ungueltiger Dateiname: {0}")]
    UngueltigerName(String),

    #[error("Datei nicht gefunden: {0}")]
    NichtGefunden(String),

    #[error("Multipart-Fehler: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::KeineDatei | Self::UngueltigerName(_) | Self::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NichtGefunden(_) => StatusCode::NOT_FOUND,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(fehler = %self, "Upload-Kanal");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

// ---------------------------------------------------------------------------
// Speicher
// ---------------------------------------------------------------------------

/// Ablage auf der Platte unter `basis/<name>`
#[derive(Debug, Clone)]
pub struct UploadSpeicher {
    basis: PathBuf,
}

impl UploadSpeicher {
    pub fn neu(basis: impl Into<PathBuf>) -> Self {
        Self {
            basis: basis.into(),
        }
    }

    /// Speichert `daten` und liefert den vergebenen Namen
    pub async fn speichern(&self, originalname: &str, daten: &[u8]) -> UploadResult<String> {
        let original = name_pruefen(originalname)?;
        let name = format!(
            "{}-{}-{}",
            chrono::Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple(),
            original
        );

        tokio::fs::create_dir_all(&self.basis).await?;
        let pfad = self.basis.join(&name);
        tokio::fs::write(&pfad, daten).await?;
        tracing::info!(datei = %name, bytes = daten.len(), "Upload gespeichert");
        Ok(name)
    }

    /// Laedt eine gespeicherte Datei
    pub async fn laden(&self, name: &str) -> UploadResult<Vec<u8>> {
        let name = name_pruefen(name)?;
        match tokio::fs::read(self.basis.join(name)).await {
            Ok(daten) => Ok(daten),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(UploadError::NichtGefunden(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Nur einfache Dateinamen, keine Pfadbestandteile
fn name_pruefen(name: &str) -> UploadResult<&str> {
    let gueltig = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if gueltig {
        Ok(name)
    } else {
        Err(UploadError::UngueltigerName(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct UploadAntwort {
    success: bool,
    filename: String,
    originalname: String,
    size: usize,
}

/// Axum-Router fuer `/upload` und `/download/:filename`
pub fn upload_router(speicher: Arc<UploadSpeicher>, max_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/download/:filename", get(download_handler))
        .layer(DefaultBodyLimit::max(max_bytes))
        .with_state(speicher)
}

async fn upload_handler(
    State(speicher): State<Arc<UploadSpeicher>>,
    mut multipart: Multipart,
) -> UploadResult<Json<UploadAntwort>> {
    while let Some(feld) = multipart.next_field().await? {
        if feld.name() != Some("file") {
            continue;
        }
        let originalname = feld.file_name().unwrap_or("upload").to_string();
        let daten = feld.bytes().await?;
        let filename = speicher.speichern(&originalname, &daten).await?;
        return Ok(Json(UploadAntwort {
            success: true,
            filename,
            originalname,
            size: daten.len(),
        }));
    }
    Err(UploadError::KeineDatei)
}

async fn download_handler(
    State(speicher): State<Arc<UploadSpeicher>>,
    Path(filename): Path<String>,
) -> UploadResult<Response> {
    let daten = speicher.laden(&filename).await?;
    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', ""));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        daten,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
