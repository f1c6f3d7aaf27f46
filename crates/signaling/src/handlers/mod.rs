//! Handler fuer alle Control-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig
//! und hat Zugriff auf den gemeinsamen SignalingState. Der Rueckgabewert
//! ist die direkte Antwort an den Absender, weitergeleitete Nachrichten
//! gehen ueber den EventBroadcaster.

pub mod crypto_handler;
pub mod register_handler;
pub mod relay_handler;
pub mod session_handler;

/// Aktueller Unix-Timestamp in Millisekunden
pub(crate) fn jetzt_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
