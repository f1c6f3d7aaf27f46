//! Nachrichten der Chunk-Uebertragung
//!
//! Diese Nachrichten reisen als opaker Inhalt eines `file-transfer`-Umschlags
//! durch das Relay. Nur die beiden Endpunkte interpretieren sie.

use serde::{Deserialize, Serialize};

/// Chunkgroesse fuer verschluesselte Nutzlasten (Chiffrat-Bloecke)
pub const VERSCHLUESSELT_CHUNK_GROESSE: usize = 1024 * 1024;

/// Fenstergroesse fuer Klartext-Nutzlasten (Base64-Zeichen)
pub const KLARTEXT_CHUNK_GROESSE: usize = 64 * 1024;

/// Maximale Nutzlast einer Uebertragung (100 MiB)
pub const MAX_NUTZLAST: u64 = 100 * 1024 * 1024;

/// Eine Nachricht der Chunk-Uebertragung
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum TransferMessage {
    /// Kuendigt die Uebertragung an (vor Chunk 0)
    #[serde(rename_all = "camelCase")]
    Metadata {
        file_name: String,
        total_chunks: u32,
        file_size: u64,
        encrypted: bool,
    },
    /// Ein einzelner Chunk (Base64)
    #[serde(rename_all = "camelCase")]
    SendChunk {
        file_name: String,
        chunk: String,
        chunk_index: u32,
        total_chunks: u32,
        file_size: u64,
        encrypted: bool,
    },
    /// Abschlussmarke nach dem letzten Chunk
    #[serde(rename_all = "camelCase")]
    SendComplete {
        file_name: String,
        file_size: u64,
        encrypted: bool,
    },
}

impl TransferMessage {
    /// Dateiname, auf den sich die Nachricht bezieht
    pub fn file_name(&self) -> &str {
        match self {
            Self::Metadata { file_name, .. }
            | Self::SendChunk { file_name, .. }
            | Self::SendComplete { file_name, .. } => file_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_wire_format() {
        let msg = TransferMessage::SendChunk {
            file_name: "bericht.pdf".into(),
            chunk: "QUJD".into(),
            chunk_index: 2,
            total_chunks: 5,
            file_size: 300_000,
            encrypted: false,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["action"], "send-chunk");
        assert_eq!(value["chunkIndex"], 2);
        assert_eq!(value["totalChunks"], 5);
        assert_eq!(value["fileName"], "bericht.pdf");

        let decoded: TransferMessage = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.file_name(), "bericht.pdf");
    }

    #[test]
    fn chunk_groessen() {
        assert_eq!(VERSCHLUESSELT_CHUNK_GROESSE, 1_048_576);
        assert_eq!(KLARTEXT_CHUNK_GROESSE, 65_536);
    }
}
