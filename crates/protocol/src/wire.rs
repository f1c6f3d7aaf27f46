//! Wire-Format fuer TCP-Verbindungen
//!
//! Frame-basiertes Protokoll: Length(u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Ein zu grosser Frame ist ein Transportfehler. Ein vollstaendiger Frame mit
//! ungueltigem JSON wird dagegen als [`Frame::Malformed`] geliefert, damit die
//! Verbindung eine Fehlerantwort senden und weiterlaufen kann.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::control::ControlMessage;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Standard-maximale Frame-Groesse (2 MB, ein 1-MiB-Chunk in Base64 passt hinein)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Ergebnis des Dekodierens eines vollstaendigen Frames
#[derive(Debug, Clone)]
pub enum Frame {
    /// Gueltige Control-Nachricht
    Message(ControlMessage),
    /// Frame war vollstaendig, der Inhalt aber kein gueltiges JSON
    Malformed { reason: String },
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte TCP-Verbindungen
///
/// # Beispiel
///
/// ```rust,no_run
/// use tokio_util::codec::Framed;
/// use relaydesk_protocol::wire::FrameCodec;
///
/// // let stream = TcpStream::connect(...).await?;
/// // let framed = Framed::new(stream, FrameCodec::new());
/// ```
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Maximale erlaubte Frame-Groesse in Bytes
    max_frame_size: usize,
}

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec` mit Standard-Limits
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Erstellt einen `FrameCodec` mit benutzerdefinierter maximaler Frame-Groesse
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Gibt die konfigurierte maximale Frame-Groesse zurueck
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder-Implementierung
// ---------------------------------------------------------------------------

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        // Ungueltiges JSON verbraucht den Frame, beendet aber nicht den Stream
        match serde_json::from_slice::<ControlMessage>(&payload) {
            Ok(message) => Ok(Some(Frame::Message(message))),
            Err(e) => Ok(Some(Frame::Malformed {
                reason: format!("JSON-Deserialisierung fehlgeschlagen: {}", e),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoder-Implementierung
// ---------------------------------------------------------------------------

impl Encoder<ControlMessage> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {}", e),
            )
        })?;

        if json.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    json.len(),
                    self.max_frame_size
                ),
            ));
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlPayload;

    fn test_ping_nachricht(request_id: u32) -> ControlMessage {
        ControlMessage::ping(request_id, 999888777)
    }

    fn erwarte_nachricht(frame: Frame) -> ControlMessage {
        match frame {
            Frame::Message(m) => m,
            Frame::Malformed { reason } => panic!("Unerwartet fehlerhafter Frame: {reason}"),
        }
    }

    #[test]
    fn frame_codec_encode_decode() {
        let mut codec = FrameCodec::new();

        let mut buf = BytesMut::new();
        codec.encode(test_ping_nachricht(42), &mut buf).unwrap();

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(buf.len(), LENGTH_FIELD_SIZE + payload_len);

        let decoded = erwarte_nachricht(codec.decode(&mut buf).unwrap().expect("Frame erwartet"));
        assert_eq!(decoded.request_id, 42);
        assert!(matches!(decoded.payload, ControlPayload::Ping(_)));
    }

    #[test]
    fn frame_codec_unvollstaendiger_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(test_ping_nachricht(1), &mut buf).unwrap();

        let half = buf.len() / 2;
        let mut partial = buf.split_to(half);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn frame_codec_ablehnung_zu_grosser_frame() {
        let mut codec = FrameCodec::with_max_size(100);
        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(&[b'x'; 200]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn frame_codec_ungueltiges_json_ist_kein_transportfehler() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let muell = b"{\"request_id\": 1, \"payload\": ";
        buf.put_u32(muell.len() as u32);
        buf.put_slice(muell);
        // Danach folgt ein gueltiger Frame
        codec.encode(test_ping_nachricht(5), &mut buf).unwrap();

        let erster = codec.decode(&mut buf).unwrap().expect("Frame erwartet");
        assert!(matches!(erster, Frame::Malformed { .. }));

        let zweiter = erwarte_nachricht(codec.decode(&mut buf).unwrap().expect("Frame erwartet"));
        assert_eq!(zweiter.request_id, 5);
        assert!(buf.is_empty());
    }

    #[test]
    fn frame_codec_ablehnung_beim_encode_zu_grosse_nachricht() {
        let mut codec = FrameCodec::with_max_size(10);
        let mut buf = BytesMut::new();
        assert!(codec.encode(test_ping_nachricht(1), &mut buf).is_err());
    }

    #[test]
    fn frame_codec_mehrere_nachrichten_im_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();

        for i in 0..3u32 {
            codec.encode(test_ping_nachricht(i), &mut buf).unwrap();
        }
        for i in 0..3u32 {
            let msg = erwarte_nachricht(codec.decode(&mut buf).unwrap().expect("Frame erwartet"));
            assert_eq!(msg.request_id, i);
        }
        assert!(buf.is_empty());
    }
}
