//! Chunk-Uebertragung – Sender und Reassembler
//!
//! ## Sender
//! - Klartext: Nutzlast als Base64, in Fenster zu 64 KiB Zeichen geteilt
//! - Verschluesselt: gesamte Nutzlast versiegeln, Chiffrat in 1-MiB-Bloecke
//!   teilen, jeden Block als Base64
//! - `metadata` vor Chunk 0, Chunks mit fester Pause, danach `send-complete`
//! - Keine Bestaetigung, keine Wiederholung
//!
//! ## Reassembler
//! Pro (Peer, Dateiname) ein Slot-Array, dessen Laenge die erste Nachricht
//! mit `totalChunks` festlegt. Chunks werden unabhaengig von der Reihenfolge
//! an ihrem Index abgelegt, jeder Slot zaehlt einmal. Erst wenn alle Slots
//! gefuellt sind, wird zusammengesetzt und ein Ereignis geliefert.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use relaydesk_core::types::{ClientId, SessionId};
use relaydesk_crypto::types::{NONCE_LEN, TAG_LEN};
use relaydesk_crypto::{decrypt_message_bytes, encrypt_message_bytes, SessionKey};
use relaydesk_protocol::control::{ControlPayload, SignalEnvelope};
use relaydesk_protocol::transfer::{
    TransferMessage, KLARTEXT_CHUNK_GROESSE, MAX_NUTZLAST, VERSCHLUESSELT_CHUNK_GROESSE,
};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::client::SignalingClient;
use crate::error::{PeerError, PeerResult, TransferError};

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Zerlegt eine Nutzlast in Transfer-Nachrichten
///
/// Mit `schluessel` wird verschluesselt, ohne im Klartext uebertragen.
pub fn nachrichten_erzeugen(
    file_name: &str,
    daten: &[u8],
    schluessel: Option<&SessionKey>,
) -> PeerResult<Vec<TransferMessage>> {
    let file_size = daten.len() as u64;
    if file_size > MAX_NUTZLAST {
        return Err(TransferError::ZuGross {
            groesse: file_size,
            max: MAX_NUTZLAST,
        }
        .into());
    }

    let encrypted = schluessel.is_some();
    let mut chunks: Vec<String> = match schluessel {
        Some(key) => encrypt_message_bytes(daten, key)?
            .chunks(VERSCHLUESSELT_CHUNK_GROESSE)
            .map(|block| BASE64.encode(block))
            .collect(),
        None => {
            let kodiert = BASE64.encode(daten);
            // Base64 ist reines ASCII, jede Byte-Grenze ist eine Zeichengrenze
            kodiert
                .as_bytes()
                .chunks(KLARTEXT_CHUNK_GROESSE)
                .map(|fenster| String::from_utf8_lossy(fenster).into_owned())
                .collect()
        }
    };
    if chunks.is_empty() {
        chunks.push(String::new());
    }

    let total_chunks = chunks.len() as u32;
    let mut nachrichten = Vec::with_capacity(chunks.len() + 2);
    nachrichten.push(TransferMessage::Metadata {
        file_name: file_name.to_string(),
        total_chunks,
        file_size,
        encrypted,
    });
    for (index, chunk) in chunks.into_iter().enumerate() {
        nachrichten.push(TransferMessage::SendChunk {
            file_name: file_name.to_string(),
            chunk,
            chunk_index: index as u32,
            total_chunks,
            file_size,
            encrypted,
        });
    }
    nachrichten.push(TransferMessage::SendComplete {
        file_name: file_name.to_string(),
        file_size,
        encrypted,
    });
    Ok(nachrichten)
}

/// Sendet Transfer-Nachrichten als `file-transfer` innerhalb einer Sitzung
///
/// Zwischen zwei Chunks liegt jeweils `pause`.
pub async fn senden(
    client: &mut SignalingClient,
    session_id: SessionId,
    nachrichten: Vec<TransferMessage>,
    pause: Duration,
) -> PeerResult<()> {
    let anzahl = nachrichten.len();
    for (i, nachricht) in nachrichten.into_iter().enumerate() {
        let ist_chunk = matches!(nachricht, TransferMessage::SendChunk { .. });
        let payload = serde_json::to_value(&nachricht)?;
        client
            .senden(ControlPayload::FileTransfer(SignalEnvelope::new(session_id, payload)))
            .await?;
        if ist_chunk && i + 2 < anzahl && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    tracing::debug!(session_id = %session_id, nachrichten = anzahl, "Uebertragung gesendet");
    Ok(())
}

// ---------------------------------------------------------------------------
// Reassembler
// ---------------------------------------------------------------------------

/// Ergebnis einer verarbeiteten Transfer-Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEreignis {
    Fortschritt {
        peer: ClientId,
        file_name: String,
        empfangen: u32,
        total: u32,
    },
    Abgeschlossen {
        peer: ClientId,
        file_name: String,
        daten: Vec<u8>,
    },
}

/// Obergrenzen, die ein korrekter Sender fuer eine Nutzlast einhaelt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grenzen {
    chunks: u64,
    zeichen: u64,
}

fn base64_laenge(bytes: u64) -> u64 {
    bytes.div_ceil(3) * 4
}

/// Hoechstzahl an Chunks und Base64-Zeichen fuer `file_size` Bytes
fn grenzen(file_size: u64, encrypted: bool) -> Grenzen {
    if encrypted {
        let chiffrat = file_size + (NONCE_LEN + TAG_LEN) as u64;
        let chunks = chiffrat
            .div_ceil(VERSCHLUESSELT_CHUNK_GROESSE as u64)
            .max(1);
        // Jeder Block wird einzeln kodiert, also hoechstens 4 Zeichen Padding pro Block
        Grenzen {
            chunks,
            zeichen: base64_laenge(chiffrat) + 4 * chunks,
        }
    } else {
        let zeichen = base64_laenge(file_size);
        Grenzen {
            chunks: zeichen.div_ceil(KLARTEXT_CHUNK_GROESSE as u64).max(1),
            zeichen,
        }
    }
}

#[derive(Debug)]
struct TransferState {
    slots: Vec<Option<String>>,
    empfangen: u32,
    zeichen: u64,
    max_zeichen: u64,
    encrypted: bool,
    file_size: u64,
    letzte_aktivitaet: Instant,
}

impl TransferState {
    fn neu(total_chunks: u32, encrypted: bool, file_size: u64, max_zeichen: u64) -> Self {
        Self {
            slots: vec![None; total_chunks as usize],
            empfangen: 0,
            zeichen: 0,
            max_zeichen,
            encrypted,
            file_size,
            letzte_aktivitaet: Instant::now(),
        }
    }

    fn total(&self) -> u32 {
        self.slots.len() as u32
    }
}

type TransferKey = (ClientId, String);

/// Setzt Uebertragungen aller Peers wieder zusammen
#[derive(Debug)]
pub struct Reassembler {
    stall_timeout: Duration,
    transfers: HashMap<TransferKey, TransferState>,
}

impl Reassembler {
    pub fn neu(stall_timeout: Duration) -> Self {
        Self {
            stall_timeout,
            transfers: HashMap::new(),
        }
    }

    /// Verarbeitet eine Transfer-Nachricht von `peer`
    ///
    /// `schluessel` wird nur fuer verschluesselte Uebertragungen beim
    /// Zusammensetzen benoetigt.
    pub fn verarbeiten(
        &mut self,
        peer: &ClientId,
        nachricht: TransferMessage,
        schluessel: Option<&SessionKey>,
    ) -> PeerResult<Option<TransferEreignis>> {
        match nachricht {
            TransferMessage::Metadata {
                file_name,
                total_chunks,
                file_size,
                encrypted,
            } => {
                let state = self.state_holen(peer, &file_name, total_chunks, encrypted, file_size)?;
                state.letzte_aktivitaet = Instant::now();
                Ok(None)
            }

            TransferMessage::SendChunk {
                file_name,
                chunk,
                chunk_index,
                total_chunks,
                file_size,
                encrypted,
            } => {
                let state = self.state_holen(peer, &file_name, total_chunks, encrypted, file_size)?;
                let total = state.total();
                let slot = state
                    .slots
                    .get_mut(chunk_index as usize)
                    .ok_or(TransferError::UngueltigerIndex {
                        index: chunk_index,
                        total,
                    })?;
                if slot.is_none() {
                    let zeichen = state.zeichen + chunk.len() as u64;
                    if zeichen > state.max_zeichen {
                        let max = state.max_zeichen;
                        self.transfers.remove(&(peer.clone(), file_name.clone()));
                        tracing::warn!(peer = %peer, datei = %file_name, max, "Uebertragung zu lang – verworfen");
                        return Err(TransferError::UeberLaenge { file_name, max }.into());
                    }
                    *slot = Some(chunk);
                    state.zeichen = zeichen;
                    state.empfangen += 1;
                }
                state.letzte_aktivitaet = Instant::now();

                if state.empfangen < total {
                    return Ok(Some(TransferEreignis::Fortschritt {
                        peer: peer.clone(),
                        file_name,
                        empfangen: state.empfangen,
                        total,
                    }));
                }

                let key = (peer.clone(), file_name);
                let state = self
                    .transfers
                    .remove(&key)
                    .ok_or_else(|| PeerError::UnerwarteteAntwort("Uebertragung verschwunden".into()))?;
                let (peer, file_name) = key;
                let daten = zusammensetzen(&peer, state, schluessel)?;
                tracing::info!(peer = %peer, datei = %file_name, bytes = daten.len(), "Uebertragung abgeschlossen");
                Ok(Some(TransferEreignis::Abgeschlossen {
                    peer,
                    file_name,
                    daten,
                }))
            }

            TransferMessage::SendComplete { file_name, .. } => {
                if let Some(state) = self.transfers.get(&(peer.clone(), file_name.clone())) {
                    tracing::debug!(
                        peer = %peer,
                        datei = %file_name,
                        fehlend = state.total() - state.empfangen,
                        "Abschlussmarke vor allen Chunks"
                    );
                }
                Ok(None)
            }
        }
    }

    fn state_holen(
        &mut self,
        peer: &ClientId,
        file_name: &str,
        total_chunks: u32,
        encrypted: bool,
        file_size: u64,
    ) -> PeerResult<&mut TransferState> {
        let key = (peer.clone(), file_name.to_string());
        let max_zeichen = if self.transfers.contains_key(&key) {
            0
        } else {
            if total_chunks == 0 {
                return Err(TransferError::Leer(file_name.to_string()).into());
            }
            if file_size > MAX_NUTZLAST {
                return Err(TransferError::ZuGross {
                    groesse: file_size,
                    max: MAX_NUTZLAST,
                }
                .into());
            }
            // Slot-Array nie groesser als fuer die angekuendigte Groesse noetig
            let g = grenzen(file_size, encrypted);
            if u64::from(total_chunks) > g.chunks {
                return Err(TransferError::ZuVieleChunks {
                    total: total_chunks,
                    file_size,
                    max: g.chunks,
                }
                .into());
            }
            tracing::debug!(peer = %peer, datei = %file_name, total_chunks, "Neue Uebertragung");
            g.zeichen
        };
        Ok(self
            .transfers
            .entry(key)
            .or_insert_with(|| TransferState::neu(total_chunks, encrypted, file_size, max_zeichen)))
    }

    /// Entfernt Uebertragungen ohne Aktivitaet seit `stall_timeout`
    pub fn stockende_entfernen(&mut self, jetzt: Instant) -> Vec<TransferError> {
        let timeout = self.stall_timeout;
        let stockend: Vec<TransferKey> = self
            .transfers
            .iter()
            .filter(|(_, s)| jetzt.saturating_duration_since(s.letzte_aktivitaet) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();

        stockend
            .into_iter()
            .filter_map(|key| {
                self.transfers.remove(&key)?;
                let (peer, file_name) = key;
                tracing::warn!(peer = %peer, datei = %file_name, "Uebertragung stockt – verworfen");
                Some(TransferError::Stockt { peer, file_name })
            })
            .collect()
    }

    /// Verwirft alle Uebertragungen eines Peers
    pub fn peer_vergessen(&mut self, peer: &ClientId) {
        self.transfers.retain(|(p, _), _| p != peer);
    }

    /// Anzahl laufender Uebertragungen
    pub fn laufende(&self) -> usize {
        self.transfers.len()
    }
}

/// Fuegt die Slots in Index-Reihenfolge zusammen
fn zusammensetzen(
    peer: &ClientId,
    state: TransferState,
    schluessel: Option<&SessionKey>,
) -> PeerResult<Vec<u8>> {
    let chunks = state.slots.into_iter().flatten();

    let daten = if state.encrypted {
        let key = schluessel.ok_or_else(|| PeerError::KryptoNichtVerfuegbar(peer.clone()))?;
        let mut chiffrat = Vec::new();
        for chunk in chunks {
            chiffrat.extend(BASE64.decode(chunk).map_err(TransferError::from)?);
        }
        decrypt_message_bytes(&chiffrat, key)?
    } else {
        let kodiert: String = chunks.collect();
        BASE64.decode(kodiert).map_err(TransferError::from)?
    };

    if daten.len() as u64 != state.file_size {
        tracing::warn!(
            peer = %peer,
            erwartet = state.file_size,
            erhalten = daten.len(),
            "Dateigroesse weicht von der Ankuendigung ab"
        );
    }
    Ok(daten)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
