//! Versiegeln und Oeffnen von Nutzlasten pro Peer
//!
//! Jede Nachricht wird mit AES-256-GCM und frischer 96-Bit-Nonce
//! versiegelt. Fehlt ein Schluessel, entscheidet die `EncryptionPolicy`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use relaydesk_core::types::ClientId;
use relaydesk_crypto::{decrypt_message_bytes, encrypt_message_bytes};
use relaydesk_protocol::EncryptionPolicy;
use std::sync::Arc;

use crate::error::{PeerError, PeerResult};
use crate::handshake::HandshakeManager;

/// Ergebnis des Versiegelns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Versiegelt {
    /// nonce || ciphertext, Base64
    Verschluesselt(String),
    /// Kein Schluessel, Rueckfall erlaubt
    Klartext(Vec<u8>),
}

/// Versiegelt Nutzlasten mit den Sitzungsschluesseln des HandshakeManagers
#[derive(Clone)]
pub struct PeerCrypto {
    handshakes: Arc<HandshakeManager>,
    policy: EncryptionPolicy,
}

impl PeerCrypto {
    pub fn neu(handshakes: Arc<HandshakeManager>, policy: EncryptionPolicy) -> Self {
        Self { handshakes, policy }
    }

    pub fn handshakes(&self) -> &Arc<HandshakeManager> {
        &self.handshakes
    }

    pub fn policy(&self) -> EncryptionPolicy {
        self.policy
    }

    /// Versiegelt `klartext` fuer `peer`
    pub fn versiegeln(&self, peer: &ClientId, klartext: &[u8]) -> PeerResult<Versiegelt> {
        match self.handshakes.schluessel(peer) {
            Some(key) => {
                let bytes = encrypt_message_bytes(klartext, &key)?;
                Ok(Versiegelt::Verschluesselt(BASE64.encode(bytes)))
            }
            None if self.policy.erlaubt_klartext() => {
                tracing::warn!(peer = %peer, "Kein Sitzungsschluessel – sende unverschluesselt");
                Ok(Versiegelt::Klartext(klartext.to_vec()))
            }
            None => Err(PeerError::KryptoNichtVerfuegbar(peer.clone())),
        }
    }

    /// Oeffnet eine von `peer` versiegelte Nutzlast
    ///
    /// Ein Fehler betrifft nur diese eine Nachricht.
    pub fn oeffnen(&self, peer: &ClientId, versiegelt: &str) -> PeerResult<Vec<u8>> {
        let key = self
            .handshakes
            .schluessel(peer)
            .ok_or_else(|| PeerError::KryptoNichtVerfuegbar(peer.clone()))?;
        let bytes = BASE64
            .decode(versiegelt)
            .map_err(|e| PeerError::Krypto(e.into()))?;
        Ok(decrypt_message_bytes(&bytes, &key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaydesk_protocol::control::HandshakeInit;
    use std::time::Duration;

    fn paar(policy: EncryptionPolicy) -> (PeerCrypto, PeerCrypto) {
        let r = Arc::new(HandshakeManager::neu(ClientId::from("r"), Duration::from_secs(5)));
        let a = Arc::new(HandshakeManager::neu(ClientId::from("a"), Duration::from_secs(5)));
        let req = r.starten(a.own_id()).unwrap();
        let antwort = a
            .init_annehmen(&HandshakeInit {
                requester_id: r.own_id().clone(),
                requester_public_key: req.public_key,
            })
            .unwrap()
            .unwrap();
        r.abschliessen(a.own_id(), &antwort.encrypted_session_key)
            .unwrap();
        (PeerCrypto::neu(r, policy), PeerCrypto::neu(a, policy))
    }

    #[test]
    fn versiegeln_und_oeffnen() {
        let (r, a) = paar(EncryptionPolicy::RequireEncryption);
        let versiegelt = r.versiegeln(&ClientId::from("a"), b"Bildschirm freigeben").unwrap();
        let text = match versiegelt {
            Versiegelt::Verschluesselt(t) => t,
            andere => panic!("Verschluesselung erwartet: {:?}", andere),
        };
        assert_eq!(
            a.oeffnen(&ClientId::from("r"), &text).unwrap(),
            b"Bildschirm freigeben"
        );
    }

    #[test]
    fn ohne_schluessel_nach_richtlinie() {
        let hm = Arc::new(HandshakeManager::neu(ClientId::from("r"), Duration::from_secs(5)));
        let peer = ClientId::from("unbekannt");

        let streng = PeerCrypto::neu(Arc::clone(&hm), EncryptionPolicy::RequireEncryption);
        assert!(matches!(
            streng.versiegeln(&peer, b"x"),
            Err(PeerError::KryptoNichtVerfuegbar(_))
        ));

        let locker = PeerCrypto::neu(hm, EncryptionPolicy::AllowFallback);
        assert_eq!(
            locker.versiegeln(&peer, b"x").unwrap(),
            Versiegelt::Klartext(b"x".to_vec())
        );
    }

    #[test]
    fn manipulierte_nachricht_scheitert() {
        let (r, a) = paar(EncryptionPolicy::RequireEncryption);
        let text = match r.versiegeln(&ClientId::from("a"), b"geheim").unwrap() {
            Versiegelt::Verschluesselt(t) => t,
            andere => panic!("Verschluesselung erwartet: {:?}", andere),
        };
        let mut bytes = BASE64.decode(text).unwrap();
        bytes[20] ^= 0x01;
        let ergebnis = a.oeffnen(&ClientId::from("r"), &BASE64.encode(bytes));
        assert!(matches!(ergebnis, Err(PeerError::Krypto(_))));

        // Folgende Nachrichten sind nicht betroffen
        let text = match r.versiegeln(&ClientId::from("a"), b"weiter").unwrap() {
            Versiegelt::Verschluesselt(t) => t,
            andere => panic!("Verschluesselung erwartet: {:?}", andere),
        };
        assert_eq!(a.oeffnen(&ClientId::from("r"), &text).unwrap(), b"weiter");
    }
}
