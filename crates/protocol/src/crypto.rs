//! Verschluesselungsrichtlinie
//!
//! Legt fest, wie ein Endpunkt reagiert wenn fuer einen Peer kein
//! Sitzungsschluessel vorliegt oder der Handshake gescheitert ist.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EncryptionPolicy
// ---------------------------------------------------------------------------

/// Verhalten bei fehlender Verschluesselung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionPolicy {
    /// Ohne etablierten Schluessel wird nichts gesendet
    RequireEncryption,
    /// Ohne etablierten Schluessel wird im Klartext gesendet (mit Warnung)
    #[default]
    AllowFallback,
}

impl EncryptionPolicy {
    /// Gibt true zurueck wenn Klartext als Rueckfall erlaubt ist
    pub fn erlaubt_klartext(&self) -> bool {
        matches!(self, Self::AllowFallback)
    }
}

impl std::fmt::Display for EncryptionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncryptionPolicy::RequireEncryption => write!(f, "require-encryption"),
            EncryptionPolicy::AllowFallback => write!(f, "allow-fallback"),
        }
    }
}

impl std::str::FromStr for EncryptionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require-encryption" => Ok(Self::RequireEncryption),
            "allow-fallback" => Ok(Self::AllowFallback),
            other => Err(format!("Unbekannte EncryptionPolicy: '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_display_und_parse() {
        assert_eq!(
            EncryptionPolicy::RequireEncryption.to_string(),
            "require-encryption"
        );
        let parsed: EncryptionPolicy = "allow-fallback".parse().unwrap();
        assert_eq!(parsed, EncryptionPolicy::AllowFallback);
        assert!("strict".parse::<EncryptionPolicy>().is_err());
    }

    #[test]
    fn policy_serde_stimmt_mit_display_ueberein() {
        let json = serde_json::to_string(&EncryptionPolicy::RequireEncryption).unwrap();
        assert_eq!(json, "\"require-encryption\"");
    }

    #[test]
    fn nur_fallback_erlaubt_klartext() {
        assert!(EncryptionPolicy::AllowFallback.erlaubt_klartext());
        assert!(!EncryptionPolicy::RequireEncryption.erlaubt_klartext());
    }
}
