//! Acquired network credentials.
//!
//! The decode result of a provisioning run: SSID, passphrase, optional
//! pre-computed PMK and a vendor extra blob. All secret material is zeroed
//! when the value drops, and the `Debug` output never includes it.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length (WPA passphrase upper bound).
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Maximum vendor extra blob length (cloud-binding TLVs and the like).
pub const MAX_EXTRA_LEN: usize = 640;

/// Authentication mode of the target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Open network, no key.
    Open,
    /// WEP shared key.
    Wep,
    /// WPA-PSK only.
    WpaPsk,
    /// WPA2-PSK only.
    #[default]
    Wpa2Psk,
    /// Mixed WPA/WPA2-PSK.
    WpaWpa2Psk,
}

/// Pairwise cipher of the target network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherType {
    /// No encryption.
    None,
    /// WEP with a 40-bit key.
    Wep40,
    /// WEP with a 104-bit key.
    Wep104,
    /// TKIP.
    Tkip,
    /// AES-CCMP.
    #[default]
    Ccmp,
    /// Mixed TKIP/CCMP.
    TkipCcmp,
}

/// Credential validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds [`MAX_SSID_LEN`].
    SsidTooLong { len: usize },
    /// Passphrase exceeds [`MAX_PASSPHRASE_LEN`].
    PassphraseTooLong { len: usize },
    /// Extra blob exceeds [`MAX_EXTRA_LEN`].
    ExtraTooLong { len: usize },
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len } => {
                write!(f, "SSID too long: {} bytes (max {})", len, MAX_SSID_LEN)
            }
            Self::PassphraseTooLong { len } => write!(
                f,
                "passphrase too long: {} bytes (max {})",
                len, MAX_PASSPHRASE_LEN
            ),
            Self::ExtraTooLong { len } => write!(
                f,
                "extra blob too long: {} bytes (max {})",
                len, MAX_EXTRA_LEN
            ),
        }
    }
}

impl std::error::Error for CredentialError {}

/// Credentials decoded from a provisioning transmission.
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct SessionCredentials {
    /// Network SSID bytes (1-32).
    pub ssid: Vec<u8>,
    /// Network passphrase bytes (0-64, empty for open networks).
    pub passphrase: Vec<u8>,
    /// Pre-computed pairwise master key, when the sender supplied one.
    pub pmk: Option<[u8; 32]>,
    /// Authentication mode, refined later by AP discovery.
    #[zeroize(skip)]
    pub auth_mode: AuthMode,
    /// Pairwise cipher, refined later by AP discovery.
    #[zeroize(skip)]
    pub cipher: CipherType,
    /// Vendor extra payload (cloud binding data, sender tokens).
    pub extra: Vec<u8>,
}

impl SessionCredentials {
    /// Create credentials from SSID and passphrase bytes, validating bounds.
    ///
    /// The drop impl rules out struct-update construction, so callers build
    /// through this or mutate a [`Default`] value.
    pub fn new(ssid: &[u8], passphrase: &[u8]) -> Result<Self, CredentialError> {
        let mut creds = Self::default();
        creds.ssid = ssid.to_vec();
        creds.passphrase = passphrase.to_vec();
        creds.validate()?;
        Ok(creds)
    }

    /// Validate field bounds.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.ssid.is_empty() {
            return Err(CredentialError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialError::SsidTooLong {
                len: self.ssid.len(),
            });
        }
        if self.passphrase.len() > MAX_PASSPHRASE_LEN {
            return Err(CredentialError::PassphraseTooLong {
                len: self.passphrase.len(),
            });
        }
        if self.extra.len() > MAX_EXTRA_LEN {
            return Err(CredentialError::ExtraTooLong {
                len: self.extra.len(),
            });
        }
        Ok(())
    }

    /// True when no passphrase was provisioned.
    pub fn is_open(&self) -> bool {
        self.passphrase.is_empty()
    }

    /// SSID as text for logging, lossy for non-UTF-8 names.
    pub fn ssid_lossy(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }
}

impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("ssid", &self.ssid_lossy())
            .field("passphrase_len", &self.passphrase.len())
            .field("has_pmk", &self.pmk.is_some())
            .field("auth_mode", &self.auth_mode)
            .field("cipher", &self.cipher)
            .field("extra_len", &self.extra.len())
            .finish()
    }
}

/// Single-slot landing zone the locked sub-protocol fills on completion.
///
/// The session worker owns the sink and hands it to `receive` calls; only
/// the first offered credentials are kept.
#[derive(Debug, Default)]
pub struct CredentialSink {
    slot: Option<SessionCredentials>,
}

impl CredentialSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer decoded credentials. Returns `false` if the slot was already
    /// filled or the credentials fail validation.
    pub fn offer(&mut self, creds: SessionCredentials) -> bool {
        if self.slot.is_some() {
            log::warn!("credential sink already filled, dropping second offer");
            return false;
        }
        if let Err(e) = creds.validate() {
            log::warn!("rejecting decoded credentials: {}", e);
            return false;
        }
        self.slot = Some(creds);
        true
    }

    /// True once credentials have been accepted.
    pub fn is_filled(&self) -> bool {
        self.slot.is_some()
    }

    /// Take the credentials out, leaving the sink empty.
    pub fn take(&mut self) -> Option<SessionCredentials> {
        self.slot.take()
    }

    /// Drop any held credentials (zeroed by the drop impl).
    pub fn reset(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credentials() {
        let creds = SessionCredentials::new(b"TestAP", b"abcdefgh").unwrap();
        assert_eq!(creds.ssid, b"TestAP");
        assert_eq!(creds.passphrase, b"abcdefgh");
        assert!(!creds.is_open());
    }

    #[test]
    fn test_open_network() {
        let creds = SessionCredentials::new(b"OpenNet", b"").unwrap();
        assert!(creds.is_open());
    }

    #[test]
    fn test_empty_ssid_rejected() {
        assert_eq!(
            SessionCredentials::new(b"", b"pass"),
            Err(CredentialError::SsidEmpty)
        );
    }

    #[test]
    fn test_ssid_at_max() {
        let ssid = vec![b'a'; MAX_SSID_LEN];
        assert!(SessionCredentials::new(&ssid, b"").is_ok());
    }

    #[test]
    fn test_ssid_too_long() {
        let ssid = vec![b'a'; MAX_SSID_LEN + 1];
        assert!(matches!(
            SessionCredentials::new(&ssid, b""),
            Err(CredentialError::SsidTooLong { len: 33 })
        ));
    }

    #[test]
    fn test_passphrase_too_long() {
        let pass = vec![b'p'; MAX_PASSPHRASE_LEN + 1];
        assert!(matches!(
            SessionCredentials::new(b"net", &pass),
            Err(CredentialError::PassphraseTooLong { len: 65 })
        ));
    }

    #[test]
    fn test_extra_too_long() {
        let mut creds = SessionCredentials::new(b"net", b"").unwrap();
        creds.extra = vec![0u8; MAX_EXTRA_LEN + 1];
        assert!(matches!(
            creds.validate(),
            Err(CredentialError::ExtraTooLong { .. })
        ));
    }

    #[test]
    fn test_debug_hides_passphrase() {
        let creds = SessionCredentials::new(b"MyNet", b"hunter22").unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("MyNet"));
        assert!(!debug.contains("hunter22"));
    }

    #[test]
    fn test_sink_first_offer_wins() {
        let mut sink = CredentialSink::new();
        assert!(sink.offer(SessionCredentials::new(b"first", b"").unwrap()));
        assert!(!sink.offer(SessionCredentials::new(b"second", b"").unwrap()));
        let creds = sink.take().unwrap();
        assert_eq!(creds.ssid, b"first");
        assert!(!sink.is_filled());
    }

    #[test]
    fn test_sink_rejects_invalid() {
        let mut sink = CredentialSink::new();
        // Default credentials carry an empty SSID
        let bad = SessionCredentials::default();
        assert!(!sink.offer(bad));
        assert!(!sink.is_filled());
    }

    #[test]
    fn test_sink_reset() {
        let mut sink = CredentialSink::new();
        sink.offer(SessionCredentials::new(b"net", b"").unwrap());
        sink.reset();
        assert!(!sink.is_filled());
        assert!(sink.offer(SessionCredentials::new(b"net2", b"").unwrap()));
    }
}
