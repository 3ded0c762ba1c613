//! AP discovery and connect finalization.
//!
//! Runs after a session has collected credentials and released the radio.
//! The target network is located with a short directed scan, retried a few
//! times because the radio has just left monitor mode and the first scan
//! window regularly misses the beacon. The scanned advertisement, not the
//! sender's claim, decides the security mode that gets programmed.
//!
//! WEP deserves a note: provisioning apps send WEP keys as text, so a
//! 10 or 26 digit hex string is decoded to the 40/104-bit key it spells,
//! while 5 and 13 byte passphrases are used verbatim.

use crate::credentials::{AuthMode, CipherType, SessionCredentials};
use crate::radio::{lock_radio, ApInfo, OpMode, RadioDriver, RadioError, ScanOutcome, SharedRadio, WpaKey};
use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Directed scans attempted before giving up on the target SSID.
pub const SCAN_ATTEMPTS: u32 = 5;

/// Per-scan wait for the target network to answer.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors from [`finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeError {
    /// The target SSID never showed up in a scan.
    NotFound { attempts: u32 },
    /// The passphrase cannot serve as a WEP key.
    BadWepKey { len: usize },
    /// The driver failed while scanning or programming.
    Radio(RadioError),
}

impl fmt::Display for FinalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { attempts } => {
                write!(f, "target network not found after {} scan attempts", attempts)
            }
            Self::BadWepKey { len } => write!(
                f,
                "WEP passphrase of {} bytes is not a usable key (want 5 or 13 characters, or 10 or 26 hex digits)",
                len
            ),
            Self::Radio(e) => write!(f, "radio error during connect: {}", e),
        }
    }
}

impl std::error::Error for FinalizeError {}

impl From<RadioError> for FinalizeError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

/// Scan for `ssid`, retrying up to [`SCAN_ATTEMPTS`] times.
pub fn discover(
    radio: &mut dyn RadioDriver,
    ssid: &[u8],
    timeout: Duration,
) -> Result<ApInfo, FinalizeError> {
    for attempt in 1..=SCAN_ATTEMPTS {
        match radio.scan_once(ssid, timeout)? {
            ScanOutcome::Found(ap) => {
                log::info!(
                    "found \"{}\" on channel {} (attempt {}/{})",
                    String::from_utf8_lossy(ssid),
                    ap.channel,
                    attempt,
                    SCAN_ATTEMPTS
                );
                return Ok(ap);
            }
            ScanOutcome::NotFound => {
                log::debug!("scan attempt {}/{} came up empty", attempt, SCAN_ATTEMPTS);
            }
        }
    }
    log::warn!(
        "target \"{}\" not seen in {} scans",
        String::from_utf8_lossy(ssid),
        SCAN_ATTEMPTS
    );
    Err(FinalizeError::NotFound {
        attempts: SCAN_ATTEMPTS,
    })
}

/// Turn a provisioned WEP passphrase into driver key bytes.
///
/// 5 and 13 byte passphrases map straight to WEP40/WEP104; 10 and 26
/// character strings are treated as hex digits and decoded.
fn wep_key_bytes(passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>, FinalizeError> {
    match passphrase.len() {
        5 | 13 => Ok(Zeroizing::new(passphrase.to_vec())),
        10 | 26 => hex::decode(passphrase)
            .map(Zeroizing::new)
            .map_err(|_| FinalizeError::BadWepKey {
                len: passphrase.len(),
            }),
        len => Err(FinalizeError::BadWepKey { len }),
    }
}

fn apply_security(
    radio: &mut dyn RadioDriver,
    ap: &ApInfo,
    creds: &SessionCredentials,
) -> Result<(), FinalizeError> {
    match ap.auth {
        AuthMode::Open => {
            radio.set_security(AuthMode::Open, CipherType::None)?;
        }
        AuthMode::Wep => {
            let key = wep_key_bytes(&creds.passphrase)?;
            let cipher = if key.len() == 5 {
                CipherType::Wep40
            } else {
                CipherType::Wep104
            };
            radio.set_security(AuthMode::Wep, cipher)?;
            radio.set_wep_key(0, &key)?;
        }
        AuthMode::WpaPsk | AuthMode::Wpa2Psk | AuthMode::WpaWpa2Psk => {
            radio.set_security(ap.auth, ap.cipher)?;
            match &creds.pmk {
                Some(pmk) => radio.set_wpa_key(WpaKey::Pmk(pmk))?,
                None => radio.set_wpa_key(WpaKey::Passphrase(&creds.passphrase))?,
            }
        }
    }
    Ok(())
}

/// Locate the provisioned network and start association.
///
/// Returns the scanned AP so the caller can report where it connected.
pub fn finalize(
    radio: &SharedRadio,
    creds: &SessionCredentials,
    scan_timeout: Duration,
) -> Result<ApInfo, FinalizeError> {
    let mut radio = lock_radio(radio);
    radio.set_opmode(OpMode::Station)?;
    let ap = discover(&mut *radio, &creds.ssid, scan_timeout)?;
    radio.set_ssid(&creds.ssid)?;
    apply_security(&mut *radio, &ap, creds)?;
    radio.reload_settings()?;
    log::info!(
        "associating with \"{}\" ({} on channel {})",
        creds.ssid_lossy(),
        match ap.auth {
            AuthMode::Open => "open",
            AuthMode::Wep => "WEP",
            AuthMode::WpaPsk => "WPA-PSK",
            AuthMode::Wpa2Psk => "WPA2-PSK",
            AuthMode::WpaWpa2Psk => "WPA/WPA2-PSK",
        },
        ap.channel
    );
    Ok(ap)
}
