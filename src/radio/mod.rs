//! Radio driver abstraction.
//!
//! The acquisition engine touches the radio through [`RadioDriver`] only:
//! channel and mode programming, the promiscuous RX filter and handler while
//! sniffing, then scan and association plumbing for the finalizer. The
//! simulated driver in [`sim`] backs host builds and tests; the ESP-IDF shim
//! in [`esp32`] backs hardware builds.

pub mod sim;

#[cfg(feature = "esp32")]
pub mod esp32;

use crate::credentials::{AuthMode, CipherType};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    /// Normal station mode.
    Station,
    /// Promiscuous capture mode.
    Monitor,
}

/// Channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    /// 20 MHz. Sniffing always narrows to this so 40 MHz senders on the
    /// secondary channel cannot be missed.
    Ht20,
    /// 40 MHz.
    Ht40,
}

/// Promiscuous RX filter, a set of frame classes the driver should deliver.
///
/// The filter is a hardware offload hint. Drivers may deliver more than
/// requested; the classifier and the sub-protocol gates screen regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxFilter(u8);

impl RxFilter {
    /// Management beacons.
    pub const MGMT_BEACON: RxFilter = RxFilter(1 << 0);
    /// Management probe requests.
    pub const MGMT_PROBE_REQ: RxFilter = RxFilter(1 << 1);
    /// Broadcast-addressed data frames.
    pub const DATA_BROADCAST: RxFilter = RxFilter(1 << 2);
    /// Multicast-addressed data frames.
    pub const DATA_MULTICAST: RxFilter = RxFilter(1 << 3);
    /// Unicast data frames for other BSSes.
    pub const DATA_UNICAST_OTHER: RxFilter = RxFilter(1 << 4);

    /// The empty filter.
    pub const fn empty() -> Self {
        RxFilter(0)
    }

    /// Every class.
    pub const fn all() -> Self {
        RxFilter(0x1F)
    }

    /// True when every class in `other` is present.
    pub const fn contains(self, other: RxFilter) -> bool {
        self.0 & other.0 == other.0
    }

    /// This filter with the classes in `other` removed.
    pub const fn without(self, other: RxFilter) -> Self {
        RxFilter(self.0 & !other.0)
    }

    /// True when no class is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build from raw bits, ignoring undefined ones.
    pub const fn from_bits(bits: u8) -> Self {
        RxFilter(bits & 0x1F)
    }
}

impl BitOr for RxFilter {
    type Output = RxFilter;
    fn bitor(self, rhs: RxFilter) -> RxFilter {
        RxFilter(self.0 | rhs.0)
    }
}

impl BitOrAssign for RxFilter {
    fn bitor_assign(&mut self, rhs: RxFilter) {
        self.0 |= rhs.0;
    }
}

/// Information about a discovered access point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApInfo {
    /// The AP's BSSID.
    pub bssid: [u8; 6],
    /// Channel the AP beacons on.
    pub channel: u8,
    /// Advertised authentication mode.
    pub auth: AuthMode,
    /// Advertised pairwise cipher.
    pub cipher: CipherType,
}

/// Result of one directed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a scan that found nothing usually warrants a retry or a log line"]
pub enum ScanOutcome {
    /// The target SSID was found.
    Found(ApInfo),
    /// The scan completed without finding the target.
    NotFound,
}

/// A WPA key as the driver accepts it.
#[derive(Clone, Copy)]
pub enum WpaKey<'a> {
    /// Plain passphrase, the driver derives the PMK.
    Passphrase(&'a [u8]),
    /// Pre-computed pairwise master key.
    Pmk(&'a [u8; 32]),
}

impl fmt::Debug for WpaKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(p) => write!(f, "Passphrase({} bytes)", p.len()),
            Self::Pmk(_) => write!(f, "Pmk(32 bytes)"),
        }
    }
}

/// Errors surfaced by radio drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    /// The driver does not support the requested operation.
    Unsupported(&'static str),
    /// Invalid argument for the operation.
    InvalidArg(&'static str),
    /// Underlying driver failure.
    Driver(String),
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(what) => write!(f, "unsupported radio operation: {}", what),
            Self::InvalidArg(what) => write!(f, "invalid radio argument: {}", what),
            Self::Driver(msg) => write!(f, "radio driver error: {}", msg),
        }
    }
}

impl std::error::Error for RadioError {}

/// Handler invoked from driver context with each raw descriptor image.
///
/// The image is only valid for the duration of the call.
pub type RxHandler = Box<dyn FnMut(&[u8]) + Send>;

/// The radio operations the acquisition engine consumes.
pub trait RadioDriver: Send {
    /// Tune to a channel.
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError>;

    /// The currently tuned channel.
    fn channel(&self) -> u8;

    /// Switch operating mode.
    fn set_opmode(&mut self, mode: OpMode) -> Result<(), RadioError>;

    /// The current operating mode.
    fn opmode(&self) -> OpMode;

    /// Set channel bandwidth.
    fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), RadioError>;

    /// The current channel bandwidth.
    fn bandwidth(&self) -> Bandwidth;

    /// The current promiscuous RX filter.
    fn rx_filter(&self) -> RxFilter;

    /// Program the promiscuous RX filter.
    fn set_rx_filter(&mut self, filter: RxFilter) -> Result<(), RadioError>;

    /// Install the promiscuous RX handler.
    fn set_rx_handler(&mut self, handler: RxHandler) -> Result<(), RadioError>;

    /// Remove the promiscuous RX handler.
    fn clear_rx_handler(&mut self);

    /// Run one directed scan for `ssid`, blocking up to `timeout`.
    fn scan_once(&mut self, ssid: &[u8], timeout: Duration) -> Result<ScanOutcome, RadioError>;

    /// Set the SSID to associate with.
    fn set_ssid(&mut self, ssid: &[u8]) -> Result<(), RadioError>;

    /// Set authentication mode and pairwise cipher.
    fn set_security(&mut self, auth: AuthMode, cipher: CipherType) -> Result<(), RadioError>;

    /// Program the WPA key material.
    fn set_wpa_key(&mut self, key: WpaKey<'_>) -> Result<(), RadioError>;

    /// Program a WEP key at the given key index.
    fn set_wep_key(&mut self, index: u8, key: &[u8]) -> Result<(), RadioError>;

    /// Apply pending settings and start association.
    fn reload_settings(&mut self) -> Result<(), RadioError>;
}

/// Shared handle the session and the finalizer both hold.
///
/// The lock is held per driver call; only `scan_once` holds it for long, and
/// that happens after capture has ended.
pub type SharedRadio = Arc<Mutex<dyn RadioDriver>>;

/// Lock a shared radio, recovering from a poisoned lock.
pub fn lock_radio(radio: &SharedRadio) -> std::sync::MutexGuard<'_, dyn RadioDriver + 'static> {
    radio.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_union_and_contains() {
        let f = RxFilter::DATA_BROADCAST | RxFilter::DATA_MULTICAST;
        assert!(f.contains(RxFilter::DATA_BROADCAST));
        assert!(f.contains(RxFilter::DATA_MULTICAST));
        assert!(!f.contains(RxFilter::MGMT_BEACON));
        assert!(f.contains(RxFilter::empty()));
    }

    #[test]
    fn test_filter_without() {
        let f = RxFilter::all().without(RxFilter::MGMT_BEACON);
        assert!(!f.contains(RxFilter::MGMT_BEACON));
        assert!(f.contains(RxFilter::DATA_BROADCAST));
    }

    #[test]
    fn test_filter_empty() {
        assert!(RxFilter::empty().is_empty());
        assert!(!RxFilter::MGMT_BEACON.is_empty());
    }

    #[test]
    fn test_filter_bits_roundtrip() {
        let f = RxFilter::DATA_UNICAST_OTHER | RxFilter::MGMT_PROBE_REQ;
        assert_eq!(RxFilter::from_bits(f.bits()), f);
        // Undefined bits are masked off
        assert_eq!(RxFilter::from_bits(0xFF), RxFilter::all());
    }

    #[test]
    fn test_wpa_key_debug_hides_material() {
        let debug = format!("{:?}", WpaKey::Passphrase(b"secretpw"));
        assert!(!debug.contains("secretpw"));
        assert!(debug.contains("8 bytes"));
    }
}
