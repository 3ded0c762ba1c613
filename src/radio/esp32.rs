//! ESP32 radio driver.
//!
//! Implements [`RadioDriver`] over the ESP-IDF Wi-Fi stack. Driver
//! lifetime, station configuration and scanning go through `esp-idf-svc`;
//! sniffer control uses the raw `esp_wifi_*` promiscuous calls the safe
//! wrapper does not expose. Each sniffed frame is normalized into a
//! descriptor image before the installed handler sees it, so the
//! classifier works from one layout on hardware and in simulation.
//!
//! The promiscuous callback runs on the Wi-Fi driver task. The handler
//! installed there must only copy and enqueue; the session's RX path
//! honors that.

use super::{
    ApInfo, Bandwidth, OpMode, RadioDriver, RadioError, RxFilter, RxHandler, ScanOutcome, WpaKey,
};
use crate::credentials::{AuthMode, CipherType};
use crate::frame::dot11::{self, FrameControl};
use crate::frame::DescriptorImage;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::wifi::{
    AccessPointInfo, AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi,
};
use esp_idf_sys as sys;
use esp_idf_sys::{esp, EspError};
use log::info;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use zeroize::Zeroizing;

/// Trailing frame check sequence counted in `sig_len` but never shown to
/// the decoders.
const FCS_LEN: usize = 4;

/// Sanity bound on sniffed frame length.
const MAX_SNIFF_LEN: usize = 2048;

/// The one promiscuous handler slot. ESP-IDF registers a single C
/// callback process-wide, so the Rust handler lives beside it.
static RX_HANDLER: Mutex<Option<RxHandler>> = Mutex::new(None);

fn rx_handler_slot() -> MutexGuard<'static, Option<RxHandler>> {
    RX_HANDLER.lock().unwrap_or_else(PoisonError::into_inner)
}

impl From<EspError> for RadioError {
    fn from(e: EspError) -> Self {
        RadioError::Driver(e.to_string())
    }
}

/// Station settings accumulated by the finalizer until `reload_settings`.
#[derive(Default)]
struct PendingStation {
    ssid: Vec<u8>,
    auth: AuthMode,
    cipher: CipherType,
    /// WPA passphrase or WEP key bytes, by `auth`.
    key: Zeroizing<Vec<u8>>,
}

/// Promiscuous-capable driver over the ESP-IDF Wi-Fi stack.
pub struct Esp32Radio<'a> {
    wifi: BlockingWifi<EspWifi<'a>>,
    channel: u8,
    opmode: OpMode,
    bandwidth: Bandwidth,
    filter: RxFilter,
    pending: PendingStation,
}

impl<'a> Esp32Radio<'a> {
    /// Bring up the Wi-Fi driver in station mode.
    pub fn new(modem: Modem, sysloop: EspSystemEventLoop) -> Result<Self, EspError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), None)?;
        let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration::default()))?;
        wifi.start()?;

        let mut primary: u8 = 0;
        let mut second: sys::wifi_second_chan_t = sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE;
        esp!(unsafe { sys::esp_wifi_get_channel(&mut primary, &mut second) })?;
        let mut bw: sys::wifi_bandwidth_t = sys::wifi_bandwidth_t_WIFI_BW_HT20;
        esp!(unsafe {
            sys::esp_wifi_get_bandwidth(sys::wifi_interface_t_WIFI_IF_STA, &mut bw)
        })?;

        Ok(Self {
            wifi,
            channel: primary.max(1),
            opmode: OpMode::Station,
            bandwidth: if bw == sys::wifi_bandwidth_t_WIFI_BW_HT40 {
                Bandwidth::Ht40
            } else {
                Bandwidth::Ht20
            },
            filter: RxFilter::all(),
            pending: PendingStation::default(),
        })
    }
}

impl RadioDriver for Esp32Radio<'_> {
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        if !(1..=14).contains(&channel) {
            return Err(RadioError::InvalidArg("channel out of range 1-14"));
        }
        esp!(unsafe {
            sys::esp_wifi_set_channel(channel, sys::wifi_second_chan_t_WIFI_SECOND_CHAN_NONE)
        })?;
        self.channel = channel;
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn set_opmode(&mut self, mode: OpMode) -> Result<(), RadioError> {
        match mode {
            OpMode::Monitor => {
                esp!(unsafe { sys::esp_wifi_set_promiscuous(true) })?;
            }
            OpMode::Station => {
                esp!(unsafe { sys::esp_wifi_set_promiscuous(false) })?;
            }
        }
        self.opmode = mode;
        Ok(())
    }

    fn opmode(&self) -> OpMode {
        self.opmode
    }

    fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), RadioError> {
        let native = match bandwidth {
            Bandwidth::Ht20 => sys::wifi_bandwidth_t_WIFI_BW_HT20,
            Bandwidth::Ht40 => sys::wifi_bandwidth_t_WIFI_BW_HT40,
        };
        esp!(unsafe {
            sys::esp_wifi_set_bandwidth(sys::wifi_interface_t_WIFI_IF_STA, native)
        })?;
        self.bandwidth = bandwidth;
        Ok(())
    }

    fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    fn rx_filter(&self) -> RxFilter {
        self.filter
    }

    /// Program the hardware filter. The chip only distinguishes frame
    /// classes, so any management bit admits all management frames and any
    /// data bit admits all data frames; the classifier and the adapter
    /// gates screen the rest.
    fn set_rx_filter(&mut self, filter: RxFilter) -> Result<(), RadioError> {
        let mut mask: u32 = 0;
        if filter.contains(RxFilter::MGMT_BEACON) || filter.contains(RxFilter::MGMT_PROBE_REQ) {
            mask |= sys::WIFI_PROMIS_FILTER_MASK_MGMT;
        }
        if filter.contains(RxFilter::DATA_BROADCAST)
            || filter.contains(RxFilter::DATA_MULTICAST)
            || filter.contains(RxFilter::DATA_UNICAST_OTHER)
        {
            mask |= sys::WIFI_PROMIS_FILTER_MASK_DATA;
        }
        let native = sys::wifi_promiscuous_filter_t { filter_mask: mask };
        esp!(unsafe { sys::esp_wifi_set_promiscuous_filter(&native) })?;
        self.filter = filter;
        Ok(())
    }

    fn set_rx_handler(&mut self, handler: RxHandler) -> Result<(), RadioError> {
        *rx_handler_slot() = Some(handler);
        esp!(unsafe { sys::esp_wifi_set_promiscuous_rx_cb(Some(promiscuous_rx)) })?;
        Ok(())
    }

    fn clear_rx_handler(&mut self) {
        let _ = esp!(unsafe { sys::esp_wifi_set_promiscuous_rx_cb(None) });
        *rx_handler_slot() = None;
    }

    /// One blocking scan. ESP-IDF runs its own per-channel dwell, so the
    /// timeout argument is not consulted here.
    fn scan_once(&mut self, ssid: &[u8], _timeout: Duration) -> Result<ScanOutcome, RadioError> {
        let found = self.wifi.scan()?;
        for ap in &found {
            if ap.ssid.as_bytes() == ssid {
                return Ok(ScanOutcome::Found(map_access_point(ap)));
            }
        }
        Ok(ScanOutcome::NotFound)
    }

    fn set_ssid(&mut self, ssid: &[u8]) -> Result<(), RadioError> {
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(RadioError::InvalidArg("ssid length out of range 1-32"));
        }
        self.pending.ssid = ssid.to_vec();
        Ok(())
    }

    fn set_security(&mut self, auth: AuthMode, cipher: CipherType) -> Result<(), RadioError> {
        self.pending.auth = auth;
        self.pending.cipher = cipher;
        Ok(())
    }

    fn set_wpa_key(&mut self, key: WpaKey<'_>) -> Result<(), RadioError> {
        match key {
            WpaKey::Passphrase(passphrase) => {
                self.pending.key = Zeroizing::new(passphrase.to_vec());
                Ok(())
            }
            // The IDF station API derives the PMK itself and offers no
            // setter for a precomputed one
            WpaKey::Pmk(_) => Err(RadioError::Unsupported("precomputed pmk")),
        }
    }

    fn set_wep_key(&mut self, index: u8, key: &[u8]) -> Result<(), RadioError> {
        if index != 0 {
            return Err(RadioError::Unsupported("wep key index other than 0"));
        }
        self.pending.key = Zeroizing::new(key.to_vec());
        Ok(())
    }

    fn reload_settings(&mut self) -> Result<(), RadioError> {
        let ssid = core::str::from_utf8(&self.pending.ssid)
            .map_err(|_| RadioError::InvalidArg("ssid is not valid UTF-8"))?;
        let password = core::str::from_utf8(&self.pending.key)
            .map_err(|_| RadioError::InvalidArg("key is not valid UTF-8"))?;

        let config = ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| RadioError::InvalidArg("ssid too long"))?,
            password: password
                .try_into()
                .map_err(|_| RadioError::InvalidArg("key too long"))?,
            auth_method: map_auth_method(self.pending.auth),
            ..Default::default()
        };
        self.wifi.set_configuration(&Configuration::Client(config))?;
        self.wifi.connect()?;
        info!(
            "station association started ({:?}/{:?})",
            self.pending.auth, self.pending.cipher
        );
        Ok(())
    }
}

fn map_auth_method(auth: AuthMode) -> AuthMethod {
    match auth {
        AuthMode::Open => AuthMethod::None,
        AuthMode::Wep => AuthMethod::WEP,
        AuthMode::WpaPsk => AuthMethod::WPA,
        AuthMode::Wpa2Psk => AuthMethod::WPA2Personal,
        AuthMode::WpaWpa2Psk => AuthMethod::WPAWPA2Personal,
    }
}

fn map_access_point(ap: &AccessPointInfo) -> ApInfo {
    let (auth, cipher) = match ap.auth_method {
        None | Some(AuthMethod::None) => (AuthMode::Open, CipherType::None),
        Some(AuthMethod::WEP) => (AuthMode::Wep, CipherType::Wep104),
        Some(AuthMethod::WPA) => (AuthMode::WpaPsk, CipherType::Tkip),
        Some(AuthMethod::WPAWPA2Personal) => (AuthMode::WpaWpa2Psk, CipherType::TkipCcmp),
        // WPA2 and everything newer negotiates CCMP
        Some(_) => (AuthMode::Wpa2Psk, CipherType::Ccmp),
    };
    ApInfo {
        bssid: ap.bssid,
        channel: ap.channel,
        auth,
        cipher,
    }
}

/// C callback registered with `esp_wifi_set_promiscuous_rx_cb`. Runs on
/// the Wi-Fi driver task, not in interrupt context.
unsafe extern "C" fn promiscuous_rx(
    buf: *mut core::ffi::c_void,
    kind: sys::wifi_promiscuous_pkt_type_t,
) {
    if buf.is_null() || kind == sys::wifi_promiscuous_pkt_type_t_WIFI_PKT_MISC {
        return;
    }
    let pkt = &*(buf as *const sys::wifi_promiscuous_pkt_t);
    // sig_len counts the trailing FCS
    let frame_len = (pkt.rx_ctrl.sig_len() as usize).saturating_sub(FCS_LEN);
    if frame_len == 0 || frame_len > MAX_SNIFF_LEN {
        return;
    }
    let frame = core::slice::from_raw_parts(pkt.payload.as_ptr(), frame_len);
    deliver(frame);
}

/// Split a raw 802.11 frame and hand it on as a descriptor image.
fn deliver(frame: &[u8]) {
    if frame.len() < 2 {
        return;
    }
    let fc = FrameControl::from_bits(u16::from_le_bytes([frame[0], frame[1]]));
    let split = dot11::header_len(fc).min(frame.len());
    let image = DescriptorImage::rx_data(&frame[..split], &frame[split..]).to_bytes();
    if let Some(handler) = rx_handler_slot().as_mut() {
        handler(&image);
    }
}
