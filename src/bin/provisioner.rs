//! SmartConfig provisioner binary.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin provisioner` replays a scripted AirKiss
//!   transmission through the simulated radio, so the whole pipeline runs
//!   on a development machine.
//! - **ESP32**: `cargo espflash flash --bin provisioner --features esp32 --release`
//!   sniffs real traffic and associates with the provisioned network.
//!
//! The session owns the radio until credentials arrive or the run is
//! interrupted; the finalizer then scans for the network and starts
//! association.

use log::{error, info};
use smartconfig_rs_esp32::connect;
use smartconfig_rs_esp32::radio::SharedRadio;
use smartconfig_rs_esp32::session::{Notice, SessionConfig, SmartConfigSession};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[cfg(not(feature = "esp32"))]
use log::warn;
#[cfg(not(feature = "esp32"))]
use smartconfig_rs_esp32::credentials::{AuthMode, CipherType};
#[cfg(not(feature = "esp32"))]
use smartconfig_rs_esp32::radio::sim::{script, SimRadio};
#[cfg(not(feature = "esp32"))]
use smartconfig_rs_esp32::radio::{ApInfo, ScanOutcome};
#[cfg(not(feature = "esp32"))]
use smartconfig_rs_esp32::settings::ProvisioningSettings;
#[cfg(not(feature = "esp32"))]
use std::time::Duration;

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    platform_init();
    info!("=== SmartConfig provisioner starting ===");
    run().await;
}

#[cfg(not(feature = "esp32"))]
async fn run() {
    let settings = smartconfig_rs_esp32::storage_host::load_or_default().unwrap_or_else(|e| {
        warn!("settings unavailable ({}), using defaults", e);
        ProvisioningSettings::default()
    });
    info!(
        "protocols: {}, cloud: {}",
        settings.protocols, settings.cloud
    );

    let sim = Arc::new(Mutex::new(SimRadio::new()));
    {
        // The network the scripted sender provisions below
        let mut radio = sim.lock().expect("radio lock");
        radio.push_scan_outcome(ScanOutcome::Found(ApInfo {
            bssid: script::SENDER_BSSID,
            channel: 1,
            auth: AuthMode::Wpa2Psk,
            cipher: CipherType::Ccmp,
        }));
    }
    let shared: SharedRadio = sim.clone();

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let mut session = SmartConfigSession::new(shared.clone());
    let config = SessionConfig {
        protocols: settings.protocols,
        ..SessionConfig::default()
    };
    session
        .start(
            config,
            Some(Box::new(move |notice| {
                let _ = notice_tx.send(notice);
            })),
        )
        .expect("session start failed");

    // Replay a scripted AirKiss transmission into the sniffer, with a
    // beacon partway through so the channel-confirm path runs too
    let feeder = sim.clone();
    tokio::spawn(async move {
        let mut frames = script::airkiss_session(b"DemoNet", b"demo-pass-123", None, 80, 0x5A);
        let beacon_at = frames.len().min(12);
        frames.insert(beacon_at, script::beacon_frame(&script::SENDER_BSSID, 1));
        for frame in &frames {
            feeder.lock().expect("radio lock").inject(frame);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let creds = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping session");
                session.stop();
                session.wait().await;
                return;
            }
            notice = notice_rx.recv() => match notice {
                Some(Notice::ChannelLocked { channel, protocol }) => {
                    info!("locked on channel {} ({})", channel, protocol);
                }
                Some(Notice::InfoCollected(creds)) => break creds,
                None => {
                    session.wait().await;
                    error!("session ended without credentials");
                    return;
                }
            },
        }
    };
    session.wait().await;
    info!("stats: {}", session.stats());

    match connect::finalize(&shared, &creds, connect::DEFAULT_SCAN_TIMEOUT) {
        Ok(ap) => info!(
            "associated with \"{}\" on channel {}",
            creds.ssid_lossy(),
            ap.channel
        ),
        Err(e) => error!("finalize failed: {}", e),
    }
}

#[cfg(feature = "esp32")]
async fn run() {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use smartconfig_rs_esp32::radio::esp32::Esp32Radio;
    use smartconfig_rs_esp32::storage;

    let peripherals = Peripherals::take().expect("peripherals unavailable");
    let sysloop = EspSystemEventLoop::take().expect("event loop unavailable");

    let nvs = storage::init_nvs().expect("NVS init failed");
    let settings = storage::load_settings(&nvs).unwrap_or_default();
    if !settings.auto_start {
        info!("auto-start disabled, provisioning stays idle");
        return;
    }
    info!(
        "protocols: {}, cloud: {}",
        settings.protocols, settings.cloud
    );

    let radio = Esp32Radio::new(peripherals.modem, sysloop).expect("wifi init failed");
    let shared: SharedRadio = Arc::new(Mutex::new(radio));

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let mut session = SmartConfigSession::new(shared.clone());
    let config = SessionConfig {
        protocols: settings.protocols,
        ..SessionConfig::default()
    };
    session
        .start(
            config,
            Some(Box::new(move |notice| {
                let _ = notice_tx.send(notice);
            })),
        )
        .expect("session start failed");

    let creds = loop {
        match notice_rx.recv().await {
            Some(Notice::ChannelLocked { channel, protocol }) => {
                info!("locked on channel {} ({})", channel, protocol);
            }
            Some(Notice::InfoCollected(creds)) => break creds,
            None => {
                session.wait().await;
                error!("session ended without credentials");
                return;
            }
        }
    };
    session.wait().await;
    info!("stats: {}", session.stats());

    match connect::finalize(&shared, &creds, connect::DEFAULT_SCAN_TIMEOUT) {
        Ok(ap) => info!(
            "associated with \"{}\" on channel {}",
            creds.ssid_lossy(),
            ap.channel
        ),
        Err(e) => error!("finalize failed: {}", e),
    }
}
