//! Wi-Fi SmartConfig credential acquisition engine.
//!
//! Sniffs provisioning transmissions in monitor mode, decodes them through
//! a registry of sub-protocol adapters (SmartConnect, AirKiss, payload
//! broadcast, JoyLink), and hands the recovered network credentials to the
//! caller. A finalizer then locates the network with a directed scan and
//! programs the station driver.
//!
//! The engine core is platform-independent and runs against the simulated
//! radio on a development machine; the `esp32` feature adds the ESP-IDF
//! promiscuous shim and NVS-backed settings.

pub mod channel;
pub mod connect;
pub mod credentials;
pub mod crypto;
pub mod frame;
pub mod proto;
pub mod radio;
pub mod session;
pub mod settings;
pub mod stats;
#[cfg(feature = "esp32")]
pub mod storage;
#[cfg(not(target_os = "espidf"))]
pub mod storage_host;

// Re-export the surface a provisioning app touches
pub use connect::{finalize, FinalizeError};
pub use credentials::{AuthMode, CipherType, SessionCredentials};
pub use proto::{Protocol, ProtocolSet};
pub use session::{Notice, SessionConfig, SmartConfigSession, StartError};
pub use settings::{CloudPlatform, ProvisioningSettings};
