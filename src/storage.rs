//! NVS persistence for provisioning settings.
//!
//! Stores the packed [`ProvisioningSettings`] record in the ESP32's
//! Non-Volatile Storage so protocol selection and auto-start survive
//! reboots.

use crate::settings::{ProvisioningSettings, SETTINGS_LEN};
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use esp_idf_sys::EspError;

/// NVS namespace for provisioning state.
const NVS_NAMESPACE: &str = "smartcfg";

/// NVS key for the settings record.
const NVS_KEY: &str = "settings";

/// Read buffer size; the margin absorbs records written by newer
/// firmware, which the version byte then rejects cleanly.
const READ_BUFFER_LEN: usize = SETTINGS_LEN + 4;

/// Open the default NVS partition at the provisioning namespace.
pub fn init_nvs() -> Result<EspNvs<NvsDefault>, EspError> {
    let partition = EspNvsPartition::<NvsDefault>::take()?;
    EspNvs::new(partition, NVS_NAMESPACE, true)
}

/// Load settings from NVS.
///
/// Returns `None` when nothing is stored or the record does not parse.
pub fn load_settings(nvs: &EspNvs<NvsDefault>) -> Option<ProvisioningSettings> {
    let mut buf = [0u8; READ_BUFFER_LEN];
    let bytes = nvs.get_raw(NVS_KEY, &mut buf).ok()??;
    match ProvisioningSettings::from_bytes(bytes) {
        Ok(settings) => Some(settings),
        Err(e) => {
            log::warn!("stored settings unreadable, using defaults: {}", e);
            None
        }
    }
}

/// Save settings to NVS.
pub fn save_settings(
    nvs: &mut EspNvs<NvsDefault>,
    settings: &ProvisioningSettings,
) -> Result<(), EspError> {
    nvs.set_raw(NVS_KEY, &settings.to_bytes())?;
    Ok(())
}

/// Remove stored settings from NVS.
pub fn clear_settings(nvs: &mut EspNvs<NvsDefault>) -> Result<(), EspError> {
    nvs.remove(NVS_KEY)?;
    Ok(())
}
