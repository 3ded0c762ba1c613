//! Settings persistence for host (development) builds.
//!
//! Keeps [`ProvisioningSettings`] in a JSON file so host runs of the
//! provisioner behave like a device with NVS. Uses
//! `~/.smartconfig-rs-esp32/settings.json` by default.

use crate::settings::ProvisioningSettings;
use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Get the default settings file path.
///
/// Returns `~/.smartconfig-rs-esp32/settings.json`
pub fn default_settings_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home)
        .join(".smartconfig-rs-esp32")
        .join("settings.json"))
}

/// Load settings from a specific path.
///
/// Returns `None` if no settings file exists or if the data is corrupted.
pub fn load_settings_from(path: &Path) -> Option<ProvisioningSettings> {
    let json = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("No settings file found at {:?}", path);
            return None;
        }
        Err(e) => {
            log::warn!("Failed to read settings file: {}", e);
            return None;
        }
    };

    match serde_json::from_str(&json) {
        Ok(settings) => Some(settings),
        Err(e) => {
            log::error!("Failed to parse stored settings: {}", e);
            None
        }
    }
}

/// Load settings from the default path.
pub fn load_settings() -> Option<ProvisioningSettings> {
    let path = default_settings_path().ok()?;
    load_settings_from(&path)
}

/// Save settings to a specific path.
pub fn save_settings_to(settings: &ProvisioningSettings, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, &json)?;

    info!("Settings saved to {:?}", path);
    Ok(())
}

/// Save settings to the default path.
pub fn save_settings(settings: &ProvisioningSettings) -> io::Result<()> {
    let path = default_settings_path()?;
    save_settings_to(settings, &path)
}

/// Load existing settings from path or persist and return the defaults.
pub fn load_or_default_at(path: &Path) -> io::Result<ProvisioningSettings> {
    if let Some(settings) = load_settings_from(path) {
        info!("Loaded settings from {:?}", path);
        return Ok(settings);
    }

    info!("Writing default settings");
    let settings = ProvisioningSettings::default();
    save_settings_to(&settings, path)?;
    Ok(settings)
}

/// Load settings or persist the defaults, using the default path.
pub fn load_or_default() -> io::Result<ProvisioningSettings> {
    let path = default_settings_path()?;
    load_or_default_at(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Protocol, ProtocolSet};
    use crate::settings::CloudPlatform;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test files even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_settings_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("smartconfig-test-{}-{}.json", pid, id))
    }

    #[test]
    fn test_settings_roundtrip() {
        let path = unique_settings_path();

        let settings = ProvisioningSettings {
            protocols: ProtocolSet::only(Protocol::AirKiss),
            auto_start: false,
            cloud: CloudPlatform::WechatIot,
        };
        save_settings_to(&settings, &path).expect("Failed to save");

        let loaded = load_settings_from(&path).expect("Failed to load");
        assert_eq!(loaded, settings);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_or_default() {
        let path = unique_settings_path();

        // First call persists the defaults
        let first = load_or_default_at(&path).expect("Failed to create");
        assert_eq!(first, ProvisioningSettings::default());

        // Second call loads the stored record
        let second = load_or_default_at(&path).expect("Failed to load");
        assert_eq!(first, second);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupted_file_yields_none() {
        let path = unique_settings_path();
        fs::write(&path, b"not json at all").expect("Failed to write");
        assert!(load_settings_from(&path).is_none());
        let _ = fs::remove_file(&path);
    }
}
