//! Persisted provisioning settings.
//!
//! A small record deciding how the device behaves before it has
//! credentials: which sub-protocols to listen for, whether acquisition
//! starts on its own at boot, and which cloud ecosystem the decoded extra
//! payload belongs to. The packed form goes to NVS on device; host builds
//! keep it in a JSON file next to the other development state.

use crate::proto::ProtocolSet;
use std::fmt;

/// Version byte leading every packed settings record.
pub const SETTINGS_VERSION: u8 = 1;

/// Packed record length.
pub const SETTINGS_LEN: usize = 4;

const FLAG_AUTO_START: u8 = 1 << 0;

/// Cloud ecosystem the extra payload should be handed to after connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    not(target_os = "espidf"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum CloudPlatform {
    /// No cloud binding, credentials only.
    #[default]
    None,
    /// WeChat IoT: the sender expects the random byte echoed over UDP.
    WechatIot,
    /// JD Smart cloud activation.
    JdSmart,
}

impl CloudPlatform {
    fn to_byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::WechatIot => 1,
            Self::JdSmart => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::None),
            1 => Some(Self::WechatIot),
            2 => Some(Self::JdSmart),
            _ => None,
        }
    }
}

impl fmt::Display for CloudPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::WechatIot => write!(f, "wechat-iot"),
            Self::JdSmart => write!(f, "jd-smart"),
        }
    }
}

/// Settings decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// The record is shorter than [`SETTINGS_LEN`].
    Truncated { len: usize },
    /// The version byte is from a future firmware.
    UnknownVersion(u8),
    /// A field carries bits this firmware does not define.
    InvalidField(&'static str),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(
                f,
                "settings record truncated: {} bytes (want {})",
                len, SETTINGS_LEN
            ),
            Self::UnknownVersion(v) => write!(f, "unknown settings version {}", v),
            Self::InvalidField(field) => write!(f, "invalid settings field: {}", field),
        }
    }
}

impl std::error::Error for SettingsError {}

/// How the device provisions itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    not(target_os = "espidf"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ProvisioningSettings {
    /// Sub-protocols to listen for; intersected with the compiled set at
    /// session start.
    pub protocols: ProtocolSet,
    /// Start acquisition at boot when no credentials are stored.
    pub auto_start: bool,
    /// Where the extra payload goes after connecting.
    pub cloud: CloudPlatform,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            protocols: ProtocolSet::compiled(),
            auto_start: true,
            cloud: CloudPlatform::None,
        }
    }
}

impl ProvisioningSettings {
    /// Serialize for NVS storage.
    ///
    /// Format: `[version:1][protocol bits:1][flags:1][cloud:1]`
    pub fn to_bytes(&self) -> [u8; SETTINGS_LEN] {
        let mut flags = 0;
        if self.auto_start {
            flags |= FLAG_AUTO_START;
        }
        [
            SETTINGS_VERSION,
            self.protocols.bits(),
            flags,
            self.cloud.to_byte(),
        ]
    }

    /// Deserialize a stored record, rejecting anything this firmware
    /// does not understand.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SettingsError> {
        if bytes.len() < SETTINGS_LEN {
            return Err(SettingsError::Truncated { len: bytes.len() });
        }
        if bytes[0] != SETTINGS_VERSION {
            return Err(SettingsError::UnknownVersion(bytes[0]));
        }
        let proto_bits = bytes[1];
        if ProtocolSet::from_bits(proto_bits).bits() != proto_bits {
            return Err(SettingsError::InvalidField("protocol bits"));
        }
        let flags = bytes[2];
        if flags & !FLAG_AUTO_START != 0 {
            return Err(SettingsError::InvalidField("flags"));
        }
        let cloud = CloudPlatform::from_byte(bytes[3])
            .ok_or(SettingsError::InvalidField("cloud platform"))?;
        Ok(Self {
            protocols: ProtocolSet::from_bits(proto_bits),
            auto_start: flags & FLAG_AUTO_START != 0,
            cloud,
        })
    }
}
