//! Raw RX descriptor parsing and frame classification.
//!
//! The monitor-mode driver delivers each sniffed frame as a raw descriptor
//! image: a fixed prefix, a variable run of 4-byte status groups, then the
//! 802.11 MAC header and payload at DMA-aligned offsets. This module locates
//! the header and payload inside that image without copying.
//!
//! # Descriptor layout
//!
//! All multi-byte fields are little-endian, offsets from the start:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 2    | total byte count (descriptor + header + payload) |
//! | 2      | 1    | packet type in bits 0-2, duplicate flag in bit 3 |
//! | 3      | 1    | status-group-valid bitmask (bits 0-3) |
//! | 4      | 1    | MAC header length |
//! | 5      | 1    | reserved |
//! | 6      | 4*n  | status groups, 4 bytes each, in bitmask order |
//!
//! The MAC header starts after the status groups, rounded up to a 2-byte
//! boundary. The payload starts after the header, rounded up to a 4-byte
//! boundary. Software-defined frames carry no status groups.
//!
//! # Example
//!
//! ```
//! use smartconfig_rs_esp32::frame::{classify, DescriptorImage, PacketType};
//!
//! let image = DescriptorImage::rx_data(&[0xAA; 24], b"payload").to_bytes();
//! let frame = classify(&image).unwrap();
//! assert_eq!(frame.kind, PacketType::RxData);
//! assert_eq!(frame.payload, b"payload");
//! ```

/// Length of the fixed descriptor prefix before any status groups.
pub const DESCRIPTOR_PREFIX_LEN: usize = 6;

/// Size of one status group.
pub const STATUS_GROUP_LEN: usize = 4;

/// Packet type bits within the type byte.
const TYPE_MASK: u8 = 0x07;

/// Duplicate indication, set by the driver on retransmitted RX data frames.
const DUPLICATE_FLAG: u8 = 0x08;

/// Status-group-valid bits within the bitmask byte.
const GROUP_MASK: u8 = 0x0F;

/// Raw packet type value for received data frames.
const PKT_TYPE_RX_DATA: u8 = 0;

/// Raw packet type value for software-defined (driver-injected) frames.
const PKT_TYPE_SW_DEFINED: u8 = 4;

/// Descriptor packet types the acquisition engine consumes.
///
/// Every other type the driver can produce (TX status, vendor events) is
/// screened out by [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// A data frame received over the air.
    RxData,
    /// A frame injected by driver software, no status groups attached.
    SwDefined,
}

impl PacketType {
    /// Map the raw 3-bit type field to a consumable type.
    fn from_bits(bits: u8) -> Option<Self> {
        match bits & TYPE_MASK {
            PKT_TYPE_RX_DATA => Some(Self::RxData),
            PKT_TYPE_SW_DEFINED => Some(Self::SwDefined),
            _ => None,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::RxData => PKT_TYPE_RX_DATA,
            Self::SwDefined => PKT_TYPE_SW_DEFINED,
        }
    }
}

/// A classified frame borrowing the MAC header and payload from the
/// descriptor image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedFrame<'a> {
    /// Which descriptor type produced this frame.
    pub kind: PacketType,
    /// Driver duplicate indication (RX data only).
    pub duplicate: bool,
    /// The 802.11 MAC header bytes.
    pub header: &'a [u8],
    /// The frame body after the MAC header.
    pub payload: &'a [u8],
}

/// Round `value` up to the next multiple of `align` (power of two).
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Classify a raw descriptor image into header and payload slices.
///
/// Returns `None` for descriptor types the engine does not consume and for
/// images whose length fields are inconsistent with the buffer. Screening
/// here is not an error condition: monitor mode delivers plenty of frames
/// the sub-protocols never look at.
pub fn classify(raw: &[u8]) -> Option<ClassifiedFrame<'_>> {
    if raw.len() < DESCRIPTOR_PREFIX_LEN {
        return None;
    }

    let total = u16::from_le_bytes([raw[0], raw[1]]) as usize;
    let type_byte = raw[2];
    let kind = PacketType::from_bits(type_byte)?;
    let duplicate = kind == PacketType::RxData && type_byte & DUPLICATE_FLAG != 0;
    let header_len = raw[4] as usize;

    // Software-defined frames never carry status groups, whatever the mask says.
    let group_count = match kind {
        PacketType::RxData => (raw[3] & GROUP_MASK).count_ones() as usize,
        PacketType::SwDefined => 0,
    };

    let header_off = align_up(DESCRIPTOR_PREFIX_LEN + group_count * STATUS_GROUP_LEN, 2);
    let header_end = header_off + header_len;
    let payload_off = align_up(header_end, 4);

    if total > raw.len() || header_end > total || payload_off > total {
        return None;
    }

    Some(ClassifiedFrame {
        kind,
        duplicate,
        header: &raw[header_off..header_end],
        payload: &raw[payload_off..total],
    })
}

/// Builder for synthesizing descriptor images.
///
/// The hardware shim uses this to normalize frames from the platform driver
/// into the descriptor format, and the simulated radio uses it to script
/// transmissions. Parsing back goes through [`classify`].
#[derive(Debug, Clone)]
pub struct DescriptorImage {
    kind: PacketType,
    duplicate: bool,
    /// Status group payloads, at most 4 for RX data frames.
    groups: Vec<u32>,
    header: Vec<u8>,
    payload: Vec<u8>,
}

impl DescriptorImage {
    /// Start an RX data image with the given MAC header and payload.
    pub fn rx_data(header: &[u8], payload: &[u8]) -> Self {
        Self {
            kind: PacketType::RxData,
            duplicate: false,
            groups: Vec::new(),
            header: header.to_vec(),
            payload: payload.to_vec(),
        }
    }

    /// Start a software-defined image with the given MAC header and payload.
    pub fn sw_defined(header: &[u8], payload: &[u8]) -> Self {
        Self {
            kind: PacketType::SwDefined,
            duplicate: false,
            groups: Vec::new(),
            header: header.to_vec(),
            payload: payload.to_vec(),
        }
    }

    /// Mark the frame as a driver-flagged duplicate.
    pub fn duplicate(mut self) -> Self {
        self.duplicate = true;
        self
    }

    /// Attach status groups (RX data only, first four are kept).
    pub fn with_groups(mut self, groups: &[u32]) -> Self {
        self.groups = groups.iter().copied().take(4).collect();
        self
    }

    /// Serialize to the raw descriptor byte layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let group_count = match self.kind {
            PacketType::RxData => self.groups.len(),
            PacketType::SwDefined => 0,
        };
        let header_off = align_up(DESCRIPTOR_PREFIX_LEN + group_count * STATUS_GROUP_LEN, 2);
        let header_end = header_off + self.header.len();
        let payload_off = align_up(header_end, 4);
        let total = payload_off + self.payload.len();

        let mut bytes = vec![0u8; total];
        bytes[0..2].copy_from_slice(&(total as u16).to_le_bytes());
        let mut type_byte = self.kind.to_bits();
        if self.duplicate && self.kind == PacketType::RxData {
            type_byte |= DUPLICATE_FLAG;
        }
        bytes[2] = type_byte;
        // Low bits valid first, matching how the driver fills the mask.
        bytes[3] = match self.kind {
            PacketType::RxData => ((1u16 << group_count) - 1) as u8,
            PacketType::SwDefined => 0,
        };
        bytes[4] = self.header.len() as u8;

        for (i, group) in self.groups.iter().enumerate().take(group_count) {
            let off = DESCRIPTOR_PREFIX_LEN + i * STATUS_GROUP_LEN;
            bytes[off..off + STATUS_GROUP_LEN].copy_from_slice(&group.to_le_bytes());
        }
        bytes[header_off..header_end].copy_from_slice(&self.header);
        bytes[payload_off..total].copy_from_slice(&self.payload);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Vec<u8> {
        // 24-byte data frame header, contents irrelevant here
        (0..24).collect()
    }

    #[test]
    fn test_classify_rx_data_basic() {
        let header = sample_header();
        let image = DescriptorImage::rx_data(&header, b"hello world").to_bytes();
        let frame = classify(&image).expect("should classify");
        assert_eq!(frame.kind, PacketType::RxData);
        assert!(!frame.duplicate);
        assert_eq!(frame.header, &header[..]);
        assert_eq!(frame.payload, b"hello world");
    }

    #[test]
    fn test_classify_sw_defined() {
        let header = sample_header();
        let image = DescriptorImage::sw_defined(&header, b"injected").to_bytes();
        let frame = classify(&image).expect("should classify");
        assert_eq!(frame.kind, PacketType::SwDefined);
        assert_eq!(frame.payload, b"injected");
    }

    #[test]
    fn test_classify_rejects_other_types() {
        let header = sample_header();
        let mut image = DescriptorImage::rx_data(&header, b"data").to_bytes();
        // Only types 0 and 4 are consumable
        for bits in [1u8, 2, 3, 5, 6, 7] {
            image[2] = bits;
            assert!(classify(&image).is_none(), "type {} should screen out", bits);
        }
    }

    #[test]
    fn test_classify_duplicate_flag() {
        let header = sample_header();
        let image = DescriptorImage::rx_data(&header, b"again")
            .duplicate()
            .to_bytes();
        let frame = classify(&image).expect("duplicates still classify");
        assert!(frame.duplicate);
        assert_eq!(frame.payload, b"again");
    }

    #[test]
    fn test_classify_with_status_groups() {
        let header = sample_header();
        let image = DescriptorImage::rx_data(&header, b"grouped")
            .with_groups(&[0xAABBCCDD, 0x11223344])
            .to_bytes();
        let frame = classify(&image).expect("should classify");
        assert_eq!(frame.header, &header[..]);
        assert_eq!(frame.payload, b"grouped");
    }

    #[test]
    fn test_classify_all_four_groups() {
        let header = sample_header();
        let image = DescriptorImage::rx_data(&header, b"x")
            .with_groups(&[1, 2, 3, 4])
            .to_bytes();
        let frame = classify(&image).expect("should classify");
        assert_eq!(frame.payload, b"x");
    }

    #[test]
    fn test_payload_offset_alignment() {
        // 23-byte header forces padding before the payload
        let header: Vec<u8> = (0..23).collect();
        let image = DescriptorImage::rx_data(&header, b"abc").to_bytes();
        let frame = classify(&image).expect("should classify");
        assert_eq!(frame.header.len(), 23);
        assert_eq!(frame.payload, b"abc");
        // Header starts at 6 (no groups), ends at 29, payload aligns to 32
        let total = u16::from_le_bytes([image[0], image[1]]) as usize;
        assert_eq!(total, 32 + 3);
    }

    #[test]
    fn test_classify_empty_payload() {
        let header = sample_header();
        let image = DescriptorImage::rx_data(&header, &[]).to_bytes();
        let frame = classify(&image).expect("should classify");
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_classify_too_short() {
        assert!(classify(&[]).is_none());
        assert!(classify(&[0, 0, 0]).is_none());
    }

    #[test]
    fn test_classify_total_beyond_buffer() {
        let header = sample_header();
        let mut image = DescriptorImage::rx_data(&header, b"data").to_bytes();
        // Claim more bytes than the buffer holds
        let bogus = (image.len() + 8) as u16;
        image[0..2].copy_from_slice(&bogus.to_le_bytes());
        assert!(classify(&image).is_none());
    }

    #[test]
    fn test_classify_header_beyond_total() {
        let header = sample_header();
        let mut image = DescriptorImage::rx_data(&header, &[]).to_bytes();
        // Header length larger than the image can hold
        image[4] = 200;
        assert!(classify(&image).is_none());
    }

    #[test]
    fn test_sw_defined_ignores_group_mask() {
        let header = sample_header();
        let mut image = DescriptorImage::sw_defined(&header, b"body").to_bytes();
        // A stray group mask must not shift the header offset
        image[3] = 0x0F;
        let frame = classify(&image).expect("should classify");
        assert_eq!(frame.header, &header[..]);
        assert_eq!(frame.payload, b"body");
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(4, 4), 4);
        assert_eq!(align_up(5, 2), 6);
        assert_eq!(align_up(6, 2), 6);
    }
}
