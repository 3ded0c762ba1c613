//! Minimal 802.11 MAC header views.
//!
//! The sub-protocols only need frame-control bits, the receiver and BSSID
//! addresses under the two distribution-system layouts, and the DS Parameter
//! Set element of beacons. Everything else about 802.11 stays out of scope.

/// Byte length of a MAC address.
pub const ADDR_LEN: usize = 6;

/// Minimum header length exposing all three address fields.
pub const MIN_HEADER_LEN: usize = 22;

/// Standard header length for data and management frames without QoS.
pub const BASIC_HEADER_LEN: usize = 24;

/// Fixed beacon body length before the tagged elements.
/// Timestamp (8) + beacon interval (2) + capability info (2).
const BEACON_FIXED_LEN: usize = 12;

/// Element id of the DS Parameter Set in a beacon body.
const ELEMENT_DS_PARAMS: u8 = 3;

/// The broadcast address.
pub const BROADCAST_ADDR: [u8; ADDR_LEN] = [0xFF; ADDR_LEN];

/// 802.11 frame types from the frame-control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Management,
    Control,
    Data,
    Extension,
}

/// Decoded frame-control field (first two header bytes, little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    bits: u16,
}

impl FrameControl {
    /// Decode from the raw field value.
    pub fn from_bits(bits: u16) -> Self {
        Self { bits }
    }

    /// Frame type from bits 2-3.
    pub fn frame_type(&self) -> FrameType {
        match (self.bits >> 2) & 0x3 {
            0 => FrameType::Management,
            1 => FrameType::Control,
            2 => FrameType::Data,
            _ => FrameType::Extension,
        }
    }

    /// Frame subtype from bits 4-7.
    pub fn subtype(&self) -> u8 {
        ((self.bits >> 4) & 0xF) as u8
    }

    /// To-DS bit.
    pub fn to_ds(&self) -> bool {
        self.bits & 0x0100 != 0
    }

    /// From-DS bit.
    pub fn from_ds(&self) -> bool {
        self.bits & 0x0200 != 0
    }
}

/// Borrowed view over an 802.11 MAC header.
#[derive(Debug, Clone, Copy)]
pub struct MacHeader<'a> {
    bytes: &'a [u8],
}

impl<'a> MacHeader<'a> {
    /// Wrap header bytes. Returns `None` below [`MIN_HEADER_LEN`], since the
    /// decoders need all three addresses.
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        if bytes.len() < MIN_HEADER_LEN {
            return None;
        }
        Some(Self { bytes })
    }

    /// The frame-control field.
    pub fn frame_control(&self) -> FrameControl {
        FrameControl::from_bits(u16::from_le_bytes([self.bytes[0], self.bytes[1]]))
    }

    /// Address 1 (receiver).
    pub fn addr1(&self) -> &'a [u8] {
        &self.bytes[4..10]
    }

    /// Address 2 (transmitter).
    pub fn addr2(&self) -> &'a [u8] {
        &self.bytes[10..16]
    }

    /// Address 3 (meaning depends on the DS bits).
    pub fn addr3(&self) -> &'a [u8] {
        &self.bytes[16..22]
    }

    /// True for data-type frames.
    pub fn is_data(&self) -> bool {
        self.frame_control().frame_type() == FrameType::Data
    }

    /// True for beacon frames (management subtype 8).
    pub fn is_beacon(&self) -> bool {
        let fc = self.frame_control();
        fc.frame_type() == FrameType::Management && fc.subtype() == 8
    }

    /// The destination address under the DS layout in use.
    ///
    /// Frames headed to the distribution system carry the destination in
    /// address 3; frames leaving it carry the destination in address 1.
    /// Four-address (WDS) frames are not supported and yield `None`.
    pub fn destination(&self) -> Option<&'a [u8]> {
        let fc = self.frame_control();
        match (fc.to_ds(), fc.from_ds()) {
            (false, false) => Some(self.addr1()),
            (false, true) => Some(self.addr1()),
            (true, false) => Some(self.addr3()),
            (true, true) => None,
        }
    }

    /// The BSSID under the DS layout in use, `None` for WDS frames.
    pub fn bssid(&self) -> Option<&'a [u8]> {
        let fc = self.frame_control();
        match (fc.to_ds(), fc.from_ds()) {
            (false, false) => Some(self.addr3()),
            (false, true) => Some(self.addr2()),
            (true, false) => Some(self.addr1()),
            (true, true) => None,
        }
    }

    /// True when the destination is a broadcast or multicast address.
    pub fn is_group_addressed(&self) -> bool {
        match self.destination() {
            Some(dest) => dest[0] & 0x01 != 0,
            None => false,
        }
    }
}

/// True for the all-ones broadcast address.
pub fn is_broadcast(addr: &[u8]) -> bool {
    addr.len() == ADDR_LEN && addr.iter().all(|&b| b == 0xFF)
}

/// True for a multicast (group) address that is not broadcast.
pub fn is_multicast(addr: &[u8]) -> bool {
    addr.len() == ADDR_LEN && addr[0] & 0x01 != 0 && !is_broadcast(addr)
}

/// On-air MAC header length for a frame starting with `fc`.
///
/// Hardware shims use this to split a raw sniffed frame into header and
/// body. Covers the layouts monitor mode delivers to the decoders: 24
/// bytes for management and plain data, a fourth address on WDS data,
/// and the QoS control field on QoS data subtypes.
pub fn header_len(fc: FrameControl) -> usize {
    let mut len = BASIC_HEADER_LEN;
    if fc.frame_type() == FrameType::Data {
        if fc.to_ds() && fc.from_ds() {
            len += ADDR_LEN;
        }
        if fc.subtype() & 0x8 != 0 {
            len += 2;
        }
    }
    len
}

/// Extract the channel from a beacon body's DS Parameter Set element.
///
/// Walks the tagged elements after the fixed beacon fields. Returns `None`
/// when the element is absent or the body is malformed.
pub fn beacon_ds_channel(body: &[u8]) -> Option<u8> {
    let mut rest = body.get(BEACON_FIXED_LEN..)?;
    while rest.len() >= 2 {
        let id = rest[0];
        let len = rest[1] as usize;
        let value = rest.get(2..2 + len)?;
        if id == ELEMENT_DS_PARAMS && len == 1 {
            return Some(value[0]);
        }
        rest = &rest[2 + len..];
    }
    None
}

/// Assemble a 24-byte data-frame header (simulation and tests).
pub fn build_data_header(
    to_ds: bool,
    from_ds: bool,
    addr1: &[u8; ADDR_LEN],
    addr2: &[u8; ADDR_LEN],
    addr3: &[u8; ADDR_LEN],
) -> [u8; BASIC_HEADER_LEN] {
    let mut bits: u16 = 2 << 2; // type = data
    if to_ds {
        bits |= 0x0100;
    }
    if from_ds {
        bits |= 0x0200;
    }
    let mut header = [0u8; BASIC_HEADER_LEN];
    header[0..2].copy_from_slice(&bits.to_le_bytes());
    header[4..10].copy_from_slice(addr1);
    header[10..16].copy_from_slice(addr2);
    header[16..22].copy_from_slice(addr3);
    header
}

/// Assemble a 24-byte beacon header for the given BSSID.
pub fn build_beacon_header(bssid: &[u8; ADDR_LEN]) -> [u8; BASIC_HEADER_LEN] {
    let bits: u16 = 8 << 4; // type = management, subtype = beacon
    let mut header = [0u8; BASIC_HEADER_LEN];
    header[0..2].copy_from_slice(&bits.to_le_bytes());
    header[4..10].copy_from_slice(&BROADCAST_ADDR);
    header[10..16].copy_from_slice(bssid);
    header[16..22].copy_from_slice(bssid);
    header
}

/// Assemble a minimal beacon body advertising the given channel.
pub fn build_beacon_body(channel: u8) -> Vec<u8> {
    let mut body = vec![0u8; BEACON_FIXED_LEN];
    // Zero-length SSID element, then the DS Parameter Set
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(&[ELEMENT_DS_PARAMS, 1, channel]);
    body
}
