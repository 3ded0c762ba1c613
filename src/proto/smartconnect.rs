//! Address-coded provisioning decoder.
//!
//! The sender puts data where encryption cannot touch it: in the low
//! three bytes of IPv4 multicast destination addresses. Every frame to
//! `01:00:5E:xx:yy:zz` carries an index `xx` and two data bytes `yy zz`.
//!
//! Index 0 is the control frame: `yy` announces the content length and
//! `zz` is a check byte over it. Index `k >= 1` delivers content bytes
//! `2(k-1)` and `2(k-1)+1`. The content is
//! `ssid_len || pwd_len || ssid || passphrase || crc32`, with the CRC in
//! little-endian over everything before it.
//!
//! Unlike the length-coded scheme this one takes no key; integrity comes
//! from the trailing CRC, and any mismatch restarts the decode from
//! scratch. Content bytes are reassembled in place in a buffer borrowed
//! from the session frame pool for the lifetime of the adapter.

use crate::credentials::{CredentialSink, SessionCredentials, MAX_PASSPHRASE_LEN, MAX_SSID_LEN};
use crate::frame::dot11::MacHeader;
use crate::frame::{ClassifiedFrame, FramePool, PooledFrame};
use crate::proto::{AdapterState, HopVeto, ProtoError, Protocol, SubProtocol};
use crate::stats::SessionStats;
use std::sync::Arc;
use zeroize::Zeroize;

/// First three bytes of every carrier multicast address.
pub const MCAST_PREFIX: [u8; 3] = [0x01, 0x00, 0x5E];

/// Check byte the control frame carries next to the announced length.
pub fn control_check(total: u8) -> u8 {
    (crc32fast::hash(&[total]) & 0xFF) as u8
}

/// Smallest well-formed content: two length bytes and the CRC.
const MIN_TOTAL: usize = 6;

/// Largest well-formed content given the credential bounds.
const MAX_TOTAL: usize = 2 + MAX_SSID_LEN + MAX_PASSPHRASE_LEN + 4;

/// Address-coded sub-protocol adapter.
pub struct SmartConnect {
    pool: FramePool,
    stats: Arc<SessionStats>,
    state: AdapterState,
    buffer: Option<PooledFrame>,
    total: Option<usize>,
    seen: u64,
}

impl SmartConnect {
    pub fn new(pool: FramePool, stats: Arc<SessionStats>) -> Self {
        Self {
            pool,
            stats,
            state: AdapterState::Init,
            buffer: None,
            total: None,
            seen: 0,
        }
    }

    /// Restart from nothing; the assembly buffer stays checked out.
    fn reset_decode(&mut self) {
        self.state = AdapterState::Init;
        self.total = None;
        self.seen = 0;
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.buffer_mut().zeroize();
            buffer.set_len(0);
        }
    }

    fn on_control(&mut self, announced: u8, check: u8) {
        if self.total.is_some() {
            return;
        }
        let total = announced as usize;
        if !(MIN_TOTAL..=MAX_TOTAL).contains(&total) || check != control_check(announced) {
            return;
        }
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.set_len(total);
        }
        self.total = Some(total);
        self.state = AdapterState::Synced;
        log::debug!("smartconnect control frame latched, {} content bytes", total);
    }

    fn on_content(&mut self, index: u8, b0: u8, b1: u8, sink: &mut CredentialSink) {
        let Some(total) = self.total else {
            // Content before the control frame; the sender loops, skip it
            return;
        };
        let chunks = (total + 1) / 2;
        let k = index as usize;
        if k == 0 || k > chunks {
            return;
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        let pos = 2 * (k - 1);
        let buf = buffer.buffer_mut();
        buf[pos] = b0;
        if pos + 1 < total {
            buf[pos + 1] = b1;
        }
        self.seen |= 1 << (k - 1);

        let mask = (1u64 << chunks) - 1;
        if self.seen & mask == mask {
            self.try_finish(sink);
        }
    }

    fn try_finish(&mut self, sink: &mut CredentialSink) {
        let Some(total) = self.total else {
            return;
        };
        let Some(buffer) = self.buffer.as_ref() else {
            return;
        };
        let content = &buffer.bytes()[..total];
        let (body, trailer) = content.split_at(total - 4);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(trailer);
        if crc32fast::hash(body) != u32::from_le_bytes(crc_bytes) {
            self.stats.record_crc_failure();
            log::warn!("smartconnect content failed its crc, restarting decode");
            self.reset_decode();
            return;
        }

        let ssid_len = body[0] as usize;
        let pwd_len = body[1] as usize;
        if 2 + ssid_len + pwd_len + 4 != total
            || ssid_len > MAX_SSID_LEN
            || pwd_len > MAX_PASSPHRASE_LEN
        {
            log::warn!("smartconnect announced lengths do not fit the content, restarting decode");
            self.reset_decode();
            return;
        }

        let ssid = &body[2..2 + ssid_len];
        let passphrase = &body[2 + ssid_len..2 + ssid_len + pwd_len];
        let creds = match SessionCredentials::new(ssid, passphrase) {
            Ok(creds) => creds,
            Err(e) => {
                log::warn!("smartconnect decoded unusable credentials: {}", e);
                self.reset_decode();
                return;
            }
        };
        if sink.offer(creds) {
            log::info!("smartconnect decode complete");
            self.state = AdapterState::Finished;
        } else {
            self.reset_decode();
        }
    }
}

impl SubProtocol for SmartConnect {
    fn protocol(&self) -> Protocol {
        Protocol::SmartConnect
    }

    fn init(&mut self, _key: Option<&[u8]>) -> Result<(), ProtoError> {
        if self.buffer.is_none() {
            let buffer = self
                .pool
                .acquire()
                .map_err(|_| ProtoError::Resource("frame pool exhausted"))?;
            self.buffer = Some(buffer);
        }
        self.reset_decode();
        Ok(())
    }

    fn cleanup(&mut self) {
        self.reset_decode();
        // Scrubbed above; hand the buffer back to the pool
        self.buffer = None;
    }

    fn reset_channel(&mut self) -> Result<(), HopVeto> {
        if self.state != AdapterState::Init {
            return Err(HopVeto {
                protocol: Protocol::SmartConnect,
            });
        }
        self.reset_decode();
        Ok(())
    }

    fn receive(&mut self, frame: &ClassifiedFrame<'_>, sink: &mut CredentialSink) -> AdapterState {
        if self.state == AdapterState::Finished || frame.duplicate {
            return self.state;
        }
        let Some(header) = MacHeader::parse(frame.header) else {
            return self.state;
        };
        if !header.is_data() {
            return self.state;
        }
        let Some(dest) = header.destination() else {
            return self.state;
        };
        if dest[..3] != MCAST_PREFIX {
            return self.state;
        }
        match dest[3] {
            0 => self.on_control(dest[4], dest[5]),
            index => self.on_content(index, dest[4], dest[5], sink),
        }
        self.state
    }

    fn rx_timeout(&mut self) {
        log::debug!("smartconnect lock expired, dropping partial decode");
        self.reset_decode();
    }

    fn state(&self) -> AdapterState {
        self.state
    }
}
