//! Payload-coded provisioning decoder.
//!
//! The simplest of the schemes: the sender writes structured blocks
//! directly into broadcast frame payloads at a fixed offset past the LLC
//! framing. A header block announces the transmission, then numbered
//! chunks carry the content stream.
//!
//! Header block layout, after the payload offset:
//!
//! ```text
//! magic: u16 le | total: u8 | crc: u32 le | ssid_len: u8 | pwd_len: u8 | tlv_len: u16 le
//! ```
//!
//! The magic selects cleartext or AES-128-ECB content; the encrypted
//! stream is the cleartext zero-padded to whole blocks. Chunk blocks
//! start with a marker byte `0xC0 | index` followed by up to sixteen
//! stream bytes. The marker range never collides with either magic's
//! low byte.
//!
//! Cleartext is `ssid || passphrase || tlv` with the announced lengths.
//! This scheme fails closed: announced lengths that do not fit the
//! received content yield no credentials at all, never a truncated
//! prefix.

use crate::credentials::{
    CredentialSink, SessionCredentials, MAX_EXTRA_LEN, MAX_PASSPHRASE_LEN, MAX_SSID_LEN,
};
use crate::crypto::{self, WORKING_KEY_LEN};
use crate::frame::dot11::{is_broadcast, MacHeader};
use crate::frame::ClassifiedFrame;
use crate::proto::{AdapterState, HopVeto, ProtoError, Protocol, SubProtocol};
use crate::stats::SessionStats;
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// Stream bytes per chunk block.
pub const CHUNK_LEN: usize = 16;

/// High bits marking a chunk block; the low six bits carry the index.
pub const CHUNK_MARKER: u8 = 0xC0;

/// Header magic for cleartext content.
pub const MAGIC_CLEAR: u16 = 0x35B7;

/// Header magic for AES-encrypted content.
pub const MAGIC_AES: u16 = 0x35B8;

/// Fixed LLC framing skipped at the front of every payload.
pub const PAYLOAD_OFFSET: usize = 9;

/// Header block length past the payload offset.
const HEADER_BLOCK_LEN: usize = 11;

/// Stream buffer bound: a 255-byte content padded to whole AES blocks.
const MAX_STREAM_LEN: usize = 256;

/// Latched header announcement.
struct Announce {
    total: usize,
    crc: u32,
    ssid_len: usize,
    pwd_len: usize,
    tlv_len: usize,
    encrypted: bool,
    stream_len: usize,
}

/// Payload-coded sub-protocol adapter.
pub struct Broadcast {
    stats: Arc<SessionStats>,
    key: Option<Zeroizing<[u8; WORKING_KEY_LEN]>>,
    state: AdapterState,
    announce: Option<Announce>,
    stream: [u8; MAX_STREAM_LEN],
    committed: u32,
    keyless_warned: bool,
}

impl Broadcast {
    pub fn new(stats: Arc<SessionStats>) -> Self {
        Self {
            stats,
            key: None,
            state: AdapterState::Init,
            announce: None,
            stream: [0; MAX_STREAM_LEN],
            committed: 0,
            keyless_warned: false,
        }
    }

    /// Restart from nothing; key configuration survives.
    fn reset_full(&mut self) {
        self.state = AdapterState::Init;
        self.announce = None;
        self.stream.zeroize();
        self.committed = 0;
    }

    fn on_header(&mut self, block: &[u8]) {
        if self.announce.is_some() || block.len() < HEADER_BLOCK_LEN {
            return;
        }
        let magic = u16::from_le_bytes([block[0], block[1]]);
        let encrypted = match magic {
            MAGIC_CLEAR => false,
            MAGIC_AES => true,
            _ => return,
        };
        if encrypted && self.key.is_none() {
            if !self.keyless_warned {
                log::warn!("broadcast sender uses encryption but no key is configured, ignoring it");
                self.keyless_warned = true;
            }
            return;
        }
        let total = block[2] as usize;
        if total == 0 {
            return;
        }
        let stream_len = if encrypted {
            crypto::padded_len(total)
        } else {
            total
        };
        self.announce = Some(Announce {
            total,
            crc: u32::from_le_bytes([block[3], block[4], block[5], block[6]]),
            ssid_len: block[7] as usize,
            pwd_len: block[8] as usize,
            tlv_len: u16::from_le_bytes([block[9], block[10]]) as usize,
            encrypted,
            stream_len,
        });
        self.state = AdapterState::Synced;
        log::debug!(
            "broadcast header latched: {} content bytes, encrypted={}",
            total,
            encrypted
        );
    }

    fn on_chunk(&mut self, block: &[u8], sink: &mut CredentialSink) {
        let Some(announce) = self.announce.as_ref() else {
            return;
        };
        let index = (block[0] & !CHUNK_MARKER) as usize;
        let offset = index * CHUNK_LEN;
        if offset >= announce.stream_len {
            return;
        }
        let expected = (announce.stream_len - offset).min(CHUNK_LEN);
        let data = &block[1..];
        if data.len() < expected {
            return;
        }
        self.stream[offset..offset + expected].copy_from_slice(&data[..expected]);
        self.committed |= 1 << index;

        let chunks = (announce.stream_len + CHUNK_LEN - 1) / CHUNK_LEN;
        let mask = (1u32 << chunks) - 1;
        if self.committed & mask == mask {
            self.try_finish(sink);
        }
    }

    fn try_finish(&mut self, sink: &mut CredentialSink) {
        let Some(announce) = self.announce.as_ref() else {
            return;
        };
        let mut clear = Zeroizing::new(self.stream[..announce.stream_len].to_vec());
        if announce.encrypted {
            let Some(key) = self.key.as_ref() else {
                // Header latching refuses encrypted senders without a key
                self.reset_full();
                return;
            };
            if let Err(e) = crypto::decrypt_ecb(key, &mut clear) {
                log::warn!("broadcast content decrypt failed: {}", e);
                self.reset_full();
                return;
            }
        }
        let total = announce.total;
        if crc32fast::hash(&clear[..total]) != announce.crc {
            self.stats.record_crc_failure();
            log::warn!("broadcast content failed its crc, restarting decode");
            self.reset_full();
            return;
        }

        let (ssid, passphrase, tlv) = split_fields(
            &clear[..total],
            announce.ssid_len,
            announce.pwd_len,
            announce.tlv_len,
        );
        if ssid.is_empty() {
            log::warn!("broadcast announced field lengths are unusable, restarting decode");
            self.reset_full();
            return;
        }

        let mut creds = SessionCredentials::default();
        creds.ssid = ssid;
        creds.passphrase = passphrase;
        creds.extra = tlv;
        if sink.offer(creds) {
            log::info!("broadcast decode complete");
            self.state = AdapterState::Finished;
        } else {
            self.reset_full();
        }
    }
}

/// Split cleartext content into its three announced fields.
///
/// Fails closed: lengths that overrun the content or the credential
/// bounds return all three fields empty, never a partial split.
fn split_fields(
    clear: &[u8],
    ssid_len: usize,
    pwd_len: usize,
    tlv_len: usize,
) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let needed = ssid_len + pwd_len + tlv_len;
    if needed > clear.len()
        || ssid_len > MAX_SSID_LEN
        || pwd_len > MAX_PASSPHRASE_LEN
        || tlv_len > MAX_EXTRA_LEN
    {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    (
        clear[..ssid_len].to_vec(),
        clear[ssid_len..ssid_len + pwd_len].to_vec(),
        clear[ssid_len + pwd_len..needed].to_vec(),
    )
}

impl SubProtocol for Broadcast {
    fn protocol(&self) -> Protocol {
        Protocol::Broadcast
    }

    fn init(&mut self, key: Option<&[u8]>) -> Result<(), ProtoError> {
        self.key = match key {
            Some([]) => return Err(ProtoError::InvalidKey("empty key")),
            Some(secret) => Some(Zeroizing::new(crypto::derive_key(secret))),
            None => None,
        };
        self.keyless_warned = false;
        self.reset_full();
        Ok(())
    }

    fn cleanup(&mut self) {
        self.reset_full();
        self.key = None;
    }

    fn reset_channel(&mut self) -> Result<(), HopVeto> {
        self.reset_full();
        Ok(())
    }

    fn receive(&mut self, frame: &ClassifiedFrame<'_>, sink: &mut CredentialSink) -> AdapterState {
        if self.state == AdapterState::Finished || frame.duplicate {
            return self.state;
        }
        let Some(header) = MacHeader::parse(frame.header) else {
            return self.state;
        };
        if !header.is_data() || !header.destination().is_some_and(is_broadcast) {
            return self.state;
        }
        let Some(block) = frame.payload.get(PAYLOAD_OFFSET..) else {
            return self.state;
        };
        if block.is_empty() {
            return self.state;
        }
        if block[0] & CHUNK_MARKER == CHUNK_MARKER {
            self.on_chunk(block, sink);
        } else {
            self.on_header(block);
        }
        self.state
    }

    fn rx_timeout(&mut self) {
        log::debug!("broadcast lock expired, dropping partial decode");
        self.reset_full();
    }

    fn state(&self) -> AdapterState {
        self.state
    }
}
