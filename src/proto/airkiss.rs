//! Length-coded provisioning decoder.
//!
//! The sender has no link to us, so it encodes data in the one thing a
//! promiscuous receiver can always observe: the length of encrypted
//! broadcast frames. Each frame carries one 9-bit word,
//! `payload_len - base_len`, where `base_len` is the sender's fixed
//! framing overhead.
//!
//! # Word layout
//!
//! * `0x001..=0x004` repeated in a strictly increasing run of four is the
//!   guide code. It both announces a sender on the channel and yields
//!   `base_len` (one less than the first run length).
//! * `0x000..=0x07F` are nibble words: `(index << 4) | nibble`. Indexes
//!   0-3 form the magic block (content length, flags, xor check), 4-7 the
//!   prefix block (passphrase length and its check byte).
//! * `0x080..=0x0FF` are sequence words. The first carries the low seven
//!   bits of a check byte over the upcoming block, the second the block
//!   index.
//! * `0x100..=0x1FF` carry one content byte each, four per block.
//!
//! Content is `passphrase-field || random || ssid`. With the encrypted
//! flag set, the passphrase field is AES-128-ECB under a working key
//! derived from the configured secret (or the builtin default), padded to
//! a whole number of blocks.
//!
//! Blocks failing their check byte are dropped and refilled from the
//! sender's continuous retransmission. Oversize fields are truncated to
//! the credential bounds rather than rejected.

use crate::credentials::{CredentialSink, SessionCredentials, MAX_PASSPHRASE_LEN, MAX_SSID_LEN};
use crate::crypto::{self, WORKING_KEY_LEN};
use crate::frame::dot11::{is_broadcast, MacHeader};
use crate::frame::ClassifiedFrame;
use crate::proto::{AdapterState, HopVeto, ProtoError, Protocol, SubProtocol};
use crate::stats::SessionStats;
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// Builtin shared secret used when the caller configures no key.
///
/// Interoperates with sender apps shipping the same default. Anyone with
/// this source can derive the same working key, so an unkeyed session
/// offers no confidentiality against a listener that knows the protocol.
pub const DEFAULT_SECRET: &[u8] = b"airkiss-default";

/// Magic-block flag bit marking the passphrase field as encrypted.
pub const FLAG_ENCRYPTED: u8 = 0x01;

/// Content bytes per sequence block.
pub const SEQ_CHUNK_LEN: usize = 4;

/// Word bit marking a sequence check or index word.
pub const WORD_SEQ_BASE: u16 = 0x80;

/// Word bit marking a content byte.
pub const WORD_CONTENT_BASE: u16 = 0x100;

/// Largest word a frame length can encode.
const WORD_MAX: u16 = 0x1FF;

/// Consecutive ascending lengths that form the guide code.
const GUIDE_RUN_LEN: u8 = 4;

/// Content length ceiling, fixed by the one-byte length in the magic block.
const MAX_CONTENT_LEN: usize = 255;

/// Check byte used by the prefix block and sequence blocks.
pub fn check_byte(bytes: &[u8]) -> u8 {
    (crc32fast::hash(bytes) & 0xFF) as u8
}

/// A sequence block being filled: check word seen, index word maybe seen,
/// up to four content bytes collected.
struct PendingBlock {
    check: u8,
    index: Option<u8>,
    bytes: [u8; SEQ_CHUNK_LEN],
    filled: usize,
}

/// Length-coded sub-protocol adapter.
pub struct AirKiss {
    stats: Arc<SessionStats>,
    working_key: Zeroizing<[u8; WORKING_KEY_LEN]>,
    state: AdapterState,
    // Guide run tracking, only meaningful before sync
    run_start: u16,
    run_len: u8,
    base_len: u16,
    // Magic block: total content length and flags, latched once valid
    magic_nibbles: [u8; 4],
    magic_seen: u8,
    magic: Option<(u8, u8)>,
    // Prefix block: announced passphrase length, latched once valid
    prefix_nibbles: [u8; 4],
    prefix_seen: u8,
    passphrase_len: Option<u8>,
    // Sequence assembly
    pending: Option<PendingBlock>,
    content: [u8; MAX_CONTENT_LEN],
    committed: u64,
}

impl AirKiss {
    pub fn new(stats: Arc<SessionStats>) -> Self {
        Self {
            stats,
            working_key: Zeroizing::new(crypto::derive_key(DEFAULT_SECRET)),
            state: AdapterState::Init,
            run_start: 0,
            run_len: 0,
            base_len: 0,
            magic_nibbles: [0; 4],
            magic_seen: 0,
            magic: None,
            prefix_nibbles: [0; 4],
            prefix_seen: 0,
            passphrase_len: None,
            pending: None,
            content: [0; MAX_CONTENT_LEN],
            committed: 0,
        }
    }

    /// Drop everything including the channel sync.
    fn reset_full(&mut self) {
        self.state = AdapterState::Init;
        self.run_start = 0;
        self.run_len = 0;
        self.base_len = 0;
        self.restart_decode();
    }

    /// Drop decode progress but keep the guide sync; the sender loops its
    /// transmission, so everything will come around again.
    fn restart_decode(&mut self) {
        self.magic_nibbles = [0; 4];
        self.magic_seen = 0;
        self.magic = None;
        self.prefix_nibbles = [0; 4];
        self.prefix_seen = 0;
        self.passphrase_len = None;
        self.pending = None;
        self.content.zeroize();
        self.committed = 0;
    }

    fn feed_word(&mut self, word: u16, sink: &mut CredentialSink) {
        if word & WORD_CONTENT_BASE != 0 {
            self.on_content_word((word & 0xFF) as u8, sink);
        } else if word & WORD_SEQ_BASE != 0 {
            self.on_seq_word((word & 0x7F) as u8);
        } else {
            self.on_nibble_word((word >> 4) as u8, (word & 0xF) as u8);
        }
    }

    /// Magic and prefix blocks. Each latches at most once per decode; the
    /// sender keeps repeating them (and the guide code, whose words alias
    /// index 0), so later copies are ignored.
    fn on_nibble_word(&mut self, index: u8, nibble: u8) {
        if index < 4 {
            if self.magic.is_some() {
                return;
            }
            self.magic_nibbles[index as usize] = nibble;
            self.magic_seen |= 1 << index;
            if self.magic_seen == 0xF {
                let [n0, n1, flags, check] = self.magic_nibbles;
                let total = (n0 << 4) | n1;
                if check == (n0 ^ n1 ^ flags) && total != 0 {
                    log::debug!(
                        "airkiss magic latched: {} content bytes, flags {:#03x}",
                        total,
                        flags
                    );
                    self.magic = Some((total, flags));
                } else {
                    self.magic_seen = 0;
                }
            }
        } else {
            if self.passphrase_len.is_some() {
                return;
            }
            let slot = (index - 4) as usize;
            self.prefix_nibbles[slot] = nibble;
            self.prefix_seen |= 1 << slot;
            if self.prefix_seen == 0xF {
                let [h, l, ch, cl] = self.prefix_nibbles;
                let plen = (h << 4) | l;
                if ((ch << 4) | cl) == check_byte(&[plen]) {
                    self.passphrase_len = Some(plen);
                } else {
                    self.prefix_seen = 0;
                }
            }
        }
    }

    fn on_seq_word(&mut self, value: u8) {
        // Sequenced content is useless until the magic block gives a total
        if self.magic.is_none() {
            return;
        }
        match self.pending.as_mut() {
            Some(block) if block.index.is_none() => block.index = Some(value),
            _ => {
                self.pending = Some(PendingBlock {
                    check: value,
                    index: None,
                    bytes: [0; SEQ_CHUNK_LEN],
                    filled: 0,
                });
            }
        }
    }

    fn on_content_word(&mut self, byte: u8, sink: &mut CredentialSink) {
        let Some((total, _)) = self.magic else {
            return;
        };
        let Some(mut block) = self.pending.take() else {
            return;
        };
        let Some(index) = block.index else {
            // Content before the index word, wait for the next check word
            return;
        };
        let expected = block_len(total, index);
        if expected == 0 {
            // Index beyond the announced content
            return;
        }
        block.bytes[block.filled] = byte;
        block.filled += 1;
        if block.filled < expected {
            self.pending = Some(block);
            return;
        }

        let mut covered = [0u8; SEQ_CHUNK_LEN + 1];
        covered[0] = index;
        covered[1..=expected].copy_from_slice(&block.bytes[..expected]);
        // The sequence word has room for seven check bits only
        if check_byte(&covered[..=expected]) & 0x7F != block.check {
            self.stats.record_crc_failure();
            log::debug!("airkiss block {} failed its check byte, awaiting resend", index);
            return;
        }

        let offset = index as usize * SEQ_CHUNK_LEN;
        self.content[offset..offset + expected].copy_from_slice(&block.bytes[..expected]);
        self.committed |= 1 << index;
        self.try_finish(sink);
    }

    /// Assemble, decrypt and split the content once every block is in and
    /// both header blocks have latched.
    fn try_finish(&mut self, sink: &mut CredentialSink) {
        let Some((total, flags)) = self.magic else {
            return;
        };
        let Some(plen) = self.passphrase_len else {
            return;
        };
        let blocks = (total as usize + SEQ_CHUNK_LEN - 1) / SEQ_CHUNK_LEN;
        let mask = if blocks >= 64 {
            u64::MAX
        } else {
            (1u64 << blocks) - 1
        };
        if self.committed & mask != mask {
            return;
        }

        let total = total as usize;
        let plen = plen as usize;
        let encrypted = flags & FLAG_ENCRYPTED != 0;
        let field_len = if encrypted {
            crypto::padded_len(plen)
        } else {
            plen
        };
        // One random byte and at least one SSID byte follow the field
        if field_len + 1 >= total {
            log::warn!("airkiss content shorter than its announced passphrase field, restarting");
            self.restart_decode();
            return;
        }

        let mut content = Zeroizing::new(self.content[..total].to_vec());
        if encrypted {
            if let Err(e) = crypto::decrypt_ecb(&self.working_key, &mut content[..field_len]) {
                log::warn!("airkiss passphrase field decrypt failed: {}", e);
                self.restart_decode();
                return;
            }
        }

        let passphrase = &content[..plen.min(field_len).min(MAX_PASSPHRASE_LEN)];
        let random = content[field_len];
        let ssid = &content[field_len + 1..total];
        let ssid = &ssid[..ssid.len().min(MAX_SSID_LEN)];

        let mut creds = SessionCredentials::default();
        creds.ssid = ssid.to_vec();
        creds.passphrase = passphrase.to_vec();
        creds.extra = vec![random];
        if sink.offer(creds) {
            log::info!("airkiss decode complete");
            self.state = AdapterState::Finished;
        } else {
            self.restart_decode();
        }
    }
}

/// Length of sequence block `index` for a content of `total` bytes; zero
/// when the index is out of range.
fn block_len(total: u8, index: u8) -> usize {
    let start = index as usize * SEQ_CHUNK_LEN;
    let total = total as usize;
    if start >= total {
        return 0;
    }
    (total - start).min(SEQ_CHUNK_LEN)
}

impl SubProtocol for AirKiss {
    fn protocol(&self) -> Protocol {
        Protocol::AirKiss
    }

    fn init(&mut self, key: Option<&[u8]>) -> Result<(), ProtoError> {
        let secret = match key {
            Some([]) => return Err(ProtoError::InvalidKey("empty key")),
            Some(secret) => secret,
            None => DEFAULT_SECRET,
        };
        self.working_key = Zeroizing::new(crypto::derive_key(secret));
        self.reset_full();
        Ok(())
    }

    fn cleanup(&mut self) {
        self.reset_full();
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
        let Ok(len) = u16::try_from(frame.payload.len()) else {
            return self.state;
        };

        if self.state == AdapterState::Init {
            if self.run_len > 0 && len == self.run_start + self.run_len as u16 {
                self.run_len += 1;
                if self.run_len >= GUIDE_RUN_LEN {
                    self.base_len = self.run_start.saturating_sub(1);
                    self.state = AdapterState::Synced;
                    log::debug!("airkiss guide code found, base payload length {}", self.base_len);
                }
            } else {
                self.run_start = len;
                self.run_len = 1;
            }
            return self.state;
        }

        if len > self.base_len {
            let word = len - self.base_len;
            if word <= WORD_MAX {
                self.feed_word(word, sink);
            }
        }
        self.state
    }

    fn rx_timeout(&mut self) {
        log::debug!("airkiss lock expired, dropping partial decode");
        self.reset_full();
    }

    fn state(&self) -> AdapterState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::classify;
    use crate::frame::dot11::{build_data_header, BROADCAST_ADDR};
    use crate::frame::DescriptorImage;
    use crate::radio::sim::script;

    fn adapter() -> AirKiss {
        let mut adapter = AirKiss::new(Arc::new(SessionStats::new()));
        adapter.init(None).unwrap();
        adapter
    }

    fn feed(adapter: &mut AirKiss, sink: &mut CredentialSink, frames: &[Vec<u8>]) -> AdapterState {
        let mut state = adapter.state();
        for raw in frames {
            let frame = classify(raw).expect("scripted frame must classify");
            state = adapter.receive(&frame, sink);
        }
        state
    }

    fn word_frame(base: u16, word: u16) -> Vec<u8> {
        let header = build_data_header(
            true,
            false,
            &script::SENDER_BSSID,
            &script::SENDER_STA,
            &BROADCAST_ADDR,
        );
        DescriptorImage::rx_data(&header, &vec![0u8; (base + word) as usize]).to_bytes()
    }

    #[test]
    fn test_clear_transmission_decodes() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let frames = script::airkiss_session(b"TestAP", b"abcdefgh", None, 40, 0x7E);
        let state = feed(&mut adapter, &mut sink, &frames);
        assert_eq!(state, AdapterState::Finished);
        let creds = sink.take().unwrap();
        assert_eq!(creds.ssid, b"TestAP");
        assert_eq!(creds.passphrase, b"abcdefgh");
        assert_eq!(creds.extra, vec![0x7E]);
    }

    #[test]
    fn test_encrypted_transmission_decodes() {
        let mut adapter = AirKiss::new(Arc::new(SessionStats::new()));
        adapter.init(Some(b"sharedsecret")).unwrap();
        let mut sink = CredentialSink::new();
        let frames =
            script::airkiss_session(b"HomeNet", b"correct horse battery", Some(b"sharedsecret"), 64, 0x11);
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Finished);
        let creds = sink.take().unwrap();
        assert_eq!(creds.ssid, b"HomeNet");
        assert_eq!(creds.passphrase, b"correct horse battery");
    }

    #[test]
    fn test_default_key_transmission_decodes() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let frames = script::airkiss_session(b"Cafe", b"espresso", Some(DEFAULT_SECRET), 32, 0x42);
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Finished);
        assert_eq!(sink.take().unwrap().passphrase, b"espresso");
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut adapter = AirKiss::new(Arc::new(SessionStats::new()));
        assert_eq!(
            adapter.init(Some(&[])),
            Err(ProtoError::InvalidKey("empty key"))
        );
    }

    #[test]
    fn test_guide_code_alone_syncs() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let frames: Vec<Vec<u8>> = (1..=4).map(|w| word_frame(40, w)).collect();
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Synced);
        assert!(!sink.is_filled());
    }

    #[test]
    fn test_broken_guide_run_does_not_sync() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let frames = vec![
            word_frame(40, 1),
            word_frame(40, 2),
            script::broadcast_noise_frame(7),
            word_frame(40, 3),
            word_frame(40, 4),
        ];
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Init);
    }

    #[test]
    fn test_duplicate_frames_ignored() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let header = build_data_header(
            true,
            false,
            &script::SENDER_BSSID,
            &script::SENDER_STA,
            &BROADCAST_ADDR,
        );
        let frames: Vec<Vec<u8>> = (1u16..=4)
            .map(|w| {
                DescriptorImage::rx_data(&header, &vec![0u8; (41 + w) as usize])
                    .duplicate()
                    .to_bytes()
            })
            .collect();
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Init);
    }

    #[test]
    fn test_oversize_fields_truncated() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let long_ssid = [b'S'; 40];
        let long_pwd = [b'p'; 70];
        let frames = script::airkiss_session(&long_ssid, &long_pwd, None, 24, 0x00);
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Finished);
        let creds = sink.take().unwrap();
        assert_eq!(creds.ssid, vec![b'S'; MAX_SSID_LEN]);
        assert_eq!(creds.passphrase, vec![b'p'; MAX_PASSPHRASE_LEN]);
    }

    #[test]
    fn test_corrupt_block_recovers_on_retransmission() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let mut frames = script::airkiss_session(b"TestAP", b"pw", None, 40, 0x01);
        // Flip the final content word so the last block fails its check
        let last = frames.len() - 1;
        frames[last] = word_frame(40, WORD_CONTENT_BASE | 0xEE);
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Synced);
        assert!(!sink.is_filled());
        // The sender loops; the clean second pass completes the decode
        let again = script::airkiss_session(b"TestAP", b"pw", None, 40, 0x01);
        assert_eq!(feed(&mut adapter, &mut sink, &again), AdapterState::Finished);
        assert_eq!(sink.take().unwrap().ssid, b"TestAP");
    }

    #[test]
    fn test_unicast_and_oversize_words_ignored() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let mut frames: Vec<Vec<u8>> = (1..=4).map(|w| word_frame(40, w)).collect();
        // Unicast chatter and a length far outside the word range
        frames.push(script::noise_frame(300));
        frames.push(word_frame(40, WORD_MAX + 50));
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Synced);
    }

    #[test]
    fn test_timeout_returns_to_init() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let frames: Vec<Vec<u8>> = (1..=4).map(|w| word_frame(40, w)).collect();
        assert_eq!(feed(&mut adapter, &mut sink, &frames), AdapterState::Synced);
        adapter.rx_timeout();
        assert_eq!(adapter.state(), AdapterState::Init);
    }

    #[test]
    fn test_channel_reset_never_vetoes() {
        let mut adapter = adapter();
        let mut sink = CredentialSink::new();
        let frames: Vec<Vec<u8>> = (1..=4).map(|w| word_frame(40, w)).collect();
        feed(&mut adapter, &mut sink, &frames);
        assert!(adapter.reset_channel().is_ok());
        assert_eq!(adapter.state(), AdapterState::Init);
    }
}
