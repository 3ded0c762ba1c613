//! Simulated radio for host builds and tests.
//!
//! `SimRadio` implements [`RadioDriver`](super::RadioDriver) over plain
//! state: injected descriptor images go straight to the installed RX
//! handler, scans pop scripted outcomes, and every security setting is
//! recorded for assertions. The [`script`] module synthesizes complete
//! sub-protocol transmissions so a whole acquisition run can execute on a
//! development machine.
//!
//! The RX filter is recorded but not enforced on injected frames; hardware
//! treats the filter as an offload hint and the classifier screens anyway,
//! so the simulation errs on the side of delivering everything.

use super::{
    ApInfo, Bandwidth, OpMode, RadioDriver, RadioError, RxFilter, RxHandler, ScanOutcome, WpaKey,
};
use crate::credentials::{AuthMode, CipherType};
use std::collections::VecDeque;
use std::time::Duration;

/// Everything the finalizer programmed into the driver, kept for assertions.
#[derive(Debug, Clone, Default)]
pub struct SecurityRecord {
    /// SSID from `set_ssid`.
    pub ssid: Option<Vec<u8>>,
    /// Mode from `set_security`.
    pub auth: Option<AuthMode>,
    /// Cipher from `set_security`.
    pub cipher: Option<CipherType>,
    /// Passphrase from `set_wpa_key`, when given as a passphrase.
    pub wpa_passphrase: Option<Vec<u8>>,
    /// PMK from `set_wpa_key`, when given pre-computed.
    pub wpa_pmk: Option<[u8; 32]>,
    /// WEP keys by index, in programming order.
    pub wep_keys: Vec<(u8, Vec<u8>)>,
    /// Number of `reload_settings` calls.
    pub reloads: u32,
}

/// In-memory radio driver.
pub struct SimRadio {
    channel: u8,
    opmode: OpMode,
    bandwidth: Bandwidth,
    filter: RxFilter,
    handler: Option<RxHandler>,
    scan_script: VecDeque<ScanOutcome>,
    scan_attempts: u32,
    security: SecurityRecord,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRadio {
    /// Create a radio parked on channel 1 in station mode at 40 MHz.
    pub fn new() -> Self {
        Self {
            channel: 1,
            opmode: OpMode::Station,
            bandwidth: Bandwidth::Ht40,
            filter: RxFilter::all(),
            handler: None,
            scan_script: VecDeque::new(),
            scan_attempts: 0,
            security: SecurityRecord::default(),
        }
    }

    /// Deliver a raw descriptor image to the installed RX handler.
    ///
    /// Returns `false` when no handler is installed (the frame is lost,
    /// exactly like air time with the radio not listening).
    pub fn inject(&mut self, descriptor: &[u8]) -> bool {
        match &mut self.handler {
            Some(handler) => {
                handler(descriptor);
                true
            }
            None => false,
        }
    }

    /// True while an RX handler is installed.
    pub fn has_rx_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Queue the outcome of the next `scan_once` call. Unqueued scans
    /// return [`ScanOutcome::NotFound`].
    pub fn push_scan_outcome(&mut self, outcome: ScanOutcome) {
        self.scan_script.push_back(outcome);
    }

    /// Number of `scan_once` calls so far.
    pub fn scan_attempts(&self) -> u32 {
        self.scan_attempts
    }

    /// The recorded security settings.
    pub fn security(&self) -> &SecurityRecord {
        &self.security
    }
}

impl std::fmt::Debug for SimRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimRadio")
            .field("channel", &self.channel)
            .field("opmode", &self.opmode)
            .field("bandwidth", &self.bandwidth)
            .field("filter", &self.filter)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl RadioDriver for SimRadio {
    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        if !(1..=14).contains(&channel) {
            return Err(RadioError::InvalidArg("channel out of range 1-14"));
        }
        self.channel = channel;
        Ok(())
    }

    fn channel(&self) -> u8 {
        self.channel
    }

    fn set_opmode(&mut self, mode: OpMode) -> Result<(), RadioError> {
        self.opmode = mode;
        Ok(())
    }

    fn opmode(&self) -> OpMode {
        self.opmode
    }

    fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<(), RadioError> {
        self.bandwidth = bandwidth;
        Ok(())
    }

    fn bandwidth(&self) -> Bandwidth {
        self.bandwidth
    }

    fn rx_filter(&self) -> RxFilter {
        self.filter
    }

    fn set_rx_filter(&mut self, filter: RxFilter) -> Result<(), RadioError> {
        self.filter = filter;
        Ok(())
    }

    fn set_rx_handler(&mut self, handler: RxHandler) -> Result<(), RadioError> {
        self.handler = Some(handler);
        Ok(())
    }

    fn clear_rx_handler(&mut self) {
        self.handler = None;
    }

    fn scan_once(&mut self, _ssid: &[u8], _timeout: Duration) -> Result<ScanOutcome, RadioError> {
        self.scan_attempts += 1;
        Ok(self.scan_script.pop_front().unwrap_or(ScanOutcome::NotFound))
    }

    fn set_ssid(&mut self, ssid: &[u8]) -> Result<(), RadioError> {
        self.security.ssid = Some(ssid.to_vec());
        Ok(())
    }

    fn set_security(&mut self, auth: AuthMode, cipher: CipherType) -> Result<(), RadioError> {
        self.security.auth = Some(auth);
        self.security.cipher = Some(cipher);
        Ok(())
    }

    fn set_wpa_key(&mut self, key: WpaKey<'_>) -> Result<(), RadioError> {
        match key {
            WpaKey::Passphrase(p) => self.security.wpa_passphrase = Some(p.to_vec()),
            WpaKey::Pmk(pmk) => self.security.wpa_pmk = Some(*pmk),
        }
        Ok(())
    }

    fn set_wep_key(&mut self, index: u8, key: &[u8]) -> Result<(), RadioError> {
        if index > 3 {
            return Err(RadioError::InvalidArg("WEP key index out of range 0-3"));
        }
        self.security.wep_keys.push((index, key.to_vec()));
        Ok(())
    }

    fn reload_settings(&mut self) -> Result<(), RadioError> {
        self.security.reloads += 1;
        Ok(())
    }
}

/// Scripted sub-protocol transmissions.
///
/// Each function returns the descriptor images a real sender would put on
/// the air, in transmission order, ready for [`SimRadio::inject`].
pub mod script {
    use crate::frame::dot11::{build_data_header, BROADCAST_ADDR};
    use crate::frame::DescriptorImage;

    /// BSSID the scripted sender is associated with.
    pub const SENDER_BSSID: [u8; 6] = [0x02, 0xA2, 0xB2, 0xC2, 0xD2, 0xE2];

    /// MAC of the scripted sender station.
    pub const SENDER_STA: [u8; 6] = [0x02, 0x10, 0x20, 0x30, 0x40, 0x50];

    /// Wrap a station-to-AP data frame around the given destination and
    /// payload, as a raw descriptor image.
    fn to_ds_frame(dest: &[u8; 6], payload: &[u8]) -> Vec<u8> {
        let header = build_data_header(true, false, &SENDER_BSSID, &SENDER_STA, dest);
        DescriptorImage::rx_data(&header, payload).to_bytes()
    }

    /// Same transmission as relayed by the AP (from-DS layout).
    fn from_ds_frame(dest: &[u8; 6], payload: &[u8]) -> Vec<u8> {
        let header = build_data_header(false, true, dest, &SENDER_BSSID, &SENDER_STA);
        DescriptorImage::rx_data(&header, payload).to_bytes()
    }

    #[cfg(feature = "proto-airkiss")]
    pub use airkiss::airkiss_session;

    #[cfg(feature = "proto-airkiss")]
    mod airkiss {
        use super::to_ds_frame;
        use crate::crypto;
        use crate::frame::dot11::BROADCAST_ADDR;
        use crate::proto::airkiss::{
            check_byte, FLAG_ENCRYPTED, SEQ_CHUNK_LEN, WORD_CONTENT_BASE, WORD_SEQ_BASE,
        };

        /// One length-coded frame: a broadcast data frame whose payload
        /// length carries the word.
        fn word_frame(base_len: u16, word: u16) -> Vec<u8> {
            let payload = vec![0u8; (base_len + word) as usize];
            to_ds_frame(&BROADCAST_ADDR, &payload)
        }

        fn nibble_word(index: u8, nibble: u8) -> u16 {
            ((index as u16) << 4) | (nibble as u16 & 0xF)
        }

        /// A complete length-coded transmission: guide code, magic and
        /// prefix blocks, then the sequenced content.
        ///
        /// `secret` selects the working key; `None` uses the builtin
        /// default key and sends the passphrase in the clear.
        pub fn airkiss_session(
            ssid: &[u8],
            passphrase: &[u8],
            secret: Option<&[u8]>,
            base_len: u16,
            random: u8,
        ) -> Vec<Vec<u8>> {
            let mut frames = Vec::new();

            // Guide code: four consecutive frames stepping the length by one
            for step in 1..=4u16 {
                frames.push(word_frame(base_len, step));
            }

            // Content stream: passphrase field, random token, SSID
            let encrypted = secret.is_some();
            let mut content = Vec::new();
            if let Some(secret) = secret {
                let key = crypto::derive_key(secret);
                let mut field = passphrase.to_vec();
                field.resize(crypto::padded_len(passphrase.len()), 0);
                // Encrypt in place, block by block
                use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
                let cipher = aes::Aes128::new(GenericArray::from_slice(&key));
                for block in field.chunks_exact_mut(crypto::AES_BLOCK_LEN) {
                    cipher.encrypt_block(GenericArray::from_mut_slice(block));
                }
                content.extend_from_slice(&field);
            } else {
                content.extend_from_slice(passphrase);
            }
            content.push(random);
            content.extend_from_slice(ssid);

            let total = content.len() as u8;
            let flags: u8 = if encrypted { FLAG_ENCRYPTED } else { 0 };

            // Magic block: total length nibbles, flags, xor check nibble
            let n0 = total >> 4;
            let n1 = total & 0xF;
            let n3 = n0 ^ n1 ^ flags;
            for (idx, nibble) in [(0u8, n0), (1, n1), (2, flags), (3, n3)] {
                frames.push(word_frame(base_len, nibble_word(idx, nibble)));
            }

            // Prefix block: passphrase length and its check byte
            let plen = passphrase.len() as u8;
            let check = check_byte(&[plen]);
            for (idx, nibble) in [(4u8, plen >> 4), (5, plen & 0xF), (6, check >> 4), (7, check & 0xF)]
            {
                frames.push(word_frame(base_len, nibble_word(idx, nibble)));
            }

            // Sequence blocks: check word, index word, then content words
            for (index, chunk) in content.chunks(SEQ_CHUNK_LEN).enumerate() {
                let index = index as u8;
                let mut covered = vec![index];
                covered.extend_from_slice(chunk);
                let check = check_byte(&covered);
                frames.push(word_frame(base_len, WORD_SEQ_BASE | (check as u16 & 0x7F)));
                frames.push(word_frame(base_len, WORD_SEQ_BASE | (index as u16 & 0x7F)));
                for &byte in chunk {
                    frames.push(word_frame(base_len, WORD_CONTENT_BASE | byte as u16));
                }
            }

            frames
        }
    }

    #[cfg(feature = "proto-smartconnect")]
    pub use smartconnect::smartconnect_session;

    #[cfg(feature = "proto-smartconnect")]
    mod smartconnect {
        use super::to_ds_frame;
        use crate::proto::smartconnect::{control_check, MCAST_PREFIX};

        /// A complete address-coded transmission: the control frame, then
        /// two content bytes per multicast address.
        pub fn smartconnect_session(ssid: &[u8], passphrase: &[u8]) -> Vec<Vec<u8>> {
            let mut content = Vec::new();
            content.push(ssid.len() as u8);
            content.push(passphrase.len() as u8);
            content.extend_from_slice(ssid);
            content.extend_from_slice(passphrase);
            let crc = crc32fast::hash(&content);
            content.extend_from_slice(&crc.to_le_bytes());

            let total = content.len() as u8;
            let mut frames = Vec::new();

            // Control frame announces the content length
            let dest = [
                MCAST_PREFIX[0],
                MCAST_PREFIX[1],
                MCAST_PREFIX[2],
                0,
                total,
                control_check(total),
            ];
            frames.push(to_ds_frame(&dest, b"smartconnect"));

            for (i, pair) in content.chunks(2).enumerate() {
                let dest = [
                    MCAST_PREFIX[0],
                    MCAST_PREFIX[1],
                    MCAST_PREFIX[2],
                    (i + 1) as u8,
                    pair[0],
                    *pair.get(1).unwrap_or(&0),
                ];
                frames.push(to_ds_frame(&dest, b"smartconnect"));
            }

            frames
        }
    }

    #[cfg(feature = "proto-broadcast")]
    pub use broadcast::broadcast_session;

    #[cfg(feature = "proto-broadcast")]
    mod broadcast {
        use super::to_ds_frame;
        use crate::crypto;
        use crate::frame::dot11::BROADCAST_ADDR;
        use crate::proto::broadcast::{
            CHUNK_LEN, CHUNK_MARKER, MAGIC_AES, MAGIC_CLEAR, PAYLOAD_OFFSET,
        };

        /// A complete payload-coded transmission: the header frame, then
        /// fixed-size content chunks.
        pub fn broadcast_session(
            ssid: &[u8],
            passphrase: &[u8],
            tlv: &[u8],
            secret: Option<&[u8]>,
        ) -> Vec<Vec<u8>> {
            let mut clear = Vec::new();
            clear.extend_from_slice(ssid);
            clear.extend_from_slice(passphrase);
            clear.extend_from_slice(tlv);
            let total = clear.len() as u8;
            let crc = crc32fast::hash(&clear);

            let (magic, stream) = match secret {
                Some(secret) => {
                    let key = crypto::derive_key(secret);
                    let mut stream = clear.clone();
                    stream.resize(crypto::padded_len(clear.len()), 0);
                    use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
                    let cipher = aes::Aes128::new(GenericArray::from_slice(&key));
                    for block in stream.chunks_exact_mut(crypto::AES_BLOCK_LEN) {
                        cipher.encrypt_block(GenericArray::from_mut_slice(block));
                    }
                    (MAGIC_AES, stream)
                }
                None => (MAGIC_CLEAR, clear),
            };

            let mut frames = Vec::new();

            // Header frame at the fixed payload offset
            let mut payload = vec![0u8; PAYLOAD_OFFSET];
            payload.extend_from_slice(&magic.to_le_bytes());
            payload.push(total);
            payload.extend_from_slice(&crc.to_le_bytes());
            payload.push(ssid.len() as u8);
            payload.push(passphrase.len() as u8);
            payload.extend_from_slice(&(tlv.len() as u16).to_le_bytes());
            frames.push(to_ds_frame(&BROADCAST_ADDR, &payload));

            // Content chunks
            for (k, chunk) in stream.chunks(CHUNK_LEN).enumerate() {
                let mut payload = vec![0u8; PAYLOAD_OFFSET];
                payload.push(CHUNK_MARKER | k as u8);
                payload.extend_from_slice(chunk);
                frames.push(to_ds_frame(&BROADCAST_ADDR, &payload));
            }

            frames
        }
    }

    #[cfg(feature = "proto-joylink")]
    pub use joylink::joylink_session;

    #[cfg(feature = "proto-joylink")]
    mod joylink {
        use super::from_ds_frame;
        use crate::crypto;
        use crate::proto::joylink::{JOYLINK_MAGIC, JOYLINK_PREFIX};

        /// A complete position-coded transmission: one multicast address per
        /// stream byte, delivered in the from-DS layout.
        pub fn joylink_session(
            ssid: &[u8],
            passphrase: &[u8],
            secret: Option<&[u8]>,
        ) -> Vec<Vec<u8>> {
            let total = (ssid.len() + passphrase.len()) as u8;
            let mut clear = Vec::new();
            clear.extend_from_slice(&JOYLINK_MAGIC);
            clear.push(total);
            clear.push(ssid.len() as u8);
            clear.extend_from_slice(ssid);
            clear.extend_from_slice(passphrase);
            let crc = crc32fast::hash(&clear);

            let mut stream = clear;
            if let Some(secret) = secret {
                let key = crypto::derive_key(secret);
                let data_start = 4;
                let mut field = stream.split_off(data_start);
                field.resize(crypto::padded_len(total as usize), 0);
                use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
                let cipher = aes::Aes128::new(GenericArray::from_slice(&key));
                for block in field.chunks_exact_mut(crypto::AES_BLOCK_LEN) {
                    cipher.encrypt_block(GenericArray::from_mut_slice(block));
                }
                stream.extend_from_slice(&field);
            }
            stream.extend_from_slice(&crc.to_le_bytes());

            stream
                .iter()
                .enumerate()
                .map(|(pos, &byte)| {
                    let dest = [
                        JOYLINK_PREFIX[0],
                        JOYLINK_PREFIX[1],
                        JOYLINK_PREFIX[2],
                        JOYLINK_PREFIX[3],
                        pos as u8,
                        byte,
                    ];
                    from_ds_frame(&dest, b"joylink")
                })
                .collect()
        }
    }

    /// A beacon descriptor image for the given BSSID and channel.
    pub fn beacon_frame(bssid: &[u8; 6], channel: u8) -> Vec<u8> {
        use crate::frame::dot11::{build_beacon_body, build_beacon_header};
        let header = build_beacon_header(bssid);
        let body = build_beacon_body(channel);
        DescriptorImage::rx_data(&header, &body).to_bytes()
    }

    /// A unicast data frame no sub-protocol reacts to.
    pub fn noise_frame(len: usize) -> Vec<u8> {
        let dest = [0x02, 0x99, 0x88, 0x77, 0x66, 0x55];
        to_ds_frame(&dest, &vec![0xA5u8; len])
    }

    /// A broadcast data frame of the given payload length (ambient chatter
    /// for the length-coded decoder).
    pub fn broadcast_noise_frame(len: usize) -> Vec<u8> {
        to_ds_frame(&BROADCAST_ADDR, &vec![0x5Au8; len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_defaults() {
        let radio = SimRadio::new();
        assert_eq!(radio.channel(), 1);
        assert_eq!(radio.opmode(), OpMode::Station);
        assert_eq!(radio.bandwidth(), Bandwidth::Ht40);
        assert!(!radio.has_rx_handler());
    }

    #[test]
    fn test_channel_bounds() {
        let mut radio = SimRadio::new();
        assert!(radio.set_channel(14).is_ok());
        assert!(matches!(
            radio.set_channel(0),
            Err(RadioError::InvalidArg(_))
        ));
        assert!(matches!(
            radio.set_channel(15),
            Err(RadioError::InvalidArg(_))
        ));
        assert_eq!(radio.channel(), 14);
    }

    #[test]
    fn test_inject_without_handler_is_lost() {
        let mut radio = SimRadio::new();
        assert!(!radio.inject(b"frame"));
    }

    #[test]
    fn test_inject_reaches_handler() {
        let mut radio = SimRadio::new();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        radio
            .set_rx_handler(Box::new(move |raw| {
                assert_eq!(raw, b"frame");
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(radio.inject(b"frame"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        radio.clear_rx_handler();
        assert!(!radio.inject(b"frame"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scan_script() {
        let mut radio = SimRadio::new();
        let ap = ApInfo {
            bssid: [1, 2, 3, 4, 5, 6],
            channel: 6,
            auth: AuthMode::Wpa2Psk,
            cipher: CipherType::Ccmp,
        };
        radio.push_scan_outcome(ScanOutcome::NotFound);
        radio.push_scan_outcome(ScanOutcome::Found(ap.clone()));

        assert_eq!(
            radio.scan_once(b"net", Duration::from_secs(1)).unwrap(),
            ScanOutcome::NotFound
        );
        assert_eq!(
            radio.scan_once(b"net", Duration::from_secs(1)).unwrap(),
            ScanOutcome::Found(ap)
        );
        // Script exhausted
        assert_eq!(
            radio.scan_once(b"net", Duration::from_secs(1)).unwrap(),
            ScanOutcome::NotFound
        );
        assert_eq!(radio.scan_attempts(), 3);
    }

    #[test]
    fn test_security_recording() {
        let mut radio = SimRadio::new();
        radio.set_ssid(b"MyNet").unwrap();
        radio
            .set_security(AuthMode::Wpa2Psk, CipherType::Ccmp)
            .unwrap();
        radio.set_wpa_key(WpaKey::Passphrase(b"password")).unwrap();
        radio.set_wep_key(0, &[1, 2, 3, 4, 5]).unwrap();
        radio.reload_settings().unwrap();

        let sec = radio.security();
        assert_eq!(sec.ssid.as_deref(), Some(&b"MyNet"[..]));
        assert_eq!(sec.auth, Some(AuthMode::Wpa2Psk));
        assert_eq!(sec.wpa_passphrase.as_deref(), Some(&b"password"[..]));
        assert_eq!(sec.wep_keys, vec![(0u8, vec![1, 2, 3, 4, 5])]);
        assert_eq!(sec.reloads, 1);
    }

    #[test]
    fn test_wep_key_index_bounds() {
        let mut radio = SimRadio::new();
        assert!(matches!(
            radio.set_wep_key(4, &[0; 5]),
            Err(RadioError::InvalidArg(_))
        ));
    }
}
