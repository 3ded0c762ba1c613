//! Sub-protocol adapters.
//!
//! Each provisioning scheme on the air is wrapped in an adapter implementing
//! [`SubProtocol`]. The session builds one registry per run, in fixed
//! priority order, and the arbitrator fans frames to it: every adapter sees
//! traffic until one syncs, then only the synced one receives.
//!
//! Adapters keep decode failures to themselves. A bad checksum or an
//! impossible length resets the adapter's own state and the session keeps
//! running; only a completed decode or a lock timeout moves the outer state
//! machine.

#[cfg(feature = "proto-airkiss")]
pub mod airkiss;
#[cfg(feature = "proto-broadcast")]
pub mod broadcast;
#[cfg(feature = "proto-joylink")]
pub mod joylink;
#[cfg(feature = "proto-smartconnect")]
pub mod smartconnect;

use crate::credentials::CredentialSink;
use crate::frame::{ClassifiedFrame, FramePool};
use crate::radio::RxFilter;
use crate::stats::SessionStats;
use std::fmt;
use std::sync::Arc;

/// A provisioning scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Address-coded vendor scheme, highest priority.
    SmartConnect,
    /// Length-coded scheme used by messaging-app senders.
    AirKiss,
    /// Payload-coded broadcast scheme.
    Broadcast,
    /// Position-coded multicast scheme for cloud-bound devices.
    JoyLink,
}

impl Protocol {
    /// All protocols in arbitration priority order.
    pub const PRIORITY: [Protocol; 4] = [
        Protocol::SmartConnect,
        Protocol::AirKiss,
        Protocol::Broadcast,
        Protocol::JoyLink,
    ];

    /// The protocol's bit in a [`ProtocolSet`].
    pub const fn bit(self) -> u8 {
        match self {
            Protocol::SmartConnect => 1 << 0,
            Protocol::AirKiss => 1 << 1,
            Protocol::Broadcast => 1 << 2,
            Protocol::JoyLink => 1 << 3,
        }
    }

    /// Short name for logs.
    pub const fn name(self) -> &'static str {
        match self {
            Protocol::SmartConnect => "smartconnect",
            Protocol::AirKiss => "airkiss",
            Protocol::Broadcast => "broadcast",
            Protocol::JoyLink => "joylink",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of protocols as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    not(target_os = "espidf"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ProtocolSet(u8);

impl ProtocolSet {
    /// The empty set.
    pub const fn empty() -> Self {
        ProtocolSet(0)
    }

    /// Every protocol this build was compiled with.
    pub const fn compiled() -> Self {
        let mut bits = 0u8;
        #[cfg(feature = "proto-smartconnect")]
        {
            bits |= Protocol::SmartConnect.bit();
        }
        #[cfg(feature = "proto-airkiss")]
        {
            bits |= Protocol::AirKiss.bit();
        }
        #[cfg(feature = "proto-broadcast")]
        {
            bits |= Protocol::Broadcast.bit();
        }
        #[cfg(feature = "proto-joylink")]
        {
            bits |= Protocol::JoyLink.bit();
        }
        ProtocolSet(bits)
    }

    /// A set holding one protocol.
    pub const fn only(protocol: Protocol) -> Self {
        ProtocolSet(protocol.bit())
    }

    /// Build from raw bits, keeping defined bits only.
    pub const fn from_bits(bits: u8) -> Self {
        ProtocolSet(bits & 0x0F)
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when `protocol` is in the set.
    pub const fn contains(self, protocol: Protocol) -> bool {
        self.0 & protocol.bit() != 0
    }

    /// Add a protocol.
    #[must_use]
    pub const fn with(self, protocol: Protocol) -> Self {
        ProtocolSet(self.0 | protocol.bit())
    }

    /// Set intersection.
    pub const fn intersection(self, other: ProtocolSet) -> Self {
        ProtocolSet(self.0 & other.0)
    }

    /// True when no protocol is in the set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Protocols in the set, in priority order.
    pub fn iter(self) -> impl Iterator<Item = Protocol> {
        Protocol::PRIORITY
            .into_iter()
            .filter(move |p| self.contains(*p))
    }
}

impl fmt::Display for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for protocol in self.iter() {
            if !first {
                f.write_str("+")?;
            }
            f.write_str(protocol.name())?;
            first = false;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

/// Where a sub-protocol stands in its own decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the returned state drives channel locking and completion"]
pub enum AdapterState {
    /// Listening, nothing recognized yet.
    Init,
    /// The scheme's preamble was recognized on the current channel.
    Synced,
    /// Credentials were fully decoded and offered to the sink.
    Finished,
}

/// Returned by an adapter that must keep the radio on the current channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopVeto {
    /// The protocol refusing the hop.
    pub protocol: Protocol,
}

impl fmt::Display for HopVeto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} refused the channel hop", self.protocol)
    }
}

/// Errors from adapter setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// A supplied decryption key is unusable.
    InvalidKey(&'static str),
    /// A per-adapter resource could not be acquired.
    Resource(&'static str),
}

impl fmt::Display for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey(msg) => write!(f, "invalid protocol key: {}", msg),
            Self::Resource(what) => write!(f, "protocol resource unavailable: {}", what),
        }
    }
}

impl std::error::Error for ProtoError {}

/// One provisioning scheme plugged into the session.
pub trait SubProtocol: Send {
    /// Which scheme this adapter decodes.
    fn protocol(&self) -> Protocol;

    /// Prepare for a session with the optional shared secret.
    fn init(&mut self, key: Option<&[u8]>) -> Result<(), ProtoError>;

    /// Release per-session resources. Called once at session end.
    fn cleanup(&mut self);

    /// The radio is about to hop. `Err` vetoes the hop; `Ok` means any
    /// channel-local partial state was discarded.
    fn reset_channel(&mut self) -> Result<(), HopVeto>;

    /// Feed one classified frame. The returned state is the adapter's state
    /// after consuming it.
    fn receive(&mut self, frame: &ClassifiedFrame<'_>, sink: &mut CredentialSink) -> AdapterState;

    /// The channel lock expired; drop all progress and return to listening.
    fn rx_timeout(&mut self);

    /// Current decode state.
    fn state(&self) -> AdapterState;
}

/// Build the adapter registry for the requested set, in priority order.
///
/// The set must already be intersected with [`ProtocolSet::compiled`];
/// requesting a protocol this build lacks simply yields no adapter.
pub fn build_registry(
    requested: ProtocolSet,
    pool: &FramePool,
    stats: &Arc<SessionStats>,
) -> Vec<Box<dyn SubProtocol>> {
    // Unused on builds compiled without the pool- and stats-consuming schemes
    let _ = (pool, stats);
    let mut registry: Vec<Box<dyn SubProtocol>> = Vec::new();
    for protocol in requested.iter() {
        match protocol {
            #[cfg(feature = "proto-smartconnect")]
            Protocol::SmartConnect => {
                registry.push(Box::new(smartconnect::SmartConnect::new(
                    pool.clone(),
                    stats.clone(),
                )));
            }
            #[cfg(feature = "proto-airkiss")]
            Protocol::AirKiss => {
                registry.push(Box::new(airkiss::AirKiss::new(stats.clone())));
            }
            #[cfg(feature = "proto-broadcast")]
            Protocol::Broadcast => {
                registry.push(Box::new(broadcast::Broadcast::new(stats.clone())));
            }
            #[cfg(feature = "proto-joylink")]
            Protocol::JoyLink => {
                registry.push(Box::new(joylink::JoyLink::new(stats.clone())));
            }
            #[allow(unreachable_patterns)]
            _ => {}
        }
    }
    registry
}

/// The promiscuous filter classes the active protocol set needs.
///
/// Broadcast data feeds the length- and payload-coded schemes; multicast
/// data feeds the address- and position-coded ones. With only the
/// position-coded scheme active, broadcast data is not admitted even though
/// its codec gate would accept either class.
pub fn rx_filter_for(active: ProtocolSet) -> RxFilter {
    let mut filter = RxFilter::empty();
    if active.contains(Protocol::AirKiss)
        || active.contains(Protocol::Broadcast)
        || active.contains(Protocol::SmartConnect)
    {
        filter |= RxFilter::DATA_BROADCAST;
    }
    if active.contains(Protocol::SmartConnect) || active.contains(Protocol::JoyLink) {
        filter |= RxFilter::DATA_MULTICAST;
    }
    filter
}
