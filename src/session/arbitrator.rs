//! Phase state machine deciding which sub-protocol owns the channel.
//!
//! The arbitrator never touches the radio. It consumes classified frames,
//! fans them to the adapter registry, and emits [`Effect`]s describing
//! what the session worker should do to the radio and timers. That split
//! keeps every transition synchronous and testable without hardware.
//!
//! # Phases
//!
//! * `Probing`: hopping, every adapter sees every frame in priority
//!   order. The first to sync wins the channel lock.
//! * `ChannelConfirm`: locked, beacon reception widened. A beacon from
//!   the sender's BSSID tells us the AP's true home channel; senders on
//!   an HT40 AP are sometimes heard one channel off.
//! * `ReceivingInfo`: locked on the confirmed channel, only the winning
//!   adapter receives.
//! * `Success`: the winning adapter finished and credentials are in the
//!   sink.
//!
//! A lock carries a one-shot timeout armed when the lock is taken and
//! deliberately not re-armed on the confirm transition. Timer expiry
//! messages carry a generation counter so a timer from a previous lock
//! cannot cancel the current one.

use crate::frame::dot11::{beacon_ds_channel, MacHeader};
use crate::frame::ClassifiedFrame;
use crate::credentials::CredentialSink;
use crate::proto::{AdapterState, Protocol, SubProtocol};

/// Arbitration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probing,
    ChannelConfirm,
    ReceivingInfo,
    Success,
}

/// Side effect for the session worker to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Stop the channel scheduler on the current channel.
    LockChannel,
    /// Re-enable scheduler hopping after a lost lock.
    ResumeHopping,
    /// Admit beacons alongside the protocol data classes.
    WidenFilterForBeacons,
    /// Back to the data-only filter for the active protocol set.
    RestoreDataFilter,
    /// Move the radio to the sender AP's home channel.
    Retune { channel: u8 },
    /// Start the one-shot lock timeout for this lock generation.
    ArmLockTimeout { generation: u32 },
    /// Tell the caller which protocol took the lock.
    NotifyLocked { protocol: Protocol },
    /// Credentials are in the sink; the session is done receiving.
    Complete,
}

/// Protocol arbitration state machine.
pub struct Arbitrator {
    phase: Phase,
    locked: Option<usize>,
    bssid: Option<[u8; 6]>,
    timeout_generation: u32,
}

impl Default for Arbitrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbitrator {
    pub fn new() -> Self {
        Self {
            phase: Phase::Probing,
            locked: None,
            bssid: None,
            timeout_generation: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Registry index of the adapter holding the lock.
    pub fn locked_index(&self) -> Option<usize> {
        self.locked
    }

    /// Feed one classified frame through the current phase.
    pub fn on_frame(
        &mut self,
        frame: &ClassifiedFrame<'_>,
        registry: &mut [Box<dyn SubProtocol>],
        sink: &mut CredentialSink,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.phase {
            Phase::Probing => self.probe(frame, registry, sink, &mut effects),
            Phase::ChannelConfirm => {
                if let Some(channel) = self.match_beacon(frame) {
                    log::debug!("sender AP beacon confirms channel {}", channel);
                    effects.push(Effect::Retune { channel });
                    effects.push(Effect::RestoreDataFilter);
                    self.phase = Phase::ReceivingInfo;
                } else {
                    // Data keeps flowing to the winner while we wait
                    self.feed_locked(frame, registry, sink, &mut effects);
                }
            }
            Phase::ReceivingInfo => self.feed_locked(frame, registry, sink, &mut effects),
            Phase::Success => {}
        }
        effects
    }

    /// The lock timeout fired. Stale generations and timeouts racing a
    /// finished session are ignored.
    pub fn on_lock_timeout(
        &mut self,
        generation: u32,
        registry: &mut [Box<dyn SubProtocol>],
    ) -> Vec<Effect> {
        if generation != self.timeout_generation
            || matches!(self.phase, Phase::Probing | Phase::Success)
        {
            return Vec::new();
        }
        if let Some(index) = self.locked.take() {
            log::info!(
                "channel lock expired before {} finished, resuming probe",
                registry[index].protocol()
            );
            registry[index].rx_timeout();
        }
        self.bssid = None;
        self.phase = Phase::Probing;
        vec![Effect::RestoreDataFilter, Effect::ResumeHopping]
    }

    fn probe(
        &mut self,
        frame: &ClassifiedFrame<'_>,
        registry: &mut [Box<dyn SubProtocol>],
        sink: &mut CredentialSink,
        effects: &mut Vec<Effect>,
    ) {
        let mut hit = None;
        for (index, adapter) in registry.iter_mut().enumerate() {
            match adapter.receive(frame, sink) {
                AdapterState::Init => {}
                state => {
                    hit = Some((index, state, adapter.protocol()));
                    break;
                }
            }
        }
        let Some((index, state, protocol)) = hit else {
            return;
        };

        self.locked = Some(index);
        self.timeout_generation = self.timeout_generation.wrapping_add(1);
        effects.push(Effect::LockChannel);
        effects.push(Effect::NotifyLocked { protocol });

        if state == AdapterState::Finished {
            // Synced and decoded in a single frame
            self.phase = Phase::Success;
            effects.push(Effect::Complete);
            return;
        }

        effects.push(Effect::ArmLockTimeout {
            generation: self.timeout_generation,
        });
        self.bssid = frame_bssid(frame);
        if self.bssid.is_some() {
            self.phase = Phase::ChannelConfirm;
            effects.push(Effect::WidenFilterForBeacons);
        } else {
            self.phase = Phase::ReceivingInfo;
        }
    }

    fn feed_locked(
        &mut self,
        frame: &ClassifiedFrame<'_>,
        registry: &mut [Box<dyn SubProtocol>],
        sink: &mut CredentialSink,
        effects: &mut Vec<Effect>,
    ) {
        let Some(index) = self.locked else {
            return;
        };
        if registry[index].receive(frame, sink) == AdapterState::Finished {
            self.phase = Phase::Success;
            effects.push(Effect::Complete);
        }
    }

    /// DS channel from a beacon sent by the locked sender's BSSID.
    fn match_beacon(&self, frame: &ClassifiedFrame<'_>) -> Option<u8> {
        let target = self.bssid?;
        let header = MacHeader::parse(frame.header)?;
        if !header.is_beacon() || header.bssid()? != target {
            return None;
        }
        beacon_ds_channel(frame.payload)
    }
}

fn frame_bssid(frame: &ClassifiedFrame<'_>) -> Option<[u8; 6]> {
    let header = MacHeader::parse(frame.header)?;
    let bssid = header.bssid()?;
    let mut out = [0u8; 6];
    out.copy_from_slice(bssid);
    Some(out)
}
