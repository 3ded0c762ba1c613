//! Channel rotation for the probing phase.
//!
//! While no sub-protocol has locked on, the session walks a fixed channel
//! plan that revisits the common home channels 1, 6 and 11 every third hop
//! so a sender parked there is never far away. The scheduler only tracks the
//! cursor; the session worker owns the timer and programs the radio.
//!
//! # Example
//!
//! ```
//! use smartconfig_rs_esp32::channel::ChannelScheduler;
//!
//! let mut scheduler = ChannelScheduler::default();
//! assert_eq!(scheduler.current(), 1);
//! assert_eq!(scheduler.advance(), Some(6));
//!
//! scheduler.lock();
//! assert_eq!(scheduler.advance(), None); // ticks ignored while locked
//!
//! let resumed = scheduler.resume(); // moves one step immediately
//! assert_eq!(resumed, 11);
//! ```

use std::fmt;

/// Default rotation plan. The home channels 1/6/11 open every group of
/// three, with the remaining 2.4 GHz channels spread between them.
pub const DEFAULT_HOP_SEQUENCE: [u8; 20] = [
    1, 6, 11, 2, 5, 7, 1, 6, 11, 10, 12, 3, 1, 6, 11, 8, 13, 4, 9, 14,
];

/// Lowest valid 2.4 GHz channel number.
pub const MIN_CHANNEL: u8 = 1;

/// Highest valid 2.4 GHz channel number.
pub const MAX_CHANNEL: u8 = 14;

/// Errors from scheduler construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Invalid plan contents.
    InvalidConfig(&'static str),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid channel plan: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Cursor over the channel plan with a lock/resume gate.
///
/// `advance` applies one hop tick and wraps at the end of the plan. While
/// locked, ticks are ignored; `resume` re-enables hopping and advances one
/// step immediately instead of waiting out the running tick period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelScheduler {
    plan: Vec<u8>,
    cursor: usize,
    hopping: bool,
}

impl Default for ChannelScheduler {
    fn default() -> Self {
        // The fixed default plan is known valid
        Self {
            plan: DEFAULT_HOP_SEQUENCE.to_vec(),
            cursor: 0,
            hopping: true,
        }
    }
}

impl ChannelScheduler {
    /// Create a scheduler over a custom plan.
    pub fn new(plan: Vec<u8>) -> Result<Self, ChannelError> {
        if plan.is_empty() {
            return Err(ChannelError::InvalidConfig("plan must not be empty"));
        }
        if plan
            .iter()
            .any(|&ch| !(MIN_CHANNEL..=MAX_CHANNEL).contains(&ch))
        {
            return Err(ChannelError::InvalidConfig("channel out of range 1-14"));
        }
        Ok(Self {
            plan,
            cursor: 0,
            hopping: true,
        })
    }

    /// The channel the cursor points at.
    pub fn current(&self) -> u8 {
        self.plan[self.cursor]
    }

    /// True while hop ticks are being applied.
    pub fn is_hopping(&self) -> bool {
        self.hopping
    }

    /// Apply one hop tick. Returns the new channel, or `None` if the
    /// scheduler is locked and the tick was ignored.
    pub fn advance(&mut self) -> Option<u8> {
        if !self.hopping {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.plan.len();
        Some(self.current())
    }

    /// Stop applying hop ticks. Idempotent.
    pub fn lock(&mut self) {
        self.hopping = false;
    }

    /// Re-enable hopping and advance one step immediately.
    ///
    /// Called after a lock times out; the immediate step gets the radio off
    /// the stale channel without waiting for the next tick.
    pub fn resume(&mut self) -> u8 {
        self.hopping = true;
        self.cursor = (self.cursor + 1) % self.plan.len();
        self.current()
    }

    /// Number of entries in the plan.
    pub fn plan_len(&self) -> usize {
        self.plan.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_contents() {
        let scheduler = ChannelScheduler::default();
        assert_eq!(scheduler.plan_len(), 20);
        assert_eq!(scheduler.current(), 1);
    }

    #[test]
    fn test_default_plan_revisits_home_channels() {
        // Channels 1, 6, 11 open every full group of six
        for chunk in DEFAULT_HOP_SEQUENCE.chunks_exact(6) {
            assert_eq!(&chunk[..3], &[1, 6, 11]);
        }
        assert_eq!(DEFAULT_HOP_SEQUENCE.chunks_exact(6).count(), 3);
    }

    #[test]
    fn test_advance_follows_plan() {
        let mut scheduler = ChannelScheduler::default();
        let mut seen = vec![scheduler.current()];
        for _ in 0..19 {
            seen.push(scheduler.advance().unwrap());
        }
        assert_eq!(seen, DEFAULT_HOP_SEQUENCE.to_vec());
    }

    #[test]
    fn test_advance_wraps() {
        let mut scheduler = ChannelScheduler::new(vec![3, 7]).unwrap();
        assert_eq!(scheduler.advance(), Some(7));
        assert_eq!(scheduler.advance(), Some(3));
        assert_eq!(scheduler.advance(), Some(7));
    }

    #[test]
    fn test_lock_ignores_ticks() {
        let mut scheduler = ChannelScheduler::default();
        scheduler.advance();
        let parked = scheduler.current();
        scheduler.lock();
        assert!(!scheduler.is_hopping());
        assert_eq!(scheduler.advance(), None);
        assert_eq!(scheduler.advance(), None);
        assert_eq!(scheduler.current(), parked);
    }

    #[test]
    fn test_lock_idempotent() {
        let mut scheduler = ChannelScheduler::default();
        scheduler.lock();
        scheduler.lock();
        assert!(!scheduler.is_hopping());
    }

    #[test]
    fn test_resume_advances_one_step() {
        let mut scheduler = ChannelScheduler::default();
        scheduler.lock();
        // Cursor sits at index 0 (channel 1); resume must move to index 1
        let ch = scheduler.resume();
        assert_eq!(ch, 6);
        assert!(scheduler.is_hopping());
        assert_eq!(scheduler.advance(), Some(11));
    }

    #[test]
    fn test_resume_wraps_from_last_entry() {
        let mut scheduler = ChannelScheduler::new(vec![4, 9]).unwrap();
        scheduler.advance(); // cursor at 9
        scheduler.lock();
        assert_eq!(scheduler.resume(), 4);
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(matches!(
            ChannelScheduler::new(vec![]),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_out_of_range_channel_rejected() {
        assert!(matches!(
            ChannelScheduler::new(vec![1, 0]),
            Err(ChannelError::InvalidConfig(_))
        ));
        assert!(matches!(
            ChannelScheduler::new(vec![15]),
            Err(ChannelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_single_entry_plan() {
        let mut scheduler = ChannelScheduler::new(vec![6]).unwrap();
        assert_eq!(scheduler.current(), 6);
        assert_eq!(scheduler.advance(), Some(6));
        scheduler.lock();
        assert_eq!(scheduler.resume(), 6);
    }
}
