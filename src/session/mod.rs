//! Credential acquisition session.
//!
//! One session owns the radio for its lifetime: it parks the driver in
//! monitor mode, hops the scan plan, fans captured frames through the
//! sub-protocol registry and arbitrator, and hands decoded credentials to
//! the caller through a notice callback. On any exit path the radio is
//! restored to the mode, bandwidth and filter it had before the session.
//!
//! Everything that mutates session state runs on one worker task fed by
//! a single bounded event queue. The RX callback only copies the frame
//! into a pool buffer and enqueues it; when the queue is full the frame
//! is counted and dropped, never blocked on. Hop ticks and lock timeouts
//! arrive over the same queue, so there is exactly one writer to the
//! scheduler, the registry and the arbitrator.
//!
//! # Example
//!
//! ```no_run
//! use smartconfig_rs_esp32::radio::sim::SimRadio;
//! use smartconfig_rs_esp32::session::{SessionConfig, SmartConfigSession};
//! use std::sync::{Arc, Mutex};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = Arc::new(Mutex::new(SimRadio::new()));
//! let mut session = SmartConfigSession::new(radio);
//! session.start(
//!     SessionConfig::default(),
//!     Some(Box::new(|notice| println!("{:?}", notice))),
//! )?;
//! session.wait().await;
//! # Ok(())
//! # }
//! ```

pub mod arbitrator;

use crate::channel::{ChannelError, ChannelScheduler};
use crate::credentials::{CredentialSink, SessionCredentials};
use crate::frame::{classify, CopyError, FramePool, PooledFrame, POOL_BUFFERS, POOL_BUFFER_LEN};
use crate::proto::{build_registry, rx_filter_for, ProtoError, Protocol, ProtocolSet, SubProtocol};
use crate::radio::{lock_radio, Bandwidth, OpMode, RadioError, RxFilter, SharedRadio};
use crate::stats::{SessionStats, StatsSnapshot};
use arbitrator::{Arbitrator, Effect};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Bounded depth of the worker event queue.
pub const EVENT_QUEUE_DEPTH: usize = 32;

/// Default dwell time per channel while probing.
pub const DEFAULT_HOP_PERIOD: Duration = Duration::from_millis(120);

/// Default time a channel lock may hold without the decode finishing.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(8);

/// Progress reports handed to the caller's callback.
#[derive(Debug)]
pub enum Notice {
    /// A sub-protocol synced and the scheduler stopped hopping.
    ChannelLocked { channel: u8, protocol: Protocol },
    /// Credentials decoded and verified; the session is finished.
    InfoCollected(SessionCredentials),
}

/// Caller-supplied notice receiver.
pub type NoticeCallback = Box<dyn FnMut(Notice) + Send>;

/// Session tuning knobs.
#[derive(Clone)]
pub struct SessionConfig {
    /// Protocols to listen for; intersected with the compiled set.
    pub protocols: ProtocolSet,
    /// Shared secret for the encrypting sub-protocols.
    pub key: Option<Vec<u8>>,
    /// Dwell time per channel while probing.
    pub hop_period: Duration,
    /// One-shot lock lifetime.
    pub lock_timeout: Duration,
    /// Channel visit order; empty selects the builtin plan.
    pub hop_plan: Vec<u8>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocols: ProtocolSet::compiled(),
            key: None,
            hop_period: DEFAULT_HOP_PERIOD,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            hop_plan: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Check the knobs before they reach the radio.
    pub fn validate(&self) -> Result<(), StartError> {
        if self.hop_period.is_zero() {
            return Err(StartError::InvalidConfig("hop period must be non-zero"));
        }
        if self.lock_timeout.is_zero() {
            return Err(StartError::InvalidConfig("lock timeout must be non-zero"));
        }
        if matches!(self.key.as_deref(), Some([])) {
            return Err(StartError::InvalidConfig("key must not be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("protocols", &self.protocols)
            .field("has_key", &self.key.is_some())
            .field("hop_period", &self.hop_period)
            .field("lock_timeout", &self.lock_timeout)
            .field("hop_plan_len", &self.hop_plan.len())
            .finish()
    }
}

/// Errors from [`SmartConfigSession::start`].
#[derive(Debug)]
pub enum StartError {
    /// A previous session on this handle is still running.
    AlreadyRunning,
    /// None of the requested protocols is compiled into this build.
    UnsupportedProtocols,
    /// A config knob is out of range.
    InvalidConfig(&'static str),
    /// A sub-protocol adapter refused to initialize.
    Adapter(ProtoError),
    /// The radio driver rejected capture setup.
    Radio(RadioError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "a session is already running"),
            Self::UnsupportedProtocols => {
                write!(f, "no requested protocol is compiled into this build")
            }
            Self::InvalidConfig(msg) => write!(f, "invalid session config: {}", msg),
            Self::Adapter(e) => write!(f, "adapter init failed: {}", e),
            Self::Radio(e) => write!(f, "radio setup failed: {}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<ProtoError> for StartError {
    fn from(e: ProtoError) -> Self {
        Self::Adapter(e)
    }
}

impl From<RadioError> for StartError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

/// Everything the worker consumes arrives as one of these.
enum SessionEvent {
    Frame(PooledFrame),
    HopTick,
    LockTimeout { generation: u32 },
}

/// Radio settings captured at start and restored at teardown.
#[derive(Debug, Clone, Copy)]
struct SavedRadioState {
    filter: RxFilter,
    bandwidth: Bandwidth,
    opmode: OpMode,
}

/// Handle to a running (or finished) acquisition session.
pub struct SmartConfigSession {
    radio: SharedRadio,
    stats: Arc<SessionStats>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl SmartConfigSession {
    pub fn new(radio: SharedRadio) -> Self {
        Self {
            radio,
            stats: Arc::new(SessionStats::new()),
            cancel: CancellationToken::new(),
            worker: None,
        }
    }

    /// Begin capturing. Returns once the radio is in monitor mode and the
    /// worker is running; progress arrives through `callback`.
    pub fn start(
        &mut self,
        config: SessionConfig,
        callback: Option<NoticeCallback>,
    ) -> Result<(), StartError> {
        if self.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return Err(StartError::AlreadyRunning);
        }
        config.validate()?;

        let active = config.protocols.intersection(ProtocolSet::compiled());
        if active.is_empty() {
            return Err(StartError::UnsupportedProtocols);
        }

        let scheduler = if config.hop_plan.is_empty() {
            ChannelScheduler::default()
        } else {
            ChannelScheduler::new(config.hop_plan.clone())
                .map_err(|ChannelError::InvalidConfig(msg)| StartError::InvalidConfig(msg))?
        };

        let pool = FramePool::new(POOL_BUFFERS, POOL_BUFFER_LEN);
        let mut registry = build_registry(active, &pool, &self.stats);
        for index in 0..registry.len() {
            if let Err(e) = registry[index].init(config.key.as_deref()) {
                for adapter in &mut registry[..index] {
                    adapter.cleanup();
                }
                return Err(StartError::Adapter(e));
            }
        }

        let saved = {
            let radio = lock_radio(&self.radio);
            SavedRadioState {
                filter: radio.rx_filter(),
                bandwidth: radio.bandwidth(),
                opmode: radio.opmode(),
            }
        };
        let start_channel = scheduler.current();
        if let Err(e) = enter_capture_mode(&self.radio, rx_filter_for(active), start_channel) {
            restore_radio(&self.radio, &saved);
            for adapter in &mut registry {
                adapter.cleanup();
            }
            return Err(StartError::Radio(e));
        }

        let cancel = CancellationToken::new();
        self.cancel = cancel.clone();
        let (tx, rx) = mpsc::channel::<SessionEvent>(EVENT_QUEUE_DEPTH);

        // RX callback: copy, enqueue, never block, never decode
        let handler_tx = tx.clone();
        let handler_pool = pool.clone();
        let handler_stats = self.stats.clone();
        let installed = lock_radio(&self.radio).set_rx_handler(Box::new(move |raw| {
            handler_stats.record_frame_seen();
            match handler_pool.copy_from(raw) {
                Ok(frame) => match handler_tx.try_send(SessionEvent::Frame(frame)) {
                    Ok(()) => handler_stats.record_frame_enqueued(),
                    Err(_) => handler_stats.record_drop_queue_full(),
                },
                Err(CopyError::Exhausted) => handler_stats.record_drop_pool_exhausted(),
                Err(CopyError::Oversize { .. }) => handler_stats.record_drop_oversize(),
            }
        }));
        if let Err(e) = installed {
            restore_radio(&self.radio, &saved);
            for adapter in &mut registry {
                adapter.cleanup();
            }
            return Err(StartError::Radio(e));
        }

        // Hop ticker: queue pressure from frames outranks a missed tick
        let tick_tx = tx.clone();
        let tick_cancel = cancel.clone();
        let hop_period = config.hop_period;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + hop_period, hop_period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = tick_tx.try_send(SessionEvent::HopTick);
                    }
                }
            }
        });

        log::info!(
            "session started: protocols {}, {} channels, hop every {:?}",
            active,
            scheduler.plan_len(),
            hop_period
        );

        let worker = Worker {
            radio: self.radio.clone(),
            scheduler,
            registry,
            arbitrator: Arbitrator::new(),
            sink: CredentialSink::new(),
            stats: self.stats.clone(),
            callback,
            saved,
            active,
            lock_timeout: config.lock_timeout,
            channel: start_channel,
            tx,
            cancel,
        };
        self.worker = Some(tokio::spawn(worker.run(rx)));
        Ok(())
    }

    /// Ask the worker to wind down. Returns immediately; pair with
    /// [`wait`](Self::wait) to observe the restored radio.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True while the worker task is alive.
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Wait for the worker to finish and the radio to be restored.
    pub async fn wait(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                log::warn!("session worker task failed: {}", e);
            }
        }
    }

    /// Counters for the current or most recent session.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for SmartConfigSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn enter_capture_mode(
    radio: &SharedRadio,
    filter: RxFilter,
    channel: u8,
) -> Result<(), RadioError> {
    let mut radio = lock_radio(radio);
    radio.set_opmode(OpMode::Monitor)?;
    radio.set_bandwidth(Bandwidth::Ht20)?;
    radio.set_rx_filter(filter)?;
    radio.set_channel(channel)?;
    Ok(())
}

fn restore_radio(radio: &SharedRadio, saved: &SavedRadioState) {
    let mut radio = lock_radio(radio);
    if let Err(e) = radio.set_rx_filter(saved.filter) {
        log::warn!("could not restore rx filter: {}", e);
    }
    if let Err(e) = radio.set_bandwidth(saved.bandwidth) {
        log::warn!("could not restore bandwidth: {}", e);
    }
    if let Err(e) = radio.set_opmode(saved.opmode) {
        log::warn!("could not restore radio mode: {}", e);
    }
}

/// Single consumer of the event queue; sole writer to the scheduler,
/// registry, arbitrator and sink.
struct Worker {
    radio: SharedRadio,
    scheduler: ChannelScheduler,
    registry: Vec<Box<dyn SubProtocol>>,
    arbitrator: Arbitrator,
    sink: CredentialSink,
    stats: Arc<SessionStats>,
    callback: Option<NoticeCallback>,
    saved: SavedRadioState,
    active: ProtocolSet,
    lock_timeout: Duration,
    channel: u8,
    tx: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionEvent>) {
        let done = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break false,
                event = rx.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event) {
                            break true;
                        }
                    }
                    None => break false,
                },
            }
        };
        self.teardown(&mut rx, done);
    }

    fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Frame(frame) => self.handle_frame(&frame),
            SessionEvent::HopTick => {
                self.handle_hop_tick();
                false
            }
            SessionEvent::LockTimeout { generation } => {
                self.handle_lock_timeout(generation);
                false
            }
        }
    }

    /// Returns true when the arbitrator declared the session complete.
    fn handle_frame(&mut self, frame: &PooledFrame) -> bool {
        let Some(classified) = classify(frame.bytes()) else {
            self.stats.record_classify_reject();
            return false;
        };
        let effects = self
            .arbitrator
            .on_frame(&classified, &mut self.registry, &mut self.sink);
        self.apply_effects(&effects)
    }

    fn handle_hop_tick(&mut self) {
        if !self.scheduler.is_hopping() {
            return;
        }
        // Adapters drop their channel-local partials first; one mid-sync
        // may refuse, which keeps the cursor where it is
        for adapter in &mut self.registry {
            if let Err(veto) = adapter.reset_channel() {
                log::debug!("hop skipped: {}", veto);
                self.stats.record_hop_vetoed();
                return;
            }
        }
        if let Some(channel) = self.scheduler.advance() {
            self.tune(channel);
            self.stats.record_channel_hop();
        }
    }

    fn handle_lock_timeout(&mut self, generation: u32) {
        let effects = self
            .arbitrator
            .on_lock_timeout(generation, &mut self.registry);
        if effects.is_empty() {
            return;
        }
        self.stats.record_lock_timeout();
        self.apply_effects(&effects);
    }

    fn apply_effects(&mut self, effects: &[Effect]) -> bool {
        let mut complete = false;
        for effect in effects {
            match *effect {
                Effect::LockChannel => {
                    self.scheduler.lock();
                    self.stats.record_lock();
                    log::info!("channel {} locked", self.channel);
                }
                Effect::ResumeHopping => {
                    let channel = self.scheduler.resume();
                    self.tune(channel);
                    self.stats.record_channel_hop();
                }
                Effect::WidenFilterForBeacons => {
                    self.set_filter(rx_filter_for(self.active) | RxFilter::MGMT_BEACON);
                }
                Effect::RestoreDataFilter => {
                    self.set_filter(rx_filter_for(self.active));
                }
                Effect::Retune { channel } => {
                    if channel != self.channel {
                        log::info!("retuning to the sender AP home channel {}", channel);
                        self.tune(channel);
                    }
                }
                Effect::ArmLockTimeout { generation } => self.arm_lock_timeout(generation),
                Effect::NotifyLocked { protocol } => {
                    let channel = self.channel;
                    self.notify(Notice::ChannelLocked { channel, protocol });
                }
                Effect::Complete => complete = true,
            }
        }
        complete
    }

    fn arm_lock_timeout(&self, generation: u32) {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let timeout = self.lock_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = time::sleep(timeout) => {
                    // Expiry must land even under frame pressure
                    let _ = tx.send(SessionEvent::LockTimeout { generation }).await;
                }
            }
        });
    }

    fn tune(&mut self, channel: u8) {
        if let Err(e) = lock_radio(&self.radio).set_channel(channel) {
            log::warn!("channel switch to {} failed: {}", channel, e);
            return;
        }
        self.channel = channel;
    }

    fn set_filter(&self, filter: RxFilter) {
        if let Err(e) = lock_radio(&self.radio).set_rx_filter(filter) {
            log::warn!("rx filter update failed: {}", e);
        }
    }

    fn notify(&mut self, notice: Notice) {
        if let Some(callback) = self.callback.as_mut() {
            callback(notice);
        }
    }

    fn teardown(&mut self, rx: &mut mpsc::Receiver<SessionEvent>, done: bool) {
        lock_radio(&self.radio).clear_rx_handler();
        restore_radio(&self.radio, &self.saved);
        // Drain so pooled frame buffers return before the pool goes away
        while rx.try_recv().is_ok() {}
        for adapter in &mut self.registry {
            adapter.cleanup();
        }
        if done {
            if let Some(creds) = self.sink.take() {
                log::info!("credentials collected for ssid \"{}\"", creds.ssid_lossy());
                self.notify(Notice::InfoCollected(creds));
            }
        }
        log::info!("session finished: {}", self.stats.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ClassifiedFrame;
    use crate::proto::{AdapterState, HopVeto};
    use crate::radio::sim::{script, SimRadio};
    use crate::radio::RadioDriver;
    use std::sync::Mutex;

    struct VetoAdapter;

    impl SubProtocol for VetoAdapter {
        fn protocol(&self) -> Protocol {
            Protocol::SmartConnect
        }

        fn init(&mut self, _key: Option<&[u8]>) -> Result<(), ProtoError> {
            Ok(())
        }

        fn cleanup(&mut self) {}

        fn reset_channel(&mut self) -> Result<(), HopVeto> {
            Err(HopVeto {
                protocol: Protocol::SmartConnect,
            })
        }

        fn receive(
            &mut self,
            _frame: &ClassifiedFrame<'_>,
            _sink: &mut CredentialSink,
        ) -> AdapterState {
            AdapterState::Init
        }

        fn rx_timeout(&mut self) {}

        fn state(&self) -> AdapterState {
            AdapterState::Init
        }
    }

    fn sim_pair() -> (Arc<Mutex<SimRadio>>, SharedRadio) {
        let sim = Arc::new(Mutex::new(SimRadio::new()));
        let shared: SharedRadio = sim.clone();
        (sim, shared)
    }

    fn test_worker(
        shared: SharedRadio,
        registry: Vec<Box<dyn SubProtocol>>,
        notices: Arc<Mutex<Vec<Notice>>>,
    ) -> Worker {
        let (tx, _rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let scheduler = ChannelScheduler::default();
        let channel = scheduler.current();
        let sink_notices = notices;
        Worker {
            radio: shared,
            scheduler,
            registry,
            arbitrator: Arbitrator::new(),
            sink: CredentialSink::new(),
            stats: Arc::new(SessionStats::new()),
            callback: Some(Box::new(move |notice| {
                sink_notices.lock().unwrap().push(notice);
            })),
            saved: SavedRadioState {
                filter: RxFilter::all(),
                bandwidth: Bandwidth::Ht40,
                opmode: OpMode::Station,
            },
            active: ProtocolSet::compiled(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            channel,
            tx,
            cancel: CancellationToken::new(),
        }
    }

    fn pooled(raw: &[u8]) -> PooledFrame {
        FramePool::new(2, POOL_BUFFER_LEN).copy_from(raw).unwrap()
    }

    #[test]
    fn test_hop_tick_advances_channel() {
        let (sim, shared) = sim_pair();
        let mut worker = test_worker(shared, Vec::new(), Arc::new(Mutex::new(Vec::new())));
        worker.handle_hop_tick();
        assert_eq!(sim.lock().unwrap().channel(), 6);
        assert_eq!(worker.stats.snapshot().channel_hops, 1);
    }

    #[test]
    fn test_veto_blocks_hop_and_keeps_cursor() {
        let (sim, shared) = sim_pair();
        let registry: Vec<Box<dyn SubProtocol>> = vec![Box::new(VetoAdapter)];
        let mut worker = test_worker(shared, registry, Arc::new(Mutex::new(Vec::new())));
        worker.handle_hop_tick();
        assert_eq!(sim.lock().unwrap().channel(), 1);
        assert_eq!(worker.scheduler.current(), 1);
        let snapshot = worker.stats.snapshot();
        assert_eq!(snapshot.hops_vetoed, 1);
        assert_eq!(snapshot.channel_hops, 0);
    }

    #[test]
    fn test_locked_scheduler_ignores_ticks() {
        let (sim, shared) = sim_pair();
        let registry: Vec<Box<dyn SubProtocol>> = vec![Box::new(VetoAdapter)];
        let mut worker = test_worker(shared, registry, Arc::new(Mutex::new(Vec::new())));
        worker.scheduler.lock();
        worker.handle_hop_tick();
        // The veto adapter was never consulted and the channel held still
        assert_eq!(worker.stats.snapshot().hops_vetoed, 0);
        assert_eq!(sim.lock().unwrap().channel(), 1);
    }

    #[test]
    fn test_unclassifiable_frame_counted() {
        let (_sim, shared) = sim_pair();
        let mut worker = test_worker(shared, Vec::new(), Arc::new(Mutex::new(Vec::new())));
        let frame = pooled(&[0xFF; 16]);
        assert!(!worker.handle_frame(&frame));
        assert_eq!(worker.stats.snapshot().classify_rejects, 1);
    }

    #[tokio::test]
    async fn test_sync_locks_channel_and_notifies() {
        let (_sim, shared) = sim_pair();
        let stats = Arc::new(SessionStats::new());
        let pool = FramePool::new(POOL_BUFFERS, POOL_BUFFER_LEN);
        let mut registry = build_registry(
            ProtocolSet::only(Protocol::Broadcast),
            &pool,
            &stats,
        );
        for adapter in &mut registry {
            adapter.init(None).unwrap();
        }
        let notices = Arc::new(Mutex::new(Vec::new()));
        let mut worker = test_worker(shared, registry, notices.clone());
        worker.stats = stats;

        let frames = script::broadcast_session(b"TestAP", b"pw", b"", None);
        let frame = pooled(&frames[0]);
        assert!(!worker.handle_frame(&frame));

        assert!(!worker.scheduler.is_hopping());
        assert_eq!(worker.stats.snapshot().locks, 1);
        let notices = notices.lock().unwrap();
        assert!(matches!(
            notices.as_slice(),
            [Notice::ChannelLocked {
                channel: 1,
                protocol: Protocol::Broadcast
            }]
        ));
    }

    #[tokio::test]
    async fn test_lock_timeout_resumes_hopping_and_restores_filter() {
        let (sim, shared) = sim_pair();
        let stats = Arc::new(SessionStats::new());
        let pool = FramePool::new(POOL_BUFFERS, POOL_BUFFER_LEN);
        let mut registry = build_registry(
            ProtocolSet::only(Protocol::Broadcast),
            &pool,
            &stats,
        );
        for adapter in &mut registry {
            adapter.init(None).unwrap();
        }
        let mut worker = test_worker(shared, registry, Arc::new(Mutex::new(Vec::new())));
        worker.stats = stats;
        worker.active = ProtocolSet::only(Protocol::Broadcast);

        let frames = script::broadcast_session(b"TestAP", b"pw", b"", None);
        let frame = pooled(&frames[0]);
        worker.handle_frame(&frame);
        // The sender frame names a BSSID, so beacons were admitted
        assert!(sim
            .lock()
            .unwrap()
            .rx_filter()
            .contains(RxFilter::MGMT_BEACON));

        worker.handle_lock_timeout(1);
        assert!(worker.scheduler.is_hopping());
        assert_eq!(worker.stats.snapshot().lock_timeouts, 1);
        let filter = sim.lock().unwrap().rx_filter();
        assert!(!filter.contains(RxFilter::MGMT_BEACON));
        assert!(filter.contains(RxFilter::DATA_BROADCAST));
        // Resume moved the probe along rather than re-dwelling
        assert_eq!(sim.lock().unwrap().channel(), 6);
    }

    #[tokio::test]
    async fn test_full_decode_completes_session() {
        let (_sim, shared) = sim_pair();
        let stats = Arc::new(SessionStats::new());
        let pool = FramePool::new(POOL_BUFFERS, POOL_BUFFER_LEN);
        let mut registry = build_registry(
            ProtocolSet::only(Protocol::Broadcast),
            &pool,
            &stats,
        );
        for adapter in &mut registry {
            adapter.init(None).unwrap();
        }
        let mut worker = test_worker(shared, registry, Arc::new(Mutex::new(Vec::new())));

        let frames = script::broadcast_session(b"TestAP", b"abcdefgh", b"", None);
        let mut complete = false;
        for raw in &frames {
            let frame = pooled(raw);
            complete = worker.handle_frame(&frame);
        }
        assert!(complete);
        let creds = worker.sink.take().unwrap();
        assert_eq!(creds.ssid, b"TestAP");
        assert_eq!(creds.passphrase, b"abcdefgh");
    }

    #[test]
    fn test_config_validation() {
        let mut config = SessionConfig::default();
        assert!(config.validate().is_ok());
        config.hop_period = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(StartError::InvalidConfig(_))
        ));

        let mut config = SessionConfig::default();
        config.key = Some(Vec::new());
        assert!(matches!(
            config.validate(),
            Err(StartError::InvalidConfig(_))
        ));
    }
}
