use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;

use crate::config::ClockConfig;

/// Maximum number of clocked units a scheduler drives.
pub const MAX_UNITS: usize = 50;

const PAUSE_ACK_TIMEOUT: Duration = Duration::from_secs(1);
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// Below this the scheduler spins instead of sleeping.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

/// Anything advanced one hardware cycle at a time.
pub trait ClockedUnit: Send + Sync {
    /// Advances one cycle. Returns `true` at an instruction boundary or when idle.
    fn cycle(&self) -> bool;
}

/// The processor as seen by the scheduler and by bus masters like the FDC.
///
/// A hold asserted from inside a bus access means the access was not
/// accepted: the processor suspends and replays it once the hold is released.
pub trait Processor: ClockedUnit {
    fn hold(&self, hold: bool);
    fn is_hold_acknowledge(&self) -> bool;
    fn pause_memory_units(&self, paused: bool);
}

#[derive(Clone)]
enum ClockSlot {
    Processor(Arc<dyn Processor>),
    Device(Arc<dyn ClockedUnit>),
}

impl ClockSlot {
    fn cycle(&self) -> bool {
        match self {
            ClockSlot::Processor(cpu) => cpu.cycle(),
            ClockSlot::Device(unit) => unit.cycle(),
        }
    }

    fn identity(&self) -> *const () {
        match self {
            ClockSlot::Processor(cpu) => Arc::as_ptr(cpu) as *const (),
            ClockSlot::Device(unit) => Arc::as_ptr(unit) as *const (),
        }
    }
}

#[derive(Default)]
struct Registry {
    units: Vec<ClockSlot>,
    processor: Option<usize>,
}

impl Registry {
    fn processor(&self) -> Option<Arc<dyn Processor>> {
        match self.processor.and_then(|index| self.units.get(index)) {
            Some(ClockSlot::Processor(cpu)) => Some(cpu.clone()),
            _ => None,
        }
    }
}

#[derive(Default)]
struct LoopState {
    pause_acknowledged: bool,
}

struct Shared {
    registry: RwLock<Registry>,
    /// Serializes pulses and single steps.
    step_lock: Mutex<()>,
    cycles: AtomicU64,
    pulses: AtomicU64,
    frequency_hz: AtomicU64,
    pulse_nanos: u64,
    paused: AtomicBool,
    stop: AtomicBool,
    running: AtomicBool,
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl Shared {
    fn registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn iteration_cycles(&self) -> u64 {
        let frequency = self.frequency_hz.load(Ordering::Relaxed) as f64;
        (self.pulse_nanos as f64 * frequency / 1e9).round() as u64
    }

    /// Cycles every unit once, in registration order, then counts the cycle.
    /// Returns the processor's boundary flag.
    fn sweep(&self, registry: &Registry) -> bool {
        let mut boundary = false;
        for (index, unit) in registry.units.iter().enumerate() {
            let done = unit.cycle();
            if registry.processor == Some(index) {
                boundary = done;
            }
        }
        self.cycles.fetch_add(1, Ordering::SeqCst);
        boundary
    }

    fn step_pulse(&self) -> u64 {
        if self.paused.load(Ordering::SeqCst) {
            return 0;
        }

        let _step = self.step_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.paused.load(Ordering::SeqCst) {
            return 0;
        }

        let iterations = self.iteration_cycles();
        let registry = self.registry();
        for _ in 0..iterations {
            self.sweep(&registry);
        }
        self.pulses.fetch_add(1, Ordering::Relaxed);
        iterations
    }

    fn run(&self) {
        tracing::info!(
            "[CLOCK] Scheduler started at {} Hz, {} cycles per pulse",
            self.frequency_hz.load(Ordering::Relaxed),
            self.iteration_cycles()
        );

        while !self.stop.load(Ordering::SeqCst) {
            if self.paused.load(Ordering::SeqCst) {
                self.wait_while_paused();
                continue;
            }

            let pulse_start = Instant::now();
            self.step_pulse();
            self.pace(pulse_start + Duration::from_nanos(self.pulse_nanos));
        }

        tracing::info!(
            "[CLOCK] Scheduler stopped after {} cycles",
            self.cycles.load(Ordering::SeqCst)
        );
    }

    fn wait_while_paused(&self) {
        let mut state = self.state();
        state.pause_acknowledged = true;
        self.wake.notify_all();

        while self.paused.load(Ordering::SeqCst) && !self.stop.load(Ordering::SeqCst) {
            state = self
                .wake
                .wait_timeout(state, PAUSE_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state.pause_acknowledged = false;
    }

    /// Coarse sleep followed by a spin for sub-millisecond accuracy.
    fn pace(&self, deadline: Instant) {
        loop {
            let now = Instant::now();
            if now >= deadline || self.stop.load(Ordering::Relaxed) {
                break;
            }

            let remaining = deadline - now;
            if remaining > SPIN_THRESHOLD {
                thread::sleep(remaining - SPIN_THRESHOLD);
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

/// Drives all clocked units in lockstep at a target frequency.
///
/// Units are registered before [`start`](Self::start); the run loop then
/// executes one batch of cycles per pulse window and sleeps out the rest of
/// the window.
pub struct ClockScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClockScheduler {
    pub fn new(config: ClockConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                step_lock: Mutex::new(()),
                cycles: AtomicU64::new(0),
                pulses: AtomicU64::new(0),
                frequency_hz: AtomicU64::new(config.frequency_hz),
                pulse_nanos: config.pulse_nanos,
                paused: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                running: AtomicBool::new(false),
                state: Mutex::new(LoopState::default()),
                wake: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn add_unit(&self, unit: Arc<dyn ClockedUnit>) -> bool {
        self.register(ClockSlot::Device(unit))
    }

    /// Registers the processor; it is cycled like any other unit and is the
    /// unit single-stepping waits on.
    pub fn add_processor(&self, cpu: Arc<dyn Processor>) -> bool {
        self.register(ClockSlot::Processor(cpu))
    }

    fn register(&self, slot: ClockSlot) -> bool {
        if self.shared.running.load(Ordering::SeqCst) {
            tracing::warn!("[CLOCK] Units cannot be added while the scheduler runs");
            return false;
        }

        let mut registry = self
            .shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if registry.units.len() >= MAX_UNITS {
            tracing::warn!("[CLOCK] Rejected unit: registry is full");
            return false;
        }
        if registry
            .units
            .iter()
            .any(|unit| unit.identity() == slot.identity())
        {
            tracing::warn!("[CLOCK] Rejected duplicate unit");
            return false;
        }
        if matches!(slot, ClockSlot::Processor(_)) {
            if registry.processor.is_some() {
                tracing::warn!("[CLOCK] Rejected second processor");
                return false;
            }
            registry.processor = Some(registry.units.len());
        }

        registry.units.push(slot);
        true
    }

    pub fn unit_count(&self) -> usize {
        self.shared.registry().units.len()
    }

    pub fn processor(&self) -> Option<Arc<dyn Processor>> {
        self.shared.registry().processor()
    }

    pub fn start(&self) -> anyhow::Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            anyhow::bail!("Clock scheduler is already running");
        }
        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("clock-scheduler".into())
            .spawn(move || shared.run());
        if spawned.is_err() {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        let handle = spawned.context("Unable to spawn the clock scheduler thread")?;

        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Terminates the run loop and joins its thread.
    pub fn stop(&self) {
        {
            let _state = self.shared.state();
            self.shared.stop.store(true, Ordering::SeqCst);
            self.shared.wake.notify_all();
        }

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("[CLOCK] Scheduler thread panicked");
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Pauses (`true`) or resumes the run loop.
    ///
    /// With `with_devices` the processor is held and told to suspend its
    /// memory units' time dependent behavior while paused. Pausing waits up to
    /// a second for the loop to acknowledge; the return value tells whether it
    /// did.
    pub fn pause(&self, pause: bool, with_devices: bool) -> bool {
        let cpu = if with_devices { self.processor() } else { None };

        if pause {
            if let Some(cpu) = &cpu {
                cpu.hold(true);
                cpu.pause_memory_units(true);
            }

            let mut state = self.shared.state();
            self.shared.paused.store(true, Ordering::SeqCst);
            self.shared.wake.notify_all();

            if !self.is_running() {
                return true;
            }

            let deadline = Instant::now() + PAUSE_ACK_TIMEOUT;
            while !state.pause_acknowledged {
                let now = Instant::now();
                if now >= deadline {
                    tracing::warn!("[CLOCK] Run loop did not acknowledge pause");
                    return false;
                }
                state = self
                    .shared
                    .wake
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            true
        } else {
            {
                let _state = self.shared.state();
                self.shared.paused.store(false, Ordering::SeqCst);
                self.shared.wake.notify_all();
            }

            if let Some(cpu) = &cpu {
                cpu.pause_memory_units(false);
                cpu.hold(false);
            }
            true
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Executes exactly one processor instruction while paused.
    ///
    /// Every registered unit is swept once per cycle until the processor
    /// reports an instruction boundary. Returns `false` when not paused, when
    /// no processor is registered or when the processor is on hold.
    pub fn exec_one_cmd_cpu(&self) -> bool {
        if !self.is_paused() {
            return false;
        }

        let _step = self
            .shared
            .step_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let registry = self.shared.registry();

        let Some(cpu) = registry.processor() else {
            return false;
        };
        if cpu.is_hold_acknowledge() {
            tracing::debug!("[CLOCK] Processor is on hold, cannot step");
            return false;
        }

        while !self.shared.sweep(&registry) {}
        true
    }

    /// Runs one pulse worth of cycles without pacing. Returns the number of
    /// cycles executed, zero while paused.
    pub fn step_pulse(&self) -> u64 {
        self.shared.step_pulse()
    }

    pub fn set_clock_speed(&self, frequency_hz: u64) {
        self.shared
            .frequency_hz
            .store(frequency_hz, Ordering::Relaxed);
        tracing::info!("[CLOCK] Clock speed set to {} Hz", frequency_hz);
    }

    pub fn clock_speed(&self) -> u64 {
        self.shared.frequency_hz.load(Ordering::Relaxed)
    }

    pub fn iteration_cycles(&self) -> u64 {
        self.shared.iteration_cycles()
    }

    /// Total cycles executed since creation.
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::SeqCst)
    }

    pub fn timing_info(&self) -> TimingInfo {
        TimingInfo {
            total_cycles: self.cycles(),
            frequency_hz: self.clock_speed(),
            iteration_cycles: self.iteration_cycles(),
            pulses: self.shared.pulses.load(Ordering::Relaxed),
            paused: self.is_paused(),
        }
    }
}

impl Default for ClockScheduler {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

impl Drop for ClockScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ClockScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockScheduler")
            .field("units", &self.unit_count())
            .field("timing", &self.timing_info())
            .finish()
    }
}

/// Timing information snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct TimingInfo {
    pub total_cycles: u64,
    pub frequency_hz: u64,
    pub iteration_cycles: u64,
    pub pulses: u64,
    pub paused: bool,
}
