//! Single density floppy disk controller (WD1793 command set).
//!
//! The controller is a four byte memory unit (status/command, track, sector,
//! data) backed by a worker thread that executes commands the way the chip
//! does internally. Data bytes are exchanged through the data register with
//! a data request (DRQ) handshake; a processor touching the data register
//! before the controller is ready is put on hold until the byte is.
//!
//! The drives take flat 819,200 byte images, see [`crate::dsk_image`].
//!
//! The processor and scheduler are referenced weakly: the processor usually
//! owns the address space the controller is mapped into.

use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicI8, AtomicU8, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context;
use derivative::Derivative;

use crate::{
    bus::MemoryUnit,
    clock::{ClockScheduler, Processor},
    config::FdcConfig,
    disk_drive::{DiskDrive, Drive},
    disk_error::DiskError,
    dsk_image::{SECTORS_PER_TRACK, SECTOR_SIZE, SIZE_CODE},
};

pub const REGISTER_COUNT: usize = 4;

pub const REG_STATUS: u16 = 0;
pub const REG_COMMAND: u16 = 0;
pub const REG_TRACK: u16 = 1;
pub const REG_SECTOR: u16 = 2;
pub const REG_DATA: u16 = 3;

/// Status register bits. Several bits change meaning with the class of the
/// last command.
pub mod status {
    pub const BUSY: u8 = 0x01;
    /// Type I
    pub const INDEX: u8 = 0x02;
    /// Type II and III
    pub const DRQ: u8 = 0x02;
    /// Type I
    pub const TRACK00: u8 = 0x04;
    /// Type II and III
    pub const LOST_DATA: u8 = 0x04;
    pub const CRC_ERROR: u8 = 0x08;
    /// Type I
    pub const SEEK_ERROR: u8 = 0x10;
    /// Type II and III
    pub const RECORD_NOT_FOUND: u8 = 0x10;
    /// Type I
    pub const HEAD_LOADED: u8 = 0x20;
    /// Read commands
    pub const RECORD_TYPE: u8 = 0x20;
    /// Write commands
    pub const WRITE_FAULT: u8 = 0x20;
    pub const WRITE_PROTECT: u8 = 0x40;
    pub const NOT_READY: u8 = 0x80;
}

pub mod command {
    pub const RESTORE: u8 = 0x00;
    pub const SEEK: u8 = 0x10;
    pub const STEP: u8 = 0x20;
    pub const STEP_IN: u8 = 0x40;
    pub const STEP_OUT: u8 = 0x60;
    pub const READ_SECTOR: u8 = 0x80;
    pub const WRITE_SECTOR: u8 = 0xA0;
    pub const READ_ADDRESS: u8 = 0xC0;
    pub const FORCE_INTERRUPT: u8 = 0xD0;
    pub const READ_TRACK: u8 = 0xE0;
    pub const WRITE_TRACK: u8 = 0xF0;

    /// Type I: step rate code (6/12/20/30 ms).
    pub const RATE_MASK: u8 = 0x03;
    /// Type I: verify the head position after the move.
    pub const VERIFY: u8 = 0x04;
    /// Type I: load the head.
    pub const HEAD_LOAD: u8 = 0x08;
    /// Step commands: update the track register.
    pub const UPDATE: u8 = 0x10;
    /// Type II: compare the side with [`SIDE`].
    pub const SIDE_COMPARE: u8 = 0x02;
    /// Type II and III: head settle delay.
    pub const SETTLE: u8 = 0x04;
    /// Type II: expected side.
    pub const SIDE: u8 = 0x08;
    /// Type II: multiple sectors.
    pub const MULTI: u8 = 0x10;
}

const STEP_RATES_MS: [u64; 4] = [6, 12, 20, 30];

/// Longest a wait sleeps before re-checking interrupt and pause state.
const POLL: Duration = Duration::from_millis(1);

/// Restore gives up after this many steps without reaching track 0.
const RESTORE_MAX_STEPS: u16 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandClass {
    TypeI = 1,
    TypeII = 2,
    TypeIII = 3,
    TypeIV = 4,
}

impl CommandClass {
    pub fn of(command: u8) -> Self {
        match command >> 4 {
            0x0..=0x7 => CommandClass::TypeI,
            0x8..=0xB => CommandClass::TypeII,
            0xD => CommandClass::TypeIV,
            _ => CommandClass::TypeIII,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            2 => CommandClass::TypeII,
            3 => CommandClass::TypeIII,
            4 => CommandClass::TypeIV,
            _ => CommandClass::TypeI,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Transfer {
    Idle = 0,
    Read = 1,
    Write = 2,
}

impl Transfer {
    fn of(command: u8) -> Self {
        match command >> 4 {
            0x8 | 0x9 | 0xC | 0xE => Transfer::Read,
            0xA | 0xB | 0xF => Transfer::Write,
            _ => Transfer::Idle,
        }
    }
}

enum Wait {
    Done,
    Interrupted,
    TimedOut,
}

enum Handshake {
    Serviced(u8),
    Lost,
    Interrupted,
}

/// Register file snapshot, read without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdcRegisters {
    pub status: u8,
    pub command: u8,
    pub track: u8,
    pub sector: u8,
    pub data: u8,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct FdcShared {
    status: AtomicU8,
    command: AtomicU8,
    track: AtomicU8,
    sector: AtomicU8,
    data: AtomicU8,

    class: AtomicU8,
    transfer: AtomicU8,
    current_drive: AtomicU8,
    side: AtomicU8,
    direction: AtomicI8,

    interrupt: AtomicBool,
    paused: AtomicBool,
    shutdown: AtomicBool,
    /// The controller asserted the processor hold and owes a release.
    hold_forced: AtomicBool,
    /// A release came due while paused; it is delivered on resume.
    release_deferred: AtomicBool,

    drives: Mutex<[DiskDrive; 2]>,
    signal: Mutex<()>,
    wake: Condvar,

    #[derivative(Debug = "ignore")]
    processor: Weak<dyn Processor>,
    #[derivative(Debug = "ignore")]
    scheduler: Weak<ClockScheduler>,
    config: FdcConfig,
}

impl FdcShared {
    fn signal(&self) -> MutexGuard<'_, ()> {
        self.signal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drives(&self) -> MutexGuard<'_, [DiskDrive; 2]> {
        self.drives.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let _signal = self.signal();
        self.wake.notify_all();
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut DiskDrive) -> R) -> R {
        let index = (self.current_drive.load(Ordering::SeqCst) & 1) as usize;
        let mut drives = self.drives();
        f(&mut drives[index])
    }

    fn status_bits(&self) -> u8 {
        self.status.load(Ordering::SeqCst)
    }

    /// Sets and clears status bits in one compare-and-swap update.
    fn update_status(&self, set: u8, clear: u8) {
        let _ = self
            .status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| Some((s & !clear) | set));
    }

    /// Clears DRQ if it is raised. Exactly one of the processor and the worker
    /// wins this for a given byte.
    fn take_drq(&self) -> bool {
        self.status
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                (s & status::DRQ != 0).then_some(s & !status::DRQ)
            })
            .is_ok()
    }

    fn is_busy(&self) -> bool {
        self.status_bits() & status::BUSY != 0
    }

    fn class(&self) -> CommandClass {
        CommandClass::from_u8(self.class.load(Ordering::SeqCst))
    }

    fn transfer(&self) -> Transfer {
        match self.transfer.load(Ordering::SeqCst) {
            1 => Transfer::Read,
            2 => Transfer::Write,
            _ => Transfer::Idle,
        }
    }

    fn cancelled(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst)
    }

    fn set_processor_hold(&self, hold: bool) {
        if let Some(cpu) = self.processor.upgrade() {
            cpu.hold(hold);
        }
    }

    /// Asserts the hold on every early access. Someone else may have dropped
    /// the hold line since the last one, so a replayed access is held again.
    fn force_hold(&self) {
        tracing::trace!("[FDC] Data register accessed early, holding processor");
        self.set_processor_hold(true);
        self.release_deferred.store(false, Ordering::SeqCst);
        self.hold_forced.store(true, Ordering::SeqCst);

        // DRQ raised between the caller's check and the hold: the worker saw
        // no hold to release, so release it here
        if self.status_bits() & status::DRQ != 0 {
            self.release_hold();
        }
    }

    fn release_hold(&self) {
        if !self.hold_forced.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.paused.load(Ordering::SeqCst) {
            self.release_deferred.store(true, Ordering::SeqCst);
        } else {
            self.set_processor_hold(false);
        }
    }

    // Index pulse and rotation, derived from the scheduler's cycle counter

    /// Clock speed and cycle count, or `None` once the scheduler is gone.
    fn rotation(&self) -> Option<(u64, u64)> {
        let scheduler = self.scheduler.upgrade()?;
        Some((scheduler.clock_speed(), scheduler.cycles()))
    }

    fn index_pulse(&self) -> bool {
        let Some((speed, cycles)) = self.rotation() else {
            return false;
        };
        let revolution = speed * self.config.revolution_ms / 1000;
        if revolution == 0 {
            return false;
        }
        let pulse = speed * self.config.index_pulse_ms / 1000;
        cycles % revolution < pulse
    }

    fn sector_under_head(&self) -> u8 {
        let Some((speed, cycles)) = self.rotation() else {
            return 1;
        };
        let revolution = speed * self.config.revolution_ms / 1000;
        if revolution == 0 {
            return 1;
        }
        let position = cycles % revolution;
        (position * SECTORS_PER_TRACK as u64 / revolution) as u8 + 1
    }

    // Register access

    fn read_status(&self) -> u8 {
        let mut value = self.status_bits();
        let (ready, head_track, write_protected) =
            self.with_current(|d| (d.is_ready(), d.track(), d.is_write_protected()));

        if self.class() == CommandClass::TypeI {
            value &= !(status::INDEX | status::TRACK00 | status::WRITE_PROTECT);
            if ready && self.index_pulse() {
                value |= status::INDEX;
            }
            if head_track == 0 {
                value |= status::TRACK00;
            }
            if write_protected {
                value |= status::WRITE_PROTECT;
            }
        }

        if ready {
            value & !status::NOT_READY
        } else {
            value | status::NOT_READY
        }
    }

    fn read_data(&self) -> u8 {
        if self.transfer() == Transfer::Read {
            if self.status_bits() & status::DRQ != 0 {
                let value = self.data.load(Ordering::SeqCst);
                if self.take_drq() {
                    self.notify();
                    return value;
                }
            }
            self.force_hold();
        }
        self.data.load(Ordering::SeqCst)
    }

    fn write_data(&self, value: u8) {
        if self.transfer() == Transfer::Write {
            if self.status_bits() & status::DRQ != 0 {
                self.data.store(value, Ordering::SeqCst);
                if self.take_drq() {
                    self.notify();
                    return;
                }
            }
            self.data.store(value, Ordering::SeqCst);
            self.force_hold();
            return;
        }
        self.data.store(value, Ordering::SeqCst);
    }

    fn write_command(&self, value: u8) {
        if value & 0xF0 == command::FORCE_INTERRUPT {
            self.force_interrupt();
            return;
        }

        let class = CommandClass::of(value);
        let _signal = self.signal();
        let accepted = self.status.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
            if s & status::BUSY != 0 {
                return None;
            }
            let kept = if class == CommandClass::TypeI {
                s & status::HEAD_LOADED
            } else {
                0
            };
            Some(status::BUSY | kept)
        });

        if accepted.is_err() {
            tracing::debug!("[FDC] Command {:02X} ignored while busy", value);
            return;
        }

        self.interrupt.store(false, Ordering::SeqCst);
        self.command.store(value, Ordering::SeqCst);
        self.class.store(class as u8, Ordering::SeqCst);
        self.transfer.store(Transfer::of(value) as u8, Ordering::SeqCst);
        self.wake.notify_all();
    }

    fn force_interrupt(&self) {
        if self.is_busy() {
            tracing::debug!("[FDC] Force interrupt");
            self.interrupt.store(true, Ordering::SeqCst);
            self.notify();
        } else {
            self.class.store(CommandClass::TypeI as u8, Ordering::SeqCst);
            self.update_status(0, !status::HEAD_LOADED);
        }
    }

    /// Interrupts the running command and waits for the worker to drop BUSY.
    fn interrupt_and_wait(&self) -> bool {
        if !self.is_busy() {
            return true;
        }
        self.force_interrupt();

        let deadline = Instant::now() + self.config.interrupt_wait();
        let mut signal = self.signal();
        while self.is_busy() {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("[FDC] Command did not stop after interrupt");
                return false;
            }
            signal = self
                .wake
                .wait_timeout(signal, (deadline - now).min(POLL))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    // Worker

    fn run(&self) {
        tracing::debug!("[FDC] Worker started");
        while self.wait_for_command() {
            let command = self.command.load(Ordering::SeqCst);
            tracing::debug!("[FDC] Executing command {:02X} ({})", command, self);
            self.execute(command);
            self.finish_command();
        }
        tracing::debug!("[FDC] Worker stopped");
    }

    fn wait_for_command(&self) -> bool {
        let mut signal = self.signal();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            if self.is_busy() {
                return true;
            }
            signal = self
                .wake
                .wait_timeout(signal, POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn finish_command(&self) {
        self.transfer.store(Transfer::Idle as u8, Ordering::SeqCst);
        self.release_hold();
        self.update_status(0, status::BUSY | status::DRQ);
        self.interrupt.store(false, Ordering::SeqCst);
        self.notify();
    }

    fn execute(&self, command: u8) {
        match command >> 4 {
            0x0 => self.restore(command),
            0x1 => self.seek(command),
            0x2..=0x3 => self.step(command, self.direction.load(Ordering::SeqCst)),
            0x4..=0x5 => self.step(command, 1),
            0x6..=0x7 => self.step(command, -1),
            0x8..=0x9 => self.read_sector(command),
            0xA..=0xB => self.write_sector(command),
            0xC => self.read_address(command),
            0xE => self.read_track(),
            0xF => self.write_track(),
            _ => {}
        }
    }

    /// Waits until `done` holds, the command is cancelled or `timeout` of
    /// unpaused time has passed.
    fn wait_for(&self, timeout: Duration, done: impl Fn() -> bool) -> Wait {
        let mut remaining = timeout;
        let mut last = Instant::now();
        let mut signal = self.signal();

        loop {
            if done() {
                return Wait::Done;
            }
            if self.cancelled() {
                return Wait::Interrupted;
            }

            let now = Instant::now();
            if !self.paused.load(Ordering::SeqCst) {
                remaining = remaining.saturating_sub(now - last);
            }
            last = now;
            if remaining.is_zero() {
                return Wait::TimedOut;
            }

            signal = self
                .wake
                .wait_timeout(signal, remaining.min(POLL))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Simulated mechanical delay. Returns `false` when cancelled.
    fn delay(&self, duration: Duration) -> bool {
        !matches!(self.wait_for(duration, || false), Wait::Interrupted)
    }

    // Type I

    fn step_head(&self, direction: i8, command: u8) -> bool {
        self.with_current(|d| d.step(direction));
        let rate = STEP_RATES_MS[(command & command::RATE_MASK) as usize];
        self.delay(Duration::from_millis(rate))
    }

    fn restore(&self, command: u8) {
        let mut steps = 0;
        while self.with_current(|d| d.track()) != 0 {
            if steps == RESTORE_MAX_STEPS {
                self.update_status(status::SEEK_ERROR, 0);
                return;
            }
            if !self.step_head(-1, command) {
                return;
            }
            steps += 1;
        }

        self.direction.store(-1, Ordering::SeqCst);
        self.track.store(0, Ordering::SeqCst);
        self.finish_type1(command);
    }

    fn seek(&self, command: u8) {
        let target = self.data.load(Ordering::SeqCst);
        let current = self.track.load(Ordering::SeqCst);
        let direction: i8 = if target > current { 1 } else { -1 };

        if target != current {
            self.direction.store(direction, Ordering::SeqCst);
        }
        for _ in 0..target.abs_diff(current) {
            if !self.step_head(direction, command) {
                return;
            }
            let track = self.track.load(Ordering::SeqCst);
            self.track
                .store(track.wrapping_add_signed(direction), Ordering::SeqCst);
        }

        self.finish_type1(command);
    }

    fn step(&self, command: u8, direction: i8) {
        self.direction.store(direction, Ordering::SeqCst);
        if !self.step_head(direction, command) {
            return;
        }
        if command & command::UPDATE != 0 {
            let track = self.track.load(Ordering::SeqCst);
            self.track
                .store(track.wrapping_add_signed(direction), Ordering::SeqCst);
        }

        self.finish_type1(command);
    }

    fn finish_type1(&self, command: u8) {
        if command & command::HEAD_LOAD != 0 {
            self.update_status(status::HEAD_LOADED, 0);
        } else {
            self.update_status(0, status::HEAD_LOADED);
        }

        if command & command::VERIFY != 0 {
            self.update_status(status::HEAD_LOADED, 0);
            if !self.delay(self.config.head_settle()) {
                return;
            }

            let (ready, head_track) = self.with_current(|d| (d.is_ready(), d.track()));
            if !ready || head_track != self.track.load(Ordering::SeqCst) {
                tracing::debug!(
                    "[FDC] Verify failed: track register {} head {}",
                    self.track.load(Ordering::SeqCst),
                    head_track
                );
                self.update_status(status::SEEK_ERROR, 0);
            }
        }
    }

    // Type II

    /// Checks that the requested sector exists under the head. Sets the error
    /// flags and returns `false` when it does not.
    fn locate_sector(&self, command: u8, write: bool) -> bool {
        if command & command::SETTLE != 0 && !self.delay(self.config.head_settle()) {
            return false;
        }

        let (ready, head_track, write_protected) =
            self.with_current(|d| (d.is_ready(), d.track(), d.is_write_protected()));
        if !ready {
            return false;
        }
        if write && write_protected {
            self.update_status(status::WRITE_PROTECT, 0);
            return false;
        }

        let track = self.track.load(Ordering::SeqCst);
        let sector = self.sector.load(Ordering::SeqCst);
        let side = self.side.load(Ordering::SeqCst);
        let expected_side = u8::from(command & command::SIDE != 0);
        let side_matches = command & command::SIDE_COMPARE == 0 || expected_side == side;

        if track != head_track || sector == 0 || sector > SECTORS_PER_TRACK || !side_matches {
            tracing::debug!(
                "[FDC] Record not found: track {} (head {}) sector {} side {}",
                track,
                head_track,
                sector,
                side
            );
            self.update_status(status::RECORD_NOT_FOUND, 0);
            return false;
        }

        true
    }

    /// Moves to the next sector of a multi-sector command. Returns `false`
    /// when the track has no further sector.
    fn next_sector(&self, command: u8) -> bool {
        let sector = self.sector.load(Ordering::SeqCst);
        if command & command::MULTI == 0 || sector >= SECTORS_PER_TRACK {
            return false;
        }
        self.sector.store(sector + 1, Ordering::SeqCst);
        true
    }

    fn read_sector(&self, command: u8) {
        if !self.locate_sector(command, false) {
            return;
        }

        loop {
            let track = self.track.load(Ordering::SeqCst);
            let side = self.side.load(Ordering::SeqCst);
            let sector = self.sector.load(Ordering::SeqCst);

            let mut buffer = [0u8; SECTOR_SIZE];
            if let Err(e) = self.with_current(|d| d.read_sector(track, side, sector, &mut buffer)) {
                tracing::warn!("[FDC] Read of T{} S{} side {} failed: {}", track, sector, side, e);
                self.update_status(status::CRC_ERROR, 0);
                return;
            }

            if !self.send_bytes(&buffer) {
                return;
            }
            tracing::trace!("[FDC] Sector T{} S{} side {} read", track, sector, side);

            if !self.next_sector(command) {
                return;
            }
        }
    }

    fn write_sector(&self, command: u8) {
        if !self.locate_sector(command, true) {
            return;
        }

        loop {
            let track = self.track.load(Ordering::SeqCst);
            let side = self.side.load(Ordering::SeqCst);
            let sector = self.sector.load(Ordering::SeqCst);

            let mut buffer = [0u8; SECTOR_SIZE];
            for slot in buffer.iter_mut() {
                match self.receive_byte() {
                    Handshake::Serviced(value) => *slot = value,
                    Handshake::Lost => {
                        self.update_status(status::LOST_DATA, 0);
                        return;
                    }
                    Handshake::Interrupted => return,
                }
            }

            if let Err(e) = self.with_current(|d| d.write_sector(track, side, sector, &buffer)) {
                tracing::warn!("[FDC] Write of T{} S{} side {} failed: {}", track, sector, side, e);
                self.update_status(status::WRITE_FAULT, 0);
                return;
            }
            tracing::trace!("[FDC] Sector T{} S{} side {} written", track, sector, side);

            if !self.next_sector(command) {
                return;
            }
        }
    }

    /// Hands `bytes` to the processor one data request at a time.
    fn send_bytes(&self, bytes: &[u8]) -> bool {
        for &byte in bytes {
            match self.send_byte(byte) {
                Handshake::Serviced(_) => {}
                Handshake::Lost => {
                    self.update_status(status::LOST_DATA, 0);
                    return false;
                }
                Handshake::Interrupted => return false,
            }
        }
        true
    }

    /// Offers one byte. A processor that reads before DRQ is raised is held
    /// (see `read_data`); one that never reads within the handshake deadline
    /// loses the byte.
    fn send_byte(&self, byte: u8) -> Handshake {
        self.data.store(byte, Ordering::SeqCst);
        self.raise_drq();

        match self.wait_for(self.config.handshake_deadline(), || {
            self.status_bits() & status::DRQ == 0
        }) {
            Wait::Done => Handshake::Serviced(byte),
            Wait::Interrupted => Handshake::Interrupted,
            Wait::TimedOut if self.take_drq() => Handshake::Lost,
            Wait::TimedOut => Handshake::Serviced(byte),
        }
    }

    fn receive_byte(&self) -> Handshake {
        self.raise_drq();

        match self.wait_for(self.config.handshake_deadline(), || {
            self.status_bits() & status::DRQ == 0
        }) {
            Wait::Done => Handshake::Serviced(self.data.load(Ordering::SeqCst)),
            Wait::Interrupted => Handshake::Interrupted,
            Wait::TimedOut if self.take_drq() => Handshake::Lost,
            Wait::TimedOut => Handshake::Serviced(self.data.load(Ordering::SeqCst)),
        }
    }

    /// Raises DRQ and lets a processor held on the data register continue.
    fn raise_drq(&self) {
        self.update_status(status::DRQ, 0);
        self.release_hold();
        self.notify();
    }

    // Type III

    fn read_address(&self, command: u8) {
        if command & command::SETTLE != 0 && !self.delay(self.config.head_settle()) {
            return;
        }

        let (ready, head_track) = self.with_current(|d| (d.is_ready(), d.track()));
        if !ready {
            return;
        }

        let id = [
            head_track,
            self.side.load(Ordering::SeqCst),
            self.sector_under_head(),
            SIZE_CODE,
            0x00,
            0x00,
        ];
        if self.send_bytes(&id) {
            self.sector.store(head_track, Ordering::SeqCst);
        }
    }

    fn read_track(&self) {
        tracing::debug!("[FDC] Read track is not supported by the image format");
        self.update_status(status::CRC_ERROR, 0);
    }

    fn write_track(&self) {
        tracing::debug!("[FDC] Write track is not supported by the image format");
        if self.with_current(|d| d.is_write_protected()) {
            self.update_status(status::WRITE_PROTECT, 0);
        } else {
            self.update_status(status::WRITE_FAULT, 0);
        }
    }
}

impl fmt::Display for FdcShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FDC: Status={:02X} Track={} Sector={} Drive={} Side={}",
            self.status_bits(),
            self.track.load(Ordering::SeqCst),
            self.sector.load(Ordering::SeqCst),
            if self.current_drive.load(Ordering::SeqCst) == 0 { "A:" } else { "B:" },
            self.side.load(Ordering::SeqCst)
        )
    }
}

/// The floppy disk controller as a memory mapped device.
pub struct FloppyController {
    shared: Arc<FdcShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FloppyController {
    /// Creates the controller and starts its worker thread.
    pub fn new(
        processor: Arc<dyn Processor>,
        scheduler: Arc<ClockScheduler>,
        config: FdcConfig,
    ) -> anyhow::Result<Self> {
        let shared = Arc::new(FdcShared {
            status: AtomicU8::new(0),
            command: AtomicU8::new(0),
            track: AtomicU8::new(0),
            sector: AtomicU8::new(1),
            data: AtomicU8::new(0),
            class: AtomicU8::new(CommandClass::TypeI as u8),
            transfer: AtomicU8::new(Transfer::Idle as u8),
            current_drive: AtomicU8::new(Drive::A as u8),
            side: AtomicU8::new(0),
            direction: AtomicI8::new(1),
            interrupt: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            hold_forced: AtomicBool::new(false),
            release_deferred: AtomicBool::new(false),
            drives: Mutex::new([DiskDrive::new(Drive::A), DiskDrive::new(Drive::B)]),
            signal: Mutex::new(()),
            wake: Condvar::new(),
            processor: Arc::downgrade(&processor),
            scheduler: Arc::downgrade(&scheduler),
            config,
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("fdc-worker".into())
            .spawn(move || worker_shared.run())
            .context("Unable to spawn the FDC worker thread")?;

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn registers(&self) -> FdcRegisters {
        let shared = &self.shared;
        FdcRegisters {
            status: shared.read_status(),
            command: shared.command.load(Ordering::SeqCst),
            track: shared.track.load(Ordering::SeqCst),
            sector: shared.sector.load(Ordering::SeqCst),
            data: shared.data.load(Ordering::SeqCst),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.shared.is_busy()
    }

    pub fn command_class(&self) -> CommandClass {
        self.shared.class()
    }

    /// Whether the controller currently holds the processor on the data
    /// register. Whoever else drives the hold line must not release it.
    pub fn holds_processor(&self) -> bool {
        self.shared.hold_forced.load(Ordering::SeqCst)
    }

    /// Interrupts the running command, waiting a bounded time for it to stop.
    pub fn force_interrupt(&self) -> bool {
        self.shared.interrupt_and_wait()
    }

    /// Opens `path` in `drive`. The disk is write protected when requested or
    /// when the file cannot be written.
    pub fn insert_disk<P: AsRef<Path>>(
        &self,
        drive: Drive,
        path: P,
        write_protect: bool,
    ) -> Result<(), DiskError> {
        self.interrupt_if_current(drive)?;

        let mut drives = self.shared.drives();
        let target = &mut drives[drive.index()];
        if target.is_ready() {
            target.eject()?;
        }
        target.insert(path.as_ref(), write_protect)
    }

    pub fn eject_disk(&self, drive: Drive) -> Result<(), DiskError> {
        self.interrupt_if_current(drive)?;
        self.shared.drives()[drive.index()].eject()
    }

    fn interrupt_if_current(&self, drive: Drive) -> Result<(), DiskError> {
        if self.current_drive() == drive && !self.shared.interrupt_and_wait() {
            tracing::warn!("[FDC] Drive {} is still busy, disk left in place", drive);
            return Err(DiskError::Busy);
        }
        Ok(())
    }

    pub fn is_ready(&self, drive: Drive) -> bool {
        self.shared.drives()[drive.index()].is_ready()
    }

    pub fn is_write_protected(&self, drive: Drive) -> bool {
        self.shared.drives()[drive.index()].is_write_protected()
    }

    /// Physical head position of `drive`.
    pub fn head_track(&self, drive: Drive) -> u8 {
        self.shared.drives()[drive.index()].track()
    }

    /// Drive control latch: bit 0 selects drive B, bit 1 selects side 1.
    pub fn drive_control(&self, value: u8) {
        self.shared
            .current_drive
            .store(value & 0x01, Ordering::SeqCst);
        self.shared
            .side
            .store((value >> 1) & 0x01, Ordering::SeqCst);
    }

    pub fn drive_control_value(&self) -> u8 {
        self.shared.current_drive.load(Ordering::SeqCst) | (self.side() << 1)
    }

    pub fn select_drive(&self, drive: Drive) {
        self.shared
            .current_drive
            .store(drive as u8, Ordering::SeqCst);
    }

    pub fn current_drive(&self) -> Drive {
        if self.shared.current_drive.load(Ordering::SeqCst) == 0 {
            Drive::A
        } else {
            Drive::B
        }
    }

    pub fn select_side(&self, side: u8) {
        self.shared.side.store(side & 0x01, Ordering::SeqCst);
    }

    pub fn side(&self) -> u8 {
        self.shared.side.load(Ordering::SeqCst)
    }
}

impl MemoryUnit for FloppyController {
    fn storage_size(&self) -> usize {
        REGISTER_COUNT
    }

    fn read_byte(&self, offset: u16) -> Option<u8> {
        let shared = &self.shared;
        match offset {
            REG_STATUS => Some(shared.read_status()),
            REG_TRACK => Some(shared.track.load(Ordering::SeqCst)),
            REG_SECTOR => Some(shared.sector.load(Ordering::SeqCst)),
            REG_DATA => Some(shared.read_data()),
            _ => None,
        }
    }

    fn debug_read_byte(&self, offset: u16) -> Option<u8> {
        let shared = &self.shared;
        match offset {
            REG_STATUS => Some(shared.read_status()),
            REG_TRACK => Some(shared.track.load(Ordering::SeqCst)),
            REG_SECTOR => Some(shared.sector.load(Ordering::SeqCst)),
            REG_DATA => Some(shared.data.load(Ordering::SeqCst)),
            _ => None,
        }
    }

    fn write_byte(&self, offset: u16, value: u8) {
        let shared = &self.shared;
        match offset {
            REG_COMMAND => shared.write_command(value),
            REG_TRACK => shared.track.store(value, Ordering::SeqCst),
            REG_SECTOR => shared.sector.store(value, Ordering::SeqCst),
            REG_DATA => shared.write_data(value),
            _ => {}
        }
    }

    /// Interrupts any command, selects drive A side 0 and restores the head.
    fn reset(&self, clear: bool) {
        let shared = &self.shared;
        if !shared.interrupt_and_wait() {
            tracing::warn!("[FDC] Reset while a command is still running");
        }

        self.drive_control(0);
        if clear {
            shared.track.store(0, Ordering::SeqCst);
            shared.sector.store(1, Ordering::SeqCst);
            shared.data.store(0, Ordering::SeqCst);
            shared.update_status(0, !status::BUSY);
        }
        shared.write_command(command::RESTORE | 0x03);
    }

    fn pause(&self, paused: bool) {
        let shared = &self.shared;
        shared.paused.store(paused, Ordering::SeqCst);
        if !paused && shared.release_deferred.swap(false, Ordering::SeqCst) {
            shared.set_processor_hold(false);
        }
        shared.notify();
    }

    fn close(&self) {
        let shared = &self.shared;
        {
            let _signal = shared.signal();
            shared.shutdown.store(true, Ordering::SeqCst);
            shared.wake.notify_all();
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("[FDC] Worker thread panicked");
            }
        }
        let owed = shared.hold_forced.swap(false, Ordering::SeqCst);
        if shared.release_deferred.swap(false, Ordering::SeqCst) || owed {
            shared.set_processor_hold(false);
        }

        for drive in shared.drives().iter_mut().filter(|d| d.is_ready()) {
            if let Err(e) = drive.eject() {
                tracing::warn!("[FDC] Eject on close failed: {}", e);
            }
        }
    }
}

impl PartialEq for FloppyController {
    /// Controllers are equal when they serve the same processor and scheduler.
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(
            self.shared.processor.as_ptr() as *const (),
            other.shared.processor.as_ptr() as *const (),
        ) && Weak::ptr_eq(&self.shared.scheduler, &other.shared.scheduler)
    }
}

impl Drop for FloppyController {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for FloppyController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.shared, f)
    }
}

impl fmt::Debug for FloppyController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FloppyController")
            .field("shared", &self.shared)
            .finish()
    }
}

/// One byte drive/side select latch for the controller.
#[derive(Debug)]
pub struct FdcControlPort {
    fdc: Arc<FloppyController>,
}

impl FdcControlPort {
    pub fn new(fdc: Arc<FloppyController>) -> Self {
        Self { fdc }
    }
}

impl MemoryUnit for FdcControlPort {
    fn storage_size(&self) -> usize {
        1
    }

    fn read_byte(&self, _offset: u16) -> Option<u8> {
        Some(self.fdc.drive_control_value())
    }

    fn write_byte(&self, _offset: u16, value: u8) {
        self.fdc.drive_control(value);
    }
}
