mod common;

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use common::{pattern, patterned_image, temp_path, wait_until, MockCpu};
use hwcore::{
    dsk_image::{self, SECTOR_SIZE},
    fdc::{command, status, CommandClass, REG_COMMAND, REG_DATA, REG_SECTOR, REG_STATUS, REG_TRACK},
    ClockConfig, ClockScheduler, ClockedUnit, DiskError, Drive, FdcConfig, FdcControlPort,
    FloppyController, MemoryUnit, Processor,
};
use tracing_subscriber::fmt;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    let fmt_subscriber = fmt::Subscriber::builder()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(fmt_subscriber)
        .expect("Unable to set global tracing subscriber");
}

struct Fixture {
    cpu: Arc<MockCpu>,
    scheduler: Arc<ClockScheduler>,
    fdc: FloppyController,
    image: Option<PathBuf>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_config(FdcConfig {
            handshake_deadline_ms: 1000,
            head_settle_ms: 1,
            ..FdcConfig::default()
        })
    }

    fn with_config(config: FdcConfig) -> Self {
        Self::with_clock(config, ClockConfig::default())
    }

    fn with_clock(config: FdcConfig, clock: ClockConfig) -> Self {
        let cpu = Arc::new(MockCpu::new(4));
        let scheduler = Arc::new(ClockScheduler::new(clock));
        let fdc = FloppyController::new(cpu.clone(), scheduler.clone(), config).unwrap();
        Self {
            cpu,
            scheduler,
            fdc,
            image: None,
        }
    }

    fn with_disk(mut self, name: &str, write_protect: bool) -> Self {
        let path = patterned_image(name);
        self.fdc.insert_disk(Drive::A, &path, write_protect).unwrap();
        self.image = Some(path);
        self
    }

    fn image(&self) -> &Path {
        self.image.as_deref().unwrap()
    }

    fn status(&self) -> u8 {
        self.fdc.read_byte(REG_STATUS).unwrap()
    }

    fn track(&self) -> u8 {
        self.fdc.read_byte(REG_TRACK).unwrap()
    }

    fn sector(&self) -> u8 {
        self.fdc.read_byte(REG_SECTOR).unwrap()
    }

    /// Issues `cmd` and waits for it to complete.
    fn run(&self, cmd: u8) -> u8 {
        self.fdc.write_byte(REG_COMMAND, cmd);
        assert!(wait_until(|| !self.fdc.is_busy()), "command {:02X} hung", cmd);
        self.status()
    }

    fn seek(&self, track: u8) -> u8 {
        self.fdc.write_byte(REG_DATA, track);
        self.run(command::SEEK)
    }

    fn read_bytes(&self, count: usize) -> Vec<u8> {
        (0..count)
            .map(|_| {
                assert!(wait_until(|| self.status() & status::DRQ != 0));
                self.fdc.read_byte(REG_DATA).unwrap()
            })
            .collect()
    }

    fn write_bytes(&self, bytes: &[u8]) {
        for &byte in bytes {
            assert!(wait_until(|| self.status() & status::DRQ != 0));
            self.fdc.write_byte(REG_DATA, byte);
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.fdc.close();
        if let Some(path) = &self.image {
            let _ = fs::remove_file(path);
        }
    }
}

fn image_bytes(path: &Path, track: u8, side: u8, sector: u8) -> Vec<u8> {
    let offset = dsk_image::sector_offset(track, side, sector).unwrap() as usize;
    fs::read(path).unwrap()[offset..offset + SECTOR_SIZE].to_vec()
}

#[test]
fn test_initial_state() {
    let fixture = Fixture::new();
    assert_eq!(fixture.status() & status::NOT_READY, status::NOT_READY);
    assert_eq!(fixture.status() & status::TRACK00, status::TRACK00);
    assert_eq!(fixture.track(), 0);
    assert_eq!(fixture.sector(), 1);
    assert_eq!(fixture.fdc.command_class(), CommandClass::TypeI);
}

#[test]
fn test_bad_size_image_rejected() {
    let fixture = Fixture::new();
    let path = temp_path("short");
    fs::write(&path, vec![0u8; 1000]).unwrap();

    let result = fixture.fdc.insert_disk(Drive::A, &path, false);
    assert!(matches!(result, Err(DiskError::InvalidSize { len: 1000, .. })));
    assert!(!fixture.fdc.is_ready(Drive::A));
    assert_ne!(fixture.status() & status::NOT_READY, 0);

    fs::remove_file(&path).unwrap();
}

#[test]
fn test_missing_image_rejected() {
    let fixture = Fixture::new();
    let result = fixture.fdc.insert_disk(Drive::B, temp_path("missing"), false);
    assert!(matches!(result, Err(DiskError::Io(_))));
    assert!(!fixture.fdc.is_ready(Drive::B));
}

#[test]
fn test_insert_and_eject() {
    let fixture = Fixture::new().with_disk("insert", false);
    assert!(fixture.fdc.is_ready(Drive::A));
    assert_eq!(fixture.status() & status::NOT_READY, 0);
    assert_eq!(fixture.status() & status::WRITE_PROTECT, 0);

    fixture.fdc.eject_disk(Drive::A).unwrap();
    assert!(!fixture.fdc.is_ready(Drive::A));
    assert!(matches!(fixture.fdc.eject_disk(Drive::A), Err(DiskError::NoDisk)));
}

#[test]
fn test_write_protect_requested() {
    let fixture = Fixture::new().with_disk("protected", true);
    assert!(fixture.fdc.is_write_protected(Drive::A));
    assert_ne!(fixture.status() & status::WRITE_PROTECT, 0);
}

#[test]
fn test_read_only_file_is_write_protected() {
    let fixture = Fixture::new();
    let path = patterned_image("readonly");
    let mut permissions = fs::metadata(&path).unwrap().permissions();
    permissions.set_readonly(true);
    fs::set_permissions(&path, permissions).unwrap();

    fixture.fdc.insert_disk(Drive::A, &path, false).unwrap();
    assert!(fixture.fdc.is_write_protected(Drive::A));
    assert_ne!(fixture.status() & status::WRITE_PROTECT, 0);

    fixture.fdc.eject_disk(Drive::A).unwrap();
    let _ = fs::remove_file(&path);
}

#[test]
fn test_restore_returns_to_track_zero() {
    let fixture = Fixture::new().with_disk("restore", false);
    fixture.seek(5);
    assert_eq!(fixture.fdc.head_track(Drive::A), 5);

    let st = fixture.run(command::RESTORE | command::HEAD_LOAD | command::VERIFY);
    assert_eq!(fixture.track(), 0);
    assert_eq!(fixture.fdc.head_track(Drive::A), 0);
    assert_eq!(st & status::SEEK_ERROR, 0);
    assert_ne!(st & status::TRACK00, 0);
    assert_ne!(st & status::HEAD_LOADED, 0);
}

#[test]
fn test_seek_to_current_track_does_nothing() {
    let fixture = Fixture::new().with_disk("seek-same", false);
    let st = fixture.seek(0);
    assert_eq!(fixture.track(), 0);
    assert_eq!(fixture.fdc.head_track(Drive::A), 0);
    assert_eq!(st & (status::SEEK_ERROR | status::CRC_ERROR | status::BUSY), 0);
}

#[test]
fn test_seek_with_verify_detects_mismatch() {
    let fixture = Fixture::new().with_disk("verify", false);
    fixture.fdc.write_byte(REG_TRACK, 5);

    let st = fixture.run(command::STEP_IN | command::UPDATE | command::VERIFY);
    assert_eq!(fixture.track(), 6);
    assert_eq!(fixture.fdc.head_track(Drive::A), 1);
    assert_ne!(st & status::SEEK_ERROR, 0);
}

#[test]
fn test_step_repeats_last_direction() {
    let fixture = Fixture::new().with_disk("step", false);
    fixture.run(command::STEP_IN | command::UPDATE);
    fixture.run(command::STEP_IN | command::UPDATE);
    fixture.run(command::STEP | command::UPDATE);
    assert_eq!(fixture.track(), 3);

    fixture.run(command::STEP_OUT | command::UPDATE);
    fixture.run(command::STEP | command::UPDATE);
    assert_eq!(fixture.track(), 1);
    assert_eq!(fixture.fdc.head_track(Drive::A), 1);

    // without the update flag only the head moves
    fixture.run(command::STEP_IN);
    assert_eq!(fixture.track(), 1);
    assert_eq!(fixture.fdc.head_track(Drive::A), 2);
}

#[test]
fn test_read_sector_after_seek() {
    let fixture = Fixture::new().with_disk("read", false);
    fixture.seek(3);
    assert_eq!(fixture.track(), 3);

    fixture.fdc.write_byte(REG_SECTOR, 1);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    let data = fixture.read_bytes(SECTOR_SIZE);
    assert!(wait_until(|| !fixture.fdc.is_busy()));

    let offset = SECTOR_SIZE * 5 * 6;
    let expected: Vec<u8> = (offset..offset + SECTOR_SIZE).map(pattern).collect();
    assert_eq!(data, expected);
    assert_eq!(data, image_bytes(fixture.image(), 3, 0, 1));

    let st = fixture.status();
    assert_eq!(
        st & (status::RECORD_NOT_FOUND | status::CRC_ERROR | status::LOST_DATA | status::DRQ),
        0
    );
}

#[test]
fn test_read_sector_on_wrong_track() {
    let fixture = Fixture::new().with_disk("rnf", false);
    fixture.fdc.write_byte(REG_TRACK, 2);
    fixture.fdc.write_byte(REG_SECTOR, 1);

    let st = fixture.run(command::READ_SECTOR);
    assert_ne!(st & status::RECORD_NOT_FOUND, 0);
    assert_eq!(st & status::DRQ, 0);
}

#[test]
fn test_read_sector_side_compare() {
    let fixture = Fixture::new().with_disk("side", false);
    fixture.fdc.write_byte(REG_SECTOR, 1);

    let st = fixture.run(command::READ_SECTOR | command::SIDE_COMPARE | command::SIDE);
    assert_ne!(st & status::RECORD_NOT_FOUND, 0);
}

#[test]
fn test_read_sector_without_disk() {
    let fixture = Fixture::new();
    let st = fixture.run(command::READ_SECTOR);
    assert_ne!(st & status::NOT_READY, 0);
    assert_eq!(st & status::DRQ, 0);
}

#[test]
fn test_multi_sector_read_stops_at_track_end() {
    let fixture = Fixture::new().with_disk("multi", false);
    fixture.fdc.write_byte(REG_SECTOR, 4);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR | command::MULTI);

    let data = fixture.read_bytes(2 * SECTOR_SIZE);
    assert!(wait_until(|| !fixture.fdc.is_busy()));

    assert_eq!(data[..SECTOR_SIZE], image_bytes(fixture.image(), 0, 0, 4)[..]);
    assert_eq!(data[SECTOR_SIZE..], image_bytes(fixture.image(), 0, 0, 5)[..]);
    assert_eq!(fixture.sector(), 5);
    assert_eq!(fixture.status() & status::RECORD_NOT_FOUND, 0);
}

#[test]
fn test_write_sector() {
    let fixture = Fixture::new().with_disk("write", false);
    fixture.fdc.select_side(1);
    fixture.fdc.write_byte(REG_SECTOR, 2);
    fixture.fdc.write_byte(REG_COMMAND, command::WRITE_SECTOR);

    let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 7) as u8).collect();
    fixture.write_bytes(&data);
    assert!(wait_until(|| !fixture.fdc.is_busy()));

    let st = fixture.status();
    assert_eq!(st & (status::WRITE_FAULT | status::LOST_DATA | status::WRITE_PROTECT), 0);
    assert_eq!(image_bytes(fixture.image(), 0, 1, 2), data);
    assert_eq!(image_bytes(fixture.image(), 0, 0, 2)[0], pattern(SECTOR_SIZE));
}

#[test]
fn test_write_to_protected_disk() {
    let fixture = Fixture::new().with_disk("write-protected", true);
    let before = fs::read(fixture.image()).unwrap();

    let st = fixture.run(command::WRITE_SECTOR);
    assert_ne!(st & status::WRITE_PROTECT, 0);
    assert_eq!(st & status::DRQ, 0);
    assert_eq!(fs::read(fixture.image()).unwrap(), before);
}

#[test]
fn test_unserviced_transfer_loses_data() {
    let fixture = Fixture::with_config(FdcConfig {
        handshake_deadline_ms: 20,
        head_settle_ms: 1,
        ..FdcConfig::default()
    })
    .with_disk("lost", false);

    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    assert!(wait_until(|| !fixture.fdc.is_busy()));
    assert_ne!(fixture.status() & status::LOST_DATA, 0);
    assert_eq!(fixture.status() & status::DRQ, 0);
}

#[test]
fn test_early_data_access_holds_processor() {
    let fixture = Fixture::with_config(FdcConfig {
        handshake_deadline_ms: 1000,
        head_settle_ms: 200,
        ..FdcConfig::default()
    })
    .with_disk("hold", false);

    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR | command::SETTLE);
    fixture.fdc.read_byte(REG_DATA);
    assert!(fixture.cpu.is_held());
    assert_eq!(fixture.cpu.holds.load(Ordering::SeqCst), 1);

    // raising DRQ lets the processor replay its access
    assert!(wait_until(|| !fixture.cpu.is_held()));
    assert_ne!(fixture.status() & status::DRQ, 0);
    assert_eq!(fixture.fdc.read_byte(REG_DATA), Some(pattern(0)));

    assert!(fixture.fdc.force_interrupt());
}

#[test]
fn test_force_interrupt_stops_transfer() {
    let fixture = Fixture::new().with_disk("interrupt", false);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    assert!(wait_until(|| fixture.status() & status::DRQ != 0));

    fixture.fdc.write_byte(REG_COMMAND, command::FORCE_INTERRUPT);
    assert!(wait_until(|| !fixture.fdc.is_busy()));
    assert_eq!(fixture.status() & (status::LOST_DATA | status::DRQ), 0);
}

#[test]
fn test_force_interrupt_when_idle() {
    let fixture = Fixture::new().with_disk("idle-interrupt", false);
    fixture.fdc.write_byte(REG_SECTOR, 1);
    fixture.run(command::READ_SECTOR | command::SIDE_COMPARE | command::SIDE);
    assert_eq!(fixture.fdc.command_class(), CommandClass::TypeII);

    fixture.fdc.write_byte(REG_COMMAND, command::FORCE_INTERRUPT);
    assert!(!fixture.fdc.is_busy());
    assert_eq!(fixture.fdc.command_class(), CommandClass::TypeI);
    assert_ne!(fixture.status() & status::TRACK00, 0);
}

#[test]
fn test_read_address() {
    let fixture = Fixture::new().with_disk("address", false);
    fixture.seek(3);

    fixture.fdc.write_byte(REG_COMMAND, command::READ_ADDRESS);
    let id = fixture.read_bytes(6);
    assert!(wait_until(|| !fixture.fdc.is_busy()));

    assert_eq!(id[0], 3);
    assert_eq!(id[1], 0);
    assert!((1..=5).contains(&id[2]));
    assert_eq!(id[3], dsk_image::SIZE_CODE);
    assert_eq!(&id[4..], &[0, 0]);
    assert_eq!(fixture.sector(), 3);
}

#[test]
fn test_track_commands_fault() {
    let fixture = Fixture::new().with_disk("track", false);
    assert_ne!(fixture.run(command::READ_TRACK) & status::CRC_ERROR, 0);
    assert_ne!(fixture.run(command::WRITE_TRACK) & status::WRITE_FAULT, 0);

    let protected = Fixture::new().with_disk("track-protected", true);
    assert_ne!(protected.run(command::WRITE_TRACK) & status::WRITE_PROTECT, 0);
}

#[test]
fn test_reset_restores_head() {
    let fixture = Fixture::new().with_disk("reset", false);
    fixture.seek(4);
    fixture.fdc.drive_control(0x03);
    fixture.fdc.write_byte(REG_SECTOR, 5);

    fixture.fdc.reset(true);
    assert!(wait_until(|| !fixture.fdc.is_busy()));

    assert_eq!(fixture.fdc.current_drive(), Drive::A);
    assert_eq!(fixture.fdc.side(), 0);
    assert_eq!(fixture.track(), 0);
    assert_eq!(fixture.sector(), 1);
    assert_eq!(fixture.fdc.head_track(Drive::A), 0);
}

#[test]
fn test_control_port_selects_drive_and_side() {
    let fixture = Fixture::new();
    let fdc = Arc::new(FloppyController::new(
        fixture.cpu.clone(),
        fixture.scheduler.clone(),
        FdcConfig::default(),
    )
    .unwrap());
    let port = FdcControlPort::new(fdc.clone());

    port.write_byte(0, 0x03);
    assert_eq!(fdc.current_drive(), Drive::B);
    assert_eq!(fdc.side(), 1);
    assert_eq!(port.read_byte(0), Some(0x03));

    fdc.select_drive(Drive::A);
    assert_eq!(port.read_byte(0), Some(0x02));
}

#[test]
fn test_debug_read_keeps_drq() {
    let fixture = Fixture::new().with_disk("debug-read", false);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    assert!(wait_until(|| fixture.status() & status::DRQ != 0));

    assert_eq!(fixture.fdc.debug_read_byte(REG_DATA), Some(pattern(0)));
    assert_ne!(fixture.status() & status::DRQ, 0);
    assert!(fixture.fdc.force_interrupt());
}

#[test]
fn test_equality_by_collaborators() {
    let a = Fixture::new();
    let same = FloppyController::new(a.cpu.clone(), a.scheduler.clone(), FdcConfig::default())
        .unwrap();
    let other = FloppyController::new(
        a.cpu.clone(),
        Arc::new(ClockScheduler::default()),
        FdcConfig::default(),
    )
    .unwrap();

    assert!(a.fdc == same);
    assert!(a.fdc != other);
}

#[test]
fn test_drive_numbers() {
    assert_eq!(Drive::from_index(1).unwrap(), Drive::B);
    assert!(matches!(Drive::from_index(2), Err(DiskError::InvalidDrive(2))));
    assert_eq!(Drive::B.to_string(), "B:");
}

fn slow_settle(settle_ms: u64) -> FdcConfig {
    FdcConfig {
        handshake_deadline_ms: 1000,
        head_settle_ms: settle_ms,
        ..FdcConfig::default()
    }
}

#[test]
fn test_replayed_early_access_is_held_again() {
    let fixture = Fixture::with_config(slow_settle(300)).with_disk("replay", false);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR | command::SETTLE);

    fixture.fdc.read_byte(REG_DATA);
    assert!(fixture.cpu.is_held());
    assert!(fixture.fdc.holds_processor());

    // a resume or single step drops the hold line behind the controller's back
    fixture.cpu.hold(false);
    fixture.fdc.read_byte(REG_DATA);
    assert!(fixture.cpu.is_held());
    assert_eq!(fixture.cpu.holds.load(Ordering::SeqCst), 2);

    assert!(wait_until(|| !fixture.cpu.is_held()));
    assert!(!fixture.fdc.holds_processor());
    assert_eq!(fixture.fdc.read_byte(REG_DATA), Some(pattern(0)));
    assert!(fixture.fdc.force_interrupt());
}

#[test]
fn test_release_while_paused_waits_for_resume() {
    let fixture = Fixture::with_config(slow_settle(300)).with_disk("deferred", false);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR | command::SETTLE);
    fixture.fdc.read_byte(REG_DATA);
    assert!(fixture.cpu.is_held());

    fixture.fdc.pause(true);
    assert!(fixture.fdc.force_interrupt());
    assert!(fixture.cpu.is_held());

    fixture.fdc.pause(false);
    assert!(!fixture.cpu.is_held());
    assert!(!fixture.fdc.holds_processor());
}

#[test]
fn test_index_pulse_follows_cycle_counter() {
    // one cycle per pulse, 200 cycles per revolution, 4 cycle index pulse
    let clock = ClockConfig {
        frequency_hz: 1_000,
        pulse_nanos: 1_000_000,
    };

    let empty = Fixture::with_clock(FdcConfig::default(), clock);
    assert_eq!(empty.status() & status::INDEX, 0);

    let fixture = Fixture::with_clock(FdcConfig::default(), clock).with_disk("index", false);
    assert_ne!(fixture.status() & status::INDEX, 0);

    for _ in 0..4 {
        fixture.scheduler.step_pulse();
    }
    assert_eq!(fixture.scheduler.cycles(), 4);
    assert_eq!(fixture.status() & status::INDEX, 0);

    for _ in 4..200 {
        fixture.scheduler.step_pulse();
    }
    assert_ne!(fixture.status() & status::INDEX, 0);
}

#[test]
fn test_eject_during_transfer_stops_command() {
    let fixture = Fixture::new().with_disk("eject-busy", false);
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    assert!(wait_until(|| fixture.status() & status::DRQ != 0));

    fixture.fdc.eject_disk(Drive::A).unwrap();
    assert!(!fixture.fdc.is_busy());
    assert!(!fixture.fdc.is_ready(Drive::A));
    assert_eq!(fixture.status() & status::LOST_DATA, 0);
}

#[test]
fn test_insert_during_transfer_stops_command() {
    let fixture = Fixture::new().with_disk("insert-busy", false);
    let replacement = patterned_image("insert-busy-new");
    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    assert!(wait_until(|| fixture.status() & status::DRQ != 0));

    fixture.fdc.insert_disk(Drive::A, &replacement, true).unwrap();
    assert!(!fixture.fdc.is_busy());
    assert!(fixture.fdc.is_ready(Drive::A));
    assert!(fixture.fdc.is_write_protected(Drive::A));
    assert_eq!(fixture.status() & status::LOST_DATA, 0);

    fixture.fdc.eject_disk(Drive::A).unwrap();
    let _ = fs::remove_file(&replacement);
}

/// Processor whose hold release blocks until `gate` opens, which keeps the
/// controller's worker from reaching its next interrupt check.
#[derive(Default)]
struct StuckCpu {
    gate: AtomicBool,
    releasing: AtomicBool,
}

impl ClockedUnit for StuckCpu {
    fn cycle(&self) -> bool {
        true
    }
}

impl Processor for StuckCpu {
    fn hold(&self, hold: bool) {
        if hold {
            return;
        }
        self.releasing.store(true, Ordering::SeqCst);
        while !self.gate.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn is_hold_acknowledge(&self) -> bool {
        false
    }

    fn pause_memory_units(&self, _paused: bool) {}
}

#[test]
fn test_eject_fails_when_command_cannot_stop() {
    let cpu = Arc::new(StuckCpu::default());
    let scheduler = Arc::new(ClockScheduler::default());
    let fdc = FloppyController::new(
        cpu.clone(),
        scheduler.clone(),
        FdcConfig {
            handshake_deadline_ms: 1000,
            head_settle_ms: 50,
            interrupt_wait_ms: 50,
            ..FdcConfig::default()
        },
    )
    .unwrap();
    let path = patterned_image("stuck");
    fdc.insert_disk(Drive::A, &path, false).unwrap();

    fdc.write_byte(REG_COMMAND, command::READ_SECTOR | command::SETTLE);
    fdc.read_byte(REG_DATA);
    assert!(wait_until(|| cpu.releasing.load(Ordering::SeqCst)));

    assert!(matches!(fdc.eject_disk(Drive::A), Err(DiskError::Busy)));
    assert!(fdc.is_ready(Drive::A));

    cpu.gate.store(true, Ordering::SeqCst);
    assert!(wait_until(|| !fdc.is_busy()));
    fdc.eject_disk(Drive::A).unwrap();

    drop(fdc);
    let _ = fs::remove_file(&path);
}

#[test]
fn test_paused_controller_does_not_lose_data() {
    let fixture = Fixture::with_config(FdcConfig {
        handshake_deadline_ms: 50,
        head_settle_ms: 1,
        ..FdcConfig::default()
    })
    .with_disk("paused", false);

    fixture.fdc.write_byte(REG_COMMAND, command::READ_SECTOR);
    assert!(wait_until(|| fixture.status() & status::DRQ != 0));
    fixture.fdc.pause(true);

    thread::sleep(Duration::from_millis(200));
    assert!(fixture.fdc.is_busy());
    assert_eq!(fixture.status() & status::LOST_DATA, 0);
    assert_ne!(fixture.status() & status::DRQ, 0);

    fixture.fdc.pause(false);
    assert!(wait_until(|| !fixture.fdc.is_busy()));
    assert_ne!(fixture.status() & status::LOST_DATA, 0);
}
