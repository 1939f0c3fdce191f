#![allow(dead_code)]

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use hwcore::{dsk_image::IMAGE_SIZE, AddressSpace, ClockedUnit, Processor};

/// Processor stand-in: every instruction takes `cycles_per_instruction`
/// cycles and nothing runs while the hold is asserted.
pub struct MockCpu {
    pub cycles: AtomicU64,
    pub instructions: AtomicU64,
    pub cycles_per_instruction: u64,
    pub holds: AtomicUsize,
    pub memory_paused: AtomicBool,
    held: AtomicBool,
    memory: Option<Arc<AddressSpace>>,
}

impl MockCpu {
    pub fn new(cycles_per_instruction: u64) -> Self {
        Self {
            cycles: AtomicU64::new(0),
            instructions: AtomicU64::new(0),
            cycles_per_instruction,
            holds: AtomicUsize::new(0),
            memory_paused: AtomicBool::new(false),
            held: AtomicBool::new(false),
            memory: None,
        }
    }

    pub fn with_memory(cycles_per_instruction: u64, memory: Arc<AddressSpace>) -> Self {
        Self {
            memory: Some(memory),
            ..Self::new(cycles_per_instruction)
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl ClockedUnit for MockCpu {
    fn cycle(&self) -> bool {
        if self.is_held() {
            return true;
        }

        let cycles = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        if cycles % self.cycles_per_instruction == 0 {
            self.instructions.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }
}

impl Processor for MockCpu {
    fn hold(&self, hold: bool) {
        if hold {
            self.holds.fetch_add(1, Ordering::SeqCst);
        }
        self.held.store(hold, Ordering::SeqCst);
    }

    fn is_hold_acknowledge(&self) -> bool {
        self.is_held()
    }

    fn pause_memory_units(&self, paused: bool) {
        self.memory_paused.store(paused, Ordering::SeqCst);
        if let Some(memory) = &self.memory {
            memory.pause(paused);
        }
    }
}

#[derive(Default)]
pub struct Counter(pub AtomicU64);

impl Counter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

impl ClockedUnit for Counter {
    fn cycle(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Polls `condition` for up to two seconds.
pub fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::yield_now();
    }
    condition()
}

/// A path under the temp dir that no other test uses.
pub fn temp_path(name: &str) -> PathBuf {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let id = NEXT.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("hwcore-{}-{}-{}.dsk", std::process::id(), name, id))
}

/// Byte stored at `offset` by [`patterned_image`].
pub fn pattern(offset: usize) -> u8 {
    (offset % 251) as u8 ^ (offset / 1024) as u8
}

/// Writes a full size image whose every sector has distinct contents.
pub fn patterned_image(name: &str) -> PathBuf {
    let path = temp_path(name);
    let data: Vec<u8> = (0..IMAGE_SIZE as usize).map(pattern).collect();
    std::fs::write(&path, data).expect("Unable to write test image");
    path
}
