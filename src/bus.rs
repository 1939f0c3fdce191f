use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

/// Maximum number of address ranges the bus accepts.
pub const MAX_RANGES: usize = 50;

/// Size of the processor's address space.
pub const ADDRESS_SPACE_SIZE: usize = 0x10000;

/// Value read from addresses nobody answers for.
pub const FLOATING_BUS: u8 = 0xFF;

/// A byte-addressable device mapped into the address space.
///
/// Offsets are relative to the address the unit was registered at. All
/// methods take `&self`; units shared between the processor and a debugger
/// keep their state behind interior mutability.
pub trait MemoryUnit: Send + Sync {
    fn storage_size(&self) -> usize;

    /// Live read. `None` means the unit has no data for this offset and the
    /// bus should ask the next unit covering the address.
    fn read_byte(&self, offset: u16) -> Option<u8>;

    /// Read without the side effects a live read may have (flag clearing,
    /// hold release, ...).
    fn debug_read_byte(&self, offset: u16) -> Option<u8> {
        self.read_byte(offset)
    }

    fn write_byte(&self, offset: u16, value: u8);

    fn reset(&self, _clear: bool) {}

    /// Suspends (`true`) or resumes time dependent behavior.
    fn pause(&self, _paused: bool) {}

    fn close(&self) {}
}

#[derive(Clone)]
pub struct AddressRange {
    start: u16,
    end: u16,
    unit: Arc<dyn MemoryUnit>,
}

impl AddressRange {
    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn unit(&self) -> &Arc<dyn MemoryUnit> {
        &self.unit
    }

    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && address <= self.end
    }

    fn is_same(&self, start: u16, unit: &Arc<dyn MemoryUnit>) -> bool {
        self.start == start && same_unit(&self.unit, unit)
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:04X} - 0x{:04X} - size: 0x{:04X}",
            self.start,
            self.end,
            self.unit.storage_size()
        )
    }
}

impl fmt::Debug for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressRange")
            .field("start", &format_args!("{:#06X}", self.start))
            .field("end", &format_args!("{:#06X}", self.end))
            .finish()
    }
}

fn same_unit(a: &Arc<dyn MemoryUnit>, b: &Arc<dyn MemoryUnit>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Routes every processor access to the unit owning the address.
///
/// Ranges are kept sorted by start address. Overlapping ranges are allowed:
/// writes reach every unit covering the address, reads are answered by the
/// first unit (lowest start) that has data.
#[derive(Default)]
pub struct AddressSpace {
    ranges: RwLock<Vec<AddressRange>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `unit` at `start`.
    ///
    /// Returns `false` without changing anything when the unit is empty, does
    /// not fit below 0x10000, the bus is full, or the same unit is already
    /// mapped at `start`.
    pub fn add_unit(&self, start: u16, unit: Arc<dyn MemoryUnit>) -> bool {
        let size = unit.storage_size();
        let end = (start as usize).saturating_add(size.saturating_sub(1));

        if size == 0 || end >= ADDRESS_SPACE_SIZE {
            tracing::warn!(
                "[BUS] Rejected unit at {:#06X}: size {:#X} does not fit the address space",
                start,
                size
            );
            return false;
        }

        let mut ranges = self.ranges.write().unwrap_or_else(PoisonError::into_inner);
        if ranges.len() >= MAX_RANGES {
            tracing::warn!("[BUS] Rejected unit at {:#06X}: bus is full", start);
            return false;
        }
        if ranges.iter().any(|range| range.is_same(start, &unit)) {
            tracing::debug!("[BUS] Unit already mapped at {:#06X}", start);
            return false;
        }

        let range = AddressRange {
            start,
            end: end as u16,
            unit,
        };
        tracing::debug!("[BUS] Mapped {}", range);

        let position = ranges.partition_point(|r| r.start <= start);
        ranges.insert(position, range);
        true
    }

    pub fn len(&self) -> usize {
        self.read_ranges().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ranges(&self) -> Vec<AddressRange> {
        self.read_ranges().clone()
    }

    pub fn read_byte(&self, address: u16) -> u8 {
        self.read_with(address, |unit, offset| unit.read_byte(offset))
    }

    /// Same precedence as [`read_byte`](Self::read_byte) but never triggers
    /// device side effects.
    pub fn debug_read_byte(&self, address: u16) -> u8 {
        self.read_with(address, |unit, offset| unit.debug_read_byte(offset))
    }

    pub fn write_byte(&self, address: u16, value: u8) {
        let ranges = self.read_ranges();
        let mut delivered = false;

        for range in ranges.iter().filter(|r| r.contains(address)) {
            range.unit.write_byte(address - range.start, value);
            delivered = true;
        }

        if !delivered {
            tracing::trace!("[BUS] Write to unmapped address {:04X} = {:02X}", address, value);
        }
    }

    pub fn read_word(&self, address: u16) -> u16 {
        let low_byte = self.read_byte(address) as u16;
        let high_byte = self.read_byte(address.wrapping_add(1)) as u16;
        (high_byte << 8) | low_byte
    }

    pub fn write_word(&self, address: u16, value: u16) {
        let low_byte = (value & 0x00FF) as u8;
        let high_byte = ((value & 0xFF00) >> 8) as u8;
        self.write_byte(address, low_byte);
        self.write_byte(address.wrapping_add(1), high_byte);
    }

    pub fn write_block(&self, start_addr: u16, data: &[u8]) {
        let mut addr = start_addr;
        for &byte in data {
            self.write_byte(addr, byte);
            addr = addr.wrapping_add(1);
        }
    }

    pub fn reset(&self, clear: bool) {
        for range in self.read_ranges().iter() {
            range.unit.reset(clear);
        }
    }

    pub fn pause(&self, paused: bool) {
        for range in self.read_ranges().iter() {
            range.unit.pause(paused);
        }
    }

    pub fn close(&self) {
        for range in self.read_ranges().iter() {
            range.unit.close();
        }
    }

    fn read_with<F>(&self, address: u16, read: F) -> u8
    where
        F: Fn(&dyn MemoryUnit, u16) -> Option<u8>,
    {
        let ranges = self.read_ranges();
        ranges
            .iter()
            .filter(|r| r.contains(address))
            .find_map(|r| read(r.unit.as_ref(), address - r.start))
            .unwrap_or(FLOATING_BUS)
    }

    fn read_ranges(&self) -> std::sync::RwLockReadGuard<'_, Vec<AddressRange>> {
        self.ranges.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.read_ranges().iter()).finish()
    }
}
