// Debugger session state
// Remembers what was last shown so the next view can highlight changes

use std::fmt::Write;

use crate::{
    bus::AddressSpace,
    fdc::{FdcRegisters, FloppyController},
    utils::hexdump,
};

#[derive(Debug, Default)]
pub struct DebugSession {
    memory_window: Option<(u16, Vec<u8>)>,
    fdc_registers: Option<FdcRegisters>,
}

impl DebugSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex dump of `len` bytes from `start`, read through the side effect free
    /// path. Bytes that changed since the previous dump of the same window are
    /// marked.
    pub fn dump_memory(&mut self, memory: &AddressSpace, start: u16, len: usize) -> String {
        let bytes = Self::snapshot(memory, start, len);
        let marks = match &self.memory_window {
            Some((previous_start, previous)) if *previous_start == start => bytes
                .iter()
                .zip(previous.iter().map(Some).chain(std::iter::repeat(None)))
                .map(|(now, before)| before.is_some_and(|b| b != now))
                .collect(),
            _ => Vec::new(),
        };

        let dump = hexdump(&bytes, start, &marks);
        self.memory_window = Some((start, bytes));
        dump
    }

    /// Addresses in the last dumped window whose value differs now.
    pub fn changed_addresses(&self, memory: &AddressSpace) -> Vec<u16> {
        let Some((start, previous)) = &self.memory_window else {
            return Vec::new();
        };

        Self::snapshot(memory, *start, previous.len())
            .iter()
            .zip(previous)
            .enumerate()
            .filter(|(_, (now, before))| now != before)
            .map(|(i, _)| start.wrapping_add(i as u16))
            .collect()
    }

    /// One line register view of the controller; registers that changed since
    /// the previous call are marked with `*`.
    pub fn describe_fdc(&mut self, fdc: &FloppyController) -> String {
        let now = fdc.registers();
        let before = self.fdc_registers.replace(now);
        let mark = |changed: bool| if changed { "*" } else { "" };

        let mut line = String::new();
        let fields = [
            ("ST", now.status, before.map(|b| b.status)),
            ("CMD", now.command, before.map(|b| b.command)),
            ("TR", now.track, before.map(|b| b.track)),
            ("SEC", now.sector, before.map(|b| b.sector)),
            ("DR", now.data, before.map(|b| b.data)),
        ];
        for (name, value, previous) in fields {
            let changed = previous.is_some_and(|p| p != value);
            let _ = write!(line, "{}={:02X}{} ", name, value, mark(changed));
        }
        let _ = write!(line, "drive {} side {}", fdc.current_drive(), fdc.side());
        line
    }

    pub fn clear(&mut self) {
        self.memory_window = None;
        self.fdc_registers = None;
    }

    fn snapshot(memory: &AddressSpace, start: u16, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| memory.debug_read_byte(start.wrapping_add(i as u16)))
            .collect()
    }
}
