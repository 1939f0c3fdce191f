use std::{
    fmt::{self, Debug},
    fs::File,
    io::Read,
    path::PathBuf,
    sync::{PoisonError, RwLock},
};

use anyhow::Context;

use crate::bus::MemoryUnit;

const POWER_ON_FILL: u8 = 0xFF;

pub struct RomSlot {
    pub rom_path: Option<PathBuf>,
    data: Vec<u8>,
}

impl RomSlot {
    /// Builds a ROM of `size` bytes; a shorter image is mirrored to fill it.
    pub fn new(rom: &[u8], size: usize) -> Self {
        let mut data = vec![POWER_ON_FILL; size];
        if !rom.is_empty() {
            for (dst, src) in data.iter_mut().zip(rom.iter().cycle()) {
                *dst = *src;
            }
        }

        RomSlot {
            rom_path: None,
            data,
        }
    }

    pub fn load(rom_path: PathBuf, size: usize) -> anyhow::Result<Self> {
        let mut file = File::open(&rom_path)
            .with_context(|| format!("Unable to open ROM image {:?}", rom_path))?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)
            .with_context(|| format!("Unable to read ROM image {:?}", rom_path))?;

        let mut rom_slot = Self::new(&buffer, size);
        rom_slot.rom_path = Some(rom_path);

        Ok(rom_slot)
    }
}

impl MemoryUnit for RomSlot {
    fn storage_size(&self) -> usize {
        self.data.len()
    }

    fn read_byte(&self, offset: u16) -> Option<u8> {
        self.data.get(offset as usize).copied()
    }

    fn write_byte(&self, offset: u16, _value: u8) {
        tracing::trace!("Attempt to write to ROM offset {:#06X}", offset);
    }
}

impl Debug for RomSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RomSlot")
            .field("rom_path", &self.rom_path)
            .field("size", &self.data.len())
            .finish()
    }
}

pub struct RamSlot {
    data: RwLock<Vec<u8>>,
}

impl RamSlot {
    pub fn new(size: usize) -> Self {
        RamSlot {
            data: RwLock::new(vec![POWER_ON_FILL; size]),
        }
    }

    pub fn load(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let end = (offset + bytes.len()).min(data.len());
        if offset < end {
            data[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MemoryUnit for RamSlot {
    fn storage_size(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn read_byte(&self, offset: u16) -> Option<u8> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        match data.get(offset as usize) {
            Some(&value) => Some(value),
            None => {
                tracing::warn!(
                    "Attempt to read from out of bounds RAM offset {:#06X}, returning 0xFF",
                    offset
                );
                Some(POWER_ON_FILL)
            }
        }
    }

    fn write_byte(&self, offset: u16, value: u8) {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = data.get_mut(offset as usize) {
            *slot = value;
        }
    }

    fn reset(&self, clear: bool) {
        if clear {
            let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
            data.fill(POWER_ON_FILL);
        }
    }
}

impl Debug for RamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamSlot")
            .field("size", &self.storage_size())
            .finish()
    }
}
