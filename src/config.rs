use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub clock: ClockConfig,
    pub fdc: FdcConfig,
    pub address_map: AddressMap,
}

impl MachineConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Invalid machine configuration")
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Unable to read configuration {:?}", path))?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub frequency_hz: u64,
    /// Wall-clock length of one scheduler pulse.
    pub pulse_nanos: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 2_048_000,
            pulse_nanos: 33_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdcConfig {
    /// How long the controller waits for the processor to service a data request.
    pub handshake_deadline_ms: u64,
    pub head_settle_ms: u64,
    /// Upper bound for waiting on an interrupted command to finish.
    pub interrupt_wait_ms: u64,
    pub revolution_ms: u64,
    pub index_pulse_ms: u64,
}

impl FdcConfig {
    pub fn handshake_deadline(&self) -> Duration {
        Duration::from_millis(self.handshake_deadline_ms)
    }

    pub fn head_settle(&self) -> Duration {
        Duration::from_millis(self.head_settle_ms)
    }

    pub fn interrupt_wait(&self) -> Duration {
        Duration::from_millis(self.interrupt_wait_ms)
    }
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self {
            handshake_deadline_ms: 100,
            head_settle_ms: 15,
            interrupt_wait_ms: 1000,
            revolution_ms: 200,
            index_pulse_ms: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressMap {
    pub main_ram: u16,
    pub main_ram_size: usize,
    pub framebuffer: u16,
    pub framebuffer_size: usize,
    pub aux_ram: u16,
    pub aux_ram_size: usize,
    pub fdc: u16,
    pub fdc_control: u16,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self {
            main_ram: 0x0000,
            main_ram_size: 0x9000,
            framebuffer: 0x9000,
            framebuffer_size: 0x3000,
            aux_ram: 0xFFC0,
            aux_ram_size: 0x20,
            fdc: 0xFFE8,
            fdc_control: 0xFFEC,
        }
    }
}
