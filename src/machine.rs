use std::{path::Path, sync::Arc};

use anyhow::Context;

use crate::{
    bus::{AddressSpace, MemoryUnit},
    clock::{ClockScheduler, ClockedUnit, Processor, TimingInfo},
    config::MachineConfig,
    debug::DebugSession,
    disk_drive::Drive,
    fdc::{FdcControlPort, FloppyController},
    slot::{RamSlot, RomSlot},
};

/// A wired machine: address space, scheduler and the optional floppy
/// controller, with the processor registered on the scheduler.
pub struct Machine {
    config: MachineConfig,
    memory: Arc<AddressSpace>,
    scheduler: Arc<ClockScheduler>,
    fdc: Option<Arc<FloppyController>>,
    debug: DebugSession,
}

impl Machine {
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<AddressSpace> {
        &self.memory
    }

    pub fn scheduler(&self) -> &Arc<ClockScheduler> {
        &self.scheduler
    }

    pub fn fdc(&self) -> Option<&Arc<FloppyController>> {
        self.fdc.as_ref()
    }

    pub fn start(&self) -> anyhow::Result<()> {
        tracing::info!("Starting machine at {} Hz", self.scheduler.clock_speed());
        self.scheduler.start()
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Pauses the clock, holding the processor and freezing device timers.
    pub fn pause(&self) -> bool {
        self.scheduler.pause(true, true)
    }

    /// Resumes the clock. A processor the floppy controller holds on its data
    /// register stays held.
    pub fn resume(&self) {
        self.scheduler.pause(false, true);
        if self.fdc_holds_processor() {
            if let Some(cpu) = self.scheduler.processor() {
                cpu.hold(true);
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    /// Single-steps one instruction; only works while paused.
    ///
    /// [`pause`](Self::pause) holds the processor, so the hold is dropped for
    /// the step and asserted again afterwards. Nothing is stepped while the
    /// floppy controller holds the processor.
    pub fn step(&self) -> bool {
        let Some(cpu) = self.scheduler.processor() else {
            return false;
        };
        if !self.is_paused() {
            return false;
        }
        if self.fdc_holds_processor() {
            tracing::debug!("Processor is waiting on the floppy controller, cannot step");
            return false;
        }

        cpu.hold(false);
        let stepped = self.scheduler.exec_one_cmd_cpu();
        cpu.hold(true);
        stepped
    }

    /// Runs one pulse worth of cycles without pacing.
    pub fn run_pulse(&self) -> u64 {
        self.scheduler.step_pulse()
    }

    pub fn reset(&self, clear: bool) {
        tracing::info!("Resetting machine (clear: {})", clear);
        self.memory.reset(clear);
    }

    pub fn load(&self, address: u16, data: &[u8]) {
        self.memory.write_block(address, data);
    }

    pub fn insert_disk<P: AsRef<Path>>(
        &self,
        drive: Drive,
        path: P,
        write_protect: bool,
    ) -> anyhow::Result<()> {
        let path = path.as_ref();
        self.disk_controller()?
            .insert_disk(drive, path, write_protect)
            .with_context(|| format!("Unable to insert {:?} in drive {}", path, drive))?;
        tracing::info!("Inserted {:?} in drive {}", path, drive);
        Ok(())
    }

    pub fn eject_disk(&self, drive: Drive) -> anyhow::Result<()> {
        self.disk_controller()?
            .eject_disk(drive)
            .with_context(|| format!("Unable to eject drive {}", drive))?;
        tracing::info!("Ejected drive {}", drive);
        Ok(())
    }

    fn fdc_holds_processor(&self) -> bool {
        self.fdc.as_ref().is_some_and(|fdc| fdc.holds_processor())
    }

    fn disk_controller(&self) -> anyhow::Result<&Arc<FloppyController>> {
        self.fdc.as_ref().context("Disk support is not enabled")
    }

    pub fn timing_info(&self) -> TimingInfo {
        self.scheduler.timing_info()
    }

    pub fn debug_session(&mut self) -> &mut DebugSession {
        &mut self.debug
    }

    pub fn memory_dump(&mut self, start: u16, len: usize) -> String {
        self.debug.dump_memory(&self.memory, start, len)
    }

    pub fn fdc_dump(&mut self) -> Option<String> {
        let fdc = self.fdc.as_ref()?;
        Some(self.debug.describe_fdc(fdc))
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.scheduler.stop();
        self.memory.close();
    }
}

/// Collects the units of a machine and wires them together.
///
/// The address space exists from the start so a processor can be built
/// against [`memory`](Self::memory) before it is handed to the builder.
pub struct MachineBuilder {
    config: MachineConfig,
    memory: Arc<AddressSpace>,
    slots: Vec<(u16, Arc<dyn MemoryUnit>)>,
    processor: Option<Arc<dyn Processor>>,
    units: Vec<Arc<dyn ClockedUnit>>,
    enable_disk: bool,
}

impl MachineBuilder {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            memory: Arc::new(AddressSpace::new()),
            slots: Vec::new(),
            processor: None,
            units: Vec::new(),
            enable_disk: false,
        }
    }

    pub fn memory(&self) -> Arc<AddressSpace> {
        self.memory.clone()
    }

    pub fn ram_slot(&mut self, base: u16, size: usize) -> &mut Self {
        self.slots.push((base, Arc::new(RamSlot::new(size))));
        self
    }

    pub fn rom_slot(&mut self, data: &[u8], base: u16, size: usize) -> &mut Self {
        self.slots.push((base, Arc::new(RomSlot::new(data, size))));
        self
    }

    /// Main RAM, framebuffer and auxiliary RAM at the configured addresses.
    pub fn standard_ram(&mut self) -> &mut Self {
        let map = self.config.address_map;
        self.ram_slot(map.main_ram, map.main_ram_size)
            .ram_slot(map.framebuffer, map.framebuffer_size)
            .ram_slot(map.aux_ram, map.aux_ram_size)
    }

    pub fn memory_unit(&mut self, base: u16, unit: Arc<dyn MemoryUnit>) -> &mut Self {
        self.slots.push((base, unit));
        self
    }

    pub fn processor(&mut self, cpu: Arc<dyn Processor>) -> &mut Self {
        self.processor = Some(cpu);
        self
    }

    pub fn clocked_unit(&mut self, unit: Arc<dyn ClockedUnit>) -> &mut Self {
        self.units.push(unit);
        self
    }

    /// Maps the floppy controller and its drive control port.
    pub fn with_disk_support(&mut self) -> &mut Self {
        self.enable_disk = true;
        self
    }

    pub fn build(self) -> anyhow::Result<Machine> {
        let scheduler = Arc::new(ClockScheduler::new(self.config.clock));
        let memory = self.memory;

        for (base, unit) in self.slots {
            if !memory.add_unit(base, unit) {
                anyhow::bail!("Unable to map memory unit at {:#06X}", base);
            }
        }

        if let Some(cpu) = &self.processor {
            if !scheduler.add_processor(cpu.clone()) {
                anyhow::bail!("Unable to register the processor");
            }
        }
        for unit in self.units {
            if !scheduler.add_unit(unit) {
                anyhow::bail!("Unable to register clocked unit");
            }
        }

        let fdc = if self.enable_disk {
            let cpu = self
                .processor
                .clone()
                .context("Disk support needs a processor")?;
            let map = self.config.address_map;
            let fdc = Arc::new(FloppyController::new(
                cpu,
                scheduler.clone(),
                self.config.fdc,
            )?);

            if !memory.add_unit(map.fdc, fdc.clone()) {
                anyhow::bail!("Unable to map the floppy controller at {:#06X}", map.fdc);
            }
            if !memory.add_unit(map.fdc_control, Arc::new(FdcControlPort::new(fdc.clone()))) {
                anyhow::bail!(
                    "Unable to map the drive control port at {:#06X}",
                    map.fdc_control
                );
            }
            Some(fdc)
        } else {
            None
        };

        tracing::debug!("Machine memory map:\n{:?}", memory);
        Ok(Machine {
            config: self.config,
            memory,
            scheduler,
            fdc,
            debug: DebugSession::new(),
        })
    }
}
