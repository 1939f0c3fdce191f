pub mod bus;
pub mod clock;
pub mod config;
pub mod debug;
pub mod disk_drive;
pub mod disk_error;
pub mod dsk_image;
pub mod fdc;
pub mod logging;
pub mod machine;
pub mod slot;
pub mod utils;

pub use bus::{AddressRange, AddressSpace, MemoryUnit};
pub use clock::{ClockScheduler, ClockedUnit, Processor, TimingInfo};
pub use config::{AddressMap, ClockConfig, FdcConfig, MachineConfig};
pub use debug::DebugSession;
pub use disk_drive::Drive;
pub use disk_error::DiskError;
pub use fdc::{FdcControlPort, FdcRegisters, FloppyController};
pub use logging::init_logging;
pub use machine::{Machine, MachineBuilder};
pub use utils::hexdump;
