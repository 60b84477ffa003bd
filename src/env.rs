//! Everything the driver needs from the host: DMA memory, PCI config space, time.

mod environment;
mod linux;
mod pci;
#[cfg(any(test, feature = "sim"))]
mod sim;

pub use environment::{DmaPage, Environment, PAGE_SIZE};
pub use linux::{Bar, LinuxEnvironment};
#[cfg(any(test, feature = "sim"))]
pub use sim::{SimEnvironment, SimMemory};
