pub mod aq;
pub mod device;
pub mod device_limits;
pub mod driver_constants;
pub mod hmc;
pub(crate) mod pci_regs;
pub mod regs;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
