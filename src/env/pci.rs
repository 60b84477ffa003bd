use std::io;

use x86_64::instructions::port::Port;

use crate::pci::PciAddress;

pub const PCI_CONFIG_ADDR: u16 = 0xCF8;
pub const PCI_CONFIG_DATA: u16 = 0xCFC;

// Port 0x80 is the POST port, written after each config write as a short delay.
const POST_PORT: u16 = 0x80;

/// Grants this process access to the PCI config ports; needs CAP_SYS_RAWIO.
pub fn acquire_ports() -> io::Result<()> {
    unsafe {
        if libc::ioperm(PCI_CONFIG_ADDR.into(), 8, 1) < 0 || libc::ioperm(POST_PORT.into(), 1, 1) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn port_out_32(port: u16, value: u32) {
    unsafe {
        Port::new(port).write(value);
        Port::new(POST_PORT).write(0u8);
    }
}

pub fn port_in_32(port: u16) -> u32 {
    unsafe { Port::new(port).read() }
}

pub fn pci_target(address: PciAddress, register: u8) {
    port_out_32(
        PCI_CONFIG_ADDR,
        0x80000000 | ((address.bus as u32) << 16) | ((address.device as u32) << 11) | ((address.function as u32) << 8) | (register as u32 & 0xFC),
    );
}
