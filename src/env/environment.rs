use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pci::PciAddress;

pub const PAGE_SIZE: usize = 4096;

pub trait Environment {
    /// Returns zeroed, page-aligned, physically contiguous memory of at least `size` bytes.
    fn allocate_dma(&self, size: usize) -> Result<DmaPage>;
    fn free_dma(&self, page: DmaPage);

    fn pci_read(&self, addr: PciAddress, register: u8) -> u32;
    fn pci_write(&self, addr: PciAddress, register: u8, value: u32);

    fn sleep(&self, duration: Duration);
}

/// A DMA region shared with the device.
///
/// Pages are not freed on drop; they go back through [`Environment::free_dma`] so the
/// owner controls when hardware stops being able to reach them.
pub struct DmaPage {
    virt: NonNull<u8>,
    phys: u64,
    len: usize,
}

impl DmaPage {
    /// # Safety
    ///
    /// `virt` must point to `len` writable bytes that stay valid until the page is handed
    /// back to the environment that produced it, and `phys` must be the bus address of
    /// that same memory.
    pub unsafe fn from_raw(virt: NonNull<u8>, phys: u64, len: usize) -> DmaPage {
        DmaPage { virt, phys, len }
    }

    pub fn phys_addr(&self) -> u64 {
        self.phys
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Pointer to the `index`-th `T` in the page. Panics when it would not fit.
    pub fn element<T>(&self, index: usize) -> *mut T {
        if (index + 1) * size_of::<T>() > self.len {
            panic!("Out of bounds");
        }
        // Safe: just checked the element lies inside the page
        unsafe { self.virt.as_ptr().add(index * size_of::<T>()) as *mut T }
    }

    pub fn zero(&mut self) {
        unsafe { ptr::write_bytes(self.virt.as_ptr(), 0, self.len) }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.virt.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.virt.as_ptr(), self.len) }
    }

    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let end = offset.checked_add(data.len()).filter(|end| *end <= self.len).ok_or_else(|| {
            Error::Config(format!("{} bytes at offset {} overflow a {}-byte DMA buffer", data.len(), offset, self.len))
        })?;
        self.as_mut_slice()[offset..end].copy_from_slice(data);
        Ok(())
    }
}

impl std::fmt::Debug for DmaPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaPage").field("virt", &self.virt).field("phys", &format_args!("{:#x}", self.phys)).field("len", &self.len).finish()
    }
}
