use std::cell::{Cell, RefCell};
use std::fs::OpenOptions;
use std::io::{self, Read, Seek};
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::thread;
use std::time::Duration;

use super::environment::{DmaPage, Environment, PAGE_SIZE};
use super::pci;
use crate::error::{Error, Result};
use crate::i40e::regs::RegisterFile;
use crate::pci::PciAddress;
use crate::volatile;

const HUGEPAGE_LOG: usize = 30; // 1 GB hugepages
const HUGEPAGE_SIZE: usize = 1 << HUGEPAGE_LOG;

/// Host environment backed by one 1 GB hugepage, which is physically contiguous, so a
/// single pagemap lookup gives the physical address of every page carved out of it.
pub struct LinuxEnvironment {
    hugepage: NonNull<u8>,
    hugepage_phys: u64,
    used_bytes: Cell<usize>,
    free_pages: RefCell<Vec<(usize, usize)>>, // (offset, len)
}

impl LinuxEnvironment {
    pub fn new() -> Result<LinuxEnvironment> {
        pci::acquire_ports().map_err(|e| Error::Pci(format!("could not ioperm, are you root? ({e})")))?;

        let page = unsafe {
            libc::mmap(
                ptr::null_mut(),
                HUGEPAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_HUGETLB | (HUGEPAGE_LOG << libc::MAP_HUGE_SHIFT) as i32 | libc::MAP_ANONYMOUS | libc::MAP_SHARED | libc::MAP_POPULATE,
                -1,
                0,
            )
        };
        if page == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        let hugepage = NonNull::new(page as *mut u8).ok_or(Error::Allocation { size: HUGEPAGE_SIZE })?;
        let hugepage_phys = match get_physical_address(hugepage.as_ptr() as usize) {
            Ok(phys) => phys,
            Err(e) => {
                unsafe { libc::munmap(page, HUGEPAGE_SIZE) };
                return Err(e);
            }
        };
        info!("hugepage mapped at {:p}, physical {:#x}", hugepage, hugepage_phys);

        Ok(LinuxEnvironment {
            hugepage,
            hugepage_phys,
            used_bytes: Cell::new(0),
            free_pages: RefCell::new(Vec::new()),
        })
    }

    /// Maps `size` bytes of device memory at physical `addr` through /dev/mem.
    pub fn map_physical_memory(&self, addr: u64, size: usize) -> Result<Bar> {
        let file = OpenOptions::new().read(true).write(true).open("/dev/mem")?;
        let mut map = unsafe { memmap::MmapOptions::new().offset(addr).len(size).map_mut(&file)? };
        let (prefix, regs, suffix) = unsafe { map.align_to_mut::<u32>() };
        if !prefix.is_empty() || !suffix.is_empty() {
            return Err(Error::Pci(format!("mapping of {addr:#x} is not 32-bit aligned")));
        }
        let base = NonNull::new(regs.as_mut_ptr()).ok_or_else(|| Error::Pci(format!("empty mapping at {addr:#x}")))?;
        let len = regs.len();
        debug!("mapped {size:#x} bytes of device memory at {addr:#x}");
        Ok(Bar { _map: map, base, len })
    }
}

fn get_physical_address(addr: usize) -> Result<u64> {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) } as usize;
    let page = addr / page_size;
    let map_offset = page * size_of::<u64>();

    let mut pagemap = OpenOptions::new().read(true).open("/proc/self/pagemap")?;
    pagemap.seek(io::SeekFrom::Start(map_offset as u64))?;

    let mut buffer = [0; size_of::<u64>()];
    pagemap.read_exact(&mut buffer)?;

    let metadata = u64::from_ne_bytes(buffer);
    if (metadata & 0x8000_0000_0000_0000) == 0 {
        return Err(Error::Pci(format!("page at {addr:#x} not present")));
    }

    let pfn = metadata & 0x7F_FFFF_FFFF_FFFF;
    if pfn == 0 {
        return Err(Error::Pci(format!("page at {addr:#x} not mapped, are you root?")));
    }

    let addr_offset = addr % page_size;
    Ok(pfn * page_size as u64 + addr_offset as u64)
}

impl Environment for LinuxEnvironment {
    fn allocate_dma(&self, size: usize) -> Result<DmaPage> {
        let len = size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;

        let recycled = {
            let mut free_pages = self.free_pages.borrow_mut();
            free_pages.iter().position(|&(_, l)| l == len).map(|i| free_pages.swap_remove(i).0)
        };
        let offset = match recycled {
            Some(offset) => offset,
            None => {
                let used_bytes = self.used_bytes.get();
                if used_bytes + len > HUGEPAGE_SIZE {
                    return Err(Error::Allocation { size });
                }
                self.used_bytes.set(used_bytes + len);
                used_bytes
            }
        };

        unsafe {
            let virt = NonNull::new_unchecked(self.hugepage.as_ptr().add(offset));
            let mut page = DmaPage::from_raw(virt, self.hugepage_phys + offset as u64, len);
            page.zero();
            Ok(page)
        }
    }

    fn free_dma(&self, page: DmaPage) {
        let offset = page.as_ptr() as usize - self.hugepage.as_ptr() as usize;
        self.free_pages.borrow_mut().push((offset, page.len()));
    }

    fn pci_read(&self, addr: PciAddress, register: u8) -> u32 {
        pci::pci_target(addr, register);
        pci::port_in_32(pci::PCI_CONFIG_DATA) >> ((register & 3) * 8)
    }

    fn pci_write(&self, addr: PciAddress, register: u8, value: u32) {
        pci::pci_target(addr, register);
        pci::port_out_32(pci::PCI_CONFIG_DATA, value);
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl Drop for LinuxEnvironment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.hugepage.as_ptr() as *mut libc::c_void, HUGEPAGE_SIZE);
        }
    }
}

/// A mapped device BAR, addressed in 32-bit registers.
pub struct Bar {
    _map: memmap::MmapMut,
    base: NonNull<u32>,
    len: usize,
}

impl RegisterFile for Bar {
    fn read(&self, reg: usize) -> u32 {
        if reg >= self.len {
            panic!("Out of bounds");
        }
        // Safe: in bounds of a mapping that lives as long as self
        u32::from_le(unsafe { volatile::read(self.base.as_ptr().add(reg)) })
    }

    fn write(&self, reg: usize, value: u32) {
        if reg >= self.len {
            panic!("Out of bounds");
        }
        unsafe { volatile::write(self.base.as_ptr().add(reg), u32::to_le(value)) }
    }
}
