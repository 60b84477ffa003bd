use std::alloc::{self, Layout};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ptr::{self, NonNull};
use std::rc::Rc;
use std::time::Duration;

use super::environment::{DmaPage, Environment, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::pci::PciAddress;

type LiveMap = Rc<RefCell<HashMap<usize, Layout>>>; // address -> layout

/// In-process environment: DMA memory comes from the global allocator and its
/// "physical" address is its virtual address, so a simulated device can follow the
/// addresses the driver programs into it.
pub struct SimEnvironment {
    live: LiveMap,
    config_space: RefCell<HashMap<u8, u32>>,
    allocations_left: Cell<Option<usize>>,
    slept: Cell<Duration>,
}

impl SimEnvironment {
    /// Config space of an X710 in D0 with a 64-bit BAR0.
    pub fn new() -> SimEnvironment {
        let config_space = HashMap::from([
            (0x00, (0x1572 << 16) | 0x8086),
            (0x04, 0),
            (0x10, 0xF000_0000 | 0b0100),
            (0x14, 0),
            (0x44, 0),
        ]);
        SimEnvironment {
            live: Rc::new(RefCell::new(HashMap::new())),
            config_space: RefCell::new(config_space),
            allocations_left: Cell::new(None),
            slept: Cell::new(Duration::ZERO),
        }
    }

    /// Makes every allocation after the next `count` fail.
    pub fn fail_allocations_after(&self, count: usize) {
        self.allocations_left.set(Some(count));
    }

    pub fn live_pages(&self) -> usize {
        self.live.borrow().len()
    }

    /// Total time callers asked to sleep; nothing actually sleeps.
    pub fn slept(&self) -> Duration {
        self.slept.get()
    }

    pub fn set_config(&self, register: u8, value: u32) {
        self.config_space.borrow_mut().insert(register, value);
    }

    /// Bus-side access to the DMA memory this environment has handed out.
    pub fn memory(&self) -> SimMemory {
        SimMemory(Rc::clone(&self.live))
    }
}

impl Default for SimEnvironment {
    fn default() -> Self {
        SimEnvironment::new()
    }
}

impl Environment for SimEnvironment {
    fn allocate_dma(&self, size: usize) -> Result<DmaPage> {
        if let Some(left) = self.allocations_left.get() {
            if left == 0 {
                return Err(Error::Allocation { size });
            }
            self.allocations_left.set(Some(left - 1));
        }

        let len = size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let layout = Layout::from_size_align(len, PAGE_SIZE).map_err(|_| Error::Allocation { size })?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or(Error::Allocation { size })?;
        self.live.borrow_mut().insert(ptr.as_ptr() as usize, layout);
        Ok(unsafe { DmaPage::from_raw(ptr, ptr.as_ptr() as u64, len) })
    }

    fn free_dma(&self, page: DmaPage) {
        match self.live.borrow_mut().remove(&(page.as_ptr() as usize)) {
            Some(layout) => unsafe { alloc::dealloc(page.as_ptr(), layout) },
            None => panic!("freeing DMA page {:?} that was never allocated", page),
        }
    }

    fn pci_read(&self, _addr: PciAddress, register: u8) -> u32 {
        self.config_space.borrow().get(&register).copied().unwrap_or(0)
    }

    fn pci_write(&self, _addr: PciAddress, register: u8, value: u32) {
        self.config_space.borrow_mut().insert(register, value);
    }

    fn sleep(&self, duration: Duration) {
        self.slept.set(self.slept.get() + duration);
    }
}

impl Drop for SimEnvironment {
    fn drop(&mut self) {
        for (addr, layout) in self.live.borrow_mut().drain() {
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

/// What a simulated device sees of host memory: only ranges inside a live allocation of
/// its [`SimEnvironment`] can be read or written, anything else is a bus error.
#[derive(Clone)]
pub struct SimMemory(LiveMap);

impl SimMemory {
    /// Whether `len` bytes at `addr` lie inside one live allocation.
    pub fn contains(&self, addr: u64, len: usize) -> bool {
        let Ok(addr) = usize::try_from(addr) else {
            return false;
        };
        let Some(end) = addr.checked_add(len) else {
            return false;
        };
        self.0.borrow().iter().any(|(&start, layout)| start <= addr && end <= start + layout.size())
    }

    pub fn read(&self, addr: u64, len: usize) -> Option<Vec<u8>> {
        if !self.contains(addr, len) {
            return None;
        }
        let mut bytes = vec![0; len];
        // Checked above: the range is inside memory owned by the environment
        unsafe { ptr::copy_nonoverlapping(addr as usize as *const u8, bytes.as_mut_ptr(), len) };
        Some(bytes)
    }

    /// Returns false, writing nothing, when the range is not live memory.
    pub fn write(&self, addr: u64, data: &[u8]) -> bool {
        if !self.contains(addr, data.len()) {
            return false;
        }
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), addr as usize as *mut u8, data.len()) };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_releases_pages_still_live() {
        let env = SimEnvironment::new();
        let memory = env.memory();
        let page = env.allocate_dma(100).unwrap();
        let addr = page.phys_addr();
        let _second = env.allocate_dma(PAGE_SIZE + 1).unwrap();
        assert_eq!(env.live_pages(), 2);
        assert!(memory.contains(addr, PAGE_SIZE));

        drop(env);
        assert!(!memory.contains(addr, 1));
    }

    #[test]
    fn memory_is_limited_to_live_allocations() {
        let env = SimEnvironment::new();
        let memory = env.memory();
        let page = env.allocate_dma(PAGE_SIZE).unwrap();
        let addr = page.phys_addr();

        assert!(memory.write(addr + 8, &[1, 2, 3]));
        assert_eq!(memory.read(addr + 8, 3), Some(vec![1, 2, 3]));
        assert!(!memory.contains(addr + 1, PAGE_SIZE));
        assert_eq!(memory.read(0x10, 32), None);
        assert!(!memory.write(u64::MAX, &[0]));

        env.free_dma(page);
        assert_eq!(memory.read(addr, 1), None);
    }
}
