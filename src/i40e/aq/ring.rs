use zerocopy::FromZeroes;

use super::descriptor::{AqDescriptor, DescFlags};
use crate::env::{DmaPage, Environment, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::i40e::device_limits::{AQ_DESCRIPTOR_SIZE, AQ_LARGE_BUF};
use crate::i40e::regs::{self, RegisterFile};
use crate::volatile;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// ASQ: driver-produced commands, written back by firmware on completion.
    Send,
    /// ARQ: firmware-produced events into driver-posted buffers.
    Receive,
}

#[derive(Clone, Copy, Debug)]
struct RingRegisters {
    head: usize,
    tail: usize,
    len: usize,
    base_low: usize,
    base_high: usize,
}

impl Role {
    fn registers(self) -> RingRegisters {
        match self {
            Role::Send => RingRegisters { head: regs::PF_ATQH, tail: regs::PF_ATQT, len: regs::PF_ATQLEN, base_low: regs::PF_ATQBAL, base_high: regs::PF_ATQBAH },
            Role::Receive => RingRegisters { head: regs::PF_ARQH, tail: regs::PF_ARQT, len: regs::PF_ARQLEN, base_low: regs::PF_ARQBAL, base_high: regs::PF_ARQBAH },
        }
    }
}

/// What a submitted descriptor carries besides its inline parameters.
#[derive(Clone, Copy, Debug)]
pub enum Payload<'d> {
    None,
    /// Copied into the slot's buffer for firmware to read.
    Send(&'d [u8]),
    /// The slot's buffer, cleared, for firmware to fill with this many bytes.
    Receive(u16),
}

pub struct AqRing {
    role: Role,
    descriptors: DmaPage,
    buffers: Vec<DmaPage>,
    num_desc: u16,
    buf_size: u16,
    next_to_use: u16,
    next_to_clean: u16,
    regs: RingRegisters,
}

impl AqRing {
    pub fn init(env: &impl Environment, bar: &impl RegisterFile, role: Role, num_desc: u16, buf_size: u16) -> Result<AqRing> {
        if num_desc == 0 || !num_desc.is_power_of_two() {
            return Err(Error::Config(format!("{:?} ring size {} is not a power of two", role, num_desc)));
        }
        if num_desc as usize * AQ_DESCRIPTOR_SIZE > PAGE_SIZE {
            return Err(Error::Config(format!("{:?} ring of {} descriptors does not fit in one page", role, num_desc)));
        }
        if buf_size == 0 || buf_size as usize > PAGE_SIZE {
            return Err(Error::Config(format!("{:?} buffer size {} must be within one page", role, buf_size)));
        }

        let descriptors = env.allocate_dma(PAGE_SIZE)?;
        let mut buffers = Vec::with_capacity(num_desc as usize);
        for _ in 0..num_desc {
            match env.allocate_dma(buf_size as usize) {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        env.free_dma(buffer);
                    }
                    env.free_dma(descriptors);
                    return Err(e);
                }
            }
        }

        let ring_regs = role.registers();
        let ring = AqRing { role, descriptors, buffers, num_desc, buf_size, next_to_use: 0, next_to_clean: 0, regs: ring_regs };

        regs::clear(bar, ring_regs.head);
        regs::clear(bar, ring_regs.tail);
        regs::clear(bar, ring_regs.len);

        let base = ring.descriptors.phys_addr();
        regs::write(bar, ring_regs.base_low, base as u32);
        regs::write(bar, ring_regs.base_high, (base >> 32) as u32);
        regs::write(bar, ring_regs.len, num_desc as u32 | regs::AQLEN_::ENABLE);

        let readback = regs::read(bar, ring_regs.base_low);
        if readback != base as u32 {
            ring.shutdown(env, bar);
            return Err(Error::RegisterMismatch { reg: ring_regs.base_low * 4, expected: base as u32, actual: readback });
        }

        debug!("{:?} ring: {} descriptors at {:#x}, {}-byte buffers", role, num_desc, base, buf_size);
        Ok(ring)
    }

    /// Stops the ring in hardware, then frees its memory.
    pub fn shutdown(self, env: &impl Environment, bar: &impl RegisterFile) {
        regs::clear(bar, self.regs.head);
        regs::clear(bar, self.regs.tail);
        regs::clear(bar, self.regs.len);
        regs::clear(bar, self.regs.base_low);
        regs::clear(bar, self.regs.base_high);

        for buffer in self.buffers {
            env.free_dma(buffer);
        }
        env.free_dma(self.descriptors);
        debug!("{:?} ring released", self.role);
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn num_desc(&self) -> u16 {
        self.num_desc
    }

    pub fn buf_size(&self) -> u16 {
        self.buf_size
    }

    pub fn next_to_use(&self) -> u16 {
        self.next_to_use
    }

    pub fn next_to_clean(&self) -> u16 {
        self.next_to_clean
    }

    fn advance(&self, index: u16) -> u16 {
        // num_desc is a power of two
        index.wrapping_add(1) & (self.num_desc - 1)
    }

    /// Free descriptors; one slot always stays empty so a full ring never looks empty.
    pub fn unused_count(&self) -> u16 {
        self.next_to_clean.wrapping_sub(self.next_to_use).wrapping_sub(1) & (self.num_desc - 1)
    }

    fn descriptor(&self, index: u16) -> *mut AqDescriptor {
        self.descriptors.element::<AqDescriptor>(index as usize)
    }

    pub fn submit(&mut self, bar: &impl RegisterFile, opcode: u16, flags: DescFlags, params: &[u8; 16], payload: Payload<'_>, cookie: u64) -> Result<()> {
        if self.unused_count() == 0 {
            return Err(Error::RingFull);
        }

        let index = self.next_to_use;
        let mut desc = AqDescriptor::new_zeroed();
        desc.opcode.set(opcode);
        desc.params = *params;
        desc.set_cookie(cookie);

        let mut flags = flags | DescFlags::SI;
        let datalen = match payload {
            Payload::None => 0,
            Payload::Send(data) => {
                if data.len() > self.buf_size as usize {
                    return Err(Error::Config(format!("{}-byte command payload exceeds the {}-byte buffer", data.len(), self.buf_size)));
                }
                self.buffers[index as usize].write_bytes(0, data)?;
                flags |= DescFlags::BUF | DescFlags::RD;
                data.len()
            }
            Payload::Receive(len) => {
                if len > self.buf_size {
                    return Err(Error::Config(format!("{}-byte response exceeds the {}-byte buffer", len, self.buf_size)));
                }
                self.buffers[index as usize].zero();
                flags |= DescFlags::BUF;
                len as usize
            }
        };
        if !matches!(payload, Payload::None) {
            if datalen > AQ_LARGE_BUF {
                flags |= DescFlags::LB;
            }
            desc.datalen.set(datalen as u16);
            desc.set_buffer_addr(self.buffers[index as usize].phys_addr());
        }
        desc.flags.set(flags.bits());

        unsafe { volatile::write(self.descriptor(index), desc) };

        self.next_to_use = self.advance(index);
        regs::write(bar, self.regs.tail, self.next_to_use as u32);
        Ok(())
    }

    /// Posts every free receive descriptor back to firmware. Returns how many were posted.
    pub fn refill_receive(&mut self, bar: &impl RegisterFile) -> u16 {
        let mut posted = 0;
        while self.unused_count() > 0 {
            let index = self.next_to_use;
            let mut flags = DescFlags::BUF;
            if self.buf_size as usize > AQ_LARGE_BUF {
                flags |= DescFlags::LB;
            }

            let mut desc = AqDescriptor::new_zeroed();
            desc.flags.set(flags.bits());
            desc.datalen.set(self.buf_size);
            desc.set_buffer_addr(self.buffers[index as usize].phys_addr());
            unsafe { volatile::write(self.descriptor(index), desc) };

            self.next_to_use = self.advance(index);
            posted += 1;
        }
        if posted > 0 {
            regs::write(bar, self.regs.tail, self.next_to_use as u32);
        }
        posted
    }

    /// Hands every descriptor hardware is done with to `f`, oldest first, together
    /// with the bytes firmware placed in its buffer. Returns how many were handed out.
    ///
    /// The head register is authoritative; the DD bit is not consulted.
    pub fn clean<F>(&mut self, bar: &impl RegisterFile, mut f: F) -> u16
    where
        F: FnMut(&AqDescriptor, &[u8]),
    {
        let head = (regs::read(bar, self.regs.head) & regs::AQ_INDEX_MASK) as u16;
        if head >= self.num_desc {
            warn!("{:?} ring head {} is past the ring end ({})", self.role, head, self.num_desc);
            return 0;
        }

        let mut cleaned = 0;
        while self.next_to_clean != head {
            let index = self.next_to_clean;
            let desc = unsafe { volatile::read(self.descriptor(index)) };

            let has_data = match self.role {
                Role::Send => desc.flags().contains(DescFlags::BUF),
                Role::Receive => true,
            };
            let len = if has_data { (desc.datalen.get() as usize).min(self.buf_size as usize) } else { 0 };
            f(&desc, &self.buffers[index as usize].as_slice()[..len]);

            self.next_to_clean = self.advance(index);
            cleaned += 1;
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::env::SimEnvironment;

    #[derive(Default)]
    struct Registers(RefCell<HashMap<usize, u32>>);

    impl RegisterFile for Registers {
        fn read(&self, reg: usize) -> u32 {
            self.0.borrow().get(&reg).copied().unwrap_or(0)
        }
        fn write(&self, reg: usize, value: u32) {
            self.0.borrow_mut().insert(reg, value);
        }
    }

    #[test]
    fn rejects_bad_geometry() {
        let env = SimEnvironment::new();
        let bar = Registers::default();
        assert!(matches!(AqRing::init(&env, &bar, Role::Send, 24, 512), Err(Error::Config(_))));
        assert!(matches!(AqRing::init(&env, &bar, Role::Send, 256, 512), Err(Error::Config(_))));
        assert!(matches!(AqRing::init(&env, &bar, Role::Send, 32, 8192), Err(Error::Config(_))));
        assert_eq!(env.live_pages(), 0);
    }

    #[test]
    fn init_programs_base_and_length() {
        let env = SimEnvironment::new();
        let bar = Registers::default();
        let ring = AqRing::init(&env, &bar, Role::Receive, 16, 512).unwrap();
        let base = ring.descriptors.phys_addr();
        assert_eq!(bar.read(regs::PF_ARQBAL), base as u32);
        assert_eq!(bar.read(regs::PF_ARQBAH), (base >> 32) as u32);
        assert_eq!(bar.read(regs::PF_ARQLEN), 16 | regs::AQLEN_::ENABLE);
        assert_eq!(env.live_pages(), 17);
        ring.shutdown(&env, &bar);
        assert_eq!(env.live_pages(), 0);
        assert_eq!(bar.read(regs::PF_ARQLEN), 0);
    }

    #[test]
    fn allocation_failure_frees_partial_ring() {
        let env = SimEnvironment::new();
        let bar = Registers::default();
        env.fail_allocations_after(5);
        assert!(matches!(AqRing::init(&env, &bar, Role::Send, 8, 512), Err(Error::Allocation { .. })));
        assert_eq!(env.live_pages(), 0);
    }

    #[test]
    fn unused_count_wraps() {
        let env = SimEnvironment::new();
        let bar = Registers::default();
        let mut ring = AqRing::init(&env, &bar, Role::Send, 4, 512).unwrap();
        assert_eq!(ring.unused_count(), 3);
        for _ in 0..3 {
            ring.submit(&bar, 0x0001, DescFlags::empty(), &[0; 16], Payload::None, 1).unwrap();
        }
        assert_eq!(ring.unused_count(), 0);
        assert!(matches!(ring.submit(&bar, 0x0001, DescFlags::empty(), &[0; 16], Payload::None, 1), Err(Error::RingFull)));

        bar.write(regs::PF_ATQH, 3);
        assert_eq!(ring.clean(&bar, |_, _| {}), 3);
        assert_eq!(ring.unused_count(), 3);

        // Wrap around the end of the ring
        ring.submit(&bar, 0x0001, DescFlags::empty(), &[0; 16], Payload::None, 1).unwrap();
        ring.submit(&bar, 0x0001, DescFlags::empty(), &[0; 16], Payload::None, 1).unwrap();
        assert_eq!(ring.next_to_use(), 1);
        assert_eq!(bar.read(regs::PF_ATQT), 1);
        assert_eq!(ring.unused_count(), 1);
        ring.shutdown(&env, &bar);
    }

    #[test]
    fn submit_sets_buffer_flags() {
        let env = SimEnvironment::new();
        let bar = Registers::default();
        let mut ring = AqRing::init(&env, &bar, Role::Send, 8, 1024).unwrap();

        ring.submit(&bar, 0x0B02, DescFlags::empty(), &[0; 16], Payload::Send(&[0xAB; 52]), 7).unwrap();
        ring.submit(&bar, 0x0200, DescFlags::empty(), &[0; 16], Payload::Receive(1024), 8).unwrap();
        assert!(matches!(ring.submit(&bar, 0x0B03, DescFlags::empty(), &[0; 16], Payload::Send(&[0; 2048]), 9), Err(Error::Config(_))));

        let first = unsafe { volatile::read(ring.descriptor(0)) };
        assert_eq!(first.flags(), DescFlags::SI | DescFlags::BUF | DescFlags::RD);
        assert_eq!(first.datalen.get(), 52);
        assert_eq!(first.cookie(), 7);
        assert_eq!(first.buffer_addr(), ring.buffers[0].phys_addr());
        assert_eq!(&ring.buffers[0].as_slice()[..52], &[0xAB; 52][..]);

        let second = unsafe { volatile::read(ring.descriptor(1)) };
        assert_eq!(second.flags(), DescFlags::SI | DescFlags::BUF | DescFlags::LB);
        assert_eq!(second.datalen.get(), 1024);
        assert_eq!(ring.next_to_use(), 2);
        ring.shutdown(&env, &bar);
    }

    #[test]
    fn refill_posts_all_but_one() {
        let env = SimEnvironment::new();
        let bar = Registers::default();
        let mut ring = AqRing::init(&env, &bar, Role::Receive, 8, 4096).unwrap();
        assert_eq!(ring.refill_receive(&bar), 7);
        assert_eq!(bar.read(regs::PF_ARQT), 7);
        assert_eq!(ring.refill_receive(&bar), 0);

        bar.write(regs::PF_ARQH, 2);
        assert_eq!(ring.clean(&bar, |desc, data| assert_eq!(data.len(), desc.datalen.get() as usize)), 2);
        assert_eq!(ring.refill_receive(&bar), 2);
        assert_eq!(bar.read(regs::PF_ARQT), 1);
        ring.shutdown(&env, &bar);
    }
}
