//! A simulated i40e: an in-memory register file and a firmware model that answers admin
//! commands when the send ring's tail is written.
//!
//! Addresses the driver programs (ring bases, buffers, PD tables) are followed through the
//! [`SimMemory`] of the [`SimEnvironment`] the device is attached to. An address outside that
//! environment's live DMA memory behaves like a bus error: the access does not happen.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::mem::size_of;

use zerocopy::{AsBytes, FromBytes};

use crate::env::{SimEnvironment, SimMemory};

use crate::i40e::aq::commands::{
    switch_element_type, GetVersionParams, LinkStatusParams, MacAddressFlags, MacAddressReadParams, MacAddresses, PromiscuousParams, RxCtlParams,
    StopLldpParams, SwitchConfigHeader, SwitchElement, SwitchSeidParams, VsiCompletion, VsiParams, VsiProperties, LINK_INFO_UP, LINK_STATUS_LSE_ENABLE,
};
use crate::i40e::aq::{AqDescriptor, AqStatus, DescFlags, Opcode};
use crate::i40e::device_limits::{AQ_DESCRIPTOR_SIZE, HMC_MAX_BP_COUNT};
use crate::i40e::regs::{self, RegisterFile};

/// Opcode firmware writes back when told to corrupt a completion.
pub const CORRUPT_OPCODE: u16 = 0x7777;

/// One SD entry as programmed through PFHMC_SDCMD.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SdProgram {
    pub pd_table: u64,
    pub bp_count: u32,
    pub valid: bool,
}

/// What the firmware model answers with, and what it has been told.
#[derive(Clone, Debug)]
pub struct Firmware {
    pub version: GetVersionParams,
    pub mac: [u8; 6],
    pub mac_flags: MacAddressFlags,
    pub switch_elements: Vec<SwitchElement>,
    pub elements_per_response: usize,
    /// Request cursor -> cursor to answer with instead of the real one.
    pub next_cursor: HashMap<u16, u16>,
    pub link_up: bool,
    pub link_speed: u8,

    /// Opcode -> status and how many more commands get it.
    pub failures: HashMap<Opcode, (AqStatus, usize)>,
    /// Commands that are never completed.
    pub silent: HashSet<Opcode>,
    /// Commands completed with an opcode the driver does not know.
    pub corrupt: HashSet<Opcode>,

    pub commands: Vec<Opcode>,
    pub vsis: HashMap<u16, VsiProperties>,
    pub promiscuous: HashMap<u16, u16>,
    pub rss_key: Option<Vec<u8>>,
    pub rss_lut: Option<Vec<u8>>,
    pub phy_mask: Option<u16>,
    pub lldp_command: Option<u8>,
    pub link_events: bool,
}

fn element(element_type: u8, seid: u16, uplink: u16) -> SwitchElement {
    let mut e = SwitchElement { element_type, revision: 1, ..Default::default() };
    e.seid.set(seid);
    e.uplink_seid.set(uplink);
    e
}

impl Default for Firmware {
    fn default() -> Self {
        let mut version = GetVersionParams::default();
        version.fw_major.set(9);
        version.fw_minor.set(20);
        version.api_major.set(1);
        version.api_minor.set(15);
        version.fw_build.set(0x0001_2345);

        Firmware {
            version,
            mac: [0x3C, 0xFD, 0xFE, 0x00, 0x00, 0x01],
            mac_flags: MacAddressFlags::LAN_ADDR_VALID | MacAddressFlags::PORT_ADDR_VALID,
            switch_elements: vec![
                element(switch_element_type::MAC, 2, 0),
                element(switch_element_type::PF, 16, 2),
                element(switch_element_type::VSI, 390, 16),
                element(switch_element_type::VSI, 391, 16),
            ],
            elements_per_response: 2,
            next_cursor: HashMap::new(),
            link_up: true,
            link_speed: 0x10,
            failures: HashMap::new(),
            silent: HashSet::new(),
            corrupt: HashSet::new(),
            commands: Vec::new(),
            vsis: HashMap::new(),
            promiscuous: HashMap::new(),
            rss_key: None,
            rss_lut: None,
            phy_mask: None,
            lldp_command: None,
            link_events: false,
        }
    }
}

struct SimState {
    regs: HashMap<usize, u32>,
    auto_complete: bool,
    corrupt_base_readback: bool,
    firmware: Firmware,
    hmc_writes: Vec<(usize, u32)>,
    sd_table: HashMap<u32, SdProgram>,
    memory: SimMemory,
}

pub struct SimDevice {
    state: RefCell<SimState>,
}

impl SimDevice {
    /// A device in PXE mode with 64 LAN queues, 128-byte TX and 32-byte RX contexts, that
    /// completes commands as soon as they are submitted. It reaches host memory only
    /// through `env`.
    pub fn new(env: &SimEnvironment) -> SimDevice {
        let regs = HashMap::from([
            (regs::GLHMC_LANQMAX, 64),
            (regs::GLHMC_LANTXOBJSZ, 7),
            (regs::GLHMC_LANRXOBJSZ, 5),
            (regs::GLLAN_RCTL_0, regs::GLLAN_RCTL_0_::PXE_MODE),
            (regs::PF_FUNC_RID, 0),
        ]);
        SimDevice {
            state: RefCell::new(SimState {
                regs,
                auto_complete: true,
                corrupt_base_readback: false,
                firmware: Firmware::default(),
                hmc_writes: Vec::new(),
                sd_table: HashMap::new(),
                memory: env.memory(),
            }),
        }
    }

    /// When off, submitted commands wait for [`SimDevice::complete`].
    pub fn set_auto_complete(&self, on: bool) {
        self.state.borrow_mut().auto_complete = on;
    }

    /// Makes ring base registers read back something other than what was written.
    pub fn corrupt_base_readback(&self, on: bool) {
        self.state.borrow_mut().corrupt_base_readback = on;
    }

    /// Sets a register without triggering any device behavior.
    pub fn set_register(&self, reg: usize, value: u32) {
        self.state.borrow_mut().regs.insert(reg, value);
    }

    pub fn register(&self, reg: usize) -> u32 {
        self.state.borrow().reg(reg)
    }

    pub fn firmware<T>(&self, f: impl FnOnce(&mut Firmware) -> T) -> T {
        f(&mut self.state.borrow_mut().firmware)
    }

    /// Fails the next `times` commands with `opcode`.
    pub fn fail(&self, opcode: Opcode, status: AqStatus, times: usize) {
        self.firmware(|fw| fw.failures.insert(opcode, (status, times)));
    }

    pub fn fail_always(&self, opcode: Opcode, status: AqStatus) {
        self.fail(opcode, status, usize::MAX);
    }

    pub fn commands(&self) -> Vec<Opcode> {
        self.firmware(|fw| fw.commands.clone())
    }

    /// Writes to the HMC SD and PD invalidation registers, in order.
    pub fn hmc_writes(&self) -> Vec<(usize, u32)> {
        self.state.borrow().hmc_writes.clone()
    }

    pub fn sd_entry(&self, index: u32) -> Option<SdProgram> {
        self.state.borrow().sd_table.get(&index).copied()
    }

    /// The PD entry hardware would use, read from the PD table of a valid SD entry.
    pub fn pd_entry(&self, sd: u32, pd: usize) -> Option<u64> {
        let entry = self.sd_entry(sd).filter(|e| e.valid && pd < e.bp_count as usize)?;
        let bytes = self.state.borrow().memory.read(entry.pd_table + (pd * size_of::<u64>()) as u64, size_of::<u64>())?;
        u64::read_from(&bytes[..]).map(u64::from_le)
    }

    /// Completes up to `count` submitted commands. Returns how many were completed.
    pub fn complete(&self, count: usize) -> usize {
        self.state.borrow_mut().process_send_ring(count)
    }

    /// Submitted commands firmware has not completed yet.
    pub fn pending(&self) -> usize {
        let state = self.state.borrow();
        let len = state.reg(regs::PF_ATQLEN) & regs::AQLEN_::LEN;
        if len == 0 {
            return 0;
        }
        let head = state.reg(regs::PF_ATQH) & regs::AQ_INDEX_MASK;
        let tail = state.reg(regs::PF_ATQT) & regs::AQ_INDEX_MASK;
        ((tail + len - head) % len) as usize
    }

    /// Places a firmware event in the next posted receive buffer. Returns false when the
    /// driver has no buffer posted.
    pub fn post_event(&self, opcode: u16, params: &[u8; 8], data: &[u8]) -> bool {
        self.state.borrow_mut().post_event(opcode, params, data)
    }

    pub fn post_link_event(&self, link_up: bool, link_speed: u8) -> bool {
        let params = LinkStatusParams { link_info: if link_up { LINK_INFO_UP } else { 0 }, link_speed, ..Default::default() };
        let mut inline = [0; 8];
        inline.copy_from_slice(&params.as_bytes()[..8]);
        self.post_event(Opcode::GetLinkStatus.code(), &inline, &[])
    }
}

impl RegisterFile for SimDevice {
    fn read(&self, reg: usize) -> u32 {
        let state = self.state.borrow();
        let value = state.reg(reg);
        if state.corrupt_base_readback && (reg == regs::PF_ATQBAL || reg == regs::PF_ARQBAL) {
            return value ^ 0x1000;
        }
        value
    }

    fn write(&self, reg: usize, value: u32) {
        let mut state = self.state.borrow_mut();
        match reg {
            // Write one to clear
            regs::GLLAN_RCTL_0 => {
                let old = state.reg(reg);
                state.regs.insert(reg, old & !value);
            }
            regs::PFHMC_SDDATAHIGH | regs::PFHMC_SDDATALOW | regs::PFHMC_PDINV => {
                state.hmc_writes.push((reg, value));
                state.regs.insert(reg, value);
            }
            regs::PFHMC_SDCMD => {
                state.hmc_writes.push((reg, value));
                state.regs.insert(reg, value);
                if value & regs::PFHMC_SDCMD_::PMSDWR != 0 {
                    state.program_sd(value & regs::PFHMC_SDCMD_::PMSDIDX);
                }
            }
            regs::PF_ATQT => {
                state.regs.insert(reg, value);
                if state.auto_complete {
                    state.process_send_ring(usize::MAX);
                }
            }
            _ => {
                state.regs.insert(reg, value);
            }
        }
    }
}

fn ring_base(state: &SimState, low: usize, high: usize) -> u64 {
    ((state.reg(high) as u64) << 32) | state.reg(low) as u64
}

impl SimState {
    fn reg(&self, reg: usize) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn program_sd(&mut self, index: u32) {
        let low = self.reg(regs::PFHMC_SDDATALOW);
        let high = self.reg(regs::PFHMC_SDDATAHIGH);
        let entry = SdProgram {
            pd_table: ((high as u64) << 32) | (low & regs::PFHMC_SDDATALOW_::PMSDDATALOW) as u64,
            bp_count: (low & regs::PFHMC_SDDATALOW_::PMSDBPCOUNT) >> regs::PFHMC_SDDATALOW_::PMSDBPCOUNT.trailing_zeros(),
            valid: low & regs::PFHMC_SDDATALOW_::PMSDVALID != 0,
        };
        debug_assert!(entry.bp_count as usize <= HMC_MAX_BP_COUNT);
        self.sd_table.insert(index, entry);
    }

    fn read_descriptor(&self, addr: u64) -> Option<AqDescriptor> {
        let bytes = self.memory.read(addr, AQ_DESCRIPTOR_SIZE)?;
        AqDescriptor::read_from(&bytes[..])
    }

    fn process_send_ring(&mut self, limit: usize) -> usize {
        let len = self.reg(regs::PF_ATQLEN);
        if len & regs::AQLEN_::ENABLE == 0 || len & regs::AQLEN_::LEN == 0 {
            return 0;
        }
        let len = len & regs::AQLEN_::LEN;
        let base = ring_base(self, regs::PF_ATQBAL, regs::PF_ATQBAH);
        let tail = self.reg(regs::PF_ATQT) & regs::AQ_INDEX_MASK;
        let mut head = self.reg(regs::PF_ATQH) & regs::AQ_INDEX_MASK;

        let mut done = 0;
        while head != tail && done < limit {
            let slot = base + (head as usize * AQ_DESCRIPTOR_SIZE) as u64;
            let mut desc = match self.read_descriptor(slot) {
                Some(desc) => desc,
                None => {
                    warn!("Simulated firmware cannot fetch send descriptor at {:#x}", slot);
                    break;
                }
            };
            if !self.run_command(&mut desc) {
                break;
            }
            self.memory.write(slot, desc.as_bytes());
            head = (head + 1) % len;
            done += 1;
        }
        self.regs.insert(regs::PF_ATQH, head);
        done
    }

    /// Executes one command in place. Returns false if firmware stays silent.
    fn run_command(&mut self, desc: &mut AqDescriptor) -> bool {
        let opcode = match Opcode::try_from(desc.opcode.get()) {
            Ok(opcode) => opcode,
            Err(_) => {
                finish(desc, AqStatus::ENOSYS);
                return true;
            }
        };
        if self.firmware.silent.contains(&opcode) {
            return false;
        }
        self.firmware.commands.push(opcode);

        let injected = match self.firmware.failures.get_mut(&opcode) {
            Some((status, left)) if *left > 0 => {
                if *left != usize::MAX {
                    *left -= 1;
                }
                Some(*status)
            }
            _ => None,
        };
        let status = match injected {
            Some(status) => status,
            None if desc.flags().contains(DescFlags::BUF) => {
                let addr = desc.buffer_addr();
                match self.memory.read(addr, desc.datalen.get() as usize) {
                    Some(mut buffer) => {
                        let status = self.execute(opcode, desc, &mut buffer);
                        self.memory.write(addr, &buffer);
                        status
                    }
                    None => AqStatus::EFAULT,
                }
            }
            None => self.execute(opcode, desc, &mut []),
        };

        finish(desc, status);
        if self.firmware.corrupt.contains(&opcode) {
            desc.opcode.set(CORRUPT_OPCODE);
        }
        true
    }

    fn execute(&mut self, opcode: Opcode, desc: &mut AqDescriptor, buffer: &mut [u8]) -> AqStatus {
        let fw = &mut self.firmware;
        match opcode {
            Opcode::GetVersion => respond(desc, &fw.version),
            Opcode::QueueShutdown | Opcode::ClearPxeMode => {}
            Opcode::MacAddressRead => {
                let addresses = MacAddresses { pf_lan_mac: fw.mac, port_mac: fw.mac, ..Default::default() };
                if buffer.len() < size_of::<MacAddresses>() {
                    return AqStatus::E2BIG;
                }
                buffer[..size_of::<MacAddresses>()].copy_from_slice(addresses.as_bytes());
                desc.datalen.set(size_of::<MacAddresses>() as u16);
                let mut params = MacAddressReadParams::default();
                params.command_flags.set(fw.mac_flags.bits());
                respond(desc, &params);
            }
            Opcode::GetSwitchConfig => {
                let cursor = desc.params::<SwitchSeidParams>().seid.get() as usize;
                let room = buffer.len().saturating_sub(size_of::<SwitchConfigHeader>()) / size_of::<SwitchElement>();
                let batch: Vec<SwitchElement> = fw.switch_elements.iter().skip(cursor).take(fw.elements_per_response.min(room)).copied().collect();
                if batch.is_empty() && cursor < fw.switch_elements.len() {
                    return AqStatus::ENOMEM;
                }

                let mut header = SwitchConfigHeader::default();
                header.num_reported.set(batch.len() as u16);
                header.num_total.set(fw.switch_elements.len() as u16);
                let mut written = header.as_bytes().len();
                buffer[..written].copy_from_slice(header.as_bytes());
                for element in &batch {
                    buffer[written..written + size_of::<SwitchElement>()].copy_from_slice(element.as_bytes());
                    written += size_of::<SwitchElement>();
                }
                desc.datalen.set(written as u16);

                let next = cursor + batch.len();
                let mut params = SwitchSeidParams::default();
                let next = if next >= fw.switch_elements.len() { 0 } else { next as u16 };
                params.seid.set(fw.next_cursor.get(&(cursor as u16)).copied().unwrap_or(next));
                respond(desc, &params);
            }
            Opcode::RxCtlRegRead => {
                let mut params: RxCtlParams = desc.params();
                params.value.set(self.regs.get(&(params.address.get() as usize / 4)).copied().unwrap_or(0));
                respond(desc, &params);
            }
            Opcode::RxCtlRegWrite => {
                let params: RxCtlParams = desc.params();
                self.regs.insert(params.address.get() as usize / 4, params.value.get());
            }
            Opcode::UpdateVsiParameters => {
                let seid = desc.params::<VsiParams>().uplink_seid.get();
                if !is_vsi(fw, seid) {
                    return AqStatus::ENOENT;
                }
                match VsiProperties::read_from_prefix(buffer) {
                    Some(properties) => {
                        fw.vsis.insert(seid, properties);
                    }
                    None => return AqStatus::EINVAL,
                }
            }
            Opcode::GetVsiParameters => {
                let seid = desc.params::<VsiParams>().uplink_seid.get();
                if !is_vsi(fw, seid) {
                    return AqStatus::ENOENT;
                }
                let properties = fw.vsis.get(&seid).copied().unwrap_or_default();
                if buffer.len() < size_of::<VsiProperties>() {
                    return AqStatus::E2BIG;
                }
                buffer[..size_of::<VsiProperties>()].copy_from_slice(properties.as_bytes());
                desc.datalen.set(size_of::<VsiProperties>() as u16);
                let mut params = VsiCompletion::default();
                params.seid.set(seid);
                params.vsi_number.set(seid % 384);
                params.vsi_used.set(fw.vsis.len() as u16);
                params.vsi_free.set(384 - fw.vsis.len() as u16);
                respond(desc, &params);
            }
            Opcode::SetVsiPromiscuousModes => {
                let params: PromiscuousParams = desc.params();
                let valid = params.valid_flags.get();
                let old = fw.promiscuous.get(&params.seid.get()).copied().unwrap_or(0);
                fw.promiscuous.insert(params.seid.get(), (old & !valid) | (params.promiscuous_flags.get() & valid));
            }
            Opcode::GetLinkStatus => {
                let request: LinkStatusParams = desc.params();
                if request.command_flags.get() == LINK_STATUS_LSE_ENABLE {
                    fw.link_events = true;
                }
                let mut params = LinkStatusParams {
                    link_info: if fw.link_up { LINK_INFO_UP } else { 0 },
                    link_speed: fw.link_speed,
                    ..Default::default()
                };
                params.command_flags.set(request.command_flags.get());
                params.max_frame_size.set(9728);
                respond(desc, &params);
            }
            Opcode::SetPhyIntMask => {
                fw.phy_mask = Some(u16::from_le_bytes([desc.params[8], desc.params[9]]));
            }
            Opcode::StopLldp => {
                fw.lldp_command = Some(desc.params::<StopLldpParams>().command);
            }
            Opcode::SetRssKey => fw.rss_key = Some(buffer.to_vec()),
            Opcode::SetRssLut => fw.rss_lut = Some(buffer.to_vec()),
        }
        AqStatus::OK
    }

    fn post_event(&mut self, opcode: u16, params: &[u8; 8], data: &[u8]) -> bool {
        let len = self.reg(regs::PF_ARQLEN) & regs::AQLEN_::LEN;
        if len == 0 {
            return false;
        }
        let head = self.reg(regs::PF_ARQH) & regs::AQ_INDEX_MASK;
        let tail = self.reg(regs::PF_ARQT) & regs::AQ_INDEX_MASK;
        if head == tail {
            return false;
        }

        let base = ring_base(self, regs::PF_ARQBAL, regs::PF_ARQBAH);
        let slot = base + (head as usize * AQ_DESCRIPTOR_SIZE) as u64;
        let mut desc = match self.read_descriptor(slot) {
            Some(desc) => desc,
            None => return false,
        };
        let posted = desc.datalen.get() as usize;
        if data.len() > posted {
            return false;
        }
        if !data.is_empty() && !self.memory.write(desc.buffer_addr(), data) {
            return false;
        }
        desc.opcode.set(opcode);
        desc.datalen.set(data.len() as u16);
        desc.retval.set(0);
        desc.set_cookie(0);
        desc.params[..8].copy_from_slice(params);
        desc.flags.set((desc.flags() | DescFlags::DD | DescFlags::CMP).bits());
        self.memory.write(slot, desc.as_bytes());

        self.regs.insert(regs::PF_ARQH, (head + 1) % len);
        true
    }
}

fn is_vsi(fw: &Firmware, seid: u16) -> bool {
    fw.switch_elements.iter().any(|e| e.element_type == switch_element_type::VSI && e.seid.get() == seid)
}

/// Writes response parameters, keeping the buffer address of indirect commands.
fn respond<P: AsBytes>(desc: &mut AqDescriptor, params: &P) {
    let addr = desc.buffer_addr();
    desc.set_params(params);
    if desc.flags().contains(DescFlags::BUF) {
        desc.set_buffer_addr(addr);
    }
}

fn finish(desc: &mut AqDescriptor, status: AqStatus) {
    let mut flags = desc.flags() | DescFlags::DD | DescFlags::CMP;
    if !status.is_ok() {
        flags |= DescFlags::ERR;
    }
    desc.flags.set(flags.bits());
    desc.retval.set(status.0);
}

#[cfg(test)]
mod tests {
    use zerocopy::FromZeroes;

    use crate::env::Environment;

    use super::*;

    #[test]
    fn pxe_register_clears_on_write() {
        let env = SimEnvironment::new();
        let dev = SimDevice::new(&env);
        assert_eq!(dev.read(regs::GLLAN_RCTL_0), 1);
        dev.write(regs::GLLAN_RCTL_0, 1);
        assert_eq!(dev.read(regs::GLLAN_RCTL_0), 0);
    }

    #[test]
    fn sd_command_latches_data_registers() {
        let env = SimEnvironment::new();
        let dev = SimDevice::new(&env);
        dev.write(regs::PFHMC_SDDATAHIGH, 0x12);
        dev.write(regs::PFHMC_SDDATALOW, 0x3456_7000 | (512 << 2) | 1);
        dev.write(regs::PFHMC_SDCMD, 3 | regs::PFHMC_SDCMD_::PMSDWR);
        assert_eq!(dev.sd_entry(3), Some(SdProgram { pd_table: 0x12_3456_7000, bp_count: 512, valid: true }));
        assert_eq!(dev.hmc_writes().len(), 3);
    }

    #[test]
    fn ring_outside_dma_memory_is_a_bus_error() {
        let env = SimEnvironment::new();
        let dev = SimDevice::new(&env);
        dev.write(regs::PF_ATQBAL, 0x10);
        dev.write(regs::PF_ATQBAH, 0);
        dev.write(regs::PF_ATQLEN, 32 | regs::AQLEN_::ENABLE);
        dev.write(regs::PF_ATQT, 1);
        assert_eq!(dev.register(regs::PF_ATQH), 0);
        assert!(dev.commands().is_empty());

        dev.write(regs::PF_ARQBAL, 0x10);
        dev.write(regs::PF_ARQLEN, 32 | regs::AQLEN_::ENABLE);
        dev.write(regs::PF_ARQT, 31);
        assert!(!dev.post_link_event(true, 0x10));
    }

    #[test]
    fn command_buffer_outside_dma_memory_fails_with_efault() {
        let env = SimEnvironment::new();
        let dev = SimDevice::new(&env);
        let ring = env.allocate_dma(32 * AQ_DESCRIPTOR_SIZE).unwrap();
        let mut desc = AqDescriptor::new_zeroed();
        desc.opcode.set(Opcode::GetVersion.code());
        desc.flags.set(DescFlags::BUF.bits());
        desc.datalen.set(64);
        desc.set_buffer_addr(0x10);
        let memory = env.memory();
        assert!(memory.write(ring.phys_addr(), desc.as_bytes()));

        dev.write(regs::PF_ATQBAL, ring.phys_addr() as u32);
        dev.write(regs::PF_ATQBAH, (ring.phys_addr() >> 32) as u32);
        dev.write(regs::PF_ATQLEN, 32 | regs::AQLEN_::ENABLE);
        dev.write(regs::PF_ATQT, 1);
        assert_eq!(dev.register(regs::PF_ATQH), 1);

        let done = AqDescriptor::read_from(&memory.read(ring.phys_addr(), AQ_DESCRIPTOR_SIZE).unwrap()[..]).unwrap();
        assert_eq!(AqStatus(done.retval.get()), AqStatus::EFAULT);
        assert!(done.flags().contains(DescFlags::DD));
        env.free_dma(ring);
    }

    #[test]
    fn no_events_without_posted_buffers() {
        let env = SimEnvironment::new();
        let dev = SimDevice::new(&env);
        assert!(!dev.post_link_event(true, 0x10));
    }
}
