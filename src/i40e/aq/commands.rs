//! Per-opcode request builders and response parsers.
//!
//! `req_*` methods submit a command and return its session handle; `resp_*` functions
//! read a completion. The remaining methods are the blocking combination of the two.

use std::collections::HashSet;
use std::mem::size_of;

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::{AdminQueue, AqStatus, Completion, Le16, Le32, Opcode, Payload, SessionHandle};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::i40e::device_limits::{RSS_KEY_SIZE, RSS_PF_LUT_SIZE, RSS_VSI_LUT_SIZE, VSI_PROPERTIES_SIZE};
use crate::i40e::driver_constants::{RX_CTL_RETRIES, RX_CTL_RETRY_DELAY};
use crate::i40e::regs::{self, RegisterFile};

// --- Parameter blocks, 16 bytes each ---

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct GetVersionParams {
    pub rom_ver: Le32,
    pub fw_build: Le32,
    pub fw_major: Le16,
    pub fw_minor: Le16,
    pub api_major: Le16,
    pub api_minor: Le16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct QueueShutdownParams {
    pub driver_unloading: Le32,
    pub reserved: [u8; 12],
}

pub const QUEUE_SHUTDOWN_UNLOADING: u32 = 1;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct MacAddressReadParams {
    pub command_flags: Le16,
    pub reserved: [u8; 6],
    pub addr_high: Le32,
    pub addr_low: Le32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MacAddressFlags: u16 {
        const LAN_ADDR_VALID = 0x10;
        const SAN_ADDR_VALID = 0x20;
        const PORT_ADDR_VALID = 0x40;
        const WOL_ADDR_VALID = 0x80;
    }
}

/// Response buffer of a MAC address read.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct MacAddresses {
    pub pf_lan_mac: [u8; 6],
    pub pf_san_mac: [u8; 6],
    pub port_mac: [u8; 6],
    pub pf_wol_mac: [u8; 6],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct ClearPxeParams {
    pub rx_cnt: u8,
    pub reserved: [u8; 15],
}

/// Used by get switch configuration; `seid` is the pagination cursor.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct SwitchSeidParams {
    pub seid: Le16,
    pub reserved: [u8; 6],
    pub addr_high: Le32,
    pub addr_low: Le32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct SwitchConfigHeader {
    pub num_reported: Le16,
    pub num_total: Le16,
    pub reserved: [u8; 12],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct SwitchElement {
    pub element_type: u8,
    pub revision: u8,
    pub seid: Le16,
    pub uplink_seid: Le16,
    pub downlink_seid: Le16,
    pub reserved: [u8; 3],
    pub connection_type: u8,
    pub scheduler_id: Le16,
    pub element_info: Le16,
}

pub mod switch_element_type {
    pub const MAC: u8 = 1;
    pub const PF: u8 = 2;
    pub const VF: u8 = 3;
    pub const EMP: u8 = 5;
    pub const BMC: u8 = 6;
    pub const PV: u8 = 16;
    pub const VEB: u8 = 17;
    pub const PA: u8 = 18;
    pub const VSI: u8 = 19;
}

// Room for the header plus 31 elements
pub const SWITCH_CONFIG_BUFFER_SIZE: u16 = 512;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct RxCtlParams {
    pub reserved1: Le32,
    pub address: Le32,
    pub reserved2: Le32,
    pub value: Le32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct VsiParams {
    pub uplink_seid: Le16,
    pub connection_type: u8,
    pub reserved1: u8,
    pub vf_id: u8,
    pub reserved2: u8,
    pub vsi_flags: Le16,
    pub addr_high: Le32,
    pub addr_low: Le32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct VsiCompletion {
    pub seid: Le16,
    pub vsi_number: Le16,
    pub vsi_used: Le16,
    pub vsi_free: Le16,
    pub addr_high: Le32,
    pub addr_low: Le32,
}

/// The VSI properties block carried by get/update VSI parameters.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct VsiProperties {
    pub valid_sections: Le16,
    // switch
    pub switch_id: Le16,
    pub sw_reserved: [u8; 2],
    // security
    pub sec_flags: u8,
    pub sec_reserved: u8,
    // VLAN
    pub pvid: Le16,
    pub fcoe_pvid: Le16,
    pub port_vlan_flags: u8,
    pub pvlan_reserved: [u8; 3],
    // ingress/egress user priority
    pub ingress_table: Le32,
    pub egress_table: Le32,
    // cascaded PV
    pub cas_pv_tag: Le16,
    pub cas_pv_flags: u8,
    pub cas_pv_reserved: u8,
    // queue mapping
    pub mapping_flags: Le16,
    pub queue_mapping: [Le16; 16],
    pub tc_mapping: [Le16; 8],
    // queueing options
    pub queueing_opt_flags: u8,
    pub queueing_opt_reserved: [u8; 3],
    // scheduler
    pub up_enable_bits: u8,
    pub sched_reserved: u8,
    pub outer_up_table: Le32,
    pub cmd_reserved: [u8; 8],
    // filled by firmware
    pub qs_handle: [Le16; 8],
    pub stat_counter_idx: Le16,
    pub sched_id: Le16,
    pub resp_reserved: [u8; 12],
}

const _: [(); VSI_PROPERTIES_SIZE] = [(); size_of::<VsiProperties>()];

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct VsiSections: u16 {
        const SWITCH = 0x0001;
        const SECURITY = 0x0002;
        const VLAN = 0x0004;
        const CAS_PV = 0x0008;
        const INGRESS_UP = 0x0010;
        const EGRESS_UP = 0x0020;
        const QUEUE_MAP = 0x0040;
        const QUEUE_OPT = 0x0080;
        const OUTER_UP = 0x0100;
        const SCHED = 0x0200;
    }
}

/// Counters firmware returns with get VSI parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsiInfo {
    pub seid: u16,
    pub vsi_number: u16,
    pub vsi_used: u16,
    pub vsi_free: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct PromiscuousParams {
    pub promiscuous_flags: Le16,
    pub valid_flags: Le16,
    pub seid: Le16,
    pub vlan_tag: Le16,
    pub reserved: [u8; 8],
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PromiscFlags: u16 {
        const UNICAST = 0x01;
        const MULTICAST = 0x02;
        const BROADCAST = 0x04;
        const DEFAULT = 0x08;
        const VLAN = 0x10;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct LinkStatusParams {
    pub command_flags: Le16,
    pub phy_type: u8,
    pub link_speed: u8,
    pub link_info: u8,
    pub an_info: u8,
    pub ext_info: u8,
    pub loopback: u8,
    pub max_frame_size: Le16,
    pub config: u8,
    pub power_desc: u8,
    pub reserved: [u8; 4],
}

pub const LINK_STATUS_LSE_DISABLE: u16 = 0x2;
pub const LINK_STATUS_LSE_ENABLE: u16 = 0x3;
pub const LINK_INFO_UP: u8 = 0x01;

/// What get link status, or a link status event, reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkStatus {
    pub link_up: bool,
    pub link_speed: u8,
    pub phy_type: u8,
    pub max_frame_size: u16,
}

impl LinkStatus {
    pub fn speed_mbps(&self) -> Option<u32> {
        match self.link_speed {
            0x02 => Some(100),
            0x04 => Some(1_000),
            0x08 => Some(10_000),
            0x10 => Some(40_000),
            0x20 => Some(20_000),
            0x40 => Some(25_000),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct PhyIntMaskParams {
    pub reserved1: [u8; 8],
    pub event_mask: Le16,
    pub reserved2: [u8; 6],
}

bitflags! {
    /// PHY events; a set bit masks the event out.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PhyEvents: u16 {
        const LINK_UPDOWN = 0x0002;
        const MEDIA_NA = 0x0004;
        const LINK_FAULT = 0x0008;
        const PHY_TEMP_ALARM = 0x0010;
        const EXCESSIVE_ERRORS = 0x0020;
        const SIGNAL_DETECT = 0x0040;
        const AN_COMPLETED = 0x0080;
        const MODULE_QUAL_FAIL = 0x0100;
        const PORT_TX_SUSPENDED = 0x0200;
    }
}

impl PhyEvents {
    /// Everything masked except link changes, media loss and module qualification.
    pub fn default_mask() -> PhyEvents {
        PhyEvents::all() - (PhyEvents::LINK_UPDOWN | PhyEvents::MEDIA_NA | PhyEvents::MODULE_QUAL_FAIL)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct StopLldpParams {
    pub command: u8,
    pub reserved: [u8; 15],
}

pub const LLDP_AGENT_SHUTDOWN: u8 = 0x1;
pub const LLDP_AGENT_STOP_PERSIST: u8 = 0x2;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct RssKeyParams {
    pub vsi_id: Le16,
    pub reserved: [u8; 6],
    pub addr_high: Le32,
    pub addr_low: Le32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, AsBytes, FromBytes, FromZeroes)]
pub struct RssLutParams {
    pub vsi_id: Le16,
    pub flags: Le16,
    pub reserved: [u8; 4],
    pub addr_high: Le32,
    pub addr_low: Le32,
}

pub const RSS_VSI_ID_VALID: u16 = 0x8000;
pub const RSS_LUT_TABLE_TYPE_PF: u16 = 0x1;

macro_rules! assert_param_size {
    ($($ty:ty),*) => {
        $(const _: [(); 16] = [(); size_of::<$ty>()];)*
    };
}

assert_param_size!(
    GetVersionParams,
    QueueShutdownParams,
    MacAddressReadParams,
    ClearPxeParams,
    SwitchSeidParams,
    SwitchElement,
    SwitchConfigHeader,
    RxCtlParams,
    VsiParams,
    VsiCompletion,
    PromiscuousParams,
    LinkStatusParams,
    PhyIntMaskParams,
    StopLldpParams,
    RssKeyParams,
    RssLutParams
);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub rom_ver: u32,
    pub fw_build: u32,
    pub fw_major: u16,
    pub fw_minor: u16,
    pub api_major: u16,
    pub api_minor: u16,
}

// --- Response parsers ---

pub fn resp_get_version(completion: &Completion) -> FirmwareVersion {
    let p: GetVersionParams = completion.desc.params();
    FirmwareVersion {
        rom_ver: p.rom_ver.get(),
        fw_build: p.fw_build.get(),
        fw_major: p.fw_major.get(),
        fw_minor: p.fw_minor.get(),
        api_major: p.api_major.get(),
        api_minor: p.api_minor.get(),
    }
}

/// Copies the LAN MAC into `mac`. Without a valid port address, `mac` is left as is.
pub fn resp_macaddr_read(completion: &Completion, mac: &mut [u8; 6]) -> Result<()> {
    let p: MacAddressReadParams = completion.desc.params();
    let flags = MacAddressFlags::from_bits_retain(p.command_flags.get());
    if !flags.contains(MacAddressFlags::PORT_ADDR_VALID) {
        return Err(Error::InvalidResponse { opcode: Opcode::MacAddressRead.code(), reason: "port address not valid" });
    }
    let addresses = MacAddresses::read_from_prefix(&completion.buffer[..])
        .ok_or(Error::InvalidResponse { opcode: Opcode::MacAddressRead.code(), reason: "short address buffer" })?;
    *mac = addresses.pf_lan_mac;
    Ok(())
}

/// Appends the reported elements to `elements` and returns the cursor for the next
/// request; zero means the walk is over.
pub fn resp_get_switch_config(completion: &Completion, elements: &mut Vec<SwitchElement>) -> Result<u16> {
    let opcode = Opcode::GetSwitchConfig.code();
    let header = SwitchConfigHeader::read_from_prefix(&completion.buffer[..])
        .ok_or(Error::InvalidResponse { opcode, reason: "missing switch config header" })?;

    let reported = header.num_reported.get() as usize;
    let body = &completion.buffer[size_of::<SwitchConfigHeader>()..];
    if reported * size_of::<SwitchElement>() > body.len() {
        return Err(Error::InvalidResponse { opcode, reason: "more elements reported than returned" });
    }
    for chunk in body.chunks_exact(size_of::<SwitchElement>()).take(reported) {
        if let Some(element) = SwitchElement::read_from(chunk) {
            elements.push(element);
        }
    }

    let p: SwitchSeidParams = completion.desc.params();
    Ok(p.seid.get())
}

pub fn resp_rx_ctl_read(completion: &Completion) -> u32 {
    let p: RxCtlParams = completion.desc.params();
    p.value.get()
}

pub fn resp_get_vsi(completion: &Completion) -> Result<(VsiProperties, VsiInfo)> {
    let properties = VsiProperties::read_from_prefix(&completion.buffer[..])
        .ok_or(Error::InvalidResponse { opcode: Opcode::GetVsiParameters.code(), reason: "short VSI properties" })?;
    let p: VsiCompletion = completion.desc.params();
    let info = VsiInfo { seid: p.seid.get(), vsi_number: p.vsi_number.get(), vsi_used: p.vsi_used.get(), vsi_free: p.vsi_free.get() };
    Ok((properties, info))
}

pub fn resp_link_status(completion: &Completion) -> LinkStatus {
    let p: LinkStatusParams = completion.desc.params();
    LinkStatus {
        link_up: p.link_info & LINK_INFO_UP != 0,
        link_speed: p.link_speed,
        phy_type: p.phy_type,
        max_frame_size: p.max_frame_size.get(),
    }
}

fn tolerate(result: Result<Completion>, tolerated: AqStatus) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.status() == Some(tolerated) => {
            debug!("Tolerating {}", e);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// --- Requests ---

impl<'a, E: Environment, R: RegisterFile> AdminQueue<'a, E, R> {
    pub fn req_get_version(&mut self) -> Result<SessionHandle> {
        self.start(Opcode::GetVersion, &GetVersionParams::default(), Payload::None)
    }

    pub fn get_version(&mut self) -> Result<FirmwareVersion> {
        let handle = self.req_get_version()?;
        Ok(resp_get_version(&self.finish(handle)?))
    }

    pub fn req_queue_shutdown(&mut self, unloading: bool) -> Result<SessionHandle> {
        let mut params = QueueShutdownParams::default();
        if unloading {
            params.driver_unloading.set(QUEUE_SHUTDOWN_UNLOADING);
        }
        self.start(Opcode::QueueShutdown, &params, Payload::None)
    }

    pub fn queue_shutdown(&mut self, unloading: bool) -> Result<()> {
        let handle = self.req_queue_shutdown(unloading)?;
        self.finish(handle).map(|_| ())
    }

    pub fn req_macaddr_read(&mut self) -> Result<SessionHandle> {
        self.start(Opcode::MacAddressRead, &MacAddressReadParams::default(), Payload::Receive(size_of::<MacAddresses>() as u16))
    }

    pub fn macaddr_read(&mut self) -> Result<[u8; 6]> {
        let handle = self.req_macaddr_read()?;
        let completion = self.finish(handle)?;
        let mut mac = [0; 6];
        resp_macaddr_read(&completion, &mut mac)?;
        Ok(mac)
    }

    pub fn req_clear_pxe_mode(&mut self) -> Result<SessionHandle> {
        self.start(Opcode::ClearPxeMode, &ClearPxeParams { rx_cnt: 0x2, reserved: [0; 15] }, Payload::None)
    }

    /// Takes the receive path out of the firmware's boot-time PXE state. Already cleared
    /// is fine.
    pub fn clear_pxe_mode(&mut self) -> Result<()> {
        if regs::is_field_cleared(self.bar, regs::GLLAN_RCTL_0, regs::GLLAN_RCTL_0_::PXE_MODE) {
            debug!("PXE mode already off");
            return Ok(());
        }
        let handle = self.req_clear_pxe_mode()?;
        tolerate(self.finish(handle), AqStatus::EEXIST)?;
        regs::write(self.bar, regs::GLLAN_RCTL_0, regs::GLLAN_RCTL_0_::PXE_MODE);
        Ok(())
    }

    pub fn req_get_switch_config(&mut self, cursor: u16) -> Result<SessionHandle> {
        let mut params = SwitchSeidParams::default();
        params.seid.set(cursor);
        self.start(Opcode::GetSwitchConfig, &params, Payload::Receive(SWITCH_CONFIG_BUFFER_SIZE))
    }

    /// Walks the whole switch configuration, one response buffer at a time.
    pub fn get_switch_config(&mut self) -> Result<Vec<SwitchElement>> {
        let mut elements = Vec::new();
        let mut cursor = 0;
        let mut seen = HashSet::from([cursor]);
        loop {
            let handle = self.req_get_switch_config(cursor)?;
            let completion = self.finish(handle)?;
            let next = resp_get_switch_config(&completion, &mut elements)?;
            if next == 0 {
                break;
            }
            // Any cursor seen before means firmware is walking in a cycle
            if !seen.insert(next) {
                return Err(Error::InvalidResponse { opcode: Opcode::GetSwitchConfig.code(), reason: "switch config cursor repeated" });
            }
            cursor = next;
        }
        debug!("Switch configuration has {} elements", elements.len());
        Ok(elements)
    }

    pub fn req_rx_ctl_read(&mut self, reg: usize) -> Result<SessionHandle> {
        let mut params = RxCtlParams::default();
        params.address.set((reg * 4) as u32);
        self.start(Opcode::RxCtlRegRead, &params, Payload::None)
    }

    pub fn req_rx_ctl_write(&mut self, reg: usize, value: u32) -> Result<SessionHandle> {
        let mut params = RxCtlParams::default();
        params.address.set((reg * 4) as u32);
        params.value.set(value);
        self.start(Opcode::RxCtlRegWrite, &params, Payload::None)
    }

    fn rx_ctl_with_retries<F>(&mut self, mut request: F) -> Result<Completion>
    where
        F: FnMut(&mut Self) -> Result<SessionHandle>,
    {
        let mut attempt = 1;
        loop {
            let handle = request(self)?;
            match self.finish(handle) {
                Err(e) if e.status() == Some(AqStatus::EAGAIN) && attempt < RX_CTL_RETRIES => {
                    self.env.sleep(RX_CTL_RETRY_DELAY);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Reads an RX control register through firmware, or directly when firmware will not.
    pub fn read_rx_ctl(&mut self, reg: usize) -> u32 {
        match self.rx_ctl_with_retries(|aq| aq.req_rx_ctl_read(reg)) {
            Ok(completion) => resp_rx_ctl_read(&completion),
            Err(e) => {
                warn!("RX control read of {:#x} through firmware failed ({}), reading directly", reg * 4, e);
                regs::read(self.bar, reg)
            }
        }
    }

    pub fn write_rx_ctl(&mut self, reg: usize, value: u32) {
        if let Err(e) = self.rx_ctl_with_retries(|aq| aq.req_rx_ctl_write(reg, value)) {
            warn!("RX control write of {:#x} through firmware failed ({}), writing directly", reg * 4, e);
            regs::write(self.bar, reg, value);
        }
    }

    pub fn req_update_vsi(&mut self, seid: u16, properties: &VsiProperties) -> Result<SessionHandle> {
        let mut params = VsiParams::default();
        params.uplink_seid.set(seid);
        self.start(Opcode::UpdateVsiParameters, &params, Payload::Send(properties.as_bytes()))
    }

    pub fn update_vsi(&mut self, seid: u16, properties: &VsiProperties) -> Result<()> {
        let handle = self.req_update_vsi(seid, properties)?;
        self.finish(handle).map(|_| ())
    }

    pub fn req_get_vsi(&mut self, seid: u16) -> Result<SessionHandle> {
        let mut params = VsiParams::default();
        params.uplink_seid.set(seid);
        self.start(Opcode::GetVsiParameters, &params, Payload::Receive(VSI_PROPERTIES_SIZE as u16))
    }

    pub fn get_vsi(&mut self, seid: u16) -> Result<(VsiProperties, VsiInfo)> {
        let handle = self.req_get_vsi(seid)?;
        resp_get_vsi(&self.finish(handle)?)
    }

    pub fn req_set_promiscuous(&mut self, seid: u16, flags: PromiscFlags, valid: PromiscFlags) -> Result<SessionHandle> {
        let mut params = PromiscuousParams::default();
        params.promiscuous_flags.set(flags.bits());
        params.valid_flags.set(valid.bits());
        params.seid.set(seid);
        self.start(Opcode::SetVsiPromiscuousModes, &params, Payload::None)
    }

    /// Sets the unicast, multicast and broadcast promiscuous bits of a VSI to `flags`.
    pub fn set_promiscuous(&mut self, seid: u16, flags: PromiscFlags) -> Result<()> {
        let valid = PromiscFlags::UNICAST | PromiscFlags::MULTICAST | PromiscFlags::BROADCAST;
        let handle = self.req_set_promiscuous(seid, flags & valid, valid)?;
        self.finish(handle).map(|_| ())
    }

    pub fn req_get_link_status(&mut self, enable_events: bool) -> Result<SessionHandle> {
        let mut params = LinkStatusParams::default();
        params.command_flags.set(if enable_events { LINK_STATUS_LSE_ENABLE } else { LINK_STATUS_LSE_DISABLE });
        self.start(Opcode::GetLinkStatus, &params, Payload::None)
    }

    pub fn get_link_status(&mut self, enable_events: bool) -> Result<LinkStatus> {
        let handle = self.req_get_link_status(enable_events)?;
        Ok(resp_link_status(&self.finish(handle)?))
    }

    pub fn req_set_phy_int_mask(&mut self, mask: PhyEvents) -> Result<SessionHandle> {
        let mut params = PhyIntMaskParams::default();
        params.event_mask.set(mask.bits());
        self.start(Opcode::SetPhyIntMask, &params, Payload::None)
    }

    pub fn set_phy_int_mask(&mut self, mask: PhyEvents) -> Result<()> {
        let handle = self.req_set_phy_int_mask(mask)?;
        self.finish(handle).map(|_| ())
    }

    pub fn req_stop_lldp(&mut self, shutdown_agent: bool, persist: bool) -> Result<SessionHandle> {
        let mut params = StopLldpParams::default();
        if shutdown_agent {
            params.command |= LLDP_AGENT_SHUTDOWN;
        }
        if persist {
            params.command |= LLDP_AGENT_STOP_PERSIST;
        }
        self.start(Opcode::StopLldp, &params, Payload::None)
    }

    pub fn stop_lldp(&mut self, shutdown_agent: bool, persist: bool) -> Result<()> {
        let handle = self.req_stop_lldp(shutdown_agent, persist)?;
        self.finish(handle).map(|_| ())
    }

    pub fn req_set_rss_key(&mut self, vsi_id: u16, key: &[u8; RSS_KEY_SIZE]) -> Result<SessionHandle> {
        let mut params = RssKeyParams::default();
        params.vsi_id.set(vsi_id | RSS_VSI_ID_VALID);
        self.start(Opcode::SetRssKey, &params, Payload::Send(key))
    }

    pub fn set_rss_key(&mut self, vsi_id: u16, key: &[u8; RSS_KEY_SIZE]) -> Result<()> {
        let handle = self.req_set_rss_key(vsi_id, key)?;
        self.finish(handle).map(|_| ())
    }

    pub fn req_set_rss_lut(&mut self, vsi_id: u16, pf_table: bool, lut: &[u8]) -> Result<SessionHandle> {
        let expected = if pf_table { RSS_PF_LUT_SIZE } else { RSS_VSI_LUT_SIZE };
        if lut.len() != expected {
            return Err(Error::Config(format!("RSS LUT has {} entries, expected {}", lut.len(), expected)));
        }
        let mut params = RssLutParams::default();
        params.vsi_id.set(vsi_id | RSS_VSI_ID_VALID);
        if pf_table {
            params.flags.set(RSS_LUT_TABLE_TYPE_PF);
        }
        self.start(Opcode::SetRssLut, &params, Payload::Send(lut))
    }

    pub fn set_rss_lut(&mut self, vsi_id: u16, pf_table: bool, lut: &[u8]) -> Result<()> {
        let handle = self.req_set_rss_lut(vsi_id, pf_table, lut)?;
        self.finish(handle).map(|_| ())
    }

    /// Programs the RSS key, falling back to the PF hash key registers when firmware does
    /// not support or allow the command.
    pub fn program_rss_key(&mut self, vsi_id: u16, key: &[u8; RSS_KEY_SIZE]) -> Result<()> {
        match self.set_rss_key(vsi_id, key) {
            Err(e) if is_unsupported(&e) => {
                warn!("Setting the RSS key through firmware failed ({}), using registers", e);
                for (n, word) in key.chunks_exact(4).enumerate().take(regs::PFQF_HKEY_COUNT) {
                    regs::write(self.bar, regs::PFQF_HKEY(n), u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
                }
                Ok(())
            }
            result => result,
        }
    }

    /// Programs the PF lookup table, with the same register fallback as the key.
    pub fn program_rss_lut(&mut self, vsi_id: u16, lut: &[u8]) -> Result<()> {
        match self.set_rss_lut(vsi_id, true, lut) {
            Err(e) if is_unsupported(&e) => {
                warn!("Setting the RSS LUT through firmware failed ({}), using registers", e);
                for (n, word) in lut.chunks_exact(4).enumerate().take(regs::PFQF_HLUT_COUNT) {
                    regs::write(self.bar, regs::PFQF_HLUT(n), u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
                }
                Ok(())
            }
            result => result,
        }
    }
}

fn is_unsupported(e: &Error) -> bool {
    matches!(e.status(), Some(AqStatus::ENOSYS) | Some(AqStatus::EPERM))
}
