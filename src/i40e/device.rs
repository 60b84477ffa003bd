use crate::env::Environment;
use crate::error::{Error, Result};
use crate::i40e::aq::commands::{resp_link_status, switch_element_type, FirmwareVersion, LinkStatus, PhyEvents, PromiscFlags, SwitchElement, VsiInfo, VsiProperties};
use crate::i40e::aq::{AdminQueue, AqConfig, Opcode, Role};
use crate::i40e::device_limits::RSS_KEY_SIZE;
use crate::i40e::hmc::lan::{RxQueueContext, TxQueueContext};
use crate::i40e::hmc::Hmc;
use crate::i40e::pci_regs;
use crate::i40e::regs::RegisterFile;
use crate::pci::PciAddress;

pub const INTEL_VENDOR_ID: u16 = 0x8086;

// XL710/X710/XXV710 and X722 physical functions
pub const SUPPORTED_DEVICE_IDS: &[u16] = &[
    0x1572, 0x1574, 0x1580, 0x1581, 0x1583, 0x1584, 0x1585, 0x1586, 0x1587, 0x1588, 0x1589, 0x158A, 0x158B, 0x37CE, 0x37CF, 0x37D0, 0x37D1, 0x37D2, 0x37D3,
];

#[derive(Clone, Copy, Debug)]
pub struct DeviceConfig {
    pub aq: AqConfig,
    /// Put the main VSI in unicast, multicast and broadcast promiscuous mode at open.
    pub promiscuous: bool,
    /// PHY events masked out at open.
    pub phy_event_mask: PhyEvents,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig { aq: AqConfig::default(), promiscuous: false, phy_event_mask: PhyEvents::default_mask() }
    }
}

/// An asynchronous firmware notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    LinkStatus(LinkStatus),
    Other(Opcode),
}

/// Bus address of BAR0, which must be a 64-bit memory BAR.
pub fn bar0_address(env: &impl Environment, pci: PciAddress) -> Result<u64> {
    let low = env.pci_read(pci, pci_regs::BAR0_LOW);
    if low & pci_regs::BAR0_LOW_::IO_SPACE != 0 || low & pci_regs::BAR0_LOW_::MEMORY_TYPE_64 == 0 {
        return Err(Error::Pci(format!("BAR0 of {} is not a 64-bit memory BAR", pci)));
    }
    let high = env.pci_read(pci, pci_regs::BAR0_HIGH);
    Ok(((high as u64) << 32) | (low & !pci_regs::BAR0_LOW_::FLAGS) as u64)
}

fn prepare_pci(env: &impl Environment, pci: PciAddress) -> Result<()> {
    let id = env.pci_read(pci, pci_regs::ID);
    let vendor = id as u16;
    let device = (id >> 16) as u16;
    if vendor != INTEL_VENDOR_ID || !SUPPORTED_DEVICE_IDS.contains(&device) {
        return Err(Error::UnsupportedDevice { vendor, device });
    }

    if !pci_regs::is_field_cleared(env, pci, pci_regs::PMCSR, pci_regs::PMCSR_::POWER_STATE) {
        return Err(Error::Pci(format!("{} is not in power state D0", pci)));
    }

    pci_regs::set_field(env, pci, pci_regs::COMMAND, pci_regs::COMMAND_::BUS_MASTER_ENABLE);
    pci_regs::set_field(env, pci, pci_regs::COMMAND, pci_regs::COMMAND_::MEMORY_ACCESS_ENABLE);
    pci_regs::set_field(env, pci, pci_regs::COMMAND, pci_regs::COMMAND_::INTERRUPT_DISABLE);
    Ok(())
}

/// What firmware tells us while the admin queue comes up.
struct Discovery {
    version: FirmwareVersion,
    mac: [u8; 6],
    switch_elements: Vec<SwitchElement>,
    main_vsi: u16,
}

fn discover<E: Environment, R: RegisterFile>(aq: &mut AdminQueue<'_, E, R>, config: &DeviceConfig) -> Result<Discovery> {
    let version = aq.get_version()?;
    info!(
        "Firmware {}.{} (build {:#x}), API {}.{}",
        version.fw_major, version.fw_minor, version.fw_build, version.api_major, version.api_minor
    );

    aq.clear_pxe_mode()?;

    let mac = aq.macaddr_read()?;
    info!("MAC address {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]);

    if let Err(e) = aq.stop_lldp(true, false) {
        warn!("Could not stop the firmware LLDP agent: {}", e);
    }

    aq.set_phy_int_mask(config.phy_event_mask)?;

    match aq.get_link_status(true) {
        Ok(link) => info!("Link {}", if link.link_up { "up" } else { "down" }),
        Err(e) => warn!("Could not enable link status events: {}", e),
    }

    let switch_elements = aq.get_switch_config()?;
    let main_vsi = switch_elements
        .iter()
        .find(|e| e.element_type == switch_element_type::VSI)
        .map(|e| e.seid.get())
        .ok_or(Error::InvalidResponse { opcode: Opcode::GetSwitchConfig.code(), reason: "no VSI in the switch configuration" })?;
    debug!("Main VSI is SEID {}", main_vsi);

    Ok(Discovery { version, mac, switch_elements, main_vsi })
}

/// An open i40e physical function.
pub struct Device<'a, E: Environment, R: RegisterFile> {
    pci: PciAddress,
    aq: AdminQueue<'a, E, R>,
    hmc: Hmc<'a, E, R>,
    version: FirmwareVersion,
    mac: [u8; 6],
    switch_elements: Vec<SwitchElement>,
    main_vsi: u16,
}

impl<'a, E: Environment, R: RegisterFile> Device<'a, E, R> {
    /// Brings the function up. On failure, everything already set up is torn down again.
    pub fn open(env: &'a E, bar: &'a R, pci: PciAddress, config: &DeviceConfig) -> Result<Device<'a, E, R>> {
        prepare_pci(env, pci)?;

        let mut aq = AdminQueue::init(env, bar, config.aq)?;
        let discovery = match discover(&mut aq, config) {
            Ok(discovery) => discovery,
            Err(e) => {
                warn!("Bring-up of {} failed: {}", pci, e);
                aq.shutdown();
                return Err(e);
            }
        };

        let hmc = match Hmc::init(env, bar) {
            Ok(hmc) => hmc,
            Err(e) => {
                warn!("HMC setup of {} failed: {}", pci, e);
                aq.shutdown();
                return Err(e);
            }
        };

        let mut device = Device {
            pci,
            aq,
            hmc,
            version: discovery.version,
            mac: discovery.mac,
            switch_elements: discovery.switch_elements,
            main_vsi: discovery.main_vsi,
        };

        if config.promiscuous {
            if let Err(e) = device.set_promiscuous(true) {
                warn!("Enabling promiscuous mode on {} failed: {}", pci, e);
                device.close();
                return Err(e);
            }
        }

        info!("Device {} open", pci);
        Ok(device)
    }

    pub fn close(self) {
        self.hmc.shutdown();
        self.aq.shutdown();
        info!("Device {} closed", self.pci);
    }

    pub fn pci_address(&self) -> PciAddress {
        self.pci
    }

    pub fn firmware_version(&self) -> &FirmwareVersion {
        &self.version
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    pub fn switch_elements(&self) -> &[SwitchElement] {
        &self.switch_elements
    }

    pub fn main_vsi(&self) -> u16 {
        self.main_vsi
    }

    pub fn admin_queue(&mut self) -> &mut AdminQueue<'a, E, R> {
        &mut self.aq
    }

    pub fn hmc(&mut self) -> &mut Hmc<'a, E, R> {
        &mut self.hmc
    }

    pub fn set_promiscuous(&mut self, enabled: bool) -> Result<()> {
        let flags = if enabled { PromiscFlags::UNICAST | PromiscFlags::MULTICAST | PromiscFlags::BROADCAST } else { PromiscFlags::BROADCAST };
        self.aq.set_promiscuous(self.main_vsi, flags)
    }

    /// Programs the hash key and the PF lookup table of the main VSI.
    pub fn configure_rss(&mut self, key: &[u8; RSS_KEY_SIZE], lut: &[u8]) -> Result<()> {
        let (_, info) = self.aq.get_vsi(self.main_vsi)?;
        self.aq.program_rss_key(info.vsi_number, key)?;
        self.aq.program_rss_lut(info.vsi_number, lut)
    }

    pub fn read_rx_ctl(&mut self, reg: usize) -> u32 {
        self.aq.read_rx_ctl(reg)
    }

    pub fn write_rx_ctl(&mut self, reg: usize, value: u32) {
        self.aq.write_rx_ctl(reg, value);
    }

    pub fn get_vsi(&mut self) -> Result<(VsiProperties, VsiInfo)> {
        self.aq.get_vsi(self.main_vsi)
    }

    pub fn update_vsi(&mut self, properties: &VsiProperties) -> Result<()> {
        self.aq.update_vsi(self.main_vsi, properties)
    }

    pub fn link_status(&mut self) -> Result<LinkStatus> {
        self.aq.get_link_status(true)
    }

    pub fn set_context_tx(&mut self, queue: usize, ctx: &TxQueueContext) -> Result<()> {
        self.hmc.set_context_tx(queue, ctx)
    }

    pub fn set_context_rx(&mut self, queue: usize, ctx: &RxQueueContext) -> Result<()> {
        self.hmc.set_context_rx(queue, ctx)
    }

    pub fn get_context_tx(&mut self, queue: usize) -> Result<TxQueueContext> {
        self.hmc.get_context_tx(queue)
    }

    pub fn get_context_rx(&mut self, queue: usize) -> Result<RxQueueContext> {
        self.hmc.get_context_rx(queue)
    }

    /// Drains the receive ring and returns the firmware events found there.
    pub fn poll_events(&mut self) -> Vec<Event> {
        self.aq.drain(Role::Receive);
        self.aq
            .take_events()
            .iter()
            .map(|event| match event.opcode {
                Opcode::GetLinkStatus => Event::LinkStatus(resp_link_status(event)),
                other => Event::Other(other),
            })
            .collect()
    }
}
