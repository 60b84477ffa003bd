// Enable non-default lints
#![warn(future_incompatible)]
#![warn(nonstandard_style)]
#![warn(rust_2018_idioms)]
#![warn(unused)]

use std::process;

use tracing_subscriber::EnvFilter;

use i40e_ctl::env::LinuxEnvironment;
use i40e_ctl::i40e::aq::commands::switch_element_type;
use i40e_ctl::i40e::device::{self, Device, DeviceConfig};
use i40e_ctl::i40e::driver_constants::BAR0_MAP_SIZE;
use i40e_ctl::pci::PciAddress;
use i40e_ctl::{Error, Result};

fn element_type_name(element_type: u8) -> &'static str {
    match element_type {
        switch_element_type::MAC => "MAC",
        switch_element_type::PF => "PF",
        switch_element_type::VF => "VF",
        switch_element_type::EMP => "EMP",
        switch_element_type::BMC => "BMC",
        switch_element_type::PV => "PV",
        switch_element_type::VEB => "VEB",
        switch_element_type::PA => "PA",
        switch_element_type::VSI => "VSI",
        _ => "?",
    }
}

fn show(env: &LinuxEnvironment, pci: PciAddress, config: &DeviceConfig) -> Result<()> {
    let bar = env.map_physical_memory(device::bar0_address(env, pci)?, BAR0_MAP_SIZE)?;
    let dev = Device::open(env, &bar, pci, config)?;

    let version = dev.firmware_version();
    let mac = dev.mac_address();
    println!("{}", pci);
    println!("  firmware {}.{} build {:#x}, API {}.{}", version.fw_major, version.fw_minor, version.fw_build, version.api_major, version.api_minor);
    println!("  MAC {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]);
    println!("  switch elements:");
    for element in dev.switch_elements() {
        println!(
            "    {:<4} seid {:>4} uplink {:>4} downlink {:>4}{}",
            element_type_name(element.element_type),
            element.seid.get(),
            element.uplink_seid.get(),
            element.downlink_seid.get(),
            if element.seid.get() == dev.main_vsi() { " (main)" } else { "" }
        );
    }

    dev.close();
    Ok(())
}

fn run() -> Result<()> {
    let mut config = DeviceConfig::default();
    let mut addresses = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--promisc" => config.promiscuous = true,
            other => addresses.push(other.parse::<PciAddress>()?),
        }
    }
    if addresses.is_empty() {
        return Err(Error::Config("usage: i40e-ctl [--promisc] <bus:device.function>...".to_string()));
    }

    let env = LinuxEnvironment::new()?;
    for pci in addresses {
        show(&env, pci, &config)?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    if let Err(e) = run() {
        eprintln!("i40e-ctl: {}", e);
        process::exit(1);
    }
}
