#![allow(dead_code)]

use i40e_ctl::env::SimEnvironment;
use i40e_ctl::i40e::aq::{AdminQueue, AqConfig};
use i40e_ctl::i40e::sim::SimDevice;
use i40e_ctl::pci::PciAddress;

pub const PCI: PciAddress = PciAddress { bus: 0x83, device: 0, function: 0 };

pub fn sim() -> (SimEnvironment, SimDevice) {
    let env = SimEnvironment::new();
    let dev = SimDevice::new(&env);
    (env, dev)
}

pub fn admin_queue<'a>(env: &'a SimEnvironment, dev: &'a SimDevice) -> AdminQueue<'a, SimEnvironment, SimDevice> {
    AdminQueue::init(env, dev, AqConfig::default()).unwrap()
}

pub fn small_admin_queue<'a>(env: &'a SimEnvironment, dev: &'a SimDevice, entries: u16) -> AdminQueue<'a, SimEnvironment, SimDevice> {
    let config = AqConfig { num_asq_entries: entries, num_arq_entries: entries, ..AqConfig::default() };
    AdminQueue::init(env, dev, config).unwrap()
}
