mod common;

use i40e_ctl::i40e::aq::commands::MacAddressFlags;
use i40e_ctl::i40e::aq::{AqStatus, Opcode};
use i40e_ctl::Error;

use common::{admin_queue, sim};

#[test]
fn reads_the_lan_address() {
    let (env, dev) = sim();
    dev.firmware(|fw| fw.mac = [0x00, 0x1B, 0x21, 0xAA, 0xBB, 0xCC]);
    let mut aq = admin_queue(&env, &dev);
    assert_eq!(aq.macaddr_read().unwrap(), [0x00, 0x1B, 0x21, 0xAA, 0xBB, 0xCC]);
    assert_eq!(dev.commands(), vec![Opcode::MacAddressRead]);
    aq.shutdown();
}

#[test]
fn address_without_port_valid_flag_is_rejected() {
    let (env, dev) = sim();
    dev.firmware(|fw| fw.mac_flags = MacAddressFlags::LAN_ADDR_VALID);
    let mut aq = admin_queue(&env, &dev);
    match aq.macaddr_read() {
        Err(Error::InvalidResponse { opcode, .. }) => assert_eq!(opcode, Opcode::MacAddressRead.code()),
        other => panic!("unexpected {:?}", other),
    }
    assert!(aq.sessions().is_empty());
    aq.shutdown();
}

#[test]
fn firmware_failure_is_propagated() {
    let (env, dev) = sim();
    dev.fail(Opcode::MacAddressRead, AqStatus::EACCES, 1);
    let mut aq = admin_queue(&env, &dev);
    assert_eq!(aq.macaddr_read().unwrap_err().status(), Some(AqStatus::EACCES));
    assert_eq!(aq.macaddr_read().unwrap(), [0x3C, 0xFD, 0xFE, 0x00, 0x00, 0x01]);
    aq.shutdown();
}
