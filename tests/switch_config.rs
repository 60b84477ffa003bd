mod common;

use std::collections::HashSet;

use i40e_ctl::i40e::aq::commands::{switch_element_type, SwitchElement};
use i40e_ctl::i40e::aq::{AqStatus, Opcode};
use i40e_ctl::Error;

use common::{admin_queue, sim};

fn elements(count: usize) -> Vec<SwitchElement> {
    (0..count)
        .map(|n| {
            let mut e = SwitchElement { element_type: switch_element_type::VSI, revision: 1, ..Default::default() };
            e.seid.set(512 + n as u16);
            e.uplink_seid.set(16);
            e
        })
        .collect()
}

#[test]
fn walk_returns_every_element_once() {
    for count in [0, 1, 2, 7, 31, 32, 100] {
        for per_response in [1, 3, 31, 64] {
            let (env, dev) = sim();
            dev.firmware(|fw| {
                fw.switch_elements = elements(count);
                fw.elements_per_response = per_response;
            });
            let mut aq = admin_queue(&env, &dev);

            let walked = aq.get_switch_config().unwrap();
            assert_eq!(walked, elements(count), "{} elements, {} per response", count, per_response);
            let seids: HashSet<u16> = walked.iter().map(|e| e.seid.get()).collect();
            assert_eq!(seids.len(), count);

            // One request per buffer, plus one for an empty configuration
            let batch = per_response.min(31);
            let requests = dev.commands().iter().filter(|&&op| op == Opcode::GetSwitchConfig).count();
            assert_eq!(requests, count.div_ceil(batch).max(1));
            assert!(aq.sessions().is_empty());
            aq.shutdown();
        }
    }
}

#[test]
fn default_firmware_reports_its_switch() {
    let (env, dev) = sim();
    let mut aq = admin_queue(&env, &dev);
    let walked = aq.get_switch_config().unwrap();
    let types: Vec<u8> = walked.iter().map(|e| e.element_type).collect();
    assert_eq!(types, vec![switch_element_type::MAC, switch_element_type::PF, switch_element_type::VSI, switch_element_type::VSI]);
    assert_eq!(walked[2].seid.get(), 390);
    aq.shutdown();
}

#[test]
fn failed_page_fails_the_walk() {
    let (env, dev) = sim();
    dev.fail(Opcode::GetSwitchConfig, AqStatus::EIO, 1);
    let mut aq = admin_queue(&env, &dev);
    match aq.get_switch_config() {
        Err(Error::CommandStatus { opcode, status }) => {
            assert_eq!(opcode, Opcode::GetSwitchConfig.code());
            assert_eq!(status, AqStatus::EIO);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(aq.sessions().is_empty());
    assert_eq!(aq.get_switch_config().unwrap().len(), 4);
    aq.shutdown();
}

#[test]
fn firmware_without_room_for_an_element_is_an_error() {
    let (env, dev) = sim();
    dev.firmware(|fw| fw.elements_per_response = 0);
    let mut aq = admin_queue(&env, &dev);
    let err = aq.get_switch_config().unwrap_err();
    assert_eq!(err.status(), Some(AqStatus::ENOMEM));
    aq.shutdown();
}

#[test]
fn cursor_cycle_fails_the_walk() {
    for cycle in [vec![(0, 2), (2, 2)], vec![(0, 2), (2, 3), (3, 2)]] {
        let (env, dev) = sim();
        dev.firmware(|fw| {
            fw.elements_per_response = 1;
            fw.next_cursor = cycle.iter().copied().collect();
        });
        let mut aq = admin_queue(&env, &dev);
        assert!(matches!(aq.get_switch_config(), Err(Error::InvalidResponse { .. })), "{:?}", cycle);
        let requests = dev.commands().iter().filter(|&&op| op == Opcode::GetSwitchConfig).count();
        assert_eq!(requests, cycle.len());
        assert!(aq.sessions().is_empty());
        aq.shutdown();
    }
}
