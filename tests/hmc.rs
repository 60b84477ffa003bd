mod common;

use i40e_ctl::i40e::device_limits::{HMC_L2OBJ_BASE_ALIGNMENT, HMC_MAX_BP_COUNT, HMC_PAGE_SIZE, HMC_SD_PAGE_SIZE};
use i40e_ctl::i40e::hmc::lan::{RxQueueContext, TxQueueContext};
use i40e_ctl::i40e::hmc::{Hmc, HmcCapabilities, HmcLayout, HmcObjectKind};
use i40e_ctl::i40e::regs;
use i40e_ctl::i40e::sim::{SdProgram, SimDevice};
use i40e_ctl::Error;

use common::sim;

// 1024 queues of 2 KB TX and 32 B RX contexts: TX fills the first segment, RX starts the second
fn two_segment_device(dev: &SimDevice) {
    dev.set_register(regs::GLHMC_LANQMAX, 1024);
    dev.set_register(regs::GLHMC_LANTXOBJSZ, 11);
    dev.set_register(regs::GLHMC_LANRXOBJSZ, 5);
}

#[test]
fn layout_with_odd_rx_object_size() {
    let layout = HmcLayout::compute(&HmcCapabilities { queue_max: 64, tx_object_size: 128, rx_object_size: 96 }).unwrap();
    assert_eq!(layout.tx.base, 0);
    assert_eq!(layout.rx.base, (64 * 128usize).div_ceil(HMC_L2OBJ_BASE_ALIGNMENT) * HMC_L2OBJ_BASE_ALIGNMENT);
    assert_eq!(layout.sd_count, (64 * 128 + 64 * 96usize).div_ceil(HMC_SD_PAGE_SIZE));
    assert_eq!(layout.rx.end(), 64 * 128 + 64 * 96);
}

#[test]
fn layout_comes_from_capability_registers() {
    let (env, dev) = sim();
    let hmc = Hmc::init(&env, &dev).unwrap();
    let layout = *hmc.layout();
    assert_eq!((layout.tx.base, layout.tx.count, layout.tx.size), (0, 64, 128));
    assert_eq!((layout.rx.base, layout.rx.count, layout.rx.size), (8192, 64, 32));
    assert_eq!(layout.sd_count, 1);

    // FPM bases are in 512-byte units
    assert_eq!(dev.register(regs::GLHMC_LANTXBASE(0)), 0);
    assert_eq!(dev.register(regs::GLHMC_LANTXCNT(0)), 64);
    assert_eq!(dev.register(regs::GLHMC_LANRXBASE(0)), 16);
    assert_eq!(dev.register(regs::GLHMC_LANRXCNT(0)), 64);
    hmc.shutdown();
}

#[test]
fn fpm_registers_follow_the_function_number() {
    let (env, dev) = sim();
    dev.set_register(regs::PF_FUNC_RID, 2);
    let hmc = Hmc::init(&env, &dev).unwrap();
    assert_eq!(hmc.pf_id(), 2);
    assert_eq!(dev.register(regs::GLHMC_LANRXBASE(2)), 16);
    assert_eq!(dev.register(regs::GLHMC_LANRXBASE(0)), 0);
    hmc.shutdown();
    assert_eq!(dev.register(regs::GLHMC_LANRXCNT(2)), 0);
}

#[test]
fn addresses_match_hardware_translation() {
    let (env, dev) = sim();
    two_segment_device(&dev);
    let hmc = Hmc::init(&env, &dev).unwrap();
    assert_eq!(hmc.layout().sd_count, 2);

    for kind in [HmcObjectKind::LanTx, HmcObjectKind::LanRx] {
        let object = *hmc.layout().object(kind);
        for index in 0..object.count {
            let fpm = object.base + index * object.size;
            let sd = fpm / HMC_SD_PAGE_SIZE;
            let pd = (fpm / HMC_PAGE_SIZE) % HMC_MAX_BP_COUNT;
            let page = dev.pd_entry(sd as u32, pd).unwrap() & !1;
            let va = hmc.va_for(kind, index).unwrap() as u64;
            assert_eq!(va, page + (fpm % HMC_PAGE_SIZE) as u64, "{:?} {}", kind, index);
        }
        assert!(matches!(hmc.va_for(kind, object.count), Err(Error::OutOfRange { .. })));
    }
    hmc.shutdown();
}

#[test]
fn segments_are_programmed_data_first() {
    let (env, dev) = sim();
    two_segment_device(&dev);
    let hmc = Hmc::init(&env, &dev).unwrap();

    let writes = dev.hmc_writes();
    assert_eq!(writes.len(), 6);
    for (sd, chunk) in writes.chunks(3).enumerate() {
        let regs_written: Vec<usize> = chunk.iter().map(|&(reg, _)| reg).collect();
        assert_eq!(regs_written, vec![regs::PFHMC_SDDATAHIGH, regs::PFHMC_SDDATALOW, regs::PFHMC_SDCMD]);
        assert_eq!(chunk[2].1, sd as u32 | regs::PFHMC_SDCMD_::PMSDWR);

        let entry = dev.sd_entry(sd as u32).unwrap();
        assert!(entry.valid);
        assert_eq!(entry.bp_count, 512);
        assert_eq!(entry.pd_table & 0xFFF, 0);
        for pd in 0..HMC_MAX_BP_COUNT {
            let pd_entry = dev.pd_entry(sd as u32, pd).unwrap();
            assert_eq!(pd_entry & 1, 1);
            assert_eq!(pd_entry & 0xFFE, 0);
        }
    }
    hmc.shutdown();
}

#[test]
fn release_invalidates_every_page_and_frees_memory() {
    let (env, dev) = sim();
    let hmc = Hmc::init(&env, &dev).unwrap();
    assert_eq!(env.live_pages(), 1 + HMC_MAX_BP_COUNT);
    let programmed = dev.hmc_writes().len();

    hmc.shutdown();
    let writes = &dev.hmc_writes()[programmed..];
    assert_eq!(writes[0], (regs::PFHMC_SDDATAHIGH, 0));
    assert_eq!(writes[1], (regs::PFHMC_SDDATALOW, 512 << 2));
    assert_eq!(writes[2], (regs::PFHMC_SDCMD, regs::PFHMC_SDCMD_::PMSDWR));
    let invalidations: Vec<u32> = writes[3..].iter().filter(|&&(reg, _)| reg == regs::PFHMC_PDINV).map(|&(_, value)| value).collect();
    assert_eq!(invalidations.len(), HMC_MAX_BP_COUNT);
    assert_eq!(invalidations[7], 7 << 16);

    assert_eq!(dev.sd_entry(0), Some(SdProgram { pd_table: 0, bp_count: 512, valid: false }));
    assert_eq!(env.live_pages(), 0);
    assert_eq!(dev.register(regs::GLHMC_LANTXCNT(0)), 0);
}

#[test]
fn single_segment_release_and_reallocate() {
    let (env, dev) = sim();
    two_segment_device(&dev);
    let mut hmc = Hmc::init(&env, &dev).unwrap();

    assert!(hmc.sd_release(1));
    assert!(!hmc.sd_release(1));
    assert!(!hmc.is_allocated(1));
    assert!(matches!(hmc.va_for(HmcObjectKind::LanRx, 0), Err(Error::OutOfRange { .. })));
    assert!(hmc.va_for(HmcObjectKind::LanTx, 0).is_ok());

    hmc.sd_allocate(1).unwrap();
    assert!(hmc.is_allocated(1));
    assert!(dev.sd_entry(1).unwrap().valid);
    assert!(matches!(hmc.sd_allocate(2), Err(Error::OutOfRange { .. })));
    hmc.shutdown();
    assert_eq!(env.live_pages(), 0);
}

#[test]
fn allocation_failure_rolls_back_earlier_segments() {
    let (env, dev) = sim();
    two_segment_device(&dev);
    // First segment and part of the second
    env.fail_allocations_after(1 + HMC_MAX_BP_COUNT + 100);

    assert!(matches!(Hmc::init(&env, &dev), Err(Error::Allocation { .. })));
    assert_eq!(env.live_pages(), 0);
    assert!(!dev.sd_entry(0).unwrap().valid);
    assert_eq!(dev.sd_entry(1), None);
    assert_eq!(dev.register(regs::GLHMC_LANRXBASE(0)), 0);
}

#[test]
fn contexts_round_trip_through_hmc_memory() {
    let (env, dev) = sim();
    let mut hmc = Hmc::init(&env, &dev).unwrap();

    let tx = TxQueueContext { head: 17, cpuid: 3, ..TxQueueContext::new(0x7F00_0080, 1024) };
    let rx = RxQueueContext::new(0x7F10_0000, 512, 2048);
    hmc.set_context_tx(5, &tx).unwrap();
    hmc.set_context_rx(63, &rx).unwrap();
    assert_eq!(hmc.get_context_tx(5).unwrap(), tx);
    assert_eq!(hmc.get_context_rx(63).unwrap(), rx);
    assert_eq!(hmc.get_context_tx(4).unwrap(), TxQueueContext::default());

    // Hardware sees the packed form: head in the low 13 bits of the first word
    let va = hmc.va_for(HmcObjectKind::LanTx, 5).unwrap();
    let first = unsafe { std::slice::from_raw_parts(va, 4) };
    assert_eq!(u32::from_le_bytes([first[0], first[1], first[2], first[3]]), 17 | (1 << 30));

    assert!(matches!(hmc.set_context_rx(64, &rx), Err(Error::OutOfRange { .. })));
    hmc.shutdown();
}

#[test]
fn objects_may_straddle_a_pd_page() {
    let (env, dev) = sim();
    // 4 queues of 128 B TX and 1 KB RX contexts: RX starts at 512, so RX object 3 spans 3584..4608
    dev.set_register(regs::GLHMC_LANQMAX, 4);
    dev.set_register(regs::GLHMC_LANTXOBJSZ, 7);
    dev.set_register(regs::GLHMC_LANRXOBJSZ, 10);
    let mut hmc = Hmc::init(&env, &dev).unwrap();
    let layout = *hmc.layout();
    assert_eq!(layout.rx.base, 512);
    let first = layout.locate(HmcObjectKind::LanRx, 3).unwrap();
    let last = layout.locate_fpm(layout.rx.base + 4 * layout.rx.size - 1).unwrap();
    assert_eq!((first.pd, first.offset), (0, 3584));
    assert_eq!((last.pd, last.offset), (1, 511));

    let rx = RxQueueContext::new(0x7F10_0000, 512, 2048);
    hmc.set_context_rx(3, &rx).unwrap();
    assert_eq!(hmc.get_context_rx(3).unwrap(), rx);

    let pattern: Vec<u8> = (0..layout.rx.size).map(|i| (i % 251) as u8).collect();
    hmc.write_object(HmcObjectKind::LanRx, 3, &pattern).unwrap();
    assert_eq!(hmc.read_object(HmcObjectKind::LanRx, 3).unwrap(), pattern);
    // The tail landed at the start of the next page
    let va = hmc.va_for(HmcObjectKind::LanRx, 3).unwrap();
    let head = unsafe { std::slice::from_raw_parts(va, HMC_PAGE_SIZE - first.offset) };
    assert_eq!(head, &pattern[..HMC_PAGE_SIZE - first.offset]);
    assert!(hmc.read_object(HmcObjectKind::LanRx, 2).unwrap().iter().all(|b| *b == 0));

    assert!(matches!(hmc.write_object(HmcObjectKind::LanRx, 3, &pattern[1..]), Err(Error::OutOfRange { .. })));
    hmc.shutdown();
}
