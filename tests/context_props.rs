//! Properties of the context bit-field codec over arbitrary field placements.

use proptest::prelude::*;

use i40e_ctl::i40e::hmc::context::{self, ContextField};
use i40e_ctl::i40e::hmc::lan::{RxQueueContext, TxQueueContext, RX_QUEUE_CONTEXT_FIELDS, TX_QUEUE_CONTEXT_FIELDS};

const CONTEXT_LEN: usize = 32;

fn storage_size(width: u32) -> usize {
    match width {
        1..=8 => 1,
        9..=16 => 2,
        17..=32 => 4,
        _ => 8,
    }
}

/// A field of random width at a random bit position that fits the context.
fn arbitrary_field() -> impl Strategy<Value = ContextField> {
    (1u32..=64).prop_flat_map(|width| {
        (Just(width), 0..=(CONTEXT_LEN as u32 * 8 - width)).prop_map(|(width, lsb)| ContextField {
            name: "field",
            offset: 0,
            size: storage_size(width),
            width,
            lsb,
        })
    })
}

fn mask(width: u32) -> u64 {
    u64::MAX >> (64 - width)
}

fn truncate(value: u64, size: usize) -> u64 {
    if size == 8 {
        value
    } else {
        value & ((1 << (8 * size)) - 1)
    }
}

// Struct fields are native-endian integers
fn to_storage(value: u64, size: usize) -> Vec<u8> {
    match size {
        1 => vec![value as u8],
        2 => (value as u16).to_ne_bytes().to_vec(),
        4 => (value as u32).to_ne_bytes().to_vec(),
        _ => value.to_ne_bytes().to_vec(),
    }
}

fn from_storage(bytes: &[u8]) -> u64 {
    match bytes.len() {
        1 => bytes[0] as u64,
        2 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u64,
        4 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64,
        _ => u64::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]]),
    }
}

fn bit(bytes: &[u8], n: usize) -> bool {
    bytes[n / 8] & (1 << (n % 8)) != 0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Property: a written field reads back as its value truncated to the field width
    #[test]
    fn write_then_read_recovers_truncated_value(
        field in arbitrary_field(),
        value in any::<u64>(),
        background in prop::array::uniform32(any::<u8>())
    ) {
        let mut packed = background;
        context::write(&mut packed, &field, &to_storage(value, field.size)).unwrap();

        let mut out = vec![0u8; field.size];
        context::read(&packed, &field, &mut out).unwrap();
        prop_assert_eq!(from_storage(&out), truncate(value, field.size) & mask(field.width));
    }

    /// Property: bits outside the field keep whatever was there before the write
    #[test]
    fn write_touches_only_its_own_bits(
        field in arbitrary_field(),
        value in any::<u64>(),
        background in prop::array::uniform32(any::<u8>())
    ) {
        let mut packed = background;
        context::write(&mut packed, &field, &to_storage(value, field.size)).unwrap();

        let range = field.lsb as usize..(field.lsb + field.width) as usize;
        for n in 0..CONTEXT_LEN * 8 {
            if !range.contains(&n) {
                prop_assert_eq!(bit(&packed, n), bit(&background, n), "bit {} changed", n);
            }
        }
    }

    /// Property: the field lands little-endian at its bit offset
    #[test]
    fn field_bits_are_little_endian_at_lsb(
        field in arbitrary_field(),
        value in any::<u64>()
    ) {
        let mut packed = [0u8; CONTEXT_LEN];
        context::write(&mut packed, &field, &to_storage(value, field.size)).unwrap();

        let expected = truncate(value, field.size) & mask(field.width);
        for i in 0..field.width as usize {
            prop_assert_eq!(bit(&packed, field.lsb as usize + i), expected & (1 << i) != 0, "bit {} of the field", i);
        }
    }

    #[test]
    fn rx_context_round_trips(
        head in 0u16..(1 << 13),
        cpuid in any::<u8>(),
        base in 0u64..(1 << 57),
        qlen in 0u16..(1 << 13),
        dbuff in 0u16..(1 << 7),
        rxmax in 0u32..(1 << 14),
        lrxqthresh in 0u8..8
    ) {
        let ctx = RxQueueContext { head, cpuid: cpuid as u16, base, qlen, dbuff, rxmax, lrxqthresh, prefena: 1, ..Default::default() };
        let mut packed = [0u8; 32];
        context::pack(&mut packed, &ctx, RX_QUEUE_CONTEXT_FIELDS).unwrap();
        let back: RxQueueContext = context::unpack(&packed, RX_QUEUE_CONTEXT_FIELDS).unwrap();
        prop_assert_eq!(back, ctx);
    }

    #[test]
    fn tx_context_drops_bits_beyond_field_width(head in any::<u16>(), qlen in any::<u16>(), head_wb_addr in any::<u64>()) {
        let ctx = TxQueueContext { head, qlen, head_wb_addr, ..Default::default() };
        let mut packed = [0u8; 128];
        context::pack(&mut packed, &ctx, TX_QUEUE_CONTEXT_FIELDS).unwrap();
        let back: TxQueueContext = context::unpack(&packed, TX_QUEUE_CONTEXT_FIELDS).unwrap();
        prop_assert_eq!({ back.head }, head & 0x1FFF);
        prop_assert_eq!({ back.qlen }, qlen & 0x1FFF);
        prop_assert_eq!({ back.head_wb_addr }, head_wb_addr);
    }
}

#[test]
fn field_past_the_context_end_is_rejected() {
    let field = ContextField { name: "field", offset: 0, size: 2, width: 13, lsb: CONTEXT_LEN as u32 * 8 - 12 };
    let mut packed = [0u8; CONTEXT_LEN];
    assert!(context::write(&mut packed, &field, &[0xFF, 0xFF]).is_err());
    assert_eq!(packed, [0u8; CONTEXT_LEN]);
}

#[test]
fn width_beyond_storage_is_rejected() {
    let field = ContextField { name: "field", offset: 0, size: 1, width: 9, lsb: 0 };
    let mut packed = [0u8; CONTEXT_LEN];
    assert!(context::write(&mut packed, &field, &[0xFF]).is_err());
}
