use zerocopy::{AsBytes, FromBytes, FromZeroes};

use super::context::{context_field, ContextField};

// Ring base addresses are stored in these units
pub const QUEUE_BASE_UNIT: u64 = 128;

/// LAN transmit queue context, unpacked.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct TxQueueContext {
    pub head: u16,
    pub new_context: u8,
    pub base: u64,
    pub fc_ena: u8,
    pub timesync_ena: u8,
    pub fd_ena: u8,
    pub alt_vlan_ena: u8,
    pub cpuid: u16,
    pub thead_wb: u16,
    pub head_wb_ena: u8,
    pub qlen: u16,
    pub tphrdesc_ena: u8,
    pub tphrpacket_ena: u8,
    pub tphwdesc_ena: u8,
    pub head_wb_addr: u64,
    pub crc: u32,
    pub rdylist: u16,
    pub rdylist_act: u8,
}

pub const TX_QUEUE_CONTEXT_FIELDS: &[ContextField] = &[
    context_field!(TxQueueContext, head: u16, 13, 0),
    context_field!(TxQueueContext, new_context: u8, 1, 30),
    context_field!(TxQueueContext, base: u64, 57, 32),
    context_field!(TxQueueContext, fc_ena: u8, 1, 89),
    context_field!(TxQueueContext, timesync_ena: u8, 1, 90),
    context_field!(TxQueueContext, fd_ena: u8, 1, 91),
    context_field!(TxQueueContext, alt_vlan_ena: u8, 1, 92),
    context_field!(TxQueueContext, cpuid: u16, 8, 96),
    // line 1
    context_field!(TxQueueContext, thead_wb: u16, 13, 128),
    context_field!(TxQueueContext, head_wb_ena: u8, 1, 160),
    context_field!(TxQueueContext, qlen: u16, 13, 161),
    context_field!(TxQueueContext, tphrdesc_ena: u8, 1, 174),
    context_field!(TxQueueContext, tphrpacket_ena: u8, 1, 175),
    context_field!(TxQueueContext, tphwdesc_ena: u8, 1, 176),
    context_field!(TxQueueContext, head_wb_addr: u64, 64, 192),
    // line 7
    context_field!(TxQueueContext, crc: u32, 32, 896),
    context_field!(TxQueueContext, rdylist: u16, 10, 980),
    context_field!(TxQueueContext, rdylist_act: u8, 1, 990),
];

impl TxQueueContext {
    /// A context for a ring of `len` descriptors at bus address `ring_addr`.
    pub fn new(ring_addr: u64, len: u16) -> TxQueueContext {
        TxQueueContext { new_context: 1, base: ring_addr / QUEUE_BASE_UNIT, qlen: len, ..Default::default() }
    }
}

/// LAN receive queue context, unpacked.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
pub struct RxQueueContext {
    pub head: u16,
    pub cpuid: u16,
    pub base: u64,
    pub qlen: u16,
    pub dbuff: u16,
    pub hbuff: u16,
    pub dtype: u8,
    pub dsize: u8,
    pub crcstrip: u8,
    pub fc_ena: u8,
    pub l2tsel: u8,
    pub hsplit_0: u8,
    pub hsplit_1: u8,
    pub showiv: u8,
    pub rxmax: u32,
    pub tphrdesc_ena: u8,
    pub tphwdesc_ena: u8,
    pub tphdata_ena: u8,
    pub tphhead_ena: u8,
    pub lrxqthresh: u8,
    pub prefena: u8,
}

pub const RX_QUEUE_CONTEXT_FIELDS: &[ContextField] = &[
    context_field!(RxQueueContext, head: u16, 13, 0),
    context_field!(RxQueueContext, cpuid: u16, 8, 13),
    context_field!(RxQueueContext, base: u64, 57, 32),
    context_field!(RxQueueContext, qlen: u16, 13, 89),
    context_field!(RxQueueContext, dbuff: u16, 7, 102),
    context_field!(RxQueueContext, hbuff: u16, 5, 109),
    context_field!(RxQueueContext, dtype: u8, 2, 114),
    context_field!(RxQueueContext, dsize: u8, 1, 116),
    context_field!(RxQueueContext, crcstrip: u8, 1, 117),
    context_field!(RxQueueContext, fc_ena: u8, 1, 118),
    context_field!(RxQueueContext, l2tsel: u8, 1, 119),
    context_field!(RxQueueContext, hsplit_0: u8, 4, 120),
    context_field!(RxQueueContext, hsplit_1: u8, 2, 124),
    context_field!(RxQueueContext, showiv: u8, 1, 127),
    context_field!(RxQueueContext, rxmax: u32, 14, 174),
    context_field!(RxQueueContext, tphrdesc_ena: u8, 1, 193),
    context_field!(RxQueueContext, tphwdesc_ena: u8, 1, 194),
    context_field!(RxQueueContext, tphdata_ena: u8, 1, 195),
    context_field!(RxQueueContext, tphhead_ena: u8, 1, 196),
    context_field!(RxQueueContext, lrxqthresh: u8, 3, 198),
    context_field!(RxQueueContext, prefena: u8, 1, 201),
];

// dbuff and hbuff are in these units
pub const RX_DBUFF_UNIT: u32 = 128;
pub const RX_HBUFF_UNIT: u32 = 64;

impl RxQueueContext {
    /// A context for a ring of `len` descriptors at `ring_addr` receiving into
    /// `buffer_size`-byte buffers, with CRC stripping and 32-byte descriptors.
    pub fn new(ring_addr: u64, len: u16, buffer_size: u32) -> RxQueueContext {
        RxQueueContext {
            base: ring_addr / QUEUE_BASE_UNIT,
            qlen: len,
            dbuff: (buffer_size / RX_DBUFF_UNIT) as u16,
            dsize: 1,
            crcstrip: 1,
            rxmax: buffer_size,
            prefena: 1,
            ..Default::default()
        }
    }
}

/// Bytes of packed context the table touches.
pub fn packed_len(table: &[ContextField]) -> usize {
    table.iter().map(|f| (f.lsb + f.width) as usize).max().unwrap_or(0).div_ceil(8)
}
