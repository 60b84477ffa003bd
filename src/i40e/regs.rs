#![allow(non_snake_case)]

/// 32-bit register access, indexed in registers (byte offset / 4).
///
/// Writes take `&self`: a register file is a window onto device state, not memory the
/// driver owns.
pub trait RegisterFile {
    fn read(&self, reg: usize) -> u32;
    fn write(&self, reg: usize, value: u32);
}

pub fn read(bar: &impl RegisterFile, reg: usize) -> u32 {
    bar.read(reg)
}

pub fn read_field(bar: &impl RegisterFile, reg: usize, field: u32) -> u32 {
    let value = read(bar, reg);
    let shift = field.trailing_zeros();
    (value & field) >> shift
}

pub fn write(bar: &impl RegisterFile, reg: usize, value: u32) {
    bar.write(reg, value);
}

pub fn write_field(bar: &impl RegisterFile, reg: usize, field: u32, field_value: u32) {
    let old_value = read(bar, reg);
    let shift = field.trailing_zeros();
    let new_value = (old_value & !field) | ((field_value << shift) & field);
    write(bar, reg, new_value);
}

pub fn clear(bar: &impl RegisterFile, reg: usize) {
    write(bar, reg, 0);
}

pub fn set_field(bar: &impl RegisterFile, reg: usize, field: u32) {
    let old_value = read(bar, reg);
    let new_value = old_value | field;
    write(bar, reg, new_value);
}

pub fn is_field_cleared(bar: &impl RegisterFile, reg: usize, field: u32) -> bool {
    read_field(bar, reg, field) == 0
}

/// Places `value` in `field` without touching the device, for registers built up in full
/// before a single write.
pub const fn field_value(field: u32, value: u32) -> u32 {
    (value << field.trailing_zeros()) & field
}

// All regs divided by 4 since they're used to address 32-bit registers, not bytes.

// --- Admin queue ---

pub const PF_ATQBAL: usize = 0x0008_0000 / 4;
pub const PF_ATQBAH: usize = 0x0008_0100 / 4;
pub const PF_ATQLEN: usize = 0x0008_0200 / 4;
pub const PF_ATQH: usize = 0x0008_0300 / 4;
pub const PF_ATQT: usize = 0x0008_0400 / 4;

pub const PF_ARQBAL: usize = 0x0008_0080 / 4;
pub const PF_ARQBAH: usize = 0x0008_0180 / 4;
pub const PF_ARQLEN: usize = 0x0008_0280 / 4;
pub const PF_ARQH: usize = 0x0008_0380 / 4;
pub const PF_ARQT: usize = 0x0008_0480 / 4;

// Same layout for ATQLEN and ARQLEN
pub mod AQLEN_ {
    pub const LEN: u32 = 0x3FF;
    pub const VFE: u32 = 1 << 28;
    pub const OVFL: u32 = 1 << 29;
    pub const CRIT: u32 = 1 << 30;
    pub const ENABLE: u32 = 1 << 31;
}

// Same for heads and tails
pub const AQ_INDEX_MASK: u32 = 0x3FF;

// --- HMC ---

pub const PFHMC_SDCMD: usize = 0x000C_0000 / 4;
pub mod PFHMC_SDCMD_ {
    pub const PMSDIDX: u32 = 0xFFF;
    pub const PMSDWR: u32 = 1 << 31;
}

pub const PFHMC_SDDATALOW: usize = 0x000C_0100 / 4;
pub mod PFHMC_SDDATALOW_ {
    pub const PMSDVALID: u32 = 1 << 0;
    pub const PMSDTYPE: u32 = 1 << 1;
    pub const PMSDBPCOUNT: u32 = 0x3FF << 2;
    pub const PMSDDATALOW: u32 = 0xF_FFFF << 12;
}

pub const PFHMC_SDDATAHIGH: usize = 0x000C_0200 / 4;

pub const PFHMC_PDINV: usize = 0x000C_0300 / 4;
pub mod PFHMC_PDINV_ {
    pub const PMSDIDX: u32 = 0xFFF;
    pub const PMPDIDX: u32 = 0x1FF << 16;
}

pub const GLHMC_LANTXOBJSZ: usize = 0x000C_2004 / 4;
pub const GLHMC_LANQMAX: usize = 0x000C_2008 / 4;
pub const GLHMC_LANRXOBJSZ: usize = 0x000C_200C / 4;
pub const GLHMC_OBJSZ_MASK: u32 = 0xF;
pub const GLHMC_LANQMAX_MASK: u32 = 0x7FF;

pub fn GLHMC_LANTXBASE(pf: usize) -> usize {
    (0x000C_6200 + 4 * pf) / 4
}

pub fn GLHMC_LANTXCNT(pf: usize) -> usize {
    (0x000C_6300 + 4 * pf) / 4
}

pub fn GLHMC_LANRXBASE(pf: usize) -> usize {
    (0x000C_6400 + 4 * pf) / 4
}

pub fn GLHMC_LANRXCNT(pf: usize) -> usize {
    (0x000C_6500 + 4 * pf) / 4
}

pub const GLHMC_LANBASE_MASK: u32 = 0xFF_FFFF;
pub const GLHMC_LANCNT_MASK: u32 = 0x7FF;

// --- General ---

pub const PF_FUNC_RID: usize = 0x0009_C000 / 4;
pub mod PF_FUNC_RID_ {
    pub const FUNCTION_NUMBER: u32 = 0x7;
}

pub const GLLAN_RCTL_0: usize = 0x0012_A500 / 4;
pub mod GLLAN_RCTL_0_ {
    pub const PXE_MODE: u32 = 1 << 0;
}

// --- RSS ---

pub const PFQF_HKEY_COUNT: usize = 13;

pub fn PFQF_HKEY(n: usize) -> usize {
    (0x0024_4800 + 0x80 * n) / 4
}

pub const PFQF_HLUT_COUNT: usize = 128;

pub fn PFQF_HLUT(n: usize) -> usize {
    (0x0024_0000 + 0x80 * n) / 4
}
