use std::fmt;
use std::mem::size_of;

use bitflags::bitflags;
use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::i40e::device_limits::AQ_DESCRIPTOR_SIZE;

pub type Le16 = U16<LittleEndian>;
pub type Le32 = U32<LittleEndian>;

/// One admin queue descriptor, as laid out in ring memory.
///
/// Indirect commands keep the DMA address of their buffer in the last 8 bytes of
/// `params` (high word first).
#[repr(C)]
#[derive(Clone, Copy, Debug, AsBytes, FromBytes, FromZeroes)]
pub struct AqDescriptor {
    pub flags: Le16,
    pub opcode: Le16,
    pub datalen: Le16,
    pub retval: Le16,
    pub cookie_high: Le32,
    pub cookie_low: Le32,
    pub params: [u8; 16],
}

const _: [(); AQ_DESCRIPTOR_SIZE] = [(); size_of::<AqDescriptor>()];

impl AqDescriptor {
    pub fn flags(&self) -> DescFlags {
        DescFlags::from_bits_retain(self.flags.get())
    }

    pub fn cookie(&self) -> u64 {
        ((self.cookie_high.get() as u64) << 32) | self.cookie_low.get() as u64
    }

    pub fn set_cookie(&mut self, cookie: u64) {
        self.cookie_high.set((cookie >> 32) as u32);
        self.cookie_low.set(cookie as u32);
    }

    pub fn buffer_addr(&self) -> u64 {
        let high = u32::from_le_bytes([self.params[8], self.params[9], self.params[10], self.params[11]]);
        let low = u32::from_le_bytes([self.params[12], self.params[13], self.params[14], self.params[15]]);
        ((high as u64) << 32) | low as u64
    }

    pub fn set_buffer_addr(&mut self, addr: u64) {
        self.params[8..12].copy_from_slice(&((addr >> 32) as u32).to_le_bytes());
        self.params[12..16].copy_from_slice(&(addr as u32).to_le_bytes());
    }

    /// Reinterprets the parameter block as a command-specific struct.
    pub fn params<T: FromBytes + FromZeroes>(&self) -> T {
        T::read_from_prefix(&self.params[..]).unwrap_or_else(T::new_zeroed)
    }

    pub fn set_params<T: AsBytes>(&mut self, params: &T) {
        let bytes = params.as_bytes();
        let len = bytes.len().min(self.params.len());
        self.params[..len].copy_from_slice(&bytes[..len]);
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DescFlags: u16 {
        const DD = 1 << 0;
        const CMP = 1 << 1;
        const ERR = 1 << 2;
        const VFE = 1 << 3;
        const LB = 1 << 9;
        const RD = 1 << 10;
        const VFC = 1 << 11;
        const BUF = 1 << 12;
        const SI = 1 << 13;
        const EI = 1 << 14;
        const FE = 1 << 15;
    }
}

macro_rules! opcodes {
    ($($name:ident = $value:literal,)*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl TryFrom<u16> for Opcode {
            type Error = u16;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Opcode::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

opcodes! {
    GetVersion = 0x0001,
    QueueShutdown = 0x0003,
    MacAddressRead = 0x0107,
    ClearPxeMode = 0x0110,
    GetSwitchConfig = 0x0200,
    RxCtlRegRead = 0x0206,
    RxCtlRegWrite = 0x0207,
    UpdateVsiParameters = 0x0211,
    GetVsiParameters = 0x0212,
    SetVsiPromiscuousModes = 0x0254,
    GetLinkStatus = 0x0607,
    SetPhyIntMask = 0x0613,
    StopLldp = 0x0A05,
    SetRssKey = 0x0B02,
    SetRssLut = 0x0B03,
}

impl Opcode {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Firmware return code found in `retval` of a completed descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AqStatus(pub u16);

impl AqStatus {
    pub const OK: AqStatus = AqStatus(0);
    pub const EPERM: AqStatus = AqStatus(1);
    pub const ENOENT: AqStatus = AqStatus(2);
    pub const ESRCH: AqStatus = AqStatus(3);
    pub const EINTR: AqStatus = AqStatus(4);
    pub const EIO: AqStatus = AqStatus(5);
    pub const ENXIO: AqStatus = AqStatus(6);
    pub const E2BIG: AqStatus = AqStatus(7);
    pub const EAGAIN: AqStatus = AqStatus(8);
    pub const ENOMEM: AqStatus = AqStatus(9);
    pub const EACCES: AqStatus = AqStatus(10);
    pub const EFAULT: AqStatus = AqStatus(11);
    pub const EBUSY: AqStatus = AqStatus(12);
    pub const EEXIST: AqStatus = AqStatus(13);
    pub const EINVAL: AqStatus = AqStatus(14);
    pub const ENOTTY: AqStatus = AqStatus(15);
    pub const ENOSPC: AqStatus = AqStatus(16);
    pub const ENOSYS: AqStatus = AqStatus(17);
    pub const ERANGE: AqStatus = AqStatus(18);
    pub const EFLUSHED: AqStatus = AqStatus(19);
    pub const BAD_ADDR: AqStatus = AqStatus(20);
    pub const EMODE: AqStatus = AqStatus(21);
    pub const EFBIG: AqStatus = AqStatus(22);

    const NAMES: [&'static str; 23] = [
        "OK", "EPERM", "ENOENT", "ESRCH", "EINTR", "EIO", "ENXIO", "E2BIG", "EAGAIN", "ENOMEM", "EACCES", "EFAULT", "EBUSY", "EEXIST", "EINVAL", "ENOTTY",
        "ENOSPC", "ENOSYS", "ERANGE", "EFLUSHED", "BAD_ADDR", "EMODE", "EFBIG",
    ];

    pub fn is_ok(self) -> bool {
        self == AqStatus::OK
    }

    pub fn name(self) -> Option<&'static str> {
        AqStatus::NAMES.get(self.0 as usize).copied()
    }
}

impl fmt::Display for AqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "status {}", self.0),
        }
    }
}

impl fmt::Debug for AqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AqStatus({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_splits_high_and_low() {
        let mut desc = AqDescriptor::new_zeroed();
        desc.set_cookie(0x0123_4567_89AB_CDEF);
        assert_eq!(desc.cookie_high.get(), 0x0123_4567);
        assert_eq!(desc.cookie_low.get(), 0x89AB_CDEF);
        assert_eq!(desc.cookie(), 0x0123_4567_89AB_CDEF);
        assert_eq!(&desc.as_bytes()[8..16], &[0x67, 0x45, 0x23, 0x01, 0xEF, 0xCD, 0xAB, 0x89]);
    }

    #[test]
    fn buffer_address_lives_in_the_last_param_words() {
        let mut desc = AqDescriptor::new_zeroed();
        desc.set_buffer_addr(0x0000_0012_3456_7000);
        assert_eq!(&desc.params[8..12], &[0x12, 0, 0, 0]);
        assert_eq!(&desc.params[12..16], &[0x00, 0x70, 0x56, 0x34]);
        assert_eq!(desc.buffer_addr(), 0x0000_0012_3456_7000);
    }

    #[test]
    fn opcodes_round_trip_and_reject_unknown() {
        assert_eq!(Opcode::try_from(0x0200), Ok(Opcode::GetSwitchConfig));
        assert_eq!(Opcode::GetSwitchConfig.code(), 0x0200);
        assert_eq!(Opcode::try_from(0x7777), Err(0x7777));
    }

    #[test]
    fn status_names() {
        assert_eq!(AqStatus::EEXIST.to_string(), "EEXIST");
        assert_eq!(AqStatus(99).to_string(), "status 99");
        assert!(AqStatus::OK.is_ok());
    }
}
