use std::io;

use thiserror::Error;

use crate::i40e::aq::AqStatus;

/// Errors raised while bringing up or driving the control plane.
#[derive(Error, Debug)]
pub enum Error {
    /// A ring or buffer size that cannot be honored (e.g. larger than one page).
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("DMA allocation of {size} bytes failed")]
    Allocation { size: usize },

    /// A register read back a different value than the one just written.
    #[error("register {reg:#x} read back {actual:#x}, expected {expected:#x}")]
    RegisterMismatch { reg: usize, expected: u32, actual: u32 },

    /// Firmware completed the command with a nonzero return value.
    #[error("admin command {opcode:#06x} failed with {status}")]
    CommandStatus { opcode: u16, status: AqStatus },

    #[error("completion carries unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    #[error("admin command {opcode:#06x} timed out")]
    CommandTimeout { opcode: u16 },

    #[error("{what} index {index} out of range (limit {limit})")]
    OutOfRange { what: &'static str, index: usize, limit: usize },

    /// The send ring has no free descriptor; the request was not queued.
    #[error("admin send queue is full")]
    RingFull,

    #[error("invalid response to {opcode:#06x}: {reason}")]
    InvalidResponse { opcode: u16, reason: &'static str },

    #[error("unsupported PCI device {vendor:#06x}:{device:#06x}")]
    UnsupportedDevice { vendor: u16, device: u16 },

    #[error("PCI: {0}")]
    Pci(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// The firmware status code, when this error is a command failure.
    pub fn status(&self) -> Option<AqStatus> {
        match self {
            Error::CommandStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
