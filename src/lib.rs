//! Userspace control plane for Intel XL710/X710 (i40e) NICs.
//!
//! The crate drives the two pieces of the PF that everything else depends on:
//!
//! - the Admin Queue ([`i40e::aq`]), a command/response protocol over a pair of
//!   descriptor rings shared with firmware;
//! - the Hardware Memory Context ([`i40e::hmc`]), the paged memory holding the
//!   per-queue context that hardware reads directly.
//!
//! [`i40e::device::Device`] ties them into an open/close sequence. Memory and PCI
//! access go through an [`env::Environment`]; MMIO goes through a
//! [`i40e::regs::RegisterFile`]. Both have a simulated implementation for tests.

// Enable non-default lints
#![warn(future_incompatible)]
#![warn(nonstandard_style)]
#![warn(rust_2018_idioms)]
#![warn(unused)]

#[macro_use]
extern crate log;

pub mod env;
pub mod error;
pub mod i40e;
pub mod pci;

mod volatile;

pub use error::{Error, Result};
