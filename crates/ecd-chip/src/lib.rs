//! Hardware model for the ECD-Master FPGA data-acquisition card.
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the board: PCI identifiers, the AXI module offset map
//! published by the bitstream, and the register layout of each RTL module.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | Vendor/device identifier type and its `vvvv:dddd` text form |
//! | [`axi`] | AXI module enumeration and the BAR0 offset map |
//! | [`regs`] | Per-module register indices and bit definitions |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod axi;
pub mod pcie;
pub mod regs;

pub use axi::{AxiMap, AxiMapError, AxiModule, AXI_OFFSET_UNDEFINED};
pub use pcie::EcdDeviceId;
