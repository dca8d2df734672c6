//! User-space control plane for the ECD-Master FPGA data-acquisition card.
//!
//! The card is a PCIe endpoint whose BAR0 fronts a set of RTL modules;
//! its interrupt reaches user space through the kernel's UIO framework.
//! This crate boots the board and streams host DRAM out over QSFP:
//!
//! ```text
//! EcdProxy
//!   ├─ BitstreamLoader   JTAG-programs the FPGAs via the external tool
//!   ├─ hot_reset         secondary-bus-reset pulse, link retrain
//!   ├─ PciDevice         maps the BAR resource files from sysfs
//!   ├─ UioBinding        /dev/uioN wait + INTx re-arm via config space
//!   ├─ Rtl* views        volatile 32-bit MMIO per module window
//!   └─ dispatcher thread UIO wake → pending mask → clear → handlers
//! ```
//!
//! Streaming uses a ping-pong pair of host buffers in a pre-reserved
//! physical DRAM window ([`ReservedDmaRegion`]): the card raises IRQ
//! source 0 or 1 when it drains a buffer, the installed [`IrqHandler`]
//! refills it and calls `notify_buffer_full`, and the card picks it up on
//! its next rotation. Missing the rotation underruns the pipeline, which
//! is externally visible; the driver cannot detect it.
//!
//! # Quick start
//!
//! ```no_run
//! use ecd_driver::{Config, EcdProxy};
//!
//! # fn main() -> ecd_driver::Result<()> {
//! let mut proxy = EcdProxy::new(Config {
//!     tmp_dir: "/tmp".into(),
//!     vivado: "/opt/Xilinx/Vivado/2023.1/bin/vivado".into(),
//!     pci_device: "10ee:7038".into(),
//!     master_programming_script: vec!["open_hw".into()],
//!     ecd_programming_script: vec!["open_hw".into()],
//!     axi_map: vec![
//!         ("master_revision".into(), 0x0000),
//!         ("irq_manager".into(), 0x0100),
//!         ("restart_manager".into(), 0x0200),
//!         ("data_control".into(), 0x0300),
//!         ("qsfp_status".into(), 0x0400),
//!     ],
//!     irq_count: 2,
//! });
//!
//! proxy.init()?;
//! if !proxy.load_master_bitstream()? {
//!     eprintln!("{}", proxy.load_error().unwrap_or("unknown"));
//! }
//! proxy.start_pci()?;
//! println!("bitstream {} ({})", proxy.master_version()?, proxy.master_date()?);
//! # Ok(())
//! # }
//! ```
//!
//! Everything here needs root: the sysfs `resource` files and `/dev/mem`
//! are not mappable otherwise.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod bitstream;
mod config;
pub mod dispatch;
mod error;
pub mod hostmem;
pub mod mmio;
pub mod pci;
pub mod rtl;
pub mod sim;
pub mod uio;

mod proxy;

pub use bitstream::{BitstreamKind, BitstreamLoader};
pub use config::Config;
pub use dispatch::{run_dispatch_loop, InterruptSource, IrqHandler, IrqStats};
pub use error::{EcdError, Result};
pub use hostmem::ReservedDmaRegion;
pub use mmio::{RegisterBlock, RegisterBus};
pub use pci::{hot_reset, PciDevice, ResourceRegion};
pub use proxy::EcdProxy;
pub use rtl::{
    PingPongBuffer, RtlAxiRevision, RtlDataControl, RtlIrqManager, RtlQsfpStatus,
    RtlRestartManager,
};
pub use uio::{UioBinding, UioWaker};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Config, EcdError, EcdProxy, IrqHandler, IrqStats, PingPongBuffer, ReservedDmaRegion,
        Result,
    };
}
