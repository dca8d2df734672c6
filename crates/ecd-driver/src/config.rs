//! Control-plane configuration.
//!
//! The proxy receives a fully-populated [`Config`]; how the values got
//! there (file, flags, hardcoded demo) is the caller's business.

use std::path::PathBuf;

use ecd_chip::regs::MAX_IRQ_SOURCES;

/// Everything the proxy needs to bring up one card.
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for bitstream-loader artifacts (generated TCL
    /// scripts and captured programmer output).
    pub tmp_dir: PathBuf,

    /// Path to the external JTAG-programmer executable.
    pub vivado: PathBuf,

    /// PCI function of the card, canonical `vvvv:dddd` lowercase hex.
    pub pci_device: String,

    /// TCL lines programming the master FPGA, written verbatim to
    /// `<tmp_dir>/load_master_bitstream.tcl`.
    pub master_programming_script: Vec<String>,

    /// TCL lines programming the ECD FPGA, written verbatim to
    /// `<tmp_dir>/load_ecd_bitstream.tcl`.
    pub ecd_programming_script: Vec<String>,

    /// `(module name, BAR0 byte offset)` pairs; validated into an
    /// [`ecd_chip::AxiMap`] during `init`.
    pub axi_map: Vec<(String, u32)>,

    /// Number of distinct interrupt-request sources the bitstream drives.
    pub irq_count: u32,
}

impl Config {
    /// Default interrupt-source count: the two ping-pong drain sources.
    pub const DEFAULT_IRQ_COUNT: u32 = 2;

    /// Upper bound on [`Config::irq_count`], fixed by the width of the
    /// pending bitmap.
    pub const MAX_IRQ_COUNT: u32 = MAX_IRQ_SOURCES;
}
