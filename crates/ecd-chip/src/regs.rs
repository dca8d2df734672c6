//! Register maps for the RTL modules behind BAR0.
//!
//! Every AXI slave in the bitstream decodes strictly 32-bit accesses;
//! register indices below are in units of 32-bit words from the module's
//! window base (so byte offset = index * 4).

/// Size of one ping-pong DMA block in bytes. Buffer sizes are programmed
/// into the hardware in units of this block.
pub const PPB_BLOCK_SIZE: u64 = 2048;

/// Number of interrupt sources the pending bitmap can carry.
pub const MAX_IRQ_SOURCES: u32 = 32;

/// Revision block — version and build date of the loaded bitstream.
pub mod revision {
    /// Version word; bytes from LSB are [patch, minor, major, 0].
    pub const REG_VERSION: usize = 0;
    /// Build date word, BCD-packed `0xYYYYMMDD`.
    pub const REG_DATE: usize = 1;
}

/// Interrupt manager — latched pending bitmap plus write-to-clear.
pub mod irq_manager {
    /// Pending-interrupt bitmap; bit `1 << i` means source `i` is asserting.
    pub const REG_INTR: usize = 0;
    /// Write-to-clear bitmap; writing a bit drops that source's latch.
    /// Writing 0 is a no-op.
    pub const REG_CLEAR: usize = 1;
}

/// Restart manager — pipeline reset pulse.
pub mod restart_manager {
    /// Write 1 to place the pipeline into a known condition.
    pub const REG_RESTART: usize = 0;
}

/// Data control — the ping-pong streaming engine.
pub mod data_control {
    /// Ping-pong buffer 0 physical address, high 32 bits.
    pub const REG_PPB0H: usize = 0;
    /// Ping-pong buffer 0 physical address, low 32 bits.
    pub const REG_PPB0L: usize = 1;
    /// Ping-pong buffer 1 physical address, high 32 bits.
    pub const REG_PPB1H: usize = 2;
    /// Ping-pong buffer 1 physical address, low 32 bits.
    pub const REG_PPB1L: usize = 3;
    /// Buffer size in 2048-byte blocks.
    pub const REG_PPB_SIZE: usize = 4;
    /// Write 1 to begin streaming buffer 0, then 1, alternating.
    pub const REG_START: usize = 10;
    /// Write `1 << side` to mark that side's buffer replenished.
    pub const REG_PPB_RDY: usize = 11;
}

/// QSFP status block.
pub mod qsfp_status {
    /// Link status word; one link-up bit per channel.
    pub const REG_LINK_STATUS: usize = 0;
    /// Number of QSFP channels on the board.
    pub const CHANNEL_COUNT: u32 = 2;
}

/// Interrupt source conventions.
pub mod irq_source {
    /// Ping-pong buffer 0 has been fully consumed.
    pub const PPB0_DRAINED: u32 = 0;
    /// Ping-pong buffer 1 has been fully consumed.
    pub const PPB1_DRAINED: u32 = 1;
}
