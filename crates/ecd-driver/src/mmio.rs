//! Volatile 32-bit register access over memory-mapped BARs.
//!
//! Every AXI slave in the bitstream decodes strictly 32-bit transactions,
//! so the only primitive offered here is a single-word volatile load or
//! store. The mapping is uncached device memory; no cache maintenance is
//! needed and stores to the same block are program-ordered.

use std::sync::Arc;

/// Word-indexed 32-bit register I/O.
///
/// [`RegisterBlock`] implements this over live MMIO; the software model in
/// [`crate::sim`] implements it over an in-memory register file so the
/// RTL module views and the dispatcher can be exercised without hardware.
pub trait RegisterBus {
    /// Read the 32-bit word at register index `reg`.
    fn read(&self, reg: usize) -> u32;

    /// Write one 32-bit word to register index `reg`.
    fn write(&self, reg: usize, value: u32);
}

impl<B: RegisterBus> RegisterBus for &B {
    fn read(&self, reg: usize) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: usize, value: u32) {
        (**self).write(reg, value);
    }
}

impl<B: RegisterBus> RegisterBus for Arc<B> {
    fn read(&self, reg: usize) -> u32 {
        (**self).read(reg)
    }

    fn write(&self, reg: usize, value: u32) {
        (**self).write(reg, value);
    }
}

/// A typed handle over one RTL module's register window.
///
/// Non-owning view into a mapped BAR; the [`crate::pci::PciDevice`] that
/// produced it must outlive every copy. Accesses are volatile so the
/// compiler cannot reorder, fuse, or elide them.
#[derive(Debug, Clone, Copy)]
pub struct RegisterBlock {
    base: *mut u32,
    words: usize,
}

// SAFETY: Send - the block is a view into a process-wide MMIO mapping;
// moving it between threads does not invalidate the pointer.
unsafe impl Send for RegisterBlock {}

// SAFETY: Sync - every access is a single volatile 32-bit load or store,
// which the uncached mapping makes a single device transaction. Threads
// writing the *same* register concurrently is forbidden by the §5 contract;
// different registers are serialized by the device.
unsafe impl Sync for RegisterBlock {}

impl RegisterBlock {
    /// Create a register window of `words` 32-bit registers at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be 4-byte aligned and point into a live MMIO mapping
    /// valid for at least `words * 4` bytes for the lifetime of the block
    /// and every copy of it.
    #[must_use]
    pub const unsafe fn new(base: *mut u32, words: usize) -> Self {
        Self { base, words }
    }

    /// Number of 32-bit registers this window can address.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.words
    }

    /// Whether the window is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.words == 0
    }
}

impl RegisterBus for RegisterBlock {
    /// # Panics
    ///
    /// Panics if `reg` is outside the window; register indices come from
    /// `ecd-chip` constants, so this is a programming error.
    fn read(&self, reg: usize) -> u32 {
        assert!(reg < self.words, "register index out of window");
        // SAFETY: base is valid for `words` u32s per the `new` contract and
        // the index was checked above; read_volatile is required so the
        // load reaches the device exactly once.
        let value = unsafe { self.base.add(reg).read_volatile() };
        tracing::trace!(reg, value = format_args!("{value:#010x}"), "mmio read");
        value
    }

    /// # Panics
    ///
    /// Panics if `reg` is outside the window.
    fn write(&self, reg: usize, value: u32) {
        assert!(reg < self.words, "register index out of window");
        tracing::trace!(reg, value = format_args!("{value:#010x}"), "mmio write");
        // SAFETY: as for `read`; write_volatile is required so the store
        // reaches the device exactly once, in program order.
        unsafe { self.base.add(reg).write_volatile(value) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volatile_access_over_host_memory() {
        let mut backing = [0u32; 16];
        // SAFETY: backing outlives the block and is 4-byte aligned.
        let block = unsafe { RegisterBlock::new(backing.as_mut_ptr(), backing.len()) };

        block.write(3, 0xDEAD_BEEF);
        assert_eq!(block.read(3), 0xDEAD_BEEF);
        assert_eq!(backing[3], 0xDEAD_BEEF);
    }

    #[test]
    #[should_panic(expected = "register index out of window")]
    fn out_of_window_read_panics() {
        let mut backing = [0u32; 2];
        let block = unsafe { RegisterBlock::new(backing.as_mut_ptr(), backing.len()) };
        let _ = block.read(2);
    }
}
