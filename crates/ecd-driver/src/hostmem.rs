//! Host-side DMA memory: the pre-reserved physical window the card
//! streams from.
//!
//! The OS is booted with a region of DRAM carved out (e.g. `memmap=`),
//! and this module projects that region into the process through
//! `/dev/mem` so the application can fill the ping-pong buffers the
//! device DMAs out of. No allocation happens here; the region's physical
//! address and size come from the caller.

// Physical sizes fit in usize on 64-bit, the only target this driver runs on.
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::ptr::NonNull;

use rustix::fs::OFlags;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use ecd_chip::regs::PPB_BLOCK_SIZE;

use crate::error::{EcdError, Result};
use crate::rtl::PingPongBuffer;

const DEV_MEM: &str = "/dev/mem";

/// A reserved physical DRAM window mapped into this process.
pub struct ReservedDmaRegion {
    map_ptr: NonNull<u8>,
    map_size: usize,
    page_offset: usize,
    phys_base: u64,
    size: usize,
    _file: File,
}

impl std::fmt::Debug for ReservedDmaRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservedDmaRegion")
            .field("phys_base", &format_args!("{:#x}", self.phys_base))
            .field("size", &self.size)
            .finish()
    }
}

// SAFETY: Send/Sync - the mapping is process-wide; the region hands out
// mutable slices only through &mut self.
unsafe impl Send for ReservedDmaRegion {}
unsafe impl Sync for ReservedDmaRegion {}

impl ReservedDmaRegion {
    /// Map `size` bytes of reserved DRAM at physical `phys_base`.
    ///
    /// Opens `/dev/mem` with `O_SYNC` so the window is uncached and the
    /// device observes writes without explicit flushing.
    ///
    /// # Errors
    ///
    /// `Permission` without root, `MmapFailed` if the kernel refuses the
    /// window (e.g. the region was not actually reserved and
    /// `CONFIG_STRICT_DEVMEM` is in force).
    pub fn open(phys_base: u64, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(EcdError::invalid_config("reserved DMA region size is zero"));
        }

        // O_SYNC is the documented way to get an uncached /dev/mem
        // mapping; bits() cast matches how OFlags feeds custom_flags.
        #[allow(clippy::cast_possible_wrap)]
        let sync_flag = OFlags::SYNC.bits() as i32;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(sync_flag)
            .open(DEV_MEM)
            .map_err(|e| EcdError::from_path_io(DEV_MEM, e))?;

        // /dev/mem offsets must be page-aligned; carry the misalignment
        // into the mapping and step past it afterwards.
        let page_size = rustix::param::page_size() as u64;
        let page_offset = (phys_base % page_size) as usize;
        let map_base = phys_base - page_offset as u64;
        let map_size = size + page_offset;

        // SAFETY: fd just opened read-write; Drop unmaps with the same
        // ptr/len; the file handle is held for the mapping's lifetime.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                map_size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &file,
                map_base,
            )
            .map_err(|e| EcdError::mmap_failed(format!("{DEV_MEM} at {map_base:#x}"), e))?
        };

        tracing::info!(
            "mapped reserved DRAM {phys_base:#x}+{size:#x} at {ptr:p}"
        );

        Ok(Self {
            map_ptr: NonNull::new(ptr.cast::<u8>())
                .ok_or_else(|| EcdError::mmap_failed(DEV_MEM, "null mapping"))?,
            map_size,
            page_offset,
            phys_base,
            size,
            _file: file,
        })
    }

    /// Physical base address of the window.
    #[must_use]
    pub const fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Window size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Lay the two ping-pong buffers out back-to-back at the start of the
    /// window and return their physical layout plus the writable slices.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the window is too small or misaligned for
    /// `block_count` blocks per side.
    pub fn ping_pong_split(
        &mut self,
        block_count: u32,
    ) -> Result<(PingPongBuffer, [&mut [u8]; 2])> {
        let buffers = ping_pong_layout(self.phys_base, self.size, block_count)?;
        let len = (u64::from(block_count) * PPB_BLOCK_SIZE) as usize;

        // SAFETY: the mapping is valid for page_offset + size bytes and
        // the layout check bounded 2*len by size.
        let window = unsafe {
            std::slice::from_raw_parts_mut(self.map_ptr.as_ptr().add(self.page_offset), self.size)
        };
        let (side0, rest) = window.split_at_mut(len);
        let side1 = &mut rest[..len];

        Ok((buffers, [side0, side1]))
    }
}

impl Drop for ReservedDmaRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what mmap returned in `open`.
        unsafe {
            if let Err(e) = munmap(self.map_ptr.as_ptr().cast(), self.map_size) {
                tracing::error!("munmap of reserved DRAM failed: {e}");
            }
        }
    }
}

/// Pure layout math for [`ReservedDmaRegion::ping_pong_split`].
fn ping_pong_layout(phys_base: u64, size: usize, block_count: u32) -> Result<PingPongBuffer> {
    let len = u64::from(block_count) * PPB_BLOCK_SIZE;
    if len.checked_mul(2).map_or(true, |need| need > size as u64) {
        return Err(EcdError::invalid_config(format!(
            "reserved region of {size:#x} bytes cannot hold two {len:#x}-byte buffers"
        )));
    }

    let buffers = PingPongBuffer {
        addr0: phys_base,
        addr1: phys_base + len,
        block_count,
    };
    buffers.validate()?;
    Ok(buffers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_splits_back_to_back() {
        let buffers = ping_pong_layout(0x1_0000_0000, 0x10000, 16).unwrap();
        assert_eq!(buffers.addr0, 0x1_0000_0000);
        assert_eq!(buffers.addr1, 0x1_0000_8000);
        assert_eq!(buffers.block_count, 16);
    }

    #[test]
    fn layout_rejects_undersized_window() {
        assert!(ping_pong_layout(0x1_0000_0000, 0x7FFF, 8).is_err());
    }

    #[test]
    fn layout_rejects_unaligned_base() {
        assert!(ping_pong_layout(0x1_0000_0100, 0x10000, 1).is_err());
    }

    #[test]
    #[ignore] // Requires root and a reserved region
    fn map_real_region() {
        match ReservedDmaRegion::open(0x1_0000_0000, 0x10000) {
            Ok(region) => println!("mapped {region:?}"),
            Err(e) => println!("no reserved region (expected): {e}"),
        }
    }
}
