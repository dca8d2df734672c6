//! Data-control block: the ping-pong streaming engine.

use ecd_chip::regs::data_control::{
    REG_PPB0H, REG_PPB0L, REG_PPB1H, REG_PPB1L, REG_PPB_RDY, REG_PPB_SIZE, REG_START,
};
use ecd_chip::regs::PPB_BLOCK_SIZE;

use crate::error::{EcdError, Result};
use crate::mmio::{RegisterBlock, RegisterBus};

/// The two host DMA regions the engine alternates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPongBuffer {
    /// Physical address of buffer 0.
    pub addr0: u64,
    /// Physical address of buffer 1.
    pub addr1: u64,
    /// Size of each buffer in 2048-byte blocks.
    pub block_count: u32,
}

impl PingPongBuffer {
    /// Check the layout invariants: both addresses 2048-byte aligned,
    /// at least one block, and the two regions disjoint.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` naming the violated invariant. That both regions
    /// lie inside OS-reserved DRAM cannot be checked from here; the
    /// [`crate::hostmem::ReservedDmaRegion`] constructor covers it.
    pub fn validate(&self) -> Result<()> {
        if self.block_count == 0 {
            return Err(EcdError::invalid_config("ping-pong block count is zero"));
        }
        for (side, addr) in [(0u32, self.addr0), (1, self.addr1)] {
            if addr % PPB_BLOCK_SIZE != 0 {
                return Err(EcdError::invalid_config(format!(
                    "buffer {side} address {addr:#x} is not {PPB_BLOCK_SIZE}-byte aligned"
                )));
            }
        }
        let len = u64::from(self.block_count) * PPB_BLOCK_SIZE;
        let (lo, hi) = if self.addr0 <= self.addr1 {
            (self.addr0, self.addr1)
        } else {
            (self.addr1, self.addr0)
        };
        if lo + len > hi {
            return Err(EcdError::invalid_config(format!(
                "ping-pong buffers overlap: {:#x} and {:#x} with {len:#x} bytes each",
                self.addr0, self.addr1
            )));
        }
        Ok(())
    }
}

/// Programs buffer addresses and size into the engine and signals
/// replenished buffers back to it.
#[derive(Debug, Clone)]
pub struct RtlDataControl<B = RegisterBlock> {
    regs: B,
}

impl<B: RegisterBus> RtlDataControl<B> {
    /// Attach the view to a module window.
    pub const fn new(regs: B) -> Self {
        Self { regs }
    }

    /// Hand the engine both physical addresses and the buffer size, then
    /// start streaming: buffer 0 first, then 1, alternating.
    ///
    /// Registers are written in the order 0,1,2,3,4 and finally START;
    /// the engine latches the address/size registers on the START write.
    /// Both buffers must already hold valid data.
    pub fn start(&self, buffers: &PingPongBuffer) {
        tracing::info!(
            addr0 = format_args!("{:#x}", buffers.addr0),
            addr1 = format_args!("{:#x}", buffers.addr1),
            blocks = buffers.block_count,
            "starting ping-pong transfer"
        );

        self.regs.write(REG_PPB0H, (buffers.addr0 >> 32) as u32);
        self.regs.write(REG_PPB0L, buffers.addr0 as u32);
        self.regs.write(REG_PPB1H, (buffers.addr1 >> 32) as u32);
        self.regs.write(REG_PPB1L, buffers.addr1 as u32);
        self.regs.write(REG_PPB_SIZE, buffers.block_count);
        self.regs.write(REG_START, 1);
    }

    /// Tell the engine that `side`'s buffer has been refilled and may be
    /// consumed on its next rotation.
    ///
    /// A side outside {0, 1} is ignored without touching the hardware.
    pub fn notify_buffer_full(&self, side: u32) {
        if side > 1 {
            tracing::warn!(side, "ignoring out-of-range ping-pong side");
            return;
        }
        self.regs.write(REG_PPB_RDY, 1 << side);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisterFile;

    const A0: u64 = 0x1_0000_0000;
    const A1: u64 = 0x1_4000_0000;

    fn buffers(block_count: u32) -> PingPongBuffer {
        PingPongBuffer {
            addr0: A0,
            addr1: A1,
            block_count,
        }
    }

    #[test]
    fn start_programs_registers_in_order_start_last() {
        let file = SimRegisterFile::new(16);
        let control = RtlDataControl::new(&file);

        control.start(&buffers(16));

        let writes = file.writes();
        assert_eq!(
            writes,
            vec![
                (REG_PPB0H, (A0 >> 32) as u32),
                (REG_PPB0L, A0 as u32),
                (REG_PPB1H, (A1 >> 32) as u32),
                (REG_PPB1L, A1 as u32),
                (REG_PPB_SIZE, 16),
                (REG_START, 1),
            ]
        );
    }

    #[test]
    fn start_register_file_round_trip() {
        let file = SimRegisterFile::new(16);
        RtlDataControl::new(&file).start(&buffers(16));

        assert_eq!(file.peek(REG_PPB0H), (A0 >> 32) as u32);
        assert_eq!(file.peek(REG_PPB0L), A0 as u32);
        assert_eq!(file.peek(REG_PPB1H), (A1 >> 32) as u32);
        assert_eq!(file.peek(REG_PPB1L), A1 as u32);
        assert_eq!(file.peek(REG_PPB_SIZE), 16);
        assert_eq!(file.peek(REG_START), 1);
    }

    #[test]
    fn notify_sets_the_side_bit() {
        let file = SimRegisterFile::new(16);
        let control = RtlDataControl::new(&file);

        control.notify_buffer_full(0);
        control.notify_buffer_full(1);

        assert_eq!(
            file.writes(),
            vec![(REG_PPB_RDY, 0b01), (REG_PPB_RDY, 0b10)]
        );
    }

    #[test]
    fn out_of_range_side_issues_no_write() {
        let file = SimRegisterFile::new(16);
        let control = RtlDataControl::new(&file);

        control.notify_buffer_full(2);
        control.notify_buffer_full(31);

        assert!(file.writes().is_empty());
    }

    #[test]
    fn layout_validation() {
        assert!(buffers(16).validate().is_ok());
        assert!(buffers(0).validate().is_err());

        let unaligned = PingPongBuffer {
            addr0: A0 + 4,
            addr1: A1,
            block_count: 1,
        };
        assert!(unaligned.validate().is_err());

        let overlapping = PingPongBuffer {
            addr0: A0,
            addr1: A0 + 2048,
            block_count: 2,
        };
        assert!(overlapping.validate().is_err());

        let touching = PingPongBuffer {
            addr0: A0,
            addr1: A0 + 2048,
            block_count: 1,
        };
        assert!(touching.validate().is_ok());
    }
}
