//! Restart manager block.

use std::time::Duration;

use ecd_chip::regs::restart_manager::REG_RESTART;

use crate::mmio::{RegisterBlock, RegisterBus};

/// Worst-case drain time of the fixed-latency pipeline stages.
const DRAIN_TIME: Duration = Duration::from_millis(500);

/// Puts the pipeline into a known condition and waits for it to drain.
#[derive(Debug, Clone)]
pub struct RtlRestartManager<B = RegisterBlock> {
    regs: B,
}

impl<B: RegisterBus> RtlRestartManager<B> {
    /// Attach the view to a module window.
    pub const fn new(regs: B) -> Self {
        Self { regs }
    }

    /// Issue the reset pulse, then block for the pipeline drain time.
    pub fn restart(&self) {
        tracing::info!("restarting pipeline");
        self.regs.write(REG_RESTART, 1);
        std::thread::sleep(DRAIN_TIME);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisterFile;

    #[test]
    fn restart_pulses_the_register() {
        let file = SimRegisterFile::new(4);
        RtlRestartManager::new(&file).restart();
        assert_eq!(file.writes(), vec![(REG_RESTART, 1)]);
    }
}
