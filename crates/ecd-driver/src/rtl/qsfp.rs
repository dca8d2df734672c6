//! QSFP status block.

use ecd_chip::regs::qsfp_status::{CHANNEL_COUNT, REG_LINK_STATUS};

use crate::error::{EcdError, Result};
use crate::mmio::{RegisterBlock, RegisterBus};

/// Polls the per-channel link-up bits.
#[derive(Debug, Clone)]
pub struct RtlQsfpStatus<B = RegisterBlock> {
    regs: B,
}

impl<B: RegisterBus> RtlQsfpStatus<B> {
    /// Attach the view to a module window.
    pub const fn new(regs: B) -> Self {
        Self { regs }
    }

    /// Whether `channel`'s link is up.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for a channel the board does not have; `LinkDown`
    /// when `require_up` is set and the link is not up.
    pub fn check(&self, channel: u32, require_up: bool) -> Result<bool> {
        if channel >= CHANNEL_COUNT {
            return Err(EcdError::invalid_config(format!(
                "QSFP channel {channel} out of range (board has {CHANNEL_COUNT})"
            )));
        }

        let status = self.regs.read(REG_LINK_STATUS);
        let up = status & (1 << channel) != 0;
        tracing::debug!(channel, up, "qsfp link status");

        if require_up && !up {
            return Err(EcdError::LinkDown { channel });
        }
        Ok(up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisterFile;

    #[test]
    fn reports_per_channel_bits() {
        let file = SimRegisterFile::new(4);
        file.poke(REG_LINK_STATUS, 0b10);

        let qsfp = RtlQsfpStatus::new(&file);
        assert!(!qsfp.check(0, false).unwrap());
        assert!(qsfp.check(1, false).unwrap());
    }

    #[test]
    fn required_link_down_is_an_error() {
        let file = SimRegisterFile::new(4);
        let qsfp = RtlQsfpStatus::new(&file);

        assert!(matches!(
            qsfp.check(0, true),
            Err(EcdError::LinkDown { channel: 0 })
        ));
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let file = SimRegisterFile::new(4);
        let qsfp = RtlQsfpStatus::new(&file);
        assert!(qsfp.check(2, false).is_err());
    }
}
