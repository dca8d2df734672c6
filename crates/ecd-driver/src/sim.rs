//! Software model of the card for CI and bench work.
//!
//! No hardware, no root: a register file with the interrupt manager's
//! latch-and-clear behavior and a scripted interrupt source. The RTL
//! views and the dispatcher run against these unchanged, which is how the
//! protocol tests in `tests/` exercise the full dispatch path.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ecd_chip::regs::irq_manager::{REG_CLEAR, REG_INTR};

use crate::dispatch::InterruptSource;
use crate::error::Result;
use crate::mmio::RegisterBus;

/// Everything observable about one simulated register window, in the
/// order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    /// A register was read.
    Read(usize),
    /// A register was written.
    Write(usize, u32),
    /// The interrupt source was re-armed (INTx enable).
    Arm,
}

#[derive(Debug)]
struct SimInner {
    regs: Vec<u32>,
    events: Vec<SimEvent>,
    irq_latch: bool,
}

/// In-memory register window with an event log.
///
/// Plain windows store writes verbatim; a window created with
/// [`SimRegisterFile::irq_manager`] models the latch: raised bits stick in
/// `REG_INTR` until a write to `REG_CLEAR` drops them.
#[derive(Debug)]
pub struct SimRegisterFile {
    inner: Mutex<SimInner>,
}

impl SimRegisterFile {
    /// A plain register window of `len` words.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            inner: Mutex::new(SimInner {
                regs: vec![0; len],
                events: Vec::new(),
                irq_latch: false,
            }),
        }
    }

    /// An interrupt-manager window with latch-and-clear behavior.
    #[must_use]
    pub fn irq_manager() -> Self {
        let file = Self::new(2);
        file.lock().irq_latch = true;
        file
    }

    fn lock(&self) -> MutexGuard<'_, SimInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Latch pending bits, as the device would on an internal event.
    pub fn raise(&self, mask: u32) {
        let mut inner = self.lock();
        inner.regs[REG_INTR] |= mask;
    }

    /// Backdoor register set; not logged as bus traffic.
    pub fn poke(&self, reg: usize, value: u32) {
        self.lock().regs[reg] = value;
    }

    /// Backdoor register read; not logged as bus traffic.
    #[must_use]
    pub fn peek(&self, reg: usize) -> u32 {
        self.lock().regs[reg]
    }

    /// Record an INTx re-arm in the event log.
    pub fn record_arm(&self) {
        self.lock().events.push(SimEvent::Arm);
    }

    /// Every write so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Write(reg, value) => Some((*reg, *value)),
                _ => None,
            })
            .collect()
    }

    /// The full event log so far.
    #[must_use]
    pub fn events(&self) -> Vec<SimEvent> {
        self.lock().events.clone()
    }

    /// How many times the source has been re-armed.
    #[must_use]
    pub fn arm_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, SimEvent::Arm))
            .count()
    }
}

impl RegisterBus for SimRegisterFile {
    fn read(&self, reg: usize) -> u32 {
        let mut inner = self.lock();
        inner.events.push(SimEvent::Read(reg));
        inner.regs[reg]
    }

    fn write(&self, reg: usize, value: u32) {
        let mut inner = self.lock();
        inner.events.push(SimEvent::Write(reg, value));
        if inner.irq_latch && reg == REG_CLEAR {
            inner.regs[REG_INTR] &= !value;
        } else {
            inner.regs[reg] = value;
        }
    }
}

/// One scripted wake of the simulated interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimWake {
    /// Latch `mask` into the pending bitmap, then wake the waiter.
    Raise(u32),
    /// Wake the waiter without latching anything.
    Spurious,
}

/// Scripted stand-in for the UIO interrupt line.
///
/// Each `wait_for_interrupt` consumes one scripted wake; an exhausted
/// script reads as a shutdown wake (`Ok(None)`), ending the dispatch loop.
#[derive(Debug)]
pub struct SimIrqSource<'a> {
    irq_window: &'a SimRegisterFile,
    script: Mutex<VecDeque<SimWake>>,
    event_count: Mutex<u32>,
}

impl<'a> SimIrqSource<'a> {
    /// Script a source against the given interrupt-manager window.
    #[must_use]
    pub fn new(irq_window: &'a SimRegisterFile, script: impl IntoIterator<Item = SimWake>) -> Self {
        Self {
            irq_window,
            script: Mutex::new(script.into_iter().collect()),
            event_count: Mutex::new(0),
        }
    }
}

impl InterruptSource for SimIrqSource<'_> {
    fn enable_interrupts(&self) -> Result<()> {
        self.irq_window.record_arm();
        Ok(())
    }

    fn wait_for_interrupt(&self) -> Result<Option<u32>> {
        let wake = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        let Some(wake) = wake else {
            return Ok(None);
        };

        if let SimWake::Raise(mask) = wake {
            self.irq_window.raise(mask);
        }

        let mut count = self
            .event_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        Ok(Some(*count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irq_window_latches_and_clears() {
        let file = SimRegisterFile::irq_manager();
        file.raise(0b11);
        assert_eq!(file.read(REG_INTR), 0b11);

        file.write(REG_CLEAR, 0b01);
        assert_eq!(file.read(REG_INTR), 0b10);
    }

    #[test]
    fn script_runs_dry_as_shutdown() {
        let file = SimRegisterFile::irq_manager();
        let source = SimIrqSource::new(&file, [SimWake::Raise(1)]);

        assert_eq!(source.wait_for_interrupt().unwrap(), Some(1));
        assert_eq!(source.wait_for_interrupt().unwrap(), None);
    }
}
