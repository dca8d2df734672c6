//! Interrupt dispatch: the bridge from UIO notifications to user handlers.
//!
//! One dispatcher thread runs [`run_dispatch_loop`]. Each iteration
//! re-arms INTx, blocks for a notification, queries the pending bitmap,
//! clears exactly the bits it saw, and invokes the installed handler once
//! per set bit in ascending source order. Clearing happens strictly before
//! the next re-arm so a just-serviced source cannot re-notify spuriously.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ecd_chip::regs::MAX_IRQ_SOURCES;

use crate::error::Result;
use crate::mmio::RegisterBus;
use crate::rtl::RtlIrqManager;

/// Where interrupt notifications come from.
///
/// [`crate::uio::UioBinding`] implements this over `/dev/uioN`;
/// [`crate::sim::SimIrqSource`] implements it over a script.
pub trait InterruptSource {
    /// Re-arm the interrupt so the next assertion reaches the waiter.
    /// Called once before the first wait and again after every wake.
    ///
    /// # Errors
    ///
    /// I/O errors are fatal to the dispatcher.
    fn enable_interrupts(&self) -> Result<()>;

    /// Block until an interrupt (returning the source's event count) or a
    /// shutdown wake (`Ok(None)`).
    ///
    /// # Errors
    ///
    /// I/O errors are fatal to the dispatcher.
    fn wait_for_interrupt(&self) -> Result<Option<u32>>;
}

/// The per-source extension point the dispatcher invokes.
///
/// Runs on the dispatcher thread; it may drive any RTL view (refill a
/// buffer, `notify_buffer_full`) but must not call back into proxy
/// lifecycle operations.
pub trait IrqHandler: Send {
    /// Source `irq` was dispatched for the `count`th time (counting
    /// from 1, strictly monotonic per source).
    fn on_interrupt(&mut self, irq: u32, count: u64);
}

impl<F: FnMut(u32, u64) + Send> IrqHandler for F {
    fn on_interrupt(&mut self, irq: u32, count: u64) {
        self(irq, count);
    }
}

/// The slot the proxy stores the installed handler in; shared with the
/// dispatcher thread.
pub type HandlerSlot = Arc<Mutex<Option<Box<dyn IrqHandler>>>>;

/// Per-source dispatch counters plus notification bookkeeping.
#[derive(Debug)]
pub struct IrqStats {
    dispatched: [AtomicU64; MAX_IRQ_SOURCES as usize],
    notifications: AtomicU64,
    spurious: AtomicU64,
}

impl IrqStats {
    /// Fresh counters, all zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            dispatched: std::array::from_fn(|_| AtomicU64::new(0)),
            notifications: AtomicU64::new(0),
            spurious: AtomicU64::new(0),
        }
    }

    /// How many times source `irq` has been dispatched.
    #[must_use]
    pub fn dispatched(&self, irq: u32) -> u64 {
        self.dispatched[irq as usize].load(Ordering::Relaxed)
    }

    /// Total UIO notifications observed, spurious ones included.
    #[must_use]
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Notifications whose pending mask read back zero.
    #[must_use]
    pub fn spurious(&self) -> u64 {
        self.spurious.load(Ordering::Relaxed)
    }
}

impl Default for IrqStats {
    fn default() -> Self {
        Self::new()
    }
}

/// The dispatcher body. Returns when a shutdown wake arrives, the cancel
/// flag is observed, or the source fails.
///
/// Sources `>= irq_count` are cleared with the rest of the mask but never
/// dispatched.
///
/// # Errors
///
/// Propagates source I/O failures (a broken UIO fd is fatal); handler
/// panics are caught and logged instead.
pub fn run_dispatch_loop<S, B>(
    source: &S,
    irq_mgr: &RtlIrqManager<B>,
    handler: &Mutex<Option<Box<dyn IrqHandler>>>,
    stats: &IrqStats,
    irq_count: u32,
    cancel: &AtomicBool,
) -> Result<()>
where
    S: InterruptSource,
    B: RegisterBus,
{
    while !cancel.load(Ordering::Acquire) {
        source.enable_interrupts()?;

        let Some(event_count) = source.wait_for_interrupt()? else {
            tracing::debug!("dispatcher woken for shutdown");
            break;
        };
        if cancel.load(Ordering::Acquire) {
            break;
        }
        stats.notifications.fetch_add(1, Ordering::Relaxed);

        let mask = irq_mgr.active_interrupts();
        if mask == 0 {
            stats.spurious.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event_count, "spurious notification, re-arming");
            continue;
        }

        // Clear before re-arm, and with exactly the mask we read; bits
        // that latch after this read will raise their own notification.
        irq_mgr.clear_interrupts(mask);
        tracing::trace!(mask = format_args!("{mask:#034b}"), "dispatching");

        let mut slot = handler.lock().unwrap_or_else(PoisonError::into_inner);
        for irq in 0..MAX_IRQ_SOURCES {
            if mask & (1 << irq) == 0 {
                continue;
            }
            if irq >= irq_count {
                tracing::warn!(irq, "interrupt from unconfigured source, cleared only");
                continue;
            }

            let count = stats.dispatched[irq as usize].fetch_add(1, Ordering::Relaxed) + 1;
            match slot.as_mut() {
                Some(h) => {
                    if catch_unwind(AssertUnwindSafe(|| h.on_interrupt(irq, count))).is_err() {
                        tracing::error!(irq, count, "interrupt handler panicked");
                    }
                }
                None => tracing::debug!(irq, count, "no handler installed"),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = IrqStats::new();
        assert_eq!(stats.dispatched(0), 0);
        assert_eq!(stats.notifications(), 0);
        assert_eq!(stats.spurious(), 0);
    }
}
