//! Typed views over the RTL modules behind BAR0.
//!
//! Each view is a thin, non-owning handle over one module's register
//! window. Views are generic over [`crate::mmio::RegisterBus`] so the
//! software model in [`crate::sim`] can stand in for live MMIO; on
//! hardware they are instantiated over [`crate::mmio::RegisterBlock`].

mod data_control;
mod irq;
mod qsfp;
mod restart;
mod revision;

pub use data_control::{PingPongBuffer, RtlDataControl};
pub use irq::RtlIrqManager;
pub use qsfp::RtlQsfpStatus;
pub use restart::RtlRestartManager;
pub use revision::RtlAxiRevision;
