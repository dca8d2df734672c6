//! UIO interrupt binding for the PCI function.
//!
//! The kernel's generic UIO PCI driver ties the function's interrupt to a
//! `/dev/uioN` node: a 4-byte read blocks until the interrupt fires and
//! returns a monotonically increasing event count. On every assertion the
//! kernel sets the function's INTx-disable bit to prevent livelock, so the
//! bit must be cleared again before each wait.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustix::event::{eventfd, poll, EventfdFlags, PollFd, PollFlags};
use rustix::io::{pread, pwrite};
use rustix::fd::OwnedFd;

use ecd_chip::EcdDeviceId;

use crate::dispatch::InterruptSource;
use crate::error::{EcdError, Result};
use crate::pci;

const SYS_UIO_CLASS: &str = "/sys/class/uio";

/// Byte offset of the upper half of the PCI command word in config space.
const COMMAND_HIGH_OFFSET: u64 = 5;
/// INTx-disable, as seen from the command word's upper byte.
const INTX_DISABLE: u8 = 0x04;

/// The `/dev/uioN` node bound to one PCI function.
#[derive(Debug)]
pub struct UioBinding {
    index: usize,
    dev: File,
    config: File,
    wake: Arc<OwnedFd>,
}

impl UioBinding {
    /// Resolve and open the UIO node whose `device` symlink points at the
    /// function matching `id`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the function or its UIO node is absent, `Permission`
    /// if the node or its config space refuses to open.
    pub fn bind(id: EcdDeviceId) -> Result<Self> {
        let bdf = pci::find_function(id)?;
        let index = find_uio_index(&bdf)?;

        let dev_path = format!("/dev/uio{index}");
        let dev = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&dev_path)
            .map_err(|e| EcdError::from_path_io(&dev_path, e))?;

        let config_path = PathBuf::from(SYS_UIO_CLASS)
            .join(format!("uio{index}"))
            .join("device/config");
        let config = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config_path)
            .map_err(|e| EcdError::from_path_io(config_path.display(), e))?;

        let wake = eventfd(0, EventfdFlags::CLOEXEC).map_err(std::io::Error::from)?;

        tracing::info!("bound {bdf} to uio{index}");

        Ok(Self {
            index,
            dev,
            config,
            wake: Arc::new(wake),
        })
    }

    /// The `N` of the resolved `/dev/uioN`.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// A handle that can wake a blocked [`UioBinding::wait_for_interrupt`]
    /// from another thread.
    #[must_use]
    pub fn waker(&self) -> UioWaker {
        UioWaker {
            wake: Arc::clone(&self.wake),
        }
    }
}

impl InterruptSource for UioBinding {
    /// Clear INTx-disable in the function's command word so the next
    /// assertion reaches us. Writes exactly one byte, `command_high & !0x04`,
    /// at config offset 5.
    fn enable_interrupts(&self) -> Result<()> {
        let mut byte = [0u8; 1];
        pread(&self.config, &mut byte, COMMAND_HIGH_OFFSET).map_err(std::io::Error::from)?;
        byte[0] &= !INTX_DISABLE;
        pwrite(&self.config, &byte, COMMAND_HIGH_OFFSET).map_err(std::io::Error::from)?;
        Ok(())
    }

    /// Block until the interrupt fires, returning the kernel's event count;
    /// `Ok(None)` means the waker fired and the caller should shut down.
    fn wait_for_interrupt(&self) -> Result<Option<u32>> {
        let mut fds = [
            PollFd::new(&self.dev, PollFlags::IN),
            PollFd::new(&*self.wake, PollFlags::IN),
        ];
        poll(&mut fds, -1).map_err(std::io::Error::from)?;

        if fds[1].revents().intersects(PollFlags::IN) {
            return Ok(None);
        }

        let mut count = [0u8; 4];
        let n = rustix::io::read(&self.dev, &mut count).map_err(std::io::Error::from)?;
        if n != count.len() {
            return Err(EcdError::Io {
                source: std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("short read of {n} bytes from /dev/uio{}", self.index),
                ),
            });
        }
        Ok(Some(u32::from_ne_bytes(count)))
    }
}

/// Wakes the dispatcher out of its blocking wait during shutdown.
#[derive(Debug, Clone)]
pub struct UioWaker {
    wake: Arc<OwnedFd>,
}

impl UioWaker {
    /// Make any pending or future `wait_for_interrupt` return `Ok(None)`.
    pub fn wake(&self) {
        if let Err(e) = rustix::io::write(&*self.wake, &1u64.to_ne_bytes()) {
            tracing::error!("failed to wake dispatcher: {e}");
        }
    }
}

/// Scan `/sys/class/uio` for the node whose `device` symlink resolves to
/// the function at `bdf`.
fn find_uio_index(bdf: &str) -> Result<usize> {
    let entries = match std::fs::read_dir(SYS_UIO_CLASS) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EcdError::not_found(format!(
                "{SYS_UIO_CLASS} (uio_pci_generic not bound to {bdf}?)"
            )));
        }
        Err(e) => return Err(EcdError::from_path_io(SYS_UIO_CLASS, e)),
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(index) = name.strip_prefix("uio").and_then(|n| n.parse::<usize>().ok()) else {
            continue;
        };
        if uio_device_target(&entry.path()) == Some(bdf.to_string()) {
            return Ok(index);
        }
    }

    Err(EcdError::not_found(format!("UIO node for {bdf}")))
}

/// Final component of the `device` symlink under a uio sysfs dir.
fn uio_device_target(uio_dir: &Path) -> Option<String> {
    let target = std::fs::read_link(uio_dir.join("device")).ok()?;
    Some(target.file_name()?.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intx_disable_bit_is_command_bit_10() {
        // Offset 5 addresses command-word bits 15:8; bit 2 there is
        // command bit 10, the INTx-disable bit.
        assert_eq!(u16::from(INTX_DISABLE) << 8, 1 << 10);
    }

    #[test]
    #[ignore] // Requires hardware
    fn bind_real_device() {
        let id: EcdDeviceId = "10ee:7038".parse().unwrap();
        match UioBinding::bind(id) {
            Ok(uio) => println!("bound uio{}", uio.index()),
            Err(e) => println!("no UIO node (expected without hardware): {e}"),
        }
    }
}
