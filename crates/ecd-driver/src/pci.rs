//! PCI function location, hot-reset, and BAR mapping.
//!
//! Everything here goes through sysfs: the function is located by scanning
//! `/sys/bus/pci/devices` for a matching vendor:device pair, its BARs are
//! mapped from the per-function `resourceN` files, and the hot-reset pulses
//! the secondary-bus-reset bit in the parent bridge's config space.

// BAR sizes fit in usize on 64-bit, the only target this driver runs on.
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::{Duration, Instant};

use rustix::io::{pread, pwrite};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use ecd_chip::EcdDeviceId;

use crate::error::{EcdError, Result};
use crate::mmio::RegisterBlock;

const SYS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

// From the kernel's resource flag encoding, as exposed in the sysfs
// `resource` table.
const IORESOURCE_MEM: u64 = 0x0000_0200;
const IORESOURCE_READONLY: u64 = 0x0000_4000;

// PCI-to-PCI bridge control word and its secondary-bus-reset bit.
const PCI_BRIDGE_CONTROL: u64 = 0x3E;
const PCI_BRIDGE_CTL_BUS_RESET: u16 = 0x0040;

/// How long each edge of the reset pulse is held. Bringing a freshly
/// loaded bitstream to an enumerable state requires a link retrain.
const RESET_SETTLE: Duration = Duration::from_millis(100);

/// How long to wait for the function to re-enumerate after the pulse.
const RESET_TIMEOUT: Duration = Duration::from_secs(2);

/// One memory-mapped BAR of the function.
pub struct ResourceRegion {
    index: u8,
    ptr: NonNull<u8>,
    size: usize,
    writable: bool,
    _file: File,
}

impl std::fmt::Debug for ResourceRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegion")
            .field("index", &self.index)
            .field("ptr", &format_args!("{:p}", self.ptr))
            .field("size", &self.size)
            .field("writable", &self.writable)
            .finish()
    }
}

// SAFETY: Send/Sync - the mapping is process-wide and the region owns it
// exclusively; all register traffic goes through volatile accesses on
// `RegisterBlock` views.
unsafe impl Send for ResourceRegion {}
unsafe impl Sync for ResourceRegion {}

impl ResourceRegion {
    /// BAR index (the `N` of `resourceN`).
    #[must_use]
    pub const fn index(&self) -> u8 {
        self.index
    }

    /// Mapped size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether the BAR was mapped read-write.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Base of the mapping in this process.
    #[must_use]
    pub fn base_addr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// A register window starting `byte_offset` into this BAR and running
    /// to its end.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the offset is unaligned or beyond the BAR.
    pub fn block_at(&self, byte_offset: u32) -> Result<RegisterBlock> {
        let offset = byte_offset as usize;
        if offset % 4 != 0 {
            return Err(EcdError::invalid_config(format!(
                "axi offset {byte_offset:#x} is not 32-bit aligned"
            )));
        }
        if offset >= self.size {
            return Err(EcdError::invalid_config(format!(
                "axi offset {byte_offset:#x} is outside BAR{} ({:#x} bytes)",
                self.index, self.size
            )));
        }
        let words = (self.size - offset) / 4;
        // SAFETY: the mapping is valid for self.size bytes and the offset
        // was bounds-checked; the region outlives the block per the
        // documented view contract.
        Ok(unsafe { RegisterBlock::new(self.ptr.as_ptr().add(offset).cast::<u32>(), words) })
    }
}

impl Drop for ResourceRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size are exactly what mmap returned in `map_bar`.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap of BAR{} failed: {e}", self.index);
            }
        }
        tracing::debug!("unmapped BAR{}", self.index);
    }
}

/// An opened PCI function with its memory BARs mapped.
#[derive(Debug)]
pub struct PciDevice {
    bdf: String,
    id: EcdDeviceId,
    resources: Vec<ResourceRegion>,
}

impl PciDevice {
    /// Locate the function matching `id` and map every writable memory BAR
    /// (`PROT_READ|PROT_WRITE`, `MAP_SHARED`, full size).
    ///
    /// # Errors
    ///
    /// `NotFound` if no function matches, `InvalidConfig` if several do,
    /// `Permission`/`MmapFailed` per §7 for the sysfs accesses.
    pub fn open(id: EcdDeviceId) -> Result<Self> {
        let bdf = find_function(id)?;
        let dev_dir = PathBuf::from(SYS_PCI_DEVICES).join(&bdf);

        let table_path = dev_dir.join("resource");
        let table = std::fs::read_to_string(&table_path)
            .map_err(|e| EcdError::from_path_io(table_path.display(), e))?;

        let mut resources = Vec::new();
        for entry in parse_resource_table(&table) {
            if !entry.is_mappable_mem() {
                continue;
            }
            match map_bar(&dev_dir, &entry) {
                Ok(region) => resources.push(region),
                Err(e) => {
                    // 64-bit BARs leave their odd-indexed resource file
                    // absent; anything else is fatal.
                    if matches!(e, EcdError::NotFound { .. }) {
                        tracing::debug!("resource{} absent, skipping", entry.index);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        if resources.is_empty() {
            return Err(EcdError::mmap_failed(
                bdf,
                "no mappable memory BARs (device not enabled?)",
            ));
        }

        tracing::info!("opened {id} at {bdf} with {} mapped BAR(s)", resources.len());

        Ok(Self { bdf, id, resources })
    }

    /// The function's bus:device.function address.
    #[must_use]
    pub fn bdf(&self) -> &str {
        &self.bdf
    }

    /// The vendor:device pair this function matched.
    #[must_use]
    pub const fn id(&self) -> EcdDeviceId {
        self.id
    }

    /// Every mapped BAR, in ascending index order.
    #[must_use]
    pub fn resource_list(&self) -> &[ResourceRegion] {
        &self.resources
    }

    /// The mapped BAR with the given index.
    ///
    /// # Errors
    ///
    /// `MmapFailed` if that BAR was not among the mapped regions.
    pub fn bar(&self, index: u8) -> Result<&ResourceRegion> {
        self.resources
            .iter()
            .find(|r| r.index == index)
            .ok_or_else(|| EcdError::mmap_failed(format!("BAR{index}"), "not mapped"))
    }
}

/// Pulse the parent bridge's secondary-bus-reset bit and wait for the
/// function to come back.
///
/// Each edge of the pulse is held for at least 100 ms; the function must
/// re-enumerate within 2 s or the reset fails with `Link`.
///
/// # Errors
///
/// `NotFound` if `id` is absent, `Permission` if the bridge's config space
/// refuses the write, `Link` if the device does not reappear.
pub fn hot_reset(id: EcdDeviceId) -> Result<()> {
    let bdf = find_function(id)?;
    let bridge_config = parent_bridge_config(&bdf)?;

    tracing::info!("hot-resetting {id} at {bdf}");

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&bridge_config)
        .map_err(|e| EcdError::from_path_io(bridge_config.display(), e))?;

    let config_io =
        |e: rustix::io::Errno| EcdError::from_path_io(bridge_config.display(), e.into());

    let mut word = [0u8; 2];
    pread(&file, &mut word, PCI_BRIDGE_CONTROL).map_err(config_io)?;
    let control = u16::from_le_bytes(word);

    let asserted = (control | PCI_BRIDGE_CTL_BUS_RESET).to_le_bytes();
    pwrite(&file, &asserted, PCI_BRIDGE_CONTROL).map_err(config_io)?;
    std::thread::sleep(RESET_SETTLE);

    let released = (control & !PCI_BRIDGE_CTL_BUS_RESET).to_le_bytes();
    pwrite(&file, &released, PCI_BRIDGE_CONTROL).map_err(config_io)?;
    std::thread::sleep(RESET_SETTLE);

    // The secondary bus re-enumerates; poll until our function answers
    // with the right vendor word again.
    let deadline = Instant::now() + RESET_TIMEOUT;
    let vendor_path = PathBuf::from(SYS_PCI_DEVICES).join(&bdf).join("vendor");
    loop {
        if let Ok(Some(vendor)) = read_hex_sysfs(&vendor_path) {
            if vendor == id.vendor {
                tracing::debug!("{bdf} back on the bus");
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(EcdError::link(format!(
                "{bdf} did not reappear within {RESET_TIMEOUT:?} of hot-reset"
            )));
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Scan `/sys/bus/pci/devices` for the single function matching `id`.
pub(crate) fn find_function(id: EcdDeviceId) -> Result<String> {
    let entries = std::fs::read_dir(SYS_PCI_DEVICES)
        .map_err(|e| EcdError::from_path_io(SYS_PCI_DEVICES, e))?;

    let mut matches = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let vendor = read_hex_sysfs(&path.join("vendor")).ok().flatten();
        let device = read_hex_sysfs(&path.join("device")).ok().flatten();
        if vendor == Some(id.vendor) && device == Some(id.device) {
            matches.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    matches.sort();

    match matches.len() {
        0 => Err(EcdError::not_found(format!("PCI function {id}"))),
        1 => Ok(matches.remove(0)),
        n => Err(EcdError::invalid_config(format!(
            "{id} matches {n} PCI functions; exactly one expected"
        ))),
    }
}

/// Resolve the `config` file of the bridge upstream of `bdf`.
fn parent_bridge_config(bdf: &str) -> Result<PathBuf> {
    let dev_path = PathBuf::from(SYS_PCI_DEVICES).join(bdf);
    let real = std::fs::canonicalize(&dev_path)
        .map_err(|e| EcdError::from_path_io(dev_path.display(), e))?;

    let parent = real
        .parent()
        .ok_or_else(|| EcdError::link(format!("{bdf} has no parent bridge")))?;
    let config = parent.join("config");
    if !config.exists() {
        // Function sits directly on a root bus with no resettable bridge.
        return Err(EcdError::link(format!(
            "{bdf} has no parent bridge config space"
        )));
    }
    Ok(config)
}

/// One line of the sysfs `resource` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ResourceEntry {
    index: u8,
    start: u64,
    end: u64,
    flags: u64,
}

impl ResourceEntry {
    fn size(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    fn is_mappable_mem(&self) -> bool {
        self.start != 0
            && self.end >= self.start
            && self.flags & IORESOURCE_MEM != 0
            && self.flags & IORESOURCE_READONLY == 0
    }
}

/// Parse the `resource` table: one `start end flags` hex triple per line,
/// line `N` describing `resourceN`.
fn parse_resource_table(table: &str) -> Vec<ResourceEntry> {
    let hex = |tok: &str| u64::from_str_radix(tok.trim_start_matches("0x"), 16).ok();

    table
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let mut tok = line.split_whitespace();
            let entry = ResourceEntry {
                index: u8::try_from(index).ok()?,
                start: hex(tok.next()?)?,
                end: hex(tok.next()?)?,
                flags: hex(tok.next()?)?,
            };
            Some(entry)
        })
        .collect()
}

fn map_bar(dev_dir: &Path, entry: &ResourceEntry) -> Result<ResourceRegion> {
    let path = dev_dir.join(format!("resource{}", entry.index));
    let size = entry.size();

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| EcdError::from_path_io(path.display(), e))?;

    // SAFETY: the fd was just opened read-write; size comes from the
    // kernel's resource table; the file is stored in the region so the
    // mapping stays backed for its lifetime, and Drop unmaps exactly once.
    let ptr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            &file,
            0,
        )
        .map_err(|e| EcdError::mmap_failed(path.display().to_string(), e))?
    };

    tracing::debug!(
        "mapped BAR{} ({size:#x} bytes at {ptr:p}, phys {:#x})",
        entry.index,
        entry.start
    );

    Ok(ResourceRegion {
        index: entry.index,
        ptr: NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| EcdError::mmap_failed(path.display().to_string(), "null mapping"))?,
        size,
        writable: true,
        _file: file,
    })
}

/// Read a `0x`-prefixed hex word from a sysfs attribute.
fn read_hex_sysfs(path: &Path) -> Result<Option<u16>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EcdError::from_path_io(path.display(), e)),
    };
    Ok(u16::from_str_radix(content.trim().trim_start_matches("0x"), 16).ok())
}
