//! AXI module map.
//!
//! Each RTL module in the bitstream decodes a window of BAR0. The byte
//! offsets of those windows are published alongside the bitstream and
//! arrive through configuration as `name = offset` pairs; this module
//! gives them a typed home.

use std::fmt;

/// Sentinel marking an [`AxiMap`] slot that configuration never filled in.
pub const AXI_OFFSET_UNDEFINED: u32 = 0xFFFF_FFFF;

/// The RTL modules the control plane talks to, one per BAR0 window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum AxiModule {
    /// Bitstream revision block (version and build date words).
    MasterRevision = 0,
    /// Pending/clear interrupt bitmap.
    IrqManager = 1,
    /// Pipeline reset and drain.
    RestartManager = 2,
    /// Ping-pong DMA streaming engine.
    DataControl = 3,
    /// QSFP link status bits.
    QsfpStatus = 4,
}

impl AxiModule {
    /// Every module, in slot order.
    pub const ALL: [Self; 5] = [
        Self::MasterRevision,
        Self::IrqManager,
        Self::RestartManager,
        Self::DataControl,
        Self::QsfpStatus,
    ];

    /// Number of map slots.
    pub const COUNT: usize = Self::ALL.len();

    /// The symbolic name this module carries in configuration.
    #[must_use]
    pub const fn config_name(self) -> &'static str {
        match self {
            Self::MasterRevision => "master_revision",
            Self::IrqManager => "irq_manager",
            Self::RestartManager => "restart_manager",
            Self::DataControl => "data_control",
            Self::QsfpStatus => "qsfp_status",
        }
    }

    /// Resolve a configuration name back to a module.
    #[must_use]
    pub fn from_config_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.config_name() == name)
    }
}

impl fmt::Display for AxiModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

/// BAR0 byte offset of every RTL module window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxiMap {
    offsets: [u32; AxiModule::COUNT],
}

impl AxiMap {
    /// A map with every slot undefined.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            offsets: [AXI_OFFSET_UNDEFINED; AxiModule::COUNT],
        }
    }

    /// Set one module's BAR0 byte offset.
    pub fn set(&mut self, module: AxiModule, offset: u32) {
        self.offsets[module as usize] = offset;
    }

    /// Fetch one module's BAR0 byte offset, or `None` while undefined.
    #[must_use]
    pub fn get(&self, module: AxiModule) -> Option<u32> {
        let offset = self.offsets[module as usize];
        (offset != AXI_OFFSET_UNDEFINED).then_some(offset)
    }

    /// Build a map from `(name, offset)` configuration entries.
    ///
    /// # Errors
    ///
    /// [`AxiMapError::UnknownModule`] for a name outside [`AxiModule::ALL`];
    /// the completeness check is left to [`AxiMap::validate`] so callers can
    /// report the two failures separately.
    pub fn from_named_entries<'a, I>(entries: I) -> Result<Self, AxiMapError>
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut map = Self::empty();
        for (name, offset) in entries {
            let module = AxiModule::from_config_name(name)
                .ok_or_else(|| AxiMapError::UnknownModule(name.to_string()))?;
            map.set(module, offset);
        }
        Ok(map)
    }

    /// Check that every slot has been populated.
    ///
    /// # Errors
    ///
    /// [`AxiMapError::Undefined`] naming the first empty slot.
    pub fn validate(&self) -> Result<(), AxiMapError> {
        match AxiModule::ALL.into_iter().find(|m| self.get(*m).is_none()) {
            Some(module) => Err(AxiMapError::Undefined(module)),
            None => Ok(()),
        }
    }
}

impl Default for AxiMap {
    fn default() -> Self {
        Self::empty()
    }
}

/// Errors building or validating an [`AxiMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxiMapError {
    /// Configuration named a module this control plane does not know.
    UnknownModule(String),
    /// A slot was never populated.
    Undefined(AxiModule),
}

impl fmt::Display for AxiMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownModule(name) => write!(f, "unknown axi_map module {name:?}"),
            Self::Undefined(module) => write!(f, "axi_map has no offset for {module}"),
        }
    }
}

impl std::error::Error for AxiMapError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for module in AxiModule::ALL {
            assert_eq!(AxiModule::from_config_name(module.config_name()), Some(module));
        }
    }

    #[test]
    fn empty_map_fails_validation() {
        let map = AxiMap::empty();
        assert_eq!(
            map.validate(),
            Err(AxiMapError::Undefined(AxiModule::MasterRevision))
        );
    }

    #[test]
    fn full_map_validates() {
        let entries = [
            ("master_revision", 0x0000),
            ("irq_manager", 0x0100),
            ("restart_manager", 0x0200),
            ("data_control", 0x0300),
            ("qsfp_status", 0x0400),
        ];
        let map = AxiMap::from_named_entries(entries).unwrap();
        map.validate().unwrap();
        assert_eq!(map.get(AxiModule::DataControl), Some(0x0300));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = AxiMap::from_named_entries([("foo", 0x1000)]).unwrap_err();
        assert_eq!(err, AxiMapError::UnknownModule("foo".to_string()));
    }

    #[test]
    fn partial_map_names_missing_slot() {
        let map = AxiMap::from_named_entries([
            ("master_revision", 0x0000),
            ("irq_manager", 0x0100),
        ])
        .unwrap();
        assert_eq!(
            map.validate(),
            Err(AxiMapError::Undefined(AxiModule::RestartManager))
        );
    }
}
