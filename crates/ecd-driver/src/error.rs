//! Error types for ECD-Master control-plane operations.

use thiserror::Error;

/// Result type alias for control-plane operations.
pub type Result<T> = std::result::Result<T, EcdError>;

/// Errors that can occur while bringing up or driving the card.
#[derive(Debug, Error)]
pub enum EcdError {
    /// Caller lacks the privileges the operation needs (effective uid 0
    /// for BAR mmap and `/dev/mem`), or the kernel refused a sysfs write.
    #[error("Permission denied: {reason}")]
    Permission {
        /// What was refused.
        reason: String,
    },

    /// The PCI function, UIO node, or sysfs entry is absent.
    #[error("Not found: {what}")]
    NotFound {
        /// What was being looked for.
        what: String,
    },

    /// Mapping a BAR resource file or `/dev/mem` window failed.
    #[error("Memory map failed: {what}: {reason}")]
    MmapFailed {
        /// The region being mapped.
        what: String,
        /// Underlying failure.
        reason: String,
    },

    /// The device did not come back after a hot-reset.
    #[error("PCIe link error: {reason}")]
    Link {
        /// What the bring-up observed.
        reason: String,
    },

    /// A configuration value is missing or malformed.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What failed validation.
        reason: String,
    },

    /// A lifecycle operation was called out of order.
    #[error("Invalid state: {operation} called while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The lifecycle state the proxy was in.
        state: &'static str,
    },

    /// A QSFP channel was required to be up but is not.
    #[error("QSFP channel {channel} link is down")]
    LinkDown {
        /// The channel that was checked.
        channel: u32,
    },

    /// The external JTAG programmer produced an ERROR line or no output.
    #[error("External tool failed: {reason}")]
    ExternalTool {
        /// The first ERROR line, or why the tool could not run.
        reason: String,
    },

    /// I/O error talking to sysfs, UIO, or the programmer.
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl EcdError {
    /// Create a permission error.
    pub fn permission(reason: impl Into<String>) -> Self {
        Self::Permission {
            reason: reason.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an mmap-failed error.
    pub fn mmap_failed(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MmapFailed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a link error.
    pub fn link(reason: impl Into<String>) -> Self {
        Self::Link {
            reason: reason.into(),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an external-tool error.
    pub fn external_tool(reason: impl Into<String>) -> Self {
        Self::ExternalTool {
            reason: reason.into(),
        }
    }

    /// Map an I/O error from `path` into the kind §7 assigns it: `EACCES`
    /// becomes [`EcdError::Permission`], `ENOENT` becomes
    /// [`EcdError::NotFound`], everything else stays [`EcdError::Io`].
    pub fn from_path_io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::permission(format!("{path}: {err}")),
            std::io::ErrorKind::NotFound => Self::not_found(path.to_string()),
            _ => Self::Io { source: err },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kind_mapping() {
        let err = EcdError::from_path_io(
            "/sys/bus/pci/devices",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, EcdError::Permission { .. }));

        let err = EcdError::from_path_io(
            "/dev/uio0",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, EcdError::NotFound { .. }));
    }
}
