//! Attach-time options.
//!
//! Options can be built in code or read from the environment:
//!
//! - `MEMLINK_TRANSFER`: how Linux moves bytes (`auto`, `vectored` or
//!   `procmem`, default `auto`). Ignored on Windows.

use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const TRANSFER_ENV: &str = "MEMLINK_TRANSFER";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown transfer mode: {0} (expected auto, vectored or procmem)")]
    UnknownTransferMode(String),
}

/// Transport used by the Linux channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// `process_vm_readv`/`process_vm_writev`, switching to `/proc/<pid>/mem`
    /// when the syscall is unavailable or filtered.
    #[default]
    Auto,
    /// `process_vm_readv`/`process_vm_writev` only.
    Vectored,
    /// `/proc/<pid>/mem` only.
    ProcMem,
}

impl FromStr for TransferMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "vectored" | "vm" => Ok(Self::Vectored),
            "procmem" | "mem" => Ok(Self::ProcMem),
            _ => Err(ConfigError::UnknownTransferMode(s.to_string())),
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Vectored => write!(f, "vectored"),
            Self::ProcMem => write!(f, "procmem"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachOptions {
    pub transfer: TransferMode,
}

impl AttachOptions {
    /// Reads options from the environment, falling back to defaults for
    /// anything unset. A set but unrecognised value is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut options = Self::default();

        if let Ok(transfer) = env::var(TRANSFER_ENV) {
            options.transfer = transfer.parse()?;
        }

        Ok(options)
    }

    pub fn with_transfer(mut self, transfer: TransferMode) -> Self {
        self.transfer = transfer;
        self
    }
}
