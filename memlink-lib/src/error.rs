//! Crate-wide error for callers that do not care which step failed.

use thiserror::Error;

use crate::config::ConfigError;
use crate::memory::MemoryAccessError;
use crate::process::AttachError;
use crate::region::ModuleNotFoundError;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    MemoryAccess(#[from] MemoryAccessError),
    #[error(transparent)]
    ModuleNotFound(#[from] ModuleNotFoundError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
