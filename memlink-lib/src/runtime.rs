//! One-time, process-wide platform setup.

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::memory::channel::probe_vectored_io;
use crate::process::AttachError;

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// What the host supports, probed once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime {
    os: &'static str,
    vectored_io: bool,
}

impl Runtime {
    pub fn os(&self) -> &'static str {
        self.os
    }

    /// Whether `process_vm_readv`/`process_vm_writev` work from this process.
    /// Always `false` off Linux.
    pub fn vectored_io(&self) -> bool {
        self.vectored_io
    }
}

/// Probes the host. Later calls return the cached result.
///
/// Only Linux and Windows are supported; every other platform fails here,
/// before any attach is attempted.
pub fn init() -> Result<&'static Runtime, AttachError> {
    RUNTIME.get_or_try_init(|| {
        let os = std::env::consts::OS;
        if !cfg!(any(target_os = "linux", windows)) {
            return Err(AttachError::UnsupportedPlatform(os));
        }

        let runtime = Runtime {
            os,
            vectored_io: probe_vectored_io(),
        };
        debug!(os, vectored_io = runtime.vectored_io, "runtime initialized");

        Ok(runtime)
    })
}
