use tracing::debug;

use crate::error::Error;
use crate::memory::access::DataSource;
use crate::memory::channel::MemoryChannel;
use crate::memory::MemoryAccessError;
use crate::process::{AttachError, ProcessId};
use crate::region::{MemoryRegion, ModuleNotFoundError, RegionDirectory};

/// An attached process.
///
/// Owns the platform channel (and with it the OS handle, on Windows) and the
/// module directory captured at attach time. Typed reads and writes come from
/// [`DataSource`]. Dropping the handle releases the OS resources.
pub struct ProcessHandle {
    pid: ProcessId,
    channel: Box<dyn MemoryChannel>,
    modules: RegionDirectory,
}

impl ProcessHandle {
    /// Snapshots the target's modules through `channel`. If that fails the
    /// channel is dropped and nothing is left half open.
    pub fn new(pid: ProcessId, channel: Box<dyn MemoryChannel>) -> Result<Self, AttachError> {
        let modules = channel.modules()?;
        debug!(%pid, modules = modules.len(), "attached");

        Ok(Self::from_parts(pid, channel, modules))
    }

    pub fn from_parts(
        pid: ProcessId,
        channel: Box<dyn MemoryChannel>,
        modules: RegionDirectory,
    ) -> Self {
        Self {
            pid,
            channel,
            modules,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.pid
    }

    /// The directory captured at attach time, or at the last
    /// [`reload_modules`](Self::reload_modules).
    pub fn modules(&self) -> &RegionDirectory {
        &self.modules
    }

    pub fn find_module(&self, name: &str) -> Result<&MemoryRegion, ModuleNotFoundError> {
        self.modules.find(name)
    }

    /// Resolves `offset` into module `name` to an absolute address.
    pub fn module_address(&self, name: &str, offset: u64) -> Result<u64, Error> {
        let module = self.find_module(name)?;

        module.address_of(offset).ok_or_else(|| {
            MemoryAccessError::OutsideRegion {
                module: name.to_string(),
                offset,
            }
            .into()
        })
    }

    /// Re-reads the target's module list, replacing the current directory.
    /// On failure the old directory is kept.
    pub fn reload_modules(&mut self) -> Result<(), AttachError> {
        self.modules = self.channel.modules()?;
        debug!(pid = %self.pid, modules = self.modules.len(), "reloaded modules");

        Ok(())
    }

    /// Detaches, releasing the OS handle.
    pub fn close(self) {
        debug!(pid = %self.pid, "closing");
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl DataSource for ProcessHandle {
    fn process_id(&self) -> ProcessId {
        self.pid
    }

    fn read_raw(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError> {
        self.channel.read(address, buffer)
    }

    fn write_raw(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError> {
        self.channel.write(address, buffer)
    }

    fn can_read(&self, address: u64, size: usize) -> bool {
        self.channel.can_read(address, size)
    }
}
