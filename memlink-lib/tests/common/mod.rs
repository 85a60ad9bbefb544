#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use memlink_lib::{
    AttachError, MemoryAccessError, MemoryChannel, MemoryRegion, ProcessHandle, ProcessId,
    RegionDirectory,
};
use tracing_subscriber::EnvFilter;

pub const FAKE_BASE: u64 = 0x10_0000;
pub const FAKE_SIZE: usize = 0x1000;
pub const FAKE_PID: u32 = 4242;

/// Installs a test subscriber once; `RUST_LOG` controls the level.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An in-memory target: one mapped block at [`FAKE_BASE`].
pub struct FakeMemory {
    bytes: Mutex<Vec<u8>>,
    modules: Mutex<Vec<MemoryRegion>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self {
            bytes: Mutex::new(vec![0; FAKE_SIZE]),
            modules: Mutex::new(vec![
                MemoryRegion::new("fake.so", FAKE_BASE, FAKE_SIZE as u64, "r-xp").unwrap(),
            ]),
        }
    }

    pub fn replace_modules(&self, modules: Vec<MemoryRegion>) {
        *self.modules.lock().unwrap() = modules;
    }

    fn span(&self, address: u64, len: usize) -> Result<(usize, usize), MemoryAccessError> {
        let start = address
            .checked_sub(FAKE_BASE)
            .filter(|offset| *offset < FAKE_SIZE as u64)
            .ok_or_else(|| MemoryAccessError::Transfer {
                address,
                size: len,
                source: io::Error::new(io::ErrorKind::Other, "unmapped"),
            })? as usize;

        Ok((start, len.min(FAKE_SIZE - start)))
    }
}

impl MemoryChannel for FakeMemory {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let (start, available) = self.span(address, buffer.len())?;
        if available != buffer.len() {
            return Err(MemoryAccessError::ShortTransfer {
                address,
                expected: buffer.len(),
                actual: available,
            });
        }

        let bytes = self.bytes.lock().unwrap();
        buffer.copy_from_slice(&bytes[start..start + available]);
        Ok(())
    }

    fn write(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let (start, available) = self.span(address, buffer.len())?;
        if available != buffer.len() {
            return Err(MemoryAccessError::ShortTransfer {
                address,
                expected: buffer.len(),
                actual: available,
            });
        }

        let mut bytes = self.bytes.lock().unwrap();
        bytes[start..start + available].copy_from_slice(buffer);
        Ok(())
    }

    fn modules(&self) -> Result<RegionDirectory, AttachError> {
        Ok(RegionDirectory::from_regions(
            self.modules.lock().unwrap().iter().cloned(),
        ))
    }
}

/// Lets a test keep a handle on the fake after giving it to a process.
pub struct SharedMemory(pub Arc<FakeMemory>);

impl MemoryChannel for SharedMemory {
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError> {
        self.0.read(address, buffer)
    }

    fn write(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError> {
        self.0.write(address, buffer)
    }

    fn modules(&self) -> Result<RegionDirectory, AttachError> {
        self.0.modules()
    }
}

pub fn fake_process() -> ProcessHandle {
    init_logging();
    ProcessHandle::new(ProcessId::from(FAKE_PID), Box::new(FakeMemory::new())).unwrap()
}
