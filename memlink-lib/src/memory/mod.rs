use thiserror::Error;

pub mod access;
pub mod buffer;
pub mod channel;

#[derive(Error, Debug)]
pub enum MemoryAccessError {
    #[error("failed to transfer {size} bytes at {address:#x}: {source}")]
    Transfer {
        address: u64,
        size: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("short transfer at {address:#x}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        address: u64,
        expected: usize,
        actual: usize,
    },
    #[error("address {0:#x} is not addressable on this host")]
    AddressOutOfRange(u64),
    #[error("{width} bytes at offset {offset} do not fit in a {size} byte buffer")]
    OutOfBounds {
        offset: usize,
        width: usize,
        size: usize,
    },
    #[error("offset {offset:#x} is outside module {module}")]
    OutsideRegion { module: String, offset: u64 },
    #[error("failed to decode memory: {0}")]
    Decode(String),
    #[error("cannot allocate a {0} byte transfer buffer")]
    Allocation(usize),
}

/// Allocates `size` zeroed bytes, failing instead of aborting when the
/// allocator refuses.
pub(crate) fn zeroed(size: usize) -> Result<Vec<u8>, MemoryAccessError> {
    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(size)
        .map_err(|_| MemoryAccessError::Allocation(size))?;
    bytes.resize(size, 0);

    Ok(bytes)
}

/// Fails unless the OS moved exactly `expected` bytes.
#[cfg_attr(not(any(target_os = "linux", windows)), allow(dead_code))]
pub(crate) fn check_transferred(
    address: u64,
    expected: usize,
    actual: usize,
) -> Result<(), MemoryAccessError> {
    if actual != expected {
        return Err(MemoryAccessError::ShortTransfer {
            address,
            expected,
            actual,
        });
    }

    Ok(())
}

#[cfg_attr(not(any(target_os = "linux", windows)), allow(dead_code))]
pub(crate) fn remote_address(address: u64) -> Result<usize, MemoryAccessError> {
    usize::try_from(address).map_err(|_| MemoryAccessError::AddressOutOfRange(address))
}
