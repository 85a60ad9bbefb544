use super::buffer::{NativeBuffer, NativeValue};
use super::{zeroed, MemoryAccessError};
use crate::process::ProcessId;

macro_rules! typed_accessors {
    ($($type:ident),*) => {
        paste::paste! {
            $(
                #[doc = concat!("Reads a `", stringify!($type), "` from `address`.")]
                fn [<read_ $type>](&self, address: u64) -> Result<$type, MemoryAccessError> {
                    self.read::<$type>(address)
                }

                #[doc = concat!("Writes a `", stringify!($type), "` to `address`.")]
                fn [<write_ $type>](
                    &self,
                    address: u64,
                    value: $type,
                ) -> Result<(), MemoryAccessError> {
                    self.write::<$type>(address, value)
                }
            )*
        }
    };
}

/// Typed access to another address space.
///
/// Implementors only provide the raw byte transfer; every typed accessor is
/// derived from it by sizing a [`NativeBuffer`] for the value and decoding
/// it in native byte order.
pub trait DataSource {
    /// The process whose memory this source reads.
    fn process_id(&self) -> ProcessId;

    /// Fills all of `buffer` from `address` or fails.
    fn read_raw(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError>;

    /// Writes all of `buffer` to `address` or fails.
    fn write_raw(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError>;

    /// Whether `size` bytes at `address` can be read right now.
    fn can_read(&self, address: u64, size: usize) -> bool;

    fn read_buffer(&self, address: u64, size: usize) -> Result<NativeBuffer, MemoryAccessError> {
        let mut buffer = NativeBuffer::try_new(size)?;
        self.read_into(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Fills `target` entirely from `address` and records where it came from.
    fn read_into(&self, address: u64, target: &mut NativeBuffer) -> Result<(), MemoryAccessError> {
        self.read_raw(address, target.as_bytes_mut())?;
        target.stamp(self.process_id(), address);
        Ok(())
    }

    fn write_buffer(&self, address: u64, buffer: &NativeBuffer) -> Result<(), MemoryAccessError> {
        self.write_raw(address, buffer.as_bytes())
    }

    fn read<T: NativeValue>(&self, address: u64) -> Result<T, MemoryAccessError> {
        let buffer = self.read_buffer(address, T::WIDTH)?;
        T::decode(&buffer, 0)
    }

    fn write<T: NativeValue>(&self, address: u64, value: T) -> Result<(), MemoryAccessError> {
        let mut buffer = NativeBuffer::new(T::WIDTH);
        value.encode(&mut buffer, 0)?;
        self.write_buffer(address, &buffer)
    }

    typed_accessors!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

    /// Reads an 8 byte address stored at `address`.
    fn read_pointer(&self, address: u64) -> Result<u64, MemoryAccessError> {
        self.read_u64(address)
    }

    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>, MemoryAccessError> {
        let mut bytes = zeroed(len)?;
        self.read_raw(address, &mut bytes)?;
        Ok(bytes)
    }

    fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<(), MemoryAccessError> {
        self.write_raw(address, bytes)
    }

    /// Reads a fixed-length byte string, cut at the first NUL.
    fn read_string(&self, address: u64, len: usize) -> Result<String, MemoryAccessError> {
        let bytes = self.read_bytes(address, len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}
