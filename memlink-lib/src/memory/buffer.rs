use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

use super::{zeroed, MemoryAccessError};
use crate::process::ProcessId;

/// A fixed-size block of memory that transfers land in and leave from.
///
/// The size is chosen at construction and never changes. Multi-byte values
/// are encoded in the host's native byte order, which is also the target's
/// byte order for any process running on the same machine.
///
/// The buffer remembers which process and address it was last filled from.
/// That provenance is informational only.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeBuffer {
    bytes: Box<[u8]>,
    last_read_source: Option<ProcessId>,
    last_read_address: Option<u64>,
}

macro_rules! multi_byte_accessors {
    ($($type:ident),*) => {
        paste::paste! {
            $(
                #[doc = concat!("Decodes a native-endian `", stringify!($type), "` at `offset`.")]
                pub fn [<get_ $type>](&self, offset: usize) -> Result<$type, MemoryAccessError> {
                    self.window(offset, std::mem::size_of::<$type>())?
                        .[<read_ $type>]::<NativeEndian>()
                        .map_err(|e| MemoryAccessError::Decode(e.to_string()))
                }

                #[doc = concat!("Encodes a native-endian `", stringify!($type), "` at `offset`.")]
                pub fn [<put_ $type>](
                    &mut self,
                    offset: usize,
                    value: $type,
                ) -> Result<&mut Self, MemoryAccessError> {
                    self.window_mut(offset, std::mem::size_of::<$type>())?
                        .[<write_ $type>]::<NativeEndian>(value)
                        .map_err(|e| MemoryAccessError::Decode(e.to_string()))?;
                    Ok(self)
                }
            )*
        }
    };
}

impl NativeBuffer {
    /// Allocates a zeroed buffer of `size` bytes.
    ///
    /// Panics if the allocation fails; see [`try_new`](Self::try_new).
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size].into_boxed_slice(),
            last_read_source: None,
            last_read_address: None,
        }
    }

    /// Like [`new`](Self::new), but reports an allocation failure.
    pub fn try_new(size: usize) -> Result<Self, MemoryAccessError> {
        Ok(Self {
            bytes: zeroed(size)?.into_boxed_slice(),
            last_read_source: None,
            last_read_address: None,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
            last_read_source: None,
            last_read_address: None,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// Copies `data` in at `offset`. Fails if it would run past the end.
    pub fn copy_from_slice(
        &mut self,
        offset: usize,
        data: &[u8],
    ) -> Result<&mut Self, MemoryAccessError> {
        self.window_mut(offset, data.len())?.copy_from_slice(data);
        Ok(self)
    }

    /// The process this buffer was last filled from, if any.
    pub fn last_read_source(&self) -> Option<ProcessId> {
        self.last_read_source
    }

    /// The remote address this buffer was last filled from, if any.
    pub fn last_read_address(&self) -> Option<u64> {
        self.last_read_address
    }

    pub(crate) fn stamp(&mut self, source: ProcessId, address: u64) {
        self.last_read_source = Some(source);
        self.last_read_address = Some(address);
    }

    pub fn get_u8(&self, offset: usize) -> Result<u8, MemoryAccessError> {
        Ok(self.window(offset, 1)?[0])
    }

    pub fn get_i8(&self, offset: usize) -> Result<i8, MemoryAccessError> {
        self.window(offset, 1)?
            .read_i8()
            .map_err(|e| MemoryAccessError::Decode(e.to_string()))
    }

    /// Any nonzero byte reads as `true`.
    pub fn get_bool(&self, offset: usize) -> Result<bool, MemoryAccessError> {
        Ok(self.get_u8(offset)? != 0)
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<&mut Self, MemoryAccessError> {
        self.window_mut(offset, 1)?[0] = value;
        Ok(self)
    }

    pub fn put_i8(&mut self, offset: usize, value: i8) -> Result<&mut Self, MemoryAccessError> {
        self.window_mut(offset, 1)?
            .write_i8(value)
            .map_err(|e| MemoryAccessError::Decode(e.to_string()))?;
        Ok(self)
    }

    pub fn put_bool(&mut self, offset: usize, value: bool) -> Result<&mut Self, MemoryAccessError> {
        self.put_u8(offset, u8::from(value))
    }

    multi_byte_accessors!(u16, i16, u32, i32, u64, i64, f32, f64);

    fn bounds(
        &self,
        offset: usize,
        width: usize,
    ) -> Result<std::ops::Range<usize>, MemoryAccessError> {
        let out_of_bounds = || MemoryAccessError::OutOfBounds {
            offset,
            width,
            size: self.bytes.len(),
        };

        let end = offset.checked_add(width).ok_or_else(out_of_bounds)?;
        if end > self.bytes.len() {
            return Err(out_of_bounds());
        }

        Ok(offset..end)
    }

    fn window(&self, offset: usize, width: usize) -> Result<&[u8], MemoryAccessError> {
        let range = self.bounds(offset, width)?;
        Ok(&self.bytes[range])
    }

    fn window_mut(&mut self, offset: usize, width: usize) -> Result<&mut [u8], MemoryAccessError> {
        let range = self.bounds(offset, width)?;
        Ok(&mut self.bytes[range])
    }
}

/// A fixed-width value that can be moved through a [`NativeBuffer`].
pub trait NativeValue: Copy {
    /// Number of bytes the value occupies in the target.
    const WIDTH: usize;

    fn decode(buffer: &NativeBuffer, offset: usize) -> Result<Self, MemoryAccessError>;

    fn encode(self, buffer: &mut NativeBuffer, offset: usize) -> Result<(), MemoryAccessError>;
}

macro_rules! impl_native_value {
    ($($type:ident),*) => {
        paste::paste! {
            $(
                impl NativeValue for $type {
                    const WIDTH: usize = std::mem::size_of::<$type>();

                    fn decode(
                        buffer: &NativeBuffer,
                        offset: usize,
                    ) -> Result<Self, MemoryAccessError> {
                        buffer.[<get_ $type>](offset)
                    }

                    fn encode(
                        self,
                        buffer: &mut NativeBuffer,
                        offset: usize,
                    ) -> Result<(), MemoryAccessError> {
                        buffer.[<put_ $type>](offset, self).map(|_| ())
                    }
                }
            )*
        }
    };
}

impl_native_value!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);
