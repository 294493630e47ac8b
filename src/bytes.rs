/// Bounds-checked little-endian integer extraction from advertisement payloads
use thiserror::Error;

/// Returned when a read would run past the end of the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("insufficient data: need {width} bytes at offset {offset}, buffer has {len}")]
pub struct InsufficientData {
    pub offset: usize,
    pub width: usize,
    pub len: usize,
}

/// Fixed-width integers that can be built from little-endian bytes
pub trait LeInteger: Sized + Copy {
    /// Width of the integer in bytes
    const WIDTH: usize;

    /// Build the value from exactly `WIDTH` bytes
    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_le_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LeInteger for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_le_integer!(u8, i8, u16, i16, u32, i32, u64, i64);

/// Read-only view over a byte buffer with checked, offset-based reads
///
/// Every read either returns the value or [`InsufficientData`]; nothing
/// indexes the buffer directly, so short or garbled payloads can never
/// cause a panic.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    buffer: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Read a `T` starting at `offset`
    ///
    /// Succeeds iff `offset + T::WIDTH <= len`.
    pub fn read<T: LeInteger>(&self, offset: usize) -> Result<T, InsufficientData> {
        read(self.buffer, offset)
    }
}

/// Read a little-endian `T` from `buffer` at `offset`
pub fn read<T: LeInteger>(buffer: &[u8], offset: usize) -> Result<T, InsufficientData> {
    let insufficient = InsufficientData {
        offset,
        width: T::WIDTH,
        len: buffer.len(),
    };

    let end = offset.checked_add(T::WIDTH).ok_or(insufficient)?;
    buffer
        .get(offset..end)
        .map(T::from_le_slice)
        .ok_or(insufficient)
}
