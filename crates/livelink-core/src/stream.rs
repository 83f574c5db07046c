//! Bounds-checked little-endian reading over byte slices.
//!
//! Everything livelink parses (MSF streams, CodeView records, PE headers in
//! memory) is untrusted input from a binary artifact. All reads go through
//! here so an offset that points outside its buffer becomes an error instead
//! of a panic.

use crate::error::{LiveLinkError, Result};

/// Fixed-size little-endian value that can be decoded from a byte slice.
pub trait LeRead: Sized
{
    /// Encoded size in bytes
    const SIZE: usize;

    /// Decode from the first `SIZE` bytes of `bytes`.
    ///
    /// Callers guarantee `bytes.len() >= SIZE`.
    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_le_read {
    ($($ty:ty),* $(,)?) => {
        $(
            impl LeRead for $ty
            {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self
                {
                    let mut buf = [0u8; std::mem::size_of::<$ty>()];
                    buf.copy_from_slice(&bytes[..Self::SIZE]);
                    <$ty>::from_le_bytes(buf)
                }
            }
        )*
    };
}

impl_le_read!(u8, u16, u32, u64, i16, i32, i64);

/// Read a value at an absolute offset.
pub fn read_at<T: LeRead>(data: &[u8], offset: usize) -> Result<T>
{
    let end = offset
        .checked_add(T::SIZE)
        .filter(|end| *end <= data.len())
        .ok_or(LiveLinkError::UnexpectedEof { offset, wanted: T::SIZE })?;
    Ok(T::from_le_slice(&data[offset..end]))
}

/// Bytes of the NUL-terminated string at `offset`, without the terminator.
pub fn cstr_bytes_at(data: &[u8], offset: usize) -> Result<&[u8]>
{
    let tail = data.get(offset..).ok_or(LiveLinkError::UnexpectedEof { offset, wanted: 1 })?;
    let len = tail
        .iter()
        .position(|byte| *byte == 0)
        .ok_or(LiveLinkError::UnexpectedEof { offset, wanted: tail.len() + 1 })?;
    Ok(&tail[..len])
}

/// Read a NUL-terminated string at an absolute offset.
///
/// Debug databases store names in the build machine's code page, so invalid
/// UTF-8 is replaced rather than rejected.
pub fn cstr_at(data: &[u8], offset: usize) -> Result<String>
{
    Ok(String::from_utf8_lossy(cstr_bytes_at(data, offset)?).into_owned())
}

/// Sequential cursor over a contiguous byte stream.
#[derive(Debug, Clone)]
pub struct StreamReader<'a>
{
    data: &'a [u8],
    offset: usize,
}

impl<'a> StreamReader<'a>
{
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self
    {
        Self { data, offset: 0 }
    }

    /// Total stream size in bytes
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.data.is_empty()
    }

    /// Offset from stream start to the current input position
    #[must_use]
    pub fn tell(&self) -> usize
    {
        self.offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize
    {
        self.data.len().saturating_sub(self.offset)
    }

    #[must_use]
    pub fn is_at_end(&self) -> bool
    {
        self.offset >= self.data.len()
    }

    /// The whole underlying stream, independent of the cursor.
    #[must_use]
    pub fn data(&self) -> &'a [u8]
    {
        self.data
    }

    /// Set the input position. Seeking to exactly the end is allowed.
    pub fn seek(&mut self, offset: usize) -> Result<()>
    {
        if offset > self.data.len() {
            return Err(LiveLinkError::UnexpectedEof {
                offset: self.offset,
                wanted: offset - self.offset.min(offset),
            });
        }
        self.offset = offset;
        Ok(())
    }

    /// Advance the input position without reading.
    pub fn skip(&mut self, count: usize) -> Result<()>
    {
        let target = self
            .offset
            .checked_add(count)
            .ok_or(LiveLinkError::UnexpectedEof { offset: self.offset, wanted: count })?;
        self.seek(target)
    }

    /// Align the input position up to a multiple of `alignment`, never past the end.
    pub fn align(&mut self, alignment: usize)
    {
        self.align_within(alignment, self.data.len());
    }

    /// Align the input position up to a multiple of `alignment`, never past `limit`.
    pub fn align_within(&mut self, alignment: usize, limit: usize)
    {
        if alignment <= 1 {
            return;
        }
        let rem = self.offset % alignment;
        if rem != 0 {
            let aligned = self.offset.saturating_add(alignment - rem);
            self.offset = aligned.min(limit.min(self.data.len())).max(self.offset);
        }
    }

    /// Extract a typed value and advance past it.
    pub fn read<T: LeRead>(&mut self) -> Result<T>
    {
        let value = read_at::<T>(self.data, self.offset)?;
        self.offset += T::SIZE;
        Ok(value)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]>
    {
        let bytes = self.slice(self.offset, self.offset.saturating_add(count))?;
        self.offset += count;
        Ok(bytes)
    }

    /// Read a NUL-terminated string and advance past its terminator.
    pub fn read_cstr(&mut self) -> Result<String>
    {
        // Advance by the raw length; lossy decoding can change it
        let raw = cstr_bytes_at(self.data, self.offset)?;
        self.offset += raw.len() + 1;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Peek at the next byte without consuming it.
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8>
    {
        self.data.get(self.offset).copied()
    }

    /// Borrow `start..end` of the underlying stream.
    pub fn slice(&self, start: usize, end: usize) -> Result<&'a [u8]>
    {
        if start > end || end > self.data.len() {
            return Err(LiveLinkError::UnexpectedEof {
                offset: start,
                wanted: end.saturating_sub(start),
            });
        }
        Ok(&self.data[start..end])
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_reads_little_endian_values()
    {
        let data = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0xff];
        let mut reader = StreamReader::new(&data);
        assert_eq!(reader.read::<u16>().unwrap(), 0x1234);
        assert_eq!(reader.read::<u32>().unwrap(), 0x1234_5678);
        assert_eq!(reader.tell(), 6);
        assert!(reader.read::<u16>().is_err());
        // A failed read must not move the cursor
        assert_eq!(reader.tell(), 6);
        assert_eq!(reader.read::<u8>().unwrap(), 0xff);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_read_cstr_advances_past_terminator()
    {
        let data = b"cwd\0C:\\proj\0";
        let mut reader = StreamReader::new(data);
        assert_eq!(reader.read_cstr().unwrap(), "cwd");
        assert_eq!(reader.read_cstr().unwrap(), "C:\\proj");
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_read_cstr_with_invalid_utf8_keeps_its_place()
    {
        let data = b"C:\\caf\xE9\0cl\0";
        let mut reader = StreamReader::new(data);
        assert_eq!(reader.read_cstr().unwrap(), "C:\\caf\u{FFFD}");
        assert_eq!(reader.tell(), 8);
        assert_eq!(reader.read_cstr().unwrap(), "cl");
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_unterminated_cstr_is_an_error()
    {
        let mut reader = StreamReader::new(b"abc");
        assert!(matches!(reader.read_cstr(), Err(LiveLinkError::UnexpectedEof { .. })));
    }

    #[test]
    fn test_align_is_clamped_to_the_end()
    {
        let data = [0u8; 6];
        let mut reader = StreamReader::new(&data);
        reader.skip(5).unwrap();
        reader.align(4);
        assert_eq!(reader.tell(), 6);

        let mut reader = StreamReader::new(&data);
        reader.skip(1).unwrap();
        reader.align(4);
        assert_eq!(reader.tell(), 4);
    }

    #[test]
    fn test_seek_past_end_fails()
    {
        let data = [0u8; 4];
        let mut reader = StreamReader::new(&data);
        assert!(reader.seek(4).is_ok());
        assert!(reader.seek(5).is_err());
        assert!(reader.skip(usize::MAX).is_err());
    }

    #[test]
    fn test_read_at_rejects_overflowing_offsets()
    {
        let data = [1u8, 0, 0, 0];
        assert_eq!(read_at::<u32>(&data, 0).unwrap(), 1);
        assert!(read_at::<u32>(&data, 1).is_err());
        assert!(read_at::<u32>(&data, usize::MAX).is_err());
    }
}
