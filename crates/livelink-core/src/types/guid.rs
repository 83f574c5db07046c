//! GUID shared by an image's CodeView entry and its debug database.

use std::fmt;

/// 16-byte GUID in its on-disk (mixed-endian) layout
///
/// The linker writes the same value into the image's `RSDS` debug entry and
/// into the debug database's info stream, which is how a stale database is
/// detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid([u8; 16]);

impl Guid
{
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self
    {
        Guid(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16]
    {
        &self.0
    }
}

impl fmt::Display for Guid
{
    /// Registry format: `{XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let b = &self.0;
        let data1 = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        let data2 = u16::from_le_bytes([b[4], b[5]]);
        let data3 = u16::from_le_bytes([b[6], b[7]]);
        write!(f, "{{{data1:08X}-{data2:04X}-{data3:04X}-{:02X}{:02X}-", b[8], b[9])?;
        for byte in &b[10..] {
            write!(f, "{byte:02X}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_display_uses_registry_format()
    {
        let guid = Guid::from_bytes([
            0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x78, 0x56, 0x9a, 0xbc, 0xde, 0xf0, 0x11, 0x22, 0x33, 0x44,
        ]);
        assert_eq!(guid.to_string(), "{12345678-1234-5678-9ABC-DEF011223344}");
    }
}
