//! Memory address type.

use std::fmt;
use std::ops::Add;

/// Strongly typed address inside a loaded module
///
/// Symbol addresses come from three places (debug database offsets, import
/// address table slots, export tables) and all of them end up as absolute
/// pointers into the running process. Wrapping them keeps them apart from the
/// RVAs and file offsets that the parsers juggle alongside.
///
/// ## Example
///
/// ```rust
/// use livelink_core::types::Address;
///
/// let base = Address::from(0x1_4000_0000);
/// let symbol = base + 0x1000; // RVA of the symbol
/// assert_eq!(symbol.value(), 0x1_4000_1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ```rust
    /// use livelink_core::types::Address;
    ///
    /// const IMAGE_BASE: Address = Address::new(0x1_4000_0000);
    /// assert_eq!(IMAGE_BASE.value(), 0x1_4000_0000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Add an RVA or offset, checking for overflow
    ///
    /// ```rust
    /// use livelink_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// The address as a raw pointer, for handing to native entry points
    pub fn as_ptr(self) -> *const u8
    {
        self.0 as usize as *const u8
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}
