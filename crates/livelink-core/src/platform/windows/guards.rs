//! # RAII Guards for Win32 Handles

use super::ffi::{self, Handle};

/// Owns a kernel handle and closes it on drop.
pub struct HandleGuard
{
    handle: Handle,
}

impl HandleGuard
{
    /// Take ownership of `handle`. Returns `None` for a null handle.
    #[must_use]
    pub fn new(handle: Handle) -> Option<Self>
    {
        (!handle.is_null()).then_some(Self { handle })
    }

    #[must_use]
    pub fn raw(&self) -> Handle
    {
        self.handle
    }
}

impl Drop for HandleGuard
{
    fn drop(&mut self)
    {
        // SAFETY: the handle is owned and non-null
        unsafe {
            ffi::CloseHandle(self.handle);
        }
    }
}
