//! # Windows Support
//!
//! Access to the running process through `kernel32`: views over modules the
//! loader has already mapped, and liveness checks for a host process.

pub mod ffi;
pub mod guards;

use std::ffi::CString;

use tracing::debug;

use crate::error::{LiveLinkError, Result};
use crate::image::{ImageView, ModuleResolver};
use crate::types::ProcessId;
use guards::HandleGuard;

/// View over the executable image of this process.
///
/// ## Errors
///
/// - `InvalidImage`: the module headers could not be read
pub fn current_image() -> Result<ImageView<'static>>
{
    // SAFETY: a null name returns the executable's handle, which is never null
    let module = unsafe { ffi::GetModuleHandleA(std::ptr::null()) };
    if module.is_null() {
        return Err(LiveLinkError::InvalidImage("executable module handle unavailable".to_string()));
    }
    // SAFETY: module handles are the base address of the mapped image, and
    // the executable stays mapped for the life of the process
    unsafe { ImageView::from_loaded(module.cast::<u8>().cast_const()) }
}

/// Resolves import names to modules already loaded in this process
///
/// Modules stay mapped only as long as nothing unloads them; the views are
/// meant for the startup scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadedModules;

impl ModuleResolver<'static> for LoadedModules
{
    fn resolve(&self, name: &str) -> Option<ImageView<'static>>
    {
        let name = CString::new(name).ok()?;
        // SAFETY: `name` is a valid NUL-terminated string
        let module = unsafe { ffi::GetModuleHandleA(name.as_ptr()) };
        if module.is_null() {
            return None;
        }
        // SAFETY: non-null module handles point at mapped images
        match unsafe { ImageView::from_loaded(module.cast::<u8>().cast_const()) } {
            Ok(view) => Some(view),
            Err(err) => {
                debug!("Could not read loaded module {}: {}", name.to_string_lossy(), err);
                None
            }
        }
    }
}

/// `true` while process `pid` has not exited.
///
/// A process that cannot be opened is treated as gone.
#[must_use]
pub fn process_is_running(pid: ProcessId) -> bool
{
    // SAFETY: plain Win32 call; the result is checked before use
    let handle = unsafe { ffi::OpenProcess(ffi::PROCESS_QUERY_LIMITED_INFORMATION, 0, pid.0) };
    let Some(process) = HandleGuard::new(handle) else {
        return false;
    };

    let mut exit_code = 0u32;
    // SAFETY: the handle is open and `exit_code` is a valid out pointer
    let ok = unsafe { ffi::GetExitCodeProcess(process.raw(), &mut exit_code) };
    ok != 0 && exit_code == ffi::STILL_ACTIVE
}
