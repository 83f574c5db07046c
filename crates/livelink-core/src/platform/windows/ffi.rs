//! # kernel32 FFI Declarations
//!
//! The handful of Win32 functions the crate calls, declared by hand.
//! Safe wrappers live in the parent module.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_void};

pub type Handle = *mut c_void;
pub type Hmodule = *mut c_void;
pub type Bool = i32;

/// Enough access to query exit status, granted for most processes
pub const PROCESS_QUERY_LIMITED_INFORMATION: u32 = 0x1000;

/// Exit code reported for a process that has not exited
pub const STILL_ACTIVE: u32 = 259;

#[link(name = "kernel32")]
extern "system" {
    /// Handle of an already-loaded module, or of the executable for null.
    /// Does not load anything or take a reference.
    pub fn GetModuleHandleA(module_name: *const c_char) -> Hmodule;

    pub fn OpenProcess(desired_access: u32, inherit_handle: Bool, process_id: u32) -> Handle;

    pub fn GetExitCodeProcess(process: Handle, exit_code: *mut u32) -> Bool;

    pub fn CloseHandle(object: Handle) -> Bool;
}
