//! # Platform-Specific Implementations
//!
//! Most of the crate reads files and byte slices and runs anywhere. Reaching
//! into the running process (mapped modules, other processes' liveness)
//! needs the OS:
//!
//! - **Windows**: `kernel32` (`GetModuleHandleA`, `OpenProcess`,
//!   `GetExitCodeProcess`)
//! - **Unix**: process liveness goes through `libc::kill` in
//!   [`crate::linker`]; there is no loaded-module resolver

#[cfg(windows)]
pub mod windows;
