//! # Linker Coordination
//!
//! The rebuild loop stops at a freshly compiled object file. What happens to
//! it next belongs to collaborators:
//!
//! - [`Linker`]: patches the object's code into the running image
//! - [`HostCallbacks`]: tells the host program a reload is starting and how
//!   it ended
//! - [`HostMonitor`]: reports whether the host is still worth watching for

use std::ffi::{c_char, CString};
use std::path::Path;

use tracing::{debug, warn};

use crate::config::LiveLinkConfig;
use crate::types::{Address, ProcessId, SymbolTable};

/// Relinks a compiled object into the running program
pub trait Linker
{
    /// Link `object_file` into the running image. Returns `true` on success.
    fn link(&mut self, object_file: &Path) -> bool;
}

/// Notifications delivered to the host around each relink
pub trait HostCallbacks
{
    fn before_link(&mut self, symbols: &SymbolTable, source: &Path);

    fn after_link(&mut self, symbols: &SymbolTable, source: &Path, success: bool);
}

/// Host callbacks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl HostCallbacks for NoCallbacks
{
    fn before_link(&mut self, _symbols: &SymbolTable, _source: &Path) {}

    fn after_link(&mut self, _symbols: &SymbolTable, _source: &Path, _success: bool) {}
}

type SyncFn = extern "C" fn(*const c_char);
type ReleaseFn = extern "C" fn(*const c_char, bool);

/// Calls host functions found in the symbol table by name
///
/// Both functions are optional; a name missing from the table is skipped.
/// Lookup happens at call time, so a relink that moves the functions is
/// picked up by the next call.
#[derive(Debug, Clone)]
pub struct SymbolCallbacks
{
    sync_symbol: String,
    release_symbol: String,
}

impl SymbolCallbacks
{
    /// ## Safety
    ///
    /// Every address the symbol table holds for `sync_symbol` must be an
    /// `extern "C" fn(*const c_char)` in this process, and every address for
    /// `release_symbol` an `extern "C" fn(*const c_char, bool)`.
    #[must_use]
    pub unsafe fn new(sync_symbol: impl Into<String>, release_symbol: impl Into<String>) -> Self
    {
        Self {
            sync_symbol: sync_symbol.into(),
            release_symbol: release_symbol.into(),
        }
    }

    /// Callbacks named by `config.sync_symbol` and `config.release_symbol`.
    ///
    /// ## Safety
    ///
    /// Same contract as [`SymbolCallbacks::new`] for the configured names.
    #[must_use]
    pub unsafe fn from_config(config: &LiveLinkConfig) -> Self
    {
        // SAFETY: forwarded to the caller
        unsafe { Self::new(config.sync_symbol.as_str(), config.release_symbol.as_str()) }
    }

    fn lookup(symbols: &SymbolTable, name: &str) -> Option<Address>
    {
        let address = symbols.get(name).filter(|address| *address != Address::ZERO);
        if address.is_none() {
            debug!("Host callback {} not present", name);
        }
        address
    }
}

fn source_argument(source: &Path) -> Option<CString>
{
    match CString::new(source.to_string_lossy().into_owned()) {
        Ok(argument) => Some(argument),
        Err(_) => {
            warn!("Source path {} contains a NUL byte", source.display());
            None
        }
    }
}

impl HostCallbacks for SymbolCallbacks
{
    fn before_link(&mut self, symbols: &SymbolTable, source: &Path)
    {
        let Some(address) = Self::lookup(symbols, &self.sync_symbol) else {
            return;
        };
        let Some(argument) = source_argument(source) else {
            return;
        };
        // SAFETY: guaranteed by the contract of `SymbolCallbacks::new`
        let callback = unsafe { std::mem::transmute::<usize, SyncFn>(address.value() as usize) };
        callback(argument.as_ptr());
    }

    fn after_link(&mut self, symbols: &SymbolTable, source: &Path, success: bool)
    {
        let Some(address) = Self::lookup(symbols, &self.release_symbol) else {
            return;
        };
        let Some(argument) = source_argument(source) else {
            return;
        };
        // SAFETY: guaranteed by the contract of `SymbolCallbacks::new`
        let callback = unsafe { std::mem::transmute::<usize, ReleaseFn>(address.value() as usize) };
        callback(argument.as_ptr(), success);
    }
}

/// Liveness of the program being reloaded
pub trait HostMonitor
{
    fn is_alive(&self) -> bool;
}

/// The host is this process, so it is alive as long as we are
#[derive(Debug, Default, Clone, Copy)]
pub struct InProcessHost;

impl HostMonitor for InProcessHost
{
    fn is_alive(&self) -> bool
    {
        true
    }
}

/// A host running as another process
#[derive(Debug, Clone, Copy)]
pub struct ProcessHost
{
    pid: ProcessId,
}

impl ProcessHost
{
    #[must_use]
    pub fn new(pid: ProcessId) -> Self
    {
        Self { pid }
    }

    #[must_use]
    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }
}

impl HostMonitor for ProcessHost
{
    #[cfg(unix)]
    fn is_alive(&self) -> bool
    {
        let Ok(pid) = libc::pid_t::try_from(self.pid.0) else {
            return false;
        };
        // SAFETY: signal 0 performs the permission and existence checks only
        if unsafe { libc::kill(pid, 0) } == 0 {
            return true;
        }
        // Exists, but belongs to someone else
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(windows)]
    fn is_alive(&self) -> bool
    {
        crate::platform::windows::process_is_running(self.pid)
    }

    #[cfg(not(any(unix, windows)))]
    fn is_alive(&self) -> bool
    {
        true
    }
}

#[cfg(test)]
mod tests
{
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    static CALLS: Mutex<Vec<String>> = Mutex::new(Vec::new());

    extern "C" fn record_sync(source: *const c_char)
    {
        let source = unsafe { std::ffi::CStr::from_ptr(source) };
        CALLS.lock().unwrap().push(format!("sync {}", source.to_string_lossy()));
    }

    extern "C" fn record_release(source: *const c_char, success: bool)
    {
        let source = unsafe { std::ffi::CStr::from_ptr(source) };
        CALLS.lock().unwrap().push(format!("release {} {success}", source.to_string_lossy()));
    }

    #[test]
    fn test_symbol_callbacks_call_host_functions()
    {
        let mut symbols = SymbolTable::new();
        symbols.insert("__blink_sync", Address::new(record_sync as SyncFn as usize as u64));
        symbols.insert("__blink_release", Address::new(record_release as ReleaseFn as usize as u64));

        let mut callbacks = unsafe { SymbolCallbacks::new("__blink_sync", "__blink_release") };
        let source = PathBuf::from("/proj/src/x.cpp");
        callbacks.before_link(&symbols, &source);
        callbacks.after_link(&symbols, &source, false);

        assert_eq!(
            *CALLS.lock().unwrap(),
            vec!["sync /proj/src/x.cpp".to_string(), "release /proj/src/x.cpp false".to_string()]
        );
    }

    static CONFIGURED_SYNCS: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn count_sync(_source: *const c_char)
    {
        CONFIGURED_SYNCS.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_callbacks_from_config_use_configured_names()
    {
        let mut config = LiveLinkConfig::default();
        config.sync_symbol = "host_sync".to_string();
        config.release_symbol = "host_release".to_string();

        let mut symbols = SymbolTable::new();
        symbols.insert("host_sync", Address::new(count_sync as SyncFn as usize as u64));

        let mut callbacks = unsafe { SymbolCallbacks::from_config(&config) };
        callbacks.before_link(&symbols, Path::new("x.cpp"));
        callbacks.after_link(&symbols, Path::new("x.cpp"), true);
        assert_eq!(CONFIGURED_SYNCS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_callbacks_are_skipped()
    {
        let mut callbacks = unsafe { SymbolCallbacks::new("__absent_sync", "__absent_release") };
        let symbols = SymbolTable::new();
        callbacks.before_link(&symbols, Path::new("x.cpp"));
        callbacks.after_link(&symbols, Path::new("x.cpp"), true);
    }

    #[test]
    fn test_in_process_host_is_alive()
    {
        assert!(InProcessHost.is_alive());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_host_tracks_exit()
    {
        assert!(ProcessHost::new(ProcessId::current()).is_alive());

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = ProcessId::from(child.id());
        child.wait().unwrap();
        assert!(!ProcessHost::new(pid).is_alive());
    }
}
