//! Common module for library exports

pub use crate::cmdline::{build_compile_job, CompileJob};
pub use crate::compiler::{CompileRequest, CompilerChannel, CompilerOutput, ShellCompiler};
pub use crate::config::LiveLinkConfig;
pub use crate::discovery::{discover_from_image, discover_from_pdb, BuildMetadata};
pub use crate::error::{LiveLinkError, Result};
pub use crate::linker::{HostCallbacks, HostMonitor, InProcessHost, Linker, NoCallbacks, ProcessHost, SymbolCallbacks};
pub use crate::orchestrator::{ChangeOutcome, LoopState, Orchestrator, RunSummary, StopReason};
#[cfg(windows)]
pub use crate::platform::windows::{current_image, LoadedModules};
pub use crate::shell::ShellFlavor;
pub use crate::types::{Address, Guid, ProcessId, SymbolTable};
pub use crate::watch::{ChangeBatch, ChangeSource, DirectoryWatcher};
