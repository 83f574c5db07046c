//! # livelink-core
//!
//! Debug-metadata discovery and background rebuilds for live relinking of
//! natively compiled programs.
//!
//! A running program carries enough information to rebuild itself: its debug
//! database lists every object file and source file that went into it, and
//! each object file records the compiler invocation that produced it. This
//! crate reads that information, watches the source directories, recompiles
//! changed translation units in a persistent compiler shell and hands the
//! result to a [`Linker`].
//!
//! ## Layout
//!
//! - **Readers**: [`msf`], [`pdb`], [`codeview`], [`coff`], [`image`]
//! - **Discovery**: [`discovery`], [`paths`], [`cmdline`]
//! - **Loop**: [`watch`], [`ledger`], [`compiler`], [`orchestrator`]
//! - **Collaborators**: [`linker`]
//!
//! ## Why unsafe code is needed
//!
//! Reading the image of the running process means viewing loader-mapped
//! memory, and host callbacks are plain function pointers found by symbol
//! name. Both are behind `unsafe` constructors; everything else works on
//! owned bytes.

#![allow(unsafe_code)] // Loaded image views, host callbacks, Win32 FFI

pub mod cmdline;
pub mod codeview;
pub mod coff;
pub mod compiler;
pub mod config;
pub mod discovery;
pub mod error;
pub mod image;
pub mod ledger;
pub mod linker;
pub mod msf;
pub mod orchestrator;
pub mod paths;
pub mod pdb;
pub mod platform;
pub mod prelude;
pub mod shell;
pub mod stream;
pub mod types;
pub mod watch;

pub use config::LiveLinkConfig;
pub use discovery::BuildMetadata;
// Re-export commonly used types
pub use error::{LiveLinkError, Result};
pub use linker::{HostCallbacks, HostMonitor, Linker};
pub use orchestrator::Orchestrator;
pub use types::{Address, SymbolTable};
