//! # Types
//!
//! Plain data types shared across the readers and the orchestrator.

pub mod address;
pub mod guid;
pub mod process;
pub mod symbols;

// Re-export all public types
pub use address::Address;
pub use guid::Guid;
pub use process::ProcessId;
pub use symbols::SymbolTable;
