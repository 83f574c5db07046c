//! # Error Types
//!
//! General error handling for metadata discovery and the rebuild loop.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Main error type for livelink operations
///
/// ## Error Categories
///
/// 1. **Startup errors**: DebugDatabaseNotFound, NoSourceDirectories, Spawn, Watch
/// 2. **Container errors**: InvalidContainer, InvalidImage
/// 3. **Parser errors**: UnexpectedEof, InvalidRecord
/// 4. **Loop errors**: ChannelClosed
/// 5. **Configuration errors**: InvalidConfig
/// 6. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum LiveLinkError
{
    /// The image carries no CodeView (`RSDS`) debug directory entry
    ///
    /// Without a debug database there is no source tree to watch, so this is
    /// fatal for the running image. For imported modules it only means their
    /// symbols are limited to what the import table provides.
    #[error("Could not find path to matching program debug database in executable image")]
    DebugDatabaseNotFound,

    /// Discovery finished without a single directory to watch
    #[error("Could not determine source directories")]
    NoSourceDirectories,

    /// The file is not a supported MSF/PDB or COFF container
    ///
    /// Raised for a bad MSF magic, an unsupported PDB version, an unknown
    /// object file kind, or stream layouts that point outside the file.
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// A loaded image view has headers or directories that don't fit
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A read ran past the end of a stream
    #[error("Unexpected end of stream at offset {offset} (wanted {wanted} bytes)")]
    UnexpectedEof
    {
        /// Cursor position when the read was attempted
        offset: usize,
        /// Number of bytes the read needed
        wanted: usize,
    },

    /// A CodeView record declared a length that can't be honoured
    #[error("Invalid CodeView record at offset {offset}: {reason}")]
    InvalidRecord
    {
        /// Offset of the record's length field
        offset: usize,
        /// What was wrong with it
        reason: String,
    },

    /// The compiler shell could not be started
    #[error("Could not create compiler process: {0}")]
    Spawn(String),

    /// A directory watch could not be created or re-armed
    #[error("File system watcher failed: {0}")]
    Watch(String),

    /// The compiler shell closed its output before the completion line arrived
    #[error("Compiler channel closed")]
    ChannelClosed,

    /// A configuration value could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error (for file operations, pipes, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for LiveLinkError
{
    fn from(err: notify::Error) -> Self
    {
        LiveLinkError::Watch(err.to_string())
    }
}

/// Convenience type alias for `Result<T, LiveLinkError>`
///
/// ```rust
/// use livelink_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, LiveLinkError>;
