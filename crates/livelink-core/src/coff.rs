//! # Object Files
//!
//! Just enough COFF reading to pull the `.debug$S` section out of the object
//! file a module was built from. Header parsing and section lookup go through
//! the `object` crate; both plain COFF and `/bigobj` objects are accepted.

use std::fs;
use std::path::{Path, PathBuf};

use object::{FileKind, Object, ObjectSection};
use tracing::debug;

use crate::error::{LiveLinkError, Result};

/// Name of the CodeView symbol section
pub const DEBUG_SYMBOLS_SECTION: &str = ".debug$S";

/// Object file contents with a validated COFF header
pub struct ObjectFile
{
    path: PathBuf,
    data: Vec<u8>,
    kind: FileKind,
}

impl ObjectFile
{
    /// Read `path` and check that it is a COFF object.
    ///
    /// ## Errors
    ///
    /// - `Io`: the file could not be read
    /// - `InvalidContainer`: the file is not a COFF or `/bigobj` object
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::parse(path, data)
    }

    /// Validate object file bytes that are already in memory.
    pub fn parse(path: impl AsRef<Path>, data: Vec<u8>) -> Result<Self>
    {
        let path = path.as_ref().to_path_buf();
        let kind = FileKind::parse(&*data)
            .map_err(|err| LiveLinkError::InvalidContainer(format!("{}: {err}", path.display())))?;

        match kind {
            FileKind::Coff | FileKind::CoffBig => {}
            other => {
                return Err(LiveLinkError::InvalidContainer(format!(
                    "{} is not a COFF object ({other:?})",
                    path.display()
                )))
            }
        }

        debug!("Opened {:?} object {}", kind, path.display());
        Ok(Self { path, data, kind })
    }

    #[must_use]
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// `true` for objects built with `/bigobj`
    #[must_use]
    pub fn is_extended(&self) -> bool
    {
        self.kind == FileKind::CoffBig
    }

    /// Raw bytes of the first `.debug$S` section, if the object has one.
    pub fn debug_section(&self) -> Result<Option<&[u8]>>
    {
        let file = object::File::parse(&*self.data)
            .map_err(|err| LiveLinkError::InvalidContainer(format!("{}: {err}", self.path.display())))?;

        let Some(section) = file.section_by_name(DEBUG_SYMBOLS_SECTION) else {
            return Ok(None);
        };
        let data = section
            .data()
            .map_err(|err| LiveLinkError::InvalidContainer(format!("{}: {err}", self.path.display())))?;
        Ok(Some(data))
    }
}
