//! # CodeView Records
//!
//! Generic decoder for the length-framed CodeView record format.
//!
//! CodeView record streams appear in two places livelink cares about: the
//! symbol streams inside a debug database, and the `.debug$S` section that
//! the compiler embeds in every object file. Both are a flat sequence of
//!
//! ```text
//! [u16 length][u16 tag][payload ...]
//! ```
//!
//! where `length` counts the tag and payload but not itself. The parser
//! advances by the declared length, never by what the record handler
//! happened to read, so handlers only decode the prefix they care about.
//!
//! ## References
//!
//! - [CodeView Symbol Records](https://llvm.org/docs/PDB/CodeViewSymbols.html)
//! - [The Module Information Stream](https://llvm.org/docs/PDB/ModiStream.html)

use tracing::trace;

use crate::error::{LiveLinkError, Result};
use crate::stream::StreamReader;

/// Public symbol (`S_PUB32`)
pub const S_PUB32: u16 = 0x110e;
/// Global data symbol (`S_GDATA32`)
pub const S_GDATA32: u16 = 0x110d;
/// Object file name (`S_OBJNAME`)
pub const S_OBJNAME: u16 = 0x1101;
/// Compiler environment key/value block (`S_ENVBLOCK`)
pub const S_ENVBLOCK: u16 = 0x113d;

/// C13 line/symbol format signature at the start of `.debug$S`
pub const CV_SIGNATURE_C13: u32 = 4;
/// `.debug$S` subsection carrying symbol records
pub const DEBUG_S_SYMBOLS: u32 = 0xf1;

/// Record alignment inside debug database symbol streams
pub const PDB_RECORD_ALIGNMENT: usize = 4;
/// Object files do not pad records within a subsection
pub const OBJECT_RECORD_ALIGNMENT: usize = 1;

/// Framing information handed to a record handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader
{
    /// Record kind
    pub tag: u16,
    /// Declared length (tag + payload)
    pub length: u16,
    /// Offset of the length field
    pub offset: usize,
    /// Offset one past the last payload byte
    pub end: usize,
}

impl RecordHeader
{
    /// Offset of the first payload byte
    #[must_use]
    pub fn payload_start(&self) -> usize
    {
        self.offset + 4
    }
}

/// Walk `length` bytes of CodeView records starting at the reader's position.
///
/// For each record the handler receives the header and the shared cursor,
/// positioned at the first payload byte. After the handler returns the cursor
/// is moved to the declared end of the record and aligned up to `alignment`
/// (clamped to the end of the region). Returns the number of records visited.
///
/// ## Errors
///
/// - `UnexpectedEof`: the region extends past the stream
/// - `InvalidRecord`: a record is shorter than its tag or runs past the region
/// - anything the handler returns
pub fn parse_code_view_records<'a, F>(
    reader: &mut StreamReader<'a>,
    length: usize,
    alignment: usize,
    mut handler: F,
) -> Result<usize>
where
    F: FnMut(RecordHeader, &mut StreamReader<'a>) -> Result<()>,
{
    let start = reader.tell();
    let end = start
        .checked_add(length)
        .filter(|end| *end <= reader.len())
        .ok_or(LiveLinkError::UnexpectedEof { offset: start, wanted: length })?;

    let mut visited = 0;
    while reader.tell() < end {
        let offset = reader.tell();
        if end - offset < 4 {
            return Err(LiveLinkError::InvalidRecord {
                offset,
                reason: format!("{} trailing bytes are too short for a record header", end - offset),
            });
        }

        let record_length = reader.read::<u16>()?;
        if record_length < 2 {
            return Err(LiveLinkError::InvalidRecord {
                offset,
                reason: format!("declared length {record_length} is shorter than the record tag"),
            });
        }

        // The length counts from just after the length field itself
        let next_offset = offset + 2 + usize::from(record_length);
        if next_offset > end {
            return Err(LiveLinkError::InvalidRecord {
                offset,
                reason: format!("record ends at {next_offset}, past the region end {end}"),
            });
        }

        let tag = reader.read::<u16>()?;
        trace!(offset, tag, length = record_length, "codeview record");
        handler(
            RecordHeader {
                tag,
                length: record_length,
                offset,
                end: next_offset,
            },
            reader,
        )?;

        reader.seek(next_offset)?;
        reader.align_within(alignment, end);
        visited += 1;
    }

    Ok(visited)
}

/// Compiler environment captured in an `S_ENVBLOCK` record.
///
/// MSVC writes `cwd`, `cl` (compiler executable), `cmd` (switches), `src`,
/// `pdb` and sometimes more; the order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBlock
{
    entries: Vec<(String, String)>,
}

impl EnvironmentBlock
{
    /// Decode a record payload: one flag byte, then NUL-terminated key/value
    /// pairs until an empty key or the end of the payload.
    pub fn parse(payload: &[u8]) -> Result<Self>
    {
        let mut reader = StreamReader::new(payload);
        let _flags = reader.read::<u8>()?;

        let mut entries = Vec::new();
        while !reader.is_at_end() && reader.peek_u8() != Some(0) {
            let key = reader.read_cstr()?;
            if reader.is_at_end() {
                break;
            }
            let value = reader.read_cstr()?;
            entries.push((key, value));
        }

        Ok(Self { entries })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str>
    {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Working directory the compiler ran in
    #[must_use]
    pub fn cwd(&self) -> Option<&str>
    {
        self.get("cwd")
    }

    /// Path of the compiler executable
    #[must_use]
    pub fn compiler(&self) -> Option<&str>
    {
        self.get("cl")
    }

    /// Switches the compiler was invoked with
    #[must_use]
    pub fn command(&self) -> Option<&str>
    {
        self.get("cmd")
    }

    #[must_use]
    pub fn source(&self) -> Option<&str>
    {
        self.get("src")
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)>
    {
        self.entries.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

/// Scan an object file's `.debug$S` section for the compiler environment.
///
/// Returns `Ok(None)` when the section parses but carries no `S_ENVBLOCK`.
pub fn find_environment_block(debug_section: &[u8]) -> Result<Option<EnvironmentBlock>>
{
    let mut reader = StreamReader::new(debug_section);
    let signature = reader.read::<u32>()?;
    if signature != CV_SIGNATURE_C13 {
        return Err(LiveLinkError::InvalidContainer(format!(
            "unsupported .debug$S signature {signature}"
        )));
    }

    let mut found = None;
    while found.is_none() && reader.remaining() >= 8 {
        let kind = reader.read::<u32>()?;
        let length = reader.read::<u32>()? as usize;

        if kind != DEBUG_S_SYMBOLS {
            reader.skip(length)?;
            reader.align(4);
            continue;
        }

        parse_code_view_records(&mut reader, length, OBJECT_RECORD_ALIGNMENT, |header, records| {
            if found.is_none() && header.tag == S_ENVBLOCK {
                let payload = records.slice(records.tell(), header.end)?;
                found = Some(EnvironmentBlock::parse(payload)?);
            }
            Ok(())
        })?;

        // Subsection headers are 4-byte aligned
        reader.align(4);
    }

    Ok(found)
}
