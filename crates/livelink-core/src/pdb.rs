//! # Debug Database Reader
//!
//! PDB semantics on top of the MSF container: the info stream (version, GUID,
//! named streams), and the DBI stream (modules, source files, section
//! headers, global symbols).
//!
//! ## Stream Layout
//!
//! | Index | Contents |
//! |---|---|
//! | 1 | PDB info: version, signature, age, GUID, named stream map |
//! | 3 | DBI: header, then module info, section contributions, section map, file info, type server map, EC, optional debug headers |
//! | from DBI | symbol records, section headers, per-module symbols |
//!
//! ## References
//!
//! - [The PDB Info Stream](https://llvm.org/docs/PDB/PdbStream.html)
//! - [The DBI Stream](https://llvm.org/docs/PDB/DbiStream.html)

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::codeview::{
    parse_code_view_records, EnvironmentBlock, PDB_RECORD_ALIGNMENT, S_ENVBLOCK, S_GDATA32, S_PUB32,
};
use crate::error::{LiveLinkError, Result};
use crate::msf::MsfReader;
use crate::paths::{SourceFileIndex, SourceLocation};
use crate::stream::{cstr_at, read_at, StreamReader};
use crate::types::{Address, Guid, SymbolTable};

/// Stream index of the PDB info stream
pub const PDB_INFO_STREAM: usize = 1;
/// Stream index of the DBI stream
pub const DBI_STREAM: usize = 3;

/// Info stream versions this reader understands (VC70 and later)
pub const SUPPORTED_VERSIONS: [u32; 4] = [20_000_404, 20_030_901, 20_091_201, 20_140_508];

/// Name of the module the linker adds for its own records
pub const LINKER_MODULE_NAME: &str = "* Linker *";

const LINK_INFO_STREAM_NAME: &str = "/LinkInfo";
const DBI_HEADER_SIZE: usize = 64;
const MODULE_INFO_FIXED_SIZE: usize = 64;
const SECTION_HEADER_SIZE: usize = 40;
const NIL_STREAM: u16 = 0xffff;
// Position of the section header stream in the optional debug header array
const DBG_HEADER_SECTION_HEADERS: usize = 5;

/// One module (translation unit or import library member) from the DBI stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Object file path as the linker saw it
    pub module_name: String,
    /// Containing library, or the object path again for plain objects
    pub object_file_name: String,
    /// Stream holding this module's symbols, if any
    pub symbol_stream: Option<u16>,
    /// Bytes of CodeView symbols in that stream (including the signature)
    pub symbol_byte_size: u32,
    pub c11_byte_size: u32,
    pub c13_byte_size: u32,
    pub source_file_count: u16,
}

/// Working directory and command line the linker recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo
{
    pub cwd: PathBuf,
    pub command: String,
}

#[derive(Debug, Clone, Copy)]
struct DbiHeader
{
    sym_record_stream: u16,
    mod_info_size: usize,
    section_contribution_size: usize,
    section_map_size: usize,
    source_info_size: usize,
    type_server_map_size: usize,
    ec_substream_size: usize,
    optional_dbg_header_size: usize,
    machine: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Substream
{
    ModuleInfo,
    SourceInfo,
    OptionalDbgHeader,
}

impl DbiHeader
{
    fn parse(data: &[u8]) -> Result<Self>
    {
        if data.len() < DBI_HEADER_SIZE {
            return Err(LiveLinkError::InvalidContainer(format!(
                "DBI stream is {} bytes, shorter than its header",
                data.len()
            )));
        }

        let size = |offset: usize| -> Result<usize> {
            let value = read_at::<i32>(data, offset)?;
            usize::try_from(value)
                .map_err(|_| LiveLinkError::InvalidContainer(format!("negative DBI substream size {value}")))
        };

        Ok(Self {
            sym_record_stream: read_at::<u16>(data, 20)?,
            mod_info_size: size(24)?,
            section_contribution_size: size(28)?,
            section_map_size: size(32)?,
            source_info_size: size(36)?,
            type_server_map_size: size(40)?,
            optional_dbg_header_size: size(48)?,
            ec_substream_size: size(52)?,
            machine: read_at::<u16>(data, 58)?,
        })
    }

    fn range(&self, substream: Substream) -> (usize, usize)
    {
        let module_info = DBI_HEADER_SIZE;
        let source_info =
            module_info + self.mod_info_size + self.section_contribution_size + self.section_map_size;
        let dbg_header = source_info + self.source_info_size + self.type_server_map_size + self.ec_substream_size;

        match substream {
            Substream::ModuleInfo => (module_info, module_info + self.mod_info_size),
            Substream::SourceInfo => (source_info, source_info + self.source_info_size),
            Substream::OptionalDbgHeader => (dbg_header, dbg_header + self.optional_dbg_header_size),
        }
    }
}

/// Reader for a program debug database
pub struct PdbReader
{
    msf: MsfReader,
    version: u32,
    signature: u32,
    age: u32,
    guid: Guid,
    named_streams: HashMap<String, u32>,
    dbi: Option<(DbiHeader, Vec<u8>)>,
}

impl PdbReader
{
    /// Open a debug database from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        Self::from_msf(MsfReader::open(path)?)
    }

    /// Interpret an already parsed container.
    ///
    /// ## Errors
    ///
    /// - `InvalidContainer`: missing info stream or a version older than VC70
    pub fn from_msf(msf: MsfReader) -> Result<Self>
    {
        let info = msf.stream(PDB_INFO_STREAM)?;
        let mut reader = StreamReader::new(&info);
        let version = reader.read::<u32>()?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(LiveLinkError::InvalidContainer(format!("unsupported PDB version {version}")));
        }
        let signature = reader.read::<u32>()?;
        let age = reader.read::<u32>()?;
        let mut guid = [0u8; 16];
        guid.copy_from_slice(reader.read_bytes(16)?);

        let named_streams = parse_named_stream_map(&mut reader)?;

        let dbi_data = msf.stream(DBI_STREAM)?;
        let dbi = if dbi_data.is_empty() {
            None
        } else {
            Some((DbiHeader::parse(&dbi_data)?, dbi_data))
        };

        debug!("PDB version {}, age {}, {} named streams", version, age, named_streams.len());

        Ok(Self {
            msf,
            version,
            signature,
            age,
            guid: Guid::from_bytes(guid),
            named_streams,
            dbi,
        })
    }

    #[must_use]
    pub fn version(&self) -> u32
    {
        self.version
    }

    /// Link timestamp
    #[must_use]
    pub fn signature(&self) -> u32
    {
        self.signature
    }

    /// Number of times the database has been written by incremental links
    #[must_use]
    pub fn age(&self) -> u32
    {
        self.age
    }

    /// GUID matching the image's `RSDS` entry
    #[must_use]
    pub fn guid(&self) -> Guid
    {
        self.guid
    }

    /// Target machine from the DBI header (`IMAGE_FILE_MACHINE_*`), 0 if absent
    #[must_use]
    pub fn machine(&self) -> u16
    {
        self.dbi.as_ref().map_or(0, |(header, _)| header.machine)
    }

    /// Names of all streams in the named stream map
    pub fn stream_names(&self) -> impl Iterator<Item = &str>
    {
        self.named_streams.keys().map(String::as_str)
    }

    /// Contents of a named stream; empty when the name is unknown.
    pub fn named_stream(&self, name: &str) -> Result<Vec<u8>>
    {
        match self.named_streams.get(name) {
            Some(&index) => self.msf.stream(index as usize),
            None => Ok(Vec::new()),
        }
    }

    fn dbi_substream(&self, substream: Substream) -> Result<&[u8]>
    {
        let Some((header, data)) = &self.dbi else {
            return Ok(&[]);
        };
        let (start, end) = header.range(substream);
        data.get(start..end).ok_or_else(|| {
            LiveLinkError::InvalidContainer(format!(
                "DBI substream {substream:?} ({start}..{end}) exceeds the {}-byte stream",
                data.len()
            ))
        })
    }

    /// Parse the module info substream, in module index order.
    pub fn modules(&self) -> Result<Vec<ModuleInfo>>
    {
        let data = self.dbi_substream(Substream::ModuleInfo)?;
        let mut reader = StreamReader::new(data);
        let mut modules = Vec::new();

        while reader.remaining() >= MODULE_INFO_FIXED_SIZE {
            let fixed = reader.read_bytes(MODULE_INFO_FIXED_SIZE)?;
            let symbol_stream = read_at::<u16>(fixed, 34)?;
            let symbol_byte_size = read_at::<u32>(fixed, 36)?;
            let c11_byte_size = read_at::<u32>(fixed, 40)?;
            let c13_byte_size = read_at::<u32>(fixed, 44)?;
            let source_file_count = read_at::<u16>(fixed, 48)?;
            let module_name = reader.read_cstr()?;
            let object_file_name = reader.read_cstr()?;

            modules.push(ModuleInfo {
                module_name,
                object_file_name,
                symbol_stream: (symbol_stream != NIL_STREAM).then_some(symbol_stream),
                symbol_byte_size,
                c11_byte_size,
                c13_byte_size,
                source_file_count,
            });
            reader.align(4);
        }

        Ok(modules)
    }

    /// Object file paths used to build the image, indexed by module.
    pub fn read_object_files(&self) -> Result<Vec<PathBuf>>
    {
        Ok(self
            .modules()?
            .into_iter()
            .map(|module| PathBuf::from(module.module_name))
            .collect())
    }

    /// Source files per module, plus an index from path back to module.
    ///
    /// The outer list has one entry per module, in module index order.
    pub fn read_source_files(&self) -> Result<(Vec<Vec<PathBuf>>, SourceFileIndex)>
    {
        let data = self.dbi_substream(Substream::SourceInfo)?;
        let mut index = SourceFileIndex::new();
        if data.is_empty() {
            return Ok((Vec::new(), index));
        }

        let mut reader = StreamReader::new(data);
        let num_modules = usize::from(reader.read::<u16>()?);
        // The file count here truncates for large programs; per-module counts are authoritative
        let _num_source_files = reader.read::<u16>()?;
        reader.skip(num_modules * 2)?; // module index array, unused since VC70

        let mut counts = Vec::with_capacity(num_modules);
        for _ in 0..num_modules {
            counts.push(usize::from(reader.read::<u16>()?));
        }

        let total: usize = counts.iter().sum();
        let mut offsets = Vec::with_capacity(total);
        for _ in 0..total {
            offsets.push(reader.read::<u32>()? as usize);
        }
        let names = reader.slice(reader.tell(), data.len())?;

        let mut files = Vec::with_capacity(num_modules);
        let mut offsets = offsets.into_iter();
        for (module, count) in counts.into_iter().enumerate() {
            let mut module_files = Vec::with_capacity(count);
            for file in 0..count {
                let offset = offsets.next().unwrap_or_default();
                let path = PathBuf::from(cstr_at(names, offset)?);
                index.insert(&path, SourceLocation { module, file });
                module_files.push(path);
            }
            files.push(module_files);
        }

        Ok((files, index))
    }

    /// Merge public and global data symbols into `symbols`.
    ///
    /// Addresses are computed as `image_base + section RVA + offset` using
    /// the section headers the linker copied into the database. Returns the
    /// number of symbols added.
    pub fn read_symbol_table(&self, image_base: Address, symbols: &mut SymbolTable) -> Result<usize>
    {
        let Some((header, _)) = &self.dbi else {
            return Ok(0);
        };

        let section_rvas = self.section_rvas()?;
        let records = self.msf.stream(usize::from(header.sym_record_stream))?;
        let mut reader = StreamReader::new(&records);
        let mut added = 0;

        parse_code_view_records(&mut reader, records.len(), PDB_RECORD_ALIGNMENT, |record, r| {
            if record.tag != S_PUB32 && record.tag != S_GDATA32 {
                return Ok(());
            }
            // S_PUB32 leads with flags, S_GDATA32 with a type index; both are 4 bytes
            let _flags_or_type = r.read::<u32>()?;
            let offset = r.read::<u32>()?;
            let segment = usize::from(r.read::<u16>()?);
            let name = r.read_cstr()?;

            let Some(rva) = segment.checked_sub(1).and_then(|index| section_rvas.get(index)) else {
                return Ok(());
            };
            symbols.insert(name, image_base + u64::from(*rva) + u64::from(offset));
            added += 1;
            Ok(())
        })?;

        debug!("Read {} symbols from {} bytes of symbol records", added, records.len());
        Ok(added)
    }

    fn section_rvas(&self) -> Result<Vec<u32>>
    {
        let headers = self.dbi_substream(Substream::OptionalDbgHeader)?;
        let stream = match read_at::<u16>(headers, DBG_HEADER_SECTION_HEADERS * 2) {
            Ok(index) if index != NIL_STREAM => index,
            _ => return Ok(Vec::new()),
        };

        let data = self.msf.stream(usize::from(stream))?;
        data.chunks_exact(SECTION_HEADER_SIZE)
            .map(|section| read_at::<u32>(section, 12))
            .collect()
    }

    /// Working directory and command line of the link.
    ///
    /// Prefers the `/LinkInfo` named stream and falls back to the environment
    /// block in the linker module's symbols.
    pub fn read_link_info(&self) -> Result<Option<LinkInfo>>
    {
        let stream = self.named_stream(LINK_INFO_STREAM_NAME)?;
        if !stream.is_empty() {
            let cwd_offset = read_at::<u32>(&stream, 8)? as usize;
            let command_offset = read_at::<u32>(&stream, 12)? as usize;
            let cwd = cstr_at(&stream, cwd_offset)?;
            let command = cstr_at(&stream, command_offset)?;
            info!("Found linker working directory {}", cwd);
            return Ok(Some(LinkInfo {
                cwd: PathBuf::from(cwd),
                command,
            }));
        }

        let Some(linker) = self.modules()?.into_iter().find(|m| m.module_name == LINKER_MODULE_NAME) else {
            return Ok(None);
        };
        let Some(symbol_stream) = linker.symbol_stream else {
            return Ok(None);
        };

        let data = self.msf.stream(usize::from(symbol_stream))?;
        let mut reader = StreamReader::new(&data);
        let _signature = reader.read::<u32>()?;
        let length = (linker.symbol_byte_size as usize)
            .saturating_sub(4)
            .min(reader.remaining());

        let mut block = None;
        parse_code_view_records(&mut reader, length, PDB_RECORD_ALIGNMENT, |record, r| {
            if block.is_none() && record.tag == S_ENVBLOCK {
                block = Some(EnvironmentBlock::parse(r.slice(r.tell(), record.end)?)?);
            }
            Ok(())
        })?;

        Ok(block.and_then(|env| {
            let cwd = env.cwd()?.to_string();
            let command = env.command().unwrap_or_default().to_string();
            Some(LinkInfo {
                cwd: PathBuf::from(cwd),
                command,
            })
        }))
    }

    /// Warn when the database does not belong to the image that referenced it.
    ///
    /// Returns `true` when the GUIDs match.
    pub fn check_guid(&self, expected: Guid) -> bool
    {
        if self.guid == expected {
            return true;
        }
        warn!(
            "Debug database GUID {} does not match image GUID {}, symbols may be stale",
            self.guid, expected
        );
        false
    }
}

fn parse_named_stream_map(reader: &mut StreamReader<'_>) -> Result<HashMap<String, u32>>
{
    let mut named = HashMap::new();
    if reader.remaining() < 4 {
        return Ok(named);
    }

    let buffer_size = reader.read::<u32>()? as usize;
    let strings = reader.read_bytes(buffer_size)?;

    let _size = reader.read::<u32>()?;
    let capacity = reader.read::<u32>()? as usize;

    let present_words = reader.read::<u32>()? as usize;
    let mut present = Vec::with_capacity(present_words.min(reader.remaining() / 4));
    for _ in 0..present_words {
        present.push(reader.read::<u32>()?);
    }
    let deleted_words = reader.read::<u32>()? as usize;
    reader.skip(deleted_words.saturating_mul(4))?;

    for bucket in 0..capacity {
        let is_present = present
            .get(bucket / 32)
            .is_some_and(|word| word & (1 << (bucket % 32)) != 0);
        if !is_present {
            continue;
        }
        let key = reader.read::<u32>()? as usize;
        let stream = reader.read::<u32>()?;
        named.insert(cstr_at(strings, key)?, stream);
    }

    Ok(named)
}
