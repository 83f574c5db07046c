//! # Loaded Image Metadata
//!
//! Reads the import table and debug directory of a PE image that the OS
//! loader has already mapped, so RVAs are plain offsets from the base.
//!
//! ```text
//! 0x00  IMAGE_DOS_HEADER      e_magic 'MZ' ... e_lfanew @ 0x3c
//! nt    'PE\0\0'
//! +4    IMAGE_FILE_HEADER     20 bytes
//! +24   IMAGE_OPTIONAL_HEADER magic 0x10b (PE32) / 0x20b (PE32+)
//!       ... DataDirectory[NumberOfRvaAndSizes] (rva u32, size u32)
//! ```
//!
//! Nothing here trusts the image: every RVA and size is checked against the
//! view before it is dereferenced.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{LiveLinkError, Result};
use crate::pdb::PdbReader;
use crate::stream::{cstr_at, read_at, LeRead};
use crate::types::{Address, Guid, SymbolTable};

/// `IMAGE_DIRECTORY_ENTRY_EXPORT`
pub const DIRECTORY_EXPORT: usize = 0;
/// `IMAGE_DIRECTORY_ENTRY_IMPORT`
pub const DIRECTORY_IMPORT: usize = 1;
/// `IMAGE_DIRECTORY_ENTRY_DEBUG`
pub const DIRECTORY_DEBUG: usize = 6;

/// `IMAGE_DEBUG_TYPE_CODEVIEW`
pub const DEBUG_TYPE_CODEVIEW: u32 = 2;
/// `RSDS` CodeView 7.0 signature
pub const RSDS_SIGNATURE: u32 = 0x5344_5352;

const DOS_MAGIC: u16 = 0x5a4d;
const NT_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const IMPORT_DESCRIPTOR_SIZE: usize = 20;
const DEBUG_DIRECTORY_SIZE: usize = 28;

/// Bounds-checked view of a mapped PE image
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a>
{
    data: &'a [u8],
    base: Address,
}

#[derive(Debug, Clone, Copy)]
struct OptionalHeader
{
    pe32_plus: bool,
    directories: usize,
    directory_count: usize,
}

/// Location of the image's debug database from its CodeView entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugDatabaseRef
{
    pub guid: Guid,
    pub age: u32,
    pub path: PathBuf,
}

impl<'a> ImageView<'a>
{
    /// View over image bytes laid out as the loader maps them.
    ///
    /// `base` is the address the first byte lives at in the target process.
    #[must_use]
    pub fn new(data: &'a [u8], base: Address) -> Self
    {
        Self { data, base }
    }

    /// View over a module mapped in this process.
    ///
    /// The view covers `SizeOfImage` bytes from `base`.
    ///
    /// ## Safety
    ///
    /// `base` must point at a PE image mapped by the OS loader that stays
    /// loaded for `'a`.
    pub unsafe fn from_loaded(base: *const u8) -> Result<Self>
    {
        // SAFETY: every mapped image starts with at least a full DOS header
        let dos = unsafe { std::slice::from_raw_parts(base, 0x40) };
        if read_at::<u16>(dos, 0)? != DOS_MAGIC {
            return Err(LiveLinkError::InvalidImage("missing MZ signature".to_string()));
        }
        let nt = read_at::<u32>(dos, 0x3c)? as usize;

        // SAFETY: the loader maps the headers up to SizeOfImage, which sits
        // at the same offset in PE32 and PE32+
        let headers = unsafe { std::slice::from_raw_parts(base, nt + 24 + 60) };
        let size_of_image = read_at::<u32>(headers, nt + 24 + 56)? as usize;

        // SAFETY: the caller guarantees the module stays mapped
        let data = unsafe { std::slice::from_raw_parts(base, size_of_image) };
        Ok(Self::new(data, Address::new(base as u64)))
    }

    #[must_use]
    pub fn base(&self) -> Address
    {
        self.base
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.data.is_empty()
    }

    /// Read a value at an RVA.
    pub fn read<T: LeRead>(&self, rva: usize) -> Result<T>
    {
        read_at::<T>(self.data, rva).map_err(|_| self.out_of_bounds(rva, T::SIZE))
    }

    /// Read a NUL-terminated string at an RVA.
    pub fn read_cstr(&self, rva: usize) -> Result<String>
    {
        cstr_at(self.data, rva).map_err(|_| self.out_of_bounds(rva, 1))
    }

    /// Borrow `len` bytes at an RVA.
    pub fn bytes(&self, rva: usize, len: usize) -> Result<&'a [u8]>
    {
        rva.checked_add(len)
            .and_then(|end| self.data.get(rva..end))
            .ok_or_else(|| self.out_of_bounds(rva, len))
    }

    fn out_of_bounds(&self, rva: usize, len: usize) -> LiveLinkError
    {
        LiveLinkError::InvalidImage(format!(
            "{len} bytes at rva {rva:#x} lie outside the {:#x}-byte image",
            self.data.len()
        ))
    }

    fn optional_header(&self) -> Result<OptionalHeader>
    {
        if self.read::<u16>(0)? != DOS_MAGIC {
            return Err(LiveLinkError::InvalidImage("missing MZ signature".to_string()));
        }
        let nt = self.read::<u32>(0x3c)? as usize;
        if self.read::<u32>(nt)? != NT_SIGNATURE {
            return Err(LiveLinkError::InvalidImage("missing PE signature".to_string()));
        }

        let optional = nt + 24;
        let (pe32_plus, count_offset) = match self.read::<u16>(optional)? {
            PE32_MAGIC => (false, 92),
            PE32_PLUS_MAGIC => (true, 108),
            magic => {
                return Err(LiveLinkError::InvalidImage(format!(
                    "unknown optional header magic {magic:#x}"
                )))
            }
        };

        Ok(OptionalHeader {
            pe32_plus,
            directories: optional + count_offset + 4,
            directory_count: self.read::<u32>(optional + count_offset)? as usize,
        })
    }

    /// `true` for 64-bit images
    pub fn is_pe32_plus(&self) -> Result<bool>
    {
        Ok(self.optional_header()?.pe32_plus)
    }

    /// `(rva, size)` of a data directory, or `None` when it is absent or empty.
    pub fn data_directory(&self, index: usize) -> Result<Option<(usize, usize)>>
    {
        let header = self.optional_header()?;
        if index >= header.directory_count {
            return Ok(None);
        }
        let entry = header.directories + index * 8;
        let rva = self.read::<u32>(entry)? as usize;
        let size = self.read::<u32>(entry + 4)? as usize;
        Ok((rva != 0 && size != 0).then_some((rva, size)))
    }

    /// Look up the name exported under `ordinal`.
    ///
    /// Export ordinals are biased: the name ordinal table stores
    /// `ordinal - Base`.
    pub fn export_name_by_ordinal(&self, ordinal: u16) -> Result<Option<String>>
    {
        let Some((export, _)) = self.data_directory(DIRECTORY_EXPORT)? else {
            return Ok(None);
        };

        let base = self.read::<u32>(export + 16)?;
        let number_of_names = self.read::<u32>(export + 24)? as usize;
        let names = self.read::<u32>(export + 32)? as usize;
        let name_ordinals = self.read::<u32>(export + 36)? as usize;

        for i in 0..number_of_names {
            let unbiased = self.read::<u16>(name_ordinals + i * 2)?;
            if u32::from(unbiased).wrapping_add(base) == u32::from(ordinal) {
                let name = self.read::<u32>(names + i * 4)? as usize;
                return self.read_cstr(name).map(Some);
            }
        }
        Ok(None)
    }
}

/// Find loaded modules by name.
///
/// Implementations must only return modules that are already mapped; the
/// import scan never loads anything.
pub trait ModuleResolver<'a>
{
    fn resolve(&self, name: &str) -> Option<ImageView<'a>>;
}

/// Resolver over a fixed set of views, matched case-insensitively
#[derive(Debug, Default, Clone)]
pub struct ModuleMap<'a>
{
    modules: HashMap<String, ImageView<'a>>,
}

impl<'a> ModuleMap<'a>
{
    #[must_use]
    pub fn new() -> Self
    {
        Self { modules: HashMap::new() }
    }

    pub fn insert(&mut self, name: &str, view: ImageView<'a>)
    {
        self.modules.insert(name.to_ascii_lowercase(), view);
    }
}

impl<'a> ModuleResolver<'a> for ModuleMap<'a>
{
    fn resolve(&self, name: &str) -> Option<ImageView<'a>>
    {
        self.modules.get(&name.to_ascii_lowercase()).copied()
    }
}

/// Record every imported symbol's resolved address.
///
/// For each import descriptor, the target module is looked up through
/// `resolver` (unresolvable modules are skipped). Named imports take their
/// name from the hint/name entry; ordinal imports are named through the
/// target's export table. Each target's own debug database is merged
/// afterwards, one level deep. Returns the number of import slots recorded.
pub fn scan_imports<'a>(
    image: &ImageView<'_>,
    resolver: &impl ModuleResolver<'a>,
    symbols: &mut SymbolTable,
) -> Result<usize>
{
    info!("Reading PE import directory");

    let Some((imports, size)) = image.data_directory(DIRECTORY_IMPORT)? else {
        debug!("Image has no import directory");
        return Ok(0);
    };

    let pe32_plus = image.is_pe32_plus()?;
    let (thunk_size, ordinal_flag) = if pe32_plus {
        (8, 1u64 << 63)
    } else {
        (4, 1u64 << 31)
    };
    let read_thunk = |rva: usize| -> Result<u64> {
        if pe32_plus {
            image.read::<u64>(rva)
        } else {
            image.read::<u32>(rva).map(u64::from)
        }
    };

    let mut recorded = 0;
    for descriptor in (imports..imports + size).step_by(IMPORT_DESCRIPTOR_SIZE) {
        if descriptor + IMPORT_DESCRIPTOR_SIZE > imports + size {
            break;
        }
        let lookup_table = image.read::<u32>(descriptor)? as usize;
        let name = image.read::<u32>(descriptor + 12)? as usize;
        let address_table = image.read::<u32>(descriptor + 16)? as usize;
        if address_table == 0 {
            break;
        }

        let module_name = image.read_cstr(name)?;
        let Some(target) = resolver.resolve(&module_name) else {
            debug!("Skipping imports from {}, module is not loaded", module_name);
            continue;
        };
        // Without a lookup table the names are gone once the loader binds the IAT
        if lookup_table == 0 {
            continue;
        }

        for slot in 0.. {
            let thunk = read_thunk(lookup_table + slot * thunk_size)?;
            if thunk == 0 {
                break;
            }

            let import_name = if thunk & ordinal_flag != 0 {
                let ordinal = (thunk & 0xffff) as u16;
                match target.export_name_by_ordinal(ordinal)? {
                    Some(name) => name,
                    None => {
                        debug!("{} has no export named for ordinal {}", module_name, ordinal);
                        continue;
                    }
                }
            } else {
                // Skip the u16 hint in IMAGE_IMPORT_BY_NAME
                image.read_cstr((thunk & 0x7fff_ffff) as usize + 2)?
            };

            let resolved = read_thunk(address_table + slot * thunk_size)?;
            symbols.insert(import_name, Address::new(resolved));
            recorded += 1;
        }

        merge_module_symbols(&target, &module_name, symbols);
    }

    debug!("Recorded {} import slots", recorded);
    Ok(recorded)
}

// Imported modules are best effort: a missing or unreadable database only
// costs the symbols it would have provided
fn merge_module_symbols(target: &ImageView<'_>, module_name: &str, symbols: &mut SymbolTable)
{
    let result = locate_debug_database(target).and_then(|reference| {
        let pdb = PdbReader::open(&reference.path)?;
        pdb.check_guid(reference.guid);
        pdb.read_symbol_table(target.base(), symbols)
    });

    match result {
        Ok(count) => debug!("Merged {} symbols from {}", count, module_name),
        Err(LiveLinkError::DebugDatabaseNotFound) => {
            debug!("{} has no debug database reference", module_name)
        }
        Err(err) => warn!("Could not read debug database of {}: {}", module_name, err),
    }
}

/// Find the debug database named by the image's CodeView debug entry.
///
/// ## Errors
///
/// - `DebugDatabaseNotFound`: no debug directory or no `RSDS` entry
/// - `InvalidImage`: the directory or entry points outside the image
pub fn locate_debug_database(image: &ImageView<'_>) -> Result<DebugDatabaseRef>
{
    let Some((directory, size)) = image.data_directory(DIRECTORY_DEBUG)? else {
        return Err(LiveLinkError::DebugDatabaseNotFound);
    };

    for entry in 0..size / DEBUG_DIRECTORY_SIZE {
        let entry = directory + entry * DEBUG_DIRECTORY_SIZE;
        if image.read::<u32>(entry + 12)? != DEBUG_TYPE_CODEVIEW {
            continue;
        }
        let data = image.read::<u32>(entry + 20)? as usize;
        if data == 0 || image.read::<u32>(data)? != RSDS_SIGNATURE {
            continue;
        }

        let mut guid = [0u8; 16];
        guid.copy_from_slice(image.bytes(data + 4, 16)?);
        let age = image.read::<u32>(data + 20)?;
        let path = PathBuf::from(image.read_cstr(data + 24)?);
        return Ok(DebugDatabaseRef {
            guid: Guid::from_bytes(guid),
            age,
            path,
        });
    }

    Err(LiveLinkError::DebugDatabaseNotFound)
}
