//! # Build Metadata Discovery
//!
//! Everything the rebuild loop needs to know about how the running program
//! was built, gathered once at startup: symbols, object files, source files
//! and the directories to watch.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::LiveLinkConfig;
use crate::error::{LiveLinkError, Result};
use crate::image::{locate_debug_database, scan_imports, ImageView, ModuleResolver};
use crate::paths::{has_source_extension, SourceDirectorySet, SourceFileIndex};
use crate::pdb::{LinkInfo, PdbReader};
use crate::types::{Address, SymbolTable};

/// Symbol under which the image base is always available
pub const IMAGE_BASE_SYMBOL: &str = "__ImageBase";

/// Metadata about the program being reloaded
#[derive(Debug, Clone, Default)]
pub struct BuildMetadata
{
    pub image_base: Address,
    pub symbols: SymbolTable,
    /// Object file per module index
    pub object_files: Vec<PathBuf>,
    /// Source files per module index
    pub source_files: Vec<Vec<PathBuf>>,
    pub source_index: SourceFileIndex,
    pub source_dirs: SourceDirectorySet,
    pub link_info: Option<LinkInfo>,
}

impl BuildMetadata
{
    /// Object file that module `source` was compiled into, if known.
    #[must_use]
    pub fn object_file_for(&self, source: &Path) -> Option<&Path>
    {
        let location = self.source_index.get(source)?;
        self.object_files.get(location.module).map(PathBuf::as_path)
    }
}

/// Discover metadata for a loaded image and the modules it imports.
///
/// The image's own debug database is read first; imported modules add their
/// import slots and, where available, their own public symbols.
///
/// ## Errors
///
/// - `DebugDatabaseNotFound`: the image has no CodeView debug entry
/// - `InvalidContainer`/`Io`: the debug database is unreadable
/// - `NoSourceDirectories`: nothing worth watching was found
pub fn discover_from_image<'a>(
    image: &ImageView<'_>,
    resolver: &impl ModuleResolver<'a>,
    config: &LiveLinkConfig,
) -> Result<BuildMetadata>
{
    info!("Reading PE debug info directory");
    let reference = locate_debug_database(image)?;
    info!("Found program debug database: {}", reference.path.display());

    let pdb = PdbReader::open(&reference.path)?;
    pdb.check_guid(reference.guid);

    let mut metadata = collect(&pdb, image.base(), config)?;
    scan_imports(image, resolver, &mut metadata.symbols)?;
    finish(metadata)
}

/// Discover metadata from a debug database on disk.
///
/// Symbols are placed relative to `image_base`; pass [`Address::ZERO`] for
/// RVAs.
pub fn discover_from_pdb(
    path: impl AsRef<Path>,
    image_base: Address,
    config: &LiveLinkConfig,
) -> Result<BuildMetadata>
{
    let path = path.as_ref();
    info!("Reading debug database {}", path.display());
    let pdb = PdbReader::open(path)?;
    finish(collect(&pdb, image_base, config)?)
}

fn collect(pdb: &PdbReader, image_base: Address, config: &LiveLinkConfig) -> Result<BuildMetadata>
{
    let mut metadata = BuildMetadata {
        image_base,
        ..BuildMetadata::default()
    };
    metadata.symbols.insert(IMAGE_BASE_SYMBOL, image_base);

    // The linker usually runs in the project root
    metadata.link_info = pdb.read_link_info()?;
    if let Some(link) = &metadata.link_info {
        if !link.cwd.as_os_str().is_empty() {
            metadata.source_dirs.insert(&link.cwd);
        }
    }

    pdb.read_symbol_table(image_base, &mut metadata.symbols)?;
    metadata.object_files = pdb.read_object_files()?;
    let (source_files, source_index) = pdb.read_source_files()?;
    metadata.source_files = source_files;
    metadata.source_index = source_index;

    for (module, object) in metadata.object_files.iter().enumerate() {
        if !is_compiled_object(object) {
            continue;
        }
        let Some(sources) = metadata.source_files.get(module) else {
            continue;
        };
        let translation_unit = sources
            .iter()
            .find(|source| has_source_extension(source, &config.source_extensions) && source.exists());
        let Some(source) = translation_unit else {
            debug!("No source file found for {}", object.display());
            continue;
        };

        info!("Found source file: {}", source.display());
        if let Some(directory) = source.parent() {
            metadata.source_dirs.insert(directory);
        }
    }

    Ok(metadata)
}

fn is_compiled_object(path: &Path) -> bool
{
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("obj"))
        && path.exists()
}

fn finish(metadata: BuildMetadata) -> Result<BuildMetadata>
{
    if metadata.source_dirs.is_empty() {
        return Err(LiveLinkError::NoSourceDirectories);
    }
    for directory in &metadata.source_dirs {
        info!("Watching source directory {}", directory.display());
    }
    debug!(
        "Discovered {} symbols, {} object files",
        metadata.symbols.len(),
        metadata.object_files.len()
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests
{
    use std::fs;

    use super::*;
    use crate::image::tests::ImageBuilder;
    use crate::image::ModuleMap;
    use crate::pdb::tests::PdbFixture;

    struct Project
    {
        dir: tempfile::TempDir,
        pdb: PathBuf,
    }

    fn touch(path: &Path)
    {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    /// Two translation units in sibling directories, plus a library module
    fn project(with_link_info: bool) -> Project
    {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let p = |rel: &str| root.join(rel).to_string_lossy().into_owned();

        for rel in ["src/a/x.cpp", "src/b/y.cpp", "build/x.obj", "build/y.obj"] {
            touch(&root.join(rel));
        }

        let fixture = PdbFixture {
            guid: [1; 16],
            modules: vec![
                (p("build/x.obj"), vec![p("src/a/x.cpp"), p("include/x.h")], None),
                (p("build/y.obj"), vec![p("include/x.h"), p("src/b/y.cpp")], None),
                ("msvcrt.lib".to_string(), vec![p("crt/main.c")], None),
                // Object file no longer on disk
                (p("build/gone.obj"), vec![p("src/gone/z.cpp")], None),
            ],
            section_rvas: vec![0x1000],
            publics: vec![("main".to_string(), 1, 0x20)],
            link_info: with_link_info.then(|| (p(""), "/DEBUG".to_string())),
            ..Default::default()
        };
        let pdb = root.join("app.pdb");
        fs::write(&pdb, fixture.build()).unwrap();
        Project { dir, pdb }
    }

    #[test]
    fn test_sibling_source_directories_collapse()
    {
        let project = project(false);
        let metadata =
            discover_from_pdb(&project.pdb, Address::new(0x1_4000_0000), &LiveLinkConfig::default()).unwrap();

        let dirs: Vec<PathBuf> = metadata.source_dirs.iter().cloned().collect();
        assert_eq!(dirs, vec![project.dir.path().join("src")]);
        assert_eq!(metadata.symbols.get(IMAGE_BASE_SYMBOL), Some(Address::new(0x1_4000_0000)));
        assert_eq!(metadata.symbols.get("main"), Some(Address::new(0x1_4000_1020)));
        assert_eq!(metadata.object_files.len(), 4);
        assert_eq!(
            metadata.object_file_for(&project.dir.path().join("src/b/y.cpp")),
            Some(project.dir.path().join("build/y.obj").as_path())
        );
    }

    #[test]
    fn test_linker_directory_is_watched()
    {
        let project = project(true);
        let metadata = discover_from_pdb(&project.pdb, Address::ZERO, &LiveLinkConfig::default()).unwrap();
        // Source directories under the linker's directory are absorbed by it
        let dirs: Vec<PathBuf> = metadata.source_dirs.iter().cloned().collect();
        assert_eq!(dirs, vec![project.dir.path().to_path_buf()]);
        assert_eq!(metadata.link_info.unwrap().command, "/DEBUG");
    }

    #[test]
    fn test_no_matching_sources_is_an_error()
    {
        let project = project(false);
        let config = LiveLinkConfig::default().with_source_extensions(["rs"]);
        let result = discover_from_pdb(&project.pdb, Address::ZERO, &config);
        assert!(matches!(result, Err(LiveLinkError::NoSourceDirectories)));
    }

    #[test]
    fn test_discover_from_image_reads_referenced_database()
    {
        let project = project(false);
        let pdb_path = project.pdb.to_string_lossy().into_owned();
        // GUID differs from the database's; a stale database still loads
        let image = ImageBuilder::new(true).with_debug_database([2; 16], &pdb_path);
        let metadata =
            discover_from_image(&image.view(0x1_4000_0000), &ModuleMap::new(), &LiveLinkConfig::default()).unwrap();
        assert_eq!(metadata.image_base, Address::new(0x1_4000_0000));
        assert!(metadata.symbols.contains("main"));
        assert_eq!(metadata.source_dirs.len(), 1);
    }

    #[test]
    fn test_image_without_debug_entry()
    {
        let image = ImageBuilder::new(true);
        let result = discover_from_image(&image.view(0), &ModuleMap::new(), &LiveLinkConfig::default());
        assert!(matches!(result, Err(LiveLinkError::DebugDatabaseNotFound)));
    }
}
