use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use livelink_core::cmdline::build_compile_job;
use livelink_core::compiler::ShellCompiler;
use livelink_core::discovery::discover_from_pdb;
use livelink_core::linker::{InProcessHost, NoCallbacks, ProcessHost};
use livelink_core::orchestrator::RunSummary;
use livelink_core::pdb::PdbReader;
use livelink_core::shell::ShellFlavor;
use livelink_core::types::ProcessId;
use livelink_core::watch::DirectoryWatcher;
use livelink_core::{Address, BuildMetadata, LiveLinkConfig, Linker, Orchestrator, SymbolTable};
use livelink_utils::{info, init_logging, init_logging_to_file, init_logging_with_level, warn, LogFormat, LogLevel};

/// Rebuild a native program's changed sources in the background.
#[derive(Parser, Debug)]
#[command(name = "livelink")]
#[command(version)]
#[command(about = "Rebuild a native program's changed sources in the background", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log to a file instead of the console (default: ~/.livelink/<date>-livelink.log)
    #[arg(long, global = true)]
    log_file: Option<Option<PathBuf>>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print what a debug database records about a build
    Pdb
    {
        /// Path to the .pdb file
        path: PathBuf,
        /// Also list public and global symbols (as RVAs)
        #[arg(long, default_value_t = false)]
        symbols: bool,
        /// Also list each module's source files
        #[arg(long, default_value_t = false)]
        sources: bool,
    },
    /// Print the script that would recompile a source file
    CommandLine
    {
        /// Debug database of the program the source belongs to
        #[arg(long)]
        pdb: PathBuf,
        /// Source file, as recorded in the debug database
        source: PathBuf,
        /// Shell dialect to render the script in (cmd or posix)
        #[arg(long)]
        shell: Option<ShellFlavor>,
    },
    /// Watch a program's sources and recompile them as they change
    Watch
    {
        /// Debug database of the program to watch
        #[arg(long)]
        pdb: PathBuf,
        /// Stop when this process exits
        #[arg(long)]
        pid: Option<u32>,
        /// Ignore repeated changes to a file within this many milliseconds
        #[arg(long)]
        debounce_ms: Option<u64>,
        /// Shell dialect the compiler runs in (cmd or posix)
        #[arg(long)]
        shell: Option<ShellFlavor>,
        /// Source extensions that trigger a rebuild (comma separated)
        #[arg(long, value_delimiter = ',')]
        extensions: Vec<String>,
    },
}

fn main()
{
    let cli = Cli::parse();

    if let Err(e) = setup_logging(&cli) {
        eprintln!("Failed to initialize logging: {e}");
        process::exit(1);
    }

    if let Err(e) = run_command(cli.command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn setup_logging(cli: &Cli) -> Result<(), Box<dyn Error>>
{
    match (&cli.log_file, cli.log_level) {
        (Some(file), level) => {
            let file = file.clone().unwrap_or_else(livelink_utils::default_log_file);
            let path = init_logging_to_file(file, level, LogFormat::Pretty)?;
            eprintln!("Logging to {}", path.display());
        }
        (None, Some(level)) => init_logging_with_level(level, LogFormat::Pretty)?,
        (None, None) => init_logging()?,
    }
    Ok(())
}

fn run_command(command: Commands) -> Result<(), Box<dyn Error>>
{
    match command {
        Commands::Pdb { path, symbols, sources } => print_pdb(&path, symbols, sources),
        Commands::CommandLine { pdb, source, shell } => {
            let mut config = LiveLinkConfig::from_env()?;
            if let Some(shell) = shell {
                config = config.with_shell(shell);
            }
            print_command_line(&pdb, &source, &config)
        }
        Commands::Watch {
            pdb,
            pid,
            debounce_ms,
            shell,
            extensions,
        } => {
            let mut config = LiveLinkConfig::from_env()?;
            if let Some(millis) = debounce_ms {
                config = config.with_debounce(Duration::from_millis(millis));
            }
            if let Some(shell) = shell {
                config = config.with_shell(shell);
            }
            if !extensions.is_empty() {
                config = config.with_source_extensions(extensions);
            }
            let summary = watch(&pdb, pid.map(ProcessId::from), config)?;
            print_summary(&summary);
            Ok(())
        }
    }
}

fn print_pdb(path: &Path, symbols: bool, sources: bool) -> Result<(), Box<dyn Error>>
{
    let pdb = PdbReader::open(path)?;
    println!("Debug database: {}", path.display());
    println!("  Version:   {}", pdb.version());
    println!("  GUID:      {}", pdb.guid());
    println!("  Age:       {}", pdb.age());
    println!("  Machine:   0x{:04x}", pdb.machine());

    match pdb.read_link_info()? {
        Some(link) => {
            println!("  Link cwd:  {}", link.cwd.display());
            println!("  Link args: {}", link.command);
        }
        None => println!("  Link info: not recorded"),
    }

    let modules = pdb.modules()?;
    println!("\nModules ({}):", modules.len());
    for (index, module) in modules.iter().enumerate() {
        if module.object_file_name == module.module_name {
            println!("  [{index:4}] {}", module.module_name);
        } else {
            println!("  [{index:4}] {} ({})", module.module_name, module.object_file_name);
        }
    }

    if sources {
        let (source_files, _) = pdb.read_source_files()?;
        println!("\nSource files:");
        for (module, files) in modules.iter().zip(&source_files) {
            if files.is_empty() {
                continue;
            }
            println!("  {}", module.module_name);
            for file in files {
                println!("    {}", file.display());
            }
        }
    }

    if symbols {
        let mut table = SymbolTable::new();
        pdb.read_symbol_table(Address::ZERO, &mut table)?;
        let mut entries: Vec<(&String, Address)> = table.iter().map(|(name, address)| (name, *address)).collect();
        entries.sort_by_key(|(name, address)| (*address, *name));
        println!("\nSymbols ({}):", entries.len());
        for (name, address) in entries {
            println!("  {address}  {name}");
        }
    }
    Ok(())
}

fn print_command_line(pdb: &Path, source: &Path, config: &LiveLinkConfig) -> Result<(), Box<dyn Error>>
{
    let reader = PdbReader::open(pdb)?;
    let (source_files, source_index) = reader.read_source_files()?;
    let metadata = BuildMetadata {
        object_files: reader.read_object_files()?,
        source_files,
        source_index,
        link_info: reader.read_link_info()?,
        ..BuildMetadata::default()
    };

    let job = build_compile_job(source, &metadata, config);
    println!("# {:?} command for {}", job.origin, source.display());
    println!("{}", job.script(config.shell));
    Ok(())
}

/// Reports each compiled object instead of patching it into a process.
#[derive(Debug, Default)]
struct ReportingLinker
{
    linked: usize,
}

impl Linker for ReportingLinker
{
    fn link(&mut self, object_file: &Path) -> bool
    {
        match fs::metadata(object_file) {
            Ok(meta) => {
                self.linked += 1;
                info!("Object file ready: {} ({} bytes)", object_file.display(), meta.len());
                true
            }
            Err(err) => {
                warn!("Compiled object {} is missing: {}", object_file.display(), err);
                false
            }
        }
    }
}

fn watch(pdb: &Path, pid: Option<ProcessId>, config: LiveLinkConfig) -> Result<RunSummary, Box<dyn Error>>
{
    let metadata = discover_from_pdb(pdb, Address::ZERO, &config)?;
    let mut watcher = DirectoryWatcher::new(&metadata.source_dirs, config.notify_buffer_size)?;

    let working_directory = metadata.link_info.as_ref().map(|link| link.cwd.clone());
    let compiler = ShellCompiler::spawn(
        config.shell,
        config.completion_marker.clone(),
        working_directory.as_deref().filter(|dir| dir.is_dir()),
    )?;

    // The host's sync/release functions live in another process; only an
    // embedding host can call them, via `SymbolCallbacks::from_config`
    let mut orchestrator = Orchestrator::new(metadata, config, compiler, ReportingLinker::default(), NoCallbacks);
    let summary = match pid {
        Some(pid) => {
            info!("Watching until process {} exits", pid);
            orchestrator.run(&mut watcher, &ProcessHost::new(pid))
        }
        None => orchestrator.run(&mut watcher, &InProcessHost),
    };
    info!("Reported {} object files", orchestrator.linker().linked);
    Ok(summary)
}

fn print_summary(summary: &RunSummary)
{
    println!("Batches:          {}", summary.batches);
    println!("Relinked:         {}", summary.links);
    println!("Link failures:    {}", summary.link_failures);
    println!("Compile failures: {}", summary.compile_failures);
    println!("Debounced:        {}", summary.debounced);
    if let Some(reason) = &summary.stop_reason {
        println!("Stopped:          {reason}");
    }
}
