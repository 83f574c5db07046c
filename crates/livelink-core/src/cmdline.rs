//! # Compile Command Reconstruction
//!
//! Rebuilds the compiler invocation that originally produced a source file's
//! object, from the `S_ENVBLOCK` record the compiler leaves in the object's
//! `.debug$S` section. When that isn't possible a configured fallback
//! command is used instead.
//!
//! Either way the command is rewritten to compile only, write debug
//! information into the object itself (the program's debug database is held
//! open by the running program), and emit to a temporary object beside the
//! source.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::coff::ObjectFile;
use crate::codeview::{find_environment_block, EnvironmentBlock};
use crate::config::LiveLinkConfig;
use crate::discovery::BuildMetadata;
use crate::error::Result;
use crate::shell::ShellFlavor;

/// Options replaced or made meaningless by the rewrite
const REMOVED_OPTIONS: [&str; 7] = ["Fo", "Fd", "ZI", "Zi", "Yu", "Yc", "JMC"];
/// Options that write debug information to a program database
const PDB_OPTIONS: [&str; 2] = ["ZI", "Zi"];

/// Where a job's command line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin
{
    /// Recovered from the object file's compiler environment
    Recovered,
    /// The configured fallback command
    Fallback,
}

/// A single recompilation, ready to submit to the compiler shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileJob
{
    pub source_file: PathBuf,
    /// Temporary object the compile writes
    pub object_file: PathBuf,
    /// Shell commands, run in order
    pub commands: Vec<String>,
    pub origin: CommandOrigin,
}

impl CompileJob
{
    /// The commands as one group for `shell`, with stderr merged.
    #[must_use]
    pub fn script(&self, shell: ShellFlavor) -> String
    {
        shell.group(&self.commands)
    }
}

/// Temporary object path for `source`: its extension replaced by `suffix`.
#[must_use]
pub fn temp_object_path(source: &Path, suffix: &str) -> PathBuf
{
    source.with_extension(suffix)
}

/// Build the compile job for a changed source file.
///
/// Never fails: anything that prevents recovering the original command line
/// is logged and the fallback command is used.
#[must_use]
pub fn build_compile_job(source: &Path, metadata: &BuildMetadata, config: &LiveLinkConfig) -> CompileJob
{
    let object_file = temp_object_path(source, &config.temp_object_suffix);
    let shell = config.shell;

    let recovered = match recover_environment(source, metadata) {
        Ok(Some(env)) => env.command().map(str::to_string).map(|command| (env, command)),
        Ok(None) => None,
        Err(err) => {
            debug!("Could not read compiler environment for {}: {}", source.display(), err);
            None
        }
    };

    let (commands, origin) = match recovered {
        Some((env, command)) => {
            let mut commands = Vec::new();
            if let Some(cwd) = env.cwd() {
                commands.push(shell.change_directory(cwd));
            }
            let compiler = match env.compiler() {
                Some(compiler) => {
                    // Tool DLLs like mspdbcore.dll live in sibling host directories
                    let sep = shell.path_separator();
                    commands.push(shell.extend_path(&[
                        format!("{compiler}{sep}..{sep}..{sep}x86"),
                        format!("{compiler}{sep}..{sep}..{sep}x64"),
                    ]));
                    compiler
                }
                None => "cl.exe",
            };
            let arguments = rewrite_arguments(&command, source, &object_file);
            commands.push(format!("\"{compiler}\" {arguments}"));
            (commands, CommandOrigin::Recovered)
        }
        None => {
            debug!("Using fallback command line for {}", source.display());
            let command = rewrite_arguments(&config.fallback_command, source, &object_file);
            (vec![command], CommandOrigin::Fallback)
        }
    };

    CompileJob {
        source_file: source.to_path_buf(),
        object_file,
        commands,
        origin,
    }
}

fn recover_environment(source: &Path, metadata: &BuildMetadata) -> Result<Option<EnvironmentBlock>>
{
    let Some(object_path) = metadata.object_file_for(source) else {
        debug!("{} is not part of the program", source.display());
        return Ok(None);
    };

    let object = ObjectFile::open(object_path)?;
    let Some(section) = object.debug_section()? else {
        debug!("{} has no debug symbol section", object_path.display());
        return Ok(None);
    };
    find_environment_block(section)
}

/// Strip output and PDB options, make it compile-only, and append the
/// source and temporary object.
#[must_use]
pub fn rewrite_arguments(command: &str, source: &Path, object_file: &Path) -> String
{
    let (mut arguments, stripped_pdb) = strip_options(&split_arguments(command));
    if stripped_pdb {
        arguments.push("/Z7".to_string());
    }
    if !arguments.iter().any(|arg| arg == "/c" || arg == "-c") {
        arguments.push("/c".to_string());
    }
    arguments.push(format!("\"{}\"", source.display()));
    arguments.push(format!("/Fo\"{}\"", object_file.display()));
    arguments.join(" ")
}

/// Split a command line on unquoted whitespace, keeping quotes in the tokens.
///
/// A quote only toggles quoting when it follows an even number of
/// backslashes, so `/Fo"out\\"` ends at its closing quote.
#[must_use]
pub fn split_arguments(command: &str) -> Vec<&str>
{
    let mut tokens = Vec::new();
    let mut start = None;
    let mut in_quotes = false;
    let mut backslashes = 0usize;

    for (index, ch) in command.char_indices() {
        if ch.is_whitespace() && !in_quotes {
            if let Some(begin) = start.take() {
                tokens.push(&command[begin..index]);
            }
            backslashes = 0;
            continue;
        }

        start.get_or_insert(index);
        match ch {
            '"' if backslashes % 2 == 0 => in_quotes = !in_quotes,
            _ => {}
        }
        backslashes = if ch == '\\' { backslashes + 1 } else { 0 };
    }

    if let Some(begin) = start {
        tokens.push(&command[begin..]);
    }
    tokens
}

/// Remove every occurrence of the options the rewrite replaces.
///
/// Returns the remaining arguments and whether a program database option was
/// among those removed.
#[must_use]
pub fn strip_options(arguments: &[&str]) -> (Vec<String>, bool)
{
    let mut kept = Vec::with_capacity(arguments.len());
    let mut stripped_pdb = false;

    for argument in arguments {
        let option = argument.strip_prefix('/').or_else(|| argument.strip_prefix('-'));
        let removed = option.and_then(|name| REMOVED_OPTIONS.iter().find(|removed| name.starts_with(**removed)));
        match removed {
            Some(removed) => stripped_pdb |= PDB_OPTIONS.contains(removed),
            None => kept.push((*argument).to_string()),
        }
    }

    (kept, stripped_pdb)
}
