//! # Shell Dialects
//!
//! The compiler runs inside one long-lived command interpreter. Scripts sent
//! to it are rendered in that interpreter's syntax: directory changes, `PATH`
//! extension, grouping with stderr merged into stdout, and the completion
//! line that reports the exit code.

use std::fmt;
use std::str::FromStr;

use crate::error::LiveLinkError;

/// Command interpreter the compiler runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellFlavor
{
    /// `cmd.exe`, the interpreter MSVC build environments are set up for
    Cmd,
    /// `sh`
    Posix,
}

impl ShellFlavor
{
    /// The interpreter for the platform we were built for.
    #[must_use]
    pub const fn native() -> Self
    {
        if cfg!(windows) {
            ShellFlavor::Cmd
        } else {
            ShellFlavor::Posix
        }
    }

    /// Program and arguments that start an interactive interpreter reading
    /// commands from stdin without echoing them.
    #[must_use]
    pub fn program(self) -> (&'static str, &'static [&'static str])
    {
        match self {
            ShellFlavor::Cmd => ("cmd.exe", &["/q", "/d", "/k", "@echo off"]),
            ShellFlavor::Posix => ("sh", &["-s"]),
        }
    }

    #[must_use]
    pub fn change_directory(self, directory: &str) -> String
    {
        match self {
            ShellFlavor::Cmd => format!("cd /D \"{directory}\""),
            ShellFlavor::Posix => format!("cd \"{directory}\""),
        }
    }

    /// Append `directories` to the interpreter's `PATH`.
    #[must_use]
    pub fn extend_path(self, directories: &[String]) -> String
    {
        match self {
            // Quoted so `(x86)` and spaces survive
            ShellFlavor::Cmd => format!("set \"PATH=%PATH%;{}\"", directories.join(";")),
            ShellFlavor::Posix => format!("export PATH=\"$PATH:{}\"", directories.join(":")),
        }
    }

    /// Separator between path components in paths we synthesize
    #[must_use]
    pub fn path_separator(self) -> char
    {
        match self {
            ShellFlavor::Cmd => '\\',
            ShellFlavor::Posix => '/',
        }
    }

    /// Variable holding the last command's exit code
    #[must_use]
    pub fn exit_code_variable(self) -> &'static str
    {
        match self {
            ShellFlavor::Cmd => "%errorlevel%",
            ShellFlavor::Posix => "$?",
        }
    }

    /// Run `commands` in sequence with stderr merged into stdout.
    ///
    /// `cmd` gets one line per command: a parenthesised block is parsed as a
    /// whole, so `%errorlevel%` and `PATH` inside it would expand too early and
    /// an unquoted `)` in a path would end it.
    #[must_use]
    pub fn group(self, commands: &[String]) -> String
    {
        match self {
            ShellFlavor::Cmd => commands
                .iter()
                .map(|command| format!("{command} 2>&1"))
                .collect::<Vec<_>>()
                .join("\n"),
            ShellFlavor::Posix => format!("{{ {}; }} 2>&1", commands.join("; ")),
        }
    }

    /// Line that prints `<marker> "<object>" with code <exit code>.`
    #[must_use]
    pub fn completion_line(self, marker: &str, object_file: &str) -> String
    {
        format!("echo {marker} \"{object_file}\" with code {}.", self.exit_code_variable())
    }
}

impl Default for ShellFlavor
{
    fn default() -> Self
    {
        Self::native()
    }
}

impl fmt::Display for ShellFlavor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ShellFlavor::Cmd => write!(f, "cmd"),
            ShellFlavor::Posix => write!(f, "posix"),
        }
    }
}

impl FromStr for ShellFlavor
{
    type Err = LiveLinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_ascii_lowercase().as_str() {
            "cmd" | "cmd.exe" => Ok(ShellFlavor::Cmd),
            "posix" | "sh" => Ok(ShellFlavor::Posix),
            other => Err(LiveLinkError::InvalidConfig(format!("unknown shell '{other}'"))),
        }
    }
}
