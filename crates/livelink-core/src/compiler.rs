//! # Compiler Channel
//!
//! Compiles run in one persistent command interpreter so the build
//! environment (vcvars, `PATH`, working directory) is set up once. Each
//! request is a script followed by a completion line; everything the script
//! prints before that line is compiler output.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::{LiveLinkError, Result};
use crate::shell::ShellFlavor;

/// One script to run, producing `object_file`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest
{
    pub object_file: PathBuf,
    /// Commands in the channel's shell syntax, stderr already merged
    pub script: String,
}

/// What a compile printed and how it exited
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilerOutput
{
    pub lines: Vec<String>,
    pub exit_code: i32,
}

impl CompilerOutput
{
    #[must_use]
    pub fn succeeded(&self) -> bool
    {
        self.exit_code == 0
    }
}

/// Something that runs compile scripts to completion
pub trait CompilerChannel
{
    /// Run `request` and wait for its completion line.
    ///
    /// ## Errors
    ///
    /// - `ChannelClosed`: the interpreter exited before completing
    /// - `Io`: the request could not be written
    fn submit(&mut self, request: &CompileRequest) -> Result<CompilerOutput>;

    /// `false` once the channel can no longer run requests.
    fn is_alive(&mut self) -> bool;
}

/// Parse `<marker> "<object>" with code <n>.` into `n`.
#[must_use]
pub fn parse_completion_line(line: &str, marker: &str) -> Option<i32>
{
    let rest = line.trim_end().strip_prefix(marker)?;
    let (_, code) = rest.rsplit_once(" with code ")?;
    code.trim_end_matches('.').trim().parse().ok()
}

/// [`CompilerChannel`] backed by a long-lived shell subprocess
pub struct ShellCompiler
{
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    shell: ShellFlavor,
    marker: String,
}

impl ShellCompiler
{
    /// Start the interpreter for `shell`, inheriting this process's environment.
    ///
    /// ## Errors
    ///
    /// - `Spawn`: the interpreter could not be started or its pipes opened
    pub fn spawn(shell: ShellFlavor, marker: impl Into<String>, working_directory: Option<&Path>) -> Result<Self>
    {
        let (program, args) = shell.program();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(directory) = working_directory {
            command.current_dir(directory);
        }

        let mut child = command
            .spawn()
            .map_err(|err| LiveLinkError::Spawn(format!("{program}: {err}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LiveLinkError::Spawn("compiler input pipe unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LiveLinkError::Spawn("compiler output pipe unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LiveLinkError::Spawn("compiler error pipe unavailable".to_string()))?;
        if let Err(err) = drain_stderr(stderr) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }

        info!("Started compiler process ({}, pid {})", program, child.id());
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            shell,
            marker: marker.into(),
        })
    }

    #[must_use]
    pub fn shell(&self) -> ShellFlavor
    {
        self.shell
    }
}

/// Log whatever the interpreter writes to stderr outside a script's own
/// redirection. The thread ends when the pipe closes.
fn drain_stderr(stderr: ChildStderr) -> Result<()>
{
    thread::Builder::new()
        .name("compiler-stderr".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stderr);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&raw);
                        warn!("compiler: {}", line.trim_end_matches(['\r', '\n']));
                    }
                    Err(err) => {
                        debug!("Stopped reading compiler stderr: {}", err);
                        break;
                    }
                }
            }
        })
        .map_err(|err| LiveLinkError::Spawn(format!("compiler stderr reader: {err}")))?;
    Ok(())
}

impl CompilerChannel for ShellCompiler
{
    fn submit(&mut self, request: &CompileRequest) -> Result<CompilerOutput>
    {
        let completion = self
            .shell
            .completion_line(&self.marker, &request.object_file.to_string_lossy());
        debug!("Submitting compile script: {}", request.script);
        writeln!(self.stdin, "{}", request.script)?;
        writeln!(self.stdin, "{completion}")?;
        self.stdin.flush()?;

        let mut output = CompilerOutput::default();
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if self.stdout.read_until(b'\n', &mut raw)? == 0 {
                return Err(LiveLinkError::ChannelClosed);
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(exit_code) = parse_completion_line(line, &self.marker) {
                output.exit_code = exit_code;
                return Ok(output);
            }
            info!("{}", line);
            output.lines.push(line.to_string());
        }
    }

    fn is_alive(&mut self) -> bool
    {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for ShellCompiler
{
    fn drop(&mut self)
    {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const MARKER: &str = "Finished compiling";

    #[test]
    fn test_parse_completion_line()
    {
        assert_eq!(
            parse_completion_line("Finished compiling \"C:\\p\\a.temp.obj\" with code 2.", MARKER),
            Some(2)
        );
        assert_eq!(parse_completion_line("Finished compiling \"a.obj\" with code 0.\r", MARKER), Some(0));
        assert_eq!(parse_completion_line("Finished compiling \"a.obj\" with code -1073741819.", MARKER), Some(-1_073_741_819));
        assert_eq!(parse_completion_line("a.cpp(3): error C2065", MARKER), None);
        assert_eq!(parse_completion_line("Finished compiling \"a.obj\" with code .", MARKER), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_round_trip()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut compiler = ShellCompiler::spawn(ShellFlavor::Posix, MARKER, Some(dir.path())).unwrap();
        assert!(compiler.is_alive());

        let shell = compiler.shell();
        let failing = CompileRequest {
            object_file: dir.path().join("a.temp.obj"),
            script: shell.group(&[
                "echo hello".to_string(),
                "echo oops >&2".to_string(),
                "sh -c 'exit 2'".to_string(),
            ]),
        };
        let output = compiler.submit(&failing).unwrap();
        assert_eq!(output.lines, vec!["hello", "oops"]);
        assert_eq!(output.exit_code, 2);
        assert!(!output.succeeded());

        // The same interpreter keeps serving requests
        let passing = CompileRequest {
            object_file: dir.path().join("b.temp.obj"),
            script: shell.group(&["echo again".to_string()]),
        };
        let output = compiler.submit(&passing).unwrap();
        assert_eq!(output.lines, vec!["again"]);
        assert!(output.succeeded());
        assert!(compiler.is_alive());
    }

    #[cfg(unix)]
    #[test]
    fn test_interpreter_stderr_is_kept_out_of_output()
    {
        let mut compiler = ShellCompiler::spawn(ShellFlavor::Posix, MARKER, None).unwrap();
        let request = CompileRequest {
            object_file: PathBuf::from("a.temp.obj"),
            script: "echo stray >&2\necho kept".to_string(),
        };
        let output = compiler.submit(&request).unwrap();
        assert_eq!(output.lines, vec!["kept"]);
        assert!(output.succeeded());
        assert!(compiler.is_alive());
    }

    #[cfg(unix)]
    #[test]
    fn test_exited_shell_reports_closed_channel()
    {
        let mut compiler = ShellCompiler::spawn(ShellFlavor::Posix, MARKER, None).unwrap();
        let request = CompileRequest {
            object_file: PathBuf::from("a.temp.obj"),
            script: "exit 0".to_string(),
        };
        let result = compiler.submit(&request);
        assert!(matches!(result, Err(LiveLinkError::ChannelClosed) | Err(LiveLinkError::Io(_))));
    }
}
