//! # Rebuild Orchestrator
//!
//! Turns change batches into compiles and compiles into relinks:
//!
//! ```text
//! Idle -> Dispatching -> AwaitingOutput -> Idle
//!   \__________________________________\__-> Stopped
//! ```
//!
//! One build is in flight at a time. Changes that arrive during a build are
//! picked up with the next batch.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::thread;

use tracing::{debug, error, info, warn};

use crate::cmdline::{build_compile_job, CompileJob};
use crate::compiler::{CompileRequest, CompilerChannel};
use crate::config::LiveLinkConfig;
use crate::discovery::BuildMetadata;
use crate::error::Result;
use crate::ledger::{ModificationLedger, Tick, TickClock};
use crate::linker::{HostCallbacks, HostMonitor, Linker};
use crate::paths::has_source_extension;
use crate::watch::{ChangeBatch, ChangeSource};

/// Where the loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState
{
    /// Waiting for changes
    Idle,
    /// Preparing a compile job
    Dispatching,
    /// Waiting for the compiler's completion line
    AwaitingOutput,
    /// Finished for good
    Stopped,
}

/// What happened to one changed path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome
{
    /// Not a source file
    Ignored,
    /// Already built within the debounce window
    Debounced,
    /// The compiler reported a non-zero exit code
    CompileFailed
    {
        exit_code: i32,
    },
    /// Compiled and handed to the linker
    Linked
    {
        success: bool,
    },
}

/// Why [`Orchestrator::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason
{
    CompilerExited,
    HostExited,
    ChangeSourceFailed(String),
    RearmFailed(String),
    CompilerFailed(String),
}

impl fmt::Display for StopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            StopReason::CompilerExited => write!(f, "compiler process exited"),
            StopReason::HostExited => write!(f, "host process exited"),
            StopReason::ChangeSourceFailed(reason) => write!(f, "change notifications failed: {reason}"),
            StopReason::RearmFailed(reason) => write!(f, "could not re-arm watch: {reason}"),
            StopReason::CompilerFailed(reason) => write!(f, "compiler channel failed: {reason}"),
        }
    }
}

/// Counters for a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary
{
    pub batches: usize,
    pub ignored: usize,
    pub debounced: usize,
    pub compile_failures: usize,
    pub links: usize,
    pub link_failures: usize,
    pub stop_reason: Option<StopReason>,
}

impl RunSummary
{
    fn record(&mut self, outcome: ChangeOutcome)
    {
        match outcome {
            ChangeOutcome::Ignored => self.ignored += 1,
            ChangeOutcome::Debounced => self.debounced += 1,
            ChangeOutcome::CompileFailed { .. } => self.compile_failures += 1,
            ChangeOutcome::Linked { success: true } => self.links += 1,
            ChangeOutcome::Linked { success: false } => self.link_failures += 1,
        }
    }
}

/// The watch/compile/relink loop and the state it owns
pub struct Orchestrator<C, L, H>
{
    metadata: BuildMetadata,
    config: LiveLinkConfig,
    compiler: C,
    linker: L,
    callbacks: H,
    ledger: ModificationLedger,
    clock: TickClock,
    state: LoopState,
}

impl<C, L, H> Orchestrator<C, L, H>
where
    C: CompilerChannel,
    L: Linker,
    H: HostCallbacks,
{
    pub fn new(metadata: BuildMetadata, config: LiveLinkConfig, compiler: C, linker: L, callbacks: H) -> Self
    {
        let ledger = ModificationLedger::new(config.debounce);
        Self {
            metadata,
            config,
            compiler,
            linker,
            callbacks,
            ledger,
            clock: TickClock::new(),
            state: LoopState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> LoopState
    {
        self.state
    }

    #[must_use]
    pub fn metadata(&self) -> &BuildMetadata
    {
        &self.metadata
    }

    #[must_use]
    pub fn ledger(&self) -> &ModificationLedger
    {
        &self.ledger
    }

    #[must_use]
    pub fn linker(&self) -> &L
    {
        &self.linker
    }

    /// Handle one changed path observed at `now`.
    ///
    /// ## Errors
    ///
    /// Only compiler channel failures are errors; the loop stops on them.
    /// Compile and link failures are outcomes.
    pub fn process_change(&mut self, path: &Path, now: Tick) -> Result<ChangeOutcome>
    {
        if !has_source_extension(path, &self.config.source_extensions) {
            debug!("Ignoring change to {}", path.display());
            return Ok(ChangeOutcome::Ignored);
        }
        if !self.ledger.should_dispatch(path, now) {
            debug!("Debounced change to {}", path.display());
            return Ok(ChangeOutcome::Debounced);
        }

        info!("Detected modification to {}", path.display());
        self.state = LoopState::Dispatching;
        // Let the editor finish writing
        if !self.config.settle_delay.is_zero() {
            thread::sleep(self.config.settle_delay);
        }

        let job = build_compile_job(path, &self.metadata, &self.config);
        let outcome = self.compile_and_link(&job);
        remove_temp_object(&job.object_file);

        self.state = match outcome {
            Ok(_) => LoopState::Idle,
            Err(_) => LoopState::Stopped,
        };
        outcome
    }

    fn compile_and_link(&mut self, job: &CompileJob) -> Result<ChangeOutcome>
    {
        let request = CompileRequest {
            object_file: job.object_file.clone(),
            script: job.script(self.config.shell),
        };

        self.state = LoopState::AwaitingOutput;
        let output = self.compiler.submit(&request)?;
        if !output.succeeded() {
            warn!(
                "Compiling {} failed with code {}",
                job.source_file.display(),
                output.exit_code
            );
            return Ok(ChangeOutcome::CompileFailed {
                exit_code: output.exit_code,
            });
        }

        self.callbacks.before_link(&self.metadata.symbols, &job.source_file);
        let success = self.linker.link(&job.object_file);
        self.callbacks
            .after_link(&self.metadata.symbols, &job.source_file, success);

        if success {
            info!("Relinked {}", job.source_file.display());
        } else {
            warn!("Linking {} failed", job.object_file.display());
        }
        Ok(ChangeOutcome::Linked { success })
    }

    /// Handle every path of a batch, in order.
    pub fn process_batch(&mut self, batch: &ChangeBatch) -> Result<Vec<ChangeOutcome>>
    {
        let mut outcomes = Vec::with_capacity(batch.paths.len());
        for path in &batch.paths {
            let now = self.clock.now();
            outcomes.push(self.process_change(path, now)?);
        }
        Ok(outcomes)
    }

    /// Run until the compiler or the host goes away, or watching fails.
    pub fn run(&mut self, source: &mut impl ChangeSource, host: &impl HostMonitor) -> RunSummary
    {
        let mut summary = RunSummary::default();
        let reason = loop {
            if !self.compiler.is_alive() {
                break StopReason::CompilerExited;
            }
            if !host.is_alive() {
                break StopReason::HostExited;
            }

            let batch = match source.wait(self.config.poll_interval) {
                Ok(Some(batch)) => batch,
                Ok(None) => continue,
                Err(err) => break StopReason::ChangeSourceFailed(err.to_string()),
            };
            summary.batches += 1;

            match self.process_batch(&batch) {
                Ok(outcomes) => outcomes.into_iter().for_each(|outcome| summary.record(outcome)),
                Err(err) => break StopReason::CompilerFailed(err.to_string()),
            }

            if let Err(err) = source.rearm(&batch.directory) {
                break StopReason::RearmFailed(err.to_string());
            }
        };

        match reason {
            StopReason::HostExited => info!("Stopping: {}", reason),
            _ => error!("Stopping: {}", reason),
        }
        self.state = LoopState::Stopped;
        summary.stop_reason = Some(reason);
        summary
    }
}

fn remove_temp_object(path: &Path)
{
    match fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Could not remove {}: {}", path.display(), err),
    }
}

#[cfg(test)]
mod tests
{
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::compiler::CompilerOutput;
    use crate::linker::NoCallbacks;

    #[derive(Default)]
    struct CountingCompiler
    {
        submitted: Vec<CompileRequest>,
    }

    impl CompilerChannel for CountingCompiler
    {
        fn submit(&mut self, request: &CompileRequest) -> Result<CompilerOutput>
        {
            self.submitted.push(request.clone());
            Ok(CompilerOutput::default())
        }

        fn is_alive(&mut self) -> bool
        {
            true
        }
    }

    struct FailingLinker;

    impl Linker for FailingLinker
    {
        fn link(&mut self, _object_file: &Path) -> bool
        {
            false
        }
    }

    fn orchestrator() -> Orchestrator<CountingCompiler, FailingLinker, NoCallbacks>
    {
        let config = LiveLinkConfig::default().with_settle_delay(Duration::ZERO);
        Orchestrator::new(
            BuildMetadata::default(),
            config,
            CountingCompiler::default(),
            FailingLinker,
            NoCallbacks,
        )
    }

    #[test]
    fn test_non_source_changes_are_ignored()
    {
        let mut orchestrator = orchestrator();
        for path in ["/proj/src/x.h", "/proj/src/x.obj", "/proj/src/notes"] {
            let outcome = orchestrator.process_change(Path::new(path), Tick(0)).unwrap();
            assert_eq!(outcome, ChangeOutcome::Ignored);
        }
        assert!(orchestrator.ledger().is_empty());
        assert!(orchestrator.compiler.submitted.is_empty());
    }

    #[test]
    fn test_repeated_changes_are_debounced()
    {
        let mut orchestrator = orchestrator();
        let source = PathBuf::from("/proj/src/x.cpp");

        let first = orchestrator.process_change(&source, Tick(1_000)).unwrap();
        assert_eq!(first, ChangeOutcome::Linked { success: false });
        let again = orchestrator.process_change(Path::new("/PROJ/SRC/X.CPP"), Tick(2_500)).unwrap();
        assert_eq!(again, ChangeOutcome::Debounced);
        let later = orchestrator.process_change(&source, Tick(4_000)).unwrap();
        assert_eq!(later, ChangeOutcome::Linked { success: false });

        assert_eq!(orchestrator.compiler.submitted.len(), 2);
        assert_eq!(orchestrator.state(), LoopState::Idle);
    }

    #[test]
    fn test_request_targets_temp_object()
    {
        let mut orchestrator = orchestrator();
        orchestrator.process_change(Path::new("/proj/src/x.cc"), Tick(0)).unwrap();

        let request = &orchestrator.compiler.submitted[0];
        assert_eq!(request.object_file, PathBuf::from("/proj/src/x.temp.obj"));
        assert!(request.script.contains("/Fo\"/proj/src/x.temp.obj\""));
    }

    #[test]
    fn test_summary_counts_outcomes()
    {
        let mut summary = RunSummary::default();
        summary.record(ChangeOutcome::Ignored);
        summary.record(ChangeOutcome::Linked { success: true });
        summary.record(ChangeOutcome::Linked { success: false });
        summary.record(ChangeOutcome::CompileFailed { exit_code: 2 });
        assert_eq!((summary.ignored, summary.links, summary.link_failures), (1, 1, 1));
        assert_eq!(summary.compile_failures, 1);
    }
}
