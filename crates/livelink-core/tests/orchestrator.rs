//! End-to-end tests for the rebuild loop with scripted collaborators

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use livelink_core::compiler::{CompileRequest, CompilerChannel, CompilerOutput};
use livelink_core::error::Result;
use livelink_core::orchestrator::{LoopState, StopReason};
use livelink_core::shell::ShellFlavor;
use livelink_core::watch::{ChangeBatch, ChangeSource};
use livelink_core::{BuildMetadata, HostCallbacks, HostMonitor, LiveLinkConfig, Linker, Orchestrator, SymbolTable};

type Log = Rc<RefCell<Vec<String>>>;

/// Writes the requested object and reports a fixed exit code
struct ScriptedCompiler
{
    exit_code: i32,
    alive: bool,
    log: Log,
}

impl CompilerChannel for ScriptedCompiler
{
    fn submit(&mut self, request: &CompileRequest) -> Result<CompilerOutput>
    {
        fs::write(&request.object_file, b"object")?;
        self.log
            .borrow_mut()
            .push(format!("compile {}", request.object_file.display()));
        Ok(CompilerOutput {
            lines: vec!["x.cpp".to_string()],
            exit_code: self.exit_code,
        })
    }

    fn is_alive(&mut self) -> bool
    {
        self.alive
    }
}

struct RecordingLinker
{
    log: Log,
    saw_object: bool,
    succeeds: bool,
}

impl Linker for RecordingLinker
{
    fn link(&mut self, object_file: &Path) -> bool
    {
        self.saw_object = object_file.exists();
        self.log.borrow_mut().push(format!("link {}", object_file.display()));
        self.succeeds
    }
}

struct RecordingCallbacks
{
    log: Log,
}

impl HostCallbacks for RecordingCallbacks
{
    fn before_link(&mut self, _symbols: &SymbolTable, source: &Path)
    {
        self.log.borrow_mut().push(format!("before {}", source.display()));
    }

    fn after_link(&mut self, _symbols: &SymbolTable, source: &Path, success: bool)
    {
        self.log
            .borrow_mut()
            .push(format!("after {} {success}", source.display()));
    }
}

#[derive(Default)]
struct ScriptedSource
{
    batches: VecDeque<ChangeBatch>,
    rearmed: Vec<PathBuf>,
}

impl ChangeSource for ScriptedSource
{
    fn wait(&mut self, _timeout: Duration) -> Result<Option<ChangeBatch>>
    {
        Ok(self.batches.pop_front())
    }

    fn rearm(&mut self, directory: &Path) -> Result<()>
    {
        self.rearmed.push(directory.to_path_buf());
        Ok(())
    }
}

/// Alive for a fixed number of checks
struct CountdownHost
{
    remaining: Cell<usize>,
}

impl HostMonitor for CountdownHost
{
    fn is_alive(&self) -> bool
    {
        let remaining = self.remaining.get();
        self.remaining.set(remaining.saturating_sub(1));
        remaining > 0
    }
}

struct Scenario
{
    dir: tempfile::TempDir,
    source: PathBuf,
    object: PathBuf,
    log: Log,
}

fn scenario() -> Scenario
{
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("x.cpp");
    fs::write(&source, b"int x() { return 1; }").unwrap();
    let object = dir.path().join("x.temp.obj");
    Scenario {
        dir,
        source,
        object,
        log: Rc::new(RefCell::new(Vec::new())),
    }
}

fn config() -> LiveLinkConfig
{
    LiveLinkConfig::default()
        .with_settle_delay(Duration::ZERO)
        .with_shell(ShellFlavor::Posix)
}

fn batch(scenario: &Scenario, paths: &[&Path]) -> ScriptedSource
{
    let mut source = ScriptedSource::default();
    source.batches.push_back(ChangeBatch {
        directory: scenario.dir.path().to_path_buf(),
        paths: paths.iter().map(|path| path.to_path_buf()).collect(),
    });
    source
}

#[test]
fn test_successful_compile_is_relinked()
{
    let scenario = scenario();
    let compiler = ScriptedCompiler {
        exit_code: 0,
        alive: true,
        log: scenario.log.clone(),
    };
    let linker = RecordingLinker {
        log: scenario.log.clone(),
        saw_object: false,
        succeeds: true,
    };
    let callbacks = RecordingCallbacks {
        log: scenario.log.clone(),
    };
    let mut orchestrator = Orchestrator::new(BuildMetadata::default(), config(), compiler, linker, callbacks);

    let header = scenario.dir.path().join("x.h");
    let mut source = batch(&scenario, &[&scenario.source, &header]);
    let host = CountdownHost {
        remaining: Cell::new(3),
    };
    let summary = orchestrator.run(&mut source, &host);

    assert_eq!(
        *scenario.log.borrow(),
        vec![
            format!("compile {}", scenario.object.display()),
            format!("before {}", scenario.source.display()),
            format!("link {}", scenario.object.display()),
            format!("after {} true", scenario.source.display()),
        ]
    );
    assert!(orchestrator.linker().saw_object);
    assert!(!scenario.object.exists());
    assert!(scenario.source.exists());

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.links, 1);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.stop_reason, Some(StopReason::HostExited));
    assert_eq!(source.rearmed, vec![scenario.dir.path().to_path_buf()]);
    assert_eq!(orchestrator.state(), LoopState::Stopped);
}

#[test]
fn test_failed_compile_skips_linking()
{
    let scenario = scenario();
    let compiler = ScriptedCompiler {
        exit_code: 2,
        alive: true,
        log: scenario.log.clone(),
    };
    let linker = RecordingLinker {
        log: scenario.log.clone(),
        saw_object: false,
        succeeds: true,
    };
    let callbacks = RecordingCallbacks {
        log: scenario.log.clone(),
    };
    let mut orchestrator = Orchestrator::new(BuildMetadata::default(), config(), compiler, linker, callbacks);

    let mut source = batch(&scenario, &[&scenario.source]);
    let host = CountdownHost {
        remaining: Cell::new(2),
    };
    let summary = orchestrator.run(&mut source, &host);

    assert_eq!(
        *scenario.log.borrow(),
        vec![format!("compile {}", scenario.object.display())]
    );
    assert!(!scenario.object.exists());
    assert_eq!(summary.compile_failures, 1);
    assert_eq!(summary.links, 0);
    assert_eq!(source.rearmed.len(), 1);
}

#[test]
fn test_failed_link_still_releases_the_host()
{
    let scenario = scenario();
    let compiler = ScriptedCompiler {
        exit_code: 0,
        alive: true,
        log: scenario.log.clone(),
    };
    let linker = RecordingLinker {
        log: scenario.log.clone(),
        saw_object: false,
        succeeds: false,
    };
    let callbacks = RecordingCallbacks {
        log: scenario.log.clone(),
    };
    let mut orchestrator = Orchestrator::new(BuildMetadata::default(), config(), compiler, linker, callbacks);

    let mut source = batch(&scenario, &[&scenario.source]);
    let host = CountdownHost {
        remaining: Cell::new(2),
    };
    let summary = orchestrator.run(&mut source, &host);

    assert_eq!(
        *scenario.log.borrow(),
        vec![
            format!("compile {}", scenario.object.display()),
            format!("before {}", scenario.source.display()),
            format!("link {}", scenario.object.display()),
            format!("after {} false", scenario.source.display()),
        ]
    );
    assert!(orchestrator.linker().saw_object);
    assert!(!scenario.object.exists());
    assert_eq!(summary.link_failures, 1);
    assert_eq!(summary.links, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::HostExited));
}

#[test]
fn test_duplicate_notifications_build_once()
{
    let scenario = scenario();
    let compiler = ScriptedCompiler {
        exit_code: 0,
        alive: true,
        log: scenario.log.clone(),
    };
    let linker = RecordingLinker {
        log: scenario.log.clone(),
        saw_object: false,
        succeeds: true,
    };
    let callbacks = RecordingCallbacks {
        log: scenario.log.clone(),
    };
    let mut orchestrator = Orchestrator::new(BuildMetadata::default(), config(), compiler, linker, callbacks);

    let mut source = batch(&scenario, &[&scenario.source]);
    source.batches.push_back(ChangeBatch {
        directory: scenario.dir.path().to_path_buf(),
        paths: vec![scenario.source.clone()],
    });
    let host = CountdownHost {
        remaining: Cell::new(3),
    };
    let summary = orchestrator.run(&mut source, &host);

    assert_eq!(summary.batches, 2);
    assert_eq!(summary.links, 1);
    assert_eq!(summary.debounced, 1);
}

#[test]
fn test_dead_compiler_stops_the_loop()
{
    let scenario = scenario();
    let compiler = ScriptedCompiler {
        exit_code: 0,
        alive: false,
        log: scenario.log.clone(),
    };
    let linker = RecordingLinker {
        log: scenario.log.clone(),
        saw_object: false,
        succeeds: true,
    };
    let callbacks = RecordingCallbacks {
        log: scenario.log.clone(),
    };
    let mut orchestrator = Orchestrator::new(BuildMetadata::default(), config(), compiler, linker, callbacks);

    let mut source = batch(&scenario, &[&scenario.source]);
    let host = CountdownHost {
        remaining: Cell::new(10),
    };
    let summary = orchestrator.run(&mut source, &host);

    assert_eq!(summary.stop_reason, Some(StopReason::CompilerExited));
    assert_eq!(summary.batches, 0);
    assert!(scenario.log.borrow().is_empty());
}
