//! # Configuration
//!
//! Knobs for discovery and the rebuild loop. Defaults match what an MSVC
//! debug build of a console program needs; [`LiveLinkConfig::from_env`]
//! overlays `LIVELINK_*` environment variables.

use std::time::Duration;

use crate::error::{LiveLinkError, Result};
use crate::shell::ShellFlavor;

/// Compiler invocation used when a source file's original command line
/// cannot be recovered from its object file
pub const DEFAULT_FALLBACK_COMMAND: &str = r#"cl.exe /c /ZI /JMC /nologo /W3 /WX- /diagnostics:column /sdl /Od /D _DEBUG /D _CONSOLE /D _CRT_OBSOLETE_NO_WARNINGS /D _UNICODE /D UNICODE /Gm- /EHsc /RTC1 /MDd /GS /fp:precise /Zc:wchar_t /Zc:forScope /Zc:inline /permissive- /Fo"x64\Debug\\" /Fd"x64\Debug\vc143.pdb" /external:W3 /Gd /TP /FC /errorReport:prompt"#;

/// Prefix of the line the shell prints when a compile finishes
pub const DEFAULT_COMPLETION_MARKER: &str = "Finished compiling";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveLinkConfig
{
    /// Extensions (without dot) of translation units, for discovery and for
    /// deciding which changes trigger a build
    pub source_extensions: Vec<String>,
    /// Changes to the same file inside this window only build once
    pub debounce: Duration,
    /// How long to wait for change notifications before re-checking liveness
    pub poll_interval: Duration,
    /// Pause after a change before reading the file, so the editor can finish writing
    pub settle_delay: Duration,
    /// Notification bytes accepted per directory batch
    pub notify_buffer_size: usize,
    /// Replaces the source extension to name the temporary object file
    pub temp_object_suffix: String,
    pub fallback_command: String,
    pub shell: ShellFlavor,
    pub completion_marker: String,
    /// Host function called before relinking (`void(const char*)`)
    pub sync_symbol: String,
    /// Host function called after relinking (`void(const char*, bool)`)
    pub release_symbol: String,
}

impl Default for LiveLinkConfig
{
    fn default() -> Self
    {
        Self {
            source_extensions: ["c", "cc", "cpp", "cxx"].iter().map(|ext| (*ext).to_string()).collect(),
            debounce: Duration::from_millis(3000),
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            notify_buffer_size: 4096,
            temp_object_suffix: "temp.obj".to_string(),
            fallback_command: DEFAULT_FALLBACK_COMMAND.to_string(),
            shell: ShellFlavor::native(),
            completion_marker: DEFAULT_COMPLETION_MARKER.to_string(),
            sync_symbol: "__blink_sync".to_string(),
            release_symbol: "__blink_release".to_string(),
        }
    }
}

impl LiveLinkConfig
{
    /// Defaults overlaid with `LIVELINK_*` environment variables.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `LIVELINK_EXTENSIONS` | `source_extensions` (comma separated) |
    /// | `LIVELINK_DEBOUNCE_MS` | `debounce` |
    /// | `LIVELINK_POLL_MS` | `poll_interval` |
    /// | `LIVELINK_SETTLE_MS` | `settle_delay` |
    /// | `LIVELINK_FALLBACK_COMMAND` | `fallback_command` |
    /// | `LIVELINK_SHELL` | `shell` (`cmd` or `posix`) |
    pub fn from_env() -> Result<Self>
    {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self>
    {
        let mut config = Self::default();

        if let Some(list) = lookup("LIVELINK_EXTENSIONS") {
            let extensions: Vec<String> = list
                .split(',')
                .map(|ext| ext.trim().trim_start_matches('.').to_string())
                .filter(|ext| !ext.is_empty())
                .collect();
            if extensions.is_empty() {
                return Err(LiveLinkError::InvalidConfig(
                    "LIVELINK_EXTENSIONS names no extensions".to_string(),
                ));
            }
            config.source_extensions = extensions;
        }
        if let Some(value) = lookup("LIVELINK_DEBOUNCE_MS") {
            config.debounce = parse_millis("LIVELINK_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = lookup("LIVELINK_POLL_MS") {
            config.poll_interval = parse_millis("LIVELINK_POLL_MS", &value)?;
        }
        if let Some(value) = lookup("LIVELINK_SETTLE_MS") {
            config.settle_delay = parse_millis("LIVELINK_SETTLE_MS", &value)?;
        }
        if let Some(command) = lookup("LIVELINK_FALLBACK_COMMAND") {
            config.fallback_command = command;
        }
        if let Some(shell) = lookup("LIVELINK_SHELL") {
            config.shell = shell.parse()?;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_source_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self
    {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self
    {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self
    {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn with_shell(mut self, shell: ShellFlavor) -> Self
    {
        self.shell = shell;
        self
    }

    #[must_use]
    pub fn with_fallback_command(mut self, command: impl Into<String>) -> Self
    {
        self.fallback_command = command.into();
        self
    }
}

fn parse_millis(name: &str, value: &str) -> Result<Duration>
{
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| LiveLinkError::InvalidConfig(format!("{name}={value}: {err}")))
}
