//! Process identifiers.

use std::fmt;

/// Process identifier (PID) of a host being reloaded
///
/// Used by [`ProcessHost`](crate::linker::ProcessHost) to notice when the
/// program whose sources are being watched has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId
{
    /// The identifier of the current process
    #[must_use]
    pub fn current() -> Self
    {
        ProcessId(std::process::id())
    }
}

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}
