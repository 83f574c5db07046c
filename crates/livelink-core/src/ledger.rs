//! # Modification Ledger
//!
//! Editors tend to write a file several times per save (truncate, write,
//! touch attributes), and every write shows up as a change notification. The
//! ledger remembers when each path last triggered a build and suppresses
//! repeats inside the debounce window.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::paths::normalize_key;

/// Millisecond timestamp from a 32-bit wrapping monotonic counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tick(pub u32);

impl Tick
{
    /// Signed milliseconds from `earlier` to `self`, correct across wraparound
    /// as long as the real distance is under ~24 days.
    #[must_use]
    pub fn since(self, earlier: Tick) -> i32
    {
        self.0.wrapping_sub(earlier.0) as i32
    }
}

impl From<u32> for Tick
{
    fn from(millis: u32) -> Self
    {
        Tick(millis)
    }
}

/// Source of [`Tick`]s relative to when the clock was created
#[derive(Debug, Clone, Copy)]
pub struct TickClock
{
    start: Instant,
}

impl TickClock
{
    #[must_use]
    pub fn new() -> Self
    {
        Self { start: Instant::now() }
    }

    #[must_use]
    pub fn now(&self) -> Tick
    {
        // Truncation is the wraparound
        Tick(self.start.elapsed().as_millis() as u32)
    }
}

impl Default for TickClock
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Last trigger time per path (case-insensitive)
#[derive(Debug, Clone)]
pub struct ModificationLedger
{
    window: u32,
    last_trigger: HashMap<String, Tick>,
}

impl ModificationLedger
{
    #[must_use]
    pub fn new(debounce: Duration) -> Self
    {
        Self {
            window: u32::try_from(debounce.as_millis()).unwrap_or(u32::MAX),
            last_trigger: HashMap::new(),
        }
    }

    /// Decide whether a change to `path` at `now` should start a build.
    ///
    /// Records `now` as the path's trigger time when it does. A change is
    /// suppressed when the previous trigger lies less than the window before
    /// `now`.
    pub fn should_dispatch(&mut self, path: &Path, now: Tick) -> bool
    {
        let key = normalize_key(path);
        if let Some(last) = self.last_trigger.get(&key) {
            let elapsed = now.since(*last);
            if (0..self.window as i64).contains(&i64::from(elapsed)) {
                return false;
            }
        }
        self.last_trigger.insert(key, now);
        true
    }

    #[must_use]
    pub fn last_trigger(&self, path: &Path) -> Option<Tick>
    {
        self.last_trigger.get(&normalize_key(path)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.last_trigger.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.last_trigger.is_empty()
    }
}
