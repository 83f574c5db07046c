//! # Source Directory Watching
//!
//! One recursive `notify` watcher per source directory, all feeding a single
//! channel. The orchestrator pulls changes out as per-directory batches and
//! re-arms the directory when it has handled a batch.
//!
//! A batch is bounded by a byte budget sized like the buffer a native
//! directory-change read would use; notifications that don't fit stay queued
//! for the next batch.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use notify::event::{MetadataKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tracing::{debug, warn};

use crate::error::{LiveLinkError, Result};

/// Fixed part of a native change record (next offset, action, name length)
const NOTIFICATION_HEADER_SIZE: usize = 12;

type TaggedEvent = (usize, notify::Result<Event>);

/// Paths that changed under one watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch
{
    pub directory: PathBuf,
    /// Changed files, deduplicated, in arrival order
    pub paths: Vec<PathBuf>,
}

/// Stream of file change batches
pub trait ChangeSource
{
    /// Wait up to `timeout` for the next batch.
    ///
    /// `Ok(None)` means nothing arrived in time.
    fn wait(&mut self, timeout: Duration) -> Result<Option<ChangeBatch>>;

    /// Ready `directory` for its next batch once the current one is handled.
    fn rearm(&mut self, directory: &Path) -> Result<()>;
}

/// Watch state for one source directory
pub struct WatchContext
{
    directory: PathBuf,
    _watcher: RecommendedWatcher,
    budget: usize,
}

impl WatchContext
{
    #[must_use]
    pub fn directory(&self) -> &Path
    {
        &self.directory
    }
}

/// [`ChangeSource`] over recursive `notify` watchers
pub struct DirectoryWatcher
{
    contexts: Vec<WatchContext>,
    sender: Sender<TaggedEvent>,
    receiver: Receiver<TaggedEvent>,
    pending: VecDeque<(usize, Event)>,
    buffer_size: usize,
}

impl DirectoryWatcher
{
    /// Start watching every directory in `directories`.
    ///
    /// ## Errors
    ///
    /// - `Watch`: a directory could not be watched (missing, permissions,
    ///   out of watch handles)
    pub fn new<I, P>(directories: I, buffer_size: usize) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let (sender, receiver) = mpsc::channel();
        let mut watcher = Self {
            contexts: Vec::new(),
            sender,
            receiver,
            pending: VecDeque::new(),
            buffer_size,
        };
        for directory in directories {
            watcher.add_directory(directory.as_ref())?;
        }
        Ok(watcher)
    }

    fn add_directory(&mut self, directory: &Path) -> Result<()>
    {
        let index = self.contexts.len();
        let sender = self.sender.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = sender.send((index, res));
            },
            Config::default(),
        )?;
        watcher
            .watch(directory, RecursiveMode::Recursive)
            .map_err(|err| LiveLinkError::Watch(format!("{}: {err}", directory.display())))?;

        debug!("Watching {} for changes", directory.display());
        self.contexts.push(WatchContext {
            directory: directory.to_path_buf(),
            _watcher: watcher,
            budget: self.buffer_size,
        });
        Ok(())
    }

    #[must_use]
    pub fn contexts(&self) -> &[WatchContext]
    {
        &self.contexts
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<(usize, Event)>>
    {
        if let Some(queued) = self.pending.pop_front() {
            return Ok(Some(queued));
        }
        loop {
            let (index, result) = match self.receiver.recv_timeout(timeout) {
                Ok(tagged) => tagged,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(LiveLinkError::Watch("change notification channel closed".to_string()))
                }
            };
            match result {
                Ok(event) => return Ok(Some((index, event))),
                // Overflow and similar errors lose events but the watch stays usable
                Err(err) => warn!("Change notification error: {}", err),
            }
        }
    }

    /// Add the event's changed paths while the budget lasts. Returns the
    /// part of the event that did not fit.
    fn add_to_batch(&mut self, index: usize, event: Event, batch: &mut ChangeBatch) -> Option<Event>
    {
        let context = &mut self.contexts[index];
        let changed = changed_paths(&event);
        for (position, path) in changed.iter().enumerate() {
            if batch.paths.contains(path) {
                continue;
            }
            let cost = notification_cost(path.strip_prefix(&context.directory).unwrap_or(path));
            if cost > context.budget && !batch.paths.is_empty() {
                let mut rest = event;
                rest.paths = changed[position..].to_vec();
                return Some(rest);
            }
            context.budget = context.budget.saturating_sub(cost);
            batch.paths.push(path.clone());
        }
        None
    }
}

impl ChangeSource for DirectoryWatcher
{
    fn wait(&mut self, timeout: Duration) -> Result<Option<ChangeBatch>>
    {
        let Some((index, event)) = self.next_event(timeout)? else {
            return Ok(None);
        };

        let mut batch = ChangeBatch {
            directory: self.contexts[index].directory.clone(),
            paths: Vec::new(),
        };
        let mut full = false;
        if let Some(rest) = self.add_to_batch(index, event, &mut batch) {
            full = true;
            self.pending.push_front((index, rest));
        }

        // Collect whatever else is already waiting for this directory
        let mut deferred = VecDeque::new();
        let queued: Vec<(usize, Event)> = self.pending.drain(..).collect();
        let arrived = std::iter::from_fn(|| self.receiver.try_recv().ok()).filter_map(|(i, res)| match res {
            Ok(event) => Some((i, event)),
            Err(err) => {
                warn!("Change notification error: {}", err);
                None
            }
        });
        let candidates: Vec<(usize, Event)> = queued.into_iter().chain(arrived).collect();
        for (other, event) in candidates {
            if full || other != index {
                deferred.push_back((other, event));
            } else if let Some(rest) = self.add_to_batch(other, event, &mut batch) {
                full = true;
                deferred.push_back((other, rest));
            }
        }
        self.pending = deferred;

        if batch.paths.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }

    fn rearm(&mut self, directory: &Path) -> Result<()>
    {
        let context = self
            .contexts
            .iter_mut()
            .find(|context| context.directory == directory)
            .ok_or_else(|| LiveLinkError::Watch(format!("{} is not being watched", directory.display())))?;

        if !context.directory.is_dir() {
            return Err(LiveLinkError::Watch(format!("{} no longer exists", directory.display())));
        }
        context.budget = self.buffer_size;
        Ok(())
    }
}

/// Files an event reports as created, renamed into place, or rewritten.
///
/// Access, removal and attribute-only events produce nothing.
#[must_use]
pub fn changed_paths(event: &Event) -> Vec<PathBuf>
{
    match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths.clone(),
        // Old and new name; only the new one has content
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last().cloned().into_iter().collect(),
        _ => Vec::new(),
    }
}

/// Bytes a change record for `relative` takes in a native notification
/// buffer: header plus UTF-16 name, rounded up to 4.
#[must_use]
pub fn notification_cost(relative: &Path) -> usize
{
    let name_bytes = relative.to_string_lossy().encode_utf16().count() * 2;
    (NOTIFICATION_HEADER_SIZE + name_bytes).next_multiple_of(4)
}

#[cfg(test)]
mod tests
{
    use std::fs;
    use std::time::Instant;

    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};

    use super::*;

    fn event(kind: EventKind, paths: &[&Path]) -> Event
    {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(path.to_path_buf());
        }
        event
    }

    #[test]
    fn test_only_content_changes_are_reported()
    {
        let file = Path::new("/p/a.cpp");
        let create = event(EventKind::Create(CreateKind::File), &[file]);
        let write = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[file]);
        let access = event(EventKind::Access(AccessKind::Any), &[file]);
        let remove = event(EventKind::Remove(RemoveKind::File), &[file]);
        let chmod = event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), &[file]);

        assert_eq!(changed_paths(&create), vec![file.to_path_buf()]);
        assert_eq!(changed_paths(&write), vec![file.to_path_buf()]);
        assert!(changed_paths(&access).is_empty());
        assert!(changed_paths(&remove).is_empty());
        assert!(changed_paths(&chmod).is_empty());
    }

    #[test]
    fn test_rename_reports_new_name()
    {
        let rename = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &[Path::new("/p/a.cpp~"), Path::new("/p/a.cpp")],
        );
        assert_eq!(changed_paths(&rename), vec![PathBuf::from("/p/a.cpp")]);
    }

    #[test]
    fn test_notification_cost_is_aligned()
    {
        // 12 + 2 * 5 = 22 -> 24
        assert_eq!(notification_cost(Path::new("a.cpp")), 24);
        // 12 + 2 * 6 = 24
        assert_eq!(notification_cost(Path::new("ab.cpp")), 24);
    }

    fn inject(watcher: &DirectoryWatcher, index: usize, path: &Path)
    {
        let write = event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &[path]);
        watcher.sender.send((index, Ok(write))).unwrap();
    }

    #[test]
    fn test_batches_split_by_directory_and_budget()
    {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        // Room for two 24-byte records per batch
        let mut watcher = DirectoryWatcher::new([first.path(), second.path()], 48).unwrap();

        let a = first.path().join("a.cpp");
        let b = first.path().join("b.cpp");
        let c = first.path().join("c.cpp");
        let x = second.path().join("x.cpp");
        inject(&watcher, 0, &a);
        inject(&watcher, 1, &x);
        inject(&watcher, 0, &a);
        inject(&watcher, 0, &b);
        inject(&watcher, 0, &c);

        let timeout = Duration::from_millis(200);
        let batch = watcher.wait(timeout).unwrap().unwrap();
        assert_eq!(batch.directory, first.path());
        assert_eq!(batch.paths, vec![a.clone(), b.clone()]);
        watcher.rearm(first.path()).unwrap();

        // Deferred events come back in arrival order
        let batch = watcher.wait(timeout).unwrap().unwrap();
        assert_eq!(batch.directory, second.path());
        assert_eq!(batch.paths, vec![x]);

        let batch = watcher.wait(timeout).unwrap().unwrap();
        assert_eq!(batch.paths, vec![c]);
    }

    #[test]
    fn test_event_split_across_batches_defers_only_the_rest()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new([dir.path()], 48).unwrap();

        let a = dir.path().join("a.cpp");
        let b = dir.path().join("b.cpp");
        let c = dir.path().join("c.cpp");
        let create = event(EventKind::Create(CreateKind::File), &[a.as_path(), b.as_path(), c.as_path()]);
        watcher.sender.send((0, Ok(create))).unwrap();

        let timeout = Duration::from_millis(200);
        let batch = watcher.wait(timeout).unwrap().unwrap();
        assert_eq!(batch.paths, vec![a, b]);
        watcher.rearm(dir.path()).unwrap();

        let batch = watcher.wait(timeout).unwrap().unwrap();
        assert_eq!(batch.paths, vec![c]);
        watcher.rearm(dir.path()).unwrap();
        assert!(watcher.wait(Duration::from_millis(50)).unwrap().is_none());
    }

    #[test]
    fn test_rearm_unknown_directory_fails()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new([dir.path()], 4096).unwrap();
        assert!(matches!(watcher.rearm(Path::new("/not/watched")), Err(LiveLinkError::Watch(_))));
    }

    #[test]
    fn test_missing_directory_cannot_be_watched()
    {
        let dir = tempfile::tempdir().unwrap();
        let result = DirectoryWatcher::new([dir.path().join("missing")], 4096);
        assert!(matches!(result, Err(LiveLinkError::Watch(_))));
    }

    #[test]
    fn test_file_write_is_observed()
    {
        let dir = tempfile::tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new([dir.path()], 4096).unwrap();
        let file = dir.path().join("main.cpp");
        fs::write(&file, b"int main() { return 0; }\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = false;
        while !seen && Instant::now() < deadline {
            if let Some(batch) = watcher.wait(Duration::from_millis(250)).unwrap() {
                seen = batch.paths.iter().any(|path| path.file_name() == file.file_name());
                watcher.rearm(&batch.directory).unwrap();
            }
        }
        assert!(seen);
    }
}
