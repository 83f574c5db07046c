//! # Source Paths
//!
//! Lookup from a changed file back to the module that compiled it, and the
//! set of directories worth watching.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Position of a source file in the per-module source lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation
{
    /// Module index (same index as the object file list)
    pub module: usize,
    /// Index within that module's source list
    pub file: usize,
}

/// Case-insensitive, separator-agnostic map from source path to module.
///
/// A header included by many translation units appears in many modules; the
/// first module to mention a path owns it.
#[derive(Debug, Clone, Default)]
pub struct SourceFileIndex
{
    entries: HashMap<String, SourceLocation>,
}

impl SourceFileIndex
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record `path` unless an earlier module already claimed it.
    ///
    /// Returns `true` when the entry was added.
    pub fn insert(&mut self, path: &Path, location: SourceLocation) -> bool
    {
        let key = normalize_key(path);
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, location);
        true
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<SourceLocation>
    {
        self.entries.get(&normalize_key(path)).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }
}

/// Lowercase the path and unify separators so `C:\Proj\A.cpp` and
/// `c:/proj/a.cpp` hit the same entry.
#[must_use]
pub fn normalize_key(path: &Path) -> String
{
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// Directories to watch, with no entry nested inside another.
///
/// Inserting a directory that shares a named ancestor with an existing entry
/// widens that entry to the ancestor. Directories whose only shared prefix is
/// a root or drive stay separate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDirectorySet
{
    directories: Vec<PathBuf>,
}

impl SourceDirectorySet
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Add `directory`, collapsing it into an existing entry where possible.
    ///
    /// Returns `true` when the set changed.
    pub fn insert(&mut self, directory: impl AsRef<Path>) -> bool
    {
        let directory = directory.as_ref();
        if !has_named_component(directory) {
            return false;
        }
        if self.directories.iter().any(|existing| directory.starts_with(existing)) {
            return false;
        }

        for index in 0..self.directories.len() {
            let ancestor = common_ancestor(&self.directories[index], directory);
            if has_named_component(&ancestor) {
                self.directories[index] = ancestor;
                self.remove_nested(index);
                return true;
            }
        }

        self.directories.push(directory.to_path_buf());
        true
    }

    // Drop entries that now live under the entry at `keep`
    fn remove_nested(&mut self, keep: usize)
    {
        let root = self.directories[keep].clone();
        let mut index = 0;
        self.directories.retain(|candidate| {
            let nested = index != keep && candidate.starts_with(&root);
            index += 1;
            !nested
        });
    }

    #[must_use]
    pub fn contains(&self, directory: &Path) -> bool
    {
        self.directories.iter().any(|existing| existing == directory)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathBuf>
    {
        self.directories.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.directories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.directories.is_empty()
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<PathBuf>
    {
        self.directories
    }
}

impl<'a> IntoIterator for &'a SourceDirectorySet
{
    type Item = &'a PathBuf;
    type IntoIter = std::slice::Iter<'a, PathBuf>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

/// Longest shared component prefix of two paths.
#[must_use]
pub fn common_ancestor(a: &Path, b: &Path) -> PathBuf
{
    a.components()
        .zip(b.components())
        .take_while(|(left, right)| left == right)
        .map(|(component, _)| component)
        .collect()
}

fn has_named_component(path: &Path) -> bool
{
    path.components().any(|component| matches!(component, Component::Normal(_)))
}

/// Does `path` carry one of `extensions` (compared case-insensitively)?
#[must_use]
pub fn has_source_extension(path: &Path, extensions: &[String]) -> bool
{
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|accepted| accepted.eq_ignore_ascii_case(ext)))
}
