//! Symbol table shared by discovery, the host callbacks and the linker.

use std::collections::hash_map::{self, HashMap};

use super::Address;

/// Name → address map of everything the running image can reach
///
/// Insertion is last-write-wins: the image's own debug database is read
/// first, then every imported module's import slots and debug database, and
/// a later source for the same name replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable
{
    symbols: HashMap<String, Address>,
}

impl SymbolTable
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Insert or overwrite a symbol, returning the address it replaced.
    pub fn insert(&mut self, name: impl Into<String>, address: Address) -> Option<Address>
    {
        self.symbols.insert(name.into(), address)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Address>
    {
        self.symbols.get(name).copied()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool
    {
        self.symbols.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize
    {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Address>
    {
        self.symbols.iter()
    }
}

impl Extend<(String, Address)> for SymbolTable
{
    fn extend<T: IntoIterator<Item = (String, Address)>>(&mut self, iter: T)
    {
        for (name, address) in iter {
            self.insert(name, address);
        }
    }
}

impl<'a> IntoIterator for &'a SymbolTable
{
    type Item = (&'a String, &'a Address);
    type IntoIter = hash_map::Iter<'a, String, Address>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.iter()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_later_insert_wins()
    {
        let mut table = SymbolTable::new();
        assert_eq!(table.insert("main", Address::new(0x1000)), None);
        assert_eq!(table.insert("main", Address::new(0x2000)), Some(Address::new(0x1000)));
        assert_eq!(table.get("main"), Some(Address::new(0x2000)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_extend_keeps_last_duplicate()
    {
        let mut table = SymbolTable::new();
        table.extend(vec![
            ("a".to_string(), Address::new(1)),
            ("b".to_string(), Address::new(2)),
            ("a".to_string(), Address::new(3)),
        ]);
        assert_eq!(table.get("a"), Some(Address::new(3)));
        assert_eq!(table.get("b"), Some(Address::new(2)));
        assert!(!table.contains("c"));
    }
}
