//! Hash table keyed by interned strings.
//!
//! Open addressing with linear probing. Deleted entries leave a tombstone behind so that probe
//! sequences running through them stay intact. Since keys are always interned, comparing keys is
//! comparing handles.

use crate::{ObjRef, Value};

const TABLE_MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<ObjRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::Null,
    };

    const TOMBSTONE: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::Bool(true),
    };

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && matches!(self.value, Value::Bool(true))
    }
}

/// An open-addressed hash table from interned strings to values.
#[derive(Debug, Clone, Default)]
pub struct Table {
    // Occupied entries, tombstones included.
    count: usize,
    live: usize,
    entries: Vec<Entry>,
}

impl Table {
    /// Create an empty table. No memory is allocated until the first insertion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Return true if the table holds no live entry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Look up the value stored under the key.
    pub fn get(&self, key: ObjRef, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = &self.entries[find_entry(&self.entries, key, hash)];
        entry.key.map(|_| entry.value)
    }

    /// Return true if the key is present.
    pub fn contains(&self, key: ObjRef, hash: u32) -> bool {
        self.get(key, hash).is_some()
    }

    /// Store the value under the key, returning true if the key was not present before.
    pub fn set(&mut self, key: ObjRef, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            let capacity = (self.entries.len() * 2).max(TABLE_MIN_CAPACITY);
            self.adjust_capacity(capacity);
        }

        let index = find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // Reusing a tombstone does not change the count, it was already counted.
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        if is_new {
            self.live += 1;
        }
        is_new
    }

    /// Remove the key, returning true if it was present.
    pub fn delete(&mut self, key: ObjRef, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry::TOMBSTONE;
        self.live -= 1;
        true
    }

    /// Copy every entry of this table into another.
    pub fn add_all(&self, to: &mut Table) {
        for (key, hash, value) in self.iter() {
            to.set(key, hash, value);
        }
    }

    /// Find a key by content rather than identity. This is how the intern table looks up a
    /// string before it exists as an object. `matches` is only called on keys whose hash equals
    /// `hash`.
    pub fn find_str(&self, hash: u32, mut matches: impl FnMut(ObjRef) -> bool) -> Option<ObjRef> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if !entry.is_tombstone() => return None,
                Some(key) if entry.hash == hash && matches(key) => return Some(key),
                _ => {}
            }
            index = (index + 1) & mask;
        }
    }

    /// Iterate over the live entries as `(key, hash, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, u32, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|key| (key, e.hash, e.value)))
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let mut entries = vec![Entry::EMPTY; capacity];
        self.count = 0;
        for entry in self.entries.iter().filter(|e| e.key.is_some()) {
            if let Some(key) = entry.key {
                let index = find_entry(&entries, key, entry.hash);
                entries[index] = *entry;
                self.count += 1;
            }
        }
        self.entries = entries;
    }
}

/// Return the bucket holding the key, or the bucket where it should be inserted. The first
/// tombstone on the probe sequence is preferred over the empty bucket that ends it.
fn find_entry(entries: &[Entry], key: ObjRef, hash: u32) -> usize {
    let mask = entries.len() - 1;
    let mut index = hash as usize & mask;
    let mut tombstone = None;
    loop {
        let entry = &entries[index];
        match entry.key {
            Some(k) if k == key => return index,
            Some(_) => {}
            None if entry.is_tombstone() => {
                tombstone.get_or_insert(index);
            }
            None => return tombstone.unwrap_or(index),
        }
        index = (index + 1) & mask;
    }
}
