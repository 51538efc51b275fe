//! Engine string table
//!
//! `Slot::Str` carries a handle into this table. Literals and globals are
//! interned so repeated `const_str` executions reuse one entry and live for
//! the whole engine. Strings returned by externs are transient: the frame
//! that received one owns it and releases it on return or when a sweep finds
//! no register still holding it. Released handles are reused.

use crate::slot::StrHandle;
use fxhash::FxHashMap;
use viper_runtime::RtString;

#[derive(Debug)]
enum Entry {
    Interned(RtString),
    Transient(RtString),
    Free,
}

#[derive(Debug, Default)]
pub struct StringTable {
    entries: Vec<Entry>,
    interned: FxHashMap<String, StrHandle>,
    free: Vec<StrHandle>,
    transient: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for a literal, creating it on first use
    pub fn intern(&mut self, text: &str) -> StrHandle {
        if let Some(&handle) = self.interned.get(text) {
            return handle;
        }
        let handle = self.insert(Entry::Interned(RtString::new(text)));
        self.interned.insert(text.to_string(), handle);
        handle
    }

    /// Store a transient runtime string and return its handle
    pub fn push(&mut self, value: RtString) -> StrHandle {
        self.transient += 1;
        self.insert(Entry::Transient(value))
    }

    fn insert(&mut self, entry: Entry) -> StrHandle {
        match self.free.pop() {
            Some(handle) => {
                self.entries[handle as usize] = entry;
                handle
            }
            None => {
                self.entries.push(entry);
                (self.entries.len() - 1) as StrHandle
            }
        }
    }

    pub fn get(&self, handle: StrHandle) -> Option<&RtString> {
        match self.entries.get(handle as usize)? {
            Entry::Interned(s) | Entry::Transient(s) => Some(s),
            Entry::Free => None,
        }
    }

    /// Free a transient string. Interned handles are left alone.
    pub fn release(&mut self, handle: StrHandle) {
        if let Some(entry @ Entry::Transient(_)) = self.entries.get_mut(handle as usize) {
            *entry = Entry::Free;
            self.free.push(handle);
            self.transient -= 1;
        }
    }

    /// Free every transient string
    pub fn clear_transient(&mut self) {
        if self.transient == 0 {
            return;
        }
        for (handle, entry) in self.entries.iter_mut().enumerate() {
            if matches!(entry, Entry::Transient(_)) {
                *entry = Entry::Free;
                self.free.push(handle as StrHandle);
            }
        }
        self.transient = 0;
    }

    /// Live strings, interned and transient
    pub fn len(&self) -> usize {
        self.interned.len() + self.transient
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transient_len(&self) -> usize {
        self.transient
    }

    /// Entries ever allocated, live or free
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_reuses_handle() {
        let mut table = StringTable::new();
        let a = table.intern("hello");
        let b = table.intern("hello");
        let c = table.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(c).map(RtString::as_str), Some("world"));
    }

    #[test]
    fn test_push_is_not_interned() {
        let mut table = StringTable::new();
        let a = table.push(RtString::new("x"));
        let b = table.intern("x");
        assert_ne!(a, b);
        assert!(table.get(99).is_none());
    }

    #[test]
    fn test_release_reuses_slot() {
        let mut table = StringTable::new();
        let lit = table.intern("lit");
        let a = table.push(RtString::new("a"));
        table.release(a);
        assert!(table.get(a).is_none());
        let b = table.push(RtString::new("b"));
        assert_eq!(a, b);
        assert_eq!(table.capacity(), 2);

        table.release(lit);
        assert_eq!(table.get(lit).map(RtString::as_str), Some("lit"));
    }

    #[test]
    fn test_clear_transient_keeps_literals() {
        let mut table = StringTable::new();
        let lit = table.intern("lit");
        for i in 0..10 {
            table.push(RtString::from(i.to_string()));
        }
        assert_eq!(table.transient_len(), 10);
        table.clear_transient();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(lit).map(RtString::as_str), Some("lit"));
        table.push(RtString::new("again"));
        assert_eq!(table.capacity(), 11);
    }
}
