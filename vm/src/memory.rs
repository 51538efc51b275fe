//! Frame memory arena
//!
//! `alloca` bump-allocates from a single byte arena shared by the whole call
//! stack. Each frame remembers the arena length at entry and truncates back
//! to it when it returns or is discarded during unwind, so allocations live
//! exactly as long as the frame that made them.
//!
//! Addresses start at [`ARENA_BASE`] so that a null pointer never aliases a
//! live allocation.

use il::Type;

/// Address of the first arena byte
pub const ARENA_BASE: u64 = 0x1000;
/// Largest single `alloca`
pub const MAX_ALLOCATION: usize = 1 << 28;
/// Largest total arena size across the whole call stack
pub const MAX_ARENA: usize = 1 << 30;
const ALIGN: usize = 8;

/// Raised for null, dangling or out-of-bounds accesses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadAccess {
    pub addr: u64,
    pub size: usize,
}

#[derive(Debug)]
pub struct Arena {
    bytes: Vec<u8>,
    limit: usize,
}

impl Default for Arena {
    fn default() -> Self {
        Self::with_limit(MAX_ARENA)
    }
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena that refuses to grow past `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Current high-water mark; pass back to [`Arena::release`]
    pub fn mark(&self) -> usize {
        self.bytes.len()
    }

    /// Free everything allocated after `mark`
    pub fn release(&mut self, mark: usize) {
        self.bytes.truncate(mark);
    }

    /// Allocate `size` zeroed bytes, 8-byte aligned
    pub fn alloc(&mut self, size: usize) -> Option<u64> {
        if size > MAX_ALLOCATION {
            return None;
        }
        let start = (self.bytes.len() + ALIGN - 1) & !(ALIGN - 1);
        let aligned = (size + ALIGN - 1) & !(ALIGN - 1);
        let end = start + aligned.max(ALIGN);
        if end > self.limit {
            log::debug!("alloca of {} bytes would grow the arena past {} bytes", size, self.limit);
            return None;
        }
        self.bytes.resize(end, 0);
        Some(ARENA_BASE + start as u64)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, addr: u64, size: usize) -> Result<std::ops::Range<usize>, BadAccess> {
        let bad = BadAccess { addr, size };
        let offset = addr.checked_sub(ARENA_BASE).ok_or(bad)? as usize;
        let end = offset.checked_add(size).ok_or(bad)?;
        if end > self.bytes.len() {
            return Err(bad);
        }
        Ok(offset..end)
    }

    /// Load `ty` from `addr` as raw 64-bit payload bits
    pub fn load(&self, ty: Type, addr: u64) -> Result<i64, BadAccess> {
        let size = ty.size().max(1);
        let range = self.range(addr, size)?;
        let bytes = &self.bytes[range];
        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(bytes);
        let raw = i64::from_le_bytes(buf);
        Ok(match ty {
            Type::I1 => raw & 1,
            Type::I8 => raw as i8 as i64,
            Type::I16 => raw as i16 as i64,
            Type::I32 => raw as i32 as i64,
            _ => raw,
        })
    }

    /// Store the low `ty.size()` bytes of `bits` at `addr`
    pub fn store(&mut self, ty: Type, addr: u64, bits: i64) -> Result<(), BadAccess> {
        let size = ty.size().max(1);
        let range = self.range(addr, size)?;
        self.bytes[range].copy_from_slice(&bits.to_le_bytes()[..size]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_store_load() {
        let mut arena = Arena::new();
        let p = arena.alloc(16).unwrap();
        assert_eq!(p, ARENA_BASE);
        arena.store(Type::I64, p, -7).unwrap();
        arena.store(Type::I32, p + 8, -1).unwrap();
        assert_eq!(arena.load(Type::I64, p), Ok(-7));
        assert_eq!(arena.load(Type::I32, p + 8), Ok(-1));
        assert_eq!(arena.load(Type::I8, p + 8), Ok(-1));
    }

    #[test]
    fn test_null_and_out_of_bounds() {
        let mut arena = Arena::new();
        let p = arena.alloc(8).unwrap();
        assert!(arena.load(Type::I64, 0).is_err());
        assert!(arena.load(Type::I64, p + 4).is_err());
        assert!(arena.store(Type::I64, p + 8, 1).is_err());
    }

    #[test]
    fn test_release_invalidates() {
        let mut arena = Arena::new();
        let mark = arena.mark();
        let p = arena.alloc(24).unwrap();
        assert!(arena.load(Type::I64, p + 16).is_ok());
        arena.release(mark);
        assert!(arena.is_empty());
        assert!(arena.load(Type::I64, p).is_err());
    }

    #[test]
    fn test_alignment() {
        let mut arena = Arena::new();
        let a = arena.alloc(1).unwrap();
        let b = arena.alloc(3).unwrap();
        assert_eq!(a % 8, 0);
        assert_eq!(b - a, 8);
        assert!(arena.alloc(MAX_ALLOCATION + 1).is_none());
    }

    #[test]
    fn test_total_size_is_capped() {
        let mut arena = Arena::with_limit(64);
        let mark = arena.mark();
        assert!(arena.alloc(32).is_some());
        assert!(arena.alloc(32).is_some());
        assert!(arena.alloc(1).is_none());
        assert_eq!(arena.len(), 64);
        arena.release(mark);
        assert!(arena.alloc(64).is_some());
    }
}
