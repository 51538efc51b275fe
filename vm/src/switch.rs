//! Adaptive `switch.i32` dispatch
//!
//! The first time a frame executes a given `switch.i32`, the case list is
//! analysed and materialized into one of three lookup structures:
//!
//! - **Dense**: jump table indexed by `value - min` (compact, dense ranges)
//! - **Sorted**: sorted keys with binary search (the general fallback)
//! - **Hashed**: hash map (many cases spread over a huge range)
//!
//! The result is stored in the frame's [`SwitchCache`] and reused for the
//! rest of that activation. A [`SwitchMode`] override can force a backend,
//! or select **Linear** mode which scans the instruction's cases on every
//! execution and never builds a cache entry.
//!
//! Lookups return a *label index* into the instruction's `labels`: 0 for the
//! default target, `i + 1` for case `i`.

use fxhash::{FxHashMap, FxHashSet};
use il::Instr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Largest case range a Dense table is chosen for automatically
pub const DENSE_MAX_RANGE: i64 = 4096;
/// Minimum density (`distinct / range`) for Dense
pub const DENSE_MIN_DENSITY: f64 = 0.60;
/// Minimum case count before Hashed is considered
pub const HASHED_MIN_CASES: usize = 64;
/// Hashed is chosen below this density
pub const HASHED_MAX_DENSITY: f64 = 0.15;
/// A forced Dense table larger than this falls back to Sorted
pub const DENSE_FORCED_MAX_RANGE: i64 = 1 << 20;

/// Environment variable read by [`SwitchMode::process_default`]
pub const SWITCH_MODE_ENV: &str = "VIPER_SWITCH_MODE";

/// Backend selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    #[default]
    Auto,
    Dense,
    Sorted,
    Hashed,
    Linear,
}

impl SwitchMode {
    /// Mode named by `VIPER_SWITCH_MODE`, read once per process.
    /// Unset or unrecognized values mean `Auto`.
    pub fn process_default() -> SwitchMode {
        static MODE: OnceLock<SwitchMode> = OnceLock::new();
        *MODE.get_or_init(|| match std::env::var(SWITCH_MODE_ENV) {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!("ignoring unknown {}={:?}", SWITCH_MODE_ENV, raw);
                SwitchMode::Auto
            }),
            Err(_) => SwitchMode::Auto,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            SwitchMode::Auto => "auto",
            SwitchMode::Dense => "dense",
            SwitchMode::Sorted => "sorted",
            SwitchMode::Hashed => "hashed",
            SwitchMode::Linear => "linear",
        }
    }
}

impl FromStr for SwitchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(SwitchMode::Auto),
            "dense" => Ok(SwitchMode::Dense),
            "sorted" => Ok(SwitchMode::Sorted),
            "hashed" => Ok(SwitchMode::Hashed),
            "linear" => Ok(SwitchMode::Linear),
            other => Err(format!("unknown switch mode '{}'", other)),
        }
    }
}

impl fmt::Display for SwitchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lookup structure actually built for an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Dense,
    Sorted,
    Hashed,
    Linear,
}

/// Distinct case values of one `switch.i32`, in first-occurrence order
#[derive(Debug, Clone, Default)]
pub struct CaseSet {
    pub values: Vec<i32>,
    /// Label index per entry of `values`
    pub targets: Vec<usize>,
}

impl CaseSet {
    /// Collect cases from an instruction; duplicates keep their first target
    pub fn from_instr(instr: &Instr) -> CaseSet {
        let mut seen = FxHashSet::default();
        let mut set = CaseSet::default();
        for case in 0..instr.switch_case_count() {
            let Some(value) = instr.switch_case_value(case) else {
                continue;
            };
            let value = value as i32;
            if seen.insert(value) {
                set.values.push(value);
                set.targets.push(case + 1);
            }
        }
        set
    }

    /// Build directly from `(value, label index)` pairs
    pub fn from_pairs(pairs: &[(i32, usize)]) -> CaseSet {
        let mut seen = FxHashSet::default();
        let mut set = CaseSet::default();
        for &(value, target) in pairs {
            if seen.insert(value) {
                set.values.push(value);
                set.targets.push(target);
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `max - min + 1`, or 0 for an empty set
    pub fn range(&self) -> i64 {
        match (self.values.iter().min(), self.values.iter().max()) {
            (Some(&min), Some(&max)) => max as i64 - min as i64 + 1,
            _ => 0,
        }
    }

    pub fn density(&self) -> f64 {
        let range = self.range();
        if range == 0 {
            0.0
        } else {
            self.len() as f64 / range as f64
        }
    }
}

/// Automatic backend choice for a case distribution
pub fn choose_backend(cases: &CaseSet) -> Backend {
    if cases.is_empty() {
        return Backend::Sorted;
    }
    let range = cases.range();
    let density = cases.density();
    if range <= DENSE_MAX_RANGE && density >= DENSE_MIN_DENSITY {
        Backend::Dense
    } else if cases.len() >= HASHED_MIN_CASES && density < HASHED_MAX_DENSITY {
        Backend::Hashed
    } else {
        Backend::Sorted
    }
}

/// Backend to build under `mode`; `None` means scan without caching
pub fn select_backend(mode: SwitchMode, cases: &CaseSet) -> Option<Backend> {
    match mode {
        SwitchMode::Auto => Some(choose_backend(cases)),
        SwitchMode::Dense if cases.range() > DENSE_FORCED_MAX_RANGE => {
            log::debug!("forced dense switch spans {} values; using sorted", cases.range());
            Some(Backend::Sorted)
        }
        SwitchMode::Dense => Some(Backend::Dense),
        SwitchMode::Sorted => Some(Backend::Sorted),
        SwitchMode::Hashed => Some(Backend::Hashed),
        SwitchMode::Linear => None,
    }
}

#[derive(Debug, Clone)]
enum Table {
    Dense { base: i32, slots: Vec<i32> },
    Sorted { keys: Vec<i32>, targets: Vec<usize> },
    Hashed { map: FxHashMap<i32, usize> },
}

/// Materialized dispatch structure for one instruction in one frame
#[derive(Debug, Clone)]
pub struct SwitchCacheEntry {
    pub backend: Backend,
    pub default_target: usize,
    table: Table,
}

impl SwitchCacheEntry {
    pub fn build(cases: &CaseSet, backend: Backend) -> SwitchCacheEntry {
        let table = match backend {
            Backend::Dense if !cases.is_empty() => {
                let base = cases.values.iter().copied().min().unwrap_or(0);
                let mut slots = vec![-1i32; cases.range() as usize];
                for (value, target) in cases.values.iter().zip(&cases.targets) {
                    slots[(*value as i64 - base as i64) as usize] = *target as i32;
                }
                Table::Dense { base, slots }
            }
            Backend::Hashed => Table::Hashed {
                map: cases
                    .values
                    .iter()
                    .copied()
                    .zip(cases.targets.iter().copied())
                    .collect(),
            },
            _ => {
                let mut pairs: Vec<(i32, usize)> = cases
                    .values
                    .iter()
                    .copied()
                    .zip(cases.targets.iter().copied())
                    .collect();
                pairs.sort_by_key(|(value, _)| *value);
                Table::Sorted {
                    keys: pairs.iter().map(|(v, _)| *v).collect(),
                    targets: pairs.iter().map(|(_, t)| *t).collect(),
                }
            }
        };
        let backend = match table {
            Table::Dense { .. } => Backend::Dense,
            Table::Sorted { .. } => Backend::Sorted,
            Table::Hashed { .. } => Backend::Hashed,
        };
        SwitchCacheEntry {
            backend,
            default_target: 0,
            table,
        }
    }

    /// Label index for `value`; misses yield the default
    #[inline]
    pub fn lookup(&self, value: i32) -> usize {
        match &self.table {
            Table::Dense { base, slots } => {
                let offset = value as i64 - *base as i64;
                if offset < 0 || offset >= slots.len() as i64 {
                    return self.default_target;
                }
                match slots[offset as usize] {
                    -1 => self.default_target,
                    target => target as usize,
                }
            }
            Table::Sorted { keys, targets } => match keys.binary_search(&value) {
                Ok(pos) => targets[pos],
                Err(_) => self.default_target,
            },
            Table::Hashed { map } => map.get(&value).copied().unwrap_or(self.default_target),
        }
    }
}

/// Scan an instruction's cases in order; the first match wins
pub fn linear_lookup(instr: &Instr, value: i32) -> usize {
    (0..instr.switch_case_count())
        .find(|&case| instr.switch_case_value(case).map(|v| v as i32) == Some(value))
        .map(|case| case + 1)
        .unwrap_or(0)
}

/// Frame-owned side table keyed by `(block index, instruction index)`
#[derive(Debug, Default)]
pub struct SwitchCache {
    entries: FxHashMap<(usize, usize), SwitchCacheEntry>,
}

impl SwitchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, block: usize, ip: usize) -> Option<&SwitchCacheEntry> {
        self.entries.get(&(block, ip))
    }

    pub fn insert(&mut self, block: usize, ip: usize, entry: SwitchCacheEntry) {
        self.entries.insert((block, ip), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
