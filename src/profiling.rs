//! The profiler sink consumed by the pass driver.
//!
//! Pass executions are bracketed with [`Profiler::start`] and
//! [`Profiler::end`], and the instruction counts before and after each
//! pass are reported as counters with stable keys derived from the
//! catalog position. All calls are side-effect-free for the IR and may be
//! no-ops; sinks must be internally thread-safe since kernels are
//! optimized concurrently.

use dashmap::DashMap;

/// Base counter key of the optimization counters.
///
/// Pass `i` of a method reports its before-count at
/// `COUNTER_OPTIMIZATION + 100 * i` and its after-count ten above that.
pub const COUNTER_OPTIMIZATION: usize = 80_000;

/// A sink for pass timing brackets and instruction-count counters.
pub trait Profiler: Send + Sync {
    /// Marks the start of the named pass.
    fn start(&self, name: &str) {
        let _ = name;
    }

    /// Marks the end of the named pass.
    fn end(&self, name: &str) {
        let _ = name;
    }

    /// Reports a counter value under a stable key.
    fn counter(&self, key: usize, name: &str, value: usize) {
        let _ = (key, name, value);
    }

    /// Reports a counter value linked to a previously reported counter,
    /// letting sinks compute differences.
    fn counter_with_prev(&self, key: usize, name: &str, value: usize, prev_key: usize) {
        let _ = (key, name, value, prev_key);
    }
}

/// A profiler that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProfiler;

impl Profiler for NullProfiler {}

/// A thread-safe collecting profiler for tests and tooling.
#[derive(Debug, Default)]
pub struct CollectingProfiler {
    /// Number of start/end brackets seen per pass name.
    brackets: DashMap<String, usize>,
    /// Last value reported per counter key.
    counters: DashMap<usize, (String, usize)>,
    /// Completed brackets in completion order.
    sequence: std::sync::Mutex<Vec<String>>,
}

impl CollectingProfiler {
    /// Creates an empty collecting profiler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of completed start/end brackets for `name`.
    #[must_use]
    pub fn bracket_count(&self, name: &str) -> usize {
        self.brackets.get(name).map_or(0, |count| *count)
    }

    /// The last value reported for `key`.
    #[must_use]
    pub fn counter_value(&self, key: usize) -> Option<usize> {
        self.counters.get(&key).map(|entry| entry.1)
    }

    /// The names of all passes that reported brackets.
    #[must_use]
    pub fn bracketed_passes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.brackets.iter().map(|e| e.key().clone()).collect();
        names.sort_unstable();
        names
    }

    /// The completed brackets in completion order.
    ///
    /// Within one method this is the pass execution trace; across
    /// concurrently optimized methods the traces interleave.
    #[must_use]
    pub fn pass_sequence(&self) -> Vec<String> {
        self.sequence
            .lock()
            .map(|sequence| sequence.clone())
            .unwrap_or_default()
    }
}

impl Profiler for CollectingProfiler {
    fn start(&self, _name: &str) {}

    fn end(&self, name: &str) {
        *self.brackets.entry(name.to_string()).or_insert(0) += 1;
        if let Ok(mut sequence) = self.sequence.lock() {
            sequence.push(name.to_string());
        }
    }

    fn counter(&self, key: usize, name: &str, value: usize) {
        self.counters.insert(key, (name.to_string(), value));
    }

    fn counter_with_prev(&self, key: usize, name: &str, value: usize, _prev_key: usize) {
        self.counters.insert(key, (name.to_string(), value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_profiler_accepts_everything() {
        let profiler = NullProfiler;
        profiler.start("pass");
        profiler.end("pass");
        profiler.counter(1, "count", 42);
        profiler.counter_with_prev(2, "count", 43, 1);
    }

    #[test]
    fn test_collecting_profiler_counts_brackets() {
        let profiler = CollectingProfiler::new();
        profiler.start("a");
        profiler.end("a");
        profiler.start("a");
        profiler.end("a");
        assert_eq!(profiler.bracket_count("a"), 2);
        assert_eq!(profiler.bracket_count("b"), 0);
    }

    #[test]
    fn test_collecting_profiler_keeps_last_counter() {
        let profiler = CollectingProfiler::new();
        profiler.counter(COUNTER_OPTIMIZATION, "before", 10);
        profiler.counter(COUNTER_OPTIMIZATION, "before", 7);
        assert_eq!(profiler.counter_value(COUNTER_OPTIMIZATION), Some(7));
    }
}
