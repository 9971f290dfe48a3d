//! `PerformanceCounters` (`§3`): per-backend-call counters reported on the
//! performance-ping cadence, reset on each report.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    table: String,
    op: String,
    is_error: bool,
}

pub struct PerformanceCounters {
    counts: Mutex<HashMap<CounterKey, u32>>,
    window_start: Mutex<Instant>,
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self::at(Instant::now())
    }

    fn at(now: Instant) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            window_start: Mutex::new(now),
        }
    }

    pub fn record(&self, table: &str, op: &str, is_error: bool) {
        let key = CounterKey {
            table: table.to_string(),
            op: op.to_string(),
            is_error,
        };
        *self.counts.lock().unwrap_or_else(|e| e.into_inner()).entry(key).or_insert(0) += 1;
    }

    /// Snapshot and reset for one report (`§3`: "reset on each report").
    pub fn snapshot_and_reset(&self) -> Value {
        let counts = std::mem::take(&mut *self.counts.lock().unwrap_or_else(|e| e.into_inner()));
        *self.window_start.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        let entries: Vec<Value> = counts
            .into_iter()
            .map(|(key, count)| {
                json!({
                    "table": key.table,
                    "op": key.op,
                    "is_error": key.is_error,
                    "count": count,
                })
            })
            .collect();
        json!({ "counters": entries })
    }
}

impl Default for PerformanceCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_grouped_by_table_op_and_error_flag() {
        let counters = PerformanceCounters::new();
        counters.record("chat_message", "insert", false);
        counters.record("chat_message", "insert", false);
        counters.record("chat_message", "insert", true);
        let snapshot = counters.snapshot_and_reset();
        let entries = snapshot["counters"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn snapshot_and_reset_clears_counts() {
        let counters = PerformanceCounters::new();
        counters.record("chat_message", "insert", false);
        let _ = counters.snapshot_and_reset();
        let snapshot = counters.snapshot_and_reset();
        assert!(snapshot["counters"].as_array().unwrap().is_empty());
    }
}
