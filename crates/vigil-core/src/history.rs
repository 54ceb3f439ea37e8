//! In-memory execution history
//!
//! Bounded ring of the diagnostics one engine produced. Lives and dies
//! with the engine; nothing is persisted.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::diagnostic::ExecutionDiagnostic;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, 0-100
    pub success_rate: f64,
    pub average_duration_ms: f64,
}

pub struct ExecutionHistory {
    entries: Mutex<VecDeque<ExecutionDiagnostic>>,
    capacity: usize,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append, evicting the oldest entry when full. Capacity 0 keeps nothing.
    pub fn record(&self, diagnostic: &ExecutionDiagnostic) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(diagnostic.clone());
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<ExecutionDiagnostic> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> HistoryStats {
        let entries = self.lock();
        if entries.is_empty() {
            return HistoryStats::default();
        }

        let total = entries.len();
        let successful = entries.iter().filter(|d| d.success).count();
        let total_duration: u64 = entries.iter().map(|d| d.duration_ms).sum();

        HistoryStats {
            total,
            successful,
            failed: total - successful,
            success_rate: successful as f64 / total as f64 * 100.0,
            average_duration_ms: total_duration as f64 / total as f64,
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ExecutionDiagnostic>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::FailureCategory;

    fn diag(id: &str, success: bool, duration_ms: u64) -> ExecutionDiagnostic {
        let mut d = ExecutionDiagnostic::failure(id, "python", FailureCategory::Runtime, "x")
            .with_duration_ms(duration_ms);
        if success {
            d.success = true;
            d.exit_code = 0;
            d.category = None;
            d.errors.clear();
        }
        d
    }

    #[test]
    fn test_stats() {
        let history = ExecutionHistory::new(10);
        history.record(&diag("a", true, 100));
        history.record(&diag("b", false, 300));
        history.record(&diag("c", true, 200));
        history.record(&diag("d", true, 400));

        let stats = history.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful, 3);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 75.0).abs() < 1e-9);
        assert!((stats.average_duration_ms - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ExecutionHistory::new(10).stats();
        assert_eq!(stats, HistoryStats::default());
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let history = ExecutionHistory::new(2);
        history.record(&diag("a", true, 1));
        history.record(&diag("b", true, 1));
        history.record(&diag("c", true, 1));

        let ids: Vec<String> = history.entries().into_iter().map(|d| d.execution_id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_zero_capacity_and_clear() {
        let history = ExecutionHistory::new(0);
        history.record(&diag("a", true, 1));
        assert!(history.is_empty());

        let history = ExecutionHistory::new(5);
        history.record(&diag("a", true, 1));
        assert_eq!(history.len(), 1);
        history.clear();
        assert!(history.is_empty());
    }
}
