//! Per-item outcome records and the batch-level [`ResultAggregate`].
//!
//! Outcomes arrive in completion order; the aggregate always presents them in
//! input order. `had_failure` is derived from the failure list on every call
//! and is never stored, so the two can never disagree.

use crate::error::{BatchError, CallError};
use serde::Serialize;

/// A successfully processed item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemSuccess<T> {
    /// Position of the item in the input list (0-indexed).
    pub index: usize,
    /// Display identifier of the item, e.g. its relative path.
    pub id: String,
    /// Value returned by the remote call.
    pub value: T,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// An item whose remote call failed terminally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    /// Position of the item in the input list (0-indexed).
    pub index: usize,
    /// Display identifier of the item.
    pub id: String,
    /// Error of the final attempt.
    pub error: CallError,
    /// Attempts made before giving up (0 if cancelled before the first).
    pub attempts: u32,
}

impl ItemFailure {
    /// Human-readable reason for the failure.
    pub fn description(&self) -> String {
        self.error.to_string()
    }
}

/// Terminal outcome of one item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome<T> {
    Success(ItemSuccess<T>),
    Failure(ItemFailure),
}

impl<T> ItemOutcome<T> {
    /// Input position of the item this outcome belongs to.
    pub fn index(&self) -> usize {
        match self {
            ItemOutcome::Success(s) => s.index,
            ItemOutcome::Failure(f) => f.index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ItemOutcome::Success(s) => &s.id,
            ItemOutcome::Failure(f) => &f.id,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ItemOutcome::Success(s) => s.attempts,
            ItemOutcome::Failure(f) => f.attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Success(_))
    }
}

/// Summary counts for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failures whose terminal error was the rate-limit signal.
    pub rate_limited: usize,
    /// Remote call attempts across all items, retries included.
    pub total_attempts: u64,
}

/// Order-preserving summary of a batch: successes, failures, and whether any
/// item failed. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultAggregate<T> {
    successes: Vec<ItemSuccess<T>>,
    failures: Vec<ItemFailure>,
}

impl<T> Default for ResultAggregate<T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> ResultAggregate<T> {
    /// Build from outcomes in any order; both lists come out sorted by
    /// input position.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = ItemOutcome<T>>) -> Self {
        let mut outcomes: Vec<ItemOutcome<T>> = outcomes.into_iter().collect();
        outcomes.sort_by_key(ItemOutcome::index);

        let mut aggregate = Self::default();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Success(s) => aggregate.successes.push(s),
                ItemOutcome::Failure(f) => aggregate.failures.push(f),
            }
        }
        aggregate
    }

    /// Build from per-position slots, already in input order.
    pub(crate) fn from_slots(slots: Vec<Option<ItemOutcome<T>>>) -> Self {
        Self::from_outcomes(slots.into_iter().flatten())
    }

    /// Successful items in input order.
    pub fn successes(&self) -> &[ItemSuccess<T>] {
        &self.successes
    }

    /// Failed items in input order.
    pub fn failures(&self) -> &[ItemFailure] {
        &self.failures
    }

    /// `true` iff at least one item failed.
    pub fn had_failure(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Total number of items recorded.
    pub fn len(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            total_items: self.len(),
            succeeded: self.successes.len(),
            failed: self.failures.len(),
            rate_limited: self
                .failures
                .iter()
                .filter(|f| f.error.is_rate_limit())
                .count(),
            total_attempts: self
                .successes
                .iter()
                .map(|s| s.attempts as u64)
                .chain(self.failures.iter().map(|f| f.attempts as u64))
                .sum(),
        }
    }

    /// Split into owned success and failure lists.
    pub fn into_parts(self) -> (Vec<ItemSuccess<T>>, Vec<ItemFailure>) {
        (self.successes, self.failures)
    }

    /// Treat any failure as an error.
    pub fn into_result(self) -> Result<Vec<ItemSuccess<T>>, BatchError> {
        if self.had_failure() {
            return Err(BatchError::PartialFailure {
                success: self.successes.len(),
                failed: self.failures.len(),
                total: self.len(),
            });
        }
        Ok(self.successes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(index: usize, value: &str) -> ItemOutcome<String> {
        ItemOutcome::Success(ItemSuccess {
            index,
            id: format!("item-{index}"),
            value: value.to_string(),
            attempts: 1,
        })
    }

    fn failed(index: usize, error: CallError) -> ItemOutcome<String> {
        ItemOutcome::Failure(ItemFailure {
            index,
            id: format!("item-{index}"),
            error,
            attempts: 3,
        })
    }

    #[test]
    fn empty_aggregate_has_no_failure() {
        let agg: ResultAggregate<String> = ResultAggregate::from_outcomes(Vec::new());
        assert!(agg.successes().is_empty());
        assert!(agg.failures().is_empty());
        assert!(!agg.had_failure());
        assert!(agg.is_empty());
    }

    #[test]
    fn completion_order_is_reordered_by_index() {
        let agg = ResultAggregate::from_outcomes(vec![
            ok(3, "d"),
            failed(2, CallError::Network("x".into())),
            ok(0, "a"),
            failed(1, CallError::Cancelled),
        ]);
        let ok_idx: Vec<usize> = agg.successes().iter().map(|s| s.index).collect();
        let fail_idx: Vec<usize> = agg.failures().iter().map(|f| f.index).collect();
        assert_eq!(ok_idx, vec![0, 3]);
        assert_eq!(fail_idx, vec![1, 2]);
        assert!(agg.had_failure());
    }

    #[test]
    fn stats_count_attempts_and_rate_limits() {
        let agg = ResultAggregate::from_outcomes(vec![
            ok(0, "a"),
            failed(
                1,
                CallError::RateLimited {
                    retry_after_secs: None,
                },
            ),
        ]);
        let stats = agg.stats();
        assert_eq!(stats.total_items, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.total_attempts, 4);
    }

    #[test]
    fn into_result_reports_partial_failure() {
        let agg = ResultAggregate::from_outcomes(vec![
            ok(0, "a"),
            failed(1, CallError::Other("no".into())),
        ]);
        match agg.into_result() {
            Err(BatchError::PartialFailure {
                success,
                failed,
                total,
            }) => assert_eq!((success, failed, total), (1, 1, 2)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn into_result_passes_clean_batch() {
        let agg = ResultAggregate::from_outcomes(vec![ok(1, "b"), ok(0, "a")]);
        let values: Vec<String> = agg.into_result().unwrap().into_iter().map(|s| s.value).collect();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn failure_description_is_error_text() {
        let f = ItemFailure {
            index: 0,
            id: "x.pdf".into(),
            error: CallError::RateLimited {
                retry_after_secs: None,
            },
            attempts: 3,
        };
        assert!(f.description().contains("rate limit"));
    }

    #[test]
    fn outcome_serialises_with_tag() {
        let json = serde_json::to_value(ok(0, "a")).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["index"], 0);
    }
}
