//! Raw objective call log and its partition into per-restart histories.
//!
//! Basin hopping only reports once per hop, so the driver logs every objective
//! call and recovers the per-restart parameter histories afterwards by matching
//! the parsed iterate costs against the logged call costs. The matching is a
//! best-effort heuristic: when two calls have equal cost the earliest one after
//! the previous match wins.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const RELATIVE_MATCH: f64 = 1e-7;

/// One objective evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub params: Vec<f64>,
    pub cost: f64,
}

/// Shared, append-only list of objective calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl CallLog {
    pub fn new() -> Self {
        CallLog::default()
    }

    pub fn record(&self, params: Vec<f64>, cost: f64) {
        self.records.lock().push(CallRecord { params, cost });
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every record logged so far.
    pub fn snapshot(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }
}

fn costs_match(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= RELATIVE_MATCH * a.abs().max(b.abs())
}

/// Index of the call matching `cost`, searching forward from `cursor`.
///
/// Returns the first call within relative tolerance, otherwise the call with the
/// smallest absolute cost difference. Never searches before `cursor`; once the
/// log is exhausted every lookup resolves to the last call.
pub fn nearest_cost_index(calls: &[CallRecord], cost: f64, cursor: usize) -> Option<usize> {
    let start = cursor.min(calls.len().checked_sub(1)?);
    let tail = &calls[start..];
    if let Some(offset) = tail.iter().position(|c| costs_match(c.cost, cost)) {
        return Some(start + offset);
    }
    tail.iter()
        .enumerate()
        .filter(|(_, c)| !c.cost.is_nan())
        .min_by(|(_, a), (_, b)| (a.cost - cost).abs().total_cmp(&(b.cost - cost).abs()))
        .map(|(offset, _)| start + offset)
}

/// Splits the call log into one parameter segment per restart.
///
/// # Arguments
///
/// * `calls` - Every objective call of the run, in call order.
/// * `cost_histories` - Parsed iterate costs, one list per restart.
///
/// # Returns
///
/// One parameter list per restart whose length equals the length of the
/// matching cost history. Each entry is the logged parameter vector whose
/// cost is nearest the reported iterate cost, scanning forward through the log.
pub fn partition_calls(calls: &[CallRecord], cost_histories: &[Vec<f64>]) -> Vec<Vec<Vec<f64>>> {
    let mut cursor = 0;
    cost_histories
        .iter()
        .map(|costs| {
            costs
                .iter()
                .filter_map(|&cost| {
                    let index = nearest_cost_index(calls, cost, cursor)?;
                    cursor = index + 1;
                    Some(calls[index].params.clone())
                })
                .collect()
        })
        .collect()
}
