//! Timestamp-aligned merge: watermark bookkeeping and nearest-row lookup.

use std::collections::VecDeque;

use crate::module::Row;

/// Timestamp in column 0 of `row`, if it parses as an integer.
pub fn row_timestamp(row: &[String]) -> Option<i64> {
    row.first()?.trim().parse().ok()
}

/// Outcome of the per-tick freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPlan {
    /// Timestamp every non-skipped module aligns to. `None` when all
    /// modules were skipped.
    pub target: Option<i64>,
    /// Per module: `true` if it has no fresh data this tick.
    pub skip: Vec<bool>,
    /// Whether the watermark moved to `target`.
    pub advanced: bool,
}

/// Watermark and previous skip pattern, owned by the aggregator.
#[derive(Debug, Clone, Default)]
pub struct AlignmentState {
    watermark: Option<i64>,
    previous_skip: Option<Vec<bool>>,
}

impl AlignmentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed global timestamp.
    pub fn watermark(&self) -> Option<i64> {
        self.watermark
    }

    /// Decides the target timestamp for one tick.
    ///
    /// `newest[i]` is module `i`'s newest usable timestamp (`None` for an
    /// empty buffer or an unparsable newest row). A module is fresh when its
    /// newest timestamp is beyond the watermark. The watermark advances to
    /// the earliest fresh timestamp only when nothing was skipped or the
    /// skip pattern repeats the previous tick's; it never moves backwards.
    pub fn plan(&mut self, newest: &[Option<i64>]) -> TickPlan {
        let skip: Vec<bool> = newest
            .iter()
            .map(|t| match t {
                None => true,
                Some(t) => self.watermark.is_some_and(|w| w >= *t),
            })
            .collect();

        let target = newest
            .iter()
            .zip(&skip)
            .filter(|(_, skipped)| !**skipped)
            .filter_map(|(t, _)| *t)
            .min();

        let any_skipped = skip.iter().any(|s| *s);
        let repeated = self.previous_skip.as_deref() == Some(skip.as_slice());
        let advanced = target.is_some() && (!any_skipped || repeated);
        if advanced {
            self.watermark = target;
        }
        self.previous_skip = Some(skip.clone());

        TickPlan {
            target,
            skip,
            advanced,
        }
    }
}

/// Index of the row whose timestamp is nearest to `target`.
///
/// Scans newest to oldest. An exact match wins at once. Rows above the
/// target move the candidate to the closest one above; the first row below
/// the target replaces the candidate only if strictly closer, and ends the
/// scan. Rows without a usable timestamp are stepped over.
pub fn nearest_index(rows: &VecDeque<Row>, target: i64) -> Option<usize> {
    let mut best: Option<(usize, i64)> = None;

    for (idx, row) in rows.iter().enumerate().rev() {
        let Some(ts) = row_timestamp(row) else {
            continue;
        };
        if ts == target {
            return Some(idx);
        }
        let distance = ts.abs_diff(target);
        let distance = i64::try_from(distance).unwrap_or(i64::MAX);
        if ts > target {
            if best.is_none_or(|(_, d)| distance <= d) {
                best = Some((idx, distance));
            }
        } else {
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((idx, distance));
            }
            break;
        }
    }

    best.map(|(idx, _)| idx)
}
