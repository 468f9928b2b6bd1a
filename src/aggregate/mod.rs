//! Row synthesis across module buffers.
//!
//! On every tick the [`Aggregator`] reads each module's [`SampleBuffer`] and
//! builds one output row from the selected columns of every module, either
//! from the newest rows ([`MergeMode::Direct`]) or from the rows nearest to a
//! common timestamp ([`MergeMode::Aligned`]).
//!
//! Buffers are read under their own lock only long enough to copy the
//! selected fields out; no lock is held while the row is formatted or
//! written.

mod aligned;
mod projection;

pub use aligned::{AlignmentState, TickPlan, nearest_index, row_timestamp};
pub use projection::ColumnProjection;

use tracing::{trace, warn};

use crate::module::SampleBuffer;

/// How rows from different modules are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Newest row of every module.
    #[default]
    Direct,
    /// Rows nearest to a common timestamp taken from column 0.
    Aligned,
}

/// One module's contribution to the output row.
#[derive(Debug, Clone)]
pub struct Feed {
    name: String,
    buffer: SampleBuffer,
    projection: ColumnProjection,
}

impl Feed {
    pub fn new(name: impl Into<String>, buffer: SampleBuffer, projection: ColumnProjection) -> Self {
        Self {
            name: name.into(),
            buffer,
            projection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn projection(&self) -> &ColumnProjection {
        &self.projection
    }

    fn latest(&self) -> Vec<String> {
        self.buffer
            .with_rows(|rows| rows.back().map(|row| self.projection.project(row)))
            .unwrap_or_else(|| self.projection.empties())
    }

    fn nearest(&self, target: i64) -> Vec<String> {
        self.buffer
            .with_rows(|rows| {
                nearest_index(rows, target).map(|idx| self.projection.project(&rows[idx]))
            })
            .unwrap_or_else(|| self.projection.empties())
    }

    fn newest_timestamp(&self) -> Newest {
        self.buffer.with_rows(|rows| match rows.back() {
            None => Newest::Empty,
            Some(row) => match row_timestamp(row) {
                Some(ts) => Newest::At(ts),
                None => Newest::Unparsable(row.first().cloned().unwrap_or_default()),
            },
        })
    }
}

enum Newest {
    Empty,
    At(i64),
    Unparsable(String),
}

/// Assembles output rows from a fixed set of feeds.
#[derive(Debug)]
pub struct Aggregator {
    mode: MergeMode,
    feeds: Vec<Feed>,
    alignment: AlignmentState,
    warned_timestamp: Vec<bool>,
}

impl Aggregator {
    pub fn new(mode: MergeMode, feeds: Vec<Feed>) -> Self {
        let warned_timestamp = vec![false; feeds.len()];
        Self {
            mode,
            feeds,
            alignment: AlignmentState::new(),
            warned_timestamp,
        }
    }

    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn alignment(&self) -> &AlignmentState {
        &self.alignment
    }

    /// Header cells of the output table, module by module.
    pub fn headers(&self) -> Vec<String> {
        self.feeds
            .iter()
            .flat_map(|feed| feed.projection.headers().iter().cloned())
            .collect()
    }

    /// Column widths parallel to [`Aggregator::headers`].
    pub fn widths(&self) -> Vec<usize> {
        self.feeds
            .iter()
            .flat_map(|feed| feed.projection.widths().iter().copied())
            .collect()
    }

    /// Builds the row for one tick.
    pub fn assemble(&mut self) -> Vec<String> {
        match self.mode {
            MergeMode::Direct => self.feeds.iter().flat_map(Feed::latest).collect(),
            MergeMode::Aligned => self.assemble_aligned(),
        }
    }

    fn assemble_aligned(&mut self) -> Vec<String> {
        let newest: Vec<Option<i64>> = self
            .feeds
            .iter()
            .enumerate()
            .map(|(idx, feed)| match feed.newest_timestamp() {
                Newest::Empty => None,
                Newest::At(ts) => Some(ts),
                Newest::Unparsable(value) => {
                    if !self.warned_timestamp[idx] {
                        warn!(
                            "{}: column 0 is not a Unix timestamp ('{}'); aligned merge skips it",
                            feed.name, value
                        );
                        self.warned_timestamp[idx] = true;
                    }
                    None
                }
            })
            .collect();

        let plan = self.alignment.plan(&newest);
        trace!(
            "aligned tick: target={:?} skip={:?} advanced={} watermark={:?}",
            plan.target,
            plan.skip,
            plan.advanced,
            self.alignment.watermark()
        );

        self.feeds
            .iter()
            .zip(&plan.skip)
            .flat_map(|(feed, &skipped)| match plan.target {
                Some(target) if !skipped => feed.nearest(target),
                _ => feed.projection.empties(),
            })
            .collect()
    }
}
