//! Read-only views over an index snapshot.
//!
//! A [`VirtualDatasetView`] is a descriptor: it pins the snapshot it was
//! derived from, the variable's time axis, and (for 1D views) the selected
//! `(run, offset)` source of each series element. It never holds decoded
//! data and never mutates the index.

use chrono::{DateTime, Utc};
use fmrc_common::{ForecastOffset, RunTime};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::config::TieBreak;
use crate::error::{AggregationError, Result};
use crate::index::IndexSnapshot;
use crate::time_axis::TimeAxis2D;

/// Kinds of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Full (run, offset) matrix
    TwoD,
    /// One source per valid time, chosen by the tie-break rule
    Best,
    /// One run's offsets
    Slice(RunTime),
    /// One cell per run at a fixed offset
    ConstantOffset(ForecastOffset),
    /// Every run forecasting a fixed valid time
    ConstantValidTime(DateTime<Utc>),
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewKind::TwoD => write!(f, "2D"),
            ViewKind::Best => write!(f, "best"),
            ViewKind::Slice(run) => write!(f, "run {}", run.format("%Y-%m-%dT%H:%MZ")),
            ViewKind::ConstantOffset(offset) => write!(f, "offset {}", offset),
            ViewKind::ConstantValidTime(time) => {
                write!(f, "valid time {}", time.format("%Y-%m-%dT%H:%MZ"))
            }
        }
    }
}

/// A position in a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalIndex {
    /// (run index, offset index) in a 2D view
    Cell { run: usize, offset: usize },
    /// Element of a 1D view
    Series(usize),
}

/// One selected source cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesEntry {
    pub run_index: usize,
    pub offset_index: usize,
    pub run_time: RunTime,
    pub offset: ForecastOffset,
    pub valid_time: DateTime<Utc>,
}

impl SeriesEntry {
    fn at(axis: &TimeAxis2D, run_index: usize, offset_index: usize, offset: ForecastOffset) -> Self {
        let run_time = axis.run_axis()[run_index];
        Self {
            run_index,
            offset_index,
            run_time,
            offset,
            valid_time: run_time + offset.duration(),
        }
    }
}

/// Best-estimate selection over a time axis.
///
/// For every distinct valid time the candidates are the present cells with
/// a non-negative offset (their run started at or before that time); the
/// tie-break picks the newest (`PreferFreshRun`) or oldest
/// (`PreferMatureForecast`) candidate run. Result is sorted by valid time.
pub fn best_selection(axis: &TimeAxis2D, tie_break: TieBreak) -> Vec<SeriesEntry> {
    let mut best: BTreeMap<DateTime<Utc>, SeriesEntry> = BTreeMap::new();

    for (run, index, offset) in axis.cells() {
        if offset.is_negative() {
            continue;
        }
        let candidate = SeriesEntry::at(axis, run, index, offset);

        match best.entry(candidate.valid_time) {
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                let replace = match tie_break {
                    TieBreak::PreferFreshRun => candidate.run_time > slot.get().run_time,
                    TieBreak::PreferMatureForecast => candidate.run_time < slot.get().run_time,
                };
                if replace {
                    slot.insert(candidate);
                }
            }
        }
    }

    best.into_values().collect()
}

fn slice_selection(axis: &TimeAxis2D, run: usize) -> Vec<SeriesEntry> {
    axis.row(run)
        .iter()
        .enumerate()
        .map(|(index, offset)| SeriesEntry::at(axis, run, index, *offset))
        .collect()
}

fn constant_offset_selection(axis: &TimeAxis2D, offset: ForecastOffset) -> Vec<SeriesEntry> {
    (0..axis.n_runs())
        .filter_map(|run| {
            let index = axis.row(run).binary_search(&offset).ok()?;
            Some(SeriesEntry::at(axis, run, index, offset))
        })
        .collect()
}

fn constant_valid_time_selection(axis: &TimeAxis2D, valid_time: DateTime<Utc>) -> Vec<SeriesEntry> {
    (0..axis.n_runs())
        .filter_map(|run| {
            let offset = ForecastOffset::between(axis.run_axis()[run], valid_time);
            let index = axis.row(run).binary_search(&offset).ok()?;
            Some(SeriesEntry::at(axis, run, index, offset))
        })
        .collect()
}

/// A derived, read-only view of one variable.
#[derive(Debug, Clone)]
pub struct VirtualDatasetView {
    kind: ViewKind,
    snapshot: Arc<IndexSnapshot>,
    axis: TimeAxis2D,
    series: Vec<SeriesEntry>,
}

impl VirtualDatasetView {
    /// Derive a view from a snapshot and the variable's time axis.
    pub fn new(
        kind: ViewKind,
        snapshot: Arc<IndexSnapshot>,
        axis: TimeAxis2D,
        tie_break: TieBreak,
    ) -> Result<Self> {
        let series = match kind {
            ViewKind::TwoD => Vec::new(),
            ViewKind::Best => best_selection(&axis, tie_break),
            ViewKind::Slice(run_time) => {
                let run = axis
                    .run_index(run_time)
                    .ok_or(AggregationError::UnknownRun(run_time))?;
                slice_selection(&axis, run)
            }
            ViewKind::ConstantOffset(offset) => constant_offset_selection(&axis, offset),
            ViewKind::ConstantValidTime(time) => constant_valid_time_selection(&axis, time),
        };

        Ok(Self {
            kind,
            snapshot,
            axis,
            series,
        })
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn variable(&self) -> &str {
        self.axis.variable()
    }

    /// Snapshot the view was derived from.
    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    pub fn time_axis(&self) -> &TimeAxis2D {
        &self.axis
    }

    pub fn is_two_d(&self) -> bool {
        self.kind == ViewKind::TwoD
    }

    /// Selected cells of a 1D view; empty for the 2D view.
    pub fn series(&self) -> &[SeriesEntry] {
        &self.series
    }

    /// Valid times of a 1D view, in series order.
    pub fn valid_times(&self) -> Vec<DateTime<Utc>> {
        self.series.iter().map(|e| e.valid_time).collect()
    }

    /// Nominal shape of the time dimensions: `[runs, longest row]` for 2D,
    /// `[series length]` otherwise.
    pub fn shape(&self) -> Vec<usize> {
        if self.is_two_d() {
            vec![self.axis.n_runs(), self.axis.regular_len()]
        } else {
            vec![self.series.len()]
        }
    }

    /// The cell behind a logical index.
    pub fn entry(&self, index: LogicalIndex) -> Result<SeriesEntry> {
        match (self.kind, index) {
            (ViewKind::TwoD, LogicalIndex::Cell { run, offset }) => {
                if run >= self.axis.n_runs() {
                    return Err(AggregationError::Resolution(format!(
                        "run index {} out of range ({} runs)",
                        run,
                        self.axis.n_runs()
                    )));
                }
                let value = self.axis.cell(run, offset).ok_or_else(|| {
                    AggregationError::Resolution(format!(
                        "no data for '{}' at run {} offset index {}",
                        self.variable(),
                        self.axis.run_axis()[run],
                        offset
                    ))
                })?;
                Ok(SeriesEntry::at(&self.axis, run, offset, value))
            }
            (ViewKind::TwoD, LogicalIndex::Series(_)) => Err(AggregationError::Resolution(
                "2D view needs a (run, offset) index".to_string(),
            )),
            (_, LogicalIndex::Series(i)) => self.series.get(i).copied().ok_or_else(|| {
                AggregationError::Resolution(format!(
                    "index {} out of range for {} view ({} elements)",
                    i,
                    self.kind,
                    self.series.len()
                ))
            }),
            (_, LogicalIndex::Cell { .. }) => Err(AggregationError::Resolution(format!(
                "{} view needs a 1D index",
                self.kind
            ))),
        }
    }
}
