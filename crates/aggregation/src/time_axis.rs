//! Run axis and ragged (run, offset) time axis of one variable.

use chrono::{DateTime, Utc};
use fmrc_common::{ForecastOffset, GeometryId, RunTime};
use std::collections::BTreeSet;

use crate::index::IndexSnapshot;

/// Ragged 2D time coordinate: one row of forecast offsets per run.
///
/// Rows are not padded. A cell beyond a row's length is absent. Offsets,
/// and therefore valid times, are strictly increasing within a row.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAxis2D {
    variable: String,
    group: Option<GeometryId>,
    run_axis: Vec<RunTime>,
    rows: Vec<Vec<ForecastOffset>>,
}

impl TimeAxis2D {
    /// Build from explicit rows. `run_axis` must be sorted and as long as
    /// `rows`.
    pub fn new(
        variable: impl Into<String>,
        group: Option<GeometryId>,
        run_axis: Vec<RunTime>,
        rows: Vec<Vec<ForecastOffset>>,
    ) -> Self {
        debug_assert_eq!(run_axis.len(), rows.len());
        debug_assert!(run_axis.windows(2).all(|w| w[0] < w[1]));
        Self {
            variable: variable.into(),
            group,
            run_axis,
            rows,
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Geometry group the axis was built for (`None`: all runs).
    pub fn group(&self) -> Option<&GeometryId> {
        self.group.as_ref()
    }

    /// The 1D run axis.
    pub fn run_axis(&self) -> &[RunTime] {
        &self.run_axis
    }

    pub fn n_runs(&self) -> usize {
        self.run_axis.len()
    }

    pub fn run_index(&self, run_time: RunTime) -> Option<usize> {
        self.run_axis.binary_search(&run_time).ok()
    }

    pub fn rows(&self) -> &[Vec<ForecastOffset>] {
        &self.rows
    }

    /// Offsets of one run; empty for an unknown index.
    pub fn row(&self, run: usize) -> &[ForecastOffset] {
        self.rows.get(run).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_lengths(&self) -> Vec<usize> {
        self.rows.iter().map(Vec::len).collect()
    }

    /// Longest row; the nominal second dimension for display.
    pub fn regular_len(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Offset at a cell, `None` when absent.
    pub fn cell(&self, run: usize, offset: usize) -> Option<ForecastOffset> {
        self.rows.get(run)?.get(offset).copied()
    }

    /// Absolute time at a cell, `None` when absent.
    pub fn valid_time(&self, run: usize, offset: usize) -> Option<DateTime<Utc>> {
        self.cell(run, offset)?.valid_at(self.run_axis[run])
    }

    /// Absolute times of one run's row.
    pub fn valid_times(&self, run: usize) -> Vec<DateTime<Utc>> {
        match self.run_axis.get(run) {
            Some(run_time) => self
                .row(run)
                .iter()
                .map(|o| *run_time + o.duration())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Absolute times of every row.
    pub fn valid_time_matrix(&self) -> Vec<Vec<DateTime<Utc>>> {
        (0..self.n_runs()).map(|run| self.valid_times(run)).collect()
    }

    /// Every present cell as `(run index, offset index, offset)`, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, ForecastOffset)> + '_ {
        self.rows.iter().enumerate().flat_map(|(run, row)| {
            row.iter()
                .enumerate()
                .map(move |(index, offset)| (run, index, *offset))
        })
    }

    /// Distinct offsets over all rows, sorted.
    pub fn distinct_offsets(&self) -> Vec<ForecastOffset> {
        self.rows
            .iter()
            .flatten()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Distinct absolute times over the whole matrix, sorted.
    pub fn distinct_valid_times(&self) -> Vec<DateTime<Utc>> {
        self.cells()
            .map(|(run, _, offset)| self.run_axis[run] + offset.duration())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Derives time axes from an index snapshot.
pub struct TimeAxisBuilder;

impl TimeAxisBuilder {
    /// Build the time axis of `variable` over the runs where it lives on
    /// `group` (all runs when `None`). Runs lacking the variable keep an
    /// empty row; runs holding it on another geometry are left out.
    pub fn build(
        snapshot: &IndexSnapshot,
        variable: &str,
        group: Option<&GeometryId>,
    ) -> TimeAxis2D {
        let (run_axis, rows): (Vec<RunTime>, Vec<Vec<ForecastOffset>>) = snapshot
            .runs()
            .filter(|run| match (group, run.variable_geometry_id(variable)) {
                (Some(group), Some(geometry)) => geometry == group,
                _ => true,
            })
            .map(|run| (run.run_time(), run.offsets(variable).to_vec()))
            .unzip();

        TimeAxis2D::new(variable, group.cloned(), run_axis, rows)
    }
}
