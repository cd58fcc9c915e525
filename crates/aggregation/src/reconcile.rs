//! Geometry reconciliation between a candidate run and the collection's
//! reference geometries.
//!
//! Each variable has its own reference: the geometry it was first indexed
//! on. A run lacking a variable is never compared for it.

use fmrc_common::{CoordinateGeometry, GeometryDifference, GeometryId};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::CollectionConfig;
use crate::inventory::RunInventory;

/// Why a variable's geometry does not match its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchReason {
    /// Structural difference from the reference geometry
    Structure(GeometryDifference),
    /// No reference yet and the variable is not on the configured geometry
    UnexpectedGeometry {
        expected: GeometryId,
        found: GeometryId,
    },
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::Structure(difference) => write!(f, "{}", difference),
            MismatchReason::UnexpectedGeometry { expected, found } => write!(
                f,
                "geometry {} differs from configured reference {}",
                found, expected
            ),
        }
    }
}

/// One variable of a run whose geometry differs from its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableMismatch {
    pub variable: String,
    /// The variable's geometry in the candidate run
    pub geometry: GeometryId,
    pub reason: MismatchReason,
}

impl fmt::Display for VariableMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}': {}", self.variable, self.reason)
    }
}

/// Outcome of reconciling one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Every variable matches its reference (or has none yet)
    Accepted,
    /// Some variables differ; they are kept in their own geometry groups
    Grouped { mismatches: Vec<VariableMismatch> },
    /// Some variables differ; the run is excluded from the index
    Rejected { mismatches: Vec<VariableMismatch> },
}

impl Reconciliation {
    /// Whether the run goes into the index.
    pub fn is_indexed(&self) -> bool {
        !matches!(self, Reconciliation::Rejected { .. })
    }

    pub fn mismatches(&self) -> &[VariableMismatch] {
        match self {
            Reconciliation::Accepted => &[],
            Reconciliation::Grouped { mismatches } | Reconciliation::Rejected { mismatches } => {
                mismatches
            }
        }
    }
}

/// Decides whether a run's variables share the collection's coordinate
/// systems.
///
/// Pure: no I/O, no state beyond the policy.
#[derive(Debug, Clone, Default)]
pub struct CoordinateReconciler {
    strict: bool,
    configured_reference: Option<GeometryId>,
}

impl CoordinateReconciler {
    pub fn new(strict: bool, configured_reference: Option<GeometryId>) -> Self {
        Self {
            strict,
            configured_reference,
        }
    }

    pub fn from_config(config: &CollectionConfig) -> Self {
        Self::new(config.strict_geometry, config.reference_geometry.clone())
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn configured_reference(&self) -> Option<&GeometryId> {
        self.configured_reference.as_ref()
    }

    /// Whether `geometry` may become the reference of a variable that has
    /// none yet.
    pub fn can_be_reference(&self, geometry: &CoordinateGeometry) -> bool {
        self.configured_reference
            .as_ref()
            .map_or(true, |id| id == geometry.id())
    }

    /// Compare every variable of a candidate with that variable's
    /// reference geometry.
    pub fn reconcile(
        &self,
        candidate: &RunInventory,
        references: &BTreeMap<String, CoordinateGeometry>,
    ) -> Reconciliation {
        let mismatches: Vec<VariableMismatch> = candidate
            .variables()
            .keys()
            .filter_map(|name| {
                let geometry = candidate.variable_geometry(name)?;
                let reason = match references.get(name) {
                    Some(reference) => MismatchReason::Structure(reference.difference(geometry)?),
                    None if self.can_be_reference(geometry) => return None,
                    None => MismatchReason::UnexpectedGeometry {
                        expected: self.configured_reference.clone()?,
                        found: geometry.id().clone(),
                    },
                };
                Some(VariableMismatch {
                    variable: name.clone(),
                    geometry: geometry.id().clone(),
                    reason,
                })
            })
            .collect();

        if mismatches.is_empty() {
            Reconciliation::Accepted
        } else if self.strict {
            Reconciliation::Rejected { mismatches }
        } else {
            Reconciliation::Grouped { mismatches }
        }
    }
}
