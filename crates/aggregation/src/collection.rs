//! A forecast model run collection: scanning, publication and queries.
//!
//! One writer (a scan) at a time mutates a private copy of the index and
//! publishes it in one step. Queries read the last published snapshot and
//! never wait for a scan.

use fmrc_common::{GeometryId, RunTime};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::codec::{GridCodec, NumericArray};
use crate::config::CollectionConfig;
use crate::discovery::{discover_files, DiscoveredFile};
use crate::error::{AggregationError, Result, ScanError};
use crate::index::{CollectionIndex, GeometryGroup, IndexSnapshot};
use crate::inventory::{scan_file, RunInventory, ScanOptions};
use crate::proxy::{GridAccessProxy, ReadDescriptor};
use crate::reconcile::{CoordinateReconciler, Reconciliation, VariableMismatch};
use crate::time_axis::TimeAxisBuilder;
use crate::view::{LogicalIndex, ViewKind, VirtualDatasetView};
use storage::IndexStore;

/// Which files a scan opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Only new files and files whose signature changed
    #[default]
    Incremental,
    /// Every discovered file
    Full,
}

/// A file that did not make it into the index.
#[derive(Debug)]
pub enum ScanFailure {
    /// The file could not be turned into a run inventory
    Scan { path: PathBuf, error: ScanError },
    /// Strict mode: some variable's geometry differs from its reference
    GeometryMismatch {
        path: PathBuf,
        run_time: RunTime,
        mismatches: Vec<VariableMismatch>,
    },
}

impl ScanFailure {
    pub fn path(&self) -> &Path {
        match self {
            ScanFailure::Scan { path, .. } | ScanFailure::GeometryMismatch { path, .. } => path,
        }
    }

    /// The failure as a crate-level error, for callers that propagate it.
    pub fn to_error(&self) -> Option<AggregationError> {
        match self {
            ScanFailure::GeometryMismatch {
                run_time,
                mismatches,
                ..
            } => Some(AggregationError::GeometryMismatch {
                run_time: *run_time,
                reason: describe_mismatches(mismatches),
            }),
            ScanFailure::Scan { .. } => None,
        }
    }
}

impl fmt::Display for ScanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFailure::Scan { path, error } => write!(f, "{}: {}", path.display(), error),
            ScanFailure::GeometryMismatch {
                path,
                run_time,
                mismatches,
            } => write!(
                f,
                "{}: geometry mismatch for run {}: {}",
                path.display(),
                run_time,
                describe_mismatches(mismatches)
            ),
        }
    }
}

fn describe_mismatches(mismatches: &[VariableMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A run with variables indexed outside their reference geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedRun {
    pub path: PathBuf,
    pub run_time: RunTime,
    /// The variables concerned and the geometry groups they went to
    pub mismatches: Vec<VariableMismatch>,
}

/// Outcome of one scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Files found under the root
    pub discovered: usize,
    /// Files opened by the codec
    pub scanned: usize,
    /// Runs new to the index
    pub added: Vec<RunTime>,
    /// Runs whose inventory was replaced
    pub updated: Vec<RunTime>,
    /// Runs left untouched
    pub unchanged: usize,
    /// Runs no longer indexed: the file vanished, or its rescan failed,
    /// was rejected or moved the run
    pub removed: Vec<RunTime>,
    /// Runs kept in a separate geometry group
    pub grouped: Vec<GroupedRun>,
    /// Files that were skipped
    pub failures: Vec<ScanFailure>,
    /// Whether the index was written to the store
    pub persisted: bool,
}

impl ScanReport {
    /// Whether the index content changed.
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.removed.is_empty()
    }
}

/// A collection of run files aggregated into one virtual dataset.
pub struct Collection {
    config: CollectionConfig,
    codec: Arc<dyn GridCodec>,
    store: Arc<dyn IndexStore>,
    reconciler: CoordinateReconciler,
    proxy: GridAccessProxy,
    writer: Mutex<CollectionIndex>,
    published: RwLock<Arc<IndexSnapshot>>,
}

impl Collection {
    /// Open a collection, reloading its persisted index when present.
    ///
    /// An unusable persisted index is deleted from the store with a
    /// warning; the next scan then rebuilds the index from every file.
    #[instrument(skip_all, fields(collection = %config.collection_id))]
    pub async fn open(
        config: CollectionConfig,
        codec: Arc<dyn GridCodec>,
        store: Arc<dyn IndexStore>,
    ) -> Result<Self> {
        config.validate().map_err(AggregationError::InvalidConfig)?;

        let index = match CollectionIndex::reload(&config.collection_id, store.as_ref()).await {
            Ok(Some(index)) => index,
            Ok(None) => CollectionIndex::new(&config.collection_id),
            Err(AggregationError::IndexCorruption(reason)) => {
                warn!(reason = %reason, store = %store.describe(), "Discarding persisted index, full re-scan required");
                if let Err(e) = store.delete(&config.index_key()).await {
                    warn!(error = %e, "Failed to delete persisted index");
                }
                CollectionIndex::new(&config.collection_id)
            }
            Err(e) => return Err(e),
        };

        info!(
            runs = index.len(),
            codec = codec.name(),
            store = %store.describe(),
            "Opened collection"
        );

        Ok(Self {
            reconciler: CoordinateReconciler::from_config(&config),
            proxy: GridAccessProxy::new(Arc::clone(&codec)),
            published: RwLock::new(index.snapshot()),
            writer: Mutex::new(index),
            config,
            codec,
            store,
        })
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn collection_id(&self) -> &str {
        &self.config.collection_id
    }

    /// Last published snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.published.read())
    }

    /// Geometry groups of the published snapshot, primary first.
    pub fn groups(&self) -> Vec<GeometryGroup> {
        self.snapshot().groups()
    }

    /// Incremental scan of the collection root.
    pub async fn scan(&self) -> Result<ScanReport> {
        self.scan_with(ScanMode::Incremental).await
    }

    /// Scan the collection root, merge the results and persist the index
    /// if it changed.
    ///
    /// Per-file problems are collected in the report. Dropping the future
    /// before it completes leaves the index untouched, unless only the
    /// final persist was still pending.
    #[instrument(skip(self), fields(collection = %self.config.collection_id))]
    pub async fn scan_with(&self, mode: ScanMode) -> Result<ScanReport> {
        let mut writer = self.writer.lock().await;
        let mut index = CollectionIndex::clone(&writer);
        let before = index.snapshot();

        let root = self.config.root.clone();
        let extensions = self.config.extensions.clone();
        let files = tokio::task::spawn_blocking(move || discover_files(&root, &extensions))
            .await
            .map_err(|e| anyhow::anyhow!("discovery task failed: {}", e))??;

        let mut report = ScanReport {
            discovered: files.len(),
            ..ScanReport::default()
        };

        // Evict runs whose file vanished
        let present: HashSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        for run in before.runs() {
            if !present.contains(run.path()) {
                debug!(run_time = %run.run_time(), path = %run.path().display(), "Backing file vanished");
                index.remove(run.run_time());
            }
        }

        let to_scan: Vec<DiscoveredFile> = files
            .iter()
            .filter(|file| match before.find_by_path(&file.path) {
                Some(run) => mode == ScanMode::Full || run.source().signature != file.signature,
                None => true,
            })
            .cloned()
            .collect();
        report.scanned = to_scan.len();
        report.unchanged = files.len() - to_scan.len();

        let (mut inventories, failures) = self.scan_files(to_scan).await;

        // A rescanned file no longer backs its old run, whatever the scan
        // produced; a successful scan merges the run back below.
        let rescanned = failures
            .iter()
            .map(ScanFailure::path)
            .chain(inventories.iter().map(RunInventory::path));
        for path in rescanned {
            if let Some(old) = before.find_by_path(path) {
                index.remove(old.run_time());
            }
        }

        report.failures = failures;
        self.drop_stale_references(&mut index);

        // Serial merge in run time order
        inventories.sort_by(|a, b| {
            a.run_time()
                .cmp(&b.run_time())
                .then_with(|| a.path().cmp(b.path()))
        });
        for inventory in inventories {
            self.merge_one(&mut index, &before, inventory, &mut report);
        }

        self.reseed_references(&mut index);

        let after = index.snapshot();
        report.removed = before
            .run_times()
            .into_iter()
            .filter(|run_time| after.get(*run_time).is_none())
            .collect();

        for failure in &report.failures {
            warn!(failure = %failure, "Skipped file");
        }

        let changed = report.changed() || after.references() != before.references();
        *writer = index;
        if changed {
            *self.published.write() = writer.snapshot();
            writer.persist(self.store.as_ref()).await?;
            report.persisted = true;
        }

        info!(
            discovered = report.discovered,
            scanned = report.scanned,
            added = report.added.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            grouped = report.grouped.len(),
            failed = report.failures.len(),
            runs = writer.len(),
            "Scan complete"
        );

        Ok(report)
    }

    /// Build inventories in parallel on blocking threads.
    async fn scan_files(&self, files: Vec<DiscoveredFile>) -> (Vec<RunInventory>, Vec<ScanFailure>) {
        let options = Arc::new(ScanOptions::from(&self.config));

        let results: Vec<(PathBuf, std::result::Result<RunInventory, ScanError>)> =
            stream::iter(files)
                .map(|file| {
                    let codec = Arc::clone(&self.codec);
                    let options = Arc::clone(&options);
                    async move {
                        let path = file.path.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            scan_file(codec.as_ref(), &file, &options)
                        })
                        .await
                        .unwrap_or_else(|e| Err(ScanError::Task(e.to_string())));
                        (path, result)
                    }
                })
                .buffer_unordered(self.config.scan_concurrency)
                .collect()
                .await;

        let mut inventories = Vec::new();
        let mut failures = Vec::new();
        for (path, result) in results {
            match result {
                Ok(inventory) => inventories.push(inventory),
                Err(error) => failures.push(ScanFailure::Scan { path, error }),
            }
        }
        failures.sort_by(|a, b| a.path().cmp(b.path()));

        (inventories, failures)
    }

    /// Reconcile one scanned run against the index and merge it.
    fn merge_one(
        &self,
        index: &mut CollectionIndex,
        before: &IndexSnapshot,
        inventory: RunInventory,
        report: &mut ScanReport,
    ) {
        let run_time = inventory.run_time();
        let path = inventory.path().to_path_buf();

        let current = index.snapshot();
        if let Some(existing) = current.get(run_time) {
            report.failures.push(ScanFailure::Scan {
                path,
                error: ScanError::DuplicateRun {
                    run_time,
                    existing: existing.path().to_path_buf(),
                },
            });
            return;
        }

        match self.reconciler.reconcile(&inventory, current.references()) {
            Reconciliation::Rejected { mismatches } => {
                report.failures.push(ScanFailure::GeometryMismatch {
                    path,
                    run_time,
                    mismatches,
                });
                return;
            }
            Reconciliation::Grouped { mismatches } => {
                for mismatch in &mismatches {
                    debug!(run_time = %run_time, variable = %mismatch.variable, group = %mismatch.geometry, reason = %mismatch.reason, "Variable grouped");
                }
                report.grouped.push(GroupedRun {
                    path,
                    run_time,
                    mismatches,
                });
            }
            Reconciliation::Accepted => {}
        }

        // The first run holding a variable sets its reference geometry.
        for name in inventory.variable_names() {
            if current.reference(name).is_some() {
                continue;
            }
            if let Some(geometry) = inventory.variable_geometry(name) {
                if self.reconciler.can_be_reference(geometry) {
                    index.set_reference(name, Some(geometry.clone()));
                }
            }
        }

        let previous = before.get(run_time);
        let unchanged = previous.map_or(false, |run| run.as_ref() == &inventory);
        index.merge(inventory);

        if unchanged {
            report.unchanged += 1;
        } else if previous.is_some() {
            report.updated.push(run_time);
        } else {
            report.added.push(run_time);
        }
    }

    /// Variables whose reference geometry no indexed run holds them on.
    fn stale_references(snapshot: &IndexSnapshot) -> Vec<String> {
        snapshot
            .references()
            .iter()
            .filter(|(variable, reference)| {
                !snapshot
                    .runs()
                    .any(|run| run.variable_geometry_id(variable) == Some(reference.id()))
            })
            .map(|(variable, _)| variable.clone())
            .collect()
    }

    fn drop_stale_references(&self, index: &mut CollectionIndex) {
        for variable in Self::stale_references(&index.snapshot()) {
            debug!(variable = %variable, "Dropping reference geometry");
            index.set_reference(&variable, None);
        }
    }

    /// Give every variable without a usable reference the geometry it has
    /// in the earliest eligible run.
    fn reseed_references(&self, index: &mut CollectionIndex) {
        self.drop_stale_references(index);

        let snapshot = index.snapshot();
        for variable in snapshot.variables() {
            if snapshot.reference(&variable).is_some() {
                continue;
            }
            let next = snapshot
                .runs()
                .filter_map(|run| run.variable_geometry(&variable))
                .find(|geometry| self.reconciler.can_be_reference(geometry))
                .cloned();

            if let Some(geometry) = next {
                info!(variable = %variable, reference = %geometry.id(), "Reference geometry changed");
                index.set_reference(&variable, Some(geometry));
            }
        }
    }

    /// View of a variable over the runs holding it on its reference
    /// geometry.
    pub fn view(&self, kind: ViewKind, variable: &str) -> Result<VirtualDatasetView> {
        let snapshot = self.snapshot();
        let group = snapshot.reference(variable).map(|g| g.id().clone());
        self.build_view(snapshot, kind, variable, group)
    }

    /// View of a variable over the runs holding it on one geometry.
    pub fn view_in_group(
        &self,
        kind: ViewKind,
        variable: &str,
        group: &GeometryId,
    ) -> Result<VirtualDatasetView> {
        let snapshot = self.snapshot();
        let on_group = snapshot
            .runs()
            .any(|run| run.variable_geometry_id(variable) == Some(group));
        if snapshot.variables().contains(variable) && !on_group {
            return Err(AggregationError::UnknownGeometry(format!(
                "{} for '{}'",
                group, variable
            )));
        }
        self.build_view(snapshot, kind, variable, Some(group.clone()))
    }

    fn build_view(
        &self,
        snapshot: Arc<IndexSnapshot>,
        kind: ViewKind,
        variable: &str,
        group: Option<GeometryId>,
    ) -> Result<VirtualDatasetView> {
        if !snapshot.variables().contains(variable) {
            return Err(AggregationError::UnknownVariable(variable.to_string()));
        }
        let axis = TimeAxisBuilder::build(&snapshot, variable, group.as_ref());
        VirtualDatasetView::new(kind, snapshot, axis, self.config.tie_break)
    }

    /// Map a logical index of a view to a file position.
    pub fn resolve(&self, view: &VirtualDatasetView, index: LogicalIndex) -> Result<ReadDescriptor> {
        self.proxy.resolve(view, index)
    }

    /// Decode the data behind a descriptor.
    pub async fn read(&self, descriptor: &ReadDescriptor) -> Result<NumericArray> {
        self.proxy.read(descriptor).await
    }
}
