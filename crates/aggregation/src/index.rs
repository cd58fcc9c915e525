//! The collection index: run time to run inventory, plus persistence.
//!
//! A [`CollectionIndex`] is mutated by a single writer. Readers work on
//! [`IndexSnapshot`]s, which are shared immutable values: mutation clones
//! the snapshot only when a reader still holds it.

use bytes::Bytes;
use fmrc_common::{CoordinateGeometry, GeometryId, RunTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::index_key;
use crate::error::{AggregationError, Result};
use crate::inventory::{variable_union, RunInventory};
use storage::IndexStore;

/// Version of the persisted index layout.
pub const FORMAT_VERSION: u32 = 2;

/// Runs with at least one variable on one coordinate geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryGroup {
    pub id: GeometryId,
    pub geometry: CoordinateGeometry,
    /// Sorted run times
    pub run_times: Vec<RunTime>,
    /// Variables found on this geometry in any run
    pub variables: BTreeSet<String>,
    /// Whether this is the reference geometry of some variable
    pub primary: bool,
}

/// Immutable, ordered view of an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexSnapshot {
    runs: BTreeMap<RunTime, Arc<RunInventory>>,
    /// Reference geometry per variable
    references: BTreeMap<String, CoordinateGeometry>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// All runs, sorted by run time.
    pub fn runs(&self) -> impl Iterator<Item = &Arc<RunInventory>> {
        self.runs.values()
    }

    pub fn run_times(&self) -> Vec<RunTime> {
        self.runs.keys().copied().collect()
    }

    pub fn get(&self, run_time: RunTime) -> Option<&Arc<RunInventory>> {
        self.runs.get(&run_time)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&Arc<RunInventory>> {
        self.runs.values().find(|r| r.path() == path)
    }

    /// Reference geometry of a variable.
    pub fn reference(&self, variable: &str) -> Option<&CoordinateGeometry> {
        self.references.get(variable)
    }

    pub fn references(&self) -> &BTreeMap<String, CoordinateGeometry> {
        &self.references
    }

    /// Whether some variable has `id` as its reference geometry.
    pub fn is_reference(&self, id: &GeometryId) -> bool {
        self.references.values().any(|g| g.id() == id)
    }

    /// Runs with at least one variable on `group`, sorted by run time.
    pub fn runs_in_group<'a>(
        &'a self,
        group: &'a GeometryId,
    ) -> impl Iterator<Item = &'a Arc<RunInventory>> + 'a {
        self.runs.values().filter(move |r| r.geometry(group).is_some())
    }

    /// Geometry groups: reference geometries first, then the others, each
    /// in order of their earliest run.
    pub fn groups(&self) -> Vec<GeometryGroup> {
        let mut groups: Vec<GeometryGroup> = Vec::new();

        for run in self.runs.values() {
            for geometry in run.geometries() {
                let position = match groups.iter().position(|g| &g.id == geometry.id()) {
                    Some(position) => position,
                    None => {
                        groups.push(GeometryGroup {
                            id: geometry.id().clone(),
                            geometry: geometry.clone(),
                            run_times: Vec::new(),
                            variables: BTreeSet::new(),
                            primary: self.is_reference(geometry.id()),
                        });
                        groups.len() - 1
                    }
                };

                let group = &mut groups[position];
                group.run_times.push(run.run_time());
                group.variables.extend(
                    run.variables()
                        .iter()
                        .filter(|(_, v)| &v.geometry == geometry.id())
                        .map(|(name, _)| name.clone()),
                );
            }
        }

        // Stable: groups were created in order of their earliest run.
        groups.sort_by_key(|g| !g.primary);
        groups
    }

    /// Distinct variable names across all runs.
    pub fn variables(&self) -> BTreeSet<String> {
        variable_union(self.runs.values().map(|r| r.as_ref()))
    }
}

/// Serialized form, written.
#[derive(Serialize)]
struct PersistedIndexRef<'a> {
    format_version: u32,
    collection_id: &'a str,
    references: &'a BTreeMap<String, CoordinateGeometry>,
    runs: Vec<&'a RunInventory>,
}

/// Serialized form, read.
#[derive(Deserialize)]
struct PersistedIndex {
    format_version: u32,
    collection_id: String,
    references: BTreeMap<String, CoordinateGeometry>,
    runs: Vec<RunInventory>,
}

/// Index of one collection.
#[derive(Debug, Clone)]
pub struct CollectionIndex {
    collection_id: String,
    state: Arc<IndexSnapshot>,
}

impl CollectionIndex {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            state: Arc::new(IndexSnapshot::default()),
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// Current state. Later mutations do not affect the returned snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&self.state)
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }

    /// Insert or replace the run with this inventory's run time.
    ///
    /// Returns `false` when an identical inventory is already present.
    pub fn merge(&mut self, inventory: RunInventory) -> bool {
        let run_time = inventory.run_time();
        if let Some(existing) = self.state.runs.get(&run_time) {
            if existing.as_ref() == &inventory {
                return false;
            }
        }

        Arc::make_mut(&mut self.state)
            .runs
            .insert(run_time, Arc::new(inventory));
        true
    }

    /// Remove a run. Returns the removed inventory, if present.
    pub fn remove(&mut self, run_time: RunTime) -> Option<Arc<RunInventory>> {
        if !self.state.runs.contains_key(&run_time) {
            return None;
        }
        Arc::make_mut(&mut self.state).runs.remove(&run_time)
    }

    /// Replace (or with `None` drop) a variable's reference geometry.
    /// Returns whether it changed.
    pub fn set_reference(&mut self, variable: &str, reference: Option<CoordinateGeometry>) -> bool {
        if self.state.references.get(variable) == reference.as_ref() {
            return false;
        }
        let references = &mut Arc::make_mut(&mut self.state).references;
        match reference {
            Some(geometry) => references.insert(variable.to_string(), geometry),
            None => references.remove(variable),
        };
        true
    }

    /// Write the whole index to `store` under the collection's key.
    #[instrument(skip(self, store), fields(collection = %self.collection_id, runs = self.len()))]
    pub async fn persist(&self, store: &dyn IndexStore) -> Result<()> {
        let persisted = PersistedIndexRef {
            format_version: FORMAT_VERSION,
            collection_id: &self.collection_id,
            references: &self.state.references,
            runs: self.state.runs.values().map(|r| r.as_ref()).collect(),
        };

        let json = serde_json::to_vec(&persisted)
            .map_err(|e| anyhow::anyhow!("Failed to serialize index: {}", e))?;
        let size = json.len();

        store
            .store(&index_key(&self.collection_id), Bytes::from(json))
            .await?;

        debug!(size, "Persisted index");
        Ok(())
    }

    /// Load a persisted index.
    ///
    /// Returns `Ok(None)` when nothing is stored for the collection and
    /// [`AggregationError::IndexCorruption`] when the stored index cannot be
    /// trusted (unreadable, other version or collection, bad geometry id,
    /// offsets outside the representable time range, broken invariants).
    #[instrument(skip(store))]
    pub async fn reload(collection_id: &str, store: &dyn IndexStore) -> Result<Option<Self>> {
        let Some(bytes) = store.load(&index_key(collection_id)).await? else {
            debug!("No persisted index");
            return Ok(None);
        };

        let persisted: PersistedIndex = serde_json::from_slice(&bytes)
            .map_err(|e| AggregationError::IndexCorruption(format!("unreadable index: {}", e)))?;

        if persisted.format_version != FORMAT_VERSION {
            return Err(AggregationError::IndexCorruption(format!(
                "format version {} (expected {})",
                persisted.format_version, FORMAT_VERSION
            )));
        }

        if persisted.collection_id != collection_id {
            return Err(AggregationError::IndexCorruption(format!(
                "index belongs to collection '{}'",
                persisted.collection_id
            )));
        }

        let mut runs = BTreeMap::new();
        for run in persisted.runs {
            run.validate()
                .map_err(|e| AggregationError::IndexCorruption(e.to_string()))?;

            let run_time = run.run_time();
            if runs.insert(run_time, Arc::new(run)).is_some() {
                return Err(AggregationError::IndexCorruption(format!(
                    "duplicate run {}",
                    run_time
                )));
            }
        }

        info!(runs = runs.len(), "Reloaded index");

        Ok(Some(Self {
            collection_id: collection_id.to_string(),
            state: Arc::new(IndexSnapshot {
                runs,
                references: persisted.references,
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        inventory, inventory_in, latlon_geometry, levels_geometry, mixed_inventory, run_at,
    };
    use storage::ObjectIndexStore;

    #[test]
    fn test_merge_keeps_unique_sorted_runs() {
        let mut index = CollectionIndex::new("gfs");

        assert!(index.merge(inventory(run_at(12), "/b.nc", &[("temp", &[0, 6])])));
        assert!(index.merge(inventory(run_at(0), "/a.nc", &[("temp", &[0, 6, 12])])));
        // Same run time, new content: replaced
        assert!(index.merge(inventory(run_at(12), "/b.nc", &[("temp", &[0, 6, 12])])));

        let snapshot = index.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.run_times(), vec![run_at(0), run_at(12)]);
        assert_eq!(snapshot.get(run_at(12)).unwrap().offsets("temp").len(), 3);
    }

    #[test]
    fn test_merge_identical_is_noop() {
        let mut index = CollectionIndex::new("gfs");
        let run = inventory(run_at(0), "/a.nc", &[("temp", &[0, 6])]);

        assert!(index.merge(run.clone()));
        let before = index.snapshot();
        assert!(!index.merge(run));
        assert!(Arc::ptr_eq(&before, &index.snapshot()));
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_merges() {
        let mut index = CollectionIndex::new("gfs");
        index.merge(inventory(run_at(0), "/a.nc", &[("temp", &[0])]));

        let snapshot = index.snapshot();
        index.merge(inventory(run_at(6), "/b.nc", &[("temp", &[0])]));
        index.remove(run_at(0));

        assert_eq!(snapshot.run_times(), vec![run_at(0)]);
        assert_eq!(index.snapshot().run_times(), vec![run_at(6)]);
    }

    #[test]
    fn test_remove() {
        let mut index = CollectionIndex::new("gfs");
        index.merge(inventory(run_at(0), "/a.nc", &[("temp", &[0])]));

        assert!(index.remove(run_at(6)).is_none());
        let removed = index.remove(run_at(0)).unwrap();
        assert_eq!(removed.path(), Path::new("/a.nc"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_groups_primary_first() {
        let mut index = CollectionIndex::new("gfs");
        let flat = latlon_geometry();
        let layered = levels_geometry(&[850.0, 500.0]);

        index.merge(inventory_in(layered.clone(), run_at(0), "/a.nc", &[("temp", &[0])]));
        index.merge(inventory(run_at(6), "/b.nc", &[("temp", &[0])]));
        index.merge(inventory(run_at(12), "/c.nc", &[("temp", &[0])]));
        index.set_reference("temp", Some(flat.clone()));

        let snapshot = index.snapshot();
        let groups = snapshot.groups();
        assert_eq!(groups.len(), 2);
        assert!(groups[0].primary);
        assert_eq!(&groups[0].id, flat.id());
        assert_eq!(groups[0].run_times, vec![run_at(6), run_at(12)]);
        assert_eq!(&groups[1].id, layered.id());
        assert!(!groups[1].primary);
        assert_eq!(snapshot.runs_in_group(layered.id()).count(), 1);
    }

    #[test]
    fn test_groups_follow_variable_geometries() {
        let mut index = CollectionIndex::new("rtofs");
        let surface = latlon_geometry();
        let layered = levels_geometry(&[850.0, 500.0]);

        index.merge(mixed_inventory(
            run_at(0),
            "/a.nc",
            &[("temp", &layered, &[0, 6]), ("precip", &surface, &[0, 6])],
        ));
        index.merge(mixed_inventory(run_at(12), "/b.nc", &[("precip", &surface, &[0])]));
        index.set_reference("temp", Some(layered.clone()));
        index.set_reference("precip", Some(surface.clone()));

        let snapshot = index.snapshot();
        let groups = snapshot.groups();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.primary));

        let surface_group = groups.iter().find(|g| &g.id == surface.id()).unwrap();
        assert_eq!(surface_group.run_times, vec![run_at(0), run_at(12)]);
        assert_eq!(
            surface_group.variables.iter().collect::<Vec<_>>(),
            vec!["precip"]
        );

        let layered_group = groups.iter().find(|g| &g.id == layered.id()).unwrap();
        assert_eq!(layered_group.run_times, vec![run_at(0)]);

        assert_eq!(snapshot.reference("temp"), Some(&layered));
        assert!(snapshot.reference("wind").is_none());

        assert!(index.set_reference("temp", None));
        assert!(!index.set_reference("temp", None));
        assert!(!index.snapshot().is_reference(layered.id()));
    }

    #[tokio::test]
    async fn test_persist_reload_roundtrip() {
        let store = ObjectIndexStore::in_memory();
        let mut index = CollectionIndex::new("gfs");
        index.merge(inventory(run_at(0), "/a.nc", &[("temp", &[0, 6, 12]), ("wind", &[0])]));
        index.merge(inventory(run_at(12), "/b.nc", &[("temp", &[0, 6])]));
        index.set_reference("temp", Some(latlon_geometry()));
        index.set_reference("wind", Some(latlon_geometry()));

        index.persist(&store).await.unwrap();
        let reloaded = CollectionIndex::reload("gfs", &store).await.unwrap().unwrap();

        assert_eq!(reloaded.snapshot().as_ref(), index.snapshot().as_ref());
        assert!(CollectionIndex::reload("nam", &store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_detects_corruption() {
        let store = ObjectIndexStore::in_memory();
        let mut index = CollectionIndex::new("gfs");
        index.merge(inventory(run_at(0), "/a.nc", &[("temp", &[0, 6])]));
        index.persist(&store).await.unwrap();

        let stored = store.load("gfs/index.json").await.unwrap().unwrap();
        let text = String::from_utf8(stored.to_vec()).unwrap();

        // Unknown format version
        let bumped = text.replace(
            &format!("\"format_version\":{}", FORMAT_VERSION),
            "\"format_version\":99",
        );
        store.store("gfs/index.json", Bytes::from(bumped)).await.unwrap();
        assert!(matches!(
            CollectionIndex::reload("gfs", &store).await,
            Err(AggregationError::IndexCorruption(_))
        ));

        // Tampered geometry id
        let id = latlon_geometry().id().to_string();
        let tampered = text.replace(&id, "00000000");
        store.store("gfs/index.json", Bytes::from(tampered)).await.unwrap();
        assert!(matches!(
            CollectionIndex::reload("gfs", &store).await,
            Err(AggregationError::IndexCorruption(_))
        ));

        // Offset beyond what a timestamp can hold
        assert!(text.contains("[0,21600]"));
        let far = text.replace("[0,21600]", "[0,9000000000000000000]");
        store.store("gfs/index.json", Bytes::from(far)).await.unwrap();
        match CollectionIndex::reload("gfs", &store).await {
            Err(AggregationError::IndexCorruption(reason)) => {
                assert!(reason.contains("out of range"), "{}", reason)
            }
            other => panic!("unexpected reload result: {:?}", other.map(|i| i.is_some())),
        }

        // Garbage
        store.store("gfs/index.json", Bytes::from_static(b"{not json")).await.unwrap();
        assert!(matches!(
            CollectionIndex::reload("gfs", &store).await,
            Err(AggregationError::IndexCorruption(_))
        ));

        // Written for another collection
        store.store("nam/index.json", Bytes::from(text)).await.unwrap();
        assert!(matches!(
            CollectionIndex::reload("nam", &store).await,
            Err(AggregationError::IndexCorruption(_))
        ));
    }
}
