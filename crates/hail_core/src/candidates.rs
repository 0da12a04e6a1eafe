//! Last-known driver state fed by backend snapshots and row updates.
//!
//! The pool keeps one [`DriverCandidate`] per driver id plus an H3 cell index
//! (forward and reverse maps) so vicinity queries touch only nearby cells
//! instead of scanning the whole fleet. Default resolution is 9 (~240m cell
//! size), fine-grained enough for city fleets.

use std::collections::{BTreeMap, HashMap};

use h3o::{CellIndex, LatLng, Resolution};
use serde::{Deserialize, Serialize};

use crate::geo::{BoundingBox, Coordinate};

/// Positions older than this are ignored by the eligibility filter: 24 hours.
pub const DEFAULT_FRESHNESS_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Backend lifecycle state of a driver row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Active,
    Inactive,
}

/// One driver row change as delivered by the data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverUpdate {
    pub id: String,
    pub location: Option<Coordinate>,
    pub status: DriverStatus,
    pub is_available: bool,
    /// Zero stands for "stamp at load time" in scenario files.
    #[serde(default)]
    pub updated_at_ms: u64,
}

/// A driver as seen by nearest-candidate selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverCandidate {
    pub id: String,
    pub location: Option<Coordinate>,
    pub is_available: bool,
    pub last_updated_ms: u64,
}

impl DriverCandidate {
    /// Eligible candidates have a position, are accepting rides, and were
    /// heard from within the freshness window.
    pub fn is_eligible(&self, now_ms: u64, freshness_window_ms: u64) -> bool {
        self.location.is_some()
            && self.is_available
            && now_ms.saturating_sub(self.last_updated_ms) <= freshness_window_ms
    }
}

/// In-memory pool of driver candidates with an H3 cell index.
///
/// Iteration order is by driver id, so repeated queries over the same state
/// are deterministic.
#[derive(Debug)]
pub struct CandidatePool {
    resolution: Resolution,
    freshness_window_ms: u64,
    drivers: BTreeMap<String, DriverCandidate>,
    drivers_by_cell: HashMap<CellIndex, Vec<String>>,
    driver_id_to_cell: HashMap<String, CellIndex>,
}

impl Default for CandidatePool {
    fn default() -> Self {
        Self {
            resolution: Resolution::Nine,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
            drivers: BTreeMap::new(),
            drivers_by_cell: HashMap::new(),
            driver_id_to_cell: HashMap::new(),
        }
    }
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_freshness_window_ms(mut self, window_ms: u64) -> Self {
        self.freshness_window_ms = window_ms;
        self
    }

    pub fn freshness_window_ms(&self) -> u64 {
        self.freshness_window_ms
    }

    /// Replace the pool contents from a full snapshot.
    pub fn load_snapshot(&mut self, rows: impl IntoIterator<Item = DriverUpdate>) {
        self.clear();
        for row in rows {
            self.apply_update(row);
        }
    }

    /// Apply one row change. Inactive or unavailable rows drop the driver
    /// from the pool; anything else inserts or refreshes it.
    pub fn apply_update(&mut self, update: DriverUpdate) {
        if update.status != DriverStatus::Active || !update.is_available {
            if self.remove(&update.id).is_some() {
                log::debug!("driver {} left the pool", update.id);
            }
            return;
        }
        match update.location {
            Some(position) => self.index_position(&update.id, position),
            None => self.unindex(&update.id),
        }
        let candidate = DriverCandidate {
            id: update.id.clone(),
            location: update.location,
            is_available: update.is_available,
            last_updated_ms: update.updated_at_ms,
        };
        self.drivers.insert(update.id, candidate);
    }

    /// Remove a driver from the pool and its cell index.
    pub fn remove(&mut self, driver_id: &str) -> Option<DriverCandidate> {
        self.unindex(driver_id);
        self.drivers.remove(driver_id)
    }

    pub fn get(&self, driver_id: &str) -> Option<&DriverCandidate> {
        self.drivers.get(driver_id)
    }

    /// All candidates passing the eligibility filter at `now_ms`.
    pub fn eligible(&self, now_ms: u64) -> Vec<&DriverCandidate> {
        self.drivers
            .values()
            .filter(|candidate| candidate.is_eligible(now_ms, self.freshness_window_ms))
            .collect()
    }

    /// Candidates indexed within K grid distance of `origin`'s cell.
    ///
    /// This is a spatial prefilter only; callers still apply the eligibility
    /// filter (unlocated drivers are never indexed, so they never show up).
    pub fn in_cell_disk(&self, origin: Coordinate, k: u32) -> Vec<&DriverCandidate> {
        let Some(origin_cell) = cell_for(origin, self.resolution) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for cell in origin_cell.grid_disk::<Vec<_>>(k) {
            if let Some(ids) = self.drivers_by_cell.get(&cell) {
                found.extend(ids.iter().filter_map(|id| self.drivers.get(id)));
            }
        }
        found
    }

    /// Located candidates inside `bounds`, in driver-id order.
    ///
    /// Same contract as `in_cell_disk`: a spatial prefilter that leaves the
    /// eligibility check to the caller.
    pub fn in_bounds(&self, bounds: &BoundingBox) -> Vec<&DriverCandidate> {
        self.drivers
            .values()
            .filter(|candidate| match candidate.location {
                Some(position) => bounds.contains(position),
                None => false,
            })
            .collect()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &DriverCandidate> {
        self.drivers.values()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn clear(&mut self) {
        self.drivers.clear();
        self.drivers_by_cell.clear();
        self.driver_id_to_cell.clear();
    }

    fn index_position(&mut self, driver_id: &str, position: Coordinate) {
        let Some(cell) = cell_for(position, self.resolution) else {
            self.unindex(driver_id);
            return;
        };
        if self.driver_id_to_cell.get(driver_id) == Some(&cell) {
            return;
        }
        self.unindex(driver_id);
        self.drivers_by_cell
            .entry(cell)
            .or_insert_with(Vec::new)
            .push(driver_id.to_string());
        self.driver_id_to_cell.insert(driver_id.to_string(), cell);
    }

    fn unindex(&mut self, driver_id: &str) {
        if let Some(cell) = self.driver_id_to_cell.remove(driver_id) {
            if let Some(ids) = self.drivers_by_cell.get_mut(&cell) {
                ids.retain(|id| id != driver_id);
                if ids.is_empty() {
                    self.drivers_by_cell.remove(&cell);
                }
            }
        }
    }
}

fn cell_for(position: Coordinate, resolution: Resolution) -> Option<CellIndex> {
    LatLng::new(position.latitude, position.longitude)
        .ok()
        .map(|ll| ll.to_cell(resolution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::active_driver_row;

    const NOW_MS: u64 = 1_700_000_000_000;

    #[test]
    fn eligible_applies_the_freshness_window() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("fresh", 13.6929, -89.2182, NOW_MS));
        pool.apply_update(active_driver_row(
            "edge",
            13.6930,
            -89.2183,
            NOW_MS - DEFAULT_FRESHNESS_WINDOW_MS,
        ));
        pool.apply_update(active_driver_row(
            "stale",
            13.6931,
            -89.2184,
            NOW_MS - DEFAULT_FRESHNESS_WINDOW_MS - 1,
        ));

        let ids: Vec<&str> = pool
            .eligible(NOW_MS)
            .into_iter()
            .map(|candidate| candidate.id.as_str())
            .collect();
        assert_eq!(ids, vec!["edge", "fresh"]);
    }

    #[test]
    fn unavailable_or_inactive_updates_remove_the_driver() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("d1", 13.6929, -89.2182, NOW_MS));
        assert_eq!(pool.len(), 1);

        let mut off_shift = active_driver_row("d1", 13.6929, -89.2182, NOW_MS);
        off_shift.is_available = false;
        pool.apply_update(off_shift);
        assert!(pool.is_empty());

        pool.apply_update(active_driver_row("d2", 13.6929, -89.2182, NOW_MS));
        let mut deactivated = active_driver_row("d2", 13.6929, -89.2182, NOW_MS);
        deactivated.status = DriverStatus::Inactive;
        pool.apply_update(deactivated);
        assert!(pool.get("d2").is_none());
    }

    #[test]
    fn update_without_location_keeps_the_driver_but_unindexes_it() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("d1", 13.6929, -89.2182, NOW_MS));

        let mut unlocated = active_driver_row("d1", 0.0, 0.0, NOW_MS);
        unlocated.location = None;
        pool.apply_update(unlocated);

        assert!(pool.get("d1").is_some());
        let origin = Coordinate::new(13.6929, -89.2182).expect("valid");
        assert!(pool.in_cell_disk(origin, 3).is_empty());
        assert!(pool.eligible(NOW_MS).is_empty());
    }

    #[test]
    fn bounds_query_keeps_located_drivers_inside_the_box() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("inside", 13.6940, -89.2182, NOW_MS));
        pool.apply_update(active_driver_row("north", 13.8100, -89.2182, NOW_MS));
        let mut unlocated = active_driver_row("ghost", 0.0, 0.0, NOW_MS);
        unlocated.location = None;
        pool.apply_update(unlocated);

        let city = BoundingBox {
            min_latitude: 13.60,
            min_longitude: -89.30,
            max_latitude: 13.75,
            max_longitude: -89.10,
        };
        let ids: Vec<&str> = pool
            .in_bounds(&city)
            .into_iter()
            .map(|candidate| candidate.id.as_str())
            .collect();
        assert_eq!(ids, vec!["inside"]);
    }

    #[test]
    fn cell_disk_query_finds_nearby_drivers_only() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("near", 13.6940, -89.2182, NOW_MS));
        pool.apply_update(active_driver_row("far", 13.7400, -89.2182, NOW_MS));

        let origin = Coordinate::new(13.6929, -89.2182).expect("valid");
        let ids: Vec<&str> = pool
            .in_cell_disk(origin, 3)
            .into_iter()
            .map(|candidate| candidate.id.as_str())
            .collect();
        assert_eq!(ids, vec!["near"]);

        // widening the disk eventually reaches the far driver too
        let wide: Vec<&str> = pool
            .in_cell_disk(origin, 40)
            .into_iter()
            .map(|candidate| candidate.id.as_str())
            .collect();
        assert!(wide.contains(&"far"));
    }

    #[test]
    fn position_updates_move_the_driver_between_cells() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("d1", 13.6929, -89.2182, NOW_MS));
        pool.apply_update(active_driver_row("d1", 13.7400, -89.2182, NOW_MS + 1_000));

        let old_origin = Coordinate::new(13.6929, -89.2182).expect("valid");
        let new_origin = Coordinate::new(13.7400, -89.2182).expect("valid");
        assert!(pool.in_cell_disk(old_origin, 3).is_empty());
        assert_eq!(pool.in_cell_disk(new_origin, 3).len(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn load_snapshot_replaces_previous_contents() {
        let mut pool = CandidatePool::new();
        pool.apply_update(active_driver_row("old", 13.6929, -89.2182, NOW_MS));

        pool.load_snapshot(vec![
            active_driver_row("a", 13.6929, -89.2182, NOW_MS),
            active_driver_row("b", 13.6950, -89.2200, NOW_MS),
        ]);

        assert_eq!(pool.len(), 2);
        assert!(pool.get("old").is_none());
    }
}
