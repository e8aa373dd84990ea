// Keeps the markers on the map in step with the latest vehicle set
use crate::nvt_models::VehicleEntity;
use crate::nvt_views::MapSurface;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Keys touched by one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Sole owner of the identity key → marker handle mapping.
///
/// After every `reconcile` the keys are exactly those of the entities passed
/// in, each backed by a single marker.
pub struct EntityReconciler<H> {
    displayed: HashMap<String, H>,
}

impl<H: Clone> EntityReconciler<H> {
    pub fn new() -> Self {
        EntityReconciler { displayed: HashMap::new() }
    }

    pub fn reconcile<M>(&mut self, map: &mut M, entities: &[VehicleEntity]) -> ReconcileReport
    where
        M: MapSurface<Handle = H>,
    {
        let mut report = ReconcileReport::default();
        let mut next: HashMap<String, H> = HashMap::with_capacity(entities.len());

        for entity in entities {
            if next.contains_key(&entity.identity_key) {
                warn!("Entity {} listed twice in one tick, ignoring repeat", entity.identity_key);
                continue;
            }

            let handle = match self.displayed.remove(&entity.identity_key) {
                Some(handle) => {
                    map.move_marker(&handle, entity.coordinate);
                    report.updated.push(entity.identity_key.clone());
                    handle
                }
                None => {
                    report.created.push(entity.identity_key.clone());
                    map.create_vehicle_marker(entity.coordinate, &entity.label, entity.source_kind)
                }
            };
            next.insert(entity.identity_key.clone(), handle);
        }

        // Whatever is left was not in this tick.
        let mut stale: Vec<(String, H)> = self.displayed.drain().collect();
        stale.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, handle) in stale {
            map.remove_marker(handle);
            report.removed.push(key);
        }

        self.displayed = next;

        debug!(
            "Reconciled: {} created, {} updated, {} removed",
            report.created.len(),
            report.updated.len(),
            report.removed.len()
        );
        report
    }

    /// Drop every displayed entity and release its marker.
    pub fn clear_reset<M>(&mut self, map: &mut M)
    where
        M: MapSurface<Handle = H>,
    {
        for (_, handle) in self.displayed.drain() {
            map.remove_marker(handle);
        }
    }

    pub fn keys(&self) -> HashSet<&str> {
        self.displayed.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.displayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.displayed.is_empty()
    }
}

impl<H: Clone> Default for EntityReconciler<H> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Recording map used by the engine tests
// ============================================================================
