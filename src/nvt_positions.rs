// Vehicle position strategies
//
// Direct operators publish GPS positions, so entities map one-to-one onto
// feed reports. Estimated operators only publish arrival times; there the
// vehicles are spread along the ordered stop sequence.

use crate::nvt_eta::Arrivals;
use crate::nvt_models::{Coordinate, RawVehicleReport, SourceKind, StopRecord, VehicleEntity};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const MIN_ESTIMATED_VEHICLES: usize = 1;
pub const MAX_ESTIMATED_VEHICLES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStrategy {
    Direct,
    Estimated,
}

// ============================================================================
// Vehicle count estimation
// ============================================================================

/// What a count estimator gets to look at.
pub struct RouteSignal<'a> {
    pub stops: &'a [StopRecord],
    pub arrivals: &'a Arrivals,
}

pub trait CountEstimator: Send {
    fn estimate(&mut self, signal: &RouteSignal<'_>) -> usize;
}

/// Uniform guess between 1 and 6 vehicles.
pub struct RandomCount {
    rng: StdRng,
}

impl RandomCount {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        RandomCount { rng }
    }
}

impl CountEstimator for RandomCount {
    fn estimate(&mut self, _signal: &RouteSignal<'_>) -> usize {
        self.rng.random_range(MIN_ESTIMATED_VEHICLES..=MAX_ESTIMATED_VEHICLES)
    }
}

pub struct FixedCount(pub usize);

impl CountEstimator for FixedCount {
    fn estimate(&mut self, _signal: &RouteSignal<'_>) -> usize {
        self.0
    }
}

/// Counts vehicles from the shape of the arrival times along the route.
///
/// Walking the stops in order, the soonest arrival normally grows from one
/// stop to the next. Wherever it drops, a different vehicle must be serving
/// the later stop. The lead vehicle approaching the first timed stop counts
/// too. Falls back to `fallback` when fewer than two stops carry a time.
pub struct EtaSpacingCount {
    fallback: Box<dyn CountEstimator>,
}

impl EtaSpacingCount {
    pub fn new(fallback: Box<dyn CountEstimator>) -> Self {
        EtaSpacingCount { fallback }
    }
}

impl CountEstimator for EtaSpacingCount {
    fn estimate(&mut self, signal: &RouteSignal<'_>) -> usize {
        let timed: Vec<i64> = signal
            .stops
            .iter()
            .filter_map(|stop| signal.arrivals.get(&stop.stop_id).copied().flatten())
            .collect();

        if timed.len() < 2 {
            return self.fallback.estimate(signal);
        }

        let drops = timed.windows(2).filter(|pair| pair[1] < pair[0]).count();
        (drops + 1).clamp(MIN_ESTIMATED_VEHICLES, MAX_ESTIMATED_VEHICLES)
    }
}

// ============================================================================
// Entity derivation
// ============================================================================

/// Entities for a GPS feed, restricted to `route`.
///
/// Reports with unusable coordinates or no identity are skipped; the rest of
/// the batch still goes through.
pub fn direct_entities(reports: &[RawVehicleReport], route: &str) -> Vec<VehicleEntity> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for report in reports.iter().filter(|r| r.route.eq_ignore_ascii_case(route)) {
        let Some(physical_id) = physical_id(report) else {
            warn!("Skipping vehicle report on route {} without plate or id", report.route);
            continue;
        };

        let Some(coordinate) = Coordinate::parse(&report.lat, &report.lon) else {
            warn!(
                "Skipping vehicle {} with bad coordinates ({:?}, {:?})",
                physical_id, report.lat, report.lon
            );
            continue;
        };

        let identity_key = format!("{}:{}", route, physical_id);
        if !seen.insert(identity_key.clone()) {
            debug!("Duplicate report for {}, keeping the first one", identity_key);
            continue;
        }

        entities.push(VehicleEntity {
            label: format!("{} · {} · {}", route, SourceKind::Direct.tag(), physical_id),
            identity_key,
            coordinate,
            source_kind: SourceKind::Direct,
        });
    }

    entities
}

fn physical_id(report: &RawVehicleReport) -> Option<String> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };

    non_empty(&report.plate).or_else(|| non_empty(&report.vehicle_id).map(|id| format!("#{}", id)))
}

/// Evenly spaced placeholder vehicles along the stop sequence.
///
/// Vehicle `i` of `count` sits on stop `floor(i / (count + 1) * (stops - 1))`.
/// Keys are `<operator>_<route>_<slot>`, so identity follows rank along the
/// route rather than any physical bus.
pub fn estimated_entities(
    operator: &str,
    route: &str,
    stops: &[StopRecord],
    count: usize,
) -> Vec<VehicleEntity> {
    if stops.len() < 2 {
        return Vec::new();
    }

    let count = count.max(MIN_ESTIMATED_VEHICLES);
    let last = stops.len() - 1;

    (1..=count)
        .map(|i| {
            let stop_index = (i * last) / (count + 1);
            let slot = i - 1;
            VehicleEntity {
                identity_key: format!("{}_{}_{}", operator, route, slot),
                coordinate: stops[stop_index].coordinate,
                source_kind: SourceKind::Estimated,
                label: format!("{} · {} #{}", route, SourceKind::Estimated.tag(), i),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stops(coords: &[(f64, f64)]) -> Vec<StopRecord> {
        coords
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| StopRecord {
                stop_id: format!("S{}", i),
                name: format!("Stop {}", i),
                coordinate: Coordinate::new(*lat, *lon),
            })
            .collect()
    }

    fn report(route: &str, plate: Option<&str>, id: Option<&str>, lat: &str, lon: &str) -> RawVehicleReport {
        RawVehicleReport {
            route: route.to_string(),
            lat: lat.to_string(),
            lon: lon.to_string(),
            plate: plate.map(String::from),
            vehicle_id: id.map(String::from),
        }
    }

    #[test]
    fn three_stops_two_vehicles_land_on_first_two_stops() {
        let route = stops(&[(22.30, 114.17), (22.31, 114.18), (22.32, 114.19)]);
        let entities = estimated_entities("KMB", "1A", &route, 2);

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].coordinate, route[0].coordinate);
        assert_eq!(entities[1].coordinate, route[1].coordinate);
        assert_eq!(entities[0].identity_key, "KMB_1A_0");
        assert_eq!(entities[1].identity_key, "KMB_1A_1");
        assert!(entities.iter().all(|e| e.source_kind == SourceKind::Estimated));
    }

    #[test]
    fn estimated_floor_is_one_vehicle() {
        let route = stops(&[(22.30, 114.17), (22.31, 114.18)]);
        assert_eq!(estimated_entities("KMB", "1A", &route, 0).len(), 1);
    }

    #[test]
    fn fewer_than_two_stops_yield_nothing() {
        assert!(estimated_entities("KMB", "1A", &[], 3).is_empty());
        let single = stops(&[(22.30, 114.17)]);
        assert!(estimated_entities("KMB", "1A", &single, 3).is_empty());
    }

    #[test]
    fn estimated_never_reaches_last_stop() {
        let route = stops(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0), (4.0, 4.0), (5.0, 5.0), (6.0, 6.0)]);
        for count in 1..=MAX_ESTIMATED_VEHICLES {
            let entities = estimated_entities("KMB", "1A", &route, count);
            assert_eq!(entities.len(), count);
            assert!(entities.iter().all(|e| e.coordinate != route[5].coordinate));
        }
    }

    #[test]
    fn direct_filters_route_and_skips_bad_coordinates() {
        let reports = vec![
            report("1A", Some("AB123"), None, "22.30", "114.17"),
            report("2", Some("ZZ999"), None, "22.31", "114.18"),
            report("1A", Some("CD456"), None, "not-a-number", "114.18"),
            report("1A", None, Some("77"), "22.33", "114.19"),
            report("1A", None, None, "22.34", "114.20"),
        ];

        let entities = direct_entities(&reports, "1A");
        let keys: Vec<&str> = entities.iter().map(|e| e.identity_key.as_str()).collect();

        assert_eq!(keys, vec!["1A:AB123", "1A:#77"]);
        assert!(entities.iter().all(|e| e.source_kind == SourceKind::Direct));
        assert!(entities[0].label.contains("GPS"));
    }

    #[test]
    fn direct_keys_are_stable_across_positions() {
        let first = direct_entities(&[report("1A", Some("AB123"), Some("9"), "22.30", "114.17")], "1A");
        let second = direct_entities(&[report("1A", Some("AB123"), Some("9"), "22.35", "114.21")], "1A");

        assert_eq!(first[0].identity_key, second[0].identity_key);
        assert_ne!(first[0].coordinate, second[0].coordinate);
    }

    #[test]
    fn direct_drops_duplicate_reports() {
        let reports = vec![
            report("1A", Some("AB123"), None, "22.30", "114.17"),
            report("1A", Some("AB123"), None, "22.31", "114.18"),
        ];
        let entities = direct_entities(&reports, "1A");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].coordinate, Coordinate::new(22.30, 114.17));
    }

    #[test]
    fn random_count_stays_in_bounds() {
        let route = stops(&[(1.0, 1.0), (2.0, 2.0)]);
        let arrivals = HashMap::new();
        let signal = RouteSignal { stops: &route, arrivals: &arrivals };
        let mut estimator = RandomCount::new(Some(7));

        for _ in 0..200 {
            let n = estimator.estimate(&signal);
            assert!((MIN_ESTIMATED_VEHICLES..=MAX_ESTIMATED_VEHICLES).contains(&n));
        }
    }

    #[test]
    fn seeded_random_count_is_repeatable() {
        let route = stops(&[(1.0, 1.0), (2.0, 2.0)]);
        let arrivals = HashMap::new();
        let signal = RouteSignal { stops: &route, arrivals: &arrivals };

        let mut a = RandomCount::new(Some(42));
        let mut b = RandomCount::new(Some(42));
        let left: Vec<usize> = (0..10).map(|_| a.estimate(&signal)).collect();
        let right: Vec<usize> = (0..10).map(|_| b.estimate(&signal)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn eta_spacing_counts_drops() {
        let route = stops(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0), (4.0, 4.0), (5.0, 5.0)]);
        let arrivals: Arrivals = [
            ("S0".to_string(), Some(2)),
            ("S1".to_string(), Some(5)),
            ("S2".to_string(), Some(1)),
            ("S3".to_string(), None),
            ("S4".to_string(), Some(4)),
        ]
        .into_iter()
        .collect();
        let signal = RouteSignal { stops: &route, arrivals: &arrivals };

        let mut estimator = EtaSpacingCount::new(Box::new(FixedCount(6)));
        assert_eq!(estimator.estimate(&signal), 2);
    }

    #[test]
    fn eta_spacing_falls_back_without_enough_times() {
        let route = stops(&[(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
        let arrivals: Arrivals = [("S1".to_string(), Some(3))].into_iter().collect();
        let signal = RouteSignal { stops: &route, arrivals: &arrivals };

        let mut estimator = EtaSpacingCount::new(Box::new(FixedCount(4)));
        assert_eq!(estimator.estimate(&signal), 4);
    }
}
