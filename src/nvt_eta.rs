// Arrival aggregation: soonest upcoming arrival per stop, in whole minutes
use crate::nvt_models::{EtaRecord, StopRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// `None` means no upcoming arrival is known for that stop.
pub type Arrivals = HashMap<String, Option<i64>>;

/// One line of the arrival board, in stop order.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRow<'a> {
    pub stop: &'a StopRecord,
    pub minutes: Option<i64>,
}

/// Soonest non-expired arrival for each known stop, as minutes from `now`.
///
/// Records for stops outside `known_stop_ids` are ignored and records
/// strictly before `now` are treated as expired.
pub fn aggregate<S: AsRef<str>>(
    records: &[EtaRecord],
    known_stop_ids: &[S],
    now: DateTime<Utc>,
) -> Arrivals {
    let mut soonest: HashMap<&str, DateTime<Utc>> = HashMap::new();

    for record in records.iter().filter(|r| r.arrival >= now) {
        soonest
            .entry(record.stop_id.as_str())
            .and_modify(|current| {
                if record.arrival < *current {
                    *current = record.arrival;
                }
            })
            .or_insert(record.arrival);
    }

    known_stop_ids
        .iter()
        .map(|id| {
            let id = id.as_ref();
            let minutes = soonest.get(id).map(|arrival| minutes_until(*arrival, now));
            (id.to_string(), minutes)
        })
        .collect()
}

/// Whole minutes until `arrival`, floored and never negative.
pub fn minutes_until(arrival: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (arrival - now).num_seconds().div_euclid(60).max(0)
}

pub fn arrival_board<'a>(stops: &'a [StopRecord], arrivals: &Arrivals) -> Vec<ArrivalRow<'a>> {
    stops
        .iter()
        .map(|stop| ArrivalRow {
            stop,
            minutes: arrivals.get(&stop.stop_id).copied().flatten(),
        })
        .collect()
}
