// Data source adapter
//
// One `HttpSource` serves every configured operator. Endpoint templates and
// the loose JSON readers below absorb the differences between operators;
// everything handed back to the engine is already typed.
//
// Accepted payload shapes:
// - a bare array, a bare object, or either one wrapped in {"data": ...}
// - numbers as JSON numbers or as numeric strings
// - vehicles as JSON or as a GTFS-Realtime protobuf feed

use crate::nvt_config::{CountEstimation, OperatorConfig, VehicleFeedFormat};
use crate::nvt_models::{Coordinate, Direction, EtaRecord, NVTError, RawVehicleReport, Result, RouteSelection, StopRecord};
use crate::nvt_positions::PositionStrategy;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use gtfs_rt::FeedMessage;
use log::{debug, warn};
use prost::Message;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Stop ids of a route keyed by their 1-based position along it.
pub type StopSequence = BTreeMap<u32, String>;

/// How the engine should treat an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorProfile {
    pub code: String,
    pub name: String,
    pub strategy: PositionStrategy,
    pub count_estimation: CountEstimation,
}

/// Fetch operations the engine needs from an operator.
///
/// Every fetch may fail; callers degrade a failure to an empty result.
pub trait TransitSource: Send + Sync + 'static {
    /// Looks an operator up by code, case-insensitively.
    fn profile(&self, operator: &str) -> Option<OperatorProfile>;

    fn operators(&self) -> Vec<OperatorProfile>;

    fn fetch_stops(&self, selection: &RouteSelection) -> impl Future<Output = Result<Vec<StopRecord>>> + Send;

    fn fetch_etas(&self, selection: &RouteSelection) -> impl Future<Output = Result<Vec<EtaRecord>>> + Send;

    fn fetch_vehicles(&self, operator: &str, route: &str) -> impl Future<Output = Result<Vec<RawVehicleReport>>> + Send;
}

// ============================================================================
// Loose payload readers
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Loose {
    Int(i64),
    UInt(u64),
    Number(f64),
    Text(String),
}

impl Loose {
    fn text(&self) -> String {
        match self {
            Loose::Int(n) => n.to_string(),
            Loose::UInt(n) => n.to_string(),
            Loose::Number(n) => n.to_string(),
            Loose::Text(s) => s.trim().to_string(),
        }
    }

    /// A positive whole number, as used for stop sequences.
    fn index(&self) -> Option<u32> {
        let n = match self {
            Loose::Int(n) => u32::try_from(*n).ok(),
            Loose::UInt(n) => u32::try_from(*n).ok(),
            Loose::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n <= u32::MAX as f64 => Some(*n as u32),
            Loose::Number(_) => None,
            Loose::Text(s) => s.trim().parse().ok(),
        };
        n.filter(|n| *n >= 1)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<serde_json::Value>),
    One(serde_json::Value),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { data: OneOrMany },
    Bare(OneOrMany),
}

/// Decode every item of a payload, skipping the ones that do not fit `T`.
fn parse_items<T: DeserializeOwned>(body: &str, what: &str) -> Result<Vec<T>> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| NVTError::ParseError(format!("Invalid {} response: {}", what, e)))?;

    let values = match envelope {
        Envelope::Wrapped { data } | Envelope::Bare(data) => match data {
            OneOrMany::Many(values) => values,
            OneOrMany::One(serde_json::Value::Null) => Vec::new(),
            OneOrMany::One(value) => vec![value],
        },
    };

    Ok(values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<T>(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed {} record: {}", what, e);
                None
            }
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct StopItem {
    #[serde(alias = "stop", alias = "stop_id")]
    id: Loose,
    #[serde(default, alias = "name_en", alias = "stop_name")]
    name: Option<String>,
    #[serde(default, alias = "latitude")]
    lat: Option<Loose>,
    #[serde(default, alias = "long", alias = "lng", alias = "longitude")]
    lon: Option<Loose>,
    #[serde(default)]
    seq: Option<Loose>,
}

impl StopItem {
    fn into_record(self) -> Option<StopRecord> {
        let stop_id = self.id.text();
        let coordinate = match (&self.lat, &self.lon) {
            (Some(lat), Some(lon)) => Coordinate::parse(&lat.text(), &lon.text()),
            _ => None,
        };
        let Some(coordinate) = coordinate else {
            warn!("Skipping stop {} without usable coordinates", stop_id);
            return None;
        };
        Some(StopRecord {
            name: self.name.unwrap_or_else(|| stop_id.clone()),
            stop_id,
            coordinate,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EtaItem {
    #[serde(default, alias = "stop_id")]
    stop: Option<Loose>,
    #[serde(default)]
    seq: Option<Loose>,
    #[serde(default, alias = "bound")]
    dir: Option<String>,
    #[serde(default, alias = "arrival", alias = "arrival_time")]
    eta: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VehicleItem {
    #[serde(alias = "route_id", alias = "line")]
    route: Loose,
    #[serde(default, alias = "latitude")]
    lat: Option<Loose>,
    #[serde(default, alias = "long", alias = "lng", alias = "longitude")]
    lon: Option<Loose>,
    #[serde(default, alias = "license_plate", alias = "plate_number")]
    plate: Option<String>,
    #[serde(default, alias = "id", alias = "vehicle")]
    vehicle_id: Option<Loose>,
}

pub fn parse_stop_list(body: &str) -> Result<Vec<StopRecord>> {
    Ok(parse_items::<StopItem>(body, "stop")?
        .into_iter()
        .filter_map(StopItem::into_record)
        .collect())
}

/// Stop ids of a route listing.
///
/// Each item is placed by its own `seq`; items without one fall back to their
/// position in the listing.
pub fn parse_stop_sequence(body: &str) -> Result<StopSequence> {
    let mut sequence = StopSequence::new();
    for (position, item) in parse_items::<StopItem>(body, "stop")?.into_iter().enumerate() {
        let id = item.id.text();
        if id.is_empty() {
            continue;
        }
        let seq = match &item.seq {
            Some(seq) => match seq.index() {
                Some(seq) => seq,
                None => {
                    warn!("Skipping stop {} with bad sequence {:?}", id, seq);
                    continue;
                }
            },
            None => position as u32 + 1,
        };
        if sequence.insert(seq, id).is_some() {
            warn!("Stop sequence {} listed twice, keeping the later one", seq);
        }
    }
    Ok(sequence)
}

fn needs_route_order(body: &str) -> bool {
    parse_items::<EtaItem>(body, "arrival")
        .map(|items| items.iter().any(|i| i.stop.is_none() && i.seq.is_some()))
        .unwrap_or(false)
}

/// Arrival records for one direction of a route.
///
/// Items naming their stop by 1-based `seq` are resolved against
/// `route_stops`. Items without a time are dropped.
pub fn parse_eta_list(body: &str, direction: Direction, route_stops: &StopSequence) -> Result<Vec<EtaRecord>> {
    let items = parse_items::<EtaItem>(body, "arrival")?;
    let mut records = Vec::with_capacity(items.len());

    for item in items {
        if let Some(dir) = &item.dir {
            if !direction.matches_letter(dir) {
                continue;
            }
        }

        let Some(eta) = item.eta.as_deref().filter(|s| !s.trim().is_empty()) else {
            continue;
        };
        let arrival = match DateTime::parse_from_rfc3339(eta.trim()) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                warn!("Skipping arrival with bad timestamp {:?}: {}", eta, e);
                continue;
            }
        };

        let stop_id = match (&item.stop, &item.seq) {
            (Some(stop), _) => Some(stop.text()),
            (None, Some(seq)) => seq.index().and_then(|n| route_stops.get(&n).cloned()),
            (None, None) => None,
        };
        let Some(stop_id) = stop_id else {
            debug!("Arrival at {} does not map to a stop, skipping", eta);
            continue;
        };

        records.push(EtaRecord { stop_id, arrival });
    }

    Ok(records)
}

pub fn parse_vehicle_json(body: &str) -> Result<Vec<RawVehicleReport>> {
    Ok(parse_items::<VehicleItem>(body, "vehicle")?
        .into_iter()
        .map(|item| RawVehicleReport {
            route: item.route.text(),
            lat: item.lat.map(|v| v.text()).unwrap_or_default(),
            lon: item.lon.map(|v| v.text()).unwrap_or_default(),
            plate: item.plate,
            vehicle_id: item.vehicle_id.map(|v| v.text()),
        })
        .collect())
}

pub fn parse_vehicle_gtfs_rt(body: &[u8]) -> Result<Vec<RawVehicleReport>> {
    let feed = FeedMessage::decode(body)
        .map_err(|e| NVTError::ParseError(format!("Failed to decode vehicles feed: {}", e)))?;

    Ok(feed
        .entity
        .into_iter()
        .filter_map(|entity| entity.vehicle)
        .map(|vehicle| {
            let route = vehicle
                .trip
                .as_ref()
                .and_then(|t| t.route_id.clone())
                .unwrap_or_default();
            let (lat, lon) = vehicle
                .position
                .as_ref()
                .map(|p| (p.latitude.to_string(), p.longitude.to_string()))
                .unwrap_or_default();
            let plate = vehicle.vehicle.as_ref().and_then(|v| v.license_plate.clone());
            let vehicle_id = vehicle.vehicle.as_ref().and_then(|v| v.id.clone());

            RawVehicleReport { route, lat, lon, plate, vehicle_id }
        })
        .collect())
}

/// Resolve stop details for `ids`, keeping route order.
///
/// A failed lookup drops that stop only.
async fn load_stop_details<'a, F, Fut>(ids: &'a [String], fetch: F) -> Vec<StopRecord>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<StopRecord>>,
{
    let details = join_all(ids.iter().map(|id| fetch(id.as_str()))).await;

    ids.iter()
        .zip(details)
        .filter_map(|(id, detail)| match detail {
            Ok(stop) => Some(stop),
            Err(e) => {
                warn!("Stop {} dropped: {}", id, e);
                None
            }
        })
        .collect()
}

/// Fill a URL template.
pub fn expand_template(template: &str, selection: Option<&RouteSelection>, stop: Option<&str>) -> String {
    let mut url = template.to_string();
    if let Some(selection) = selection {
        url = url
            .replace("{route}", &selection.route)
            .replace("{direction}", selection.direction.as_path())
            .replace("{dir}", selection.direction.as_letter());
    }
    if let Some(stop) = stop {
        url = url.replace("{stop}", stop);
    }
    url
}

// ============================================================================
// HTTP source
// ============================================================================

type RouteKey = (String, String, Direction);

pub struct HttpSource {
    client: reqwest::Client,
    operators: Vec<OperatorConfig>,
    route_stops: Mutex<HashMap<RouteKey, StopSequence>>,
}

impl HttpSource {
    pub fn new(operators: Vec<OperatorConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NVTError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(HttpSource {
            client,
            operators,
            route_stops: Mutex::new(HashMap::new()),
        })
    }

    fn operator(&self, code: &str) -> Result<&OperatorConfig> {
        self.operators
            .iter()
            .find(|op| op.code.eq_ignore_ascii_case(code))
            .ok_or_else(|| NVTError::ConfigError(format!("Unknown operator '{}'", code)))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NVTError::NetworkError(format!("Request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(NVTError::NetworkError(format!("{} returned {}", url, response.status())));
        }
        Ok(response)
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| NVTError::NetworkError(format!("Failed to read response from {}: {}", url, e)))
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let body = self
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| NVTError::NetworkError(format!("Failed to read response from {}: {}", url, e)))?;
        Ok(body.to_vec())
    }

    fn route_key(op: &OperatorConfig, selection: &RouteSelection) -> RouteKey {
        (op.code.clone(), selection.route.clone(), selection.direction)
    }

    fn remember_route(&self, key: RouteKey, sequence: StopSequence) {
        if let Ok(mut cache) = self.route_stops.lock() {
            cache.insert(key, sequence);
        }
    }

    fn cached_route(&self, key: &RouteKey) -> Option<StopSequence> {
        self.route_stops.lock().ok().and_then(|cache| cache.get(key).cloned())
    }

    async fn route_sequence(&self, op: &OperatorConfig, selection: &RouteSelection) -> Result<StopSequence> {
        let key = Self::route_key(op, selection);
        if let Some(sequence) = self.cached_route(&key) {
            return Ok(sequence);
        }
        let body = self.get_text(&expand_template(&op.stops_url, Some(selection), None)).await?;
        let sequence = parse_stop_sequence(&body)?;
        self.remember_route(key, sequence.clone());
        Ok(sequence)
    }

    /// Arrivals from an already fetched body, loading the route listing only
    /// when items refer to stops by sequence.
    async fn resolve_etas(&self, op: &OperatorConfig, selection: &RouteSelection, body: &str) -> Result<Vec<EtaRecord>> {
        let route_stops = if needs_route_order(body) {
            self.route_sequence(op, selection).await?
        } else {
            StopSequence::new()
        };
        parse_eta_list(body, selection.direction, &route_stops)
    }

    async fn fetch_stop_detail(&self, template: &str, stop_id: &str) -> Result<StopRecord> {
        let body = self.get_text(&expand_template(template, None, Some(stop_id))).await?;
        parse_stop_list(&body)?
            .into_iter()
            .next()
            .ok_or_else(|| NVTError::ParseError(format!("No usable details for stop {}", stop_id)))
    }
}

impl TransitSource for HttpSource {
    fn profile(&self, operator: &str) -> Option<OperatorProfile> {
        self.operator(operator).ok().map(|op| OperatorProfile {
            code: op.code.clone(),
            name: op.name.clone(),
            strategy: op.strategy,
            count_estimation: op.count_estimation,
        })
    }

    fn operators(&self) -> Vec<OperatorProfile> {
        self.operators.iter().filter_map(|op| self.profile(&op.code)).collect()
    }

    async fn fetch_stops(&self, selection: &RouteSelection) -> Result<Vec<StopRecord>> {
        let op = self.operator(&selection.operator)?;
        let body = self.get_text(&expand_template(&op.stops_url, Some(selection), None)).await?;

        let sequence = parse_stop_sequence(&body)?;
        let ids: Vec<String> = sequence.values().cloned().collect();
        self.remember_route(Self::route_key(op, selection), sequence);

        let Some(detail_url) = &op.stop_detail_url else {
            return parse_stop_list(&body);
        };

        let stops = load_stop_details(&ids, |id| self.fetch_stop_detail(detail_url, id)).await;
        debug!("Loaded {}/{} stops for {}", stops.len(), ids.len(), selection);
        Ok(stops)
    }

    async fn fetch_etas(&self, selection: &RouteSelection) -> Result<Vec<EtaRecord>> {
        let op = self.operator(&selection.operator)?;
        let body = self.get_text(&expand_template(&op.etas_url, Some(selection), None)).await?;
        self.resolve_etas(op, selection, &body).await
    }

    async fn fetch_vehicles(&self, operator: &str, route: &str) -> Result<Vec<RawVehicleReport>> {
        let op = self.operator(operator)?;
        let Some(template) = &op.vehicles_url else {
            return Err(NVTError::ConfigError(format!("Operator '{}' has no vehicle feed", op.code)));
        };
        let url = template.replace("{route}", route);

        match op.vehicles_format {
            VehicleFeedFormat::Json => parse_vehicle_json(&self.get_text(&url).await?),
            VehicleFeedFormat::GtfsRt => parse_vehicle_gtfs_rt(&self.get_bytes(&url).await?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gtfs_rt::{FeedEntity, FeedHeader, Position, TripDescriptor, VehicleDescriptor, VehiclePosition};

    fn selection(direction: Direction) -> RouteSelection {
        RouteSelection { operator: "KMB".into(), route: "1A".into(), direction }
    }

    #[test]
    fn stop_list_accepts_envelopes_and_string_numbers() {
        let wrapped = r#"{"data": [
            {"stop": "A1", "name_en": "Star Ferry", "lat": "22.2940", "long": "114.1688"},
            {"stop": "A2", "name_en": "Broken", "lat": "n/a", "long": "114.1700"},
            {"stop": "A3", "lat": 22.3, "lon": 114.17}
        ]}"#;
        let stops = parse_stop_list(wrapped).unwrap();
        assert_eq!(stops.len(), 2);
        assert_eq!(stops[0].name, "Star Ferry");
        assert_eq!(stops[0].coordinate, Coordinate::new(22.294, 114.1688));
        assert_eq!(stops[1].name, "A3");

        let single = r#"{"data": {"stop": "B1", "name_en": "Single", "lat": "22.1", "long": "114.1"}}"#;
        assert_eq!(parse_stop_list(single).unwrap().len(), 1);

        let bare = r#"[{"id": "C1", "latitude": 22.1, "longitude": 114.1}]"#;
        assert_eq!(parse_stop_list(bare).unwrap()[0].stop_id, "C1");

        assert!(parse_stop_list("not json").is_err());
    }

    fn sequence(ids: &[(u32, &str)]) -> StopSequence {
        ids.iter().map(|(seq, id)| (*seq, id.to_string())).collect()
    }

    #[test]
    fn stop_sequence_keeps_route_order() {
        let body = r#"{"data": [{"stop": "X", "seq": "1"}, {"stop": "Y", "seq": 2}, {"seq": "3"}]}"#;
        assert_eq!(parse_stop_sequence(body).unwrap(), sequence(&[(1, "X"), (2, "Y")]));

        let unnumbered = r#"[{"stop": "P"}, {"stop": "Q"}]"#;
        assert_eq!(parse_stop_sequence(unnumbered).unwrap(), sequence(&[(1, "P"), (2, "Q")]));
    }

    #[test]
    fn gap_in_listing_does_not_shift_later_stops() {
        let listing = r#"[{"stop": "X", "seq": 1}, {"seq": 2}, {"stop": "Z", "seq": 3}]"#;
        let route_stops = parse_stop_sequence(listing).unwrap();
        assert_eq!(route_stops, sequence(&[(1, "X"), (3, "Z")]));

        let etas = r#"[
            {"seq": 2, "eta": "2024-05-01T16:02:00+08:00"},
            {"seq": 3, "eta": "2024-05-01T16:03:00+08:00"}
        ]"#;
        let records = parse_eta_list(etas, Direction::Outbound, &route_stops).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stop_id, "Z");
        assert_eq!(records[0].arrival, Utc.with_ymd_and_hms(2024, 5, 1, 8, 3, 0).unwrap());
    }

    #[test]
    fn large_integer_ids_stay_exact() {
        let body = r#"[
            {"route": "1A", "lat": 22.3, "lon": 114.17, "id": 9007199254740993},
            {"route": "1A", "lat": 22.3, "lon": 114.17, "id": 9007199254740992},
            {"route": "1A", "lat": 22.3, "lon": 114.17, "id": 18446744073709551615}
        ]"#;
        let ids: Vec<String> = parse_vehicle_json(body)
            .unwrap()
            .into_iter()
            .filter_map(|r| r.vehicle_id)
            .collect();
        assert_eq!(ids, vec!["9007199254740993", "9007199254740992", "18446744073709551615"]);
    }

    #[tokio::test]
    async fn failed_stop_detail_drops_only_that_stop() {
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let stops = load_stop_details(&ids, |id| {
            let id = id.to_string();
            async move {
                if id == "B" {
                    return Err(NVTError::NetworkError("stop B timed out".into()));
                }
                Ok(StopRecord {
                    name: format!("Stop {}", id),
                    stop_id: id,
                    coordinate: Coordinate::new(22.3, 114.17),
                })
            }
        })
        .await;

        let kept: Vec<&str> = stops.iter().map(|s| s.stop_id.as_str()).collect();
        assert_eq!(kept, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn etas_by_sequence_use_remembered_route_listing() {
        let operators = crate::nvt_config::parse_operators(
            r#"[{"code": "KMB", "name": "Bus", "strategy": "estimated",
                 "stops_url": "http://127.0.0.1:9/route/{route}/{direction}", "etas_url": "b"}]"#,
        )
        .unwrap();
        let source = HttpSource::new(operators).unwrap();
        let op = source.operator("KMB").unwrap();
        let outbound = selection(Direction::Outbound);
        source.remember_route(HttpSource::route_key(op, &outbound), sequence(&[(1, "S1"), (2, "S2")]));

        let body = r#"{"data": [
            {"dir": "O", "seq": 2, "eta": "2024-05-01T16:07:00+08:00"},
            {"dir": "I", "seq": 1, "eta": "2024-05-01T16:01:00+08:00"}
        ]}"#;
        let records = source.resolve_etas(op, &outbound, body).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stop_id, "S2");

        // Nothing remembered for inbound, and the listing endpoint is unreachable.
        assert!(source.resolve_etas(op, &selection(Direction::Inbound), body).await.is_err());
    }

    #[test]
    fn etas_resolve_sequence_numbers_and_direction() {
        let body = r#"{"data": [
            {"dir": "O", "seq": 1, "eta": "2024-05-01T16:05:00+08:00"},
            {"dir": "O", "seq": 2, "eta": null},
            {"dir": "I", "seq": 1, "eta": "2024-05-01T16:01:00+08:00"},
            {"dir": "O", "seq": 9, "eta": "2024-05-01T16:09:00+08:00"},
            {"dir": "O", "seq": 2, "eta": "garbage"},
            {"stop": "S2", "eta": "2024-05-01T16:07:00+08:00"}
        ]}"#;
        let records = parse_eta_list(body, Direction::Outbound, &sequence(&[(1, "S1"), (2, "S2")])).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stop_id, "S1");
        assert_eq!(records[0].arrival, Utc.with_ymd_and_hms(2024, 5, 1, 8, 5, 0).unwrap());
        assert_eq!(records[1].stop_id, "S2");
        assert!(needs_route_order(body));
    }

    #[test]
    fn vehicle_json_keeps_raw_coordinates() {
        let body = r#"[
            {"route": "1A", "lat": "22.30", "lon": "114.17", "plate": "AB123"},
            {"route_id": "1A", "latitude": 22.31, "longitude": 114.18, "id": 42},
            {"lat": "22.30"}
        ]"#;
        let reports = parse_vehicle_json(body).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].plate.as_deref(), Some("AB123"));
        assert_eq!(reports[0].lat, "22.30");
        assert_eq!(reports[1].vehicle_id.as_deref(), Some("42"));
        assert_eq!(reports[1].lat, "22.31");
    }

    #[test]
    fn vehicle_gtfs_rt_maps_positions() {
        let feed = FeedMessage {
            header: FeedHeader { gtfs_realtime_version: "2.0".into(), ..Default::default() },
            entity: vec![
                FeedEntity {
                    id: "e1".into(),
                    vehicle: Some(VehiclePosition {
                        trip: Some(TripDescriptor { route_id: Some("1A".into()), ..Default::default() }),
                        vehicle: Some(VehicleDescriptor {
                            id: Some("v1".into()),
                            license_plate: Some("AB123".into()),
                            ..Default::default()
                        }),
                        position: Some(Position { latitude: 22.3, longitude: 114.17, ..Default::default() }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                FeedEntity { id: "e2".into(), ..Default::default() },
            ],
            ..Default::default()
        };

        let reports = parse_vehicle_gtfs_rt(&feed.encode_to_vec()).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].route, "1A");
        assert_eq!(reports[0].lat, "22.3");
        assert_eq!(reports[0].lon, "114.17");
        assert_eq!(reports[0].plate.as_deref(), Some("AB123"));

        assert!(parse_vehicle_gtfs_rt(b"\xff\xff\xff").is_err());
    }

    #[test]
    fn templates_expand_placeholders() {
        let sel = selection(Direction::Inbound);
        assert_eq!(
            expand_template("https://x/{route}/{direction}/{dir}", Some(&sel), None),
            "https://x/1A/inbound/I"
        );
        assert_eq!(expand_template("https://x/stop/{stop}", None, Some("S9")), "https://x/stop/S9");
    }

    #[test]
    fn profile_lookup_is_case_insensitive() {
        let operators = crate::nvt_config::parse_operators(
            r#"[{"code": "KMB", "name": "Bus", "strategy": "estimated", "stops_url": "a", "etas_url": "b"}]"#,
        )
        .unwrap();
        let source = HttpSource::new(operators).unwrap();

        let profile = source.profile("kmb").unwrap();
        assert_eq!(profile.code, "KMB");
        assert_eq!(profile.strategy, PositionStrategy::Estimated);
        assert!(source.profile("ctb").is_none());
        assert_eq!(source.operators().len(), 1);
    }
}
