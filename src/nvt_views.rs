// Views for the live route tracker
//
// `MapSurface` is everything the engine draws through. `ConsoleMap` renders
// it as terminal output and can mirror the map into a GeoJSON file.
use crate::nvt_eta::ArrivalRow;
use crate::nvt_models::{Coordinate, RouteSelection, SourceKind};
use chrono::{Duration, Utc};
use chrono_tz::Tz;
use geo::BoundingRect;
use geo_types::{Coord, LineString};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use uuid::Uuid;

/// Drawing primitives consumed by the session and the reconciler.
pub trait MapSurface {
    type Handle: Clone + fmt::Debug;

    fn draw_stop_marker(&mut self, coordinate: Coordinate, label: &str);
    fn draw_polyline(&mut self, coordinates: &[Coordinate]);
    fn fit_bounds(&mut self, coordinates: &[Coordinate]);
    fn create_vehicle_marker(&mut self, coordinate: Coordinate, label: &str, style: SourceKind) -> Self::Handle;
    fn move_marker(&mut self, handle: &Self::Handle, coordinate: Coordinate);
    fn remove_marker(&mut self, handle: Self::Handle);
    fn clear_all_decorations(&mut self);

    fn show_arrivals(&mut self, _rows: &[ArrivalRow<'_>]) {}
    fn show_status(&mut self, _message: &str) {}
    /// Called once a tick has been fully applied.
    fn present(&mut self) {}
}

/// Bounding box of a set of coordinates as `(south_west, north_east)`.
pub fn bounds(coordinates: &[Coordinate]) -> Option<(Coordinate, Coordinate)> {
    let line: LineString<f64> = coordinates
        .iter()
        .map(|c| Coord { x: c.lon, y: c.lat })
        .collect();
    let rect = line.bounding_rect()?;
    Some((
        Coordinate::new(rect.min().y, rect.min().x),
        Coordinate::new(rect.max().y, rect.max().x),
    ))
}

// ============================================================================
// Console map
// ============================================================================

#[derive(Debug, Clone)]
struct VehicleMarker {
    coordinate: Coordinate,
    label: String,
    style: SourceKind,
}

pub struct ConsoleMap {
    timezone: Tz,
    snapshot_path: Option<PathBuf>,
    stops: Vec<(Coordinate, String)>,
    polyline: Vec<Coordinate>,
    markers: HashMap<Uuid, VehicleMarker>,
}

impl ConsoleMap {
    pub fn new(timezone: Tz, snapshot_path: Option<PathBuf>) -> Self {
        ConsoleMap {
            timezone,
            snapshot_path,
            stops: Vec::new(),
            polyline: Vec::new(),
            markers: HashMap::new(),
        }
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Current map contents as a GeoJSON feature collection.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let mut features = Vec::new();

        for (coordinate, label) in &self.stops {
            let mut properties = JsonObject::new();
            properties.insert("kind".to_string(), "stop".into());
            properties.insert("name".to_string(), label.clone().into());
            features.push(Self::feature(Value::Point(vec![coordinate.lon, coordinate.lat]), properties));
        }

        if self.polyline.len() >= 2 {
            let mut properties = JsonObject::new();
            properties.insert("kind".to_string(), "route".into());
            let line = self.polyline.iter().map(|c| vec![c.lon, c.lat]).collect();
            features.push(Self::feature(Value::LineString(line), properties));
        }

        let mut markers: Vec<(&Uuid, &VehicleMarker)> = self.markers.iter().collect();
        markers.sort_by(|a, b| a.1.label.cmp(&b.1.label));
        for (id, marker) in markers {
            let mut properties = JsonObject::new();
            properties.insert("kind".to_string(), "vehicle".into());
            properties.insert("marker".to_string(), id.to_string().into());
            properties.insert("label".to_string(), marker.label.clone().into());
            properties.insert("source".to_string(), marker.style.tag().into());
            features.push(Self::feature(
                Value::Point(vec![marker.coordinate.lon, marker.coordinate.lat]),
                properties,
            ));
        }

        FeatureCollection { bbox: None, features, foreign_members: None }
    }

    fn feature(value: Value, properties: JsonObject) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(value)),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    fn write_snapshot(&self, path: &PathBuf) {
        let body = self.to_feature_collection().to_string();
        match fs::write(path, body) {
            Ok(_) => debug!("Map snapshot written to {:?}", path),
            Err(e) => warn!("Could not write map snapshot to {:?}: {}", path, e),
        }
    }
}

impl MapSurface for ConsoleMap {
    type Handle = Uuid;

    fn draw_stop_marker(&mut self, coordinate: Coordinate, label: &str) {
        self.stops.push((coordinate, label.to_string()));
    }

    fn draw_polyline(&mut self, coordinates: &[Coordinate]) {
        self.polyline = coordinates.to_vec();
        println!("🛣️  Route drawn through {} stops", coordinates.len());
    }

    fn fit_bounds(&mut self, coordinates: &[Coordinate]) {
        if let Some((sw, ne)) = bounds(coordinates) {
            println!(
                "🗺️  View: ({:.5}, {:.5}) → ({:.5}, {:.5})",
                sw.lat, sw.lon, ne.lat, ne.lon
            );
        }
    }

    fn create_vehicle_marker(&mut self, coordinate: Coordinate, label: &str, style: SourceKind) -> Uuid {
        let handle = Uuid::new_v4();
        println!("  ➕ {} at ({:.5}, {:.5})", label, coordinate.lat, coordinate.lon);
        self.markers.insert(handle, VehicleMarker { coordinate, label: label.to_string(), style });
        handle
    }

    fn move_marker(&mut self, handle: &Uuid, coordinate: Coordinate) {
        match self.markers.get_mut(handle) {
            Some(marker) => {
                if marker.coordinate != coordinate {
                    println!("  ➜ {} to ({:.5}, {:.5})", marker.label, coordinate.lat, coordinate.lon);
                }
                marker.coordinate = coordinate;
            }
            None => warn!("Move requested for unknown marker {}", handle),
        }
    }

    fn remove_marker(&mut self, handle: Uuid) {
        if let Some(marker) = self.markers.remove(&handle) {
            println!("  ✖ {} removed", marker.label);
        }
    }

    fn clear_all_decorations(&mut self) {
        self.stops.clear();
        self.polyline.clear();
        self.markers.clear();
    }

    fn show_arrivals(&mut self, rows: &[ArrivalRow<'_>]) {
        let now = Utc::now();
        println!("\n{}", "─".repeat(70));
        println!("🕐 NEXT ARRIVALS");
        println!("{}", "─".repeat(70));

        for (i, row) in rows.iter().enumerate() {
            match row.minutes {
                Some(minutes) => {
                    let at = (now + Duration::minutes(minutes)).with_timezone(&self.timezone);
                    let badge = match minutes {
                        0 => "🔴 arriving".to_string(),
                        1..=2 => format!("🔴 {} min", minutes),
                        3..=5 => format!("🟡 {} min", minutes),
                        _ => format!("🟢 {} min", minutes),
                    };
                    println!("  {:>2}. {:<36} {} ({})", i + 1, row.stop.name, badge, at.format("%H:%M"));
                }
                None => println!("  {:>2}. {:<36} ⚫ no scheduled service", i + 1, row.stop.name),
            }
        }
    }

    fn show_status(&mut self, message: &str) {
        println!("ℹ️  {}", message);
    }

    fn present(&mut self) {
        let gps = self.markers.values().filter(|m| m.style == SourceKind::Direct).count();
        let estimated = self.marker_count() - gps;
        println!("📊 {} vehicles on map ({} GPS, {} estimated)", self.marker_count(), gps, estimated);

        if let Some(path) = &self.snapshot_path {
            self.write_snapshot(path);
        }
    }
}

// ============================================================================
// Console text
// ============================================================================

pub struct NVTViews;

impl NVTViews {
    pub fn show_welcome_screen(operators: &[(String, String)]) {
        println!("\n{}", "═".repeat(70));
        println!("  ╔═══════════════════════════════════════════════════════════╗");
        println!("  ║              🚌 NVT LIVE - ROUTE VEHICLE MAP              ║");
        println!("  ║            Live positions for the selected route          ║");
        println!("  ╚═══════════════════════════════════════════════════════════╝");
        println!("{}", "═".repeat(70));
        println!("\n  📡 Operators:");
        for (code, name) in operators {
            println!("     • {} - {}", code, name);
        }
        println!("\n{}", "═".repeat(70));
    }

    pub fn show_help() {
        println!("\n📋 COMMANDS");
        println!("  o <code>   Select operator");
        println!("  r <route>  Select route");
        println!("  d          Toggle direction");
        println!("  s          Show current selection");
        println!("  h          Show this help");
        println!("  q          Quit");
        println!("{}", "─".repeat(60));
    }

    pub fn show_route_header(selection: &RouteSelection, stop_count: usize) {
        println!("\n{}", "═".repeat(70));
        println!("🚏 {} - {} stops", selection, stop_count);
        println!("{}", "═".repeat(70));
    }

    pub fn show_selection(
        operator: Option<&str>,
        route: Option<&str>,
        direction: &str,
        stops: usize,
        vehicles: usize,
        polling: Option<String>,
    ) {
        println!("\n{}", "─".repeat(60));
        println!("  Operator : {}", operator.unwrap_or("(none)"));
        println!("  Route    : {}", route.unwrap_or("(none)"));
        println!("  Direction: {}", direction);
        println!("  Stops    : {}", stops);
        println!("  Vehicles : {}", vehicles);
        println!("  Polling  : {}", polling.as_deref().unwrap_or("idle"));
        println!("{}", "─".repeat(60));
    }

    pub fn invalid_command(input: &str) {
        println!("\n✗ Unknown command '{}'. Type 'h' for help.", input);
    }

    pub fn unknown_operator(code: &str) {
        println!("\n✗ Operator '{}' not found", code);
    }

    pub fn prompt() {
        print!("➜ ");
        let _ = io::stdout().flush();
    }

    pub fn goodbye_message() {
        println!("\n👋 Stopping live tracking. Goodbye!");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_cover_all_points() {
        let coords = vec![
            Coordinate::new(22.32, 114.17),
            Coordinate::new(22.30, 114.19),
            Coordinate::new(22.31, 114.18),
        ];
        let (sw, ne) = bounds(&coords).unwrap();
        assert_eq!(sw, Coordinate::new(22.30, 114.17));
        assert_eq!(ne, Coordinate::new(22.32, 114.19));
        assert!(bounds(&[]).is_none());
    }

    #[test]
    fn console_map_tracks_markers() {
        let mut map = ConsoleMap::new(chrono_tz::Asia::Hong_Kong, None);
        let a = map.create_vehicle_marker(Coordinate::new(22.3, 114.1), "1A · GPS · AB123", SourceKind::Direct);
        let b = map.create_vehicle_marker(Coordinate::new(22.4, 114.2), "1A · estimated #1", SourceKind::Estimated);
        assert_ne!(a, b);
        assert_eq!(map.marker_count(), 2);

        map.move_marker(&a, Coordinate::new(22.5, 114.3));
        map.remove_marker(b);
        assert_eq!(map.marker_count(), 1);

        map.clear_all_decorations();
        assert_eq!(map.marker_count(), 0);
    }

    #[test]
    fn snapshot_is_valid_geojson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.geojson");
        let mut map = ConsoleMap::new(chrono_tz::Asia::Hong_Kong, Some(path.clone()));

        let stops = [Coordinate::new(22.30, 114.17), Coordinate::new(22.31, 114.18)];
        map.draw_stop_marker(stops[0], "First");
        map.draw_stop_marker(stops[1], "Second");
        map.draw_polyline(&stops);
        map.create_vehicle_marker(stops[0], "1A · estimated #1", SourceKind::Estimated);
        map.present();

        let written = fs::read_to_string(&path).unwrap();
        let parsed: geojson::GeoJson = written.parse().unwrap();
        match parsed {
            geojson::GeoJson::FeatureCollection(fc) => assert_eq!(fc.features.len(), 4),
            other => panic!("expected a feature collection, got {:?}", other),
        }
    }
}
