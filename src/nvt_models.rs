// Data model for the live route tracker
//
// Everything the engine passes around between the source adapter, the
// position strategies and the reconciler lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Coordinate { lat, lon }
    }

    /// Parse a coordinate from the raw strings most feeds hand out.
    /// Non-numeric or out-of-range values yield `None`.
    pub fn parse(lat: &str, lon: &str) -> Option<Self> {
        let lat = lat.trim().parse::<f64>().ok()?;
        let lon = lon.trim().parse::<f64>().ok()?;
        Self::checked(lat, lon)
    }

    pub fn checked(lat: f64, lon: f64) -> Option<Self> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(Coordinate { lat, lon })
    }
}

/// One stop of a route, in route-traversal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub stop_id: String,
    pub name: String,
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EtaRecord {
    pub stop_id: String,
    pub arrival: DateTime<Utc>,
}

/// Vehicle report as delivered by a GPS feed, before validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawVehicleReport {
    pub route: String,
    pub lat: String,
    pub lon: String,
    pub plate: Option<String>,
    pub vehicle_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Direct,
    Estimated,
}

impl SourceKind {
    pub fn tag(&self) -> &'static str {
        match self {
            SourceKind::Direct => "GPS",
            SourceKind::Estimated => "estimated",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleEntity {
    pub identity_key: String,
    pub coordinate: Coordinate,
    pub source_kind: SourceKind,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Outbound,
    Inbound,
}

impl Direction {
    pub fn toggled(self) -> Self {
        match self {
            Direction::Outbound => Direction::Inbound,
            Direction::Inbound => Direction::Outbound,
        }
    }

    pub fn as_path(&self) -> &'static str {
        match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
        }
    }

    /// Single-letter form used by arrival feeds ("O" / "I").
    pub fn as_letter(&self) -> &'static str {
        match self {
            Direction::Outbound => "O",
            Direction::Inbound => "I",
        }
    }

    pub fn matches_letter(&self, value: &str) -> bool {
        value.eq_ignore_ascii_case(self.as_letter()) || value.eq_ignore_ascii_case(self.as_path())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

impl std::str::FromStr for Direction {
    type Err = NVTError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outbound" | "o" | "0" => Ok(Direction::Outbound),
            "inbound" | "i" | "1" => Ok(Direction::Inbound),
            other => Err(NVTError::ConfigError(format!("Unknown direction '{}'", other))),
        }
    }
}

/// Operator, route and direction the user is looking at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteSelection {
    pub operator: String,
    pub route: String,
    pub direction: Direction,
}

impl fmt::Display for RouteSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.operator, self.route, self.direction)
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum NVTError {
    NetworkError(String),
    ParseError(String),
    ConfigError(String),
}

impl fmt::Display for NVTError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NVTError::NetworkError(e) => write!(f, "Network error: {}", e),
            NVTError::ParseError(e) => write!(f, "Parse error: {}", e),
            NVTError::ConfigError(e) => write!(f, "Config error: {}", e),
        }
    }
}

impl std::error::Error for NVTError {}

pub type Result<T> = std::result::Result<T, NVTError>;
