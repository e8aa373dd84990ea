// Command line arguments and the operator registry
use crate::nvt_models::{Direction, NVTError, Result};
use crate::nvt_positions::PositionStrategy;
use anyhow::Context;
use clap::Parser;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUILTIN_OPERATORS: &str = include_str!("../operators.example.json");
const OPERATORS_ENV: &str = "NVT_OPERATORS_FILE";

#[derive(Parser, Debug, Clone)]
#[command(name = "nvt-live", version, about = "Live vehicle map for a transit route")]
pub struct NVTArgs {
    /// Operator registry (JSON). Falls back to $NVT_OPERATORS_FILE, then the user config dir.
    #[arg(long)]
    pub operators: Option<PathBuf>,

    /// Operator to select at startup
    #[arg(long)]
    pub operator: Option<String>,

    /// Route to select at startup
    #[arg(long)]
    pub route: Option<String>,

    #[arg(long, default_value = "outbound")]
    pub direction: Direction,

    /// Seconds between two polls
    #[arg(long, default_value_t = 5)]
    pub interval_secs: u64,

    /// Seed for the estimated vehicle count, for repeatable runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the map as GeoJSON to this file after every refresh
    #[arg(long)]
    pub geojson_out: Option<PathBuf>,

    #[arg(long, default_value = "Asia/Hong_Kong")]
    pub timezone: chrono_tz::Tz,
}

impl NVTArgs {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountEstimation {
    #[default]
    Random,
    EtaSpacing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleFeedFormat {
    #[default]
    Json,
    GtfsRt,
}

/// Endpoints and behaviour of one operator.
///
/// URL templates understand `{route}`, `{direction}`, `{dir}` and `{stop}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    pub code: String,
    pub name: String,
    pub strategy: PositionStrategy,
    #[serde(default)]
    pub count_estimation: CountEstimation,
    pub stops_url: String,
    #[serde(default)]
    pub stop_detail_url: Option<String>,
    pub etas_url: String,
    #[serde(default)]
    pub vehicles_url: Option<String>,
    #[serde(default)]
    pub vehicles_format: VehicleFeedFormat,
}

pub fn parse_operators(json: &str) -> Result<Vec<OperatorConfig>> {
    let operators: Vec<OperatorConfig> = serde_json::from_str(json)
        .map_err(|e| NVTError::ConfigError(format!("Invalid operator registry: {}", e)))?;
    validate_operators(&operators)?;
    Ok(operators)
}

fn validate_operators(operators: &[OperatorConfig]) -> Result<()> {
    if operators.is_empty() {
        return Err(NVTError::ConfigError("Operator registry is empty".to_string()));
    }

    let mut codes = HashSet::new();
    for op in operators {
        if !codes.insert(op.code.to_ascii_uppercase()) {
            return Err(NVTError::ConfigError(format!("Operator '{}' defined twice", op.code)));
        }
        if op.strategy == PositionStrategy::Direct && op.vehicles_url.is_none() {
            return Err(NVTError::ConfigError(format!(
                "Operator '{}' uses GPS positions but has no vehicles_url",
                op.code
            )));
        }
    }
    Ok(())
}

/// Registry path: flag, then environment, then `<config_dir>/nvt_live/operators.json`.
fn registry_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(OPERATORS_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let mut path = dirs::config_dir()?;
    path.push("nvt_live");
    path.push("operators.json");
    path.exists().then_some(path)
}

pub fn load_operators(explicit: Option<&Path>) -> anyhow::Result<Vec<OperatorConfig>> {
    match registry_path(explicit) {
        Some(path) => {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read operator registry {:?}", path))?;
            let operators = parse_operators(&contents)
                .with_context(|| format!("Failed to load operator registry {:?}", path))?;
            info!("Loaded {} operators from {:?}", operators.len(), path);
            Ok(operators)
        }
        None => {
            let operators = parse_operators(BUILTIN_OPERATORS).context("Built-in operator registry is invalid")?;
            info!("Using {} built-in operators", operators.len());
            Ok(operators)
        }
    }
}
