//! Configuration file.
//!
//! A JSON document naming the store file, the retention policy, the units
//! being collected and the charts drawn from them. Every section is
//! optional.
//!
//! ```json
//! {
//!   "data_path": "/var/db/strata.redb",
//!   "retention": { "days_detail": 31, "days_compressed": 365 },
//!   "units": [
//!     { "id": 1, "name": "load" },
//!     { "id": 2, "name": "em0_in", "counter": true }
//!   ],
//!   "charts": [
//!     {
//!       "name": "traffic",
//!       "output": "/var/www/traffic.png",
//!       "width": 600,
//!       "height": 200,
//!       "series": [
//!         { "unit": 2, "label": "in", "unit_label": "bit/s",
//!           "color": "#00c000", "filled": true, "bytes": true }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chart::ChartConfig;
use crate::error::{ConfigError, Result};
use crate::record::SENTINEL_LEVEL;

/// Store path used when neither the configuration nor the caller names one.
pub const DEFAULT_DATA_PATH: &str = "/var/db/strata.redb";

/// Default days raw samples are kept.
pub const DEFAULT_DAYS_DETAIL: u32 = 31;

/// Default days consolidated samples are kept.
pub const DEFAULT_DAYS_COMPRESSED: u32 = 365;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Store file.
    pub data_path: Option<PathBuf>,
    /// Retention policy.
    pub retention: RetentionConfig,
    /// Known units.
    pub units: Vec<UnitConfig>,
    /// Charts.
    pub charts: Vec<ChartConfig>,
}

/// How long samples are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    /// Days raw samples and counter state are kept.
    pub days_detail: u32,
    /// Days consolidated samples are kept.
    pub days_compressed: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days_detail: DEFAULT_DAYS_DETAIL,
            days_compressed: DEFAULT_DAYS_COMPRESSED,
        }
    }
}

/// A measured unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    /// Id used in record keys.
    pub id: u16,
    /// Human name, usable instead of the id on the command line.
    pub name: String,
    /// Readings are a monotonic counter; store their rate.
    #[serde(default)]
    pub counter: bool,
}

impl Config {
    /// Reads and validates the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] if it is not valid configuration JSON and
    /// [`ConfigError::Invalid`] if it fails [`Config::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Parses and validates configuration text read from `origin`.
    ///
    /// # Errors
    ///
    /// As [`Config::load`], without the read step.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.retention.days_detail == 0 || self.retention.days_compressed == 0 {
            return Err(invalid("retention days must be > 0"));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for unit in &self.units {
            if unit.id == SENTINEL_LEVEL {
                return Err(invalid(format!("unit '{}': id {} is reserved", unit.name, unit.id)));
            }
            if unit.name.is_empty() {
                return Err(invalid(format!("unit {}: name cannot be empty", unit.id)));
            }
            if unit.name.parse::<u16>().is_ok() {
                return Err(invalid(format!("unit {}: name '{}' looks like an id", unit.id, unit.name)));
            }
            if !ids.insert(unit.id) {
                return Err(invalid(format!("unit id {} defined twice", unit.id)));
            }
            if !names.insert(unit.name.as_str()) {
                return Err(invalid(format!("unit name '{}' defined twice", unit.name)));
            }
        }

        let mut charts = HashSet::new();
        for chart in &self.charts {
            if !charts.insert(chart.name.as_str()) {
                return Err(invalid(format!("chart '{}' defined twice", chart.name)));
            }
            chart.validate()?;
            for series in &chart.series {
                if series.unit == SENTINEL_LEVEL {
                    return Err(invalid(format!(
                        "chart '{}': unit {} is reserved",
                        chart.name, series.unit
                    )));
                }
                if !self.units.is_empty() && !ids.contains(&series.unit) {
                    return Err(invalid(format!(
                        "chart '{}': series '{}' uses unknown unit {}",
                        chart.name, series.label, series.unit
                    )));
                }
            }
        }

        Ok(())
    }

    /// Store path: the configured one, else [`DEFAULT_DATA_PATH`].
    pub fn data_path(&self) -> &Path {
        self.data_path
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_DATA_PATH))
    }

    /// Resolves a unit given by id or by name.
    ///
    /// A numeric reference without a configured unit resolves to an
    /// unconfigured gauge, so ad-hoc ids work without a config file.
    pub fn resolve_unit(&self, reference: &str) -> Option<UnitConfig> {
        if let Ok(id) = reference.parse::<u16>() {
            if id == SENTINEL_LEVEL {
                return None;
            }
            return Some(self.unit(id).cloned().unwrap_or_else(|| UnitConfig {
                id,
                name: id.to_string(),
                counter: false,
            }));
        }
        self.units.iter().find(|u| u.name == reference).cloned()
    }

    /// Returns the configured unit with `id`.
    pub fn unit(&self, id: u16) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Returns the chart named `name`.
    pub fn chart(&self, name: &str) -> Option<&ChartConfig> {
        self.charts.iter().find(|c| c.name == name)
    }
}

fn invalid(reason: impl Into<String>) -> crate::error::StrataError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
    .into()
}
