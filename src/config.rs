use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QflagError, Result};
use crate::penalty::PenaltyCombine;
use crate::solar::{parse_timezone, Geolocation};

/// Flags that describe conditions or phenology rather than image defects.
pub const DEFAULT_SKIP_IFLAGS: [&str; 7] = [
    "iflag_sunny",
    "iflag_cloudy",
    "iflag_full_overcast",
    "iflag_initial_green_up",
    "iflag_initial_peek_greeness",
    "iflag_initial_lead_discoloration",
    "iflag_initial_leaf_fall",
];

pub const DEFAULT_STATISTICS: [&str; 4] = ["mean_red", "mean_green", "mean_blue", "GCC_value"];

/// Station/platform settings for one processing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub station_acronym: String,
    pub platform_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub rois: Vec<String>,
    pub statistics: Vec<String>,
    pub skip_iflags: Vec<String>,
    /// `false` keeps every penalty at zero.
    pub apply_penalties: bool,
    /// Treat every contributing record as weight 1.0.
    pub overwrite_weight: bool,
    pub penalty_combine: PenaltyCombine,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            station_acronym: String::new(),
            platform_id: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            timezone: "Europe/Stockholm".to_string(),
            rois: Vec::new(),
            statistics: DEFAULT_STATISTICS.iter().map(|s| s.to_string()).collect(),
            skip_iflags: DEFAULT_SKIP_IFLAGS.iter().map(|s| s.to_string()).collect(),
            apply_penalties: true,
            overwrite_weight: false,
            penalty_combine: PenaltyCombine::Product,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading pipeline config from {}", path.display());
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(QflagError::Validation(format!(
                "geolocation ({}, {}) is out of range",
                self.latitude, self.longitude
            )));
        }
        parse_timezone(&self.timezone)?;
        Ok(())
    }

    pub fn geolocation(&self) -> Geolocation {
        Geolocation {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}
