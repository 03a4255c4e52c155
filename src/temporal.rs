//! Sampling density of a day's observations.

use chrono::{DateTime, NaiveDateTime};

const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Mean gaps longer than this many minutes (under one hour) mark a day as sparse.
pub const DENSE_GAP_MINUTES: u32 = 30;

/// Parse a record timestamp (`2024-06-01 10:30:00`, optional fraction or `T`).
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Arithmetic mean instant of a set of timestamps.
pub fn mean_timestamp(timestamps: &[NaiveDateTime]) -> Option<NaiveDateTime> {
    if timestamps.is_empty() {
        return None;
    }
    let total: i128 = timestamps
        .iter()
        .map(|t| t.and_utc().timestamp() as i128)
        .sum();
    let mean = (total / timestamps.len() as i128) as i64;
    DateTime::from_timestamp(mean, 0).map(|dt| dt.naive_utc())
}

/// Mean interval between consecutive observations of one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalResolution {
    pub hours: u32,
    pub minutes: u32,
    /// Dense (or single-image) sampling. Selects the wider tier boundaries.
    pub is_default: bool,
    /// Timestamps that entered the estimate.
    pub n_observations: usize,
}

impl TemporalResolution {
    pub fn single_observation(n_observations: usize) -> Self {
        Self {
            hours: 0,
            minutes: 0,
            is_default: true,
            n_observations,
        }
    }

    /// Estimate from possibly missing timestamps. Entries that are `None` are
    /// dropped; fewer than two valid entries is a single observation.
    pub fn from_timestamps(timestamps: &[Option<NaiveDateTime>]) -> Self {
        let mut valid: Vec<NaiveDateTime> = timestamps.iter().flatten().copied().collect();
        let dropped = timestamps.len() - valid.len();
        if dropped > 0 {
            log::warn!(
                "{dropped} of {} timestamps missing or malformed; estimating from the rest",
                timestamps.len()
            );
        }
        if valid.len() < 2 {
            return Self::single_observation(valid.len());
        }

        valid.sort_unstable();
        let total_secs: i64 = valid
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_seconds())
            .sum();
        let mean_secs = (total_secs / (valid.len() as i64 - 1)).max(0) as u64;

        let hours = (mean_secs / 3600) as u32;
        let minutes = ((mean_secs % 3600) / 60) as u32;
        let is_sparse = hours > 0 || minutes > DENSE_GAP_MINUTES;

        Self {
            hours,
            minutes,
            is_default: !is_sparse,
            n_observations: valid.len(),
        }
    }

    /// Estimate directly from raw timestamp strings.
    pub fn from_strings<S: AsRef<str>>(raw: &[S]) -> Self {
        let parsed: Vec<Option<NaiveDateTime>> =
            raw.iter().map(|s| parse_timestamp(s.as_ref())).collect();
        Self::from_timestamps(&parsed)
    }

    /// `HH:MM`
    pub fn hh_mm(&self) -> String {
        format!("{:02}:{:02}", self.hours, self.minutes)
    }

    /// `HH:MM:00`, the stored `meantime_resolution` format.
    pub fn hh_mm_ss(&self) -> String {
        format!("{}:00", self.hh_mm())
    }
}
