//! Solar geometry and illumination classes.
//!
//! Positions are recomputed for every call. A day's geometry is never reused
//! for another day.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{QflagError, Result};

/// Elevations below this angle (degrees) are class 1.
pub const LOW_ELEVATION_THRESHOLD: f64 = 20.0;
/// Elevations at or above this angle (degrees) are class 3.
pub const HIGH_ELEVATION_THRESHOLD: f64 = 30.0;

/// Platform location in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    /// Degrees above the horizon.
    pub elevation: f64,
    /// Degrees clockwise from north.
    pub azimuth: f64,
}

/// Source of sun positions for an instant and a place.
pub trait SolarGeometry: Send + Sync {
    fn position(&self, at: DateTime<Utc>, location: &Geolocation) -> SolarPosition;
}

/// NOAA general solar position equations.
///
/// Accurate to a fraction of a degree, which is far finer than the
/// elevation classes need.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoaaSolarCalculator;

impl SolarGeometry for NoaaSolarCalculator {
    fn position(&self, at: DateTime<Utc>, location: &Geolocation) -> SolarPosition {
        let days_in_year = if at.date_naive().leap_year() { 366.0 } else { 365.0 };
        let hour = at.hour() as f64;
        let minutes_of_day =
            hour * 60.0 + at.minute() as f64 + at.second() as f64 / 60.0;

        // fractional year, radians
        let gamma = 2.0 * PI / days_in_year * (at.ordinal0() as f64 + (hour - 12.0) / 24.0);

        let eqtime = 229.18
            * (0.000075 + 0.001868 * gamma.cos()
                - 0.032077 * gamma.sin()
                - 0.014615 * (2.0 * gamma).cos()
                - 0.040849 * (2.0 * gamma).sin());

        let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
            - 0.006758 * (2.0 * gamma).cos()
            + 0.000907 * (2.0 * gamma).sin()
            - 0.002697 * (3.0 * gamma).cos()
            + 0.00148 * (3.0 * gamma).sin();

        let true_solar_time = minutes_of_day + eqtime + 4.0 * location.longitude;
        let hour_angle = (true_solar_time / 4.0 - 180.0).to_radians();
        let lat = location.latitude.to_radians();

        let cos_zenith = (lat.sin() * decl.sin() + lat.cos() * decl.cos() * hour_angle.cos())
            .clamp(-1.0, 1.0);
        let elevation = 90.0 - cos_zenith.acos().to_degrees();

        let azimuth = (hour_angle
            .sin()
            .atan2(hour_angle.cos() * lat.sin() - decl.tan() * lat.cos())
            .to_degrees()
            + 180.0)
            .rem_euclid(360.0);

        SolarPosition { elevation, azimuth }
    }
}

/// Resolve an IANA timezone identifier such as `Europe/Stockholm`.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| QflagError::Timezone(name.to_string()))
}

/// Interpret a station-local wall-clock time in `tz`.
///
/// Ambiguous times take the earlier instant. Times skipped by a DST jump are
/// taken as UTC.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => Utc.from_utc_datetime(&local),
    }
}

/// Ordinal illumination class derived from the sun elevation angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SolarElevationClass {
    Low = 1,
    Mid = 2,
    High = 3,
}

impl SolarElevationClass {
    pub fn from_elevation(elevation: f64) -> Self {
        if elevation >= HIGH_ELEVATION_THRESHOLD {
            Self::High
        } else if elevation >= LOW_ELEVATION_THRESHOLD {
            Self::Mid
        } else {
            Self::Low
        }
    }

    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SolarElevationClass {
    type Error = QflagError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Mid),
            3 => Ok(Self::High),
            other => Err(QflagError::Classification(format!(
                "solar elevation class {other} is outside 1..=3"
            ))),
        }
    }
}
