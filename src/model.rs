use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use polars::prelude::*;

#[cfg(feature = "python")]
use pyo3::prelude::*;
#[cfg(feature = "python")]
use pyo3::types::PyDict;
#[cfg(feature = "python")]
use pyo3_polars::PyDataFrame;

use crate::aggregation::{
    aggregate_roi_day, annual_rows, days_in_year, l3_daily_filename, rows_to_frame, write_l3_csv,
    DailyRow,
};
use crate::config::PipelineConfig;
use crate::error::{QflagError, Result};
use crate::flags::reconcile_flags;
use crate::penalty::{PenaltyResolver, PenaltyTable};
use crate::qflag::Qflag;
use crate::records::{persist_updates, ObservationRecord, RecordStore, Updates};
#[cfg(feature = "python")]
use crate::records::FieldValue;
use crate::schema::{image, record, roi};
use crate::solar::{
    local_to_utc, parse_timezone, NoaaSolarCalculator, SolarElevationClass, SolarGeometry,
    SolarPosition,
};
use crate::temporal::{mean_timestamp, TemporalResolution};

/// QFLAG and L3 pipeline for one station platform.
///
/// Holds only configuration; every call takes its records explicitly.
#[cfg_attr(feature = "python", pyclass)]
pub struct PhenocamModel {
    config: PipelineConfig,
    penalties: PenaltyTable,
    geometry: Box<dyn SolarGeometry>,
    timezone: Tz,
}

impl PhenocamModel {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let timezone = parse_timezone(&config.timezone)?;
        Ok(Self {
            config,
            penalties: PenaltyTable::default(),
            geometry: Box::new(NoaaSolarCalculator),
            timezone,
        })
    }

    pub fn with_penalty_table(mut self, penalties: PenaltyTable) -> Self {
        self.penalties = penalties;
        self
    }

    pub fn with_geometry(mut self, geometry: impl SolarGeometry + 'static) -> Self {
        self.geometry = Box::new(geometry);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn penalty_table(&self) -> &PenaltyTable {
        &self.penalties
    }

    // ── Geometry ────────────────────────────────────────────────────────────

    /// Sun position for a station-local timestamp.
    pub fn solar_position(&self, local: NaiveDateTime) -> SolarPosition {
        self.geometry.position(
            local_to_utc(local, self.timezone),
            &self.config.geolocation(),
        )
    }

    /// Elevation class at `local`; class 1 when the time is unknown.
    fn elevation_class_at(&self, local: Option<NaiveDateTime>) -> SolarElevationClass {
        match local {
            Some(t) => SolarElevationClass::from_elevation(self.solar_position(t).elevation),
            None => {
                log::warn!("no valid timestamp; assuming the lowest elevation class");
                SolarElevationClass::Low
            }
        }
    }

    fn resolver(&self) -> PenaltyResolver<'_> {
        PenaltyResolver::new(&self.penalties, &self.config.skip_iflags)
            .with_combine(self.config.penalty_combine)
            .with_weighting(self.config.apply_penalties)
    }

    // ── Per-image mode ──────────────────────────────────────────────────────

    /// Derived fields for one image, ready for the store.
    ///
    /// `day_records` are all records of the image's day; they set the
    /// temporal resolution.
    pub fn image_updates(
        &self,
        day_records: &[ObservationRecord],
        catalog_guid: &str,
        is_ready_for_products_use: Option<bool>,
    ) -> Result<Updates> {
        let target = day_records
            .iter()
            .find(|r| r.catalog_guid == catalog_guid)
            .ok_or_else(|| QflagError::InvalidData(format!("no record {catalog_guid}")))?;
        let created = target.creation_date.ok_or_else(|| {
            QflagError::InvalidData(format!("record {catalog_guid} has no valid creation_date"))
        })?;

        let timestamps: Vec<Option<NaiveDateTime>> =
            day_records.iter().map(|r| r.creation_date).collect();
        let resolution = TemporalResolution::from_timestamps(&timestamps);

        let position = self.solar_position(created);
        let class = SolarElevationClass::from_elevation(position.elevation);
        let qflag = Qflag::per_image(class, resolution.is_default)?;

        let mut updates = Updates::new();
        updates.insert(record::HAS_SNOW_PRESENCE.into(), target.has_snow_presence.into());
        updates.insert(image::SUN_ELEVATION_ANGLE.into(), position.elevation.into());
        updates.insert(image::SUN_AZIMUTH_ANGLE.into(), position.azimuth.into());
        updates.insert(image::SOLAR_ELEVATION_CLASS.into(), (class.value() as i64).into());
        updates.insert(image::QFLAG_IMAGE_VALUE.into(), (qflag.code as i64).into());
        updates.insert(image::QFLAG_IMAGE_WEIGHT.into(), qflag.weight.into());
        updates.insert(image::DEFAULT_TEMPORAL_RESOLUTION.into(), resolution.is_default.into());
        updates.insert(image::MEANTIME_RESOLUTION.into(), resolution.hh_mm_ss().into());
        for roi_name in &self.config.rois {
            let snow = target.roi(roi_name).map(|o| o.has_snow_presence).unwrap_or(false);
            updates.insert(roi::has_snow_presence(roi_name), snow.into());
        }
        if let Some(ready) = is_ready_for_products_use {
            updates.insert(record::IS_READY_FOR_PRODUCTS_USE.into(), ready.into());
        }
        Ok(updates)
    }

    /// Compute and persist the per-image fields. Returns what the store said.
    pub fn save_image_updates<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        day_records: &[ObservationRecord],
        catalog_guid: &str,
        is_ready_for_products_use: Option<bool>,
    ) -> Result<(Updates, bool)> {
        let updates = self.image_updates(day_records, catalog_guid, is_ready_for_products_use)?;
        let saved = persist_updates(store, catalog_guid, &updates);
        Ok((updates, saved))
    }

    // ── Per-day mode ────────────────────────────────────────────────────────

    /// Daily QFLAG from the day's records, placed at their mean timestamp.
    pub fn daily_qflag(
        &self,
        day_records: &[&ObservationRecord],
    ) -> Result<Option<(Qflag, TemporalResolution)>> {
        if day_records.is_empty() {
            return Ok(None);
        }
        let timestamps: Vec<Option<NaiveDateTime>> =
            day_records.iter().map(|r| r.creation_date).collect();
        let resolution = TemporalResolution::from_timestamps(&timestamps);
        let valid: Vec<NaiveDateTime> = timestamps.iter().flatten().copied().collect();
        let class = self.elevation_class_at(mean_timestamp(&valid));
        let qflag = Qflag::daily(day_records.len(), class, &resolution)?;
        Ok(Some((qflag, resolution)))
    }

    fn compute_day(
        &self,
        year: i32,
        day_of_year: u32,
        day_records: &[&ObservationRecord],
    ) -> Result<DailyRow> {
        let Some((qflag, resolution)) = self.daily_qflag(day_records)? else {
            return Ok(DailyRow::empty(year, day_of_year));
        };

        let weights = day_records
            .iter()
            .map(|r| {
                let class = self.elevation_class_at(r.creation_date);
                Qflag::per_image(class, resolution.is_default).map(|q| q.weight)
            })
            .collect::<Result<Vec<f64>>>()?;

        let resolver = self.resolver();
        let mut rois = BTreeMap::new();
        for roi_name in &self.config.rois {
            let aggregate = aggregate_roi_day(
                day_records,
                &weights,
                roi_name,
                &self.config.statistics,
                &resolver,
                self.config.overwrite_weight,
            )?;
            rois.insert(roi_name.clone(), aggregate);
        }

        Ok(DailyRow {
            year,
            day_of_year,
            qflag: Some(qflag),
            rois,
        })
    }

    // ── Annual product ──────────────────────────────────────────────────────

    /// One row per calendar day of `year`. Only records of that year that are
    /// ready for products use contribute.
    pub fn l3_daily_rows(&self, year: i32, records: &[ObservationRecord]) -> Result<Vec<DailyRow>> {
        let n_days = days_in_year(year);
        let mut by_day: BTreeMap<u32, Vec<&ObservationRecord>> = BTreeMap::new();
        for r in records
            .iter()
            .filter(|r| r.year == year && r.is_ready_for_products_use)
        {
            if (1..=n_days).contains(&r.day_of_year) {
                by_day.entry(r.day_of_year).or_default().push(r);
            } else {
                log::warn!(
                    "record {} has day_of_year {} outside {year}",
                    r.catalog_guid,
                    r.day_of_year
                );
            }
        }

        annual_rows(year, |doy| {
            let day_records = by_day.get(&doy).map(Vec::as_slice).unwrap_or(&[]);
            self.compute_day(year, doy, day_records)
        })
    }

    pub fn l3_daily_table(&self, year: i32, records: &[ObservationRecord]) -> Result<DataFrame> {
        let rows = self.l3_daily_rows(year, records)?;
        rows_to_frame(&rows, &self.config.rois, &self.config.statistics)
    }

    /// File name for the year's product, from the first and last dated
    /// contributing record. `None` when no such record exists.
    pub fn l3_daily_filename(&self, year: i32, records: &[ObservationRecord]) -> Option<String> {
        let dates = records
            .iter()
            .filter(|r| r.year == year && r.is_ready_for_products_use)
            .filter_map(|r| r.creation_date);
        let (min, max) = dates.fold(None, |acc: Option<(NaiveDateTime, NaiveDateTime)>, d| {
            Some(match acc {
                Some((lo, hi)) => (lo.min(d), hi.max(d)),
                None => (d, d),
            })
        })?;
        Some(l3_daily_filename(
            &self.config.station_acronym,
            &self.config.platform_id,
            min,
            max,
        ))
    }

    pub fn write_l3_daily_csv(
        &self,
        products_dir: &Path,
        year: i32,
        records: &[ObservationRecord],
    ) -> Result<PathBuf> {
        let filename = self.l3_daily_filename(year, records).ok_or_else(|| {
            QflagError::InvalidData(format!("no dated records ready for products in {year}"))
        })?;
        let mut df = self.l3_daily_table(year, records)?;
        write_l3_csv(&mut df, products_dir, year, &filename)
    }

    // ── Flag confirmation ───────────────────────────────────────────────────

    /// Persist the edited flags that changed, marked as confirmed.
    pub fn confirm_flags<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        catalog_guid: &str,
        original: &BTreeMap<String, bool>,
        edited: &BTreeMap<String, bool>,
    ) -> (Updates, bool) {
        let updates = reconcile_flags(original, edited).into_updates();
        let saved = persist_updates(store, catalog_guid, &updates);
        (updates, saved)
    }
}

// ── Python interface ────────────────────────────────────────────────────────

#[cfg(feature = "python")]
pub(crate) fn updates_to_dict<'py>(py: Python<'py>, updates: &Updates) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new(py);
    for (key, value) in updates {
        match value {
            FieldValue::Bool(b) => dict.set_item(key, *b)?,
            FieldValue::Int(i) => dict.set_item(key, *i)?,
            FieldValue::Float(f) => dict.set_item(key, *f)?,
            FieldValue::Text(s) => dict.set_item(key, s)?,
            FieldValue::Null => dict.set_item(key, py.None())?,
        }
    }
    Ok(dict)
}

#[cfg(feature = "python")]
#[pymethods]
impl PhenocamModel {
    /// Build from a pipeline config YAML and a penalty table YAML.
    #[new]
    #[pyo3(signature = (config_path=None, penalties_path=None))]
    fn py_new(config_path: Option<&str>, penalties_path: Option<&str>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => PipelineConfig::from_yaml_file(path)?,
            None => PipelineConfig::default(),
        };
        let mut model = Self::new(config)?;
        if let Some(path) = penalties_path {
            model = model.with_penalty_table(PenaltyTable::from_yaml_file(path)?);
        }
        Ok(model)
    }

    /// Update dict for one image. `records` holds every record of its day.
    #[pyo3(name = "image_updates", signature = (records, catalog_guid, is_ready_for_products_use=None))]
    fn py_image_updates<'py>(
        &self,
        py: Python<'py>,
        records: PyDataFrame,
        catalog_guid: &str,
        is_ready_for_products_use: Option<bool>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let records = self.read_records(&records.0)?;
        let updates = self.image_updates(&records, catalog_guid, is_ready_for_products_use)?;
        updates_to_dict(py, &updates)
    }

    /// Annual L3 table (one row per day) from the year's records.
    #[pyo3(name = "l3_daily_table")]
    fn py_l3_daily_table(&self, py: Python<'_>, records: PyDataFrame, year: i32) -> PyResult<PyDataFrame> {
        let records = self.read_records(&records.0)?;
        let df = py.allow_threads(|| self.l3_daily_table(year, &records))?;
        Ok(PyDataFrame(df))
    }

    /// Write the annual L3 table as CSV and return its path.
    #[pyo3(name = "write_l3_daily_csv")]
    fn py_write_l3_daily_csv(
        &self,
        py: Python<'_>,
        records: PyDataFrame,
        year: i32,
        products_dir: &str,
    ) -> PyResult<String> {
        let records = self.read_records(&records.0)?;
        let path = py.allow_threads(|| {
            self.write_l3_daily_csv(Path::new(products_dir), year, &records)
        })?;
        Ok(path.display().to_string())
    }

    /// Flags as a flag-by-ROI matrix for editing.
    #[staticmethod]
    #[pyo3(name = "flags_frame")]
    fn py_flags_frame(flags: BTreeMap<String, bool>) -> PyResult<PyDataFrame> {
        Ok(PyDataFrame(crate::flags::flags_frame(&flags)?))
    }

    /// Changed flags from an edited matrix, plus `flags_confirmed`.
    #[staticmethod]
    #[pyo3(name = "edited_flags")]
    fn py_edited_flags<'py>(
        py: Python<'py>,
        edited: PyDataFrame,
        original: BTreeMap<String, bool>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let diff = crate::flags::flags_from_frame(&edited.0, &original)?;
        updates_to_dict(py, &diff.into_updates())
    }
}

#[cfg(feature = "python")]
impl PhenocamModel {
    fn read_records(&self, df: &DataFrame) -> Result<Vec<ObservationRecord>> {
        crate::records::records_from_frame(df, &self.config.rois, &self.config.statistics)
    }
}
