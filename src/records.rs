//! Observation records as read from the station store, and the contract for
//! writing derived fields back.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDateTime};
use polars::prelude::*;
use serde::Serialize;

use crate::error::{QflagError, Result};
use crate::schema::{record, roi};
use crate::temporal::parse_timestamp;

/// Value of one field in an update mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// Field name -> new value, merged into one record by the store.
pub type Updates = BTreeMap<String, FieldValue>;

/// Per-ROI part of a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiObservation {
    /// Pixel statistics such as `mean_red` or `GCC_value`.
    pub statistics: BTreeMap<String, Option<f64>>,
    /// Issue flags keyed `iflag_<name>`.
    pub iflags: BTreeMap<String, bool>,
    pub has_snow_presence: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationRecord {
    pub catalog_guid: String,
    /// Station-local time; `None` when missing or unparseable.
    pub creation_date: Option<NaiveDateTime>,
    pub year: i32,
    pub day_of_year: u32,
    pub is_ready_for_products_use: bool,
    pub has_snow_presence: bool,
    pub rois: BTreeMap<String, RoiObservation>,
}

impl ObservationRecord {
    pub fn roi(&self, name: &str) -> Option<&RoiObservation> {
        self.rois.get(name)
    }

    /// Every ROI flag under its full `<ROI>_iflag_<name>` key.
    pub fn flag_keys(&self) -> BTreeMap<String, bool> {
        self.rois
            .iter()
            .flat_map(|(roi_name, obs)| {
                obs.iflags
                    .iter()
                    .map(move |(flag, &v)| (roi::iflag_key(roi_name, flag), v))
            })
            .collect()
    }
}

/// Persistence collaborator. Returns `false` when the write did not happen.
pub trait RecordStore {
    fn update_record_by_catalog_guid(&mut self, catalog_guid: &str, updates: &Updates) -> bool;
}

/// Hand `updates` to the store. A failed write is reported, not retried; the
/// computed values stay valid either way.
pub fn persist_updates<S: RecordStore + ?Sized>(
    store: &mut S,
    catalog_guid: &str,
    updates: &Updates,
) -> bool {
    let saved = store.update_record_by_catalog_guid(catalog_guid, updates);
    if saved {
        log::debug!("saved {} field(s) for {catalog_guid}", updates.len());
    } else {
        log::warn!("store rejected {} field(s) for {catalog_guid}", updates.len());
    }
    saved
}

/// Store that keeps merged updates in memory, keyed by catalog GUID.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub records: HashMap<String, Updates>,
}

impl InMemoryStore {
    pub fn with_records<I: IntoIterator<Item = String>>(guids: I) -> Self {
        Self {
            records: guids.into_iter().map(|g| (g, Updates::new())).collect(),
        }
    }
}

impl RecordStore for InMemoryStore {
    fn update_record_by_catalog_guid(&mut self, catalog_guid: &str, updates: &Updates) -> bool {
        match self.records.get_mut(catalog_guid) {
            Some(fields) => {
                fields.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
                true
            }
            None => false,
        }
    }
}

/// Rows flagged `is_ready_for_products_use`.
pub fn ready_for_products(df: &DataFrame) -> Result<DataFrame> {
    require_columns(df, &[record::IS_READY_FOR_PRODUCTS_USE])?;
    let ready = df
        .clone()
        .lazy()
        .filter(col(record::IS_READY_FOR_PRODUCTS_USE).eq(lit(true)))
        .collect()?;
    Ok(ready)
}

/// Build records from a station records frame.
///
/// Required columns: catalog_guid, creation_date
/// Optional columns: year, day_of_year (derived from creation_date when
///     absent), is_ready_for_products_use, has_snow_presence,
///     `<ROI>_iflag_<name>`, `L3_<ROI>_has_snow_presence`, `L2_<ROI>_<stat>`
pub fn records_from_frame(
    df: &DataFrame,
    rois: &[String],
    statistics: &[String],
) -> Result<Vec<ObservationRecord>> {
    require_columns(df, &[record::CATALOG_GUID, record::CREATION_DATE])?;

    let guid = df.column(record::CATALOG_GUID)?.cast(&DataType::String)?;
    let guid = guid.str()?;
    let created = df.column(record::CREATION_DATE)?.cast(&DataType::String)?;
    let created = created.str()?;

    let year = optional_i64(df, record::YEAR)?;
    let day_of_year = optional_i64(df, record::DAY_OF_YEAR)?;
    let ready = optional_bool(df, record::IS_READY_FOR_PRODUCTS_USE)?;
    let snow = optional_bool(df, record::HAS_SNOW_PRESENCE)?;

    // ROI-keyed columns, resolved once
    let column_names: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut roi_columns = Vec::with_capacity(rois.len());
    for roi_name in rois {
        let flag_prefix = format!("{roi_name}_");
        let mut flag_cols = Vec::new();
        for name in &column_names {
            if let Some(flag) = name.strip_prefix(&flag_prefix) {
                if flag.starts_with(roi::IFLAG_PREFIX) {
                    flag_cols.push((flag.to_string(), optional_bool(df, name)?));
                }
            }
        }
        let mut stat_cols = Vec::with_capacity(statistics.len());
        for stat in statistics {
            stat_cols.push((stat.clone(), optional_f64(df, &roi::l2_statistic(roi_name, stat))?));
        }
        let roi_snow = optional_bool(df, &roi::has_snow_presence(roi_name))?;
        roi_columns.push((roi_name.clone(), flag_cols, stat_cols, roi_snow));
    }

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let catalog_guid = guid
            .get(i)
            .ok_or_else(|| QflagError::InvalidData(format!("Null catalog_guid at row {i}")))?
            .to_string();
        let creation_date = created.get(i).and_then(parse_timestamp);

        let year = match (year.as_ref().and_then(|c| c.get(i)), creation_date) {
            (Some(y), _) => y as i32,
            (None, Some(dt)) => dt.year(),
            (None, None) => {
                return Err(QflagError::InvalidData(format!(
                    "record {catalog_guid} has neither year nor a valid creation_date"
                )))
            }
        };
        let day_of_year = match (day_of_year.as_ref().and_then(|c| c.get(i)), creation_date) {
            (Some(d), _) => d as u32,
            (None, Some(dt)) => dt.ordinal(),
            (None, None) => {
                return Err(QflagError::InvalidData(format!(
                    "record {catalog_guid} has neither day_of_year nor a valid creation_date"
                )))
            }
        };

        let mut roi_map = BTreeMap::new();
        for (roi_name, flag_cols, stat_cols, roi_snow) in &roi_columns {
            let iflags = flag_cols
                .iter()
                .filter_map(|(flag, c)| c.as_ref().map(|c| (flag.clone(), c.get(i).unwrap_or(false))))
                .collect();
            let statistics = stat_cols
                .iter()
                .map(|(stat, c)| (stat.clone(), c.as_ref().and_then(|c| c.get(i))))
                .collect();
            let has_snow_presence = roi_snow.as_ref().and_then(|c| c.get(i)).unwrap_or(false);
            roi_map.insert(
                roi_name.clone(),
                RoiObservation {
                    statistics,
                    iflags,
                    has_snow_presence,
                },
            );
        }

        records.push(ObservationRecord {
            catalog_guid,
            creation_date,
            year,
            day_of_year,
            is_ready_for_products_use: ready.as_ref().and_then(|c| c.get(i)).unwrap_or(false),
            has_snow_presence: snow.as_ref().and_then(|c| c.get(i)).unwrap_or(false),
            rois: roi_map,
        });
    }

    log::debug!("read {} record(s) for {} ROI(s)", records.len(), rois.len());
    Ok(records)
}

fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(QflagError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

fn optional_i64(df: &DataFrame, name: &str) -> Result<Option<Int64Chunked>> {
    match df.column(name) {
        Ok(c) => Ok(Some(c.cast(&DataType::Int64)?.i64()?.clone())),
        Err(_) => Ok(None),
    }
}

fn optional_f64(df: &DataFrame, name: &str) -> Result<Option<Float64Chunked>> {
    match df.column(name) {
        Ok(c) => Ok(Some(c.cast(&DataType::Float64)?.f64()?.clone())),
        Err(_) => Ok(None),
    }
}

fn optional_bool(df: &DataFrame, name: &str) -> Result<Option<BooleanChunked>> {
    match df.column(name) {
        Ok(c) => Ok(Some(c.bool().map_err(|_| {
            QflagError::InvalidData(format!("column '{name}' must be boolean"))
        })?.clone())),
        Err(_) => Ok(None),
    }
}
