//! Manual flag edits: minimal diffs and the flag-by-ROI matrix used by editors.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;

use crate::error::{QflagError, Result};
use crate::records::{FieldValue, Updates};
use crate::schema::{flags, record, roi};

/// `ROI_01_iflag_shadows` -> (`ROI_01`, `iflag_shadows`).
pub fn split_flag_key(key: &str) -> Option<(&str, &str)> {
    let at = key.find(roi::IFLAG_SEPARATOR)?;
    let (roi_name, rest) = key.split_at(at);
    // keep the `iflag_` prefix on the flag name
    Some((roi_name, &rest[1..]))
}

/// Flags whose value changed, confirmed on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagDiff {
    pub changed: BTreeMap<String, bool>,
}

impl FlagDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// Changed flags plus `flags_confirmed = true`.
    pub fn into_updates(self) -> Updates {
        let mut updates: Updates = self
            .changed
            .into_iter()
            .map(|(k, v)| (k, FieldValue::Bool(v)))
            .collect();
        updates.insert(record::FLAGS_CONFIRMED.to_string(), FieldValue::Bool(true));
        updates
    }
}

/// Keys of `edited` whose value differs from `original`. A key missing from
/// `original` compares as `false`.
pub fn reconcile_flags(
    original: &BTreeMap<String, bool>,
    edited: &BTreeMap<String, bool>,
) -> FlagDiff {
    let changed = edited
        .iter()
        .filter(|(key, value)| original.get(*key).copied().unwrap_or(false) != **value)
        .map(|(key, value)| (key.clone(), *value))
        .collect();
    FlagDiff { changed }
}

/// One row per flag name, one boolean column per ROI (sorted).
pub fn flags_frame(flags_by_key: &BTreeMap<String, bool>) -> Result<DataFrame> {
    let mut matrix: BTreeMap<&str, BTreeMap<&str, bool>> = BTreeMap::new();
    let mut rois: BTreeSet<&str> = BTreeSet::new();

    for (key, &value) in flags_by_key {
        let (roi_name, flag) = split_flag_key(key)
            .ok_or_else(|| QflagError::InvalidData(format!("'{key}' is not a ROI flag key")))?;
        rois.insert(roi_name);
        matrix.entry(flag).or_default().insert(roi_name, value);
    }

    let names: Vec<&str> = matrix.keys().copied().collect();
    let mut columns: Vec<Column> = vec![Column::new(flags::FLAG.into(), names)];
    for roi_name in rois {
        let values: Vec<Option<bool>> = matrix
            .values()
            .map(|by_roi| by_roi.get(roi_name).copied())
            .collect();
        columns.push(Column::new(roi_name.into(), values));
    }

    Ok(DataFrame::new(columns)?)
}

/// Read an edited matrix back and diff it against `original`. Cells for keys
/// that `original` does not hold are ignored.
pub fn flags_from_frame(df: &DataFrame, original: &BTreeMap<String, bool>) -> Result<FlagDiff> {
    let names = df
        .column(flags::FLAG)
        .map_err(|_| QflagError::MissingColumn(flags::FLAG.to_string()))?
        .str()?;

    let mut edited = BTreeMap::new();
    for roi_col in df.get_columns() {
        if roi_col.name().as_str() == flags::FLAG {
            continue;
        }
        let values = roi_col.bool()?;
        for (i, name) in names.into_iter().enumerate() {
            let (Some(name), Some(value)) = (name, values.get(i)) else {
                continue;
            };
            let key = roi::iflag_key(roi_col.name().as_str(), name);
            if original.contains_key(&key) {
                edited.insert(key, value);
            }
        }
    }

    Ok(reconcile_flags(original, &edited))
}
