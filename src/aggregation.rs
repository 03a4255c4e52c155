use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use rayon::prelude::*;

use crate::error::{QflagError, Result};
use crate::penalty::{PenaltyResolver, ResolvedPenalty};
use crate::qflag::Qflag;
use crate::records::ObservationRecord;
use crate::schema::{daily, roi};

/// One record's contribution to a weighted statistic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedSample {
    pub value: Option<f64>,
    /// QFLAG confidence weight.
    pub weight: f64,
    /// Penalty multiplier from the record's issue flags.
    pub penalty: f64,
}

impl WeightedSample {
    fn combined_weight(&self, overwrite_weight: bool) -> f64 {
        if overwrite_weight {
            1.0
        } else {
            self.weight * self.penalty
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedStat {
    /// `None` when no sample carries weight. Never coerced to zero.
    pub mean: Option<f64>,
    /// Weighted population standard deviation.
    pub std: Option<f64>,
    pub n_contributing: usize,
    pub weights_used: Vec<f64>,
    pub weight_sum: f64,
}

/// Weighted mean and standard deviation. Samples without a finite value are
/// skipped; zero-weight samples add nothing to either sum.
pub fn weighted_mean_std(samples: &[WeightedSample], overwrite_weight: bool) -> WeightedStat {
    let mut weights_used = Vec::with_capacity(samples.len());
    let mut values = Vec::with_capacity(samples.len());

    for s in samples {
        let Some(value) = s.value.filter(|v| v.is_finite()) else {
            continue;
        };
        let w = s.combined_weight(overwrite_weight);
        weights_used.push(w);
        values.push(value);
    }

    let weight_sum: f64 = weights_used.iter().sum();
    let n_contributing = weights_used.iter().filter(|w| **w > 0.0).count();

    if weight_sum <= 0.0 {
        return WeightedStat {
            mean: None,
            std: None,
            n_contributing,
            weights_used,
            weight_sum,
        };
    }

    let mean = values
        .iter()
        .zip(&weights_used)
        .map(|(x, w)| x * w)
        .sum::<f64>()
        / weight_sum;
    let variance = values
        .iter()
        .zip(&weights_used)
        .map(|(x, w)| w * (x - mean).powi(2))
        .sum::<f64>()
        / weight_sum;

    WeightedStat {
        mean: Some(mean),
        std: Some(variance.sqrt()),
        n_contributing,
        weights_used,
        weight_sum,
    }
}

/// Weighted statistics of one ROI over one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiDayAggregate {
    pub stats: BTreeMap<String, WeightedStat>,
    /// Records with a non-zero combined weight.
    pub n_records: usize,
    /// Snow seen in any contributing record; `None` when nothing contributed.
    pub has_snow_presence: Option<bool>,
    pub penalties: Vec<ResolvedPenalty>,
}

/// Aggregate one ROI over a day's records. `qflag_weights[i]` belongs to
/// `records[i]`.
pub fn aggregate_roi_day(
    records: &[&ObservationRecord],
    qflag_weights: &[f64],
    roi_name: &str,
    statistics: &[String],
    resolver: &PenaltyResolver<'_>,
    overwrite_weight: bool,
) -> Result<RoiDayAggregate> {
    if records.len() != qflag_weights.len() {
        return Err(QflagError::InvalidData(format!(
            "{} records but {} QFLAG weights",
            records.len(),
            qflag_weights.len()
        )));
    }

    let empty: BTreeMap<String, bool> = BTreeMap::new();
    let mut penalties = Vec::with_capacity(records.len());
    let mut n_records = 0;
    let mut snow: Option<bool> = None;

    for (record, &weight) in records.iter().zip(qflag_weights) {
        let obs = record.roi(roi_name);
        let resolved = resolver.resolve(obs.map(|o| &o.iflags).unwrap_or(&empty));
        let combined = if overwrite_weight {
            1.0
        } else {
            weight * resolved.multiplier
        };
        if combined > 0.0 {
            n_records += 1;
            let seen = obs.map(|o| o.has_snow_presence).unwrap_or(false);
            snow = Some(snow.unwrap_or(false) || seen);
        }
        penalties.push(resolved);
    }

    let mut stats = BTreeMap::new();
    for stat in statistics {
        let samples: Vec<WeightedSample> = records
            .iter()
            .zip(qflag_weights)
            .zip(&penalties)
            .map(|((record, &weight), penalty)| WeightedSample {
                value: record
                    .roi(roi_name)
                    .and_then(|o| o.statistics.get(stat).copied().flatten()),
                weight,
                penalty: penalty.multiplier,
            })
            .collect();
        stats.insert(stat.clone(), weighted_mean_std(&samples, overwrite_weight));
    }

    Ok(RoiDayAggregate {
        stats,
        n_records,
        has_snow_presence: snow,
        penalties,
    })
}

/// One row of the annual daily product.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRow {
    pub year: i32,
    pub day_of_year: u32,
    /// `None` on days without records.
    pub qflag: Option<Qflag>,
    pub rois: BTreeMap<String, RoiDayAggregate>,
}

impl DailyRow {
    pub fn empty(year: i32, day_of_year: u32) -> Self {
        Self {
            year,
            day_of_year,
            qflag: None,
            rois: BTreeMap::new(),
        }
    }
}

pub fn days_in_year(year: i32) -> u32 {
    if NaiveDate::from_yo_opt(year, 366).is_some() {
        366
    } else {
        365
    }
}

/// Evaluate every calendar day of `year`. Days run in parallel; the result is
/// in ascending day order with no gaps.
pub fn annual_rows<F>(year: i32, compute_day: F) -> Result<Vec<DailyRow>>
where
    F: Fn(u32) -> Result<DailyRow> + Sync + Send,
{
    let rows: Vec<DailyRow> = (1..=days_in_year(year))
        .into_par_iter()
        .map(&compute_day)
        .collect::<Result<_>>()?;
    log::info!(
        "{year}: {} day(s), {} with records",
        rows.len(),
        rows.iter().filter(|r| r.qflag.is_some()).count()
    );
    Ok(rows)
}

/// Assemble daily rows into the L3 table.
///
/// Columns: year, day_of_year, QFLAG_value, QFLAG_default_temporal_resolution,
/// QFLAG_is_per_image, then for every ROI (sorted) and statistic
/// `L3_<roi>_<stat>_mean`, `L3_<roi>_<stat>_std`, then `L3_<roi>_n_records`
/// and `L3_<roi>_has_snow_presence`.
pub fn rows_to_frame(rows: &[DailyRow], rois: &[String], statistics: &[String]) -> Result<DataFrame> {
    let mut rois: Vec<&String> = rois.iter().collect();
    rois.sort();

    let years: Vec<i32> = rows.iter().map(|r| r.year).collect();
    let doys: Vec<u32> = rows.iter().map(|r| r.day_of_year).collect();
    let codes: Vec<Option<i32>> = rows.iter().map(|r| r.qflag.map(|q| q.code as i32)).collect();
    let default_res: Vec<Option<bool>> = rows
        .iter()
        .map(|r| r.qflag.map(|q| q.is_default_temporal_resolution))
        .collect();
    let per_image: Vec<Option<bool>> = rows.iter().map(|r| r.qflag.map(|q| q.is_per_image)).collect();

    let mut columns: Vec<Column> = vec![
        Column::new(daily::YEAR.into(), years),
        Column::new(daily::DAY_OF_YEAR.into(), doys),
        Column::new(daily::QFLAG_VALUE.into(), codes),
        Column::new(daily::QFLAG_DEFAULT_TEMPORAL_RESOLUTION.into(), default_res),
        Column::new(daily::QFLAG_IS_PER_IMAGE.into(), per_image),
    ];

    for roi_name in rois {
        for stat in statistics {
            let (means, stds): (Vec<Option<f64>>, Vec<Option<f64>>) = rows
                .iter()
                .map(|r| {
                    r.rois
                        .get(roi_name)
                        .and_then(|a| a.stats.get(stat))
                        .map(|s| (s.mean, s.std))
                        .unwrap_or((None, None))
                })
                .unzip();
            columns.push(Column::new(roi::l3_mean(roi_name, stat).into(), means));
            columns.push(Column::new(roi::l3_std(roi_name, stat).into(), stds));
        }
        let counts: Vec<Option<u32>> = rows
            .iter()
            .map(|r| r.rois.get(roi_name).map(|a| a.n_records as u32))
            .collect();
        let snow: Vec<Option<bool>> = rows
            .iter()
            .map(|r| r.rois.get(roi_name).and_then(|a| a.has_snow_presence))
            .collect();
        columns.push(Column::new(roi::l3_n_records(roi_name).into(), counts));
        columns.push(Column::new(roi::has_snow_presence(roi_name).into(), snow));
    }

    Ok(DataFrame::new(columns)?)
}

/// `SITES_ROI-TS_<station>_<platform>_<YYYYMMDD>-<YYYYMMDD>_L3_DAILY.csv`
pub fn l3_daily_filename(
    station_acronym: &str,
    platform_id: &str,
    min_date: NaiveDateTime,
    max_date: NaiveDateTime,
) -> String {
    format!(
        "SITES_ROI-TS_{}_{}_{}-{}_L3_DAILY.csv",
        station_acronym.replace('_', "-"),
        platform_id.replace('_', "-"),
        min_date.format("%Y%m%d"),
        max_date.format("%Y%m%d"),
    )
}

/// Write the table to `<products_dir>/L3_ROI_TS/<year>/<filename>`.
pub fn write_l3_csv(
    df: &mut DataFrame,
    products_dir: &Path,
    year: i32,
    filename: &str,
) -> Result<PathBuf> {
    let dir = products_dir.join("L3_ROI_TS").join(year.to_string());
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(filename);
    let mut file = File::create(&path)?;
    CsvWriter::new(&mut file).include_header(true).finish(df)?;
    log::info!("Wrote {} row(s) to {}", df.height(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::penalty::{PenaltyEntry, PenaltyTable};
    use crate::records::RoiObservation;
    use crate::solar::SolarElevationClass;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn sample(value: f64, weight: f64, penalty: f64) -> WeightedSample {
        WeightedSample {
            value: Some(value),
            weight,
            penalty,
        }
    }

    fn record(guid: &str, red: Option<f64>, flags: &[(&str, bool)], snow: bool) -> ObservationRecord {
        let mut rois = BTreeMap::new();
        rois.insert(
            "ROI_01".to_string(),
            RoiObservation {
                statistics: [("mean_red".to_string(), red)].into_iter().collect(),
                iflags: flags.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                has_snow_presence: snow,
            },
        );
        ObservationRecord {
            catalog_guid: guid.to_string(),
            creation_date: None,
            year: 2024,
            day_of_year: 10,
            is_ready_for_products_use: true,
            has_snow_presence: snow,
            rois,
        }
    }

    fn disable_table() -> PenaltyTable {
        let mut entries = BTreeMap::new();
        entries.insert(
            "iflag_disable_for_processing".to_string(),
            PenaltyEntry {
                value: false,
                penalty_value: 1.0,
            },
        );
        entries.insert(
            "iflag_shadows".to_string(),
            PenaltyEntry {
                value: false,
                penalty_value: 0.5,
            },
        );
        PenaltyTable::new(entries).unwrap()
    }

    #[test]
    fn test_weighted_mean_and_std() {
        let stat = weighted_mean_std(&[sample(10.0, 1.0, 1.0), sample(20.0, 0.5, 0.5)], false);
        // weights 1.0 and 0.25
        assert_relative_eq!(stat.mean.unwrap(), (10.0 + 5.0) / 1.25);
        let mean = 12.0;
        let var = (1.0 * (10.0f64 - mean).powi(2) + 0.25 * (20.0f64 - mean).powi(2)) / 1.25;
        assert_relative_eq!(stat.std.unwrap(), var.sqrt());
        assert_eq!(stat.n_contributing, 2);
        assert_eq!(stat.weights_used, vec![1.0, 0.25]);
    }

    #[test]
    fn test_mean_is_scale_invariant() {
        let base = [
            sample(0.31, 0.1, 1.0),
            sample(0.35, 0.75, 0.5),
            sample(0.42, 1.0, 0.8),
        ];
        let reference = weighted_mean_std(&base, false);
        for scale in [0.001, 0.5, 3.7, 1000.0] {
            let scaled: Vec<WeightedSample> = base
                .iter()
                .map(|s| WeightedSample {
                    weight: s.weight * scale,
                    ..*s
                })
                .collect();
            let stat = weighted_mean_std(&scaled, false);
            assert_abs_diff_eq!(stat.mean.unwrap(), reference.mean.unwrap(), epsilon = 1e-12);
            assert_abs_diff_eq!(stat.std.unwrap(), reference.std.unwrap(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_weights_give_null_not_zero() {
        let stat = weighted_mean_std(&[sample(5.0, 1.0, 0.0), sample(7.0, 0.0, 1.0)], false);
        assert_eq!(stat.mean, None);
        assert_eq!(stat.std, None);
        assert_eq!(stat.n_contributing, 0);

        assert_eq!(weighted_mean_std(&[], false).mean, None);
    }

    #[test]
    fn test_zero_weight_sample_is_excluded() {
        let stat = weighted_mean_std(&[sample(5.0, 1.0, 1.0), sample(1000.0, 1.0, 0.0)], false);
        assert_relative_eq!(stat.mean.unwrap(), 5.0);
        assert_relative_eq!(stat.std.unwrap(), 0.0);
        assert_eq!(stat.n_contributing, 1);
    }

    #[test]
    fn test_overwrite_weight_gives_unweighted_mean() {
        let samples = [sample(2.0, 0.1, 0.0), sample(4.0, 1.0, 1.0)];
        let stat = weighted_mean_std(&samples, true);
        assert_relative_eq!(stat.mean.unwrap(), 3.0);
        assert_relative_eq!(stat.std.unwrap(), 1.0);
    }

    #[test]
    fn test_missing_values_skipped() {
        let samples = [
            WeightedSample {
                value: None,
                weight: 1.0,
                penalty: 1.0,
            },
            WeightedSample {
                value: Some(f64::NAN),
                weight: 1.0,
                penalty: 1.0,
            },
            sample(3.0, 0.5, 1.0),
        ];
        let stat = weighted_mean_std(&samples, false);
        assert_relative_eq!(stat.mean.unwrap(), 3.0);
        assert_eq!(stat.weights_used.len(), 1);
    }

    #[test]
    fn test_aggregate_roi_day_applies_penalties() {
        let table = disable_table();
        let resolver = PenaltyResolver::new(&table, &[]);
        let a = record("a", Some(100.0), &[("iflag_shadows", true)], false);
        let b = record("b", Some(200.0), &[], true);
        let c = record("c", Some(900.0), &[("iflag_disable_for_processing", true)], true);

        let agg = aggregate_roi_day(
            &[&a, &b, &c],
            &[1.0, 1.0, 1.0],
            "ROI_01",
            &["mean_red".to_string()],
            &resolver,
            false,
        )
        .unwrap();

        // a weighs 0.5, b 1.0, c is excluded
        assert_relative_eq!(agg.stats["mean_red"].mean.unwrap(), (50.0 + 200.0) / 1.5);
        assert_eq!(agg.n_records, 2);
        assert_eq!(agg.has_snow_presence, Some(true));
        assert_eq!(agg.penalties[2].active_flags, vec!["iflag_disable_for_processing"]);
    }

    #[test]
    fn test_aggregate_roi_day_all_excluded() {
        let table = disable_table();
        let resolver = PenaltyResolver::new(&table, &[]);
        let a = record("a", Some(0.0), &[("iflag_disable_for_processing", true)], true);

        let agg = aggregate_roi_day(&[&a], &[1.0], "ROI_01", &["mean_red".to_string()], &resolver, false)
            .unwrap();
        assert_eq!(agg.stats["mean_red"].mean, None);
        assert_eq!(agg.n_records, 0);
        assert_eq!(agg.has_snow_presence, None);
    }

    #[test]
    fn test_aggregate_roi_day_rejects_mismatched_weights() {
        let table = PenaltyTable::default();
        let resolver = PenaltyResolver::new(&table, &[]);
        let a = record("a", Some(1.0), &[], false);
        assert!(aggregate_roi_day(&[&a], &[], "ROI_01", &[], &resolver, false).is_err());
    }

    #[test]
    fn test_days_in_year() {
        assert_eq!(days_in_year(2024), 366);
        assert_eq!(days_in_year(2023), 365);
        assert_eq!(days_in_year(1900), 365);
        assert_eq!(days_in_year(2000), 366);
    }

    #[test]
    fn test_leap_year_table_has_every_day() {
        let rows = annual_rows(2024, |doy| {
            if doy == 100 {
                let mut row = DailyRow::empty(2024, doy);
                row.qflag = Some(Qflag::daily(
                    1,
                    SolarElevationClass::High,
                    &crate::temporal::TemporalResolution::single_observation(1),
                )?);
                let mut agg = RoiDayAggregate::default();
                agg.stats.insert(
                    "mean_red".to_string(),
                    weighted_mean_std(&[sample(42.0, 0.75, 1.0)], false),
                );
                agg.n_records = 1;
                agg.has_snow_presence = Some(false);
                row.rois.insert("ROI_01".to_string(), agg);
                Ok(row)
            } else {
                Ok(DailyRow::empty(2024, doy))
            }
        })
        .unwrap();

        let rois = vec!["ROI_01".to_string()];
        let stats = vec!["mean_red".to_string()];
        let df = rows_to_frame(&rows, &rois, &stats).unwrap();
        assert_eq!(df.height(), 366);

        let doys: Vec<u32> = df
            .column("day_of_year")
            .unwrap()
            .u32()
            .unwrap()
            .into_no_null_iter()
            .collect();
        assert_eq!(doys, (1..=366).collect::<Vec<u32>>());

        let names: Vec<&str> = df.get_column_names_str().into_iter().collect();
        assert_eq!(
            names,
            vec![
                "year",
                "day_of_year",
                "QFLAG_value",
                "QFLAG_default_temporal_resolution",
                "QFLAG_is_per_image",
                "L3_ROI_01_mean_red_mean",
                "L3_ROI_01_mean_red_std",
                "L3_ROI_01_n_records",
                "L3_ROI_01_has_snow_presence",
            ]
        );

        // every column except year/day_of_year is null on the 365 empty days
        for name in &names[2..] {
            assert_eq!(df.column(name).unwrap().null_count(), 365, "{name}");
        }
        let means = df.column("L3_ROI_01_mean_red_mean").unwrap().f64().unwrap();
        assert_eq!(means.get(99), Some(42.0));
        let codes = df.column("QFLAG_value").unwrap().i32().unwrap();
        assert_eq!(codes.get(99), Some(13));
    }

    #[test]
    fn test_l3_filename() {
        let min = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        let max = NaiveDate::from_ymd_opt(2024, 10, 31).unwrap().and_hms_opt(16, 30, 0).unwrap();
        assert_eq!(
            l3_daily_filename("SVB", "P_BTH_1", min, max),
            "SITES_ROI-TS_SVB_P-BTH-1_20240301-20241031_L3_DAILY.csv"
        );
    }

    #[test]
    fn test_write_l3_csv() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<DailyRow> = (1..=3).map(|d| DailyRow::empty(2023, d)).collect();
        let mut df = rows_to_frame(&rows, &[], &[]).unwrap();
        let path = write_l3_csv(&mut df, dir.path(), 2023, "out.csv").unwrap();
        assert!(path.ends_with("L3_ROI_TS/2023/out.csv"));

        let text = std::fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("year,day_of_year,QFLAG_value,QFLAG_default_temporal_resolution,QFLAG_is_per_image")
        );
        assert_eq!(lines.count(), 3);
    }
}
