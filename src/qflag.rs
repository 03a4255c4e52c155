//! QFLAG classification.
//!
//! A QFLAG code is `10 * tier + elevation class`. The tier grades how many
//! observations back a value; the elevation class grades illumination. Each
//! of the nine codes carries a confidence weight, with a separate column for
//! single-image evaluation.

use crate::error::{QflagError, Result};
use crate::solar::SolarElevationClass;
use crate::temporal::TemporalResolution;

/// Record-count tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoverageTier {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl CoverageTier {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// Count breakpoints: tier 1 below `low`, tier 3 from `mid` upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierBoundaries {
    pub low: usize,
    pub mid: usize,
}

impl TierBoundaries {
    /// Dense or single-image sampling.
    pub const DEFAULT: Self = Self { low: 3, mid: 6 };
    /// Sparse sampling.
    pub const SPARSE: Self = Self { low: 2, mid: 4 };

    pub fn for_resolution(is_default_temporal_resolution: bool) -> Self {
        if is_default_temporal_resolution {
            Self::DEFAULT
        } else {
            Self::SPARSE
        }
    }

    pub fn tier(&self, n_records: usize) -> CoverageTier {
        if n_records < self.low {
            CoverageTier::Low
        } else if n_records < self.mid {
            CoverageTier::Medium
        } else {
            CoverageTier::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WeightEntry {
    code: u8,
    daily: f64,
    per_image: f64,
}

const fn entry(code: u8, daily: f64, per_image: f64) -> WeightEntry {
    WeightEntry {
        code,
        daily,
        per_image,
    }
}

/// Confidence weight per code. Per-image weights differ only in tier 1.
const WEIGHT_TABLE: [WeightEntry; 9] = [
    entry(11, 0.1, 0.5),
    entry(12, 0.75, 0.75),
    entry(13, 0.75, 1.0),
    entry(21, 0.5, 0.5),
    entry(22, 0.75, 0.75),
    entry(23, 1.0, 1.0),
    entry(31, 0.75, 0.75),
    entry(32, 1.0, 1.0),
    entry(33, 1.0, 1.0),
];

fn lookup(tier: u8, class: u8) -> Result<&'static WeightEntry> {
    if !(1..=3).contains(&tier) || !(1..=3).contains(&class) {
        return Err(QflagError::Classification(format!(
            "no QFLAG for tier {tier} and elevation class {class}"
        )));
    }
    let code = 10 * tier + class;
    WEIGHT_TABLE
        .iter()
        .find(|e| e.code == code)
        .ok_or_else(|| QflagError::Classification(format!("QFLAG {code} missing from weight table")))
}

/// Outcome of one classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Qflag {
    pub code: u8,
    pub tier: CoverageTier,
    pub elevation_class: SolarElevationClass,
    pub weight: f64,
    pub is_default_temporal_resolution: bool,
    pub is_per_image: bool,
}

impl Qflag {
    /// Single observation evaluated on its own.
    pub fn per_image(elevation_class: SolarElevationClass, is_default_temporal_resolution: bool) -> Result<Self> {
        classify(1, elevation_class, is_default_temporal_resolution, true)
    }

    /// All observations of one day.
    pub fn daily(
        n_records: usize,
        elevation_class: SolarElevationClass,
        resolution: &TemporalResolution,
    ) -> Result<Self> {
        classify(n_records, elevation_class, resolution.is_default, false)
    }
}

pub fn classify(
    n_records: usize,
    elevation_class: SolarElevationClass,
    is_default_temporal_resolution: bool,
    is_per_image: bool,
) -> Result<Qflag> {
    let tier = TierBoundaries::for_resolution(is_default_temporal_resolution).tier(n_records);
    let entry = lookup(tier.value(), elevation_class.value())?;
    let weight = if is_per_image {
        entry.per_image
    } else {
        entry.daily
    };
    log::debug!(
        "QFLAG {} (n={n_records}, class={}, default_resolution={is_default_temporal_resolution}, per_image={is_per_image}) weight {weight}",
        entry.code,
        elevation_class.value()
    );
    Ok(Qflag {
        code: entry.code,
        tier,
        elevation_class,
        weight,
        is_default_temporal_resolution,
        is_per_image,
    })
}

/// Classify with an elevation class read back from storage.
pub fn classify_raw(
    n_records: usize,
    elevation_class: u8,
    is_default_temporal_resolution: bool,
    is_per_image: bool,
) -> Result<Qflag> {
    let class = SolarElevationClass::try_from(elevation_class)?;
    classify(n_records, class, is_default_temporal_resolution, is_per_image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CLASSES: [SolarElevationClass; 3] = [
        SolarElevationClass::Low,
        SolarElevationClass::Mid,
        SolarElevationClass::High,
    ];

    #[test]
    fn test_weight_table_covers_every_code_once() {
        let mut codes: Vec<u8> = WEIGHT_TABLE.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        assert_eq!(codes, vec![11, 12, 13, 21, 22, 23, 31, 32, 33]);
        for tier in 1..=3u8 {
            for class in 1..=3u8 {
                assert_eq!(lookup(tier, class).unwrap().code, 10 * tier + class);
            }
        }
    }

    #[test]
    fn test_code_matches_tier_and_class() {
        for is_default in [true, false] {
            for n in 0..12 {
                for class in CLASSES {
                    let q = classify(n, class, is_default, false).unwrap();
                    assert_eq!(q.code, 10 * q.tier.value() + class.value());
                    assert_eq!(q.elevation_class, class);
                }
            }
        }
    }

    #[test]
    fn test_tier_boundaries_follow_resolution() {
        let dense = TierBoundaries::DEFAULT;
        assert_eq!(dense.tier(2), CoverageTier::Low);
        assert_eq!(dense.tier(3), CoverageTier::Medium);
        assert_eq!(dense.tier(5), CoverageTier::Medium);
        assert_eq!(dense.tier(6), CoverageTier::High);

        let sparse = TierBoundaries::SPARSE;
        assert_eq!(sparse.tier(1), CoverageTier::Low);
        assert_eq!(sparse.tier(2), CoverageTier::Medium);
        assert_eq!(sparse.tier(3), CoverageTier::Medium);
        assert_eq!(sparse.tier(4), CoverageTier::High);
    }

    #[test]
    fn test_two_sparse_records_in_high_sun() {
        let q = classify(2, SolarElevationClass::High, false, false).unwrap();
        assert_eq!(q.code, 23);
        assert_relative_eq!(q.weight, 1.0);
    }

    #[test]
    fn test_per_image_and_daily_weights_differ_in_tier_one() {
        let image = classify(1, SolarElevationClass::Low, true, true).unwrap();
        let day = classify(1, SolarElevationClass::Low, true, false).unwrap();
        assert_eq!((image.code, day.code), (11, 11));
        assert_relative_eq!(image.weight, 0.5);
        assert_relative_eq!(day.weight, 0.1);

        let image = Qflag::per_image(SolarElevationClass::High, false).unwrap();
        assert_eq!(image.code, 13);
        assert_relative_eq!(image.weight, 1.0);
        let day = classify(1, SolarElevationClass::High, false, false).unwrap();
        assert_relative_eq!(day.weight, 0.75);

        let image = Qflag::per_image(SolarElevationClass::Mid, true).unwrap();
        assert_relative_eq!(image.weight, 0.75);
    }

    #[test]
    fn test_daily_weights() {
        let expected = [
            (4, SolarElevationClass::Low, 21, 0.5),
            (4, SolarElevationClass::Mid, 22, 0.75),
            (4, SolarElevationClass::High, 23, 1.0),
            (8, SolarElevationClass::Low, 31, 0.75),
            (8, SolarElevationClass::Mid, 32, 1.0),
            (8, SolarElevationClass::High, 33, 1.0),
        ];
        for (n, class, code, weight) in expected {
            let q = classify(n, class, true, false).unwrap();
            assert_eq!(q.code, code);
            assert_relative_eq!(q.weight, weight);
        }
    }

    #[test]
    fn test_daily_mode_uses_resolution() {
        let sparse = TemporalResolution {
            hours: 1,
            minutes: 0,
            is_default: false,
            n_observations: 4,
        };
        let q = Qflag::daily(4, SolarElevationClass::Mid, &sparse).unwrap();
        assert_eq!(q.code, 32);
        assert!(!q.is_per_image);
        assert!(!q.is_default_temporal_resolution);
    }

    #[test]
    fn test_invalid_stored_class_fails() {
        assert!(matches!(
            classify_raw(3, 0, true, false),
            Err(QflagError::Classification(_))
        ));
        assert!(classify_raw(3, 4, true, false).is_err());
        assert_eq!(classify_raw(3, 3, true, false).unwrap().code, 23);
        assert!(lookup(4, 1).is_err());
    }
}
