/// Column-name constants for phenocam records and L3 products.
/// Single source of truth - exported to Python via PyO3.

// ── Observation record columns ──────────────────────────────────────────────
pub mod record {
    pub const CATALOG_GUID: &str = "catalog_guid";
    pub const CREATION_DATE: &str = "creation_date";
    pub const YEAR: &str = "year";
    pub const DAY_OF_YEAR: &str = "day_of_year";
    pub const IS_READY_FOR_PRODUCTS_USE: &str = "is_ready_for_products_use";
    pub const HAS_SNOW_PRESENCE: &str = "has_snow_presence";
    pub const FLAGS_CONFIRMED: &str = "flags_confirmed";
}

// ── Per-image update fields ─────────────────────────────────────────────────
pub mod image {
    pub const SUN_ELEVATION_ANGLE: &str = "sun_elevation_angle";
    pub const SUN_AZIMUTH_ANGLE: &str = "sun_azimuth_angle";
    pub const SOLAR_ELEVATION_CLASS: &str = "solar_elevation_class";
    pub const QFLAG_IMAGE_VALUE: &str = "QFLAG_image_value";
    pub const QFLAG_IMAGE_WEIGHT: &str = "QFLAG_image_weight";
    pub const DEFAULT_TEMPORAL_RESOLUTION: &str = "default_temporal_resolution";
    pub const MEANTIME_RESOLUTION: &str = "meantime_resolution";
}

// ── Daily product columns ───────────────────────────────────────────────────
pub mod daily {
    pub const YEAR: &str = "year";
    pub const DAY_OF_YEAR: &str = "day_of_year";
    pub const QFLAG_VALUE: &str = "QFLAG_value";
    pub const QFLAG_DEFAULT_TEMPORAL_RESOLUTION: &str = "QFLAG_default_temporal_resolution";
    pub const QFLAG_IS_PER_IMAGE: &str = "QFLAG_is_per_image";

    pub const LEADING: [&str; 5] = [
        YEAR,
        DAY_OF_YEAR,
        QFLAG_VALUE,
        QFLAG_DEFAULT_TEMPORAL_RESOLUTION,
        QFLAG_IS_PER_IMAGE,
    ];
}

// ── ROI-keyed column naming ─────────────────────────────────────────────────
pub mod roi {
    pub const IFLAG_SEPARATOR: &str = "_iflag_";
    pub const IFLAG_PREFIX: &str = "iflag_";
    pub const L2_PREFIX: &str = "L2_";
    pub const L3_PREFIX: &str = "L3_";

    /// `ROI_01` + `iflag_shadows` -> `ROI_01_iflag_shadows`
    pub fn iflag_key(roi: &str, flag: &str) -> String {
        format!("{roi}_{flag}")
    }

    pub fn l2_statistic(roi: &str, statistic: &str) -> String {
        format!("{L2_PREFIX}{roi}_{statistic}")
    }

    pub fn has_snow_presence(roi: &str) -> String {
        format!("{L3_PREFIX}{roi}_has_snow_presence")
    }

    pub fn l3_mean(roi: &str, statistic: &str) -> String {
        format!("{L3_PREFIX}{roi}_{statistic}_mean")
    }

    pub fn l3_std(roi: &str, statistic: &str) -> String {
        format!("{L3_PREFIX}{roi}_{statistic}_std")
    }

    pub fn l3_n_records(roi: &str) -> String {
        format!("{L3_PREFIX}{roi}_n_records")
    }
}

// ── Flags matrix ────────────────────────────────────────────────────────────
pub mod flags {
    pub const FLAG: &str = "flag";
}
