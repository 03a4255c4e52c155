pub mod aggregation;
pub mod config;
pub mod error;
pub mod flags;
pub mod model;
pub mod penalty;
pub mod qflag;
pub mod records;
pub mod schema;
pub mod solar;
pub mod temporal;

pub use config::PipelineConfig;
pub use error::{QflagError, Result};
pub use model::PhenocamModel;
pub use qflag::{classify, Qflag};
pub use solar::SolarElevationClass;

#[cfg(feature = "python")]
mod python {
    use std::collections::BTreeMap;

    use pyo3::prelude::*;
    use pyo3::types::{PyDict, PyModule};

    use crate::model::{updates_to_dict, PhenocamModel};
    use crate::schema;

    /// Elevation class (1..=3) for a sun elevation angle in degrees.
    #[pyfunction]
    fn solar_elevation_class(elevation: f64) -> u8 {
        crate::solar::SolarElevationClass::from_elevation(elevation).value()
    }

    /// `(code, weight)` for a record count and elevation class.
    #[pyfunction]
    #[pyo3(signature = (n_records, solar_elevation_class, is_default_temporal_resolution=true, is_per_image=false))]
    fn classify_qflag(
        n_records: usize,
        solar_elevation_class: u8,
        is_default_temporal_resolution: bool,
        is_per_image: bool,
    ) -> PyResult<(u8, f64)> {
        let q = crate::qflag::classify_raw(
            n_records,
            solar_elevation_class,
            is_default_temporal_resolution,
            is_per_image,
        )?;
        Ok((q.code, q.weight))
    }

    /// Changed flags plus `flags_confirmed`.
    #[pyfunction]
    fn reconcile_flags<'py>(
        py: Python<'py>,
        original: BTreeMap<String, bool>,
        edited: BTreeMap<String, bool>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let updates = crate::flags::reconcile_flags(&original, &edited).into_updates();
        updates_to_dict(py, &updates)
    }

    /// Export schema constants as Python submodules
    fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
        // Record
        let record = PyModule::new(m.py(), "record")?;
        record.add("CATALOG_GUID", schema::record::CATALOG_GUID)?;
        record.add("CREATION_DATE", schema::record::CREATION_DATE)?;
        record.add("YEAR", schema::record::YEAR)?;
        record.add("DAY_OF_YEAR", schema::record::DAY_OF_YEAR)?;
        record.add(
            "IS_READY_FOR_PRODUCTS_USE",
            schema::record::IS_READY_FOR_PRODUCTS_USE,
        )?;
        record.add("HAS_SNOW_PRESENCE", schema::record::HAS_SNOW_PRESENCE)?;
        record.add("FLAGS_CONFIRMED", schema::record::FLAGS_CONFIRMED)?;
        m.add_submodule(&record)?;

        // Image
        let image = PyModule::new(m.py(), "image")?;
        image.add("SUN_ELEVATION_ANGLE", schema::image::SUN_ELEVATION_ANGLE)?;
        image.add("SUN_AZIMUTH_ANGLE", schema::image::SUN_AZIMUTH_ANGLE)?;
        image.add("SOLAR_ELEVATION_CLASS", schema::image::SOLAR_ELEVATION_CLASS)?;
        image.add("QFLAG_IMAGE_VALUE", schema::image::QFLAG_IMAGE_VALUE)?;
        image.add("QFLAG_IMAGE_WEIGHT", schema::image::QFLAG_IMAGE_WEIGHT)?;
        image.add(
            "DEFAULT_TEMPORAL_RESOLUTION",
            schema::image::DEFAULT_TEMPORAL_RESOLUTION,
        )?;
        image.add("MEANTIME_RESOLUTION", schema::image::MEANTIME_RESOLUTION)?;
        m.add_submodule(&image)?;

        // Daily
        let daily = PyModule::new(m.py(), "daily")?;
        daily.add("YEAR", schema::daily::YEAR)?;
        daily.add("DAY_OF_YEAR", schema::daily::DAY_OF_YEAR)?;
        daily.add("QFLAG_VALUE", schema::daily::QFLAG_VALUE)?;
        daily.add(
            "QFLAG_DEFAULT_TEMPORAL_RESOLUTION",
            schema::daily::QFLAG_DEFAULT_TEMPORAL_RESOLUTION,
        )?;
        daily.add("QFLAG_IS_PER_IMAGE", schema::daily::QFLAG_IS_PER_IMAGE)?;
        m.add_submodule(&daily)?;

        // Flags
        let flags = PyModule::new(m.py(), "flags")?;
        flags.add("FLAG", schema::flags::FLAG)?;
        flags.add("IFLAG_SEPARATOR", schema::roi::IFLAG_SEPARATOR)?;
        m.add_submodule(&flags)?;

        Ok(())
    }

    #[pymodule]
    fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PhenocamModel>()?;
        m.add_function(wrap_pyfunction!(solar_elevation_class, m)?)?;
        m.add_function(wrap_pyfunction!(classify_qflag, m)?)?;
        m.add_function(wrap_pyfunction!(reconcile_flags, m)?)?;
        add_schema_exports(m)?;
        Ok(())
    }
}
