#[cfg(feature = "python")]
use pyo3::exceptions::{PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QflagError {
    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Validation: {0}")]
    Validation(String),

    #[error("Unknown timezone: {0}")]
    Timezone(String),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, QflagError>;

#[cfg(feature = "python")]
impl From<QflagError> for PyErr {
    fn from(err: QflagError) -> PyErr {
        match err {
            QflagError::Classification(_) | QflagError::Validation(_) => {
                PyValueError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

#[cfg(feature = "python")]
impl From<PyErr> for QflagError {
    fn from(err: PyErr) -> Self {
        QflagError::General(err.to_string())
    }
}
