//! FILENAME: core/cube-engine/src/error.rs

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CubeError {
    #[error("Invalid cube specification: {0}")]
    Specification(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field '{field}' appears more than once in {area}")]
    DuplicateField { field: String, area: &'static str },

    #[error("Order key '{0}' appears more than once")]
    DuplicateOrderKey(String),

    #[error("Invalid {axis} expansion prefix {prefix}: {reason}")]
    InvalidExpansion {
        axis: &'static str,
        prefix: String,
        reason: String,
    },

    #[error("Cannot compute {aggregate} of non-numeric field '{field}'")]
    AggregationType { field: String, aggregate: String },

    #[error("Query exceeded timeout of {limit:?}")]
    Timeout { limit: Duration },

    #[error("Malformed spec string: {0}")]
    Decode(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Aggregation source error: {0}")]
    Source(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Query {index} of {total} in the plan failed: {source}")]
    PlanQuery {
        index: usize,
        total: usize,
        #[source]
        source: Box<CubeError>,
    },
}

impl CubeError {
    /// The originating error, looking through plan-query wrappers.
    pub fn root(&self) -> &CubeError {
        match self {
            CubeError::PlanQuery { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), CubeError::Timeout { .. })
    }

    /// Specification-class errors: the request itself is wrong.
    pub fn is_specification(&self) -> bool {
        matches!(
            self.root(),
            CubeError::Specification(_)
                | CubeError::UnknownField(_)
                | CubeError::DuplicateField { .. }
                | CubeError::DuplicateOrderKey(_)
                | CubeError::InvalidExpansion { .. }
                | CubeError::AggregationType { .. }
                | CubeError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CubeError>;
