use thiserror::Error;

use crate::config::ConfigError;
use crate::execution::errors::ExecutionError;
use crate::mapping::errors::MappingError;
use crate::model::errors::DataError;
use crate::sql_generator::errors::RenderError;
use crate::translator::errors::TranslationError;

/// Every failure surfaced by the engine. Nothing is retried or swallowed.
#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = OrmError> = std::result::Result<T, E>;

impl OrmError {
    /// True for data errors such as a vanished row behind a deferred load.
    pub fn is_data_error(&self) -> bool {
        matches!(self, OrmError::Data(_))
    }

    /// True when the translator rejected the query shape.
    pub fn is_unsupported_query(&self) -> bool {
        matches!(
            self,
            OrmError::Translation(TranslationError::UnsupportedQueryShape(_))
        )
    }
}
