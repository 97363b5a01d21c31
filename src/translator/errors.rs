use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranslationError {
    #[error("Unsupported query shape: {0}")]
    UnsupportedQueryShape(String),
}

pub(crate) fn unsupported(construct: impl Into<String>) -> TranslationError {
    TranslationError::UnsupportedQueryShape(construct.into())
}
