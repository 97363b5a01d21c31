use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    #[error("Request has no FROM alias (translation incomplete)")]
    MissingFrom,
    #[error("Insert statement has no target table")]
    MissingInsertTarget,
    #[error("Node {0} cannot be rendered in this position")]
    UnexpectedNode(String),
    #[error("Unsupported pagination on {dialect}: {reason}")]
    UnsupportedPagination { dialect: String, reason: String },
    #[error("Unsupported statement on {dialect}: {reason}")]
    UnsupportedStatement { dialect: String, reason: String },
}
