use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExecutionError {
    #[error("Cannot open connection: {0}")]
    Connection(String),

    #[error("Command failed: {message}\n  SQL: {sql}")]
    Command { sql: String, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),
}
