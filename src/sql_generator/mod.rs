//! Dialect SQL and DDL rendering
//!
//! The renderer walks a translated [`Ast`](crate::ast::Ast) and produces SQL
//! text plus the ordered parameter list; the dialect decides quoting,
//! placeholders and pagination. The DDL renderer derives `CREATE TABLE` and
//! deferred `ALTER TABLE` statements from the mapping policy.

use std::fmt;

use crate::model::Value;

pub mod ddl;
pub mod dialect;
pub mod errors;
mod renderer;

pub use ddl::{DdlRenderer, TableDdl};
pub use dialect::{
    dialect_for, Dialect, MySqlDialect, PaginationStrategy, Placeholders, PostgresDialect,
    SqliteDialect,
};
pub use renderer::{render, SqlRenderer};

/// SQL text and its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

impl fmt::Display for RenderedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            write!(f, " -- [{}]", params.join(", "))?;
        }
        Ok(())
    }
}
