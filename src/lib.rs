//! relgraph - object graphs over relational databases
//!
//! This crate turns declarative queries against mapped domain types into SQL and back:
//! - Domain metadata and deferred-load navigation wrappers (`model`)
//! - A dialect-independent relational AST (`ast`)
//! - Naming and navigation resolution (`mapping`)
//! - Query building and translation into the AST (`query`, `translator`)
//! - Dialect SQL and DDL rendering (`sql_generator`)
//! - Execution and object-graph materialization (`execution`, `materialize`)
//! - Change tracking and a transactional unit of work (`tracking`)

pub mod ast;
pub mod config;
pub mod errors;
pub mod execution;
pub mod mapping;
pub mod materialize;
pub mod model;
pub mod query;
pub mod sql_generator;
pub mod tracking;
pub mod translator;

#[cfg(test)]
pub(crate) mod test_model;

pub use errors::{OrmError, Result};
pub use execution::session::Session;
pub use model::{Collection, Entity, EntityMeta, EntityType, Reference, ScalarValue, Value};
pub use query::{Direction, Expr, LoadMode, Path, Projection, Query, Statement, Var};
pub use tracking::UnitOfWork;
