//! Statement execution
//!
//! Connections are opened from a [`ConnectionProvider`] once per statement,
//! or once per commit for a unit of work, and dropped on every exit path.
//! [`ExecutionContext`] bundles everything a session, a deferred loader or a
//! unit of work needs to run SQL: provider, dialect, mapping policy, config,
//! the change tracker and the save hooks.

use std::cell::RefCell;

use log::debug;

use crate::ast::{Ast, NodeId};
use crate::config::OrmConfig;
use crate::errors::Result;
use crate::mapping::MappingPolicy;
use crate::model::{Entity, Value};
use crate::sql_generator::{self, Dialect, RenderedSql};
use crate::tracking::ChangeTracker;
use crate::translator::Translation;

pub mod errors;
pub mod session;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod transaction;

pub use errors::ExecutionError;
pub use session::{ProjectedRow, Session};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteProvider;
pub use transaction::TransactionScope;

/// One open database connection. Failing commands report the SQL they ran.
pub trait Connection {
    /// Runs a statement and returns the affected row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// First column of the first row, `Value::Null` when there is none.
    fn query_scalar(&mut self, sql: &str, params: &[Value]) -> Result<Value>;

    /// Streams every row to `row`; an error from `row` stops the read.
    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        row: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

pub trait ConnectionProvider {
    fn open(&self) -> Result<Box<dyn Connection>>;
}

pub type SaveHook = Box<dyn Fn(&dyn Entity)>;

#[derive(Default)]
struct SaveHooks {
    before: Vec<SaveHook>,
    after: Vec<SaveHook>,
}

pub struct ExecutionContext {
    provider: Box<dyn ConnectionProvider>,
    dialect: Box<dyn Dialect>,
    mapping: Box<dyn MappingPolicy>,
    config: OrmConfig,
    tracker: RefCell<ChangeTracker>,
    hooks: RefCell<SaveHooks>,
}

impl ExecutionContext {
    pub fn new(
        provider: Box<dyn ConnectionProvider>,
        dialect: Box<dyn Dialect>,
        mapping: Box<dyn MappingPolicy>,
        config: OrmConfig,
    ) -> Self {
        ExecutionContext {
            provider,
            dialect,
            mapping,
            config,
            tracker: RefCell::new(ChangeTracker::new()),
            hooks: RefCell::new(SaveHooks::default()),
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn mapping(&self) -> &dyn MappingPolicy {
        self.mapping.as_ref()
    }

    pub fn config(&self) -> &OrmConfig {
        &self.config
    }

    pub fn tracker(&self) -> &RefCell<ChangeTracker> {
        &self.tracker
    }

    pub fn open(&self) -> Result<Box<dyn Connection>> {
        self.provider.open()
    }

    pub fn render(&self, translation: &Translation) -> Result<RenderedSql> {
        self.render_ast(&translation.ast, translation.root)
    }

    pub fn render_ast(&self, ast: &Ast, root: NodeId) -> Result<RenderedSql> {
        let rendered = sql_generator::render(self.dialect(), ast, root)?;
        self.log(&rendered);
        Ok(rendered)
    }

    pub fn log(&self, rendered: &RenderedSql) {
        if self.config.log_sql {
            debug!("SQL: {}", rendered);
        }
    }

    pub fn query(
        &self,
        rendered: &RenderedSql,
        row: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()> {
        let mut connection = self.open()?;
        connection.query(&rendered.sql, &rendered.params, row)
    }

    pub fn query_scalar(&self, rendered: &RenderedSql) -> Result<Value> {
        let mut connection = self.open()?;
        connection.query_scalar(&rendered.sql, &rendered.params)
    }

    pub fn execute(&self, rendered: &RenderedSql) -> Result<u64> {
        let mut connection = self.open()?;
        connection.execute(&rendered.sql, &rendered.params)
    }

    pub fn add_before_save(&self, hook: SaveHook) {
        self.hooks.borrow_mut().before.push(hook);
    }

    pub fn add_after_save(&self, hook: SaveHook) {
        self.hooks.borrow_mut().after.push(hook);
    }

    pub fn before_save(&self, entity: &dyn Entity) {
        for hook in self.hooks.borrow().before.iter() {
            hook(entity);
        }
    }

    pub fn after_save(&self, entity: &dyn Entity) {
        for hook in self.hooks.borrow().after.iter() {
            hook(entity);
        }
    }
}
