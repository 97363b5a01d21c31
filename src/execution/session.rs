//! Session: the entry point tying queries, execution and persistence together
//!
//! A session owns one shared [`ExecutionContext`]. Queries are translated,
//! rendered and run on a connection opened for the call; entities come back
//! through the materializer, so deferred navigations keep working after the
//! call returns. Persistence goes through [`UnitOfWork`].

use std::rc::Rc;

use log::{debug, info};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use validator::Validate;

use super::{ConnectionProvider, ExecutionContext, TransactionScope};
use crate::ast::AggregateFn;
use crate::config::{ConfigError, OrmConfig};
use crate::errors::Result;
use crate::mapping::{ConventionMapping, MappingPolicy};
use crate::materialize::fetch_entities;
use crate::model::navigation::downcast_entity;
use crate::model::{DataError, Entity, EntityMeta, EntityType, Value, ValueType};
use crate::query::{Expr, Projected, Query, QueryDef, Statement, Var};
use crate::sql_generator::{dialect_for, DdlRenderer, RenderedSql};
use crate::tracking::UnitOfWork;
use crate::translator::{
    translate_aggregate, translate_count, translate_query, translate_statement, ResultShape,
};

/// One row of a projection, addressable by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRow {
    columns: Rc<[String]>,
    values: Vec<Value>,
}

impl ProjectedRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// JSON object keyed by column name, in projection order.
    pub fn to_json(&self) -> JsonValue {
        let mut object = JsonMap::new();
        for (column, value) in self.columns.iter().zip(&self.values) {
            object.insert(column.clone(), json_value(value));
        }
        JsonValue::Object(object)
    }
}

impl Serialize for ProjectedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, &json_value(value))?;
        }
        map.end()
    }
}

fn json_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number),
        Value::Text(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::from(b.clone()),
    }
}

fn count_value(value: Value) -> Result<u64> {
    match value {
        Value::Int(n) if n >= 0 => Ok(n as u64),
        Value::Null => Ok(0),
        other => Err(DataError::TypeMismatch {
            expected: ValueType::Int,
            found: other.to_string(),
        }
        .into()),
    }
}

#[derive(Clone)]
pub struct Session {
    ctx: Rc<ExecutionContext>,
}

impl Session {
    /// Session over `provider` with the dialect `config` names and the
    /// convention mapping.
    pub fn new(provider: Box<dyn ConnectionProvider>, config: OrmConfig) -> Result<Self> {
        Self::with_mapping(provider, config, Box::new(ConventionMapping::new()))
    }

    pub fn with_mapping(
        provider: Box<dyn ConnectionProvider>,
        config: OrmConfig,
        mapping: Box<dyn MappingPolicy>,
    ) -> Result<Self> {
        config.validate().map_err(ConfigError::from)?;
        let dialect = dialect_for(config.dialect);
        info!(
            "session: dialect {}, batch size {}",
            config.dialect, config.batch_size
        );
        Ok(Self::from_context(Rc::new(ExecutionContext::new(
            provider, dialect, mapping, config,
        ))))
    }

    pub fn from_context(ctx: Rc<ExecutionContext>) -> Self {
        Session { ctx }
    }

    /// Session on the built-in SQLite adapter at `config.database_url`.
    #[cfg(feature = "sqlite")]
    pub fn from_config(config: OrmConfig) -> Result<Self> {
        use super::errors::ExecutionError;
        use crate::config::DialectKind;

        if config.dialect != DialectKind::Sqlite {
            return Err(ExecutionError::Connection(format!(
                "no built-in connection provider for {}; use Session::new with a provider",
                config.dialect
            ))
            .into());
        }
        let provider = super::SqliteProvider::new(config.database_url.clone());
        Self::new(Box::new(provider), config)
    }

    /// [`from_config`](Session::from_config) with `RELGRAPH_*` environment variables.
    #[cfg(feature = "sqlite")]
    pub fn from_env() -> Result<Self> {
        Self::from_config(OrmConfig::from_env()?)
    }

    pub fn context(&self) -> &Rc<ExecutionContext> {
        &self.ctx
    }

    pub fn mapping(&self) -> &dyn MappingPolicy {
        self.ctx.mapping()
    }

    pub fn config(&self) -> &OrmConfig {
        self.ctx.config()
    }

    fn fetch<T: EntityType>(&self, def: &QueryDef) -> Result<Vec<T>> {
        let translation = translate_query(self.ctx.mapping(), def)?;
        let entities = fetch_entities(&self.ctx, &translation)?;
        debug!("{} {} materialized", entities.len(), T::entity_meta().name);
        entities
            .into_iter()
            .map(|entity| -> Result<T> { Ok(*downcast_entity::<T>(entity)?) })
            .collect()
    }

    pub fn list<T: EntityType>(&self, query: Query<T>) -> Result<Vec<T>> {
        self.fetch(query.def())
    }

    pub fn first<T: EntityType>(&self, query: Query<T>) -> Result<Option<T>> {
        Ok(self.list(query.take(1))?.into_iter().next())
    }

    pub fn by_id<T: EntityType>(&self, id: impl Into<Value>) -> Result<Option<T>> {
        let meta = T::entity_meta();
        let id_field = self.ctx.mapping().id_field(meta)?;
        let def = QueryDef::by_ids(meta, id_field.name, vec![id.into()]);
        Ok(self.fetch(&def)?.into_iter().next())
    }

    pub fn count<T>(&self, query: &Query<T>) -> Result<u64> {
        let translation = translate_count(self.ctx.mapping(), query.def())?;
        count_value(self.ctx.query_scalar(&self.ctx.render(&translation)?)?)
    }

    /// Number of rows a projection yields.
    pub fn count_rows(&self, projected: &Projected) -> Result<u64> {
        let translation = translate_count(self.ctx.mapping(), projected.def())?;
        count_value(self.ctx.query_scalar(&self.ctx.render(&translation)?)?)
    }

    /// Terminal `func` of `selector` over the query's elements; `Value::Null`
    /// when there are none (except for counts).
    pub fn aggregate<T>(
        &self,
        query: &Query<T>,
        func: AggregateFn,
        selector: impl FnOnce(&Var) -> Expr,
    ) -> Result<Value> {
        let selector = selector(&query.var());
        let translation = translate_aggregate(self.ctx.mapping(), query.def(), func, &selector)?;
        self.ctx.query_scalar(&self.ctx.render(&translation)?)
    }

    pub fn project(&self, projected: Projected) -> Result<Vec<ProjectedRow>> {
        let translation = translate_query(self.ctx.mapping(), projected.def())?;
        let columns: Rc<[String]> = match &translation.shape {
            ResultShape::Rows(columns) => columns.clone().into(),
            _ => Rc::from(Vec::new()),
        };
        let rendered = self.ctx.render(&translation)?;
        let mut rows = Vec::new();
        self.ctx.query(&rendered, &mut |values| {
            rows.push(ProjectedRow {
                columns: Rc::clone(&columns),
                values: values.to_vec(),
            });
            Ok(())
        })?;
        Ok(rows)
    }

    /// Runs an update, delete or insert-select; returns the affected row count.
    pub fn execute(&self, statement: Statement) -> Result<u64> {
        let translation = translate_statement(self.ctx.mapping(), statement.def())?;
        let affected = self.ctx.execute(&self.ctx.render(&translation)?)?;
        debug!("{} rows affected", affected);
        Ok(affected)
    }

    /// SQL the query would run, without running it.
    pub fn render<T>(&self, query: &Query<T>) -> Result<RenderedSql> {
        self.ctx.render(&translate_query(self.ctx.mapping(), query.def())?)
    }

    pub fn render_statement(&self, statement: &Statement) -> Result<RenderedSql> {
        self.ctx
            .render(&translate_statement(self.ctx.mapping(), statement.def())?)
    }

    /// Snapshots `root` and every loaded object reachable from it, so later
    /// saves write only what changed.
    pub fn track(&self, root: &dyn Entity) -> Result<usize> {
        self.ctx.tracker().borrow_mut().track(root, self.ctx.mapping())
    }

    pub fn unit_of_work<'a>(&self) -> UnitOfWork<'a> {
        UnitOfWork::new(Rc::clone(&self.ctx))
    }

    pub fn on_before_save(&self, hook: impl Fn(&dyn Entity) + 'static) {
        self.ctx.add_before_save(Box::new(hook));
    }

    pub fn on_after_save(&self, hook: impl Fn(&dyn Entity) + 'static) {
        self.ctx.add_after_save(Box::new(hook));
    }

    pub fn schema_sql(&self, metas: &[&'static EntityMeta]) -> Result<Vec<String>> {
        DdlRenderer::new(self.ctx.dialect(), self.ctx.mapping()).schema(metas)
    }

    /// Creates every table of `metas` in one transaction.
    pub fn create_schema(&self, metas: &[&'static EntityMeta]) -> Result<()> {
        let statements = self.schema_sql(metas)?;
        let mut connection = self.ctx.open()?;
        let mut scope = TransactionScope::begin(connection.as_mut())?;
        for sql in &statements {
            self.ctx.log(&RenderedSql {
                sql: sql.clone(),
                params: Vec::new(),
            });
            scope.connection().execute(sql, &[])?;
        }
        scope.commit()?;
        info!("created schema with {} statements", statements.len());
        Ok(())
    }
}
