//! SQLite connection adapter
//!
//! Implements [`ConnectionProvider`] on rusqlite. Every `open` returns a fresh
//! connection to the configured file with foreign keys enforced; `:memory:`
//! is accepted but each connection then sees its own empty database.

use log::debug;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};

use super::errors::ExecutionError;
use super::{Connection, ConnectionProvider};
use crate::errors::Result;
use crate::model::Value;

#[derive(Debug, Clone)]
pub struct SqliteProvider {
    path: String,
}

impl SqliteProvider {
    pub fn new(path: impl Into<String>) -> Self {
        SqliteProvider { path: path.into() }
    }
}

impl ConnectionProvider for SqliteProvider {
    fn open(&self) -> Result<Box<dyn Connection>> {
        let conn = rusqlite::Connection::open(&self.path)
            .map_err(|e| ExecutionError::Connection(format!("{}: {}", self.path, e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON")
            .map_err(|e| ExecutionError::Connection(e.to_string()))?;
        debug!("opened sqlite connection to {}", self.path);
        Ok(Box::new(SqliteConnection { conn }))
    }
}

pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

/// Borrowed parameter handed to rusqlite.
struct Param<'a>(&'a Value);

impl ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn command_error(sql: &str, e: rusqlite::Error) -> ExecutionError {
    ExecutionError::Command {
        sql: sql.to_string(),
        message: e.to_string(),
    }
}

impl SqliteConnection {
    fn for_each_row(
        &mut self,
        sql: &str,
        params: &[Value],
        row: &mut dyn FnMut(&[Value]) -> Result<bool>,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| command_error(sql, e))?;
        let columns = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(Param)))
            .map_err(|e| command_error(sql, e))?;
        while let Some(current) = rows.next().map_err(|e| command_error(sql, e))? {
            let values = (0..columns)
                .map(|i| current.get_ref(i).map(from_value_ref))
                .collect::<rusqlite::Result<Vec<Value>>>()
                .map_err(|e| command_error(sql, e))?;
            if !row(&values)? {
                break;
            }
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let affected = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(Param)))
            .map_err(|e| command_error(sql, e))?;
        Ok(affected as u64)
    }

    fn query_scalar(&mut self, sql: &str, params: &[Value]) -> Result<Value> {
        let mut first = Value::Null;
        self.for_each_row(sql, params, &mut |values| {
            first = values.first().cloned().unwrap_or(Value::Null);
            Ok(false)
        })?;
        Ok(first)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        row: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()> {
        self.for_each_row(sql, params, &mut |values| {
            row(values)?;
            Ok(true)
        })
    }

    fn begin(&mut self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| ExecutionError::Transaction(e.to_string()).into())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| ExecutionError::Transaction(e.to_string()).into())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| ExecutionError::Transaction(e.to_string()).into())
    }
}
