//! Per-backend rendering rules
//!
//! A [`Dialect`] answers the questions the renderer cannot decide from the AST
//! alone: identifier quoting, placeholder syntax, the pagination strategy, how
//! generated ids come back and the DDL column types.

use crate::config::DialectKind;
use crate::model::{Value, ValueType};

/// How placeholders map to the parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholders {
    /// `?1`, `$1`: the number is the encounter position
    Numbered,
    /// `?`: parameters must follow the textual order of the statement
    Positional,
}

/// How `skip`/`take` are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStrategy {
    /// Native `LIMIT ... OFFSET ...`
    LimitOffset,
    /// `DENSE_RANK() OVER (ORDER BY ...)` in a derived table, filtered outside
    DenseRank,
    /// Rank computed as a correlated `COUNT(DISTINCT id)` of preceding rows
    CorrelatedCount,
}

pub trait Dialect: Send + Sync {
    fn kind(&self) -> DialectKind;

    fn quote(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Placeholder for the parameter at 1-based `index`.
    fn placeholder(&self, index: usize) -> String;

    fn placeholders(&self) -> Placeholders {
        Placeholders::Numbered
    }

    /// Strategy for a paginated request; `multiplies` is set when collection
    /// joins repeat rows of one element.
    fn pagination(&self, multiplies: bool) -> PaginationStrategy;

    fn limit_offset(&self, skip: Option<u64>, take: Option<u64>) -> String {
        match (skip, take) {
            (None, None) => String::new(),
            (None, Some(take)) => format!(" LIMIT {}", take),
            (Some(skip), Some(take)) => format!(" LIMIT {} OFFSET {}", take, skip),
            (Some(skip), None) => format!(" LIMIT -1 OFFSET {}", skip),
        }
    }

    fn concat(&self, left: &str, right: &str) -> String {
        format!("({} || {})", left, right)
    }

    /// Cast appended to a parameter in a select list.
    fn select_constant_cast(&self, _value: &Value) -> Option<&'static str> {
        None
    }

    /// Suffix handing back the generated `column` of an insert.
    fn returning(&self, column: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.quote(column)))
    }

    /// Follow-up query reading the last generated id when there is no `RETURNING`.
    fn generated_id_query(&self) -> Option<&'static str> {
        None
    }

    fn empty_insert(&self) -> &'static str {
        "DEFAULT VALUES"
    }

    /// `UPDATE t ... WHERE id IN (SELECT ... FROM t)` must read through a derived table.
    fn wraps_self_subquery(&self) -> bool {
        false
    }

    fn column_type(&self, value_type: ValueType) -> &'static str;

    /// Type of a primary or foreign key column.
    fn key_type(&self, value_type: ValueType) -> &'static str {
        self.column_type(value_type)
    }

    /// Primary key column definition; integer ids are generated by the database.
    fn identity_column(&self, column: &str, value_type: ValueType) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn pagination(&self, multiplies: bool) -> PaginationStrategy {
        if multiplies {
            PaginationStrategy::DenseRank
        } else {
            PaginationStrategy::LimitOffset
        }
    }

    fn column_type(&self, value_type: ValueType) -> &'static str {
        match value_type {
            ValueType::Bool | ValueType::Int => "INTEGER",
            ValueType::Float => "REAL",
            ValueType::Text => "TEXT",
            ValueType::Bytes => "BLOB",
        }
    }

    fn identity_column(&self, column: &str, value_type: ValueType) -> String {
        match value_type {
            ValueType::Int => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", column),
            other => format!("{} {} PRIMARY KEY", column, self.key_type(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn pagination(&self, _multiplies: bool) -> PaginationStrategy {
        PaginationStrategy::DenseRank
    }

    fn select_constant_cast(&self, value: &Value) -> Option<&'static str> {
        value.value_type().map(|t| match t {
            ValueType::Bool => "::boolean",
            ValueType::Int => "::bigint",
            ValueType::Float => "::double precision",
            ValueType::Text => "::text",
            ValueType::Bytes => "::bytea",
        })
    }

    fn column_type(&self, value_type: ValueType) -> &'static str {
        match value_type {
            ValueType::Bool => "BOOLEAN",
            ValueType::Int => "BIGINT",
            ValueType::Float => "DOUBLE PRECISION",
            ValueType::Text => "TEXT",
            ValueType::Bytes => "BYTEA",
        }
    }

    fn identity_column(&self, column: &str, value_type: ValueType) -> String {
        match value_type {
            ValueType::Int => format!("{} BIGSERIAL PRIMARY KEY", column),
            other => format!("{} {} PRIMARY KEY", column, self.key_type(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn quote(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn placeholders(&self) -> Placeholders {
        Placeholders::Positional
    }

    fn pagination(&self, _multiplies: bool) -> PaginationStrategy {
        PaginationStrategy::CorrelatedCount
    }

    fn concat(&self, left: &str, right: &str) -> String {
        format!("CONCAT({}, {})", left, right)
    }

    fn returning(&self, _column: &str) -> Option<String> {
        None
    }

    fn generated_id_query(&self) -> Option<&'static str> {
        Some("SELECT LAST_INSERT_ID()")
    }

    fn empty_insert(&self) -> &'static str {
        "() VALUES ()"
    }

    fn wraps_self_subquery(&self) -> bool {
        true
    }

    fn column_type(&self, value_type: ValueType) -> &'static str {
        match value_type {
            ValueType::Bool => "BOOLEAN",
            ValueType::Int => "BIGINT",
            ValueType::Float => "DOUBLE",
            ValueType::Text => "TEXT",
            ValueType::Bytes => "LONGBLOB",
        }
    }

    // TEXT cannot be indexed without a prefix length
    fn key_type(&self, value_type: ValueType) -> &'static str {
        match value_type {
            ValueType::Text => "VARCHAR(255)",
            other => self.column_type(other),
        }
    }

    fn identity_column(&self, column: &str, value_type: ValueType) -> String {
        match value_type {
            ValueType::Int => format!("{} BIGINT AUTO_INCREMENT PRIMARY KEY", column),
            other => format!("{} {} PRIMARY KEY", column, self.key_type(other)),
        }
    }
}

pub fn dialect_for(kind: DialectKind) -> Box<dyn Dialect> {
    match kind {
        DialectKind::Sqlite => Box::new(SqliteDialect),
        DialectKind::Postgres => Box::new(PostgresDialect),
        DialectKind::Mysql => Box::new(MySqlDialect),
    }
}
