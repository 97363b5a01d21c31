//! Domain model and recording connection shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::config::OrmConfig;
use crate::errors::Result;
use crate::execution::errors::ExecutionError;
use crate::execution::{Connection, ConnectionProvider, ExecutionContext, Session};
use crate::mapping::ConventionMapping;
use crate::model::{Collection, Reference, Value};
use crate::sql_generator::SqliteDialect;

#[derive(Debug, Clone, Default)]
pub struct Customer {
    pub id: i64,
    pub name: Option<String>,
    pub rating: i32,
    pub address: Option<String>,
    pub orders: Collection<Order>,
    pub display_name: Option<String>,
    pub scratch: String,
}
crate::entity!(Customer {
    id,
    name,
    rating,
    address,
    orders(inverse = customer),
    display_name(computed),
});

crate::ordinal_enum! {
    pub enum OrderStatus { Pending, Shipped, Cancelled }
}

#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: i64,
    pub total: i64,
    pub status: OrderStatus,
    pub note: Option<String>,
    pub customer: Reference<Customer>,
    pub lines: Collection<OrderLine>,
}
crate::entity!(Order {
    id,
    total,
    status,
    note,
    customer,
    lines
});

#[derive(Debug, Clone, Default)]
pub struct OrderLine {
    pub id: i64,
    pub quantity: i32,
    pub product: Reference<Product>,
    pub order: Reference<Order>,
}
crate::entity!(OrderLine {
    id,
    quantity,
    product,
    order
});

#[derive(Debug, Clone, Default)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub tags: Collection<Tag>,
}
crate::entity!(Product {
    id,
    name,
    price,
    tags
});

#[derive(Debug, Clone, Default)]
pub struct Tag {
    pub id: i64,
    pub label: String,
}
crate::entity!(Tag { id, label });

#[derive(Debug, Clone, Default)]
pub struct Unidentified {
    pub code: String,
}
crate::entity!(Unidentified { code });

/// Scripted answer to the next statement.
#[derive(Debug, Clone)]
pub enum Scripted {
    Rows(Vec<Vec<Value>>),
    Scalar(Value),
    Affected(u64),
    Fail(String),
}

/// Shared state of every [`RecordingConnection`] opened from one provider.
#[derive(Debug, Default)]
pub struct Recorder {
    pub statements: RefCell<Vec<(String, Vec<Value>)>>,
    pub transactions: RefCell<Vec<&'static str>>,
    pub opened: Cell<usize>,
    pub closed: Cell<usize>,
    script: RefCell<VecDeque<Scripted>>,
    next_id: Cell<i64>,
}

impl Recorder {
    pub fn new() -> Rc<Self> {
        let recorder = Recorder::default();
        recorder.next_id.set(100);
        Rc::new(recorder)
    }

    pub fn script(&self, answer: Scripted) {
        self.script.borrow_mut().push_back(answer);
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements
            .borrow()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.statements.borrow_mut().clear();
        self.transactions.borrow_mut().clear();
    }

    fn record(&self, sql: &str, params: &[Value]) -> Option<Scripted> {
        self.statements
            .borrow_mut()
            .push((sql.to_string(), params.to_vec()));
        self.script.borrow_mut().pop_front()
    }

    fn fail(sql: &str, message: String) -> crate::errors::OrmError {
        ExecutionError::Command {
            sql: sql.to_string(),
            message,
        }
        .into()
    }
}

pub struct RecordingProvider(pub Rc<Recorder>);

impl ConnectionProvider for RecordingProvider {
    fn open(&self) -> Result<Box<dyn Connection>> {
        self.0.opened.set(self.0.opened.get() + 1);
        Ok(Box::new(RecordingConnection(Rc::clone(&self.0))))
    }
}

pub struct RecordingConnection(Rc<Recorder>);

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        self.0.closed.set(self.0.closed.get() + 1);
    }
}

impl Connection for RecordingConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        match self.0.record(sql, params) {
            Some(Scripted::Affected(n)) => Ok(n),
            Some(Scripted::Fail(message)) => Err(Recorder::fail(sql, message)),
            _ => Ok(1),
        }
    }

    fn query_scalar(&mut self, sql: &str, params: &[Value]) -> Result<Value> {
        match self.0.record(sql, params) {
            Some(Scripted::Scalar(value)) => Ok(value),
            Some(Scripted::Fail(message)) => Err(Recorder::fail(sql, message)),
            // Inserts hand back generated ids
            _ => {
                let id = self.0.next_id.get();
                self.0.next_id.set(id + 1);
                Ok(Value::Int(id))
            }
        }
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        row: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()> {
        match self.0.record(sql, params) {
            Some(Scripted::Rows(rows)) => {
                for values in rows {
                    row(&values)?;
                }
                Ok(())
            }
            Some(Scripted::Fail(message)) => Err(Recorder::fail(sql, message)),
            _ => Ok(()),
        }
    }

    fn begin(&mut self) -> Result<()> {
        self.0.transactions.borrow_mut().push("BEGIN");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.0.transactions.borrow_mut().push("COMMIT");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.0.transactions.borrow_mut().push("ROLLBACK");
        Ok(())
    }
}

/// Context over a recording connection with the sqlite dialect.
pub fn context(recorder: &Rc<Recorder>) -> Rc<ExecutionContext> {
    Rc::new(ExecutionContext::new(
        Box::new(RecordingProvider(Rc::clone(recorder))),
        Box::new(SqliteDialect),
        Box::new(ConventionMapping::new()),
        OrmConfig::default(),
    ))
}

pub fn session(recorder: &Rc<Recorder>) -> Session {
    Session::from_context(context(recorder))
}

pub fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}
