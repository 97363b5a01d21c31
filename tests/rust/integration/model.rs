//! Shared domain model and database fixtures

use std::cell::Cell;
use std::rc::Rc;

use relgraph::config::OrmConfig;
use relgraph::execution::{Connection, ConnectionProvider, SqliteProvider};
use relgraph::model::EntityType;
use relgraph::{Collection, Reference, Result, Session, Value};
use tempfile::TempDir;

#[derive(Debug, Clone, Default)]
pub struct Customer {
    pub id: i64,
    pub name: Option<String>,
    pub rating: i32,
    pub orders: Collection<Order>,
}
relgraph::entity!(Customer {
    id,
    name,
    rating,
    orders(inverse = customer),
});

relgraph::ordinal_enum! {
    pub enum OrderStatus { Pending, Shipped, Cancelled }
}

#[derive(Debug, Clone, Default)]
pub struct Order {
    pub id: i64,
    pub total: i64,
    pub status: OrderStatus,
    pub customer: Reference<Customer>,
    pub lines: Collection<OrderLine>,
}
relgraph::entity!(Order {
    id,
    total,
    status,
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
relgraph::entity!(OrderLine {
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
}
relgraph::entity!(Product { id, name, price });

/// Counts statements run through every connection it opens.
pub struct CountingProvider {
    inner: SqliteProvider,
    pub statements: Rc<Cell<usize>>,
}

struct CountingConnection {
    inner: Box<dyn Connection>,
    statements: Rc<Cell<usize>>,
}

impl CountingConnection {
    fn count(&self) {
        self.statements.set(self.statements.get() + 1);
    }
}

impl ConnectionProvider for CountingProvider {
    fn open(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(CountingConnection {
            inner: self.inner.open()?,
            statements: Rc::clone(&self.statements),
        }))
    }
}

impl Connection for CountingConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.count();
        self.inner.execute(sql, params)
    }

    fn query_scalar(&mut self, sql: &str, params: &[Value]) -> Result<Value> {
        self.count();
        self.inner.query_scalar(sql, params)
    }

    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
        row: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()> {
        self.count();
        self.inner.query(sql, params, row)
    }

    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner.rollback()
    }
}

/// Temporary database with the schema created; keep the directory alive
/// for as long as the session is used.
pub struct TestDb {
    _dir: TempDir,
    pub session: Session,
    pub statements: Rc<Cell<usize>>,
}

impl TestDb {
    pub fn new() -> Self {
        Self::with_config(OrmConfig::default())
    }

    pub fn with_config(mut config: OrmConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().expect("temp dir");
        config.database_url = dir.path().join("test.db").to_string_lossy().into_owned();
        let statements = Rc::new(Cell::new(0));
        let provider = CountingProvider {
            inner: SqliteProvider::new(config.database_url.clone()),
            statements: Rc::clone(&statements),
        };
        let session = Session::new(Box::new(provider), config).expect("session");
        session
            .create_schema(&[
                Customer::entity_meta(),
                Order::entity_meta(),
                OrderLine::entity_meta(),
                Product::entity_meta(),
            ])
            .expect("schema");
        statements.set(0);
        TestDb {
            _dir: dir,
            session,
            statements,
        }
    }

    /// Statements run since the last call.
    pub fn take_statements(&self) -> usize {
        self.statements.replace(0)
    }

    /// Customers A..E with ratings 1..5; A has two orders, B one.
    pub fn seed(&self) -> Vec<Customer> {
        let mut customers: Vec<Customer> = ["A", "B", "C", "D", "E"]
            .iter()
            .enumerate()
            .map(|(i, name)| Customer {
                name: Some(name.to_string()),
                rating: i as i32 + 1,
                ..Default::default()
            })
            .collect();
        customers[0].orders = Collection::new(vec![
            order(10, vec![line(1), line(2)]),
            order(20, vec![line(3)]),
        ]);
        customers[1].orders = Collection::new(vec![order(30, Vec::new())]);
        {
            let mut uow = self.session.unit_of_work();
            for customer in customers.iter_mut() {
                uow.save(customer);
            }
            uow.commit().expect("seed commit");
        }
        self.take_statements();
        customers
    }
}

pub fn order(total: i64, lines: Vec<OrderLine>) -> Order {
    Order {
        total,
        lines: Collection::new(lines),
        ..Default::default()
    }
}

pub fn line(quantity: i32) -> OrderLine {
    OrderLine {
        quantity,
        ..Default::default()
    }
}
