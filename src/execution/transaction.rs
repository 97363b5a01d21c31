//! Transaction scope guard

use log::{debug, warn};

use super::Connection;
use crate::errors::Result;

/// Open transaction on a borrowed connection. Dropping the scope without
/// [`commit`](TransactionScope::commit) rolls the transaction back.
pub struct TransactionScope<'c> {
    connection: &'c mut dyn Connection,
    finished: bool,
}

impl<'c> TransactionScope<'c> {
    pub fn begin(connection: &'c mut dyn Connection) -> Result<Self> {
        connection.begin()?;
        debug!("transaction started");
        Ok(TransactionScope {
            connection,
            finished: false,
        })
    }

    pub fn connection(&mut self) -> &mut dyn Connection {
        &mut *self.connection
    }

    pub fn commit(mut self) -> Result<()> {
        self.connection.commit()?;
        self.finished = true;
        debug!("transaction committed");
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.connection.rollback()
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.connection.rollback() {
            Ok(()) => debug!("transaction rolled back"),
            Err(e) => warn!("rollback failed: {}", e),
        }
    }
}
