//! Turns engine requests and transactions into awaitable `Result`s.

use crate::ports::{Database, ObjectStore, Request, Transaction, TransactionMode, TransactionSignal};
use shared::{EngineFault, Error, Result};
use std::fmt::Debug;
use std::sync::Arc;

/// Awaits a request's single settlement.
pub async fn get_response<T>(request: Request<T>) -> Result<T> {
    match request.receiver.await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(fault)) => Err(Error::Request(fault)),
        Err(_) => Err(Error::Request(EngineFault::abort(
            "The request was dropped before it settled.",
        ))),
    }
}

/// Opens a transaction scoped to `store` and hands back its store at once.
/// A failure of the transaction after this returns fails every request
/// issued through the handle.
pub fn get_store(db: &dyn Database, store: &str, mode: TransactionMode) -> Result<StoreHandle> {
    let transaction = db.transaction(store, mode).map_err(Error::Transaction)?;
    let object_store = transaction
        .object_store(store)
        .map_err(Error::Transaction)?;
    let signal = transaction.signal();

    Ok(StoreHandle {
        store: object_store,
        signal,
        _transaction: transaction,
    })
}

pub struct StoreHandle {
    store: Arc<dyn ObjectStore>,
    signal: TransactionSignal,
    _transaction: Box<dyn Transaction>,
}

impl StoreHandle {
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.issue(self.store.get(key)).await
    }

    pub async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<Vec<u8>> {
        self.issue(self.store.put(key, value)).await
    }

    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        self.issue(self.store.delete(key)).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.issue(self.store.clear()).await
    }

    pub async fn get_all_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.issue(self.store.get_all_keys()).await
    }

    async fn issue<T>(&self, request: Request<T>) -> Result<T> {
        tokio::select! {
            biased;
            fault = self.signal.clone().failed() => Err(Error::Transaction(fault)),
            result = get_response(request) => result,
        }
    }
}

impl Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("mode", &self._transaction.mode())
            .field("fault", &self.signal.fault())
            .finish()
    }
}
