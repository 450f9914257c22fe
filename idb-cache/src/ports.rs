#![deny(clippy::all)]

use async_trait::async_trait;
use shared::EngineFault;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

// Ports are the pluggable extension points for underlying storage engines

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// Connections were still open; the engine deletes once the last one closes.
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u32,
}

/// Runs once during an open that raises the schema version, while the engine
/// holds its schema lock; it must not close connections of the same engine.
pub type UpgradeCallback =
    Box<dyn FnOnce(&mut dyn VersionChange) -> Result<(), EngineFault> + Send>;

/// Port for an asynchronous, transactional, versioned key-value engine
#[async_trait]
pub trait StorageEngine: Send + Sync + 'static {
    /// Open `name` at `version`, invoking `upgrade` first when `version` is
    /// above the stored version or the database does not exist yet.
    /// An upgrade error aborts the open and leaves the stored schema untouched.
    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeCallback,
    ) -> Result<Arc<dyn Database>, EngineFault>;

    async fn delete_database(&self, name: &str) -> Result<DeleteOutcome, EngineFault>;

    async fn databases(&self) -> Result<Vec<DatabaseInfo>, EngineFault>;
}

/// Schema access handed to an upgrade callback
pub trait VersionChange {
    /// 0 when the database is being created.
    fn old_version(&self) -> u32;
    fn new_version(&self) -> u32;
    fn store_names(&self) -> Vec<String>;
    fn create_store(&mut self, name: &str) -> Result<(), EngineFault>;
}

/// An open connection to one database
pub trait Database: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn version(&self) -> u32;
    fn store_names(&self) -> Vec<String>;
    fn transaction(
        &self,
        store: &str,
        mode: TransactionMode,
    ) -> Result<Box<dyn Transaction>, EngineFault>;
    /// Idempotent.
    fn close(&self);
}

pub trait Transaction: Send + Sync {
    fn mode(&self) -> TransactionMode;
    fn object_store(&self, name: &str) -> Result<Arc<dyn ObjectStore>, EngineFault>;
    /// Reports a failure of the transaction as a whole.
    fn signal(&self) -> TransactionSignal;
}

/// Requests are issued synchronously and settle later.
pub trait ObjectStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Request<Option<Vec<u8>>>;
    /// Settles with the written key.
    fn put(&self, key: &[u8], value: Vec<u8>) -> Request<Vec<u8>>;
    fn delete(&self, key: &[u8]) -> Request<()>;
    fn clear(&self) -> Request<()>;
    /// Keys in ascending byte order.
    fn get_all_keys(&self) -> Request<Vec<Vec<u8>>>;
}

/// The caller's side of a single-shot engine request.
#[derive(Debug)]
pub struct Request<T> {
    pub(crate) receiver: oneshot::Receiver<Result<T, EngineFault>>,
}

/// The engine's side of a request. Settling consumes it, so a request settles once.
#[derive(Debug)]
pub struct Responder<T> {
    sender: oneshot::Sender<Result<T, EngineFault>>,
}

impl<T> Request<T> {
    pub fn pending() -> (Responder<T>, Request<T>) {
        let (sender, receiver) = oneshot::channel();
        (Responder { sender }, Request { receiver })
    }

    pub fn settled(result: Result<T, EngineFault>) -> Self {
        let (responder, request) = Self::pending();
        responder.settle(result);
        request
    }
}

impl<T> Responder<T> {
    pub fn settle(self, result: Result<T, EngineFault>) {
        // nobody left to tell if the request was dropped
        let _ = self.sender.send(result);
    }

    pub fn succeed(self, value: T) {
        self.settle(Ok(value));
    }

    pub fn fail(self, fault: EngineFault) {
        self.settle(Err(fault));
    }
}

/// Failure channel of a transaction. Once a fault is published it stays published.
#[derive(Clone, Debug)]
pub struct TransactionSignal {
    receiver: watch::Receiver<Option<EngineFault>>,
}

impl TransactionSignal {
    pub fn new(receiver: watch::Receiver<Option<EngineFault>>) -> Self {
        Self { receiver }
    }

    pub fn channel() -> (watch::Sender<Option<EngineFault>>, TransactionSignal) {
        let (sender, receiver) = watch::channel(None);
        (sender, Self::new(receiver))
    }

    pub fn fault(&self) -> Option<EngineFault> {
        self.receiver.borrow().clone()
    }

    /// Completes with the fault once one is published; pends forever if the
    /// sender goes away without publishing.
    pub async fn failed(mut self) -> EngineFault {
        let fault = match self.receiver.wait_for(Option::is_some).await {
            Ok(current) => current.clone(),
            Err(_) => None,
        };
        match fault {
            Some(fault) => fault,
            None => std::future::pending().await,
        }
    }
}
