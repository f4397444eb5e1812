//! Transaction boundary shared by scheduling operations.
//!
//! A [`Transaction`] bundles an open store transaction with a
//! rollback-only flag and a list of after-commit hooks. Hooks run only
//! once the commit has succeeded, which is what lets the scheduler arm
//! executor triggers transactionally: a rollback leaves no persisted job
//! and no armed trigger.

use crate::error::StoreError;
use crate::repository::{JobStore, JobStoreTx};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type AfterCommitFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type AfterCommitHook = Box<dyn FnOnce() -> AfterCommitFuture + Send>;

/// One open transaction plus its deferred side effects.
pub struct Transaction {
    tx: Box<dyn JobStoreTx>,
    rollback_only: bool,
    after_commit: Vec<AfterCommitHook>,
}

impl Transaction {
    /// Gives access to the store operations of this transaction.
    pub fn store(&mut self) -> &mut dyn JobStoreTx {
        &mut *self.tx
    }

    /// Marks the transaction so [`Transaction::complete`] rolls back.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Returns whether the transaction will roll back on completion.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Defers a side effect until after a successful commit.
    ///
    /// Hooks are dropped unrun on rollback.
    pub fn on_commit<F, Fut>(&mut self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.after_commit.push(Box::new(move || Box::pin(hook())));
    }

    /// Ends the transaction: commits and runs the after-commit hooks, or
    /// rolls back when the rollback-only flag is set.
    ///
    /// # Errors
    ///
    /// Propagates the store's commit or rollback failure. Hooks do not run
    /// when the commit fails.
    pub async fn complete(self) -> Result<(), StoreError> {
        if self.rollback_only {
            return self.tx.rollback().await;
        }

        self.tx.commit().await?;
        for hook in self.after_commit {
            hook().await;
        }
        Ok(())
    }

    /// Ends the transaction by discarding its writes.
    ///
    /// # Errors
    ///
    /// Propagates the store's rollback failure.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await
    }
}

/// Hands out transactions over a shared store.
#[derive(Clone)]
pub struct TransactionService {
    store: Arc<dyn JobStore>,
}

impl TransactionService {
    /// Creates a transaction service over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Opens a new transaction.
    ///
    /// # Errors
    ///
    /// Propagates the store's failure to begin a transaction.
    pub async fn begin(&self) -> Result<Transaction, StoreError> {
        let tx = self.store.begin().await?;
        Ok(Transaction {
            tx,
            rollback_only: false,
            after_commit: Vec::new(),
        })
    }

    /// Runs a closure inside a transaction, committing on success and
    /// rolling back on error.
    ///
    /// # Errors
    ///
    /// Returns the closure's error after rolling back, or the store's
    /// commit failure.
    pub async fn in_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<StoreError>,
        F: for<'a> FnOnce(
            &'a mut Transaction,
        ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>,
    {
        let mut txn = self.begin().await.map_err(E::from)?;
        match f(&mut txn).await {
            Ok(value) => {
                txn.complete().await.map_err(E::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback failed after aborted transaction");
                }
                Err(e)
            }
        }
    }
}
