//! Explicit transactions.
//!
//! A transaction holds the engine's single-writer lock for its lifetime.
//! Collection operations issued from the owning thread join it and their
//! page mutations accumulate in the shared pre-image capture; `commit`
//! runs the journal protocol once for all of them. A transaction dropped
//! without an explicit commit rolls back.

use crate::cancel::CancelToken;
use crate::engine::EngineInner;
use crate::error::{Error, Result};
use parking_lot::RwLockWriteGuard;
use std::thread;

/// An explicit write transaction
pub struct Transaction<'a> {
    inner: &'a EngineInner,
    guard: Option<RwLockWriteGuard<'a, ()>>,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub(crate) fn begin(inner: &'a EngineInner) -> Result<Self> {
        inner.check_open()?;
        let guard = inner
            .txn
            .try_write_for(inner.timeout())
            .ok_or(Error::LockTimeout("engine"))?;
        inner.set_active_txn(Some(thread::current().id()));
        inner.pool().begin_capture();
        Ok(Self {
            inner,
            guard: Some(guard),
            finished: false,
        })
    }

    /// Make every change of this transaction durable
    pub fn commit(self) -> Result<()> {
        self.commit_with(&CancelToken::new())
    }

    /// `commit` with a cancellation token; cancellation is honored until
    /// the journal sync, after which the commit completes
    pub fn commit_with(mut self, token: &CancelToken) -> Result<()> {
        self.finished = true;
        self.inner.set_active_txn(None);
        let result = self.inner.commit_capture(token);
        self.guard.take();
        result
    }

    /// Revert every page this transaction touched
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.inner.set_active_txn(None);
        let result = self.inner.pool().rollback_capture();
        let _ = self.inner.reload_catalog();
        self.guard.take();
        result
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.set_active_txn(None);
            let _ = self.inner.pool().rollback_capture();
            let _ = self.inner.reload_catalog();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::engine::{Engine, EngineOptions};
    use crate::value::Value;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> Engine {
        Engine::open(dir.path().join("txn.db"), EngineOptions::default()).unwrap()
    }

    #[test]
    fn test_commit_makes_writes_visible() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = open(&dir);
        let people = engine.collection("people")?;

        let txn = engine.begin_transaction()?;
        let a = people.insert(Document::new().with("n", 1))?;
        let b = people.insert(Document::new().with("n", 2))?;
        txn.commit()?;

        assert!(people.get(&a)?.is_some());
        assert!(people.get(&b)?.is_some());
        assert_eq!(people.count()?, 2);
        Ok(())
    }

    #[test]
    fn test_rollback_reverts_everything() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = open(&dir);
        let people = engine.collection("people")?;
        let kept = people.insert(Document::new().with("n", 0))?;

        let txn = engine.begin_transaction()?;
        let gone = people.insert(Document::new().with("n", 1))?;
        people.delete(&kept)?;
        txn.rollback()?;

        assert!(people.get(&kept)?.is_some());
        assert!(people.get(&gone)?.is_none());
        assert_eq!(people.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_drop_without_commit_rolls_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = open(&dir);
        let people = engine.collection("people")?;

        {
            let _txn = engine.begin_transaction()?;
            people.insert(Document::new().with("n", 1))?;
        }
        assert_eq!(people.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_reads_inside_transaction_see_own_writes() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = open(&dir);
        let people = engine.collection("people")?;

        let txn = engine.begin_transaction()?;
        let id = people.insert(Document::new().with("n", 7))?;
        let seen = people.get(&id)?.expect("own write visible");
        assert_eq!(seen.get("n"), Some(&Value::Int32(7)));
        txn.commit()?;
        Ok(())
    }

    #[test]
    fn test_cancelled_commit_rolls_back() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = open(&dir);
        let people = engine.collection("people")?;

        let txn = engine.begin_transaction()?;
        people.insert(Document::new().with("n", 1))?;
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(txn.commit_with(&token), Err(Error::Cancelled)));
        assert_eq!(people.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_writers_block_each_other() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(
            dir.path().join("txn.db"),
            EngineOptions::default().lock_timeout_ms(50),
        )?;
        engine.collection("people")?;

        let _txn = engine.begin_transaction()?;
        let other = engine.clone();
        let handle = std::thread::spawn(move || {
            let people = other.collection("people");
            match people {
                // the collection read is fine, a write must time out
                Ok(c) => c.insert(Document::new().with("n", 1)),
                Err(e) => Err(e),
            }
        });
        let result = handle.join().expect("thread");
        assert!(matches!(result, Err(Error::LockTimeout(_))));
        Ok(())
    }
}
