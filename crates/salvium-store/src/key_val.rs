//! Multipurpose persistent key-value store.
//!
//! Values are encoded by the store's [`Codec`], hex-encoded, and kept in a
//! single `key_val_store` table. Writes are upserts.
//!
//! [`set_object`](KeyValStore::set_object) commits on its own. To write a
//! value as part of a larger unit of work, use
//! [`set_object_in`](KeyValStore::set_object_in) with the caller's
//! [`Transaction`].

use crate::codec::Codec;
use crate::coordinator::{Coordinator, DbHandle, Transaction};
use crate::error::{Result, StoreError};
use log::debug;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

// The `name` index duplicates the primary key. Existing wallet databases
// carry it, so it is kept under the same name.
const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS key_val_store (
  key   TEXT PRIMARY KEY,
  value TEXT
);
CREATE INDEX IF NOT EXISTS name ON key_val_store(key);
";

pub struct KeyValStore<C: Codec> {
    coordinator: Arc<Coordinator>,
    db_name: String,
    codec: C,
}

impl<C: Codec> KeyValStore<C> {
    /// Prepare `db_name` for key-value storage and return the store.
    ///
    /// Switches the handle to WAL journaling with full synchronous flushes.
    pub async fn create(coordinator: Arc<Coordinator>, db_name: &str, codec: C) -> Result<Self> {
        coordinator
            .run_exclusive(db_name, |c| {
                c.execute_batch("PRAGMA journal_mode = WAL;")?;
                c.execute_batch("PRAGMA synchronous = FULL;")?;
                c.execute_batch(SCHEMA_DDL)?;
                Ok(())
            })
            .await?;
        debug!("key_val_store ready on '{}'", db_name);
        Ok(Self {
            coordinator,
            db_name: db_name.to_string(),
            codec,
        })
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    fn handle(&self) -> Result<&DbHandle> {
        self.coordinator.handle(&self.db_name)
    }

    fn check_tx(&self, tx: &Transaction<'_>) -> Result<()> {
        if tx.belongs_to(&self.coordinator) {
            Ok(())
        } else {
            Err(StoreError::ForeignTransaction)
        }
    }

    /// Look up `key`. A missing key is `Ok(None)`.
    pub fn get_object(&self, key: &str) -> Result<Option<C::Item>> {
        let value: Option<String> = self.handle()?.with_reader(|c| {
            Ok(c
                .query_row(
                    "SELECT value FROM key_val_store WHERE key = ?1",
                    params![key],
                    |r| r.get(0),
                )
                .optional()?)
        })?;

        match value {
            None => Ok(None),
            Some(hex_value) => {
                let bytes = hex::decode(hex_value)?;
                Ok(Some(self.codec.decode(&bytes)?))
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> Result<bool> {
        self.handle()?.with_reader(|c| {
            let n: i64 = c.query_row(
                "SELECT COUNT(*) FROM key_val_store WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn len(&self) -> Result<usize> {
        self.handle()?.with_reader(|c| {
            let n: i64 = c.query_row("SELECT COUNT(*) FROM key_val_store", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Upsert `obj` under `key` and commit, holding the coordinator lock
    /// for the whole write.
    pub async fn set_object(&self, key: &str, obj: &C::Item) -> Result<()> {
        let value = hex::encode(self.codec.encode(obj)?);
        let mut tx = self.coordinator.begin_transaction(&self.db_name).await?;
        upsert(&mut tx, &self.db_name, key, &value)?;
        tx.commit()
    }

    /// Upsert `obj` under `key` inside the caller's transaction.
    /// Nothing is committed until the caller commits `tx`.
    pub fn set_object_in(&self, tx: &mut Transaction<'_>, key: &str, obj: &C::Item) -> Result<()> {
        self.check_tx(tx)?;
        let value = hex::encode(self.codec.encode(obj)?);
        upsert(tx, &self.db_name, key, &value)
    }

    /// Delete every row and commit.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.coordinator.begin_transaction(&self.db_name).await?;
        tx.execute(&self.db_name, |c| {
            c.execute("DELETE FROM key_val_store", [])?;
            Ok(())
        })?;
        tx.commit()
    }
}

fn upsert(tx: &mut Transaction<'_>, db_name: &str, key: &str, value: &str) -> Result<()> {
    tx.execute(db_name, |c| {
        c.execute(
            "INSERT OR REPLACE INTO key_val_store (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, RawCodec};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Checkpoint {
        height: u64,
        hash: String,
    }

    async fn store() -> KeyValStore<JsonCodec<Checkpoint>> {
        let coord = Arc::new(Coordinator::open_temporary(&["wallet"]).unwrap());
        KeyValStore::create(coord, "wallet", JsonCodec::new()).await.unwrap()
    }

    #[tokio::test]
    async fn test_set_get() {
        let kv = store().await;
        let cp = Checkpoint { height: 1000, hash: "ab".repeat(32) };
        kv.set_object("checkpoint", &cp).await.unwrap();
        assert_eq!(kv.get_object("checkpoint").unwrap(), Some(cp));
        assert!(kv.contains_key("checkpoint").unwrap());
    }

    #[tokio::test]
    async fn test_missing_key() {
        let kv = store().await;
        assert_eq!(kv.get_object("nothing").unwrap(), None);
        assert!(!kv.contains_key("nothing").unwrap());
        assert!(kv.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_overwrite() {
        let kv = store().await;
        kv.set_object("k", &Checkpoint { height: 1, hash: "a".into() }).await.unwrap();
        kv.set_object("k", &Checkpoint { height: 2, hash: "b".into() }).await.unwrap();
        assert_eq!(kv.get_object("k").unwrap().unwrap().height, 2);
        assert_eq!(kv.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_value_stored_as_hex() {
        let coord = Arc::new(Coordinator::open_temporary(&["wallet"]).unwrap());
        let kv = KeyValStore::create(coord.clone(), "wallet", RawCodec).await.unwrap();
        kv.set_object("raw", &vec![0x01, 0xff]).await.unwrap();
        let stored: String = coord
            .handle("wallet")
            .unwrap()
            .with_reader(|c| {
                Ok(c.query_row("SELECT value FROM key_val_store WHERE key = 'raw'", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(stored, "01ff");
    }

    #[tokio::test]
    async fn test_corrupt_hex_is_error() {
        let coord = Arc::new(Coordinator::open_temporary(&["wallet"]).unwrap());
        let kv = KeyValStore::create(coord.clone(), "wallet", RawCodec).await.unwrap();
        coord
            .handle("wallet")
            .unwrap()
            .with_writer(|c| {
                c.execute("INSERT INTO key_val_store VALUES ('bad', 'zz')", [])?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(kv.get_object("bad"), Err(StoreError::Hex(_))));
    }

    #[tokio::test]
    async fn test_clear() {
        let kv = store().await;
        kv.set_object("a", &Checkpoint { height: 1, hash: "a".into() }).await.unwrap();
        kv.set_object("b", &Checkpoint { height: 2, hash: "b".into() }).await.unwrap();
        kv.clear().await.unwrap();
        assert!(kv.is_empty().unwrap());
        assert_eq!(kv.get_object("a").unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_in_transaction_rolled_back() {
        let kv = store().await;
        let mut tx = kv.coordinator().begin_transaction("wallet").await.unwrap();
        kv.set_object_in(&mut tx, "k", &Checkpoint { height: 9, hash: "x".into() }).unwrap();
        tx.rollback().unwrap();
        assert_eq!(kv.get_object("k").unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_during_open_transaction_sees_committed_value() {
        let kv = store().await;
        let before = Checkpoint { height: 1, hash: "a".into() };
        let after = Checkpoint { height: 2, hash: "b".into() };
        kv.set_object("k", &before).await.unwrap();

        let mut tx = kv.coordinator().begin_transaction("wallet").await.unwrap();
        kv.set_object_in(&mut tx, "k", &after).unwrap();
        kv.set_object_in(&mut tx, "fresh", &after).unwrap();
        assert_eq!(kv.get_object("k").unwrap(), Some(before));
        assert!(!kv.contains_key("fresh").unwrap());

        tx.commit().unwrap();
        assert_eq!(kv.get_object("k").unwrap(), Some(after));
        assert!(kv.contains_key("fresh").unwrap());
    }

    #[tokio::test]
    async fn test_foreign_transaction_rejected() {
        let kv = store().await;
        let other = Coordinator::open_temporary(&["wallet"]).unwrap();
        let mut tx = other.begin_transaction("wallet").await.unwrap();
        let cp = Checkpoint { height: 1, hash: "a".into() };
        assert!(matches!(
            kv.set_object_in(&mut tx, "k", &cp),
            Err(StoreError::ForeignTransaction)
        ));
        tx.rollback().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let coord = Arc::new(Coordinator::open_temporary(&["wallet"]).unwrap());
        let res = KeyValStore::create(coord, "missing", RawCodec).await;
        assert!(matches!(res, Err(StoreError::DatabaseNotFound(_))));
    }
}
