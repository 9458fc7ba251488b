//! Durable queue of wallet actions.
//!
//! Wallets that wait on something outside the process (a swap counterparty,
//! a rate-limit window, an authorized payee) record the pending side-effect
//! here first. An action starts pending and is marked done once its callback
//! has run; done actions are never reopened.
//!
//! Writes either own their transaction ([`ActionQueueStore::create_action`],
//! [`ActionQueueStore::action_done`]) or join one the caller already holds
//! (the `_in` variants), which is how an action is recorded atomically with
//! other wallet state.

use crate::coordinator::{Coordinator, DbHandle, Transaction};
use crate::error::{Result, StoreError};
use crate::wallet_type::WalletType;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ─── Schema DDL ─────────────────────────────────────────────────────────────

const SCHEMA_DDL: &str = "
CREATE TABLE IF NOT EXISTS action_queue (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  name            TEXT,
  wallet_id       INT,
  wallet_type     INT,
  wallet_callback TEXT,
  done            INT,
  data            TEXT
);
CREATE INDEX IF NOT EXISTS idx_action_queue_name ON action_queue(name);
CREATE INDEX IF NOT EXISTS idx_action_queue_wallet_id ON action_queue(wallet_id);
CREATE INDEX IF NOT EXISTS idx_action_queue_wallet_type ON action_queue(wallet_type);
";

const SELECT_COLUMNS: &str =
    "SELECT id, name, wallet_id, wallet_type, wallet_callback, done, data FROM action_queue";

// ─── Data Models ────────────────────────────────────────────────────────────

/// A persisted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAction {
    pub id: i64,
    pub name: String,
    pub wallet_id: u32,
    pub wallet_type: WalletType,
    pub wallet_callback: String,
    pub done: bool,
    /// Opaque payload, conventionally a JSON object.
    pub data: String,
}

impl WalletAction {
    /// Member `key` of `data` when `data` is a JSON object.
    pub fn data_item(&self, key: &str) -> Option<serde_json::Value> {
        let value: serde_json::Value = serde_json::from_str(&self.data).ok()?;
        value.get(key).cloned()
    }
}

/// The caller-supplied part of an action, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAction {
    pub name: String,
    pub wallet_id: u32,
    pub wallet_type: WalletType,
    pub wallet_callback: String,
    pub done: bool,
    pub data: String,
}

impl NewAction {
    pub fn pending(
        name: &str,
        wallet_id: u32,
        wallet_type: WalletType,
        wallet_callback: &str,
        data: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            wallet_id,
            wallet_type,
            wallet_callback: wallet_callback.to_string(),
            done: false,
            data: data.to_string(),
        }
    }
}

/// Column values exactly as read back from the table.
struct ActionRow {
    id: i64,
    name: String,
    wallet_id: i64,
    wallet_type: i64,
    wallet_callback: String,
    done: i64,
    data: String,
}

impl TryFrom<ActionRow> for WalletAction {
    type Error = StoreError;

    fn try_from(row: ActionRow) -> Result<Self> {
        Ok(WalletAction {
            id: row.id,
            name: row.name,
            wallet_id: u32::try_from(row.wallet_id)
                .map_err(|_| StoreError::InvalidWalletId(row.wallet_id))?,
            wallet_type: WalletType::try_from(row.wallet_type)?,
            wallet_callback: row.wallet_callback,
            done: row.done != 0,
            data: row.data,
        })
    }
}

fn read_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ActionRow> {
    Ok(ActionRow {
        id: r.get(0)?,
        name: r.get::<_, Option<String>>(1)?.unwrap_or_default(),
        wallet_id: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
        wallet_type: r.get::<_, Option<i64>>(3)?.unwrap_or(0),
        wallet_callback: r.get::<_, Option<String>>(4)?.unwrap_or_default(),
        done: r.get::<_, Option<i64>>(5)?.unwrap_or(0),
        data: r.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

fn select_by_id(c: &Connection, id: i64) -> Result<Option<WalletAction>> {
    let row = c
        .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], read_row)
        .optional()?;
    row.map(WalletAction::try_from).transpose()
}

fn select_many(c: &Connection, sql: &str, args: impl rusqlite::Params) -> Result<Vec<WalletAction>> {
    let mut stmt = c.prepare(sql)?;
    let rows = stmt.query_map(args, read_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(WalletAction::try_from(row?)?);
    }
    Ok(result)
}

fn insert(c: &Connection, action: &NewAction) -> Result<i64> {
    c.execute(
        "INSERT INTO action_queue (id, name, wallet_id, wallet_type, wallet_callback, done, data)
         VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            action.name,
            action.wallet_id as i64,
            action.wallet_type.as_i64(),
            action.wallet_callback,
            action.done as i64,
            action.data,
        ],
    )?;
    Ok(c.last_insert_rowid())
}

/// Read-modify-write of the whole row with `done = 1`.
fn mark_done(c: &Connection, action_id: i64) -> Result<()> {
    let action = select_by_id(c, action_id)?.ok_or(StoreError::ActionNotFound(action_id))?;
    c.execute(
        "REPLACE INTO action_queue (id, name, wallet_id, wallet_type, wallet_callback, done, data)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            action.id,
            action.name,
            action.wallet_id as i64,
            action.wallet_type.as_i64(),
            action.wallet_callback,
            action.data,
        ],
    )?;
    Ok(())
}

// ─── ActionQueueStore ───────────────────────────────────────────────────────

pub struct ActionQueueStore {
    coordinator: Arc<Coordinator>,
    db_name: String,
}

impl ActionQueueStore {
    /// Create the `action_queue` table and its indexes on `db_name` if
    /// missing, and return the store.
    pub async fn create(coordinator: Arc<Coordinator>, db_name: &str) -> Result<Self> {
        coordinator
            .run_exclusive(db_name, |c| {
                c.execute_batch(SCHEMA_DDL)?;
                Ok(())
            })
            .await?;
        debug!("action_queue ready on '{}'", db_name);
        Ok(Self {
            coordinator,
            db_name: db_name.to_string(),
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

    // ── Reads ───────────────────────────────────────────────────────────

    /// Look up an action by id. A missing id is `Ok(None)`.
    pub fn get_wallet_action(&self, id: i64) -> Result<Option<WalletAction>> {
        self.handle()?.with_reader(|c| select_by_id(c, id))
    }

    /// Same lookup as [`get_wallet_action`](Self::get_wallet_action).
    pub fn get_action_by_id(&self, id: i64) -> Result<Option<WalletAction>> {
        self.get_wallet_action(id)
    }

    /// Every action not yet done, oldest first.
    pub fn get_all_pending_actions(&self) -> Result<Vec<WalletAction>> {
        self.handle()?.with_reader(|c| {
            select_many(
                c,
                &format!("{SELECT_COLUMNS} WHERE done = 0 ORDER BY id ASC"),
                [],
            )
        })
    }

    /// Pending actions of one wallet, oldest first.
    pub fn get_pending_actions_for_wallet(&self, wallet_id: u32) -> Result<Vec<WalletAction>> {
        self.handle()?.with_reader(|c| {
            select_many(
                c,
                &format!("{SELECT_COLUMNS} WHERE done = 0 AND wallet_id = ?1 ORDER BY id ASC"),
                params![wallet_id as i64],
            )
        })
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Insert `action` and commit. Returns the assigned id.
    pub async fn create_action(&self, action: &NewAction) -> Result<i64> {
        let mut tx = self.coordinator.begin_transaction(&self.db_name).await?;
        let id = tx.execute(&self.db_name, |c| insert(c, action))?;
        tx.commit()?;
        debug!("queued action {} '{}' for wallet {}", id, action.name, action.wallet_id);
        Ok(id)
    }

    /// Insert `action` inside the caller's transaction. Returns the assigned
    /// id; the row only persists if the caller commits `tx`.
    pub fn create_action_in(&self, tx: &mut Transaction<'_>, action: &NewAction) -> Result<i64> {
        self.check_tx(tx)?;
        tx.execute(&self.db_name, |c| insert(c, action))
    }

    /// Mark an action done and commit.
    ///
    /// Fails with [`StoreError::ActionNotFound`] if no such action exists.
    pub async fn action_done(&self, action_id: i64) -> Result<()> {
        let mut tx = self.coordinator.begin_transaction(&self.db_name).await?;
        tx.execute(&self.db_name, |c| mark_done(c, action_id))?;
        tx.commit()?;
        debug!("action {} done", action_id);
        Ok(())
    }

    /// Mark an action done inside the caller's transaction.
    pub fn action_done_in(&self, tx: &mut Transaction<'_>, action_id: i64) -> Result<()> {
        self.check_tx(tx)?;
        tx.execute(&self.db_name, |c| mark_done(c, action_id))
    }

    /// Delete every action and commit.
    pub async fn clear(&self) -> Result<()> {
        let mut tx = self.coordinator.begin_transaction(&self.db_name).await?;
        tx.execute(&self.db_name, |c| {
            c.execute("DELETE FROM action_queue", [])?;
            Ok(())
        })?;
        tx.commit()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ActionQueueStore {
        let coord = Arc::new(Coordinator::open_temporary(&["wallet"]).unwrap());
        ActionQueueStore::create(coord, "wallet").await.unwrap()
    }

    fn swap(wallet_id: u32) -> NewAction {
        NewAction::pending("swap", wallet_id, WalletType::AtomicSwap, "cb", "payload")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let q = store().await;
        let id = q.create_action(&swap(3)).await.unwrap();
        let got = q.get_action_by_id(id).unwrap().unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.name, "swap");
        assert_eq!(got.wallet_id, 3);
        assert_eq!(got.wallet_type, WalletType::AtomicSwap);
        assert_eq!(got.wallet_callback, "cb");
        assert!(!got.done);
        assert_eq!(got.data, "payload");
        assert_eq!(q.get_wallet_action(id).unwrap(), Some(got));
    }

    #[tokio::test]
    async fn test_missing_action() {
        let q = store().await;
        assert_eq!(q.get_wallet_action(99).unwrap(), None);
        assert!(matches!(q.action_done(99).await, Err(StoreError::ActionNotFound(99))));
    }

    #[tokio::test]
    async fn test_action_done() {
        let q = store().await;
        let a = q.create_action(&swap(1)).await.unwrap();
        let b = q.create_action(&swap(1)).await.unwrap();
        q.action_done(a).await.unwrap();

        let done = q.get_action_by_id(a).unwrap().unwrap();
        assert!(done.done);
        assert_eq!(done.data, "payload");

        let pending: Vec<i64> = q.get_all_pending_actions().unwrap().iter().map(|x| x.id).collect();
        assert_eq!(pending, vec![b]);

        // Marking twice leaves it done.
        q.action_done(a).await.unwrap();
        assert!(q.get_action_by_id(a).unwrap().unwrap().done);
    }

    #[tokio::test]
    async fn test_pending_order() {
        let q = store().await;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(q.create_action(&swap(i)).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        q.action_done(ids[2]).await.unwrap();
        let pending: Vec<i64> = q.get_all_pending_actions().unwrap().iter().map(|x| x.id).collect();
        assert_eq!(pending, vec![ids[0], ids[1], ids[3], ids[4]]);
    }

    #[tokio::test]
    async fn test_created_done_is_not_pending() {
        let q = store().await;
        let mut action = swap(1);
        action.done = true;
        let id = q.create_action(&action).await.unwrap();
        assert!(q.get_action_by_id(id).unwrap().unwrap().done);
        assert!(q.get_all_pending_actions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_for_wallet() {
        let q = store().await;
        let a = q.create_action(&swap(1)).await.unwrap();
        q.create_action(&swap(2)).await.unwrap();
        let c = q.create_action(&swap(1)).await.unwrap();
        let ids: Vec<i64> = q.get_pending_actions_for_wallet(1).unwrap().iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[tokio::test]
    async fn test_create_in_transaction_rollback() {
        let q = store().await;
        let mut tx = q.coordinator().begin_transaction("wallet").await.unwrap();
        let id = q.create_action_in(&mut tx, &swap(1)).unwrap();
        tx.rollback().unwrap();
        assert_eq!(q.get_action_by_id(id).unwrap(), None);
        assert!(q.get_all_pending_actions().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_in_transaction_commit() {
        let q = store().await;
        let mut tx = q.coordinator().begin_transaction("wallet").await.unwrap();
        let id = q.create_action_in(&mut tx, &swap(1)).unwrap();
        q.action_done_in(&mut tx, id).unwrap();
        tx.commit().unwrap();
        assert!(q.get_action_by_id(id).unwrap().unwrap().done);
    }

    #[tokio::test]
    async fn test_invalid_wallet_type_in_row() {
        let q = store().await;
        q.handle()
            .unwrap()
            .with_writer(|c| {
                c.execute(
                    "INSERT INTO action_queue VALUES (NULL, 'x', 1, 42, 'cb', 0, '')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            q.get_all_pending_actions(),
            Err(StoreError::InvalidWalletType(42))
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_wallet_id_in_row() {
        let q = store().await;
        q.handle()
            .unwrap()
            .with_writer(|c| {
                c.execute(
                    "INSERT INTO action_queue VALUES (NULL, 'x', 4294967297, 2, 'cb', 0, '')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        assert!(matches!(
            q.get_all_pending_actions(),
            Err(StoreError::InvalidWalletId(4294967297))
        ));
        assert!(matches!(q.get_wallet_action(1), Err(StoreError::InvalidWalletId(_))));
    }

    #[tokio::test]
    async fn test_pending_excludes_uncommitted_actions() {
        let q = store().await;
        let committed = q.create_action(&swap(1)).await.unwrap();

        let mut tx = q.coordinator().begin_transaction("wallet").await.unwrap();
        let uncommitted = q.create_action_in(&mut tx, &swap(2)).unwrap();

        let pending: Vec<i64> = q.get_all_pending_actions().unwrap().iter().map(|x| x.id).collect();
        assert_eq!(pending, vec![committed]);
        assert_eq!(q.get_action_by_id(uncommitted).unwrap(), None);

        tx.rollback().unwrap();
        assert_eq!(q.get_action_by_id(uncommitted).unwrap(), None);
    }

    #[tokio::test]
    async fn test_data_item() {
        let q = store().await;
        let action = NewAction::pending(
            "claim",
            4,
            WalletType::RateLimited,
            "on_claim",
            r#"{"amount": 1000, "puzzle_hash": "ab"}"#,
        );
        let id = q.create_action(&action).await.unwrap();
        let got = q.get_action_by_id(id).unwrap().unwrap();
        assert_eq!(got.data_item("amount"), Some(serde_json::json!(1000)));
        assert_eq!(got.data_item("missing"), None);

        let opaque = WalletAction { data: "not json".into(), ..got };
        assert_eq!(opaque.data_item("amount"), None);
    }

    #[tokio::test]
    async fn test_clear() {
        let q = store().await;
        q.create_action(&swap(1)).await.unwrap();
        q.clear().await.unwrap();
        assert!(q.get_all_pending_actions().unwrap().is_empty());
    }
}
