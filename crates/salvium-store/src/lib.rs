//! Salvium wallet persistence.
//!
//! Two durable collections on SQLite: a key-value object store and a queue
//! of pending wallet actions. Both are built on a shared [`Coordinator`],
//! whose write lock serializes every writer so that a unit of work spanning
//! several tables (or several named database files) is never observed
//! half-committed by another writer.

pub mod error;
pub mod config;
pub mod coordinator;
pub mod codec;
pub mod wallet_type;
pub mod key_val;
pub mod action_queue;

pub use error::{Result, StoreError};
pub use config::{DatabaseConfig, StoreConfig, DEFAULT_DB};
pub use coordinator::{Coordinator, DbHandle, Transaction};
pub use codec::{Codec, JsonCodec, RawCodec};
pub use wallet_type::WalletType;
pub use key_val::KeyValStore;
pub use action_queue::{ActionQueueStore, NewAction, WalletAction};
