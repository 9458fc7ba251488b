//! CLI command implementations.

use crate::{AppContext, Table};
use log::info;
use salvium_store::{
    ActionQueueStore, Coordinator, JsonCodec, KeyValStore, NewAction, WalletAction, WalletType,
};
use std::sync::Arc;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

type JsonStore = KeyValStore<JsonCodec<serde_json::Value>>;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn open_coordinator(ctx: &AppContext) -> std::result::Result<Arc<Coordinator>, Box<dyn std::error::Error>> {
    Ok(Arc::new(Coordinator::open(&ctx.config)?))
}

async fn open_actions(ctx: &AppContext) -> std::result::Result<ActionQueueStore, Box<dyn std::error::Error>> {
    let coord = open_coordinator(ctx)?;
    Ok(ActionQueueStore::create(coord, &ctx.db_name).await?)
}

async fn open_key_val(ctx: &AppContext) -> std::result::Result<JsonStore, Box<dyn std::error::Error>> {
    let coord = open_coordinator(ctx)?;
    Ok(KeyValStore::create(coord, &ctx.db_name, JsonCodec::new()).await?)
}

fn print_action_row(a: &WalletAction) {
    println!(
        "{:>6}  {:<16} {:>8}  {:<16} {:<20} {}",
        a.id,
        a.name,
        a.wallet_id,
        a.wallet_type,
        a.wallet_callback,
        if a.done { "done" } else { "pending" }
    );
}

// ─── Action queue ───────────────────────────────────────────────────────────

pub async fn list_pending(ctx: &AppContext, wallet_id: Option<u32>) -> Result {
    let queue = open_actions(ctx).await?;
    let actions = match wallet_id {
        Some(id) => queue.get_pending_actions_for_wallet(id)?,
        None => queue.get_all_pending_actions()?,
    };

    if actions.is_empty() {
        println!("No pending actions.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<16} {:>8}  {:<16} {:<20} {}",
        "ID", "Name", "Wallet", "Type", "Callback", "State"
    );
    println!("{}", "-".repeat(80));
    for a in &actions {
        print_action_row(a);
    }
    Ok(())
}

pub async fn show_action(ctx: &AppContext, id: i64) -> Result {
    let queue = open_actions(ctx).await?;
    match queue.get_action_by_id(id)? {
        Some(action) => println!("{}", serde_json::to_string_pretty(&action)?),
        None => println!("No action with id {}.", id),
    }
    Ok(())
}

pub async fn enqueue(
    ctx: &AppContext,
    name: &str,
    wallet_id: u32,
    wallet_type: WalletType,
    callback: &str,
    data: &str,
) -> Result {
    let queue = open_actions(ctx).await?;
    let id = queue
        .create_action(&NewAction::pending(name, wallet_id, wallet_type, callback, data))
        .await?;
    info!("queued action {}", id);
    println!("{}", id);
    Ok(())
}

pub async fn mark_done(ctx: &AppContext, id: i64) -> Result {
    let queue = open_actions(ctx).await?;
    queue.action_done(id).await?;
    println!("Action {} marked done.", id);
    Ok(())
}

// ─── Key-value store ────────────────────────────────────────────────────────

pub async fn get_value(ctx: &AppContext, key: &str) -> Result {
    let kv = open_key_val(ctx).await?;
    match kv.get_object(key)? {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => {
            eprintln!("Key not found: {}", key);
            std::process::exit(2);
        }
    }
    Ok(())
}

pub async fn set_value(ctx: &AppContext, key: &str, value: &str) -> Result {
    let value: serde_json::Value = serde_json::from_str(value)?;
    let kv = open_key_val(ctx).await?;
    kv.set_object(key, &value).await?;
    info!("stored '{}'", key);
    Ok(())
}

// ─── Maintenance ────────────────────────────────────────────────────────────

pub async fn clear(ctx: &AppContext, table: Table) -> Result {
    match table {
        Table::KeyVal => open_key_val(ctx).await?.clear().await?,
        Table::Actions => open_actions(ctx).await?.clear().await?,
    }
    info!("cleared {:?}", table);
    Ok(())
}
