use clap::{Parser, Subcommand};
use salvium_store::{StoreConfig, WalletType, DEFAULT_DB};
use std::path::PathBuf;

mod commands;

/// Inspect and edit a Salvium wallet store.
#[derive(Parser)]
#[command(name = "salvium-store")]
#[command(about = "Key-value store and action queue maintenance for Salvium wallets")]
#[command(version)]
struct Cli {
    /// JSON store config listing the named database files.
    #[arg(long, conflicts_with = "db")]
    config: Option<PathBuf>,

    /// Single database file (used when no config is given).
    #[arg(long)]
    db: Option<PathBuf>,

    /// Database handle to operate on.
    #[arg(long, default_value = DEFAULT_DB)]
    db_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List pending actions.
    Pending {
        /// Only actions of this wallet.
        #[arg(long)]
        wallet_id: Option<u32>,
    },

    /// Show one action.
    Action { id: i64 },

    /// Queue a new pending action.
    Enqueue {
        #[arg(long)]
        name: String,

        #[arg(long)]
        wallet_id: u32,

        /// Wallet type name or number (e.g. "atomic-swap" or 2).
        #[arg(long)]
        wallet_type: WalletType,

        #[arg(long)]
        callback: String,

        /// Opaque payload, conventionally a JSON object.
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// Mark an action done.
    Done { id: i64 },

    /// Print the JSON value stored under a key.
    Get { key: String },

    /// Store a JSON value under a key.
    Set { key: String, value: String },

    /// Delete every row of a table.
    Clear { table: Table },
}

#[derive(Clone, Copy, Debug)]
pub enum Table {
    KeyVal,
    Actions,
}

impl std::str::FromStr for Table {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "key-val" | "kv" => Ok(Self::KeyVal),
            "actions" | "action-queue" => Ok(Self::Actions),
            _ => Err(format!("unknown table: {} (use key-val or actions)", s)),
        }
    }
}

/// Application context shared across commands.
pub struct AppContext {
    config: StoreConfig,
    db_name: String,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match (&cli.config, &cli.db) {
            (Some(path), _) => StoreConfig::load(path)?,
            (None, Some(db)) => StoreConfig::single(&cli.db_name, db.clone()),
            (None, None) => StoreConfig::single(&cli.db_name, default_db_path()),
        };
        Ok(Self {
            config,
            db_name: cli.db_name.clone(),
        })
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("salvium")
        .join("wallet-store.db")
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let ctx = match AppContext::from_cli(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Pending { wallet_id } => commands::list_pending(&ctx, wallet_id).await,
        Commands::Action { id } => commands::show_action(&ctx, id).await,
        Commands::Enqueue {
            name,
            wallet_id,
            wallet_type,
            callback,
            data,
        } => commands::enqueue(&ctx, &name, wallet_id, wallet_type, &callback, &data).await,
        Commands::Done { id } => commands::mark_done(&ctx, id).await,
        Commands::Get { key } => commands::get_value(&ctx, &key).await,
        Commands::Set { key, value } => commands::set_value(&ctx, &key, &value).await,
        Commands::Clear { table } => commands::clear(&ctx, table).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
