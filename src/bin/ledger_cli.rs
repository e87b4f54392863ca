use std::{fs, path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use purchase_ledger::{
    config::{self, LedgerConfig},
    db::{self, SeaOrmLedgerStore},
    events::{self, EventSender},
    models::{
        ItemStatus, NewPurchaseItem, NewPurchaseReceipt, PurchaseItem, PurchaseReceipt,
        ReceiptHeaderUpdate, VariantKey,
    },
    services::{catalog::StaticCatalog, demand::InMemoryDemandService},
    ReconciliationEngine,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load ledger config")?;
    config::init_tracing(config.log_level(), config.log_json);

    let pool = db::establish_connection_with_config(&db::DbConfig::from(&config))
        .await
        .context("failed to connect to database")?;

    if let Commands::Migrate = cli.command {
        db::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
        println!("Migrations applied");
        return Ok(());
    }
    if config.auto_migrate {
        db::run_migrations(&pool)
            .await
            .context("failed to run migrations")?;
    }

    let engine = build_engine(&config, pool);
    let store = cli.store.as_str();

    match cli.command {
        Commands::Migrate => {}
        Commands::Create(args) => {
            let raw = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let new_receipt: NewPurchaseReceipt =
                serde_json::from_str(&raw).context("invalid receipt document")?;
            let created = engine.create_receipt(store, new_receipt).await?;
            render_receipt(&created, cli.json)?;
        }
        Commands::Advance(args) => {
            let status = ItemStatus::from_str(&args.status)
                .map_err(|_| anyhow!("unknown status '{}'", args.status))?;
            let change = engine
                .advance_status(store, args.receipt_id, args.item, status)
                .await?;
            match change.transition {
                Some(t) if !cli.json => println!("Item {} moved {} -> {}", args.item, t.from, t.to),
                None if !cli.json => println!("Item {} already {}", args.item, status),
                _ => {}
            }
            render_receipt(&change.receipt, cli.json)?;
        }
        Commands::Edit(args) => {
            let raw = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let request: EditDocument =
                serde_json::from_str(&raw).context("invalid edit document")?;
            let outcome = engine
                .edit_receipt(
                    store,
                    args.receipt_id,
                    request.header,
                    request.added,
                    request.removed,
                )
                .await?;
            if !cli.json {
                println!(
                    "Removed {} item(s), added {} item(s)",
                    outcome.removed.len(),
                    outcome.added
                );
            }
            render_receipt(&outcome.receipt, cli.json)?;
        }
        Commands::Cancel(args) => {
            let outcome = engine.cancel_all(store, args.receipt_id).await?;
            if !cli.json {
                println!("Cancelled {} item(s)", outcome.cancelled);
            }
            render_receipt(&outcome.receipt, cli.json)?;
        }
        Commands::Delete(args) => {
            let deleted = engine.delete_receipt(store, args.receipt_id).await?;
            if cli.json {
                print_json(&deleted)?;
            } else {
                println!("Deleted receipt {} ({})", deleted.receipt_no, deleted.receipt_id);
            }
        }
        Commands::Reset(args) => {
            let outcome = engine.reset_to_pending(store, args.receipt_id).await?;
            if !cli.json {
                println!("Reset {} item(s) to Pending", outcome.reset);
            }
            render_receipt(&outcome.receipt, cli.json)?;
        }
        Commands::NextNumber => {
            let next = engine.next_receipt_number(store).await;
            if cli.json {
                print_json(&serde_json::json!({ "receiptNo": next }))?;
            } else {
                println!("{}", next);
            }
        }
        Commands::Show(args) => {
            let receipt = engine.get_receipt(store, args.receipt_id).await?;
            render_receipt(&receipt, cli.json)?;
        }
        Commands::List(args) => {
            let receipts = engine.list_receipts(store, args.limit).await?;
            if cli.json {
                print_json(&receipts)?;
            } else if receipts.is_empty() {
                println!("No receipts in store {}", store);
            } else {
                for receipt in &receipts {
                    render_summary(receipt);
                }
            }
        }
        Commands::Stock(args) => {
            let key = VariantKey::new(args.product_id, args.color_id, args.dimension_id);
            match engine.stock(&key).await? {
                Some(record) if cli.json => print_json(&record)?,
                Some(record) => println!(
                    "{} ({}) • free {} • reserved {} • incoming {} • incoming reserved {}",
                    key,
                    record.product_name,
                    record.free_stock,
                    record.reserved_stock,
                    record.incoming_stock,
                    record.incoming_reserved_stock
                ),
                None => println!("No stock record for {}", key),
            }
        }
    }

    Ok(())
}

fn build_engine(config: &LedgerConfig, pool: db::DbPool) -> ReconciliationEngine {
    let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
    tokio::spawn(events::process_events(event_rx));

    ReconciliationEngine::from_config(
        config,
        Arc::new(SeaOrmLedgerStore::new(Arc::new(pool))),
        Arc::new(InMemoryDemandService::new()),
        Arc::new(StaticCatalog::new()),
    )
    .with_event_sender(event_sender)
}

#[derive(Parser)]
#[command(name = "ledger", about = "Purchase receipt and stock ledger CLI", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[arg(long, global = true, default_value = "default", help = "Store the receipts belong to")]
    store: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations and exit
    Migrate,
    /// Create a receipt from a JSON document
    Create(FileArgs),
    /// Move one item to a new status
    Advance(AdvanceArgs),
    /// Add and remove items, or change header fields, from a JSON document
    Edit(EditArgs),
    /// Cancel every item on a receipt
    Cancel(ReceiptArgs),
    /// Delete a receipt with no items in flight
    Delete(ReceiptArgs),
    /// Send every in-flight item back to Pending
    Reset(ReceiptArgs),
    /// Propose the next receipt number
    NextNumber,
    Show(ReceiptArgs),
    List(ListArgs),
    Stock(StockArgs),
}

#[derive(Args)]
struct FileArgs {
    #[arg(long, help = "Path to the receipt JSON document")]
    file: PathBuf,
}

#[derive(Args)]
struct ReceiptArgs {
    #[arg(help = "Receipt id")]
    receipt_id: Uuid,
}

#[derive(Args)]
struct AdvanceArgs {
    receipt_id: Uuid,
    #[arg(long, help = "Zero-based item index")]
    item: usize,
    #[arg(long, help = "Requested status, e.g. Approved or InProduction")]
    status: String,
}

#[derive(Args)]
struct EditArgs {
    receipt_id: Uuid,
    #[arg(long, help = "Path to the edit JSON document")]
    file: PathBuf,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, default_value_t = 20)]
    limit: u64,
}

#[derive(Args)]
struct StockArgs {
    #[arg(long)]
    product_id: String,
    #[arg(long)]
    color_id: String,
    #[arg(long)]
    dimension_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditDocument {
    #[serde(default)]
    header: ReceiptHeaderUpdate,
    #[serde(default)]
    added: Vec<NewPurchaseItem>,
    #[serde(default)]
    removed: Vec<PurchaseItem>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_receipt(receipt: &PurchaseReceipt, json: bool) -> Result<()> {
    if json {
        return print_json(receipt);
    }
    render_summary(receipt);
    for (index, item) in receipt.items.iter().enumerate() {
        println!(
            "  [{}] {} • {} x {} • {} • {}",
            index,
            item.variant_key(),
            item.quantity,
            item.amount,
            item.item_type,
            item.status
        );
    }
    Ok(())
}

fn render_summary(receipt: &PurchaseReceipt) {
    println!(
        "- Receipt {} ({}) • {} • {} item(s) • total {}",
        receipt.receipt_no,
        receipt.receipt_id,
        receipt.date,
        receipt.items.len(),
        receipt.total_amount
    );
}
