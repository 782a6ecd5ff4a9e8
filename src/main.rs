//! Backfill CLI
//!
//! Downloads historical trades for one selector into the local store,
//! resuming from and skipping over whatever earlier runs already covered.
//!
//! # Usage
//!
//! ```bash
//! backfill coinbase.BTC-USD --days 3
//! backfill binance.ADA-USDT --start 1704067200000 --end 1704153600000
//! backfill list-selectors --exchange coinbase --asset BTC
//! ```
//!
//! # Exit Codes
//!
//! - 0: Completed, or the exchange offers no historical data
//! - 1: Any fatal error (unknown exchange, fetch failure, retry cap exceeded,
//!   duplicate results, store failure, bad arguments)

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trade_backfill::backfill::{resolve_adapter, BackfillEngine, BackfillWindow};
use trade_backfill::config::BackfillConfig;
use trade_backfill::exchange::ExchangeRegistry;
use trade_backfill::selector::Selector;
use trade_backfill::storage::{BackfillStore, SqliteBackfillStore};
use trade_backfill::BackfillError;

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "backfill")]
#[command(about = "Download historical trades for an exchange/pair selector", version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,

    /// Path to a TOML file overriding the default configuration
    #[arg(long, global = true)]
    conf: Option<PathBuf>,

    /// Verbose debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Selector to backfill, e.g. coinbase.BTC-USD
    selector: Option<String>,

    /// Number of days to acquire
    #[arg(long)]
    days: Option<u32>,

    /// Start of an explicit span, ms since epoch (forward-scanning exchanges)
    #[arg(long)]
    start: Option<i64>,

    /// End of an explicit span, ms since epoch
    #[arg(long)]
    end: Option<i64>,

    /// SQLite database path
    #[arg(long)]
    db: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available selectors
    ListSelectors {
        /// Only this exchange
        #[arg(short, long)]
        exchange: Option<String>,

        /// Only pairs trading this asset
        #[arg(short, long)]
        asset: Option<String>,
    },
}

// =============================================================================
// ENTRYPOINT
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(cli.debug);

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<BackfillError>() {
            Some(err @ BackfillError::NoHistoricalData { .. }) => {
                warn!("{}", err);
                eprintln!("{}", err);
                ExitCode::from(err.exit_code() as u8)
            }
            Some(err) => {
                error!(error = %err, "Backfill aborted");
                eprintln!("{:#}", e);
                ExitCode::from(err.exit_code() as u8)
            }
            None => {
                let reason = format!("{:#}", e);
                error!(error = %reason, "Backfill failed");
                eprintln!("{}", reason);
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "trade_backfill=debug,backfill=debug"
    } else {
        "trade_backfill=info,backfill=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = BackfillConfig::resolve(cli.conf.as_deref())?;
    let registry = ExchangeRegistry::with_defaults(&config.exchanges)?;

    match cli.command {
        Some(Command::ListSelectors { exchange, asset }) => {
            list_selectors(&registry, exchange.as_deref(), asset.as_deref())
        }
        None => run_backfill(config, &registry, cli.run).await,
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_backfill(
    config: BackfillConfig,
    registry: &ExchangeRegistry,
    args: RunArgs,
) -> Result<()> {
    let raw = args
        .selector
        .or_else(|| config.selector.clone())
        .context("No selector given; pass one or set BACKFILL_SELECTOR")?;
    let selector = Selector::parse(&raw)?;

    if args.start.is_some() != args.end.is_some() {
        warn!("--start and --end must be given together; using --days");
    }
    let window = BackfillWindow::from_args(args.days.unwrap_or(config.days), args.start, args.end);

    let exchange = resolve_adapter(registry, &selector)?;

    let mut store_config = config.store.clone();
    if let Some(db) = args.db {
        store_config.db_path = db;
    }
    let store: Arc<dyn BackfillStore> =
        Arc::new(SqliteBackfillStore::open(&store_config).map_err(BackfillError::Store)?);

    let engine = BackfillEngine::new(exchange, store, config.retry.clone());
    let session = engine.start(selector, window)?;
    let report = engine.run(session).await?;

    info!(
        selector = %report.selector,
        outcome = ?report.outcome,
        trades = report.stats.trades_persisted,
        batches = report.stats.batches,
        empty_polls = report.stats.empty_polls,
        transient_retries = report.stats.transient_retries,
        persist_retries = report.stats.persist_retries,
        skips = report.stats.skips,
        marker = %report.marker.id,
        "Backfill finished"
    );
    Ok(())
}

fn list_selectors(
    registry: &ExchangeRegistry,
    exchange: Option<&str>,
    asset: Option<&str>,
) -> Result<()> {
    for (id, products) in registry.listing(exchange, asset)? {
        println!("{}:", id);
        for product in products {
            match &product.label {
                Some(label) => println!("  {}.{}  ({})", id, product.product_id(), label),
                None => println!("  {}.{}", id, product.product_id()),
            }
        }
    }
    Ok(())
}
