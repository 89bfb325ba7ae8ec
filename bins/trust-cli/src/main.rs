//! trust-cli — operator command-line interface for the wallet trust-scoring
//! store: score lookups, fraud-report filing, indexer checkpoint
//! inspection, and a manual refresh trigger.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use trust_core::types::Address;
use trust_engine::{DisabledBasenameResolver, DisabledCodeHost, DisabledRpcClient, ScoringEngine};
use trust_store::AsyncDb;

/// Wallet trust-scoring operator CLI.
#[derive(Parser)]
#[command(name = "trust-cli")]
#[command(version, about = "Operator CLI for the wallet trust-scoring store")]
struct Cli {
    /// Path to the SQLite store (default: platform data dir / trustmesh).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a wallet's current score.
    Score(ScoreArgs),
    /// Show recent score history for a wallet.
    History(HistoryArgs),
    /// Force a synchronous score recompute, bypassing the cache.
    Refresh(ScoreArgs),
    /// File a fraud report against a wallet.
    Report(ReportArgs),
    /// Show the top-N wallets by composite score.
    Leaderboard(LeaderboardArgs),
    /// Inspect a named indexer's checkpoint state.
    IndexerState(IndexerStateArgs),
}

#[derive(Args)]
struct ScoreArgs {
    /// Wallet address (0x-prefixed hex).
    wallet: String,
}

#[derive(Args)]
struct HistoryArgs {
    /// Wallet address (0x-prefixed hex).
    wallet: String,

    /// Maximum entries to show.
    #[arg(long, default_value_t = 20)]
    limit: i64,
}

#[derive(Args)]
struct ReportArgs {
    /// Wallet address being reported.
    target: String,

    /// Wallet address filing the report.
    #[arg(long)]
    reporter: String,

    /// Short reason code.
    #[arg(long)]
    reason: String,

    /// Free-text details.
    #[arg(long, default_value = "")]
    details: String,
}

#[derive(Args)]
struct LeaderboardArgs {
    #[arg(long, default_value_t = 10)]
    limit: i64,
}

#[derive(Args)]
struct IndexerStateArgs {
    /// Checkpoint key, e.g. "transfer_indexer_checkpoint".
    key: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = cli
        .data_dir
        .unwrap_or_else(|| dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("trustmesh"));
    let db_path = data_dir.join("trust.sqlite3");
    let store = AsyncDb::open(&db_path.to_string_lossy())
        .await
        .with_context(|| format!("failed to open store at {}", db_path.display()))?;

    match cli.command {
        Commands::Score(args) => show_score(&store, args).await,
        Commands::History(args) => show_history(&store, args).await,
        Commands::Refresh(args) => refresh(&store, args).await,
        Commands::Report(args) => file_report(&store, args).await,
        Commands::Leaderboard(args) => show_leaderboard(&store, args).await,
        Commands::IndexerState(args) => show_indexer_state(&store, args).await,
    }
}

fn parse_wallet(raw: &str) -> Result<Address> {
    raw.parse().with_context(|| format!("invalid wallet address: {raw}"))
}

async fn show_score(store: &AsyncDb, args: ScoreArgs) -> Result<()> {
    let wallet = parse_wallet(&args.wallet)?;
    match store.get_score(wallet).await? {
        Some(score) => {
            println!("wallet:         {}", score.wallet);
            println!("composite:      {}", score.composite);
            println!("tier:           {}", score.tier);
            println!("confidence:     {:.2}", score.confidence);
            println!("recommendation: {}", score.recommendation);
            println!("sybil_flag:     {}", score.sybil_flag);
            println!("computed_at:    {}", score.computed_at);
            println!("expires_at:     {}", score.expires_at);
        }
        None => println!("no score on file for {wallet}"),
    }
    Ok(())
}

async fn show_history(store: &AsyncDb, args: HistoryArgs) -> Result<()> {
    let wallet = parse_wallet(&args.wallet)?;
    let history = store.get_history(wallet, args.limit).await?;
    if history.is_empty() {
        println!("no history on file for {wallet}");
        return Ok(());
    }
    for entry in history {
        println!("{}  score={:<3} confidence={:.2}", entry.computed_at, entry.score, entry.confidence);
    }
    Ok(())
}

async fn refresh(store: &AsyncDb, args: ScoreArgs) -> Result<()> {
    let wallet = parse_wallet(&args.wallet)?;
    let engine = ScoringEngine::new(
        store.clone(),
        std::sync::Arc::new(DisabledRpcClient),
        std::sync::Arc::new(DisabledCodeHost),
        std::sync::Arc::new(DisabledBasenameResolver),
    );
    let response = engine.get_or_calculate(wallet, true).await?;
    println!("recomputed {} -> composite {}", wallet, response.score.composite);
    Ok(())
}

async fn file_report(store: &AsyncDb, args: ReportArgs) -> Result<()> {
    let target = parse_wallet(&args.target)?;
    let reporter = parse_wallet(&args.reporter)?;
    let id = trust_store::outcomes::file_fraud_report_checked(store, target, reporter, args.reason, args.details).await?;
    println!("filed fraud report #{id} against {target}");
    Ok(())
}

async fn show_leaderboard(store: &AsyncDb, args: LeaderboardArgs) -> Result<()> {
    let board = store.leaderboard(args.limit).await?;
    for (rank, (wallet, composite)) in board.into_iter().enumerate() {
        println!("{:>3}. {}  {}", rank + 1, wallet, composite);
    }
    Ok(())
}

async fn show_indexer_state(store: &AsyncDb, args: IndexerStateArgs) -> Result<()> {
    match store.get_indexer_state(&args.key).await? {
        Some(value) => println!("{} = {value}", args.key),
        None => println!("no checkpoint recorded under key {}", args.key),
    }
    Ok(())
}
