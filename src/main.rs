use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use swingscan::api::SymbolMaster;
use swingscan::{BatchReport, Pipeline, Result, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Screen daily breakout signals for healthy long setups")]
struct Cli {
    /// Path to the config file (defaults to ./swingscan.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "swingscan=info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen every scanner signal for one trading day
    Run {
        /// Signal date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        /// Stream progress events to stdout, one JSON object per line
        #[arg(long)]
        ndjson: bool,
    },

    /// Download the scrip master and replace the local cache
    RefreshSymbols,

    /// Show the token and every NSE symbol containing each name
    Symbols {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { date, ndjson } => run(&settings, date, ndjson).await,
        Commands::RefreshSymbols => refresh_symbols(&settings).await,
        Commands::Symbols { names } => lookup_symbols(&settings, &names).await,
    }
}

fn setup_logging(default_filter: &str) {
    // Logs go to stderr so --ndjson output stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(settings: &Settings, date: NaiveDate, ndjson: bool) -> Result<()> {
    tracing::info!("🚀 swingscan screening signals for {}", date);

    let pipeline = Pipeline::from_settings(settings)?;
    let report = pipeline
        .run_for_date(date, |event| {
            if ndjson {
                println!("{}", event.to_ndjson());
            }
        })
        .await?;

    if !ndjson {
        print_report(&report);
    }
    Ok(())
}

async fn refresh_symbols(settings: &Settings) -> Result<()> {
    let master = symbol_master(settings);
    master.refresh().await?;

    let table = master.snapshot().await;
    println!(
        "✓ Scrip master refreshed: {} NSE symbols cached at {}",
        table.len(),
        settings.symbol_master.cache_path.display()
    );
    Ok(())
}

async fn lookup_symbols(settings: &Settings, names: &[String]) -> Result<()> {
    let master = symbol_master(settings);
    master.ensure_fresh().await?;
    let table = master.snapshot().await;

    for name in names {
        let name = name.trim().to_uppercase();
        match table.resolve(&name) {
            Some(token) => println!("{} → {}", name, token),
            None => println!("{} → not found", name),
        }

        let matches = table.search(&name);
        if matches.is_empty() {
            println!("   no NSE symbols contain {:?}", name);
        }
        for entry in matches {
            println!("   {:<24} {}", entry.symbol, entry.token);
        }
    }
    Ok(())
}

fn symbol_master(settings: &Settings) -> SymbolMaster {
    SymbolMaster::new(
        &settings.symbol_master.url,
        &settings.symbol_master.cache_path,
        settings.symbol_master.max_age(),
    )
}

fn print_report(report: &BatchReport) {
    let date = report
        .date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║          SWING SETUP SCREEN  {:<25}║", date);
    println!("╚═══════════════════════════════════════════════════════╝\n");

    if report.accepted.is_empty() {
        println!("No setups passed the filters.");
    } else {
        println!(
            "{:<14} {:>10} {:>10} {:>10} {:>10} {:>8} {:>5}",
            "Symbol", "LTP", "Close", "Stop", "Target", "Spread", "MTF"
        );
        println!("{}", "─".repeat(73));
        for setup in &report.accepted {
            println!(
                "{:<14} {:>10.2} {:>10.2} {:>10.2} {:>10.2} {:>7.2}% {:>5}",
                setup.symbol,
                setup.ltp,
                setup.close,
                setup.stop_loss,
                setup.target,
                setup.spread_pct,
                if setup.is_mtf { "yes" } else { "no" }
            );
        }
    }

    if !report.rejected.is_empty() {
        println!("\n❌ Rejected:");
        for rejection in &report.rejected {
            println!("   {:<14} {}", rejection.symbol, rejection.reason);
        }
    }

    println!(
        "\n📊 {} candidates: {} accepted, {} rejected (run {})",
        report.total(),
        report.accepted.len(),
        report.rejected.len(),
        report.run_id
    );
    println!("\n═══════════════════════════════════════════════════════\n");
}
