use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use stationhub::application::coordinator::Coordinator;
use stationhub::broadcast::Broadcaster;
use stationhub::config::HubConfig;
use stationhub::domain::action_log::Actor;
use stationhub::domain::ports::LedgerBox;
use stationhub::infrastructure::in_memory::InMemoryLedger;
#[cfg(feature = "storage-rocksdb")]
use stationhub::infrastructure::rocksdb::RocksDBLedger;
use stationhub::interfaces::csv::roster_reader::RosterReader;
use stationhub::interfaces::csv::roster_writer::RosterWriter;
use stationhub::interfaces::station::server::StationServer;
use stationhub::telemetry;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Hub configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the station gateway.
    Serve {
        /// Address to listen on; overrides the config file.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Reconcile a roster CSV file into the ledger.
    Import {
        file: PathBuf,
        #[arg(long, default_value = "admin")]
        station: String,
        #[arg(long, default_value = "admin")]
        operator: String,
    },
    /// Print the roster as CSV.
    Roster,
    /// Print recent action log entries, one JSON object per line.
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn open_ledger(db_path: Option<PathBuf>) -> Result<LedgerBox> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening RocksDB ledger");
            Ok(Arc::new(RocksDBLedger::open(path).into_diagnostic()?))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "--db-path given but the 'storage-rocksdb' feature is not enabled; falling back to the in-memory ledger"
            );
            Ok(Arc::new(InMemoryLedger::new()))
        }
        None => Ok(Arc::new(InMemoryLedger::new())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.json_logs);

    let config = match &cli.config {
        Some(path) => HubConfig::load(path).into_diagnostic()?,
        None => HubConfig::default(),
    };

    let ledger = open_ledger(cli.db_path)?;
    let coordinator = Arc::new(Coordinator::new(
        ledger,
        Broadcaster::spawn(&config.broadcast),
        config.retry,
    ));

    match cli.command {
        Command::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.listen.clone());
            let listener = TcpListener::bind(&addr).await.into_diagnostic()?;
            let server = StationServer::new(Arc::clone(&coordinator), config.snapshot_limit);

            tokio::select! {
                result = server.run(listener) => result.into_diagnostic()?,
                _ = tokio::signal::ctrl_c() => {
                    let closed = coordinator.broadcaster().close_all();
                    tracing::info!(closed, "Shutting down station gateway");
                }
            }
        }
        Command::Import {
            file,
            station,
            operator,
        } => {
            let file = File::open(file).into_diagnostic()?;
            let (rows, unreadable) = RosterReader::new(file).read_all().into_diagnostic()?;

            let report = coordinator
                .import_with_rejections(&Actor::new(station, operator), rows, unreadable)
                .await
                .into_diagnostic()?;
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
        Command::Roster => {
            let students = coordinator.students().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = RosterWriter::new(stdout.lock());
            writer.write_students(&students).into_diagnostic()?;
        }
        Command::Logs { limit } => {
            for entry in coordinator.recent_logs(limit).await.into_diagnostic()? {
                println!("{}", serde_json::to_string(&entry).into_diagnostic()?);
            }
        }
    }

    Ok(())
}
