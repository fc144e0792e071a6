use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use paysync::application::callbacks::dispatch;
use paysync::application::engine::{CompletionOutcome, InitiateOutcome, StatusView};
use paysync::application::runtime::EngineRuntime;
use paysync::config::EngineConfig;
use paysync::domain::ports::{DurableStoreRef, PaymentGatewayRef};
use paysync::domain::transaction::CheckoutId;
use paysync::error::PaymentError;
use paysync::infrastructure::in_memory::InMemoryDurableStore;
use paysync::infrastructure::lipia::LipiaGateway;
use paysync::interfaces::csv::callback_reader::CallbackReader;
use paysync::interfaces::csv::ledger_writer::LedgerWriter;
use paysync::interfaces::http;
use paysync::logging::init_logging;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Base URL of the STK push API
    #[arg(long, global = true)]
    gateway_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the callback listener until interrupted
    Serve {
        /// Address to listen on, overriding the configuration
        #[arg(long)]
        listen: Option<String>,
    },
    /// Start a payment
    Initiate {
        #[arg(long)]
        username: String,
        #[arg(long)]
        plan: String,
        #[arg(long)]
        phone: String,
    },
    /// Show the status of a payment
    Status { checkout_id: String },
    /// Cancel a pending payment
    Cancel { checkout_id: String },
    /// Print word balances as CSV: one user, or every known account
    Balance { username: Option<String> },
    /// List a user's payments, newest first
    History { username: String },
    /// Feed exported callbacks (CheckoutRequestID,reference) through the completion path
    Replay { input: PathBuf },
}

fn load_config(cli: &Cli) -> paysync::error::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(db_path) = &cli.db_path {
        config.store.db_path = Some(db_path.clone());
    }
    if let Some(url) = &cli.gateway_url {
        config.gateway.base_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_durable(config: &EngineConfig) -> paysync::error::Result<DurableStoreRef> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &config.store.db_path {
        let store = paysync::infrastructure::rocksdb::RocksDBStore::open(db_path)?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if config.store.db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok(Arc::new(InMemoryDurableStore::new()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

async fn sync_now(runtime: &EngineRuntime) {
    if let Err(e) = runtime.supervisor().reconnect_once().await {
        warn!(error = %e, "Durable store unreachable, using fallback mirror");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli).into_diagnostic()?;
    init_logging(&config);

    let durable = open_durable(&config).into_diagnostic()?;
    let gateway: PaymentGatewayRef = Arc::new(LipiaGateway::new(
        &config.gateway.base_url,
        &config.gateway.api_key,
        config.gateway.timeout(),
    )
    .into_diagnostic()?);
    let runtime = Arc::new(EngineRuntime::assemble(&config, durable, gateway));

    if let Command::Serve { listen } = &cli.command {
        let addr = listen.clone().unwrap_or_else(|| config.callback.listen.clone());
        let listener = tokio::net::TcpListener::bind(&addr).await.into_diagnostic()?;
        runtime.start();
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        let served = http::serve(runtime.clone(), listener, shutdown).await;
        runtime.shutdown(SHUTDOWN_GRACE).await;
        return served.into_diagnostic();
    }

    sync_now(&runtime).await;
    let result = run_once(&runtime, cli.command).await;
    sync_now(&runtime).await;
    runtime.shutdown(SHUTDOWN_GRACE).await;
    result
}

async fn run_once(runtime: &EngineRuntime, command: Command) -> Result<()> {
    let engine = runtime.engine();
    match command {
        Command::Serve { .. } => Ok(()),
        Command::Initiate {
            username,
            plan,
            phone,
        } => {
            let outcome = engine
                .initiate(&username, &plan, &phone)
                .await
                .into_diagnostic()?;
            let manual = matches!(outcome, InitiateOutcome::Completed { manual: true, .. });
            let view = engine
                .status(outcome.checkout_id())
                .await
                .into_diagnostic()?;
            print_json(&serde_json::json!({ "payment": view, "manual": manual }))
        }
        Command::Status { checkout_id } => {
            let view = engine
                .status(&CheckoutId::new(checkout_id))
                .await
                .into_diagnostic()?;
            print_json(&view)
        }
        Command::Cancel { checkout_id } => {
            let tx = engine
                .cancel(&CheckoutId::new(checkout_id))
                .await
                .into_diagnostic()?;
            print_json(&StatusView::from(&tx))
        }
        Command::Balance { username } => {
            let entries = match username {
                Some(username) => vec![engine.balance(&username).await.into_diagnostic()?],
                None => engine.balances().await.into_diagnostic()?,
            };
            let stdout = io::stdout();
            LedgerWriter::new(stdout.lock())
                .write_entries(&entries)
                .into_diagnostic()
        }
        Command::History { username } => {
            let history = engine.history(&username).await.into_diagnostic()?;
            print_json(&history)
        }
        Command::Replay { input } => {
            let file = File::open(input).into_diagnostic()?;
            let reader = CallbackReader::new(file);
            println!("checkout_id,outcome");
            for notice in reader.notices() {
                let notice = match notice {
                    Ok(notice) => notice,
                    Err(e) => {
                        eprintln!("Error reading callback: {}", e);
                        continue;
                    }
                };
                let checkout_id = notice.checkout_id.clone();
                let outcome = match dispatch(engine.as_ref(), notice).await {
                    Ok(CompletionOutcome::Completed { words_credited, .. }) => {
                        format!("credited_{}", words_credited)
                    }
                    Ok(CompletionOutcome::AlreadySettled(status)) => status.to_string(),
                    Err(PaymentError::DuplicateCallback(_)) => "duplicate".to_string(),
                    Err(PaymentError::NotFound(_)) => "not_found".to_string(),
                    Err(_) => "error".to_string(),
                };
                println!("{},{}", checkout_id, outcome);
            }
            Ok(())
        }
    }
}
