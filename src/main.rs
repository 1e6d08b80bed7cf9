use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;

use shipment_tracker::{
    config::Config,
    connection::ConnectionManager,
    error::ShipmentError,
    gateway::LedgerGateway,
    models::{Identity, ShipmentRecord, WriteCheck, sender_indices},
    orchestrator::{NewShipment, ShipmentOrchestrator},
    scheduler,
    session::{ConnectionState, SessionStore},
    wallet::{KeystoreWallet, WalletProvider},
};

#[derive(Parser)]
#[command(author, version, about = "Track shipments recorded on the tracking contract", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect the wallet and show the session
    Connect,
    /// Create a shipment and pay its price
    Create {
        /// Receiver address
        #[arg(long)]
        receiver: String,
        /// Pickup date, e.g. 2024-05-01 or 2024-05-01T09:30, or epoch milliseconds
        #[arg(long)]
        pickup_time: String,
        #[arg(long)]
        distance: u64,
        /// Price in whole currency units, e.g. 0.25
        #[arg(long)]
        price: String,
    },
    /// Mark one of your shipments as in transit
    Start {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        index: u64,
    },
    /// Mark one of your shipments as delivered
    Complete {
        #[arg(long)]
        receiver: String,
        #[arg(long)]
        index: u64,
    },
    /// Show one of your shipments
    Get {
        #[arg(long)]
        index: u64,
    },
    /// List every shipment on the ledger
    List,
    /// Count shipments sent by an account (default: the connected one)
    Count {
        #[arg(long)]
        account: Option<String>,
    },
    /// Keep the session in sync with the ledger on the configured schedule
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(build_orchestrator(&config)?);
    orchestrator.connection().probe_existing_session().await?;

    if let Err(e) = run(cli, &config, orchestrator).await {
        match e.downcast_ref::<ShipmentError>() {
            Some(shipment_error) => {
                eprintln!("Error: {}", shipment_error);
                eprintln!("{}", shipment_error.remedy().message());
            }
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(config: &Config) -> Result<ShipmentOrchestrator> {
    let session = SessionStore::new(config.app_name.clone());

    let provider = if config.wallet_keys.is_empty() {
        None
    } else {
        let wallet: Arc<dyn WalletProvider> = Arc::new(KeystoreWallet::from_hex_keys(&config.wallet_keys)?);
        Some(wallet)
    };

    let connection = Arc::new(ConnectionManager::new(provider, session));
    let gateway = LedgerGateway::from_config(config)?;

    Ok(ShipmentOrchestrator::new(
        connection,
        gateway,
        config.orchestrator_settings(),
    ))
}

async fn run(cli: Cli, config: &Config, orchestrator: Arc<ShipmentOrchestrator>) -> Result<()> {
    let json = cli.json;

    match cli.command {
        Commands::Connect => {
            orchestrator.connection().request_connection().await?;
            orchestrator.refresh_session().await?;
            let snapshot = orchestrator.session().snapshot();
            if json {
                print_json(&snapshot)?;
            } else {
                println!("{}", snapshot.app_name);
                match &snapshot.connection {
                    ConnectionState::Connected(identity) => println!("Account: {}", identity),
                    other => println!("Account: {:?}", other),
                }
                if let Some(count) = snapshot.shipment_count {
                    println!("Shipments: {}", count);
                }
            }
        }
        Commands::Create {
            receiver,
            pickup_time,
            distance,
            price,
        } => {
            let shipment = NewShipment {
                receiver,
                pickup_time,
                distance,
                price,
            };
            match orchestrator.create_shipment(&shipment).await {
                Ok(receipt) => {
                    if json {
                        print_json(&receipt)?;
                    } else {
                        println!("✅ Shipment #{} created", receipt.index);
                        println!("🔗 Transaction: {}", receipt.transaction.tx_hash);
                    }
                }
                Err(ShipmentError::ConfirmationTimedOut(write)) => {
                    println!("⏳ Transaction {} not confirmed yet, re-checking the ledger", write.tx_hash);
                    match orchestrator.recheck(&write).await? {
                        WriteCheck::LikelySucceeded { index, record } => {
                            println!("ℹ️  Shipment #{} is on the ledger; it likely succeeded", index);
                            print_shipment(&format!("Shipment #{}", index), &record);
                        }
                        WriteCheck::StillUnknown => {
                            println!("ℹ️  Not visible yet. Check again before resubmitting.");
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Start { receiver, index } => {
            let receipt = orchestrator.start_shipment(&receiver, index).await?;
            report_transition(&orchestrator, json, index, &receipt.tx_hash).await?;
        }
        Commands::Complete { receiver, index } => {
            let receipt = orchestrator.complete_shipment(&receiver, index).await?;
            report_transition(&orchestrator, json, index, &receipt.tx_hash).await?;
        }
        Commands::Get { index } => {
            connect_if_needed(&orchestrator).await?;
            let record = orchestrator.get_shipment(index).await?;
            if json {
                print_json(&record)?;
            } else {
                print_shipment(&format!("Shipment #{}", index), &record);
            }
        }
        Commands::List => {
            let shipments = orchestrator.get_all_shipment().await?;
            let indices = sender_indices(&shipments);
            if json {
                let listed: Vec<ListedShipment> = shipments
                    .iter()
                    .zip(&indices)
                    .map(|(record, index)| ListedShipment { index: *index, record })
                    .collect();
                print_json(&listed)?;
            } else {
                for (row, (record, index)) in shipments.iter().zip(&indices).enumerate() {
                    print_shipment(&format!("Row {} | sender's shipment #{}", row + 1, index), record);
                    println!("================================");
                }
                println!("{} shipment(s)", shipments.len());
            }
        }
        Commands::Count { account } => {
            let account = account.as_deref().map(Identity::parse).transpose()?;
            if account.is_none() {
                connect_if_needed(&orchestrator).await?;
            }
            let count = orchestrator.get_shipments_count(account.as_ref()).await?;
            if json {
                print_json(&count)?;
            } else {
                println!("{}", count);
            }
        }
        Commands::Watch => {
            let follower = orchestrator.connection().follow_account_changes();
            println!("Sync schedule: {}", config.sync_schedule);
            println!("================================");
            scheduler::create_and_run_scheduler(&config.sync_schedule, orchestrator).await?;
            if let Some(follower) = follower {
                follower.abort();
            }
        }
    }

    Ok(())
}

async fn connect_if_needed(orchestrator: &ShipmentOrchestrator) -> Result<()> {
    if orchestrator.current_identity().is_none() {
        orchestrator.connection().request_connection().await?;
    }
    Ok(())
}

/// Re-reads the shipment so the printed state is what the ledger holds.
async fn report_transition(orchestrator: &ShipmentOrchestrator, json: bool, index: u64, tx_hash: &str) -> Result<()> {
    let record = orchestrator.get_shipment(index).await?;
    if json {
        print_json(&record)?;
    } else {
        println!("✅ Confirmed in {}", tx_hash);
        print_shipment(&format!("Shipment #{}", index), &record);
    }
    Ok(())
}

/// A row of `list`: the index is the one `start` and `complete` take.
#[derive(Serialize)]
struct ListedShipment<'a> {
    index: u64,
    #[serde(flatten)]
    record: &'a ShipmentRecord,
}

fn print_shipment(heading: &str, record: &ShipmentRecord) {
    println!("📦 {}", heading);
    println!("   Sender: {}", record.sender);
    println!("   Receiver: {}", record.receiver);
    println!("   Pickup: {}", format_millis(record.pickup_time));
    if let Some(delivery_time) = record.delivery_time {
        println!("   Delivered: {}", format_millis(delivery_time));
    }
    println!("   Distance: {}", record.distance);
    println!("   Price: {}", record.price);
    println!("   Status: {}", record.status);
    println!("   Paid: {}", if record.is_paid { "yes" } else { "no" });
}

fn format_millis(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|datetime| datetime.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
