use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use lodestake_lib::commands;
use lodestake_lib::config::AppConfig;
use lodestake_lib::indexer::BlockfrostIndexer;
use lodestake_lib::wallet::WalletManager;
use lodestake_sdk::{CancelFlag, LodestakeNode};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stake delegation and batch payouts for multi-asset UTXO wallets", long_about = None)]
struct Cli {
    /// Directory holding lodestake.json
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the wallet's spendable UTXOs and what was filtered out
    Utxos,
    /// Delegate the wallet's stake to a pool or voting delegate
    Delegate {
        #[arg(long, conflicts_with = "drep")]
        pool: Option<String>,
        #[arg(long)]
        drep: Option<String>,
        /// Do not retry with the single-input backend
        #[arg(long)]
        no_fallback: bool,
    },
    /// Pay every recipient in a JSON file, in batches
    Send { recipients: PathBuf },
    /// Check a recipients file without touching the network
    Validate { recipients: PathBuf },
    /// Look up the addresses holding `$handle`s
    Resolve {
        #[arg(required = true)]
        handles: Vec<String>,
    },
    /// Print a fresh 24-word mnemonic
    NewMnemonic,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| format!("json error: {e}"))?;
    println!("{json}");
    Ok(())
}

fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::NewMnemonic => print_json(&commands::new_mnemonic()?),
        Command::Validate { recipients } => {
            let errors = commands::validate_file(&recipients)?;
            print_json(&errors)?;
            if errors.is_empty() {
                Ok(())
            } else {
                Err(format!("{} problem(s) in {}", errors.len(), recipients.display()))
            }
        }
        command => run_online(&cli.data_dir, command),
    }
}

fn run_online(data_dir: &Path, command: Command) -> Result<(), String> {
    let needs_wallet = !matches!(command, Command::Resolve { .. });
    let (config, wallet) = if needs_wallet {
        let (config, wallet) = WalletManager::open(data_dir).map_err(|e| e.to_string())?;
        (config, Some(wallet))
    } else {
        (AppConfig::load(data_dir).map_err(|e| e.to_string())?, None)
    };

    // The blocking HTTP client must be created and dropped outside the runtime.
    let indexer = Arc::new(BlockfrostIndexer::from_config(&config).map_err(|e| e.to_string())?);
    let node = LodestakeNode::new(
        indexer.clone(),
        config.network,
        config.protocol.clone(),
        config.batch_config(),
    )
    .with_registry(indexer);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;

    let result = runtime.block_on(async {
        let wallet = || wallet.as_ref().ok_or_else(|| "wallet not loaded".to_string());
        match command {
            Command::Utxos => print_json(&commands::list_utxos(&node, wallet()?).await?),
            Command::Delegate {
                pool,
                drep,
                no_fallback,
            } => {
                let target = commands::parse_target(pool, drep)?;
                let allow_fallback = config.allow_fallback && !no_fallback;
                let result = commands::delegate(&node, wallet()?, target, allow_fallback).await?;
                print_json(&result)?;
                match result.error {
                    Some(e) if !result.success => Err(e),
                    _ => Ok(()),
                }
            }
            Command::Send { recipients } => {
                let list = commands::load_recipients(&recipients)?;
                let cancel = CancelFlag::new();
                let flag = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        log::warn!("interrupt received, stopping after the current batch");
                        flag.cancel();
                    }
                });
                let summary = commands::send_batched(&node, wallet()?, list, cancel, |batch| {
                    log::info!(
                        "batch {} ({} recipients): {}",
                        batch.batch_index,
                        batch.recipient_count,
                        batch.tx_hash.as_deref().or(batch.error.as_deref()).unwrap_or("-")
                    );
                })
                .await?;
                print_json(&summary)?;
                summary.into_result().map(|_| ()).map_err(|e| e.to_string())
            }
            Command::Resolve { handles } => {
                print_json(&commands::resolve_handles(&node, handles).await?)
            }
            Command::Validate { .. } | Command::NewMnemonic => Ok(()),
        }
    });
    drop(runtime);
    drop(node);
    result
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("reqwest", log::LevelFilter::Warn)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
