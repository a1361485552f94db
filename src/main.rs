use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use bulkload::config::{Config, DEFAULT_CONFIG_FILE};
use bulkload::utils::{format_bytes, format_duration};
use bulkload::{AccountId, DataType, RawFile, UploadEvent, UploadFileRecord, UploadManager, UploadStatus};

#[derive(Parser, Debug)]
#[command(name = "bulkload")]
#[command(about = "Upload seller CSV exports (orders, listings) to the back office")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the accounts the back office suggests for each file
    Suggest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Upload files, one at a time
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Account used for files without a single exact match
        #[arg(long, value_name = "ID")]
        account: Option<AccountId>,

        /// Data type: order or listing (default from config)
        #[arg(long, value_name = "TYPE")]
        data_type: Option<DataType>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    bulkload::init_tracing();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
    let manager = UploadManager::from_config(&config).context("Failed to create upload manager")?;

    match args.command {
        Command::Suggest { files } => suggest(&manager, files).await,
        Command::Upload { files, account, data_type } => upload(&manager, files, account, data_type).await,
    }
}

async fn read_files(files: Vec<PathBuf>) -> Result<Vec<RawFile>> {
    let mut raw_files = Vec::with_capacity(files.len());
    for path in files {
        let file = RawFile::from_path(&path)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        raw_files.push(file);
    }
    Ok(raw_files)
}

async fn intake(manager: &UploadManager, files: Vec<PathBuf>) -> Result<Vec<UploadFileRecord>> {
    let report = manager.add_files(read_files(files).await?).await;
    for rejected in &report.rejected {
        println!("Skipped {}: {}", rejected.name, rejected.reason);
    }

    manager.wait_for_matching().await;
    Ok(manager.records().await)
}

async fn suggest(manager: &UploadManager, files: Vec<PathBuf>) -> Result<()> {
    for record in intake(manager, files).await? {
        println!(
            "{} ({}) detected user: {}",
            record.file.name,
            format_bytes(record.file.size()),
            record.detected_username.as_deref().unwrap_or("-")
        );

        if record.suggested_accounts.is_empty() {
            println!("    no matching accounts");
        }
        for candidate in &record.suggested_accounts {
            let marker = if Some(candidate.account_id) == record.selected_account_id { "*" } else { " " };
            println!(
                "  {} {:>6}  {:<30} {:?}",
                marker, candidate.account_id, candidate.account_name, candidate.match_type
            );
        }
    }

    Ok(())
}

async fn upload(
    manager: &UploadManager,
    files: Vec<PathBuf>,
    account: Option<AccountId>,
    data_type: Option<DataType>,
) -> Result<()> {
    let started = Instant::now();
    let mut names = HashMap::new();

    for record in intake(manager, files).await? {
        names.insert(record.id, record.file.name.clone());
        if let Some(data_type) = data_type {
            manager.select_data_type(record.id, data_type).await?;
        }
        match (record.selected_account_id, account) {
            (Some(account_id), _) => {
                println!("{} -> account {} (exact match)", record.file.name, account_id);
            }
            (None, Some(account_id)) => {
                manager.select_account(record.id, account_id).await?;
                println!("{} -> account {}", record.file.name, account_id);
            }
            (None, None) => {
                println!("{} has no account, pass --account to upload it", record.file.name);
            }
        }
    }

    let mut events = manager.subscribe_events();
    let printer_names = names.clone();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let UploadEvent::StateChanged { id, to: UploadStatus::Uploading, .. } = event {
                let name = printer_names.get(&id).map(String::as_str).unwrap_or("file");
                println!("Uploading {}", name);
            }
        }
    });

    let outcomes = manager.upload_all().await;
    printer.abort();

    for outcome in &outcomes {
        if let Err(err) = &outcome.result {
            let name = names.get(&outcome.id).map(String::as_str).unwrap_or("file");
            if err.is_refusal() {
                println!("Skipped {}: {}", name, err);
            } else {
                println!("Error uploading {}: {}", name, err);
            }
        }
    }

    let records = manager.records().await;
    let mut not_uploaded = 0;
    for record in &records {
        if record.status != UploadStatus::Completed {
            not_uploaded += 1;
        }
        println!(
            "{:<10} {:<40} {}",
            record.status.as_str(),
            record.file.name,
            record.message.as_deref().unwrap_or("")
        );
    }
    println!("Finished in {}", format_duration(started.elapsed()));

    if not_uploaded > 0 {
        anyhow::bail!("{} of {} file(s) were not uploaded", not_uploaded, records.len());
    }

    Ok(())
}
