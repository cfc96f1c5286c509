use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use download_tracker::api::DownloadApi;
use download_tracker::config::Settings;
use download_tracker::progress::ProgressStreamClient;
use download_tracker::render::{render_progress_line, render_snapshot_line, render_task_list};
use download_tracker::utils::format_bytes;
use dotenvy::dotenv;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "download-tracker")]
#[command(about = "Submit download tasks and follow their progress")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Stream live progress of a task until it ends")]
    Watch {
        #[arg(help = "Task id")]
        task_id: String,
    },
    #[command(about = "Submit a multi-file download task")]
    Submit {
        #[arg(long, help = "User the task belongs to")]
        user: String,
        #[arg(required = true, help = "Server-side file paths")]
        paths: Vec<String>,
        #[arg(long, help = "Follow the task's progress after submitting")]
        watch: bool,
    },
    #[command(about = "Cancel a task")]
    Cancel {
        #[arg(help = "Task id")]
        task_id: String,
    },
    #[command(about = "Show the state of a task")]
    Status {
        #[arg(help = "Task id")]
        task_id: String,
    },
    #[command(about = "List all tasks")]
    List,
    #[command(about = "Download a single server file")]
    Download {
        #[arg(help = "Server-side file path")]
        file_path: String,
        #[arg(long, short, help = "Local destination")]
        output: PathBuf,
        #[arg(long, help = "Continue a partial download at the end of the output file")]
        resume: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    let settings = Settings::new().context("failed to load configuration")?;
    debug!(base_url = %settings.base_url, "Configuration loaded");

    match command {
        Commands::Watch { task_id } => watch(&settings, &task_id).await,
        Commands::Submit { user, paths, watch: follow } => {
            let api = DownloadApi::new(&settings)?;
            let task_id = api.submit_multi_file_task(&paths, &user).await?;
            println!("{task_id}");
            if follow {
                watch(&settings, &task_id).await
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Commands::Cancel { task_id } => {
            let api = DownloadApi::new(&settings)?;
            let reply = api.cancel_task(&task_id).await?;
            println!("{}", reply.msg);
            Ok(if reply.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Status { task_id } => {
            let api = DownloadApi::new(&settings)?;
            let task = api.task_status(&task_id).await?;
            println!("{}", render_snapshot_line(&task));
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let api = DownloadApi::new(&settings)?;
            let tasks = api.all_tasks().await?;
            println!("{}", render_task_list(&tasks));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Download {
            file_path,
            output,
            resume,
        } => {
            let api = DownloadApi::new(&settings)?;
            let range_start = if resume {
                resume_offset(&output).await?
            } else {
                0
            };
            let written = api
                .download_single_file(&file_path, &output, range_start)
                .await?;
            println!(
                "{} written to {}",
                format_bytes(written, 2),
                output.display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Size of the partial file, or 0 if there is none yet.
async fn resume_offset(output: &Path) -> Result<u64> {
    match tokio::fs::metadata(output).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e).with_context(|| format!("cannot inspect {}", output.display())),
    }
}

async fn watch(settings: &Settings, task_id: &str) -> Result<ExitCode> {
    let client = ProgressStreamClient::from_settings(settings)?;

    let failed = Arc::new(AtomicBool::new(false));
    let message_failed = Arc::clone(&failed);
    let error_failed = Arc::clone(&failed);

    let handle = client.open(
        task_id,
        move |message| {
            if message.is_not_found() {
                message_failed.store(true, Ordering::SeqCst);
            }
            println!("{}", render_progress_line(&message));
        },
        move |error| {
            if error.is_fatal() {
                error_failed.store(true, Ordering::SeqCst);
                eprintln!("{error}");
            }
        },
    );

    tokio::select! {
        () = handle.closed() => {}
        _ = tokio::signal::ctrl_c() => {
            info!(task_id = %task_id, "Interrupted, closing progress stream");
            handle.close();
        }
    }

    Ok(if failed.load(Ordering::SeqCst) {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
