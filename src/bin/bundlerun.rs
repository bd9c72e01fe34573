//! bundlerun - bundle packaging, submission and worker CLI
//!
//! ## Usage
//!
//! ```sh
//! bundlerun bundle <dir> [--out <dir>]
//! bundlerun verify <archive>
//! bundlerun submit <dir>
//! bundlerun worker [--engine docker] [--once]
//! bundlerun requeue
//! ```
//!
//! Settings come from `BUNDLERUN_*` environment variables (see
//! [`bundlerun::WorkerSettings`]). Logging is controlled by `RUST_LOG`.

use bundlerun::bundle::{BundleInfo, archive_entries, create_bundle, create_bundle_in};
use bundlerun::{
    CycleOutcome, Engine, Job, JobQueue, OPEN_CHANNEL, RuntimeKind, Storage, Worker,
    WorkerSettings, new_engine,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Bundle { dir: PathBuf, out: Option<PathBuf> },
    Verify { archive: PathBuf },
    Submit { dir: PathBuf },
    Worker { engine: Option<String>, once: bool },
    Requeue,
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "bundle" => {
            if args.len() < 3 {
                return Err("bundle requires <dir>".to_string());
            }
            let dir = PathBuf::from(&args[2]);
            let mut out = None;
            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--out" | "-o" => {
                        if i + 1 < args.len() {
                            out = Some(PathBuf::from(&args[i + 1]));
                            i += 2;
                        } else {
                            return Err("--out requires a path".to_string());
                        }
                    }
                    other => return Err(format!("unknown option: {}", other)),
                }
            }
            Ok(Command::Bundle { dir, out })
        }
        "verify" => {
            if args.len() < 3 {
                return Err("verify requires <archive>".to_string());
            }
            Ok(Command::Verify {
                archive: PathBuf::from(&args[2]),
            })
        }
        "submit" => {
            if args.len() < 3 {
                return Err("submit requires <dir>".to_string());
            }
            Ok(Command::Submit {
                dir: PathBuf::from(&args[2]),
            })
        }
        "worker" => {
            let mut engine = None;
            let mut once = false;
            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--engine" | "-e" => {
                        if i + 1 < args.len() {
                            engine = Some(args[i + 1].clone());
                            i += 2;
                        } else {
                            return Err("--engine requires a value".to_string());
                        }
                    }
                    "--once" => {
                        once = true;
                        i += 1;
                    }
                    other => return Err(format!("unknown option: {}", other)),
                }
            }
            Ok(Command::Worker { engine, once })
        }
        "requeue" => Ok(Command::Requeue),
        "version" | "--version" | "-V" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command: {}", other)),
    }
}

fn load_settings() -> Result<WorkerSettings, String> {
    WorkerSettings::from_env().map_err(|e| e.to_string())
}

// =============================================================================
// Command Implementations
// =============================================================================

fn cmd_bundle(dir: PathBuf, out: Option<PathBuf>) -> Result<(), String> {
    let bundle = match out {
        Some(out) => create_bundle_in(&dir, &out),
        None => create_bundle(&dir),
    }
    .map_err(|e| e.to_string())?;

    println!("{}", bundle.archive_path().display());
    Ok(())
}

fn cmd_verify(archive: PathBuf) -> Result<(), String> {
    let bundle = BundleInfo::from_archive(&archive).map_err(|e| e.to_string())?;
    bundle.verify().map_err(|e| e.to_string())?;
    let entries = archive_entries(&archive).map_err(|e| e.to_string())?;

    println!("name:    {}", bundle.config().name());
    println!("digest:  {}", bundle.digest());
    println!("entries: {}", entries.len());
    for entry in entries {
        println!("  {}", entry);
    }
    Ok(())
}

async fn cmd_submit(dir: PathBuf) -> Result<(), String> {
    let settings = load_settings()?;
    let storage = settings.local_storage().map_err(|e| e.to_string())?;
    let queue = settings.spool_job_queue().map_err(|e| e.to_string())?;

    let scratch = tempfile::TempDir::new().map_err(|e| e.to_string())?;
    let bundle = create_bundle_in(&dir, scratch.path()).map_err(|e| e.to_string())?;
    let id = storage.upload(&bundle).await.map_err(|e| e.to_string())?;

    let job = Job::new(storage.uri_for(&id)).map_err(|e| e.to_string())?;
    queue.submit_new_request(&job).await.map_err(|e| e.to_string())?;

    println!("{}", job.id());
    Ok(())
}

async fn cmd_worker(engine: Option<String>, once: bool) -> Result<(), String> {
    let settings = load_settings()?;
    let kind = match engine {
        Some(name) => name.parse::<RuntimeKind>().map_err(|e| e.to_string())?,
        None => RuntimeKind::default(),
    };

    let engine: Arc<dyn Engine> = Arc::from(new_engine(kind, &settings));
    let storage = Arc::new(settings.local_storage().map_err(|e| e.to_string())?);
    let queue = Arc::new(settings.spool_job_queue().map_err(|e| e.to_string())?);

    let worker = Worker::new(engine, queue, storage)
        .with_workdir(settings.workdir.clone())
        .with_receive_timeout(settings.receive_timeout)
        .with_output_base(settings.output_base.clone());

    if once {
        return match worker.execute_next_job().await.map_err(|e| e.to_string())? {
            CycleOutcome::Idle => {
                println!("no job available");
                Ok(())
            }
            CycleOutcome::Completed { job, output } => {
                print!("{}", output.stdout_lossy());
                eprint!("{}", output.stderr_lossy());
                info!("Completed {}", job);
                Ok(())
            }
        };
    }

    let handle = worker.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.signal();
        }
    });

    let stats = worker.run().await;
    println!(
        "completed: {}  failed: {}  idle: {}",
        stats.completed, stats.failed, stats.idle
    );
    Ok(())
}

async fn cmd_requeue() -> Result<(), String> {
    let settings = load_settings()?;
    let channel = settings
        .spool_channel(OPEN_CHANNEL)
        .map_err(|e| e.to_string())?;
    let restored = channel.requeue_inflight().await.map_err(|e| e.to_string())?;
    println!("requeued {} messages", restored);
    Ok(())
}

fn cmd_version() {
    println!("bundlerun version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"bundlerun - content-addressed job bundles on container engines

USAGE:
    bundlerun <command> [options]

COMMANDS:
    bundle <dir> [--out <dir>]   Package a directory into <sha256>.bundle
    verify <archive>             Check an archive's digest and list entries
    submit <dir>                 Package, upload and enqueue a directory
    worker [--engine <name>]     Process jobs until Ctrl-C
    requeue                      Restore unacknowledged open-queue messages
    version                      Show version info
    help                         Show this help

OPTIONS:
    --out, -o <dir>        Output directory (default: system temp dir)
    --engine, -e <name>    Execution engine: docker (default)
    --once                 Process at most one job, then exit

ENVIRONMENT:
    BUNDLERUN_ROOT, BUNDLERUN_WORKDIR, BUNDLERUN_BUCKET,
    BUNDLERUN_RECEIVE_TIMEOUT_SECS, BUNDLERUN_OUTPUT_BASE, BUNDLERUN_DOCKER,
    RUST_LOG

EXAMPLES:
    bundlerun bundle ./my-job --out ./dist
    bundlerun submit ./my-job
    RUST_LOG=debug bundlerun worker
"#
    );
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match parse_args() {
        Ok(cmd) => {
            let result = match cmd {
                Command::Bundle { dir, out } => cmd_bundle(dir, out),
                Command::Verify { archive } => cmd_verify(archive),
                Command::Submit { dir } => cmd_submit(dir).await,
                Command::Worker { engine, once } => cmd_worker(engine, once).await,
                Command::Requeue => cmd_requeue().await,
                Command::Version => {
                    cmd_version();
                    Ok(())
                }
                Command::Help => {
                    cmd_help();
                    Ok(())
                }
            };

            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
