use std::path::PathBuf;

use clap::{Parser, Subcommand};
use exactly::{
    bag, import_settings, settings, CancelFlag, Outcome, PipelineEvent, Settings, Severity,
    TransferJob, TransferPipeline, UnpackJob, UnpackPipeline,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "exactly")]
#[command(about = "Package, deliver and restore BagIt digital transfers", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Package sources into a bag and optionally serialize, deliver and notify
    Transfer {
        /// Source files or directories to include
        sources: Vec<PathBuf>,

        /// Destination directory the bag is created in
        #[arg(short, long)]
        destination: PathBuf,

        /// Transfer title, used as the bag directory name
        #[arg(short, long)]
        name: String,

        /// Operator name recorded in the transfer summary
        #[arg(short, long)]
        operator: String,

        /// Settings XML file (metadata, recipients, FTP and email accounts)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Serialize the finished bag to a single zip archive
        #[arg(long)]
        serialize: bool,

        /// Upload the finished bag or archive over FTP
        #[arg(long)]
        deliver: bool,

        /// Email a transfer summary to the configured recipients
        #[arg(long)]
        notify: bool,
    },

    /// Validate and restore a received bag to a plain directory tree
    Unpack {
        /// Bag directory or zip serialization to restore
        source: PathBuf,

        /// Directory the payload is restored into
        #[arg(short, long)]
        destination: PathBuf,
    },

    /// Check a bag's completeness and checksums
    Validate {
        /// Bag directory to check
        bag: PathBuf,
    },

    /// Report whether a directory is structured as a bag
    Recognize {
        /// Directory to inspect
        path: PathBuf,
    },

    /// Read a settings XML file and report its contents
    ImportSettings {
        /// Settings XML file
        path: PathBuf,
    },

    /// Write a settings XML file, normalizing an existing one or emitting a skeleton
    ExportSettings {
        /// Existing settings XML to normalize (omit for an empty skeleton)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("exactly={}", log_level))
        .init();

    match args.command {
        Command::Transfer {
            sources,
            destination,
            name,
            operator,
            settings,
            serialize,
            deliver,
            notify,
        } => {
            let settings = load_settings(settings.as_deref())?;
            let job = TransferJob {
                sources,
                destination,
                name,
                operator,
                serialize,
                deliver,
                notify,
            };
            let outcome = run_transfer(settings, job).await?;
            finish(outcome);
        }
        Command::Unpack {
            source,
            destination,
        } => {
            let job = UnpackJob {
                source,
                destination,
            };
            let outcome = run_unpack(job).await?;
            finish(outcome);
        }
        Command::Validate { bag } => {
            let problems = bag::verify_valid(&bag)?;
            if problems.is_empty() {
                info!("{} is a valid bag", bag.display());
            } else {
                for problem in &problems {
                    eprintln!("{}", problem);
                }
                eprintln!("{} is not valid ({} problem(s))", bag.display(), problems.len());
                std::process::exit(1);
            }
        }
        Command::Recognize { path } => {
            if bag::is_bag_structured(&path)? {
                info!("{} is structured as a bag", path.display());
            } else {
                info!("{} is not a bag", path.display());
                std::process::exit(1);
            }
        }
        Command::ImportSettings { path } => {
            let outcome = import_settings(&path)?;
            for warning in &outcome.warnings {
                warn!("{}", warning);
            }
            let s = &outcome.settings;
            info!(
                "{} metadata field(s), {} recipient(s), FTP {}, email {}",
                s.metadata.len(),
                s.recipients.len(),
                if s.ftp.is_some() { "configured" } else { "not configured" },
                if s.mail.is_some() { "configured" } else { "not configured" },
            );
        }
        Command::ExportSettings { input, output } => {
            let loaded = load_settings(input.as_deref())?;
            settings::export_settings(&loaded, &output)?;
            info!("wrote settings to {}", output.display());
        }
    }

    Ok(())
}

fn load_settings(path: Option<&std::path::Path>) -> anyhow::Result<Settings> {
    match path {
        Some(path) => {
            let outcome = import_settings(path)?;
            for warning in &outcome.warnings {
                warn!("{}", warning);
            }
            Ok(outcome.settings)
        }
        None => Ok(Settings::default()),
    }
}

/// Runs the transfer pipeline on a blocking worker while this task drives
/// the progress bar from its events. Ctrl-C raises the cancellation flag;
/// the pipeline observes it at the next stage boundary.
async fn run_transfer(settings: Settings, job: TransferJob) -> anyhow::Result<Outcome> {
    let cancel = CancelFlag::new();
    let (tx, rx) = mpsc::unbounded_channel();

    let ctrl_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, stopping at the next stage boundary");
            ctrl_cancel.cancel();
        }
    });

    let worker = tokio::task::spawn_blocking(move || {
        TransferPipeline::new(&settings, &tx, cancel).run(&job)
    });
    drive_events(rx).await;
    Ok(worker.await?)
}

async fn run_unpack(job: UnpackJob) -> anyhow::Result<Outcome> {
    let cancel = CancelFlag::new();
    let (tx, rx) = mpsc::unbounded_channel();

    let ctrl_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, stopping at the next stage boundary");
            ctrl_cancel.cancel();
        }
    });

    let worker =
        tokio::task::spawn_blocking(move || UnpackPipeline::new(&tx, cancel).run(&job));
    drive_events(rx).await;
    Ok(worker.await?)
}

async fn drive_events(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    let pb = ProgressBar::hidden();
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed")
            .unwrap()
            .progress_chars("█▓▒░ "),
    );

    let mut visible = false;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Stage {
                message, severity, ..
            } => {
                pb.set_message(message.clone());
                if severity != Severity::Info {
                    pb.println(message);
                }
            }
            PipelineEvent::Progress { done, total } => {
                if !visible && total > 0 {
                    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                    visible = true;
                }
                pb.set_length(total);
                pb.set_position(done);
            }
        }
    }
    pb.finish_and_clear();
}

fn finish(outcome: Outcome) {
    match outcome {
        Outcome::Completed => info!("completed successfully"),
        Outcome::CompletedDeliveryFailed => {
            warn!("completed locally, but the FTP transfer failed");
            std::process::exit(2);
        }
        Outcome::Failed(reason) => {
            eprintln!("Error: {}", reason);
            std::process::exit(1);
        }
        Outcome::Cancelled => {
            warn!("cancelled");
            std::process::exit(130);
        }
    }
}
