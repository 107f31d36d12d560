#![forbid(unsafe_code)]

//! Change-verification daemon: builds and verifies revisions proposed
//! to a Gerrit-style code-review service and posts Verified scores.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use verifier_core::ChangeFilter;
use verifier_daemon::dispatch::Dispatcher;
use verifier_daemon::locks::LockRegistry;
use verifier_daemon::service::{ReviewService, SshGerrit};

#[derive(Debug, Parser)]
#[command(
    name = "verifier-daemon",
    version,
    about = "Builds and verifies revisions from a code-review service"
)]
struct Cli {
    /// Review-service instance (ssh host) to connect to.
    instance: String,

    /// Project whose changes are verified.
    project: String,

    /// Branch whose changes are verified.
    branch: String,

    /// Verification program, invoked as `PROGRAM <revision>`.
    program: PathBuf,

    /// Override the host from INSTANCE for the ssh connection.
    #[arg(long)]
    host: Option<String>,

    /// Review-service ssh port.
    #[arg(long, default_value_t = 29418)]
    port: u16,

    /// Service-account user: the ssh identity, and the identity whose
    /// uploads and revoked verifications are picked up.
    #[arg(long, default_value = "verifier")]
    user: String,

    /// Working root for build locks; must not already exist.
    #[arg(long)]
    work_root: Option<PathBuf>,

    /// Maximum concurrent builds (defaults to available parallelism).
    #[arg(long)]
    build_slots: Option<usize>,

    /// Log level (env-filter syntax).
    #[arg(long, default_value = "info")]
    log: String,
}

fn default_work_root(project: &str, branch: &str) -> PathBuf {
    let sanitize = |s: &str| s.replace(['/', ' '], "-");
    std::env::temp_dir().join(format!("verifier-{}-{}", sanitize(project), sanitize(branch)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::new(cli.log.clone()))
        .init();

    let gerrit = SshGerrit {
        host: cli.host.clone().unwrap_or_else(|| cli.instance.clone()),
        port: cli.port,
        user: cli.user.clone(),
    };
    let service: Arc<dyn ReviewService> = Arc::new(gerrit);

    service
        .check_connectivity()
        .await
        .with_context(|| format!("review service at {} unreachable", cli.instance))?;

    let work_root = cli
        .work_root
        .clone()
        .unwrap_or_else(|| default_work_root(&cli.project, &cli.branch));
    let locks = LockRegistry::create(&work_root).with_context(|| {
        format!(
            "creating work root {} (is another daemon running for this project/branch?)",
            work_root.display()
        )
    })?;

    let build_slots = cli.build_slots.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let filter = ChangeFilter {
        project: cli.project,
        branch: cli.branch,
        account: cli.user,
    };

    let dispatcher = Dispatcher::new(service, filter, locks.clone(), cli.program, build_slots);

    tracing::info!(build_slots, work_root = %work_root.display(), "daemon starting");
    tokio::select! {
        _ = dispatcher.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    locks.remove_root();
    Ok(())
}
