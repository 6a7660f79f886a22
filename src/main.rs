//! neo4j-manager command-line interface.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use neo4j_manager::paths::{default_config_path, get_data_dir};
use neo4j_manager::{
    load_config, Edition, InstancePool, ManagerError, Neo4jVersion, Result, VersionCatalog,
};

#[derive(Parser)]
#[command(name = "neo4j-manager")]
#[command(about = "Provision and supervise local Neo4j instances", long_about = None)]
struct Cli {
    /// Manager configuration file (TOML)
    #[arg(long, env = "NEO4J_MANAGER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the versions that can be provisioned
    Versions,

    /// Create instances and run start, backup, restore and clear on each
    Exercise {
        /// Server version, e.g. 3.2.3
        #[arg(long)]
        version: String,

        /// Use the enterprise edition
        #[arg(long)]
        enterprise: bool,

        /// Number of instances per round
        #[arg(long, default_value = "2")]
        instances: usize,

        /// Number of rounds
        #[arg(long, default_value = "1")]
        rounds: usize,

        /// Where backups are written
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = load_config(&config_path)?;
    let catalog = VersionCatalog::load(config.versions_file.as_deref())?;
    let pool = Arc::new(InstancePool::new(config, catalog)?);

    match cli.command {
        Command::Versions => {
            print_versions(&pool);
            Ok(())
        }
        Command::Exercise {
            version,
            enterprise,
            instances,
            rounds,
            backup_dir,
        } => {
            let edition = if enterprise {
                Edition::Enterprise
            } else {
                Edition::Community
            };
            let version = pool.catalog().find(&version, Some(edition))?.clone();
            let backup_dir = backup_dir.unwrap_or_else(|| get_data_dir().join("backups"));
            exercise(pool, &version, instances, rounds, &backup_dir).await
        }
    }
}

fn print_versions(pool: &InstancePool) {
    for version in pool.versions() {
        let installed = if pool.factory().distributions().is_installed(version) {
            "installed"
        } else {
            "-"
        };
        println!(
            "{:<10} {:<11} {:<10} {}",
            version.version.to_string(),
            version.edition.as_str(),
            installed,
            version.download_url
        );
    }
}

async fn exercise(
    pool: Arc<InstancePool>,
    version: &Neo4jVersion,
    instances: usize,
    rounds: usize,
    backup_dir: &Path,
) -> Result<()> {
    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling in-flight operations");
            ctrl_c_token.cancel();
        }
    });
    let monitor = Arc::clone(&pool).start_runtime_monitor(token.child_token());

    let mut outcome = Ok(());
    for round in 1..=rounds {
        log::info!("Round {}/{}", round, rounds);
        outcome = run_round(&pool, version, instances, round, backup_dir, &token).await;
        if let Err(e) = pool.delete_all().await {
            log::error!("Cleanup after round {} failed: {}", round, e);
        }
        if outcome.is_err() {
            break;
        }
    }

    monitor.abort();
    outcome
}

async fn run_round(
    pool: &InstancePool,
    version: &Neo4jVersion,
    instances: usize,
    round: usize,
    backup_dir: &Path,
    token: &CancellationToken,
) -> Result<()> {
    let ids: Vec<String> = (1..=instances)
        .map(|i| format!("exercise-{round}-{i}"))
        .collect();

    for result in join_all(ids.iter().map(|id| pool.create(version, id, token))).await {
        let info = result?;
        println!(
            "created {} (bolt {}, http {})",
            info.id, info.endpoints.bolt_port, info.endpoints.http_port
        );
    }

    let results = join_all(ids.iter().map(|id| cycle(pool, id, backup_dir, token))).await;
    let failures: Vec<(String, ManagerError)> = ids
        .into_iter()
        .zip(results)
        .filter_map(|(id, result)| result.err().map(|e| (id, e)))
        .collect();
    for (id, e) in &failures {
        println!("{id}: {e}");
    }
    match failures.into_iter().next() {
        Some((_, e)) => Err(e),
        None => Ok(()),
    }
}

async fn cycle(
    pool: &InstancePool,
    id: &str,
    backup_dir: &Path,
    token: &CancellationToken,
) -> Result<()> {
    pool.start(id, token).await?;
    println!("{id}: started");

    let mirror_dir = backup_dir.join(id);
    pool.backup(id, &mirror_dir, true, token).await?;
    let archive = backup_dir.join(format!("{id}.zip"));
    let metadata = pool.backup_archive(id, &archive, false, token).await?;
    println!("{id}: backed up ({})", metadata.created_at);

    pool.restore(id, &mirror_dir, token).await?;
    pool.restore_archive(id, &archive, token).await?;
    println!("{id}: restored");

    pool.clear(id, token).await?;
    println!("{id}: cleared, status {:?}", pool.get(id)?.status);

    pool.stop(id, token).await
}
