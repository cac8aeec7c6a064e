//! squall - delta releases and atomic updates

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use squall_core::{Config, Reporter};
use tracing_subscriber::EnvFilter;

use squall_cli::cmd;
use squall_cli::ui::ConsoleReporter;
use squall_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new(cli.quiet));

    match cli.command {
        Commands::Pack { package, out_dir } => cmd::package::pack(&package, &out_dir, &*reporter),
        Commands::Releasify {
            package,
            releases,
            backend,
        } => cmd::package::releasify(&package, &releases, backend, &config, &*reporter).await,
        Commands::RebuildReleases { releases } => cmd::releases::rebuild(&releases, &*reporter),
        Commands::Upload { releases, to, keep } => {
            cmd::sync::upload(&releases, &to, keep, &config, reporter).await
        }
        Commands::Download { from, releases } => {
            cmd::sync::download(&from, &releases, &config, reporter).await
        }
        Commands::Apply {
            releases,
            install,
            to_version,
            relaunch,
            no_process_control,
        } => {
            let args = cmd::apply::ApplyArgs {
                releases: &releases,
                install: &install,
                target: to_version.as_ref(),
                relaunch,
                process_control: !no_process_control,
            };
            cmd::apply::apply(args, &config, &*reporter).await
        }
    }
}
