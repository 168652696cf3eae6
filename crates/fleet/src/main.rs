use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

use vmfleet::{create, list, rm, GlobalOpts};

/// Provision virtual machines from a golden libvirt image.
///
/// vmfleet clones a base domain's disk, injects per-node identity via a
/// cloud-init seed ISO, and defines/starts the resulting domain with virsh.
#[derive(Parser)]
struct Cli {
    #[clap(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Available vmfleet commands.
#[derive(Subcommand)]
enum Commands {
    /// Provision a single node from the fleet file
    Create(create::CreateOpts),

    /// Provision every node in the fleet file, continuing past failures
    #[clap(name = "create-all")]
    CreateAll,

    /// Destroy and undefine a domain (its disk and seed data are kept)
    Rm(rm::RmOpts),

    /// List all domains known to the hypervisor, including stopped ones
    List,
}

/// Install and configure the tracing/logging system.
///
/// Sets up structured logging with environment-based filtering,
/// error layer integration, and console output formatting.
/// Logs are filtered by RUST_LOG environment variable, defaulting to 'info'.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Create(opts) => create::run(&cli.global, opts),
        Commands::CreateAll => create::run_all(&cli.global),
        Commands::Rm(opts) => rm::run(&cli.global, opts),
        Commands::List => list::run(&cli.global),
    }
}
