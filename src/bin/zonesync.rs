//! Entry point: loads configuration, sets up logging, and runs the
//! supervisor until a shutdown signal arrives (spec §6 "CLI").

use std::path::PathBuf;

use clap::Parser;

use zonesync::config::Settings;
use zonesync::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "zonesync")]
#[command(author = "zonesync contributors")]
#[command(version)]
#[command(about = "Keeps Cloudflare DNS records in sync with a reverse-proxy fleet's hostnames", long_about = None)]
struct Cli {
    /// Directory Docker/Podman-style secrets files are read from.
    #[arg(long, env = "SECRETS_DIR", default_value = "/var/run")]
    secrets_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match Settings::load_from(&cli.secrets_dir) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    let _logging_guard = zonesync::logging::init(&settings);

    tracing::info!(
        zones = settings.zones.len(),
        docker_poll = settings.enable_docker_poll,
        traefik_poll = settings.enable_traefik_poll,
        dry_run = settings.dry_run,
        "zonesync starting"
    );

    let exit_code = Supervisor::new(settings).run().await;
    std::process::exit(exit_code);
}
