use clap::Parser;
use mta_config::{AdapterConfig, ContextLayout};
use std::path::PathBuf;

/// Debug adapter bridging DAP clients to the MTA:SA debug backend.
///
/// Speaks DAP over stdio; stdout carries protocol messages only.
#[derive(Debug, Parser)]
#[command(name = "mta-dap", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `MTA_DAP_CONFIG` is used as a fallback. When neither is provided the
    /// adapter uses built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug a single context (unsuffixed backend endpoints) instead of server and client.
    #[arg(long)]
    single_context: bool,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config);
    if cli.single_context {
        config.backend.contexts = ContextLayout::Single;
    }
    mta_dap::hardening::init(&config);
    tracing::info!(
        target: "mta_dap",
        backend = %config.backend.url,
        contexts = ?config.backend.contexts,
        "starting debug adapter"
    );

    mta_dap::server::run_stdio(config.backend).await
}

fn load_config(cli_path: Option<PathBuf>) -> AdapterConfig {
    let path = cli_path.or_else(|| std::env::var_os("MTA_DAP_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return AdapterConfig::default();
    };

    match AdapterConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "mta-dap: failed to load config from {}: {err}; continuing with defaults",
                path.display()
            );
            AdapterConfig::default()
        }
    }
}
