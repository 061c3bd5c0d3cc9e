use anyhow::Result;
use clap::Parser;
use pacer_rate_limit::PacerConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pacer image upload relay", long_about = None)]
struct Args {
    /// Configuration file layered over the bundled defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long)]
    bind: Option<String>,

    /// Directory for persisted rate-limit state
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    pacer_server::init_tracing(args.json_logs)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    let mut config = match &args.config {
        Some(path) => PacerConfig::from_file(path)?,
        None => PacerConfig::load()?,
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(state_dir) = args.state_dir {
        config.server.state_dir = Some(state_dir);
    }

    info!(
        bind = %config.server.bind,
        state_dir = %config.server.resolved_state_dir().display(),
        "Starting Pacer relay"
    );

    pacer_server::serve(config).await?;
    Ok(())
}
