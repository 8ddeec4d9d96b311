use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcp-the-force", version, about = "Multi-provider AI model gateway")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project directory the gateway operates on (defaults to the current
    /// directory).
    #[arg(long)]
    project_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".parse().expect("static filter"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = mcp_the_force::config::Settings::load(cli.config.as_deref())?;
    if cli.project_dir.is_some() {
        settings.project_dir = cli.project_dir;
    }

    let gateway = mcp_the_force::server::bootstrap(settings)?;
    gateway.serve_stdio().await
}
