use clap::Parser;
use idxlist::{config::Config, server};

#[derive(Debug, Parser)]
#[command(name = "idxlist", version, about = "MongoDB wire-compatible index catalog server")]
struct Args {
    /// Path to a TOML config file
    #[arg(long, env = "IDXLIST_CONFIG", default_value = "config.toml")]
    config: String,

    /// Overrides `listen_addr` from the config file
    #[arg(long)]
    listen_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    // Initialize logging with env filter, e.g.: RUST_LOG=info,idxlist=debug
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let args = Args::parse();
    let mut cfg = Config::load_from(&args.config)?;
    if let Some(addr) = args.listen_addr {
        cfg.listen_addr = addr;
    }
    tracing::info!(listen_addr = %cfg.listen_addr, "starting idxlist");

    if let Err(e) = server::run(cfg).await {
        tracing::error!(error = %format!("{e:?}"), "server terminated with error");
        return Err(e.into());
    }

    Ok(())
}
