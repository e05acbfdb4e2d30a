use anyhow::Result;
use boardwalk_coordinator::config::{Cli, Command, ServerConfig};
use boardwalk_coordinator::telemetry::Telemetry;
use boardwalk_coordinator::{run, tail};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Tail(args)) = cli.command {
        Telemetry::init_cli()?;
        return tail::run(args).await;
    }

    let telemetry = Telemetry::init(cli.serve.otel_stdout)?;
    let config = ServerConfig::try_from(cli.serve)?;
    info!(
        listen_addr = %config.listen_addr,
        fast_store = %config.fast_store_url,
        backup_store = %config.backup_store_url,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "starting boardwalk coordinator"
    );

    let result = run(config, telemetry.metrics_handle()).await;
    telemetry.shutdown();
    result
}
