use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use boardwalk_core::BackoffConfig;
use clap::{Args, Parser, Subcommand};

use crate::coordinator::CoordinatorConfig;

#[derive(Debug, Parser)]
#[command(
    name = "boardwalk-coordinator",
    author,
    version,
    about = "Authoritative session coordinator for Boardwalk sequencer sessions"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to a running coordinator and print session traffic.
    Tail(TailArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(long, env = "BOARDWALK_LISTEN_ADDR", default_value = "127.0.0.1:8787")]
    pub listen_addr: String,

    /// Store written before every broadcast (`redis://...` or `memory://`).
    #[arg(
        long,
        env = "BOARDWALK_FAST_STORE_URL",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub fast_store_url: String,

    /// Store flushed when the last connection of a session leaves.
    #[arg(
        long,
        env = "BOARDWALK_BACKUP_STORE_URL",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub backup_store_url: String,

    /// Connections that send nothing for this long are disconnected.
    #[arg(long, env = "BOARDWALK_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Expiry for backup records; 0 keeps them forever.
    #[arg(long, env = "BOARDWALK_BACKUP_TTL_SECS", default_value_t = 0)]
    pub backup_ttl_secs: u64,

    /// Outbound frames buffered per connection before it is evicted.
    #[arg(long, env = "BOARDWALK_CONNECTION_BUFFER", default_value_t = 256)]
    pub connection_buffer: usize,

    /// Time allowed for backup flushes during shutdown.
    #[arg(long, env = "BOARDWALK_SHUTDOWN_GRACE_SECS", default_value_t = 5)]
    pub shutdown_grace_secs: u64,

    /// Also export tracing spans to stdout through OpenTelemetry.
    #[arg(long, env = "BOARDWALK_OTEL_STDOUT")]
    pub otel_stdout: bool,
}

#[derive(Debug, Args)]
pub struct TailArgs {
    /// WebSocket endpoint of the session, e.g. ws://127.0.0.1:8787/ws/<id>.
    pub url: String,

    /// Give up after this many consecutive reconnect attempts.
    #[arg(long, default_value_t = 10)]
    pub max_reconnects: u32,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub fast_store_url: String,
    pub backup_store_url: String,
    pub idle_timeout: Duration,
    pub backup_ttl: Option<Duration>,
    pub shutdown_grace: Duration,
    pub coordinator: CoordinatorConfig,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        if args.idle_timeout_secs == 0 {
            bail!("idle timeout must be at least one second");
        }
        if args.connection_buffer == 0 {
            bail!("connection buffer must hold at least one frame");
        }
        Ok(ServerConfig {
            listen_addr,
            fast_store_url: args.fast_store_url,
            backup_store_url: args.backup_store_url,
            idle_timeout: Duration::from_secs(args.idle_timeout_secs),
            backup_ttl: (args.backup_ttl_secs > 0)
                .then(|| Duration::from_secs(args.backup_ttl_secs)),
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
            coordinator: CoordinatorConfig {
                connection_buffer: args.connection_buffer,
                backup_retry: BackoffConfig::default(),
                ..CoordinatorConfig::default()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_parse_into_server_config() {
        let cli = Cli::try_parse_from(["boardwalk-coordinator"]).expect("parse");
        assert!(cli.command.is_none());
        assert!(!cli.serve.otel_stdout);
        let config = ServerConfig::try_from(cli.serve).expect("config");
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.backup_ttl, None);
        assert_eq!(config.coordinator.connection_buffer, 256);
    }

    #[test_timeout::timeout]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "boardwalk-coordinator",
            "--listen-addr",
            "0.0.0.0:9000",
            "--fast-store-url",
            "memory://",
            "--backup-ttl-secs",
            "3600",
            "--otel-stdout",
        ])
        .expect("parse");
        assert!(cli.serve.otel_stdout);
        let config = ServerConfig::try_from(cli.serve).expect("config");
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.fast_store_url, "memory://");
        assert_eq!(config.backup_ttl, Some(Duration::from_secs(3600)));
    }

    #[test_timeout::timeout]
    fn rejects_bad_listen_address() {
        let cli = Cli::try_parse_from(["boardwalk-coordinator", "--listen-addr", "nowhere"])
            .expect("parse");
        assert!(ServerConfig::try_from(cli.serve).is_err());
    }

    #[test_timeout::timeout]
    fn tail_subcommand_takes_url() {
        let cli = Cli::try_parse_from(["boardwalk-coordinator", "tail", "ws://127.0.0.1:1/ws/s1"])
            .expect("parse");
        match cli.command {
            Some(Command::Tail(args)) => {
                assert_eq!(args.url, "ws://127.0.0.1:1/ws/s1");
                assert_eq!(args.max_reconnects, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
