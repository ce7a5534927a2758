//! # CLI Interface
//!
//! Command-line structure for `trustmesh-node`, built with `clap` derive.
//! Every flag also reads from a `TRUSTMESH_*` environment variable so the
//! same binary can be driven from container manifests.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use trustmesh_protocol::config::{
    DEFAULT_BOOTSTRAP_DENSITY, DEFAULT_METRICS_PORT, DEFAULT_P2P_PORT, GOSSIP_FANOUT,
};

/// TrustMesh node.
///
/// Runs either a participating peer, which proposes and rates every round,
/// or the one-shot bootstrap rendezvous that introduces peers to each
/// other.
#[derive(Parser, Debug)]
#[command(
    name = "trustmesh-node",
    about = "TrustMesh reputation-weighted consensus node",
    version,
    propagate_version = true
)]
pub struct TrustMeshCli {
    /// Default log level when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "TRUSTMESH_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, env = "TRUSTMESH_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a participating peer.
    Run(RunArgs),
    /// Run the bootstrap rendezvous once, then exit.
    Bootstrap(BootstrapArgs),
    /// Create the data directory and a fresh node key.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct DataDirArg {
    /// Node data directory: key, peer directory and winner files.
    #[arg(long, short = 'd', env = "TRUSTMESH_DATA_DIR", default_value = "./trustmesh-data")]
    pub data_dir: PathBuf,
}

/// Arguments for the `run` subcommand.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// P2P listening port.
    #[arg(long, short = 'p', env = "TRUSTMESH_PORT", default_value_t = DEFAULT_P2P_PORT)]
    pub port: u16,

    /// Host other nodes should dial; combined with `--port` into the
    /// advertised address.
    #[arg(long, env = "TRUSTMESH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Round length in seconds.
    #[arg(long, env = "TRUSTMESH_INTERVAL", default_value_t = 10)]
    pub interval: u64,

    /// Bootstrap node address to report to at startup.
    #[arg(long, short = 'b', env = "TRUSTMESH_BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// Prometheus metrics port.
    #[arg(long, env = "TRUSTMESH_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Peers contacted per broadcast.
    #[arg(long, env = "TRUSTMESH_FANOUT", default_value_t = GOSSIP_FANOUT)]
    pub fanout: usize,

    /// Keep directory reputations fixed instead of redrawing them every
    /// round.
    #[arg(long, env = "TRUSTMESH_STATIC_REPUTATION")]
    pub static_reputation: bool,
}

/// Arguments for the `bootstrap` subcommand.
#[derive(Args, Debug)]
pub struct BootstrapArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Listening port for reports.
    #[arg(long, short = 'p', env = "TRUSTMESH_PORT", default_value_t = DEFAULT_P2P_PORT)]
    pub port: u16,

    /// Seconds to collect reports before replying.
    #[arg(long, env = "TRUSTMESH_WAIT_TIME", default_value_t = 30)]
    pub wait_time: u64,

    /// Peers handed to each reporter.
    #[arg(long, env = "TRUSTMESH_DENSITY", default_value_t = DEFAULT_BOOTSTRAP_DENSITY)]
    pub density: usize,
}

/// Arguments for the `init` subcommand.
#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub data: DataDirArg,

    /// Overwrite an existing key.
    #[arg(long)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        TrustMeshCli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = TrustMeshCli::try_parse_from(["trustmesh-node", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.port, DEFAULT_P2P_PORT);
        assert_eq!(args.interval, 10);
        assert_eq!(args.fanout, GOSSIP_FANOUT);
        assert!(args.bootstrap.is_none());
        assert!(!args.static_reputation);
        assert_eq!(cli.log_format, LogFormatArg::Pretty);
    }

    #[test]
    fn run_flags() {
        let cli = TrustMeshCli::try_parse_from([
            "trustmesh-node",
            "--log-format",
            "json",
            "run",
            "--port",
            "7000",
            "--host",
            "10.0.0.5",
            "--bootstrap",
            "10.0.0.1:9740",
            "--interval",
            "2",
            "--static-reputation",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormatArg::Json);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.port, 7000);
        assert_eq!(args.host, "10.0.0.5");
        assert_eq!(args.bootstrap.as_deref(), Some("10.0.0.1:9740"));
        assert_eq!(args.interval, 2);
        assert!(args.static_reputation);
    }

    #[test]
    fn bootstrap_flags() {
        let cli = TrustMeshCli::try_parse_from([
            "trustmesh-node",
            "bootstrap",
            "--wait-time",
            "5",
            "--density",
            "3",
        ])
        .unwrap();
        let Commands::Bootstrap(args) = cli.command else {
            panic!("expected bootstrap");
        };
        assert_eq!(args.wait_time, 5);
        assert_eq!(args.density, 3);
    }
}
