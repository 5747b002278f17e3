use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(about = "Round-robin network quality probe")]
pub struct CliOpt {
    /// Path to the JSON configuration file (every setting has a default)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// The identifier this node reports under, overriding the configuration file
    #[arg(long)]
    pub node_id: Option<String>,

    /// The IP address of the collector, overriding the configuration file
    #[arg(long)]
    pub collector: Option<IpAddr>,

    /// A pcap stream of radiotap-encapsulated 802.11 frames from the monitor interface, or `-` to
    /// read it from stdin
    ///
    /// Without a capture source, the passive metrics (RSSI, throughput and loss) stay at zero
    #[arg(long)]
    pub capture: Option<PathBuf>,

    /// The duration of the run, after which a per-protocol summary is printed and the program
    /// terminates (runs forever if absent)
    #[arg(long)]
    pub duration_ms: Option<u64>,

    /// Log the reports instead of sending them to the collector
    #[arg(long)]
    pub dry_run: bool,

    /// The default log filter, used unless `RUST_LOG` is set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
