//! Command-line interface.
//!
//! Every flag is optional and falls back to a `VBOSTREAM_*` environment
//! variable, then to the config file, then to the built-in default.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::streaming::Encoding;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "vbostream",
    version,
    about = "Stream per-tick GPU buffer sets to browser clients, paced by their acknowledgements"
)]
pub struct Cli {
    /// Config file (defaults to <config dir>/vbostream/config.toml when present)
    #[arg(long, env = "VBOSTREAM_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Address for the WebSocket control listener
    #[arg(long, env = "VBOSTREAM_CONTROL_BIND", value_name = "ADDR")]
    pub control_bind: Option<SocketAddr>,

    /// Address for the HTTP data listener
    #[arg(long, env = "VBOSTREAM_DATA_BIND", value_name = "ADDR")]
    pub data_bind: Option<SocketAddr>,

    /// Simulation step interval in milliseconds
    #[arg(long, env = "VBOSTREAM_TICK_INTERVAL_MS", value_name = "MS")]
    pub tick_interval_ms: Option<u64>,

    /// Close sessions stuck waiting on a client for this long (0 disables)
    #[arg(long, env = "VBOSTREAM_STALL_TIMEOUT_SECS", value_name = "SECS")]
    pub stall_timeout_secs: Option<u64>,

    /// Content coding for buffer payloads
    #[arg(long, env = "VBOSTREAM_ENCODING", value_enum)]
    pub encoding: Option<Encoding>,

    /// Compression level (gzip 0-9, zstd 1-22)
    #[arg(long, env = "VBOSTREAM_COMPRESSION_LEVEL", value_name = "N")]
    pub compression_level: Option<i32>,

    /// Active buffer names, comma separated
    #[arg(long, env = "VBOSTREAM_BUFFERS", value_delimiter = ',', value_name = "NAMES")]
    pub buffers: Option<Vec<String>>,

    /// Active program names, comma separated
    #[arg(long, env = "VBOSTREAM_PROGRAMS", value_delimiter = ',', value_name = "NAMES")]
    pub programs: Option<Vec<String>>,

    /// Number of points in the demo simulation
    #[arg(long, env = "VBOSTREAM_POINTS", value_name = "N")]
    pub points: Option<usize>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "vbostream=info",
            1 => "vbostream=debug",
            _ => "vbostream=trace",
        }
    }
}
