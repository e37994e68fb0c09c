use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::connection::ConnectionSettings;
use crate::framer::DEFAULT_MAX_FRAME;
use crate::protocol::{Coordinates, WorkerInfo};
use crate::server::{Server, ServerBuilder, DEFAULT_PORT};
use crate::worker::{WorkerConfig, DEFAULT_FETCH_TIMEOUT, DEFAULT_SAMPLES};

#[derive(Debug, Parser)]
#[command(name = "geolocate", version, about = "Estimate where a web server lives from worker RTT measurements")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve pages, accept workers and aggregate their measurements.
    Coordinator(CoordinatorArgs),
    /// Register with a coordinator and measure the targets it sends.
    Worker(WorkerArgs),
}

#[derive(Debug, Args)]
pub struct CoordinatorArgs {
    #[arg(long, env = "GEOLOCATE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "GEOLOCATE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory static files are served from.
    #[arg(long, env = "GEOLOCATE_WEB_ROOT", default_value = "./web_files")]
    pub web_root: PathBuf,

    /// Seconds to wait for data from a client; 0 waits forever.
    #[arg(long, env = "GEOLOCATE_READ_TIMEOUT_SECS", default_value_t = 30)]
    pub read_timeout_secs: u64,

    #[arg(long, env = "GEOLOCATE_MAX_HEAD_BYTES", default_value_t = DEFAULT_MAX_FRAME)]
    pub max_head_bytes: usize,
}

impl CoordinatorArgs {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            read_timeout: (self.read_timeout_secs > 0).then(|| Duration::from_secs(self.read_timeout_secs)),
            max_head_bytes: self.max_head_bytes,
            ..ConnectionSettings::default()
        }
    }

    pub fn into_server(self) -> Server {
        let settings = self.connection_settings();
        ServerBuilder::new()
            .host(self.host)
            .port(self.port)
            .web_root(self.web_root)
            .connection_settings(settings)
            .build()
    }
}

#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Coordinator address, `HOST` or `HOST:PORT`.
    #[arg(long, env = "GEOLOCATE_COORDINATOR")]
    pub coordinator: String,

    /// Label reported for this worker, e.g. "Palo Alto".
    #[arg(long, env = "GEOLOCATE_LOCATION")]
    pub location: String,

    /// `LAT,LON` of this worker.
    #[arg(long, env = "GEOLOCATE_COORDS", allow_hyphen_values = true)]
    pub coords: Coordinates,

    /// Fetches timed per target.
    #[arg(long, env = "GEOLOCATE_SAMPLES", default_value_t = DEFAULT_SAMPLES)]
    pub samples: usize,
}

impl WorkerArgs {
    pub fn into_config(self) -> WorkerConfig {
        WorkerConfig {
            coordinator: with_default_port(&self.coordinator),
            info: WorkerInfo::new(self.location, self.coords),
            samples: self.samples.max(1),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

fn with_default_port(addr: &str) -> String {
    let has_port = addr
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);
    if has_port {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    }
}
